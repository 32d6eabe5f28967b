//! Registration & Bootstrap drivers (§4.6): builds the CoAP messages for
//! the Bootstrap-Request/Finish, Register, Update, and De-register
//! operations, renders the CoRE Link Format payload Register/Update
//! carry, and tracks the retry policy governing each.
//!
//! No direct teacher analogue -- `toad` has no concept of a
//! Registration Interface -- so message construction here is grounded on
//! the `MessageOptions` usage patterns visible in the teacher's
//! `step::set_standard_options`/`step::block` (`set_path`, `add_query`,
//! `set_content_format`, `set_payload`), and the retry bookkeeping reuses
//! [`crate::retry::RetryTimer`] unmodified, same as every other
//! retransmitting operation in this crate.

use core::fmt::Write as _;

use embedded_time::Instant;
use tinyvec::ArrayVec;
use toad_msg::{Code, Id, MessageOptions, Payload, Token, Type};
use toad_writable::Writable;

use crate::config::Config;
use crate::platform::Message;
use crate::retry::{Attempts, RetryTimer, Strategy, YouShould};
use crate::time::{Clock, Millis, Timeout};

/// One Object/Instance pair to advertise in a Register/Update payload's
/// CoRE Link Format body (§4.6 "`</oid/iid>`, one per Object Instance").
#[derive(Debug, Clone, Copy)]
pub struct ObjectLink {
  /// Object ID.
  pub oid: u16,
  /// Object-Instance ID, or `None` for an Object with no instances yet
  /// (advertised bare, `</oid>`).
  pub iid: Option<u16>,
  /// Version to append as `;ver="x.y"`, when it differs from the
  /// LwM2M-registry default for this Object.
  pub version: Option<&'static str>,
}

/// Render the CoRE Link Format payload Register/Update carry (§4.6,
/// RFC 6690), into a caller-provided fixed-capacity buffer.
///
/// `</>` root link listing `lwm2m` attributes is omitted -- per RFC
/// 6690 §7.1 and LwM2M TS §6.2.2.2 it's optional and most servers infer
/// the binding/LwM2M version from the `lwm2m`/`b` query parameters
/// instead, which this crate always sends.
pub fn render_link_format<const N: usize>(links: &[ObjectLink]) -> Writable<ArrayVec<[u8; N]>> {
  let mut buf: Writable<ArrayVec<[u8; N]>> = Writable::default();
  for (i, link) in links.iter().enumerate() {
    if i > 0 {
      let _ = write!(buf, ",");
    }
    match link.iid {
      | Some(iid) => {
        let _ = write!(buf, "</{}/{}>", link.oid, iid);
      },
      | None => {
        let _ = write!(buf, "</{}>", link.oid);
      },
    }
    if let Some(ver) = link.version {
      let _ = write!(buf, ";ver=\"{}\"", ver);
    }
  }
  buf
}

/// Retry policy for the Registration interface, derived from the
/// current Server Object instance's `/1/x/17-20` resources (Comm Retry
/// Count/Timer, Seq Retry Count/Delay) as described in §4.6.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Resource `/1/x/17`: retries within one sequence.
  pub comm_retry_count: u16,
  /// Resource `/1/x/18`, seconds.
  pub comm_retry_timer_secs: u32,
  /// Resource `/1/x/19`: number of retry sequences attempted before
  /// giving up and falling back to Bootstrap (if enabled) or Failure.
  pub seq_retry_count: u16,
  /// Resource `/1/x/20`, seconds.
  pub seq_delay_timer_secs: u32,
  /// Resource `/1/x/16` (Bootstrap on Registration Failure): when `true`,
  /// exhausting every retry sequence above falls back to Bootstrap
  /// instead of `Failure` (§4.6, §4.8).
  pub bootstrap_on_failure: bool,
}

impl Default for RetryPolicy {
  /// Matches the LwM2M-registry defaults for `/1/x/16-20` when a Server
  /// instance doesn't set them explicitly.
  fn default() -> Self {
    Self { comm_retry_count: 1,
           comm_retry_timer_secs: 60,
           seq_retry_count: 1,
           seq_delay_timer_secs: 86_400,
           bootstrap_on_failure: false }
  }
}

impl RetryPolicy {
  fn strategy(&self) -> Strategy {
    Strategy::Delay { min: Millis(self.comm_retry_timer_secs as u64 * 1_000),
                      max: Millis(self.comm_retry_timer_secs as u64 * 1_000) }
  }

  /// Build a [`RetryTimer`] for one registration/update attempt sequence.
  pub fn timer<C: Clock>(&self, now: Instant<C>) -> RetryTimer<C> {
    RetryTimer::new(now, self.strategy(), Attempts(self.comm_retry_count as u16 + 1))
  }
}

/// Build the `POST /bs?ep=<endpoint>` Bootstrap-Request (§4.6 step 1).
pub fn bootstrap_request(cfg: &Config, id: Id, token: Token) -> Message {
  let mut msg = Message::new(Type::Con, Code::POST, id, token);
  msg.set_path("bs").ok();
  msg.add_query(core::str::from_utf8(b"ep").unwrap()).ok();
  let mut ep = Writable::<ArrayVec<[u8; 80]>>::default();
  let _ = write!(ep, "ep={}", cfg.endpoint_name.as_str());
  msg.add_query(ep.as_str()).ok();
  msg
}

/// Build the `POST /bs-finish` message closing out a Bootstrap sequence
/// once every write from the Bootstrap-Server has been applied (§4.6
/// step 1, "Bootstrap-Finish").
pub fn bootstrap_finish(id: Id, token: Token) -> Message {
  let mut msg = Message::new(Type::Con, Code::POST, id, token);
  msg.set_path("bs-finish").ok();
  msg
}

/// Build the `POST /rd?ep=...&lt=...&lwm2m=...&b=...[&Q]` Register
/// request (§4.6 step 2), with the CoRE Link Format object list as its
/// body.
pub fn register_request<const N: usize>(cfg: &Config,
                                        lifetime_secs: u32,
                                        lwm2m_version: &str,
                                        binding: &str,
                                        link_format: &Writable<ArrayVec<[u8; N]>>,
                                        id: Id,
                                        token: Token)
                                        -> Message {
  let mut msg = Message::new(Type::Con, Code::POST, id, token);
  msg.set_path("rd").ok();

  let mut q: Writable<ArrayVec<[u8; 80]>> = Writable::default();
  let _ = write!(q, "ep={}", cfg.endpoint_name.as_str());
  msg.add_query(q.as_str()).ok();

  let mut q: Writable<ArrayVec<[u8; 24]>> = Writable::default();
  let _ = write!(q, "lt={}", lifetime_secs);
  msg.add_query(q.as_str()).ok();

  let mut q: Writable<ArrayVec<[u8; 24]>> = Writable::default();
  let _ = write!(q, "lwm2m={}", lwm2m_version);
  msg.add_query(q.as_str()).ok();

  let mut q: Writable<ArrayVec<[u8; 8]>> = Writable::default();
  let _ = write!(q, "b={}", binding);
  msg.add_query(q.as_str()).ok();

  if cfg.queue_mode_enabled {
    msg.add_query("Q").ok();
  }

  msg.set_content_format(crate::ContentFormat::LinkFormat).ok();
  msg.set_payload(Payload(link_format.as_str().as_bytes().iter().copied().collect()))
     .ok();
  msg
}

/// Build the `PUT <location>` Update request (§4.6 step 3). Carries a
/// body only when something actually changed since the last successful
/// Register/Update -- an empty `link_format` omits the payload and
/// Content-Format entirely, per the registration update rules (updating
/// only what changed keeps the datagram minimal).
pub fn update_request<const N: usize>(location: &str,
                                      lifetime_secs: Option<u32>,
                                      binding: Option<&str>,
                                      link_format: Option<&Writable<ArrayVec<[u8; N]>>>,
                                      id: Id,
                                      token: Token)
                                      -> Message {
  let mut msg = Message::new(Type::Con, Code::PUT, id, token);
  msg.set_path(location.trim_start_matches('/')).ok();

  if let Some(lt) = lifetime_secs {
    let mut q: Writable<ArrayVec<[u8; 24]>> = Writable::default();
    let _ = write!(q, "lt={}", lt);
    msg.add_query(q.as_str()).ok();
  }
  if let Some(b) = binding {
    let mut q: Writable<ArrayVec<[u8; 8]>> = Writable::default();
    let _ = write!(q, "b={}", b);
    msg.add_query(q.as_str()).ok();
  }
  if let Some(lf) = link_format {
    msg.set_content_format(crate::ContentFormat::LinkFormat).ok();
    msg.set_payload(Payload(lf.as_str().as_bytes().iter().copied().collect()))
       .ok();
  }
  msg
}

/// Build the `DELETE <location>` De-register request (§4.6 step 4).
pub fn deregister_request(location: &str, id: Id, token: Token) -> Message {
  let mut msg = Message::new(Type::Con, Code::DELETE, id, token);
  msg.set_path(location.trim_start_matches('/')).ok();
  msg
}

/// Given a Registration response, how long until the next Update is due
/// (§4.6 "Update timing": `MAX(lifetime/2, lifetime - MAX_TRANSMIT_WAIT)`,
/// or never if `lifetime == 0`, which only a misbehaving server would
/// send but is guarded against regardless).
pub fn next_update_timeout(lifetime_secs: u32, cfg: &Config) -> Timeout {
  if lifetime_secs == 0 {
    return Timeout::Never;
  }
  let lifetime_millis = lifetime_secs as u64 * 1_000;
  let half = lifetime_millis / 2;
  let margin = lifetime_millis.saturating_sub(cfg.max_transmit_wait_millis());
  Timeout::Millis(half.max(margin))
}

/// Extract the Location-Path the Registration server returned, rendered
/// back into a single `/`-joined string for use in Update/De-register.
pub fn location_path<const N: usize>(resp: &Message) -> Writable<ArrayVec<[u8; N]>> {
  let mut buf: Writable<ArrayVec<[u8; N]>> = Writable::default();
  let segs: ArrayVec<[&str; 8]> = resp.location_path().unwrap_or_default();
  for (i, seg) in segs.iter().enumerate() {
    if i > 0 {
      let _ = write!(buf, "/");
    }
    let _ = buf.write_str(seg);
  }
  buf
}

/// Did `what_should_i_do` say to give up on this registration attempt?
pub fn retry_exhausted<C: Clock>(retry: &mut RetryTimer<C>, now: Instant<C>) -> bool {
  matches!(retry.what_should_i_do(now), Ok(YouShould::Cry))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn link_format_renders_multiple_objects() {
    let links = [ObjectLink { oid: 1, iid: Some(0), version: None },
                 ObjectLink { oid: 3, iid: Some(0), version: Some("1.1") },
                 ObjectLink { oid: 3442, iid: None, version: None }];
    let rendered = render_link_format::<128>(&links);
    assert_eq!(rendered.as_str(), r#"</1/0>,</3/0>;ver="1.1",</3442>"#);
  }

  #[test]
  fn register_request_carries_required_queries() {
    let cfg = Config::new("urn:imei:123");
    let links = [ObjectLink { oid: 1, iid: Some(0), version: None }];
    let lf = render_link_format::<64>(&links);
    let msg = register_request(&cfg, 86400, "1.1", "U", &lf, Id(1), Token(Default::default()));
    assert_eq!(msg.code, Code::POST);
  }

  #[test]
  fn update_timeout_uses_max_transmit_wait_margin_when_larger_than_half() {
    let cfg = Config::new("ep");
    match next_update_timeout(20, &cfg) {
      | Timeout::Millis(ms) => assert!(ms <= 20_000),
      | Timeout::Never => panic!("expected a finite timeout"),
    }
  }

  #[test]
  fn zero_lifetime_never_times_out() {
    let cfg = Config::new("ep");
    assert_eq!(next_update_timeout(0, &cfg), Timeout::Never);
  }

  #[test]
  fn retry_policy_defaults_match_registry() {
    let p = RetryPolicy::default();
    assert_eq!(p.comm_retry_count, 1);
    assert_eq!(p.seq_retry_count, 1);
  }
}
