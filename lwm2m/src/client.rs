//! Client State Machine (§4.8): the single entry point (`step`) that
//! drives everything else in this crate -- one [`Exchange`], the
//! [`Registry`], the Observation [`Engine`], the Send [`Queue`], and the
//! Registration/Bootstrap message builders -- against a connection
//! lifecycle with well-defined states and transitions.
//!
//! No direct teacher analogue (`toad` has no client lifecycle of its
//! own, only a request/response `Core`), so the shape of `step` is
//! grounded on the cooperative, side-effect-free polling loop every
//! other piece of this crate already follows: read a [`Snapshot`], poll
//! sub-engines, return [`Effect`]s for the [`Platform`] to execute. The
//! state names and transition table come straight from §4.8.

#[cfg(feature = "alloc")]
use std_alloc::vec::Vec;

use embedded_time::Instant;
use toad_msg::{Code, Id, MessageOptions, OptNumber, OptValue, Token, Type};
use tinyvec::ArrayVec;
use toad_writable::Writable;

use crate::blockwise;
use crate::cache::{Hit, ResponseCache};
use crate::config::Config;
use crate::dm::{self, Registry};
use crate::exchange::{Exchange, Outcome};
use crate::observe;
use crate::platform::{Effect, Message, Platform};
use crate::registration;
use crate::retry::Attempts;
use crate::send;
use crate::time::{Clock, Timeout};

/// Largest body this engine will reassemble from Block1 or hold ready to
/// serve over Block2 at once (§4.3). Generous relative to a typical LwM2M
/// resource payload while still bounding worst case memory per §9.
const BLOCK_TRANSFER_CAP: usize = 2048;

/// In-progress reassembly of an incoming Block1-carrying PUT/POST, keyed
/// by the request `Token` so a retransmitted or unrelated request can't
/// be mistaken for the next piece of this one.
#[derive(Debug)]
struct Block1Rx {
  token: Token,
  reassembler: blockwise::Reassembler<BLOCK_TRANSFER_CAP>,
}

/// A fully-encoded Read response too large for one datagram, held ready
/// to serve across the successive Block2-numbered GETs the server sends
/// to retrieve the rest of it.
#[derive(Debug, Clone)]
struct Block2Tx {
  token: Token,
  payload: ArrayVec<[u8; BLOCK_TRANSFER_CAP]>,
  format: crate::ContentFormat,
  szx: u16,
}

/// Result of feeding one block into [`Client::accept_block1`].
enum Block1Outcome {
  /// Send this response now -- either `2.31 Continue` for a non-final
  /// block, or `4.08 Request Entity Incomplete` for a rejected one.
  Respond(Message),
  /// The last block landed; here's the whole assembled body.
  Assembled(ArrayVec<[u8; BLOCK_TRANSFER_CAP]>),
}

/// Conservative byte budget for a Read response body before Block2
/// segmentation kicks in: the configured MTU (§4.3 "the engine needs to
/// know the MTU ceiling to plan Block-wise transfers around"), minus
/// headroom for the CoAP header, token, and options.
fn read_block_budget(cfg: &Config) -> usize {
  (cfg.net_socket_cfg.mtu as usize).saturating_sub(64)
}

/// Connection lifecycle state (§4.8). The Bootstrap-Server case is
/// represented by [`ConnStatus::Bootstrap`] directly rather than by a
/// dedicated connection-handle variant, since the Bootstrap Interface
/// has no lifetime/registration bookkeeping of its own.
#[derive(Debug, Clone)]
pub enum ConnStatus {
  /// No Bootstrap/Registration has been attempted yet.
  Initial,
  /// Bootstrap-Request sent or in progress; the Bootstrap-Server is
  /// expected to Write Security/Server instances before `bs-finish`.
  Bootstrap { retry: Attempts },
  /// Register sent, awaiting the 2.01 Created response.
  Registration { conn: ServerConnStub, retry: Attempts },
  /// Registered: observations and Send deliveries are live, Updates are
  /// scheduled, and inbound server requests are served (§4.8 steady
  /// state).
  RegistrationSession { conn: ServerConnStubFull },
  /// Registered, but idle between exchanges with the radio free to
  /// sleep until the next scheduled wakeup (`Q` binding).
  QueueMode { conn: ServerConnStubFull, wake_at: Timeout },
  /// A Server instance was administratively disabled (`/1/x/4 Disable`)
  /// for a bounded duration; the client holds the connection closed
  /// until `resume_at` and then re-registers.
  SuspendMode { conn: ServerConnStubFull, resume_at_millis: u64 },
  /// Every avenue (Bootstrap retries, Registration retries, no
  /// fallback server) has been exhausted.
  Failure,
}

/// Lightweight handle threaded through [`ConnStatus::Registration`], kept
/// separate from [`ServerConnStubFull`] so the enum doesn't carry a
/// `location` buffer before one has actually been assigned.
#[derive(Debug, Clone, Copy)]
pub struct ServerConnStub {
  /// Short Server ID being registered with.
  pub ssid: u16,
  /// Lifetime (seconds) to request, resolved by the host from the
  /// Server Instance's `/1/x/1` before calling
  /// [`Client::begin_registration`].
  pub lifetime_secs: u32,
  /// Retry policy derived from the Server Instance's `/1/x/17-20`
  /// (§4.6); governs how many Register attempt sequences are made
  /// before falling back to Bootstrap or Failure.
  pub retry_policy: registration::RetryPolicy,
}

/// Full per-server bookkeeping once a session exists.
#[derive(Debug, Clone)]
pub struct ServerConnStubFull {
  ssid: u16,
  lifetime_secs: u32,
  binding: Writable<ArrayVec<[u8; 4]>>,
  location: Writable<ArrayVec<[u8; 64]>>,
  /// Absolute monotonic deadline (milliseconds since the clock's epoch)
  /// at which the next Update is due, or `None` if `lifetime_secs == 0`
  /// (§4.6 "Update... if lifetime=0, timer is infinite").
  update_due_millis: Option<u64>,
  retry_policy: registration::RetryPolicy,
  /// When the session last had nothing to do (milliseconds since the
  /// clock's epoch), `None` while there's work in flight. Drives the
  /// Queue-Mode quiescence timer (§4.8 "queue-timeout (queue mode
  /// enabled) -> Queue-Mode").
  idle_since_millis: Option<u64>,
}

/// What kind of operation the currently in-flight (or just-finished)
/// exchange was, so [`Client::on_exchange_outcome`] knows how to react to
/// a failure beyond the generic retry/give-up handling every exchange
/// gets (§4.8 table rows for `RegistrationSession`/`QueueMode`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ExchangeKind {
  /// Register/Update success path aside, nothing about this exchange
  /// needs special handling if it fails (Bootstrap, Register, Send,
  /// De-register, a Non-confirmable Notify, or an incoming request's
  /// response).
  #[default]
  Other,
  /// A Registration-interface Update (§4.6 step 3); a timed-out/reset
  /// Update while `RegistrationSession`/`QueueMode` re-enters
  /// `Registration` to re-register (§4.8).
  Update,
  /// A Confirmable Observe notification for the observation at this
  /// index (§4.7); a timed-out/reset one cancels that observation.
  Notify(usize),
  /// A client-initiated Block-wise GET ([`Client::begin_read`], §4.3);
  /// its outcome is handed back to the host via
  /// [`Client::take_read_result`] rather than affecting `status`.
  Read,
  /// The best-effort Deregister [`Client::owe_connection_transition`]
  /// queued; whatever it settles with, the connection is closed right
  /// after (§4.8 "close connection").
  Deregister,
}

/// Public description of what the client is doing right now, for a host
/// that wants to display or log status without matching on every
/// [`ConnStatus`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ongoing {
  /// No exchange or state transition is in flight.
  Idle,
  /// Bootstrapping with a Bootstrap-Server.
  Bootstrapping,
  /// Registering with a management Server.
  Registering,
  /// A normal in-session operation (Update, Notify, Send, or an
  /// incoming request) is in flight.
  Session,
}

/// The LwM2M client engine. Generic over the host's [`Platform`] and the
/// maximum number of [`dm::ObjectHandler`]s it serves.
pub struct Client<'a, P: Platform, const OBJECTS: usize> {
  registry: Registry<'a, OBJECTS>,
  exchange: Exchange<P::Clock>,
  cache: ResponseCache<P::Clock>,
  observations: observe::Engine<P::Clock>,
  send_queue: send::Queue,
  status: ConnStatus,
  next_id: u16,
  next_token: u16,
  /// Objects to advertise in the next Register/Update link-format body.
  links: ArrayVec<[registration::ObjectLink; OBJECTS]>,
  /// A best-effort Deregister owed to `location` before the connection
  /// this client just left is allowed to go quiet (§4.8 "User-triggered
  /// transitions that close the connection begin with Deregister when
  /// the client is Registered"). Drained as a fire-and-forget Non- ms
  /// confirmable `DELETE` on the next `step`.
  pending_deregister: Option<Writable<ArrayVec<[u8; 64]>>>,
  /// A plain connection close owed on the next `step`, for a transition
  /// away from a status that has no Deregister of its own (Bootstrap,
  /// Registration, Suspend-Mode) (§4.8 "close connection").
  pending_close: bool,
  /// A fresh connection owed on the next `step`, for the status just
  /// entered (§4.8 "open connection"/"re-open connection").
  pending_connect: bool,
  /// In-flight Block1 reassembly for an incoming large Write/Create.
  block1_rx: Option<Block1Rx>,
  /// In-flight Block2 service of a large Read response.
  block2_tx: Option<Block2Tx>,
  /// What the currently in-flight exchange is, for
  /// [`Client::on_exchange_outcome`] to react to its failure correctly.
  pending_kind: ExchangeKind,
  /// A client-initiated GET ([`Client::begin_read`]) waiting for the
  /// Exchange Engine to free up, e.g. pulling a large resource (a
  /// Firmware Image, a large composite Read) via Block2 (§4.3).
  pending_read: Option<Writable<ArrayVec<[u8; 64]>>>,
  /// The most recently completed [`Client::begin_read`], ready to be
  /// taken via [`Client::take_read_result`].
  read_result: Option<Outcome>,
}

impl<'a, P: Platform, const OBJECTS: usize> Client<'a, P, OBJECTS> {
  /// Construct a new, unregistered client around `registry`.
  pub fn new(registry: Registry<'a, OBJECTS>) -> Self {
    Self { registry,
           exchange: Exchange::default(),
           cache: ResponseCache::default(),
           observations: observe::Engine::default(),
           send_queue: send::Queue::default(),
           status: ConnStatus::Initial,
           next_id: 1,
           next_token: 1,
           links: ArrayVec::new(),
           pending_deregister: None,
           pending_close: false,
           pending_connect: false,
           block1_rx: None,
           block2_tx: None,
           pending_kind: ExchangeKind::Other,
           pending_read: None,
           read_result: None }
  }

  /// Own whatever connection-lifecycle side effect is owed when leaving
  /// `status` behind: a best-effort Deregister (followed by a close once
  /// it settles) from a live session, or a plain close from anything
  /// else that had a connection open at all (§4.8 "User-triggered
  /// transitions that close the connection begin with Deregister when
  /// the client is Registered").
  fn owe_connection_transition(&mut self, status: &ConnStatus) {
    match status {
      | ConnStatus::RegistrationSession { conn } | ConnStatus::QueueMode { conn, .. } => {
        self.pending_deregister = Some(conn.location.clone());
      },
      | ConnStatus::Initial | ConnStatus::Failure => {},
      | _ => self.pending_close = true,
    }
  }

  fn fresh_id(&mut self) -> Id {
    let id = Id(self.next_id);
    self.next_id = self.next_id.wrapping_add(1).max(1);
    id
  }

  fn fresh_token(&mut self) -> Token {
    let mut t = ArrayVec::new();
    t.extend_from_slice(&self.next_token.to_be_bytes());
    self.next_token = self.next_token.wrapping_add(1).max(1);
    Token(t)
  }

  /// Declare which Objects/Instances this client advertises in its
  /// Register/Update payload. Call before [`Client::request_bootstrap`]
  /// or registering; has no effect on an already-open session (the next
  /// Update picks up the change).
  pub fn set_advertised_objects(&mut self, links: &[registration::ObjectLink]) {
    self.links.clear();
    for l in links.iter().take(OBJECTS) {
      self.links.push(*l);
    }
  }

  /// User-triggered: (re-)start the Bootstrap sequence regardless of
  /// current state (§4.8 "Bootstrap-Request trigger").
  pub fn request_bootstrap(&mut self) {
    let old = core::mem::replace(&mut self.status, ConnStatus::Bootstrap { retry: Attempts(0) });
    self.owe_connection_transition(&old);
    self.observations.clear_all();
    self.send_queue.clear();
    self.pending_connect = true;
  }

  /// Host-triggered: move directly to the Registration Interface with a
  /// Server Instance the host already resolved -- typically from
  /// persisted [`crate::persist::SecurityRecord`]/[`crate::persist::ServerRecord`]
  /// pairs read back at startup, skipping Bootstrap entirely (§4.8
  /// "Initial, valid Security+Server instance known -> Registration").
  /// Uses [`registration::RetryPolicy::default`]; see
  /// [`Client::begin_registration_with_retry_policy`] to supply the
  /// Server Instance's own `/1/x/17-20` values.
  pub fn begin_registration(&mut self, ssid: u16, lifetime_secs: u32) {
    self.begin_registration_with_retry_policy(ssid, lifetime_secs, registration::RetryPolicy::default());
  }

  /// As [`Client::begin_registration`], with an explicit retry policy
  /// derived from the Server Instance's `/1/x/17-20` resources (§4.6).
  pub fn begin_registration_with_retry_policy(&mut self,
                                              ssid: u16,
                                              lifetime_secs: u32,
                                              retry_policy: registration::RetryPolicy) {
    let old = core::mem::replace(&mut self.status,
                                 ConnStatus::Registration { conn: ServerConnStub { ssid,
                                                                                  lifetime_secs,
                                                                                  retry_policy },
                                                            retry: Attempts(0) });
    self.owe_connection_transition(&old);
    self.observations.clear_all();
    self.send_queue.clear();
    self.pending_connect = true;
  }

  /// User-triggered: tear down whatever connection exists and return to
  /// [`ConnStatus::Initial`] (§4.8 "factory reset"/"restart").
  pub fn restart(&mut self) {
    let old = core::mem::replace(&mut self.status, ConnStatus::Initial);
    self.owe_connection_transition(&old);
    self.observations.clear_all();
    self.send_queue.clear();
  }

  /// Administratively disable the current Server connection for
  /// `duration_millis` (Server Object `/1/x/4 Disable`, §4.8). No-op
  /// outside of [`ConnStatus::RegistrationSession`]/[`ConnStatus::QueueMode`].
  pub fn disable_server(&mut self, duration_millis: u64, now: Instant<P::Clock>) {
    let conn = match core::mem::replace(&mut self.status, ConnStatus::Initial) {
      | ConnStatus::RegistrationSession { conn } | ConnStatus::QueueMode { conn, .. } => conn,
      | other => {
        self.status = other;
        return;
      },
    };
    self.pending_deregister = Some(conn.location.clone());
    self.observations.clear_all();
    let resume_at_millis = millis_since_epoch(now) + duration_millis;
    self.status = ConnStatus::SuspendMode { conn, resume_at_millis };
  }

  /// Enqueue a LwM2M Send payload for delivery the next time the client
  /// is in a session and unmuted.
  pub fn enqueue_send(&mut self, send: send::QueuedSend) {
    self.send_queue.push(send);
  }

  /// Enqueue a client-initiated GET against `path` (e.g. pulling a large
  /// resource such as a Firmware Image from a Server), executed on the
  /// next free `step` via the Exchange Engine's Block-wise GET flow
  /// (§4.3). Only one such read may be pending/in-flight at a time; a
  /// second call before the first completes replaces it.
  pub fn begin_read(&mut self, path: &str) {
    let mut buf: Writable<ArrayVec<[u8; 64]>> = Writable::default();
    let _ = core::fmt::Write::write_str(&mut buf, path);
    self.pending_read = Some(buf);
  }

  /// Take the result of the most recently completed [`Client::begin_read`],
  /// if one has finished since the last call.
  pub fn take_read_result(&mut self) -> Option<Outcome> {
    self.read_result.take()
  }

  /// Record that a resource changed, for the Observation Engine to
  /// evaluate against every matching observation's attributes.
  pub fn note_value_change(&mut self, path: &dm::UriPath, value: &dm::Value) {
    self.observations.note_change(path, value);
  }

  /// A coarse description of what's in flight, for logging/UI.
  pub fn ongoing_operation(&self) -> Ongoing {
    if !self.exchange.is_idle() {
      return match self.status {
        | ConnStatus::Bootstrap { .. } => Ongoing::Bootstrapping,
        | ConnStatus::Registration { .. } => Ongoing::Registering,
        | _ => Ongoing::Session,
      };
    }
    Ongoing::Idle
  }

  /// Drive one tick of the engine: process any inbound datagram, poll
  /// retransmission/retry timers, advance the connection lifecycle, and
  /// execute whatever [`Effect`]s fall out.
  pub fn step(&mut self, platform: &mut P) -> Result<(), P::Error> {
    use crate::platform::PlatformError;

    let snapshot = platform.snapshot()?;
    let now = snapshot.time;
    let cfg = snapshot.config;

    self.cache.prune(now);

    let mut effects: ArrayVec<[Effect; 6]> = ArrayVec::new();

    if let Some(bytes) = snapshot.recvd_dgram.as_deref() {
      self.on_recv(bytes, now, &cfg, &mut effects);
    }

    if let Some(eff) = self.exchange.poll(now) {
      effects.push(eff);
    }

    if self.exchange.is_done() {
      if let Some(outcome) = self.exchange.take_outcome() {
        self.on_exchange_outcome(outcome, now, &cfg, &mut effects);
      }
    }

    if self.exchange.is_idle() {
      self.drive_lifecycle(now, &cfg, &mut effects);
    }

    for eff in effects {
      match platform.exec_1(&eff) {
        | Ok(()) | Err(nb::Error::WouldBlock) => continue,
        | Err(nb::Error::Other(e)) => return Err(e),
      }
    }

    Ok(())
  }

  fn on_recv(&mut self,
            bytes: &[u8],
            now: Instant<P::Clock>,
            cfg: &Config,
            effects: &mut ArrayVec<[Effect; 6]>) {
    use toad_msg::TryFromBytes;

    let msg = match Message::try_from_bytes(bytes) {
      | Ok(m) => m,
      | Err(_) => return,
    };

    if msg.ty == Type::Con || msg.ty == Type::Non {
      match self.cache.lookup(msg.id) {
        // Already answered and the response is still on hand: resend it
        // verbatim without re-running the DM handler (§4.2).
        | Some(Hit::Replay(resp)) => {
          effects.push(Effect::Send(resp));
          return;
        },
        // Already answered, but the full body aged out of the one
        // full-body slot: still must not re-run the DM handler a second
        // time, even though there's nothing left to resend.
        | Some(Hit::SeenNoBody) => return,
        | None => {},
      }
    }

    if let Some(eff) = self.exchange.on_recv(&msg, now) {
      effects.push(eff);
      return;
    }

    // Not part of the active exchange: an incoming request from the
    // server (Read/Write/Execute/Observe) against the Data Model.
    if matches!(msg.code, c if c == Code::GET || c == Code::PUT || c == Code::POST || c == Code::DELETE) {
      let resp = self.handle_incoming_request(&msg, cfg);
      self.cache.insert(msg.id, &resp, now, cfg).ok();
      effects.push(Effect::Send(resp));
    }
  }

  fn handle_incoming_request(&mut self, req: &Message, cfg: &Config) -> Message {
    if !self.exchange.is_idle() {
      return response(req, Code::new(5, 3));
    }

    let path = match req.path_string().ok().and_then(|s| dm::UriPath::parse(&s).ok()) {
      | Some(p) => p,
      | None => return response(req, Code::new(4, 0)),
    };

    // Discover (§4.5): a GET that negotiates `application/link-format`
    // rather than reading a value. Object-level only, per `dm::discover`'s
    // doc comment -- a deeper `/oid/iid` or `/oid/iid/rid` enumeration
    // would need Instance/Resource declarations this seam doesn't expose.
    if req.code == Code::GET && req.accept() == Some(crate::ContentFormat::LinkFormat) {
      return self.handle_discover(req, &path);
    }

    // Read (and Observe-register-on-Read) are handled on their own --
    // unlike every other arm below, a successful Read needs its payload
    // encoded and, if too large for one datagram, segmented across a
    // Block2 exchange (§4.3 "Block-wise GET flow").
    if req.code == Code::GET {
      return self.handle_read(req, &path, cfg);
    }

    // A Block1-carrying Write/Create may span several exchanges (§4.3
    // "Block-wise PUT flow"): every non-final block gets `2.31 Continue`
    // immediately, and the Data Model only sees the assembled whole once
    // the last block lands.
    let mut block1_payload: Option<ArrayVec<[u8; BLOCK_TRANSFER_CAP]>> = None;
    if req.code == Code::PUT || req.code == Code::POST {
      if let Some(block) = req.block1() {
        match self.accept_block1(req, block) {
          | Block1Outcome::Respond(resp) => return resp,
          | Block1Outcome::Assembled(payload) => block1_payload = Some(payload),
        }
      }
    }
    let payload: &[u8] = match &block1_payload {
      | Some(p) => p.as_slice(),
      | None => req.payload.0.as_ref(),
    };

    // Each arm names its own success code (§4.5): 2.01 Created for
    // Create, 2.02 Deleted for Delete, 2.04 Changed for every other
    // mutation.
    let result: Result<Code, Code> = match req.code {
      | c if c == Code::DELETE => dm::delete::<OBJECTS>(&mut self.registry, &path).map(|()| Code::new(2, 2)),
      | c if c == Code::POST && path.rid().is_some() => {
        dm::execute::<OBJECTS>(&mut self.registry, &path, payload).map(|()| Code::new(2, 4))
      },
      | c if c == Code::PUT => {
        // Whole-instance Replace resets every writable resource first;
        // a PUT targeting a single resource overwrites just that value.
        let replace = path.rid().is_none();
        decode_entries(req, payload, &path, |entries| dm::write::<OBJECTS>(&mut self.registry, entries, replace))
          .map(|()| Code::new(2, 4))
      },
      | c if c == Code::POST && path.iid().is_some() => {
        // Write-Partial-Update: POST to an existing Object Instance.
        decode_entries(req, payload, &path, |entries| dm::write::<OBJECTS>(&mut self.registry, entries, false))
          .map(|()| Code::new(2, 4))
      },
      | c if c == Code::POST => {
        // Create: POST to an Object (no Instance ID yet).
        decode_entries(req, payload, &path, |entries| dm::create::<OBJECTS>(&mut self.registry, &path, entries))
          .map(|()| Code::new(2, 1))
      },
      | _ => Err(Code::new(4, 5)),
    };

    match result {
      | Ok(code) => response(req, code),
      | Err(code) => response(req, code),
    }
  }

  /// Serve a Read (§4.5), encoding the matched value(s) into the
  /// negotiated content-format and, when the encoded body doesn't fit in
  /// one datagram, starting a Block2 transfer (§4.3) instead of sending
  /// it whole. A `num > 0` Block2 request continues an already-started
  /// transfer rather than re-reading the Data Model.
  fn handle_read(&mut self, req: &Message, path: &dm::UriPath, cfg: &Config) -> Message {
    if let Some(block) = req.block2() {
      if block.num() > 0 {
        return self.continue_block2_read(req, block);
      }
    }

    let observe_action = req.observe();
    if observe_action == Some(toad_msg::observe::Action::Deregister) {
      // Observe=1 cancels an existing observation (§4.7 step 3) --
      // still answered as an ordinary Read.
      self.observations.cancel(self.current_ssid(), path);
    }
    let observe_flag = observe_action == Some(toad_msg::observe::Action::Register);

    let format = req.accept().unwrap_or(crate::ContentFormat::SenmlCbor);

    let mut entries: ArrayVec<[crate::io::Entry; 32]> = ArrayVec::new();
    let mut overflow = false;
    let read_result = dm::read::<OBJECTS>(&mut self.registry, core::slice::from_ref(path), &mut |p, v| {
      if entries.is_full() {
        overflow = true;
        return Err(Code::new(5, 0));
      }
      entries.push(crate::io::Entry { path: p, value: v });
      Ok(())
    });
    if let Err(code) = read_result {
      return response(req, code);
    }
    if overflow {
      return response(req, Code::new(5, 0));
    }
    if entries.is_empty() {
      return response(req, Code::new(4, 4));
    }

    let mut out_bytes = [0u8; BLOCK_TRANSFER_CAP];
    let n = match crate::io::encode(format, &entries, &mut out_bytes) {
      | Ok(n) => n,
      | Err(_) => return response(req, Code::new(5, 0)),
    };
    let full: ArrayVec<[u8; BLOCK_TRANSFER_CAP]> = out_bytes[..n].iter().copied().collect();

    let budget = read_block_budget(cfg);

    if full.len() <= budget && req.block2().is_none() {
      let mut resp = response(req, Code::new(2, 5));
      resp.set_content_format(format).ok();
      resp.set_payload(toad_msg::Payload(full.iter().copied().collect())).ok();
      if observe_flag {
        let seq = self.observations
                      .register(self.current_ssid(), *path, format, req.token.0, observe::Attributes::default())
                      .unwrap_or(0);
        set_observe_seq(&mut resp, seq);
      }
      return resp;
    }

    let szx = req.block2()
                 .map(|b| b.size())
                 .unwrap_or_else(|| blockwise::largest_szx_within(budget))
                 .min(blockwise::largest_szx_within(budget));
    let seg = blockwise::Segmenter::new(full.as_slice());
    let (chunk, more) = seg.block(0, szx).unwrap_or((&[], false));

    let mut resp = response(req, Code::new(2, 5));
    resp.set_content_format(format).ok();
    resp.set_block2(szx, 0, more).ok();
    resp.set_payload(toad_msg::Payload(chunk.iter().copied().collect())).ok();
    if observe_flag {
      let seq = self.observations
                    .register(self.current_ssid(), *path, format, req.token.0, observe::Attributes::default())
                    .unwrap_or(0);
      set_observe_seq(&mut resp, seq);
    }
    if more {
      self.block2_tx = Some(Block2Tx { token: req.token.clone(), payload: full, format, szx });
    }
    resp
  }

  /// Serve block `block.num() > 0` of an already-started Block2 transfer
  /// (§4.3); `4.08 Request Entity Incomplete` if the token doesn't match
  /// the transfer in progress or the requested block is past the end.
  fn continue_block2_read(&mut self, req: &Message, block: toad_msg::Block) -> Message {
    let matches_token = matches!(&self.block2_tx, Some(tx) if tx.token == req.token);
    if !matches_token {
      return response(req, Code::new(4, 8));
    }
    let tx = self.block2_tx.as_ref().expect("matches_token implies Some");

    let seg = blockwise::Segmenter::new(tx.payload.as_slice());
    let Some((chunk, more)) = seg.block(block.num(), tx.szx) else {
      self.block2_tx = None;
      return response(req, Code::new(4, 8));
    };

    let mut resp = response(req, Code::new(2, 5));
    resp.set_content_format(tx.format).ok();
    resp.set_block2(tx.szx, block.num(), more).ok();
    resp.set_payload(toad_msg::Payload(chunk.iter().copied().collect())).ok();
    if !more {
      self.block2_tx = None;
    }
    resp
  }

  /// Feed one Block1-carrying block into the reassembly in progress for
  /// `req`'s token, starting a fresh one at block 0 (§4.3). A block that
  /// doesn't belong to the transfer already in progress, or that
  /// violates ordering/size/capacity, resets and asks the peer to start
  /// over from block 0 via `4.08 Request Entity Incomplete`.
  fn accept_block1(&mut self, req: &Message, block: toad_msg::Block) -> Block1Outcome {
    let continues_current = matches!(&self.block1_rx, Some(rx) if rx.token == req.token);
    if !continues_current {
      if block.num() != 0 {
        return Block1Outcome::Respond(response(req, Code::new(4, 8)));
      }
      self.block1_rx = Some(Block1Rx { token: req.token.clone(), reassembler: Default::default() });
    }

    let rx = self.block1_rx.as_mut().expect("just ensured Some");
    match rx.reassembler.push(block, None, req.payload.0.as_ref()) {
      | Err(_) => {
        self.block1_rx = None;
        Block1Outcome::Respond(response(req, Code::new(4, 8)))
      },
      | Ok(()) if block.more() => {
        let mut resp = response(req, Code::new(2, 31));
        resp.set_block1(block.size(), block.num(), true).ok();
        Block1Outcome::Respond(resp)
      },
      | Ok(()) => {
        let assembled: ArrayVec<[u8; BLOCK_TRANSFER_CAP]> = rx.reassembler.assembled().iter().copied().collect();
        self.block1_rx = None;
        Block1Outcome::Assembled(assembled)
      },
    }
  }

  /// Short Server ID of whatever Server session is currently active, or
  /// `0` (reserved for Bootstrap, §GLOSSARY) outside of one.
  fn current_ssid(&self) -> u16 {
    match &self.status {
      | ConnStatus::RegistrationSession { conn } | ConnStatus::QueueMode { conn, .. } => conn.ssid,
      | _ => 0,
    }
  }

  /// Build a Discover response: the registered `</oid>` links, filtered
  /// to the requested Object when `path` names one, as CoRE Link Format
  /// (§4.5, RFC 6690).
  fn handle_discover(&self, req: &Message, path: &dm::UriPath) -> Message {
    let Some(oid) = path.oid() else {
      let lf = registration::render_link_format::<512>(&self.links);
      return link_format_response(req, lf.as_str());
    };

    if !self.links.iter().any(|l| l.oid == oid) {
      return response(req, Code::new(4, 4));
    }
    let filtered: ArrayVec<[registration::ObjectLink; OBJECTS]> =
      self.links.iter().copied().filter(|l| l.oid == oid).collect();
    let lf = registration::render_link_format::<512>(&filtered);
    link_format_response(req, lf.as_str())
  }

  fn on_exchange_outcome(&mut self,
                         outcome: Outcome,
                         now: Instant<P::Clock>,
                         cfg: &Config,
                         effects: &mut ArrayVec<[Effect; 6]>) {
    let kind = core::mem::replace(&mut self.pending_kind, ExchangeKind::Other);
    if kind == ExchangeKind::Read {
      // A client-initiated GET (§4.3) doesn't drive the connection
      // lifecycle either way; hand its outcome straight to the host.
      self.read_result = Some(outcome);
      return;
    }
    if kind == ExchangeKind::Deregister {
      // Best-effort: whatever the Server answered (or didn't), the
      // connection this Deregister was sent over is done (§4.8 "close
      // connection"). `status` was already moved on by whatever call
      // queued the Deregister in the first place.
      effects.push(Effect::Close);
      return;
    }

    match core::mem::replace(&mut self.status, ConnStatus::Initial) {
      | ConnStatus::Bootstrap { retry } => {
        match outcome {
          | Outcome::Response(resp) if outcome_is_success(&resp) => {
            // Bootstrap-Server Writes arrive as ordinary incoming
            // requests and are handled by `on_recv` independently;
            // once the server sends `bs-finish`'s own request this
            // client answers and remains in `Bootstrap` until the
            // application decides Security/Server objects are
            // populated and calls `request_bootstrap` again or the
            // caller transitions forward out-of-band. Here we treat
            // receiving a successful ACK to our own Bootstrap-Request
            // as "the server has accepted the session".
            self.status = ConnStatus::Bootstrap { retry };
          },
          | _ if retry.0 + 1 < cfg.bootstrap_retry_count as u16 => {
            self.status = ConnStatus::Bootstrap { retry: Attempts(retry.0 + 1) };
          },
          | _ => self.status = ConnStatus::Failure,
        }
        let _ = now;
      },
      | ConnStatus::Registration { conn, retry } => {
        match outcome {
          | Outcome::Response(resp) if outcome_is_success(&resp) => {
            // §4.8 "Registration, 2.01 response -> Registration-Session":
            // a fresh session starts with no observations or queued
            // Sends carried over, whether this is the very first
            // Register or a re-register after `reregister` closed a
            // previous session (those entry points clear eagerly too,
            // but a session that dies mid-flight and reconnects only
            // clears here).
            self.observations.clear_all();
            self.send_queue.clear();
            let location = registration::location_path::<64>(&resp);
            let update_due_millis = match registration::next_update_timeout(conn.lifetime_secs, cfg) {
              | Timeout::Millis(ms) => Some(millis_since_epoch(now) + ms),
              | Timeout::Never => None,
            };
            self.status = ConnStatus::RegistrationSession {
              conn: ServerConnStubFull { ssid: conn.ssid,
                                        lifetime_secs: conn.lifetime_secs,
                                        binding: Writable::default(),
                                        location,
                                        update_due_millis,
                                        retry_policy: conn.retry_policy,
                                        idle_since_millis: None },
            };
          },
          // Registration attempt sequences, §4.6: `/1/x/19` (`seq_retry_count`)
          // sequences are attempted (plus the initial one) before falling
          // back to Bootstrap-on-failure or Failure (§4.8 row "Registration,
          // retries exhausted").
          | _ if retry.0 + 1 <= conn.retry_policy.seq_retry_count => {
            self.status = ConnStatus::Registration { conn, retry: Attempts(retry.0 + 1) };
          },
          // `/1/x/16`: fall back to Bootstrap rather than giving up
          // entirely, when the Server Instance allows it (§4.6, §4.8 row
          // "Registration, retries exhausted").
          | _ if conn.retry_policy.bootstrap_on_failure => {
            self.observations.clear_all();
            self.send_queue.clear();
            self.status = ConnStatus::Bootstrap { retry: Attempts(0) };
          },
          | _ => self.status = ConnStatus::Failure,
        }
        let _ = (now, effects, cfg);
      },
      // §4.8 "Registration-Session, protocol/network error -> Registration,
      // close & re-register": a timed-out/reset Update re-enters
      // Registration; a timed-out/reset Confirmable Notify instead
      // cancels just that observation (§4.7 "on non-response after
      // retries the observation is cancelled") and the session continues.
      | ConnStatus::RegistrationSession { conn } => {
        self.status = match (outcome, kind) {
          | (Outcome::TimedOut | Outcome::Reset, ExchangeKind::Update) => reregister(&conn),
          | (Outcome::TimedOut | Outcome::Reset, ExchangeKind::Notify(ix)) => {
            self.observations.cancel_unacked(ix);
            ConnStatus::RegistrationSession { conn }
          },
          | _ => ConnStatus::RegistrationSession { conn },
        };
      },
      | ConnStatus::QueueMode { conn, wake_at } => {
        self.status = match (outcome, kind) {
          | (Outcome::TimedOut | Outcome::Reset, ExchangeKind::Update) => reregister(&conn),
          | (Outcome::TimedOut | Outcome::Reset, ExchangeKind::Notify(ix)) => {
            self.observations.cancel_unacked(ix);
            ConnStatus::QueueMode { conn, wake_at }
          },
          | _ => ConnStatus::QueueMode { conn, wake_at },
        };
      },
      | other => self.status = other,
    }
  }

  fn drive_lifecycle(&mut self,
                     now: Instant<P::Clock>,
                     cfg: &Config,
                     effects: &mut ArrayVec<[Effect; 6]>) {
    if let Some(location) = self.pending_deregister.take() {
      let id = self.fresh_id();
      let token = self.fresh_token();
      let msg = registration::deregister_request(location.as_str(), id, token);
      if let Ok(eff) = self.exchange.begin(msg, now, cfg) {
        self.pending_kind = ExchangeKind::Deregister;
        effects.push(eff);
      }
      return;
    }

    if core::mem::take(&mut self.pending_close) {
      effects.push(Effect::Close);
    }
    if core::mem::take(&mut self.pending_connect) {
      effects.push(Effect::Connect);
    }

    if let Some(path) = self.pending_read.take() {
      let id = self.fresh_id();
      let token = self.fresh_token();
      let mut msg = Message::new(Type::Con, Code::GET, id, token);
      msg.set_path(path.as_str().trim_start_matches('/')).ok();
      let budget = read_block_budget(cfg);
      let szx = blockwise::largest_szx_within(budget);
      if let Ok(eff) = self.exchange.begin_block2_get(msg, szx, now, cfg) {
        self.pending_kind = ExchangeKind::Read;
        effects.push(eff);
      }
      return;
    }

    match &self.status {
      | ConnStatus::Initial => {},
      | ConnStatus::Bootstrap { .. } => {
        let id = self.fresh_id();
        let token = self.fresh_token();
        let msg = registration::bootstrap_request(cfg, id, token);
        if let Ok(eff) = self.exchange.begin(msg, now, cfg) {
          effects.push(eff);
        }
      },
      | ConnStatus::Registration { conn, .. } => {
        let lifetime_secs = conn.lifetime_secs;
        let lf = registration::render_link_format::<512>(&self.links);
        let id = self.fresh_id();
        let token = self.fresh_token();
        let msg = registration::register_request(cfg, lifetime_secs, "1.1", "U", &lf, id, token);
        if let Ok(eff) = self.exchange.begin(msg, now, cfg) {
            effects.push(eff);
        }
      },
      | ConnStatus::RegistrationSession { conn } => {
        let mut conn = conn.clone();
        let before = effects.len();
        if let Some(new_due) = self.drive_session(conn.clone(), now, cfg, effects) {
          conn.update_due_millis = new_due;
        }
        let did_work = effects.len() > before;
        let now_ms = millis_since_epoch(now);
        if did_work || conn.idle_since_millis.is_none() {
          conn.idle_since_millis = Some(now_ms);
        }

        // §4.8 "Registration-Session, queue-timeout (queue mode
        // enabled) -> Queue-Mode, close connection": once the session
        // has had nothing to do for `queue_mode_timeout`, drop the
        // connection and wait for new work to wake it back up. A
        // timeout of 0 transitions the instant an exchange goes
        // quiescent (§8).
        let idle_for = now_ms.saturating_sub(conn.idle_since_millis.unwrap_or(now_ms));
        let queue_timeout_elapsed = match cfg.queue_mode_timeout {
          | Timeout::Millis(ms) => idle_for >= ms,
          | Timeout::Never => false,
        };

        if cfg.queue_mode_enabled && !did_work && queue_timeout_elapsed {
          self.status = ConnStatus::QueueMode { conn, wake_at: cfg.queue_mode_timeout };
          effects.push(Effect::Close);
        } else {
          self.status = ConnStatus::RegistrationSession { conn };
        }
      },
      | ConnStatus::QueueMode { conn, .. } => {
        // §4.8 "Queue-Mode, outgoing notification/Send/Update due ->
        // Registration-Session, re-open connection": peek at what
        // would be due without marking anything `delivering` (§4.7
        // `Engine::has_due`), since the connection is still closed and
        // nothing can actually be sent yet this tick.
        let has_work = !self.send_queue.is_empty()
                       || self.observations.has_due(now)
                       || matches!(conn.update_due_millis,
                                   Some(ms) if millis_since_epoch(now) >= ms);

        if has_work {
          let mut conn = conn.clone();
          conn.idle_since_millis = None;
          self.status = ConnStatus::RegistrationSession { conn };
          effects.push(Effect::Connect);
        }
      },
      | ConnStatus::SuspendMode { resume_at_millis, .. } => {
        // §4.8 "Suspend-Mode, /1/x/5 disable-timeout elapsed ->
        // Initial": the host re-drives registration explicitly rather
        // than this engine silently resuming the old session.
        if millis_since_epoch(now) >= *resume_at_millis {
          self.status = ConnStatus::Initial;
        }
      },
      | ConnStatus::Failure => {},
    }
  }

  /// Drive one Registered session's steady-state work: deliver due
  /// Observe notifications, drain the Send queue, and send an Update
  /// when its deadline has passed. Returns `Some(new_due_millis)` when
  /// an Update was actually sent, for the caller to write back into
  /// whichever [`ConnStatus`] variant it read `conn` from (this method
  /// takes `conn` by value to sidestep borrowing `self.status` and
  /// `self` mutably at once).
  fn drive_session(&mut self,
                   conn: ServerConnStubFull,
                   now: Instant<P::Clock>,
                   cfg: &Config,
                   effects: &mut ArrayVec<[Effect; 6]>)
                   -> Option<Option<u64>> {
    for due in self.observations.due(now).collect::<ArrayVec<[observe::Due; 8]>>() {
      let mut value = None;
      dm::read::<OBJECTS>(&mut self.registry, core::slice::from_ref(&due.path), &mut |_, v| {
        value = Some(v);
        Ok(())
      }).ok();

      let Some(value) = value else {
        self.observations.mark_not_delivering(due.ix);
        continue;
      };

      let id = self.fresh_id();
      let ty = match due.delivery {
        | observe::Delivery::Confirmable => Type::Con,
        | observe::Delivery::NonConfirmable => Type::Non,
      };
      let mut msg = Message::new(ty, Code::new(2, 5), id, Token(due.token));
      msg.set_content_format(due.content_format).ok();
      set_observe_seq(&mut msg, due.seq);

      let mut out_bytes = [0u8; 512];
      let entry = crate::io::Entry { path: due.path, value: value.clone() };
      if let Ok(n) = crate::io::encode(due.content_format, core::slice::from_ref(&entry), &mut out_bytes) {
        msg.set_payload(toad_msg::Payload(out_bytes[..n].iter().copied().collect())).ok();
      }

      if let Ok(eff) = self.exchange.begin(msg, now, cfg) {
        effects.push(eff);
        self.observations.mark_sent(due.ix, value, now);
        if due.delivery == observe::Delivery::Confirmable {
          self.pending_kind = ExchangeKind::Notify(due.ix);
        }
        break;
      }
    }

    if self.exchange.is_idle() && !self.send_queue.is_empty() {
      if let Some(queued) = self.send_queue.next() {
        let id = self.fresh_id();
        let token = self.fresh_token();
        let mut msg = Message::new(Type::Con, Code::POST, id, token);
        msg.set_path("dp").ok();
        msg.set_content_format(crate::ContentFormat::SenmlCbor).ok();
        msg.set_payload(toad_msg::Payload(queued.payload.clone().into_iter().collect())).ok();
        match self.exchange.begin(msg, now, cfg) {
          | Ok(eff) => effects.push(eff),
          | Err(_) => self.send_queue.requeue_front(queued),
        }
      }
    }

    if matches!(conn.update_due_millis, Some(ms) if millis_since_epoch(now) >= ms) {
      let id = self.fresh_id();
      let token = self.fresh_token();
      let msg =
        registration::update_request::<1>(conn.location.as_str(), None, None, None, id, token);
      if let Ok(eff) = self.exchange.begin(msg, now, cfg) {
        effects.push(eff);
        self.pending_kind = ExchangeKind::Update;
        let next_due = match registration::next_update_timeout(conn.lifetime_secs, cfg) {
          | Timeout::Millis(ms) => Some(millis_since_epoch(now) + ms),
          | Timeout::Never => None,
        };
        return Some(next_due);
      }
    }

    None
  }
}

fn millis_since_epoch<C: Clock>(now: Instant<C>) -> u64 {
  embedded_time::duration::Milliseconds::<u64>::try_from(now.duration_since_epoch()).map(|m| m.0)
                                                                                     .unwrap_or(0)
}

fn outcome_is_success(resp: &Message) -> bool {
  crate::todo::code_to_human(resp.code).as_str().starts_with('2')
}

/// Close a session and re-enter `Registration` from scratch (§4.8 "close
/// & re-register"), carrying the Server Instance's SSID/lifetime/retry
/// policy forward so the fresh attempt sequence can pick up where the
/// last one left off.
fn reregister(conn: &ServerConnStubFull) -> ConnStatus {
  ConnStatus::Registration { conn: ServerConnStub { ssid: conn.ssid,
                                                    lifetime_secs: conn.lifetime_secs,
                                                    retry_policy: conn.retry_policy },
                            retry: Attempts(0) }
}

/// Decode `payload` against `req`'s negotiated Content-Format into
/// `(path, value)` entries resolved to absolute paths, then hand them to
/// `body` -- shared by the incoming Write and Create handlers (§4.5).
/// `payload` is taken separately from `req.payload` so a request whose
/// body was reassembled from a Block1 sequence can be decoded the same
/// way as one that arrived whole (§4.3).
///
/// TLV entries carry only the portion of the path below `base` (a bare
/// `rid`/`riid`), so those are joined onto `base`; SenML CBOR and LwM2M
/// CBOR entries already carry their full absolute path (see their
/// module docs), and plaintext/opaque entries carry [`dm::UriPath::ROOT`]
/// meaning "this one value is at `base` itself" -- both cases pass
/// through unjoined once `UriPath::join` sees an empty relative part.
fn decode_entries(req: &Message,
                  payload: &[u8],
                  base: &dm::UriPath,
                  body: impl FnOnce(&[(dm::UriPath, dm::Value)]) -> dm::HandlerResult)
                  -> dm::HandlerResult {
  let format = req.content_format().ok_or(Code::new(4, 0))?;

  let mut entries: ArrayVec<[(dm::UriPath, dm::Value); 32]> = ArrayVec::new();
  let mut overflow = false;
  crate::io::decode(format, payload, &mut |entry| {
    let abs = match format {
      | crate::ContentFormat::Tlv => base.join(&entry.path),
      | _ if entry.path.depth() == 0 => Some(*base),
      | _ => Some(entry.path),
    };
    let Some(abs) = abs else { return Err(crate::io::CodecError::Malformed) };
    if entries.is_full() {
      overflow = true;
      return Err(crate::io::CodecError::BufferFull);
    }
    entries.push((abs, entry.value));
    Ok(())
  }).map_err(|_| if overflow { Code::new(5, 0) } else { Code::new(4, 0) })?;

  body(&entries)
}

fn response(req: &Message, code: Code) -> Message {
  Message { ty: if req.ty == Type::Con { Type::Ack } else { Type::Non },
           id: req.id,
           code,
           ver: Default::default(),
           opts: Default::default(),
           payload: toad_msg::Payload(Default::default()),
           token: req.token }
}

/// Set the Observe option (6) to a raw sequence number rather than the
/// Register/Deregister action byte `MessageOptions::set_observe` models
/// -- RFC 7641 encodes the counter in up to 3 bytes, trimmed of leading
/// zeroes (`0` itself encodes as a zero-length option value).
fn set_observe_seq(msg: &mut Message, seq: u32) {
  let be = seq.to_be_bytes();
  let start = be.iter().position(|&b| b != 0).unwrap_or(be.len());
  let bytes: Vec<u8> = be[start..].to_vec();
  msg.set(OptNumber(6), OptValue(bytes)).ok();
}

fn link_format_response(req: &Message, body: &str) -> Message {
  let mut msg = response(req, Code::new(2, 5));
  msg.set_content_format(crate::ContentFormat::LinkFormat).ok();
  msg.set_payload(toad_msg::Payload(body.as_bytes().iter().copied().collect())).ok();
  msg
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::dm::{ObjectHandler, HandlerResult};
  use crate::net::test::MockSocket;
  use crate::time::test::FakeClock;

  struct NoopHandler;
  impl ObjectHandler for NoopHandler {
    fn oid(&self) -> u16 {
      3
    }

    fn read(&mut self, _path: &dm::UriPath, out: &mut dyn FnMut(dm::Value) -> HandlerResult)
            -> HandlerResult {
      out(dm::Value::Integer(1))
    }

    fn write(&mut self, _path: &dm::UriPath, _value: dm::Value) -> HandlerResult {
      Ok(())
    }
  }

  struct TestPlatform {
    clock: FakeClock,
    socket: MockSocket,
    config: Config,
    server_addr: no_std_net::SocketAddr,
  }

  impl Platform for TestPlatform {
    type Clock = FakeClock;
    type Socket = MockSocket;
    type Error = crate::platform::Error<core::convert::Infallible, ()>;

    fn clock(&self) -> &Self::Clock {
      &self.clock
    }

    fn socket(&mut self) -> &mut Self::Socket {
      &mut self.socket
    }

    fn server_addr(&self) -> no_std_net::SocketAddr {
      self.server_addr
    }

    fn config(&self) -> &Config {
      &self.config
    }

    fn log(&self, _level: log::Level, _msg: &str) {}
  }

  fn test_server_addr() -> no_std_net::SocketAddr {
    no_std_net::SocketAddr::V4(no_std_net::SocketAddrV4::new(no_std_net::Ipv4Addr::new(127, 0, 0, 1),
                                                             5683))
  }

  #[test]
  fn new_client_starts_in_initial_state() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let client: Client<'_, TestPlatform, 2> = Client::new(reg);
    assert!(matches!(client.status, ConnStatus::Initial));
  }

  #[test]
  fn request_bootstrap_clears_observations_and_transitions() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.request_bootstrap();
    assert!(matches!(client.status, ConnStatus::Bootstrap { .. }));
  }

  #[test]
  fn begin_registration_skips_bootstrap() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.begin_registration(1, 86_400);
    assert!(matches!(client.status,
                     ConnStatus::Registration { conn: ServerConnStub { ssid: 1, lifetime_secs: 86_400, .. },
                                                .. }));
  }

  #[test]
  fn disable_server_owes_a_deregister() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.status = ConnStatus::RegistrationSession { conn: ServerConnStubFull { ssid: 1,
                                                                                 lifetime_secs: 86_400,
                                                                                 binding: Writable::default(),
                                                                                 location: Writable::default(),
                                                                                 update_due_millis: None,
                                                                                 retry_policy: registration::RetryPolicy::default(),
                                                                                 idle_since_millis: None } };
    let now = embedded_time::Clock::try_now(&FakeClock(0)).unwrap();
    client.disable_server(60_000, now);
    assert!(client.pending_deregister.is_some());
    assert!(matches!(client.status, ConnStatus::SuspendMode { .. }));
  }

  #[test]
  fn step_sends_bootstrap_request_once_idle() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.request_bootstrap();

    let mut platform = TestPlatform { clock: FakeClock(0),
                                      socket: MockSocket::new(),
                                      config: Config::new("ep"),
                                      server_addr: test_server_addr() };
    client.step(&mut platform).unwrap();
    assert_eq!(platform.socket.outbox.len(), 1);
  }

  fn full_conn(retry_policy: registration::RetryPolicy) -> ServerConnStubFull {
    ServerConnStubFull { ssid: 1,
                         lifetime_secs: 86_400,
                         binding: Writable::default(),
                         location: Writable::default(),
                         update_due_millis: None,
                         retry_policy,
                         idle_since_millis: None }
  }

  #[test]
  fn registration_session_timed_out_update_reregisters() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.status = ConnStatus::RegistrationSession { conn: full_conn(registration::RetryPolicy::default()) };
    client.pending_kind = ExchangeKind::Update;

    let cfg = Config::new("ep");
    let now = embedded_time::Clock::try_now(&FakeClock(0)).unwrap();
    let mut effects: ArrayVec<[Effect; 6]> = ArrayVec::new();
    client.on_exchange_outcome(Outcome::TimedOut, now, &cfg, &mut effects);

    assert!(matches!(client.status, ConnStatus::Registration { .. }));
  }

  #[test]
  fn registration_session_timed_out_confirmable_notify_cancels_observation() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.observations
          .register(1, dm::UriPath::parse("/3/0/1").unwrap(), crate::ContentFormat::SenmlCbor,
                    ArrayVec::new(), observe::Attributes::default())
          .unwrap();
    client.status = ConnStatus::RegistrationSession { conn: full_conn(registration::RetryPolicy::default()) };
    client.pending_kind = ExchangeKind::Notify(0);

    let cfg = Config::new("ep");
    let now = embedded_time::Clock::try_now(&FakeClock(0)).unwrap();
    let mut effects: ArrayVec<[Effect; 6]> = ArrayVec::new();
    client.on_exchange_outcome(Outcome::Reset, now, &cfg, &mut effects);

    assert!(matches!(client.status, ConnStatus::RegistrationSession { .. }));
    assert_eq!(client.observations.len(), 0);
  }

  #[test]
  fn registration_retries_exhausted_falls_back_to_bootstrap_when_flagged() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    let retry_policy = registration::RetryPolicy { seq_retry_count: 0, bootstrap_on_failure: true,
                                                   ..registration::RetryPolicy::default() };
    client.status =
      ConnStatus::Registration { conn: ServerConnStub { ssid: 1, lifetime_secs: 86_400, retry_policy },
                                 retry: Attempts(0) };

    let cfg = Config::new("ep");
    let now = embedded_time::Clock::try_now(&FakeClock(0)).unwrap();
    let mut effects: ArrayVec<[Effect; 6]> = ArrayVec::new();
    client.on_exchange_outcome(Outcome::TimedOut, now, &cfg, &mut effects);

    assert!(matches!(client.status, ConnStatus::Bootstrap { .. }));
  }

  #[test]
  fn registration_retries_exhausted_fails_without_flag() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    let retry_policy = registration::RetryPolicy { seq_retry_count: 0, ..registration::RetryPolicy::default() };
    client.status =
      ConnStatus::Registration { conn: ServerConnStub { ssid: 1, lifetime_secs: 86_400, retry_policy },
                                 retry: Attempts(0) };

    let cfg = Config::new("ep");
    let now = embedded_time::Clock::try_now(&FakeClock(0)).unwrap();
    let mut effects: ArrayVec<[Effect; 6]> = ArrayVec::new();
    client.on_exchange_outcome(Outcome::TimedOut, now, &cfg, &mut effects);

    assert!(matches!(client.status, ConnStatus::Failure));
  }

  #[test]
  fn begin_read_sends_block2_get_and_surfaces_result() {
    let mut h = NoopHandler;
    let mut reg: Registry<2> = Registry::default();
    reg.add(&mut h).unwrap();
    let mut client: Client<'_, TestPlatform, 2> = Client::new(reg);
    client.begin_read("1/0/2");

    let mut platform = TestPlatform { clock: FakeClock(0),
                                      socket: MockSocket::new(),
                                      config: Config::new("ep"),
                                      server_addr: test_server_addr() };
    client.step(&mut platform).unwrap();
    assert_eq!(platform.socket.outbox.len(), 1);
    assert!(matches!(client.pending_kind, ExchangeKind::Read));
    assert!(client.take_read_result().is_none());
  }
}
