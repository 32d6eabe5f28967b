//! Observation Engine (§4.7): tracks which (path, Short-Server-ID) pairs
//! a Server has asked to Observe, the attributes governing when a
//! change is worth a Notify, and the queue of notifications due to be
//! sent.
//!
//! There is no teacher analogue for attribute-based change detection --
//! `toad`'s own `step::observe` only recognizes the CoAP `Observe`
//! option on the wire and re-delivers whatever the inner `Step` already
//! produced (see `DESIGN.md`). This module is new functionality grounded
//! on the *pattern* the teacher uses everywhere else for fixed-capacity,
//! externally-owned state (`tinyvec::ArrayVec` collections, no
//! allocation), applied to the attribute/notification bookkeeping §4.7
//! actually requires.

use embedded_time::Instant;
use tinyvec::ArrayVec;

use crate::dm::path::UriPath;
use crate::dm::value::Value;
use crate::time::{Clock, Millis, Stamped};

/// How many distinct observations the engine tracks at once. One LwM2M
/// Server rarely observes more than a handful of resources; generous
/// enough for composite-path observations on top of per-resource ones.
pub const CAPACITY: usize = 16;

/// Per-(path, SSID) notification attributes (§3 "Attribute set"). Every
/// field absent means "inherit from a broader path or server default" --
/// resolution of that inheritance is the caller's job (the Registration
/// driver / DM owns the attribute hierarchy); this struct only stores
/// the already-resolved, effective set for one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attributes {
  /// Minimum milliseconds between notifications.
  pub pmin: Option<u64>,
  /// Maximum milliseconds before a notification is forced.
  pub pmax: Option<u64>,
  /// Notify when the value crosses this threshold downward.
  pub lt: Option<f64>,
  /// Notify when the value crosses this threshold upward.
  pub gt: Option<f64>,
  /// Notify when the value has moved at least this much since the last
  /// sent notification ("step").
  pub st: Option<f64>,
  /// LwM2M 1.2: minimum evaluation period.
  #[cfg(feature = "lwm2m_1_2")]
  pub epmin: Option<u64>,
  /// LwM2M 1.2: maximum evaluation period.
  #[cfg(feature = "lwm2m_1_2")]
  pub epmax: Option<u64>,
  /// LwM2M 1.2: edge- rather than threshold-triggered evaluation.
  #[cfg(feature = "lwm2m_1_2")]
  pub edge: bool,
  /// Deliver notifications as Confirmable.
  pub con: bool,
  /// LwM2M 1.2: bound on queued historical samples (not separately
  /// modeled here -- the engine keeps only the most recent pending
  /// value per observation, so `hqmax` above 1 has no observable effect
  /// until a historical-queue data point is added; see Open Questions).
  pub hqmax: Option<u32>,
}

/// One observation the engine is maintaining on behalf of a Server.
#[derive(Debug, Clone)]
struct Observation<C: Clock> {
  ssid: u16,
  path: UriPath,
  content_format: crate::ContentFormat,
  token: tinyvec::ArrayVec<[u8; 8]>,
  attrs: Attributes,
  seq: u32,
  last_sent_value: Option<Value>,
  last_sent_at: Option<Stamped<C, ()>>,
  pending: bool,
  /// Confirmable delivery currently in flight; suppresses re-triggering
  /// while we wait on the Exchange Engine to settle it.
  delivering: bool,
}

/// An observation the caller already had and is re-registering after a
/// reconnect, so delivery can resume without losing the sequence
/// counter or attribute state (§4.7 "survives connection loss").
#[derive(Debug, Clone)]
pub struct Resume {
  /// See [`Observation::path`].
  pub path: UriPath,
  /// Short Server ID that owns this observation.
  pub ssid: u16,
  /// Negotiated content format.
  pub content_format: crate::ContentFormat,
  /// CoAP token from the original `GET ... Observe=0`.
  pub token: tinyvec::ArrayVec<[u8; 8]>,
  /// Effective attribute set.
  pub attrs: Attributes,
  /// Observe sequence counter to resume from (next Notify uses `seq + 1`).
  pub seq: u32,
}

/// A notification the caller should deliver right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  /// Send as a Confirmable message through the Exchange Engine.
  Confirmable,
  /// Fire-and-forget.
  NonConfirmable,
}

/// Why a pending change did *not* qualify for a Notify this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
  /// `pmin` hasn't elapsed since the last sent notification yet.
  WithinPmin,
}

/// The Observation Engine: one per client, holds every Server's active
/// observations.
#[derive(Debug)]
pub struct Engine<C: Clock> {
  observations: ArrayVec<[Observation<C>; CAPACITY]>,
}

impl<C: Clock> Default for Engine<C> {
  fn default() -> Self {
    Self { observations: ArrayVec::new() }
  }
}

/// [`Engine::register`] found the engine already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

impl<C: Clock> Engine<C> {
  /// Record a new observation (§4.7 step 1, `GET` with `Observe=0`).
  /// Returns the initial Observe sequence number to send back (always
  /// `0` for a brand-new registration).
  pub fn register(&mut self,
                  ssid: u16,
                  path: UriPath,
                  content_format: crate::ContentFormat,
                  token: ArrayVec<[u8; 8]>,
                  attrs: Attributes)
                  -> Result<u32, Full> {
    // Re-observing an already-observed path/token replaces it rather
    // than growing unboundedly (a Server that re-GETs with Observe=0
    // before cancelling is re-subscribing, not creating a duplicate).
    self.observations.retain(|o| !(o.ssid == ssid && o.path == path && o.token == token));

    if self.observations.is_full() {
      return Err(Full);
    }

    self.observations.push(Observation { ssid,
                                         path,
                                         content_format,
                                         token,
                                         attrs,
                                         seq: 0,
                                         last_sent_value: None,
                                         last_sent_at: None,
                                         pending: false,
                                         delivering: false });
    Ok(0)
  }

  /// Resume an observation that survived reconnect (§4.7 "survives
  /// connection loss"), keeping its sequence counter and attributes.
  pub fn resume(&mut self, r: Resume) -> Result<(), Full> {
    if self.observations.is_full() {
      return Err(Full);
    }
    self.observations.push(Observation { ssid: r.ssid,
                                         path: r.path,
                                         content_format: r.content_format,
                                         token: r.token,
                                         attrs: r.attrs,
                                         seq: r.seq,
                                         last_sent_value: None,
                                         last_sent_at: None,
                                         pending: false,
                                         delivering: false });
    Ok(())
  }

  /// Cancel the observation matching `(ssid, path)` (§4.7 step 3, `GET`
  /// with `Observe=1`). No-op if none is registered.
  pub fn cancel(&mut self, ssid: u16, path: &UriPath) {
    self.observations.retain(|o| !(o.ssid == ssid && &o.path == path));
  }

  /// Clear every observation for every server (§4.7 "a new Registration
  /// session clears all observations").
  pub fn clear_all(&mut self) {
    self.observations.clear();
  }

  /// A resource at `path` changed to `value`; evaluate every matching
  /// observation's attribute set and mark it pending if the change
  /// (or the elapsed time) warrants a Notify.
  ///
  /// `st`/`lt`/`gt` are evaluated against the value carried in the
  /// *last sent* notification, not the previous sample (§9 design note
  /// "use absolute difference against the value carried in the last
  /// sent notification").
  pub fn note_change(&mut self, path: &UriPath, value: &Value) {
    for obs in self.observations.iter_mut().filter(|o| path_matches(&o.path, path)) {
      if obs.pending {
        continue;
      }

      let crosses = match (value.as_f64(), obs.last_sent_value.as_ref().and_then(Value::as_f64)) {
        | (Some(v), Some(v0)) => {
          let lt_cross = obs.attrs.lt.map(|lt| v0 >= lt && v < lt).unwrap_or(false);
          let gt_cross = obs.attrs.gt.map(|gt| v0 <= gt && v > gt).unwrap_or(false);
          let st_cross = obs.attrs.st.map(|st| (v - v0).abs() >= st).unwrap_or(false);
          lt_cross || gt_cross || st_cross
        },
        // No prior sample, or a non-numeric value with no threshold
        // attributes configured at all: any change at all qualifies.
        | _ => obs.attrs.lt.is_none() && obs.attrs.gt.is_none() && obs.attrs.st.is_none(),
      };

      if crosses {
        obs.pending = true;
      }
    }
  }

  /// Drive the `pmin`/`pmax` scheduling logic for one `step`, yielding
  /// every observation that is now due for delivery.
  ///
  /// An observation is due when:
  /// - it has a pending change *and* `pmin` has elapsed since the last
  ///   sent notification (or there's no `pmin`), or
  /// - `pmax` has elapsed since the last sent notification with no
  ///   other change having fired one in the meantime.
  pub fn due(&mut self, now: Instant<C>) -> impl Iterator<Item = Due> + '_ {
    self.observations
        .iter_mut()
        .enumerate()
        .filter_map(move |(ix, obs)| {
          if obs.delivering {
            return None;
          }

          let since_last = obs.last_sent_at.map(|s| s.millis_since(now));

          let pmin_elapsed = match (obs.attrs.pmin, since_last) {
            | (Some(pmin), Some(ms)) => ms >= pmin,
            | (Some(_), None) => true,
            | (None, _) => true,
          };

          let pmax_forces = match (obs.attrs.pmax, since_last) {
            | (Some(pmax), Some(ms)) => ms >= pmax,
            | _ => false,
          };

          if (obs.pending && pmin_elapsed) || pmax_forces {
            obs.delivering = true;
            Some(Due { ix,
                       ssid: obs.ssid,
                       path: obs.path,
                       content_format: obs.content_format,
                       token: obs.token,
                       seq: obs.seq + 1,
                       delivery: if obs.attrs.con {
                         Delivery::Confirmable
                       } else {
                         Delivery::NonConfirmable
                       } })
          } else if obs.pending {
            let _ = Gate::WithinPmin;
            None
          } else {
            None
          }
        })
  }

  /// Non-mutating version of the predicate [`Engine::due`] evaluates:
  /// would anything be due right now? Unlike `due`, this never sets
  /// `delivering`, so it's safe to call just to check for pending work
  /// (e.g. Queue-Mode deciding whether to reconnect) without risking
  /// stalling a real delivery until something else resets the flag.
  pub fn has_due(&self, now: Instant<C>) -> bool {
    self.observations.iter().any(|obs| {
      if obs.delivering {
        return false;
      }

      let since_last = obs.last_sent_at.map(|s| s.millis_since(now));

      let pmin_elapsed = match (obs.attrs.pmin, since_last) {
        | (Some(pmin), Some(ms)) => ms >= pmin,
        | (Some(_), None) => true,
        | (None, _) => true,
      };

      let pmax_forces = match (obs.attrs.pmax, since_last) {
        | (Some(pmax), Some(ms)) => ms >= pmax,
        | _ => false,
      };

      (obs.pending && pmin_elapsed) || pmax_forces
    })
  }

  /// Mark a delivery as sent: bumps the sequence counter, records the
  /// value/timestamp used for the next `st`/`pmax` evaluation, and
  /// clears the pending flag.
  pub fn mark_sent(&mut self, ix: usize, value: Value, now: Instant<C>) {
    if let Some(obs) = self.observations.get_mut(ix) {
      obs.seq = obs.seq.wrapping_add(1);
      obs.last_sent_value = Some(value);
      obs.last_sent_at = Some(Stamped((), now));
      obs.pending = false;
      obs.delivering = false;
    }
  }

  /// A Confirmable notification's retry budget was exhausted with no
  /// ACK (§4.7 "on non-response after retries the observation is
  /// cancelled, CoAP best practice").
  pub fn cancel_unacked(&mut self, ix: usize) {
    if ix < self.observations.len() {
      self.observations.remove(ix);
    }
  }

  /// Reset the in-flight flag without cancelling, e.g. after a
  /// Non-confirmable send that doesn't need acknowledgement tracking.
  pub fn mark_not_delivering(&mut self, ix: usize) {
    if let Some(obs) = self.observations.get_mut(ix) {
      obs.delivering = false;
    }
  }

  /// How many observations are currently tracked, across every server.
  pub fn len(&self) -> usize {
    self.observations.len()
  }

  /// Is the engine tracking no observations at all?
  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }
}

/// A notification [`Engine::due`] determined should be sent now.
#[derive(Debug, Clone, Copy)]
pub struct Due {
  /// Index into the engine's internal table, passed back to
  /// [`Engine::mark_sent`]/[`Engine::cancel_unacked`].
  pub ix: usize,
  /// Short Server ID to deliver to.
  pub ssid: u16,
  /// Path being observed.
  pub path: UriPath,
  /// Negotiated content format for the notification body.
  pub content_format: crate::ContentFormat,
  /// Token from the original Observe registration.
  pub token: ArrayVec<[u8; 8]>,
  /// Observe sequence number to stamp this Notify with.
  pub seq: u32,
  /// Confirmable or Non-confirmable delivery.
  pub delivery: Delivery,
}

/// Does an observed `obs_path` cover a change at `changed_path`? A
/// coarser-grained observation (e.g. `/3/0`) covers a change to any
/// resource beneath it (`/3/0/1`).
fn path_matches(obs_path: &UriPath, changed_path: &UriPath) -> bool {
  let (a, b) = (obs_path.render(), changed_path.render());
  let (a, b) = (a.as_str(), b.as_str());
  b == a || b.starts_with(a) && (a == "/" || b[a.len()..].starts_with('/'))
}

#[cfg(test)]
mod test {
  use embedded_time::rate::Fraction;

  use super::*;

  #[derive(Debug)]
  struct FakeClock(core::cell::Cell<u64>);

  impl embedded_time::Clock for FakeClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
      Ok(Instant::new(self.0.get()))
    }
  }

  fn now(clock: &FakeClock) -> Instant<FakeClock> {
    Instant::new(clock.0.get())
  }

  fn path(s: &str) -> UriPath {
    UriPath::parse(s).unwrap()
  }

  #[test]
  fn registers_and_cancels() {
    let mut eng: Engine<FakeClock> = Engine::default();
    let seq = eng.register(1, path("/3442/0/2"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), Attributes::default())
                 .unwrap();
    assert_eq!(seq, 0);
    assert_eq!(eng.len(), 1);

    eng.cancel(1, &path("/3442/0/2"));
    assert_eq!(eng.len(), 0);
  }

  #[test]
  fn step_threshold_does_not_fire_until_crossed() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let mut eng: Engine<FakeClock> = Engine::default();
    let attrs = Attributes { pmin: Some(1_000),
                             pmax: Some(60_000),
                             st: Some(0.5),
                             ..Default::default() };
    eng.register(1, path("/3442/0/2"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), attrs)
       .unwrap();
    eng.mark_sent(0, Value::Double(20.0), now(&clock));

    // S2 step 1: small change, below `st` -- no notification.
    eng.note_change(&path("/3442/0/2"), &Value::Double(20.4));
    clock.0.set(2_000);
    assert_eq!(eng.due(now(&clock)).count(), 0);

    // S2 step 2: crosses the 0.5 step threshold -- notification due
    // once pmin has elapsed.
    eng.note_change(&path("/3442/0/2"), &Value::Double(20.6));
    let due: Vec<_> = eng.due(now(&clock)).collect();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].seq, 1);
  }

  #[test]
  fn pmax_forces_notification_with_no_change() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let mut eng: Engine<FakeClock> = Engine::default();
    let attrs = Attributes { pmax: Some(60_000), ..Default::default() };
    eng.register(1, path("/3/0/1"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), attrs)
       .unwrap();
    eng.mark_sent(0, Value::Integer(1), now(&clock));

    clock.0.set(30_000);
    assert_eq!(eng.due(now(&clock)).count(), 0);

    clock.0.set(60_001);
    assert_eq!(eng.due(now(&clock)).count(), 1);
  }

  #[test]
  fn has_due_does_not_mark_delivering() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let mut eng: Engine<FakeClock> = Engine::default();
    let attrs = Attributes { pmax: Some(60_000), ..Default::default() };
    eng.register(1, path("/3/0/1"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), attrs)
       .unwrap();
    eng.mark_sent(0, Value::Integer(1), now(&clock));

    clock.0.set(60_001);
    assert!(eng.has_due(now(&clock)));
    assert!(eng.has_due(now(&clock)), "checking twice must not consume the due notification");
    assert_eq!(eng.due(now(&clock)).count(), 1, "has_due must not have set delivering");
  }

  #[test]
  fn observation_is_dropped_after_unacked_confirmable_retries() {
    let mut eng: Engine<FakeClock> = Engine::default();
    eng.register(1, path("/3/0/1"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), Attributes::default())
       .unwrap();
    eng.cancel_unacked(0);
    assert_eq!(eng.len(), 0);
  }

  #[test]
  fn clear_all_drops_every_observation() {
    let mut eng: Engine<FakeClock> = Engine::default();
    eng.register(1, path("/3/0/1"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), Attributes::default())
       .unwrap();
    eng.register(2, path("/3/0/2"), crate::ContentFormat::SenmlCbor, ArrayVec::new(), Attributes::default())
       .unwrap();
    eng.clear_all();
    assert!(eng.is_empty());
  }
}
