//! Response Cache (§4.2): detects a retransmitted Confirmable request
//! (the peer didn't see our ACK/response in time and resent it with the
//! same Message-ID) so it can be answered again without re-running
//! application logic.
//!
//! Grounded on the teacher's `step::buffer_responses`, but keyed the way
//! §4.2 specifies -- by Message-ID alone, not `(addr, token, type)` --
//! since a connected, single-peer socket makes the address/type part of
//! that key redundant here. Only the most recently cached entry keeps
//! its full response bytes; older entries keep just the Message-ID, so
//! a very old retransmission is recognized as "already answered" without
//! paying to retain every response body (§4.2 "memory bound").
//!
//! Entries expire after `EXCHANGE_LIFETIME` ([`Config::exchange_lifetime_millis`]),
//! per RFC 7252 §4.5's de-duplication window.

use embedded_time::Instant;
use tinyvec::ArrayVec;
use toad_msg::{Id, TryFromBytes, TryIntoBytes};

use crate::config::Config;
use crate::error::ProtocolError;
use crate::platform::Message;
use crate::time::Clock;

/// How many distinct Message-IDs the cache remembers at once. Sized
/// generously above `max_concurrent_requests` so a slow retransmission
/// doesn't evict the entry it needs to dedupe against.
const CAPACITY: usize = 8;

/// Upper bound on a single cached response's serialized size. Matches
/// the largest single-exchange body a peer would realistically resend
/// (the Block2 SZX negotiation keeps this well below the IP MTU).
const MAX_CACHED_BYTES: usize = 1152;

struct Entry<C: Clock> {
  id: Id,
  bytes: Option<ArrayVec<[u8; MAX_CACHED_BYTES]>>,
  expires_at: Instant<C>,
}

/// What a [`ResponseCache::lookup`] found for a given Message-ID.
#[derive(Debug)]
pub enum Hit {
  /// This Message-ID was already answered; resend this message verbatim
  /// rather than reprocessing the request.
  Replay(Message),
  /// This Message-ID was already answered, but it aged out of the
  /// single full-body slot -- don't reprocess, but there's nothing left
  /// to resend (the peer's own retry budget will eventually give up).
  SeenNoBody,
}

/// Deduplicates retransmitted Confirmable requests by Message-ID.
pub struct ResponseCache<C: Clock> {
  entries: ArrayVec<[Entry<C>; CAPACITY]>,
}

impl<C: Clock> Default for ResponseCache<C> {
  fn default() -> Self {
    Self { entries: ArrayVec::new() }
  }
}

impl<C: Clock> ResponseCache<C> {
  /// Drop entries whose `EXCHANGE_LIFETIME` window has elapsed.
  pub fn prune(&mut self, now: Instant<C>) {
    let mut i = 0;
    while i < self.entries.len() {
      if self.entries[i].expires_at <= now {
        self.entries.remove(i);
      } else {
        i += 1;
      }
    }
  }

  /// Record that `id` was answered with `response`. Demotes whatever
  /// entry previously held the full-body slot to ID-only, evicting the
  /// single oldest entry first if the cache is at capacity.
  pub fn insert(&mut self,
                id: Id,
                response: &Message,
                now: Instant<C>,
                cfg: &Config)
                -> Result<(), ProtocolError> {
    self.prune(now);

    for e in self.entries.iter_mut() {
      e.bytes = None;
    }

    if self.entries.is_full() {
      self.entries.remove(0);
    }

    let bytes = response.clone()
                        .try_into_bytes::<ArrayVec<[u8; MAX_CACHED_BYTES]>>()
                        .map_err(ProtocolError::ToBytes)?;

    let expires_at = now + embedded_time::duration::Milliseconds(cfg.exchange_lifetime_millis());
    self.entries.push(Entry { id, bytes: Some(bytes), expires_at });
    Ok(())
  }

  /// Has `id` already been answered?
  pub fn lookup(&self, id: Id) -> Option<Hit> {
    self.entries.iter().find(|e| e.id == id).map(|e| match &e.bytes {
                          | Some(bytes) => {
                            Message::try_from_bytes(*bytes).map(Hit::Replay)
                                                           .unwrap_or(Hit::SeenNoBody)
                          },
                          | None => Hit::SeenNoBody,
                        })
  }
}

#[cfg(test)]
mod test {
  use embedded_time::rate::Fraction;
  use toad_msg::{Code, Token, Type};

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

  #[test]
  fn replays_most_recently_cached_response() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let cfg = Config::new("ep");
    let mut cache: ResponseCache<FakeClock> = ResponseCache::default();

    let resp = Message::new(Type::Ack, Code::new(2, 05), Id(7), Token(Default::default()));
    cache.insert(Id(7), &resp, now(&clock), &cfg).unwrap();

    assert!(matches!(cache.lookup(Id(7)), Some(Hit::Replay(_))));
    assert!(cache.lookup(Id(8)).is_none());
  }

  #[test]
  fn only_the_newest_entry_keeps_its_body() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let cfg = Config::new("ep");
    let mut cache: ResponseCache<FakeClock> = ResponseCache::default();

    let resp_a = Message::new(Type::Ack, Code::new(2, 05), Id(1), Token(Default::default()));
    let resp_b = Message::new(Type::Ack, Code::new(2, 05), Id(2), Token(Default::default()));
    cache.insert(Id(1), &resp_a, now(&clock), &cfg).unwrap();
    cache.insert(Id(2), &resp_b, now(&clock), &cfg).unwrap();

    assert!(matches!(cache.lookup(Id(1)), Some(Hit::SeenNoBody)));
    assert!(matches!(cache.lookup(Id(2)), Some(Hit::Replay(_))));
  }

  #[test]
  fn entries_expire_after_exchange_lifetime() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let cfg = Config::new("ep");
    let mut cache: ResponseCache<FakeClock> = ResponseCache::default();

    let resp = Message::new(Type::Ack, Code::new(2, 05), Id(3), Token(Default::default()));
    cache.insert(Id(3), &resp, now(&clock), &cfg).unwrap();

    clock.0.set(cfg.exchange_lifetime_millis() + 1);
    cache.prune(now(&clock));
    assert!(cache.lookup(Id(3)).is_none());
  }
}
