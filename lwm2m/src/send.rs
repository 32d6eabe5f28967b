//! Send Queue (§4.9): a bounded FIFO of prepared SenML-CBOR payloads
//! awaiting delivery via the LwM2M Send operation (`POST /dp`), muted by
//! the Server Object's Mute Send resource (`/1/x/23`) and cleared
//! whenever the Registration session resets.
//!
//! There's no direct teacher analogue -- `toad` never queues outbound
//! application payloads, it just builds and fires a `Req` synchronously
//! -- so this is grounded on the general fixed-capacity,
//! externally-owned collection idiom the rest of this crate already
//! uses (`tinyvec::ArrayVec`, same as [`crate::cache::ResponseCache`]
//! and [`crate::observe::Engine`]).

use tinyvec::ArrayVec;

use crate::dm::path::UriPath;

/// How many prepared Send payloads can be queued before the oldest is
/// dropped to make room (§4.9 "bounded FIFO").
pub const CAPACITY: usize = 4;

/// A single byte buffer large enough for one Send payload's SenML-CBOR
/// encoding. Matches [`crate::cache::ResponseCache`]'s body allowance,
/// since a Send body rides over the same connection.
pub const MAX_PAYLOAD_BYTES: usize = 1152;

/// One queued Send operation: the already-encoded SenML-CBOR body plus
/// the paths it covers, kept only for diagnostics (the wire payload
/// alone is what actually gets sent).
#[derive(Debug, Clone)]
pub struct QueuedSend {
  /// Paths whose values are carried in `payload`.
  pub paths: ArrayVec<[UriPath; 8]>,
  /// Pre-encoded SenML-CBOR request body.
  pub payload: ArrayVec<[u8; MAX_PAYLOAD_BYTES]>,
}

/// The Send Queue was asked to hold more entries than it has room for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// Bounded FIFO of pending LwM2M Send operations.
#[derive(Debug)]
pub struct Queue {
  entries: ArrayVec<[QueuedSend; CAPACITY]>,
  /// Mirrors the Server Object's Mute Send resource (`/1/x/23`): while
  /// `true`, [`Queue::next`] never yields anything, but [`Queue::push`]
  /// still accumulates -- a server un-muting later should see what
  /// piled up while it wasn't listening, not silence.
  muted: bool,
}

impl Default for Queue {
  fn default() -> Self {
    Self { entries: ArrayVec::new(), muted: false }
  }
}

impl Queue {
  /// Enqueue a prepared Send payload, dropping the oldest entry first
  /// if the queue is already at capacity (§4.9 "bounded FIFO" implies
  /// newest-wins over unboundedly buffering every sample).
  pub fn push(&mut self, send: QueuedSend) {
    if self.entries.is_full() {
      self.entries.remove(0);
    }
    self.entries.push(send);
  }

  /// Set the mute flag from the Server Object's `/1/x/23` resource.
  pub fn set_muted(&mut self, muted: bool) {
    self.muted = muted;
  }

  /// Is delivery currently suppressed?
  pub fn is_muted(&self) -> bool {
    self.muted
  }

  /// Take the oldest queued payload for delivery, if any and unmuted.
  pub fn next(&mut self) -> Option<QueuedSend> {
    if self.muted || self.entries.is_empty() {
      return None;
    }
    Some(self.entries.remove(0))
  }

  /// Put a payload back at the front after a failed delivery attempt,
  /// so the next [`Queue::next`] retries it rather than skipping ahead.
  pub fn requeue_front(&mut self, send: QueuedSend) {
    if self.entries.is_full() {
      self.entries.remove(self.entries.len() - 1);
    }
    self.entries.insert(0, send);
  }

  /// Drop every queued payload (§4.9 "cleared on registration reset").
  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// How many payloads are waiting.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Is the queue empty?
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn send(byte: u8) -> QueuedSend {
    let mut payload = ArrayVec::new();
    payload.push(byte);
    QueuedSend { paths: ArrayVec::new(), payload }
  }

  #[test]
  fn fifo_order() {
    let mut q = Queue::default();
    q.push(send(1));
    q.push(send(2));
    assert_eq!(q.next().unwrap().payload[0], 1);
    assert_eq!(q.next().unwrap().payload[0], 2);
    assert!(q.next().is_none());
  }

  #[test]
  fn muted_queue_accumulates_but_does_not_drain() {
    let mut q = Queue::default();
    q.set_muted(true);
    q.push(send(1));
    assert!(q.next().is_none());
    assert_eq!(q.len(), 1);

    q.set_muted(false);
    assert_eq!(q.next().unwrap().payload[0], 1);
  }

  #[test]
  fn oldest_entry_dropped_when_full() {
    let mut q = Queue::default();
    for i in 0..(CAPACITY as u8 + 1) {
      q.push(send(i));
    }
    assert_eq!(q.len(), CAPACITY);
    assert_eq!(q.next().unwrap().payload[0], 1);
  }

  #[test]
  fn clear_drops_everything() {
    let mut q = Queue::default();
    q.push(send(1));
    q.clear();
    assert!(q.is_empty());
  }

  #[test]
  fn requeue_front_is_delivered_next() {
    let mut q = Queue::default();
    q.push(send(1));
    let taken = q.next().unwrap();
    q.push(send(2));
    q.requeue_front(taken);
    assert_eq!(q.next().unwrap().payload[0], 1);
    assert_eq!(q.next().unwrap().payload[0], 2);
  }
}
