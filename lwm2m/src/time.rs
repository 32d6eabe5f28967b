//! Monotonic & real clock abstractions.
//!
//! The engine never reads the wall clock for anything that affects
//! timeouts or scheduling (see Design Notes §9, "Clock drift & leap
//! smoothing" in `SPEC_FULL.md`). [`Clock`] is the monotonic source
//! consulted for every deadline in this crate; [`RealClock`] is only
//! consulted when a resource value is genuinely a Unix timestamp (the
//! `time` data type in §3).

use embedded_time::clock::Error;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64 microseconds.
///
/// Implementors MUST be monotonic and MUST NOT go backwards,
/// including across host suspend/resume.
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Real (wall-clock, Unix epoch) time source.
///
/// Never used for scheduling decisions -- only for rendering the
/// `time` data type (§3). May jump forward or backward (NTP sync);
/// the engine places no timing guarantee on it.
pub trait RealClock {
  /// Current Unix time, in whole seconds.
  fn now_unix_seconds(&self) -> i64;
}

/// Timeout configuration allowing for "never time out" as an option.
///
/// Used by the Update scheduler: a lifetime of 0 maps to `Never`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

/// Data associated with a timestamp taken from a [`Clock`].
pub struct Stamped<C: Clock, T>(pub T, pub Instant<C>);

impl<C: Clock, T: core::fmt::Debug> core::fmt::Debug for Stamped<C, T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_tuple("Stamped")
     .field(&self.0)
     .field(&self.1.duration_since_epoch())
     .finish()
  }
}

impl<C: Clock, T: PartialEq> PartialEq for Stamped<C, T> {
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0 && self.1 == other.1
  }
}

impl<C: Clock, T: Eq> Eq for Stamped<C, T> {}

impl<C: Clock, T: Clone> Clone for Stamped<C, T> {
  fn clone(&self) -> Self {
    Self(self.0.clone(), self.1)
  }
}

impl<C: Clock, T: Copy> Copy for Stamped<C, T> {}

impl<C: Clock, T: Default> Default for Stamped<C, T> {
  fn default() -> Self {
    Self(T::default(), Instant::new(0))
  }
}

impl<C: Clock, T> Stamped<C, T> {
  /// Stamp `t` with the clock's current time.
  pub fn new(clock: &C, t: T) -> Result<Self, Error> {
    clock.try_now().map(|now| Self(t, now))
  }

  /// Borrow the data.
  pub fn data(&self) -> &T {
    &self.0
  }

  /// The time at which `t` was stamped.
  pub fn time(&self) -> Instant<C> {
    self.1
  }

  /// Discard the timestamp.
  pub fn into_inner(self) -> T {
    self.0
  }

  /// Transform the stamped value, preserving the timestamp.
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Stamped<C, R> {
    Stamped(f(self.0), self.1)
  }

  /// How long ago, in milliseconds, was this value stamped relative to `now`?
  ///
  /// Saturates to 0 rather than underflowing if `now` somehow precedes
  /// the stamp (should never happen on a monotonic clock, but we don't
  /// trust implementors blindly).
  pub fn millis_since(&self, now: Instant<C>) -> u64 {
    now.checked_duration_since(&self.1)
       .and_then(|dur| Millis::try_from(dur).ok())
       .map(|Millis(ms)| ms)
       .unwrap_or(0)
  }
}

#[cfg(test)]
mod test {
  use embedded_time::rate::Fraction;

  use super::*;

  pub struct FakeClock(pub u64);

  impl embedded_time::Clock for FakeClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, Error> {
      Ok(Instant::new(self.0))
    }
  }

  #[test]
  fn millis_since_saturates_at_zero() {
    let clock = FakeClock(0);
    let stamp = Stamped::new(&clock, 1u8).unwrap();
    assert_eq!(stamp.millis_since(Instant::new(0)), 0);
  }
}
