//! Jittered retry/backoff timer shared by every retransmitting exchange
//! (CON requests, CON notifications) and by the Registration/Bootstrap
//! retry counters (§4.3, §4.6).

use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};
use rand::{Rng, SeedableRng};

/// A non-blocking timer that allows a fixed-delay or exponential-backoff
/// retry, that lives alongside some operation to retry.
///
/// It does not _contain_ the work to be done (the engine has no
/// allocator to box a continuation in) -- the caller re-attempts the
/// operation and tells the timer whether it failed again.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use lwm2m::retry::{Attempts, RetryTimer, Strategy, YouShould};
/// # use embedded_time::{Clock as _, rate::Fraction, Instant};
/// # struct FakeClock(u64);
/// # impl embedded_time::Clock for FakeClock {
/// #   type T = u64;
/// #   const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);
/// #   fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> { Ok(Instant::new(self.0)) }
/// # }
///
/// let clock = FakeClock(0);
/// let now = clock.try_now().unwrap();
/// let strategy = Strategy::Delay { min: Milliseconds(1), max: Milliseconds(1) };
/// let mut retry = RetryTimer::new(now, strategy, Attempts(2));
///
/// assert_eq!(retry.what_should_i_do(now), Err(nb::Error::WouldBlock));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock<T = u64>> {
  start: Instant<C>,
  init: Milliseconds<u64>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

impl core::ops::Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted; the operation should be considered failed.
  Cry,
  /// A retry should be performed now.
  Retry,
}

impl<C: Clock<T = u64>> RetryTimer<C> {
  /// Create a new retrier starting at `start`.
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let seed = Milliseconds::try_from(start.duration_since_epoch()).map(|Milliseconds(ms)| ms)
                                                                      .unwrap_or(0);
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
      Milliseconds(rng.gen_range(strategy.range()))
    } else {
      Milliseconds(*strategy.range().start())
    };

    Self { start,
           strategy,
           init,
           max_attempts,
           attempts: Attempts(1) }
  }

  /// When the thing we keep trying fails, invoke this to ask "what do I do now?"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet waited the
  /// appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    if self.attempts >= self.max_attempts {
      return Ok(YouShould::Cry);
    }

    let elapsed = now.checked_duration_since(&self.start)
                     .and_then(|d| Milliseconds::<u64>::try_from(d).ok())
                     .unwrap_or(Milliseconds(0));

    if self.is_ready(elapsed, self.attempts.0) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// How many attempts have been made so far (including the first send).
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  fn is_ready(&self, Milliseconds(time_passed): Milliseconds<u64>, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => time_passed >= (self.init.0 * attempts as u64),
      | Strategy::Exponential { .. } => {
        time_passed >= Strategy::total_delay_exp(self.init, attempts)
      },
    }
  }
}

/// Strategy to employ when retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
  /// Double the delay after each failed attempt, jittered between `init_min`
  /// and `init_max` for the first retry.
  Exponential {
    /// Minimum (inclusive) delay before the second attempt.
    init_min: Milliseconds<u64>,
    /// Maximum (inclusive) delay before the second attempt.
    init_max: Milliseconds<u64>,
  },
  /// Wait a constant, jittered delay between every attempt.
  Delay {
    /// Minimum (inclusive) delay between attempts.
    min: Milliseconds<u64>,
    /// Maximum (inclusive) delay between attempts.
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// RFC 7252 ACK_TIMEOUT / ACK_RANDOM_FACTOR defaults (2s, x1.5), expressed
  /// as an exponential strategy whose first jitter window is
  /// `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR]`.
  pub const fn coap_default() -> Self {
    Self::Exponential { init_min: Milliseconds(2_000),
                        init_max: Milliseconds(3_000) }
  }

  fn has_jitter(&self) -> bool {
    let r = self.range();
    r.start() != r.end()
  }

  fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => min..=max,
      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => min..=max,
    }
  }

  /// Total elapsed time if every one of `max_attempts` attempts fails.
  pub fn max_time(&self, max_attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     Self::total_delay_exp(*init_max, max_attempts.0)
                   },
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max * max_attempts.0 as u64,
                 })
  }

  const fn total_delay_exp(Milliseconds(init): Milliseconds<u64>, attempt: u16) -> u64 {
    // attempt 1 -> init, attempt 2 -> init*2, attempt n -> init*2^(n-1)
    if attempt == 0 {
      0
    } else {
      init * 2u64.pow((attempt - 1) as u32)
    }
  }
}

#[cfg(test)]
mod test {
  use embedded_time::rate::Fraction;

  use super::*;

  pub struct FakeClock(pub core::cell::Cell<u64>);

  impl Clock for FakeClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
      Ok(Instant::new(self.0.get()))
    }
  }

  #[test]
  fn delay_retrier() {
    let clock = FakeClock(core::cell::Cell::new(0));
    let now = || clock.try_now().unwrap();
    let mut retry = RetryTimer::new(now(),
                                    Strategy::Delay { min: Milliseconds(1000),
                                                      max: Milliseconds(1000) },
                                    Attempts(3));

    clock.0.set(999);
    assert_eq!(retry.what_should_i_do(now()), Err(nb::Error::WouldBlock));

    clock.0.set(1000);
    assert_eq!(retry.what_should_i_do(now()), Ok(YouShould::Retry));

    clock.0.set(2000);
    assert_eq!(retry.what_should_i_do(now()), Ok(YouShould::Retry));

    assert_eq!(retry.what_should_i_do(now()), Ok(YouShould::Cry));
  }

  #[test]
  fn exponential_backoff_doubles() {
    let init = Milliseconds(100);
    assert_eq!(Strategy::total_delay_exp(init, 1), 100);
    assert_eq!(Strategy::total_delay_exp(init, 2), 200);
    assert_eq!(Strategy::total_delay_exp(init, 3), 400);
  }

  #[test]
  fn max_time_sums_exponential_series_endpoint() {
    let s = Strategy::Exponential { init_min: Milliseconds(100),
                                    init_max: Milliseconds(100) };
    assert_eq!(s.max_time(Attempts(3)), Milliseconds(400));
  }
}
