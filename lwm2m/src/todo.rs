//! Small stack-only helpers that don't have an obvious home of their own.

use core::fmt::Write;
use core::ops::{Div, Mul};

use tinyvec::ArrayVec;
use toad_len::Len;
use toad_writable::Writable;

/// String with capacity of 1KB, for building alloc-less log lines and
/// CoRE Link Format fragments.
#[derive(Debug, Copy, Clone, Default)]
pub struct String1Kb(Writable<ArrayVec<[u8; 1024]>>);

impl PartialEq for String1Kb {
  fn eq(&self, other: &Self) -> bool {
    self.0.as_str() == other.0.as_str()
  }
}

impl Eq for String1Kb {}

impl core::fmt::Write for String1Kb {
  fn write_str(&mut self, s: &str) -> core::fmt::Result {
    self.0.write_str(s)
  }
}

impl<'a> From<&'a str> for String1Kb {
  fn from(s: &'a str) -> Self {
    let mut arr: Writable<ArrayVec<[u8; 1024]>> = Writable::default();
    arr.write_str(s).ok();
    Self(arr)
  }
}

impl AsRef<str> for String1Kb {
  fn as_ref(&self) -> &str {
    self.0.as_str()
  }
}

/// How full is a fixed-capacity collection, as a fraction in `[0.0, 1.0]`?
///
/// `None` for collections with no fixed capacity (e.g. `Vec`).
pub(crate) trait Capacity: Len {
  fn capacity_frac(&self) -> Option<f32> {
    Self::CAPACITY.map(|max| self.len() as f32 / max as f32)
  }

  fn capacity_pct(&self) -> Option<f32> {
    self.capacity_frac().map(|dec| dec.mul(10000.).round().div(100.))
  }
}

impl<T: Len> Capacity for T {}

pub(crate) fn code_to_human(code: toad_msg::Code) -> Writable<ArrayVec<[u8; 4]>> {
  let mut buf: Writable<ArrayVec<[u8; 4]>> = Writable::default();
  code.to_human().iter().for_each(|char| {
                          write!(buf, "{}", char).ok();
                        });
  buf
}

pub(crate) trait ResultExt2<T, E> {
  fn unwrap_err_or(self, f: impl FnOnce(T) -> E) -> E;
  fn try_perform_mut(self, f: impl FnOnce(&mut T) -> Result<(), E>) -> Result<T, E>;
}

impl<T, E> ResultExt2<T, E> for Result<T, E> {
  fn unwrap_err_or(self, f: impl FnOnce(T) -> E) -> E {
    match self {
      | Ok(t) => f(t),
      | Err(e) => e,
    }
  }

  fn try_perform_mut(self, f: impl FnOnce(&mut T) -> Result<(), E>) -> Result<T, E> {
    match self {
      | Ok(mut t) => f(&mut t).map(|_| t),
      | Err(e) => Err(e),
    }
  }
}

pub(crate) trait NbResultExt<T, E> {
  fn perform_nb_err(self, f: impl FnOnce(&E)) -> Self;
  #[cfg(feature = "std")]
  fn expect_nonblocking(self, msg: impl ToString) -> Result<T, E>;
}

impl<T, E> NbResultExt<T, E> for ::nb::Result<T, E> {
  fn perform_nb_err(self, f: impl FnOnce(&E)) -> ::nb::Result<T, E> {
    if let Err(::nb::Error::Other(ref e)) = self {
      f(e);
    }
    self
  }

  #[cfg(feature = "std")]
  fn expect_nonblocking(self, msg: impl ToString) -> Result<T, E> {
    match self {
      | Ok(ok) => Ok(ok),
      | Err(::nb::Error::Other(e)) => Err(e),
      | Err(::nb::Error::WouldBlock) => panic!("{}", msg.to_string()),
    }
  }
}

pub(crate) mod nb {
  #[allow(unused_macros)]
  macro_rules! nb_block {
    ($stuff:expr, with = $with:expr) => {
      loop {
        match $stuff {
          | Ok(t) => break Ok(t),
          | Err(::nb::Error::Other(e)) => break Err(e),
          | Err(::nb::Error::WouldBlock) => match $with() {
            | Some(ripcord) => break ripcord,
            | None => continue,
          },
        }
      }
    };
    ($stuff:expr, timeout_after = $duration:expr, timeout_err = $timeout_err:expr) => {{
      let start = ::std::time::Instant::now();
      $crate::todo::nb::block!($stuff,
                               with = || {
                                 if ::std::time::Instant::now() - start > $duration {
                                   Some(Err($timeout_err()))
                                 } else {
                                   None
                                 }
                               })
    }};
    ($stuff:expr, io_timeout_after = $duration:expr) => {
      $crate::todo::nb::block!($stuff,
                               timeout_after = $duration,
                               timeout_err =
                                 || ::std::io::Error::from(::std::io::ErrorKind::TimedOut))
    };
  }

  #[allow(unused_imports)]
  pub(crate) use nb_block as block;
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn string1kb_roundtrips_a_str() {
    let s = String1Kb::from("hello");
    assert_eq!(s.as_ref(), "hello");
  }

  #[test]
  fn capacity_pct_of_half_full_arrayvec() {
    let mut v: ArrayVec<[u8; 10]> = ArrayVec::new();
    v.extend_from_slice(&[0u8; 5]);
    assert_eq!(v.capacity_pct(), Some(50.0));
  }
}
