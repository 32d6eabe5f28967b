//! `std`-only glue: a monotonic [`time::Clock`] backed by
//! [`std::time::Instant`] and a [`Platform`] bundling it with
//! [`net::UdpSocket`] and a [`Config`](crate::config::Config).

use embedded_time::rate::Fraction;
use embedded_time::{Instant, clock};

use crate::config::Config;
use crate::net::NetError;
use crate::platform;
use crate::time;

pub mod net;
pub use net::UdpSocket;

/// Monotonic clock anchored at the moment it was constructed, reporting
/// microsecond ticks via [`std::time::Instant::elapsed`]. Never goes
/// backwards (`Instant::elapsed` is documented to saturate at zero
/// rather than panic/underflow on platforms with a non-monotonic
/// `Instant`, matching the "saturating, never backward" requirement in
/// Design Notes §9).
#[derive(Debug, Clone)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
    let micros = self.0.elapsed().as_micros().min(u64::MAX as u128) as u64;
    Ok(Instant::new(micros))
  }
}

/// Real (wall-clock) time source, backed by [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl time::RealClock for RealClock {
  fn now_unix_seconds(&self) -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)
                                 .map(|d| d.as_secs() as i64)
                                 .unwrap_or(0)
  }
}

/// `std` implementation of [`platform::Platform`]: a connected
/// [`UdpSocket`], a [`Clock`], and a [`Config`]. Construct with
/// [`Platform::try_new`], then drive a `Client` by calling
/// [`Client::step`](crate::client::Client::step) with `&mut platform`
/// at an application-chosen cadence (there is no blocking event loop
/// here; see `blocking` in the teacher for that style if a host wants
/// it -- this crate's control flow is cooperative per Design Notes §9).
#[derive(Debug)]
pub struct Platform {
  clock: Clock,
  socket: UdpSocket,
  config: Config,
  server_addr: no_std_net::SocketAddr,
}

impl Platform {
  /// Bind a non-blocking UDP socket to `bind_addr` and connect it to
  /// `server_addr`, ready for [`crate::client::Client::step`].
  pub fn try_new<A, B>(bind_addr: A, server_addr: B, config: Config) -> std::io::Result<Self>
    where A: std::net::ToSocketAddrs,
          B: std::net::ToSocketAddrs
  {
    use crate::net::Socket;

    let mut socket = UdpSocket::bind(bind_addr)?;
    let server_addr = server_addr.to_socket_addrs()?
                                  .next()
                                  .ok_or_else(|| {
                                    std::io::Error::new(std::io::ErrorKind::InvalidInput,
                                                        "no address resolved")
                                  })?;
    let server_addr = no_std_net_addr(server_addr);
    socket.connect(server_addr).map_err(net_err_to_io)?;

    Ok(Self { clock: Clock::default(),
              socket,
              config,
              server_addr })
  }
}

fn no_std_net_addr(addr: std::net::SocketAddr) -> no_std_net::SocketAddr {
  net::convert::std::SockAddr(addr).into()
}

fn net_err_to_io(e: NetError<std::io::Error>) -> std::io::Error {
  match e {
    | NetError::Other(e) => e,
    | NetError::Again => std::io::Error::from(std::io::ErrorKind::WouldBlock),
    | NetError::MsgTooLarge => std::io::Error::new(std::io::ErrorKind::InvalidInput, "message too large"),
    | NetError::NotSupported => std::io::Error::from(std::io::ErrorKind::Unsupported),
    | NetError::InProgress => std::io::Error::from(std::io::ErrorKind::WouldBlock),
  }
}

impl platform::Platform for Platform {
  type Clock = Clock;
  type Socket = UdpSocket;
  type Error = platform::Error<core::convert::Infallible, std::io::Error>;

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

  fn log(&self, level: log::Level, msg: &str) {
    log::log!(target: "lwm2m", level, "{}", msg);
  }
}

#[cfg(test)]
mod test {
  use embedded_time::Clock as _;

  use super::*;

  #[test]
  fn clock_never_goes_backward() {
    let clock = Clock::default();
    let a = clock.try_now().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1));
    let b = clock.try_now().unwrap();
    assert!(b >= a);
  }

  #[test]
  fn platform_binds_and_connects() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    let _ = listener;
    let target = std::net::UdpSocket::bind("127.0.0.1:0").unwrap()
                                                          .local_addr()
                                                          .unwrap();
    let platform = Platform::try_new("127.0.0.1:0", target, Config::new("ep")).unwrap();
    let _ = platform;
  }
}
