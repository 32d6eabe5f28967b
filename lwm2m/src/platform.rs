//! The `Platform` seam: what the host application must provide, and what
//! the engine hands back to it (§4.11, §6).
//!
//! Unlike the teacher's `toad`, which parameterizes the whole crate over a
//! `PlatformTypes` triple of pluggable message/option/payload collections,
//! this engine only ever speaks one concrete wire message
//! (`toad_msg::alloc::Message`, see `DESIGN.md`), so `Platform` only needs
//! to be generic over the two things the host genuinely supplies: a
//! [`Clock`] and a [`Socket`].

use core::fmt::Debug;

#[cfg(feature = "alloc")]
use std_alloc::vec::Vec;

use embedded_time::Instant;
use toad_msg::TryIntoBytes;

use crate::config::Config;
use crate::net::{NetError, Socket};
use crate::time::Clock;
use crate::todo::String1Kb;

/// Concrete wire message type used throughout the engine.
pub type Message = toad_msg::alloc::Message;

/// Default [`PlatformError`] implementation, composing the three error
/// sources a `step` can fail with (§4.11 "Logging & error taxonomy").
#[derive(Debug)]
#[allow(missing_docs)]
pub enum Error<Step, Sock> {
  MessageToBytes(toad_msg::to_bytes::MessageToBytesError),
  Step(Step),
  Socket(NetError<Sock>),
  Clock(embedded_time::clock::Error),
}

impl<Step, Sock> PlatformError<Step, Sock> for Error<Step, Sock>
  where Step: Debug,
        Sock: Debug
{
  fn msg_to_bytes(e: toad_msg::to_bytes::MessageToBytesError) -> Self {
    Self::MessageToBytes(e)
  }

  fn step(e: Step) -> Self {
    Self::Step(e)
  }

  fn socket(e: NetError<Sock>) -> Self {
    Self::Socket(e)
  }

  fn clock(e: embedded_time::clock::Error) -> Self {
    Self::Clock(e)
  }
}

/// Errors that may be encountered while stepping the engine.
pub trait PlatformError<StepError, SockError>: Sized + Debug {
  /// Convert a message-encoding failure.
  fn msg_to_bytes(e: toad_msg::to_bytes::MessageToBytesError) -> Self;
  /// Convert a step (protocol-logic) failure.
  fn step(e: StepError) -> Self;
  /// Convert a transport failure.
  fn socket(e: NetError<SockError>) -> Self;
  /// Convert a clock failure.
  fn clock(e: embedded_time::clock::Error) -> Self;
}

/// A snapshot of the system's state at the start of a `step`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Snapshot<C: Clock> {
  /// The current system time.
  pub time: Instant<C>,
  /// A UDP datagram received from the connected peer, if any arrived
  /// since the last step.
  pub recvd_dgram: Option<Vec<u8>>,
  /// Runtime config, including every timing parameter.
  pub config: Config,
}

/// A side effect that protocol logic would like the host to perform.
///
/// Mirrors the teacher's `Effect<P>`: logic never calls `send`/`log`
/// directly, it appends an `Effect` and the host loop executes it. This
/// keeps every `step`/`poll_*` method free of I/O so it can be unit
/// tested with a plain [`Snapshot`].
#[allow(missing_docs)]
pub enum Effect {
  Send(Message),
  Log(log::Level, String1Kb),
  /// (Re)connect to the currently configured peer (§4.8 "open
  /// connection"/"re-open connection"): Bootstrap/Registration entry,
  /// and Queue-Mode waking back up into `Registration-Session`.
  Connect,
  /// Tear down the connection to the current peer (§4.8 "close
  /// connection"): a completed best-effort Deregister, or leaving a
  /// session behind for a Server/Bootstrap-Server switch.
  Close,
  Nop,
}

impl Default for Effect {
  fn default() -> Self {
    Self::Nop
  }
}

impl Effect {
  /// Is this [`Effect::Send`]?
  pub fn is_send(&self) -> bool {
    matches!(self, Self::Send(_))
  }
}

impl Debug for Effect {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::Send(m) => f.debug_tuple("Send").field(&m.code).field(&m.id).finish(),
      | Self::Log(l, s) => f.debug_tuple("Log").field(l).field(&s.as_ref()).finish(),
      | Self::Connect => f.debug_tuple("Connect").finish(),
      | Self::Close => f.debug_tuple("Close").finish(),
      | Self::Nop => f.debug_tuple("Nop").finish(),
    }
  }
}

/// Host-provided runtime: a clock, a connected socket, and a sink for log
/// lines. The engine (`crate::client::Client`) is generic over this trait
/// rather than reimplementing transport/time access itself.
pub trait Platform {
  /// See [`Clock`].
  type Clock: Clock;
  /// See [`Socket`].
  type Socket: Socket;
  /// See [`PlatformError`]. [`self::Error`] is a sensible default.
  type Error: PlatformError<core::convert::Infallible, <Self::Socket as Socket>::Error>;

  /// Obtain a reference to the clock.
  fn clock(&self) -> &Self::Clock;

  /// Obtain a mutable reference to the connected socket.
  fn socket(&mut self) -> &mut Self::Socket;

  /// The peer [`Effect::Connect`] (re)connects to -- the Bootstrap-Server
  /// or management Server the host resolved before constructing this
  /// `Platform`. Typically a field access.
  fn server_addr(&self) -> no_std_net::SocketAddr;

  /// Runtime config, typically a field access.
  fn config(&self) -> &Config;

  /// Receive a log line. Typically forwards to the `log` crate facade
  /// (`log::log!(target: "lwm2m", level, "{}", msg)`).
  fn log(&self, level: log::Level, msg: &str);

  /// Take a snapshot of the current time and any waiting datagram.
  fn snapshot(&mut self) -> Result<Snapshot<Self::Clock>, Self::Error> {
    use embedded_time::Clock as _;

    let time = self.clock().try_now().map_err(Self::Error::clock)?;

    let mut buf = [0u8; 2048];
    let recvd_dgram = match self.socket().recv(&mut buf) {
      | Ok(n) => Some(buf[..n].to_vec()),
      | Err(NetError::Again) => None,
      | Err(e) => return Err(Self::Error::socket(e)),
    };

    Ok(Snapshot { time,
                  recvd_dgram,
                  config: *self.config() })
  }

  /// Execute a single [`Effect`], blocking (via `nb::block!`-style
  /// polling is the caller's responsibility) until it either completes
  /// or fails for a non-transient reason.
  fn exec_1(&mut self, effect: &Effect) -> nb::Result<(), Self::Error> {
    match effect {
      | Effect::Log(level, msg) => {
        self.log(*level, msg.as_ref());
        Ok(())
      },
      | Effect::Send(msg) => {
        let bytes = msg.clone()
                        .try_into_bytes::<Vec<u8>>()
                        .map_err(Self::Error::msg_to_bytes)
                        .map_err(nb::Error::Other)?;
        self.socket()
            .send(&bytes)
            .map(|_| ())
            .map_err(Self::Error::socket)
            .map_err(nb::Error::Other)
      },
      | Effect::Connect => {
        let addr = self.server_addr();
        self.socket()
            .connect(addr)
            .map(|_| ())
            .map_err(net_err_to_nb::<Self>)
      },
      | Effect::Close => self.socket().close().map(|_| ()).map_err(net_err_to_nb::<Self>),
      | Effect::Nop => Ok(()),
    }
  }

  /// Execute a batch of effects in order, short-circuiting on the first
  /// hard error (WouldBlock is retried inline since effects are expected
  /// to complete within one step in practice -- a `send` on a
  /// momentarily-full buffer is the only realistic case and sockets
  /// created by [`crate::net::Socket`] implementors are expected to
  /// accept one datagram per `step`).
  fn exec_many(&mut self, effects: Vec<Effect>) -> Result<(), Self::Error> {
    for eff in effects {
      match self.exec_1(&eff) {
        | Ok(()) | Err(nb::Error::WouldBlock) => continue,
        | Err(nb::Error::Other(e)) => return Err(e),
      }
    }
    Ok(())
  }
}

/// `Connect`/`Close` treat a still-in-progress transport op (DTLS
/// handshake, momentarily full queue) as transient rather than fatal,
/// same as `Send`/`recv` elsewhere in this module.
fn net_err_to_nb<P: Platform + ?Sized>(e: NetError<<P::Socket as Socket>::Error>) -> nb::Error<P::Error> {
  match e {
    | NetError::Again | NetError::InProgress => nb::Error::WouldBlock,
    | other => nb::Error::Other(P::Error::socket(other)),
  }
}
