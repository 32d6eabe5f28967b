//! `std::net::UdpSocket` wired up as the engine's [`crate::net::Socket`]
//! (§6 "Transport abstraction"). `UdpSocket::connect` gives us exactly
//! the "connection-oriented datagram context" the abstraction wants for
//! free: once connected, `send`/`recv` never need an address again.

use std::io;
use std::net::UdpSocket as StdUdpSocket;

use crate::net::{NetError, NetResult, Socket};

pub(super) mod convert;

use convert::{io_to_nb, no_std::SockAddr};

/// Conservative bound under common IPv4 MTUs minus IP/UDP headers. A
/// DTLS-capable transport would report a smaller value here to leave
/// room for the record header.
const DEFAULT_MTU: usize = 1152;

/// `std`-backed UDP [`Socket`].
#[derive(Debug)]
pub struct UdpSocket(StdUdpSocket);

impl UdpSocket {
  /// Bind a fresh non-blocking UDP socket to `bind_addr` (use
  /// `0.0.0.0:0` / `[::]:0` to let the OS pick an ephemeral port).
  pub fn bind<A: std::net::ToSocketAddrs>(bind_addr: A) -> io::Result<Self> {
    let sock = StdUdpSocket::bind(bind_addr)?;
    sock.set_nonblocking(true)?;
    Ok(Self(sock))
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn connect(&mut self, addr: no_std_net::SocketAddr) -> NetResult<(), Self::Error> {
    let addr: std::net::SocketAddr = SockAddr(addr).into();
    self.0.connect(addr).map_err(NetError::Other)
  }

  fn send(&mut self, buf: &[u8]) -> NetResult<usize, Self::Error> {
    if buf.len() > self.inner_mtu() {
      return Err(NetError::MsgTooLarge);
    }

    match self.0.send(buf) {
      | Ok(n) => Ok(n),
      | Err(e) => Err(match io_to_nb(e) {
                    | nb::Error::WouldBlock => NetError::Again,
                    | nb::Error::Other(e) => NetError::Other(e),
                  }),
    }
  }

  fn recv(&mut self, buf: &mut [u8]) -> NetResult<usize, Self::Error> {
    match self.0.recv(buf) {
      | Ok(n) => Ok(n),
      | Err(e) => Err(match io_to_nb(e) {
                    | nb::Error::WouldBlock => NetError::Again,
                    | nb::Error::Other(e) => NetError::Other(e),
                  }),
    }
  }

  fn close(&mut self) -> NetResult<(), Self::Error> {
    // `std::net::UdpSocket` has no explicit disconnect on stable; the
    // next `connect` simply replaces the peer, matching the trait's
    // documented contract.
    Ok(())
  }

  fn inner_mtu(&self) -> usize {
    DEFAULT_MTU
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn binds_and_reports_mtu() {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    assert_eq!(sock.inner_mtu(), DEFAULT_MTU);
  }

  #[test]
  fn loopback_round_trip() {
    let mut a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut b = UdpSocket::bind("127.0.0.1:0").unwrap();
    let a_addr = a.0.local_addr().unwrap();
    let b_addr = b.0.local_addr().unwrap();

    a.connect(to_no_std(a_addr, b_addr)).unwrap();
    b.connect(to_no_std(b_addr, a_addr)).unwrap();

    a.send(b"hi").ok();

    let mut buf = [0u8; 16];
    let n = loop {
      match b.recv(&mut buf) {
        | Ok(n) => break n,
        | Err(NetError::Again) => continue,
        | Err(e) => panic!("{:?}", e),
      }
    };
    assert_eq!(&buf[..n], b"hi");
  }

  fn to_no_std(_local: std::net::SocketAddr, remote: std::net::SocketAddr) -> no_std_net::SocketAddr {
    convert::std::SockAddr(remote).into()
  }
}
