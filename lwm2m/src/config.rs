//! Runtime configuration (§6 "Configuration").

use embedded_time::duration::Milliseconds;
use tinyvec::ArrayVec;
use toad_writable::Writable;

use crate::retry::{Attempts, Strategy};
use crate::time::{Millis, Timeout};

/// Bytes / Second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytesPerSecond(pub u16);

/// Configuration options related to parsing & handling outbound CON requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy for CON requests that have not yet been ACKed.
  ///
  /// Defaults to RFC 7252's ACK_TIMEOUT/ACK_RANDOM_FACTOR:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use lwm2m::config::Con;
  /// use lwm2m::retry::Strategy;
  ///
  /// assert_eq!(Con::default().unacked_retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub unacked_retry_strategy: Strategy,

  /// Retry strategy for CON requests that have already been ACKed and are
  /// awaiting the separate response.
  pub acked_retry_strategy: Strategy,

  /// RFC 7252 `MAX_RETRANSMIT`: how many times a CON may be resent before
  /// the exchange is abandoned.
  ///
  /// ```
  /// use lwm2m::config::Con;
  /// use lwm2m::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(4));
  /// ```
  pub max_attempts: Attempts,
}

/// Configuration options related to parsing & handling outbound NON requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Non {
  /// Strategy to use when we sent a NON request and haven't yet received a
  /// response (used for NON-confirmable Notify and Send payloads).
  pub retry_strategy: Strategy,

  /// Number of times we are allowed to resend a NON request before erroring.
  pub max_attempts: Attempts,
}

/// UDP transmission parameters, grouped the way `udp_tx_params` is passed
/// as a single struct at init (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UdpTxParams {
  /// Token seed, customizable so that a fleet of devices doesn't generate
  /// guessable tokens from a shared default.
  pub token_seed: u16,

  /// Best-effort rate limit for NON requests / acked CON responses.
  ///
  /// Defaults to `BytesPerSecond(1000)`.
  pub probing_rate: BytesPerSecond,

  /// See [`Con`].
  pub con: Con,

  /// See [`Non`].
  pub non: Non,

  /// Maximum delay, in milliseconds, before responding to a multicast
  /// request (only relevant to the Bootstrap discovery flow).
  pub multicast_response_leisure: Millis,
}

impl Default for Con {
  fn default() -> Self {
    Con { unacked_retry_strategy: Strategy::coap_default(),
          acked_retry_strategy: Strategy::Exponential { init_min: Milliseconds(4_000),
                                                        init_max: Milliseconds(6_000) },
          max_attempts: Attempts(4) }
  }
}

impl Default for Non {
  fn default() -> Self {
    Non { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_attempts: Attempts(4) }
  }
}

impl Default for UdpTxParams {
  fn default() -> Self {
    UdpTxParams { token_seed: 0,
                  probing_rate: BytesPerSecond(1000),
                  con: Con::default(),
                  non: Non::default(),
                  multicast_response_leisure: Milliseconds(5000) }
  }
}

/// Networking knobs passed to the transport's `create`/`connect` (§6
/// "net_socket_cfg"). Left deliberately thin -- the concrete meaning of
/// most of these is transport-specific (e.g. DTLS cipher suite selection),
/// the engine only needs to know the MTU ceiling to plan Block-wise
/// transfers around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetSocketConfig {
  /// Upper bound on the datagram size the transport is willing to send,
  /// used as the starting point for Block1/Block2 SZX negotiation.
  pub mtu: u16,
}

impl Default for NetSocketConfig {
  fn default() -> Self {
    Self { mtu: 1152 }
  }
}

/// Fixed-capacity endpoint name, matching the longest endpoint client names
/// seen in practice (IMEI + a readable suffix comfortably fits in 63 bytes).
pub type EndpointName = Writable<ArrayVec<[u8; 63]>>;

/// Top-level client configuration (§6 "Configuration"), supplied once at
/// client construction.
#[derive(Debug, Clone, Copy)]
pub struct Config {
  /// `ep=` endpoint client name used on every Register/Bootstrap request.
  /// The only required field; everything else has a sensible default.
  pub endpoint_name: EndpointName,

  /// Whether the client should enter Queue Mode (`Q` binding mode) once
  /// registered, per §4.8.
  pub queue_mode_enabled: bool,

  /// How long the client waits after its last exchange before declaring
  /// itself awaiting-wakeup in Queue Mode.
  pub queue_mode_timeout: Timeout,

  /// Number of Bootstrap attempts allowed before transitioning to Failure.
  pub bootstrap_retry_count: u8,

  /// Delay between Bootstrap attempts.
  pub bootstrap_retry_timeout: Millis,

  /// Absolute per-exchange timeout (bounds total time including all
  /// retransmissions), independent of the transmission parameters below.
  pub exchange_request_timeout: Millis,

  /// See [`NetSocketConfig`].
  pub net_socket_cfg: NetSocketConfig,

  /// See [`UdpTxParams`].
  pub udp_tx_params: UdpTxParams,

  /// Maximum number of requests that can be in flight at a given moment.
  ///
  /// Defaults to `1` (no concurrency) -- LwM2M Servers and Bootstrap-Servers
  /// are single peers, so pipelining buys nothing but complexity.
  pub max_concurrent_requests: u8,
}

impl Config {
  /// Construct a [`Config`] with the given (required) endpoint name and
  /// every other field at its default.
  pub fn new(endpoint_name: &str) -> Self {
    Self { endpoint_name: EndpointName::from(ArrayVec::<[u8; 63]>::new()).tap_write(endpoint_name),
           queue_mode_enabled: false,
           queue_mode_timeout: Timeout::Never,
           bootstrap_retry_count: 3,
           bootstrap_retry_timeout: Milliseconds(60_000),
           exchange_request_timeout: Milliseconds(247_000),
           net_socket_cfg: NetSocketConfig::default(),
           udp_tx_params: UdpTxParams::default(),
           max_concurrent_requests: 1 }
  }

  pub(crate) fn max_transmit_span_millis(&self) -> u64 {
    let con = &self.udp_tx_params.con;
    let non = &self.udp_tx_params.non;

    let acked_con = con.acked_retry_strategy
                       .max_time(con.max_attempts - Attempts(1))
                       .0;
    let unacked_con = con.unacked_retry_strategy
                         .max_time(con.max_attempts - Attempts(1))
                         .0;
    let non = non.retry_strategy.max_time(non.max_attempts - Attempts(1)).0;

    acked_con.max(unacked_con).max(non)
  }

  pub(crate) fn max_transmit_wait_millis(&self) -> u64 {
    let con = &self.udp_tx_params.con;
    let non = &self.udp_tx_params.non;

    let acked_con = con.acked_retry_strategy.max_time(con.max_attempts).0;
    let unacked_con = con.unacked_retry_strategy.max_time(con.max_attempts).0;
    let non = non.retry_strategy.max_time(non.max_attempts).0;

    acked_con.max(unacked_con).max(non)
  }

  pub(crate) fn max_latency_millis(&self) -> u64 {
    100_000
  }

  pub(crate) fn expected_processing_delay_millis(&self) -> u64 {
    2_000
  }

  /// `EXCHANGE_LIFETIME` per RFC 7252 §4.8.2, used to size the Response
  /// Cache's (§4.2) retention window.
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }
}

trait TapWrite {
  fn tap_write(self, s: &str) -> Self;
}

impl<A: toad_array::Array<Item = u8>> TapWrite for Writable<A> {
  fn tap_write(mut self, s: &str) -> Self {
    use core::fmt::Write;
    self.write_str(s).ok();
    self
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn endpoint_name_roundtrips() {
    let cfg = Config::new("urn:imei:1234567890");
    assert_eq!(cfg.endpoint_name.as_str(), "urn:imei:1234567890");
  }

  #[test]
  fn exchange_lifetime_is_dominated_by_max_transmit_span() {
    let cfg = Config::new("ep");
    assert!(cfg.exchange_lifetime_millis() > cfg.max_transmit_span_millis());
  }
}
