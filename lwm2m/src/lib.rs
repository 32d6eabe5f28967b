//! `lwm2m` is a client implementation of the OMA LwM2M device management
//! protocol (1.1/1.2) that aims to be:
//! - Platform-independent
//! - Allocation-free at its core, with an optional `std`/`alloc` layer
//! - Approachable
//!
//! ## LwM2M
//! LwM2M ("Lightweight M2M") layers a device-management data model --
//! Objects, Object Instances, and Resources, each addressed by a CoAP
//! URI path like `/3303/0/5700` -- on top of [CoAP](https://datatracker.ietf.org/doc/html/rfc7252).
//! A device (the *client*, this crate's [`client::Client`]) registers
//! itself with one or more LwM2M Servers, which may then Read, Write,
//! Execute, Observe, or Delete any Resource the device advertises; the
//! device may also proactively report data via LwM2M Send.
//!
//! ### The four Interfaces
//! - **Bootstrap**: a Bootstrap-Server provisions the Security/Server
//!   Object Instances a device needs before it can Register anywhere.
//! - **Registration**: Register, Update (periodic keep-alive), and
//!   De-register against a management Server.
//! - **Device Management & Service Enablement**: Read/Write/Execute/
//!   Create/Delete/Discover against the [`dm`] Data Model, plus Observe
//!   (RFC 7641-style Notify).
//! - **Information Reporting**: Observe/Notify and the unsolicited
//!   LwM2M Send operation ([`send`]).
//!
//! This crate drives all four from a single cooperative entry point,
//! [`client::Client::step`], called at whatever cadence the host
//! schedules -- there is no blocking event loop or internal thread.

// docs
#![doc(html_root_url = "https://docs.rs/lwm2m/0.1.0")]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(missing_copy_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc as std_alloc;

#[doc(hidden)]
pub mod todo;

pub(crate) mod logging;

/// customizable retrying of fallible operations
pub mod retry;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// top-level error taxonomy (§7)
pub mod error;

/// CoAP request/response exchange engine (§4.3)
pub mod exchange;

/// block-wise transfer reassembly/segmentation (§4.3, RFC 7959)
pub mod blockwise;

/// retransmission de-duplication cache (§4.2)
pub mod cache;

/// resource-oriented data model: object registry, URI paths, values (§4.5, §3)
pub mod dm;

/// pluggable content-format encoders/decoders (§4.4)
pub mod io;

/// Bootstrap/Registration message builders and retry policy (§4.6)
pub mod registration;

/// attribute storage and notification scheduling (§4.7)
pub mod observe;

/// bounded FIFO of LwM2M-Send payloads (§4.9)
pub mod send;

/// versioned persistence of Security/Server object instances (§6, ambient)
#[cfg(feature = "persistence")]
#[cfg_attr(docsrs, doc(cfg(feature = "persistence")))]
pub mod persist;

/// the Client State Machine (§4.8): the engine's single entry point
pub mod client;

/// `std`-only toad stuff
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;

mod option;

pub use option::ContentFormat;
