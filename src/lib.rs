//! Minimal single-threaded reactor for full-duplex byte streams.
//!
//! This crate multiplexes readiness across many transports on one thread and
//! turns raw readable/writable notifications into application-level events.
//!
//! # Architecture
//!
//! - **Multiplexer**: Waits for readiness across registered transports and
//!   dispatches per-transport callbacks (reads before writes)
//! - **BufferedSocket**: Wraps one transport, exposing input/output/error/close
//!   event subscriptions and an outbound write queue drained one payload per
//!   readiness notification
//! - **Transport**: Capability trait for a non-blocking duplex endpoint
//! - **StreamTransport**: The concrete TCP / socket-pair transport

mod error;
pub mod mux;
pub mod net;
mod socket;
mod transport;

pub use error::{MultiplexError, TransportError};
pub use mux::core::{InterestCallback, Multiplexer};
pub use socket::BufferedSocket;
pub use transport::{SharedTransport, Transport, TransportId};
