//! Readiness-based I/O multiplexing.
//!
//! This module provides the dispatch side of the reactor:
//! - [`core`]: Registration tables and the dispatch cycle
//! - [`poll`]: `poll(2)` wrapper with a typed interrupted-wait outcome

pub mod core;
pub(crate) mod poll;
