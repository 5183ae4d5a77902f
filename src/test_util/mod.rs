//! This module contains utilities for testing code based on the watchlist: a transport that
//!  records what was sent, and builders for the messages a provider sends.
//!
//! They are used for testing the watchlist itself, but they are also exported for application
//!  testing, which is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod msgs;
pub mod tracking_transport;

