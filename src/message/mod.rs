//! The structured message vocabulary the watchlist operates on. Messages are plain values that a
//!  codec has already decoded; nothing in here deals with bytes on the wire.

pub mod msg_key;
pub mod msgs;
pub mod qos;
pub mod state;
