//! The watchlist: multiplexes logical item requests onto shared physical streams, and keeps
//!  them alive across stream, service and channel failures.

pub mod aggregation_key;
pub mod driver;
pub mod error;
pub mod item_handler;
pub mod logical_request;
pub mod login;
pub mod pending_requests;
pub mod physical_stream;
pub mod post_tracker;
pub mod qos_matcher;
pub mod service_view;
pub mod transport;
pub mod watchlist_config;
