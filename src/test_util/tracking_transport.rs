use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::message::msgs::{Msg, RequestMsg};
use crate::watchlist::transport::{SendResult, Transport};

#[derive(Debug, Default)]
struct Tracker {
    sent: Vec<Msg>,
    would_block: bool,
}

/// A [Transport] that records all messages it accepts. Clones share their state, so a test can
///  hand one clone to the handler and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct TrackingTransport {
    tracker: Arc<Mutex<Tracker>>,
}
impl TrackingTransport {
    pub fn new() -> Self {
        Default::default()
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// While set, every send returns [SendResult::WouldBlock].
    pub fn set_would_block(&self, would_block: bool) {
        self.tracker().would_block = would_block;
    }

    pub fn sent(&self) -> Vec<Msg> {
        self.tracker().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Msg> {
        std::mem::take(&mut self.tracker().sent)
    }

    /// Removes and returns the oldest message that was sent.
    pub fn pop_sent(&self) -> Option<Msg> {
        let mut tracker = self.tracker();
        if tracker.sent.is_empty() {
            None
        }
        else {
            Some(tracker.sent.remove(0))
        }
    }

    /// Removes the oldest message that was sent, asserting that it is a request.
    pub fn pop_request(&self) -> RequestMsg {
        match self.pop_sent() {
            Some(Msg::Request(request)) => request,
            None => panic!("no message was sent"),
            Some(other) => panic!("expected a request, was {:?}", other),
        }
    }

    pub fn assert_sent(&self, expected: &Msg) {
        match self.pop_sent() {
            Some(actual) => assert_eq!(&actual, expected),
            None => panic!("no message was sent"),
        }
    }

    pub fn assert_no_close_sent(&self) {
        let tracker = self.tracker();
        if let Some(close) = tracker.sent.iter().find(|m| matches!(m, Msg::Close(_))) {
            panic!("unexpected close {:?}", close);
        }
    }

    pub fn assert_no_remaining_msgs(&self) {
        let tracker = self.tracker();
        assert!(tracker.sent.is_empty(), "remaining messages: {:?}", tracker.sent);
    }
}

impl Transport for TrackingTransport {
    fn send_msg(&mut self, msg: &Msg) -> SendResult {
        let mut tracker = self.tracker();
        if tracker.would_block {
            return SendResult::WouldBlock;
        }
        tracker.sent.push(msg.clone());
        SendResult::Ok
    }
}
