#[cfg(test)] use mockall::automock;

use crate::message::msgs::Msg;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SendResult {
    Ok,
    /// The transport can not accept the message right now; it should be retried once the channel
    ///  signals [ChannelEvent::Ready].
    WouldBlock,
    Fatal(String),
}

/// Writes messages to a channel. Encoding the message and managing buffers is the transport's
///  concern; it must not block.
#[cfg_attr(test, automock)]
pub trait Transport: Send + 'static {
    fn send_msg(&mut self, msg: &Msg) -> SendResult;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelEvent {
    Up,
    /// the channel is gone for good
    Down,
    /// the channel is down, and the transport is reconnecting
    DownRecoverable,
    /// the channel can accept writes again after a [SendResult::WouldBlock]
    Ready,
}
