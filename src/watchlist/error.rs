use thiserror::Error;

use crate::message::qos::Qos;

/// Reasons for rejecting a call synchronously. A rejected call has no effect on the handler's
///  state. Failures of streams or services are not errors: they reach the application as status
///  messages on the affected streams.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum WatchlistError {
    #[error("Login stream is not open.")]
    NotLoggedIn,
    #[error("Request has invalid QoS ({0}).")]
    InvalidQos(Qos),
    #[error("Request has invalid worst QoS ({0}).")]
    InvalidWorstQos(Qos),
    #[error("Cannot submit request with both service name and service id specified.")]
    ServiceNameAndId,
    #[error("Request has neither a service name nor a service id.")]
    NoService,
    #[error("Item in batch has same ID as existing stream.")]
    BatchIdInUse,
    #[error("Reissue request not allowed on an unopen stream.")]
    ReissueOnUnopenStream,
    #[error("Reissue requests may not alter streaming flag.")]
    StreamingFlagChanged,
    #[error("Reissue requests must occur while stream state is known as open.")]
    ReissueWhileNotOpen,
    #[error("Reissue requests may not alter the domain or key.")]
    ReissueChangedKey,
    #[error("Posting not supported by provider")]
    PostingNotSupported,
    #[error("Posting not allowed on administrative domain.")]
    PostOnAdministrativeDomain,
    #[error("Cannot submit PostMsg when stream not in open state.")]
    PostStreamNotOpen,
    #[error("Post submitted with acknowledgement but no post id.")]
    MissingPostId,
    #[error("Multi-part post submitted with acknowledgement but no sequence number.")]
    MissingPostSeqNum,
    #[error("Post has same sequence number as an outstanding post.")]
    DuplicatePostSeqNum,
    #[error("maxOutstandingPosts limit reached.")]
    MaxOutstandingPosts,
    #[error("Cannot submit GenericMsg when stream not in open state.")]
    GenericStreamNotOpen,
    #[error("Unknown stream id {0}.")]
    UnknownStream(i32),
    #[error("Message class cannot be submitted on an item stream.")]
    UnsupportedMsgClass,
    #[error("Transport failure: {0}")]
    Transport(String),
}
