use std::sync::Arc;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::message::msg_key::{DomainType, MsgKey};
use crate::message::qos::Qos;
use crate::message::state::State;

/// Priority of a streaming request. When several requests share a stream, the class is the
///  maximum and the count the sum of all requests' priorities.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Priority {
    pub class: u8,
    pub count: u16,
}
impl Default for Priority {
    fn default() -> Self {
        Priority { class: 1, count: 1 }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum NakCode {
    None = 0,
    AccessDenied = 1,
    DeniedBySource = 2,
    SourceDown = 3,
    SourceUnknown = 4,
    NoResources = 5,
    NoResponse = 6,
    GatewayDown = 7,
    SymbolUnknown = 10,
    NotOpen = 11,
    InvalidContent = 12,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RequestMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: MsgKey,
    pub qos: Option<Qos>,
    /// If present, the request accepts any QoS between `qos` and `worst_qos`.
    pub worst_qos: Option<Qos>,
    pub priority: Option<Priority>,
    /// `false` for a snapshot request
    pub streaming: bool,
    pub no_refresh: bool,
    pub msg_key_in_updates: bool,
    pub private_stream: bool,
    pub pause: bool,
    /// a non-empty list turns this into a batch request for one item per name
    pub batch_item_names: Vec<Bytes>,
    pub extended_header: Option<Bytes>,
    pub payload: Bytes,
}
impl RequestMsg {
    pub fn new(stream_id: i32, domain: DomainType, key: MsgKey) -> RequestMsg {
        RequestMsg {
            stream_id,
            domain,
            key,
            qos: None,
            worst_qos: None,
            priority: None,
            streaming: true,
            no_refresh: false,
            msg_key_in_updates: false,
            private_stream: false,
            pause: false,
            batch_item_names: Vec::new(),
            extended_header: None,
            payload: Bytes::new(),
        }
    }

    pub fn snapshot(mut self) -> RequestMsg {
        self.streaming = false;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> RequestMsg {
        self.qos = Some(qos);
        self
    }

    pub fn with_qos_range(mut self, best: Qos, worst: Qos) -> RequestMsg {
        self.qos = Some(best);
        self.worst_qos = Some(worst);
        self
    }

    pub fn with_priority(mut self, class: u8, count: u16) -> RequestMsg {
        self.priority = Some(Priority { class, count });
        self
    }

    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RefreshMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub state: State,
    pub qos: Option<Qos>,
    /// `false` for refreshes the provider sends on its own initiative, e.g. after a recovery
    pub solicited: bool,
    /// `false` for every part of a multi-part refresh but the last
    pub complete: bool,
    pub clear_cache: bool,
    pub group_id: Bytes,
    pub seq_num: Option<u32>,
    pub part_num: Option<u16>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UpdateMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub update_type: u8,
    pub seq_num: Option<u32>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub state: Option<State>,
    pub group_id: Option<Bytes>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GenericMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub seq_num: Option<u32>,
    pub complete: bool,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PostMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub post_id: Option<u32>,
    pub seq_num: Option<u32>,
    pub ack_requested: bool,
    /// `false` for every part of a multi-part post but the last
    pub post_complete: bool,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckMsg {
    pub stream_id: i32,
    pub domain: DomainType,
    /// the post id of the acknowledged post
    pub ack_id: u32,
    pub seq_num: Option<u32>,
    /// `Some` for a negative acknowledgement
    pub nak_code: Option<NakCode>,
    pub text: Option<String>,
    pub key: Option<MsgKey>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CloseMsg {
    pub stream_id: i32,
    pub domain: DomainType,
}

/// A decoded protocol message. Encoding to and decoding from the wire is the transport's concern;
///  this crate works on structured values only.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Msg {
    Request(RequestMsg),
    Refresh(RefreshMsg),
    Update(UpdateMsg),
    Status(StatusMsg),
    Generic(GenericMsg),
    Post(PostMsg),
    Ack(AckMsg),
    Close(CloseMsg),
}

impl Msg {
    pub fn stream_id(&self) -> i32 {
        match self {
            Msg::Request(m) => m.stream_id,
            Msg::Refresh(m) => m.stream_id,
            Msg::Update(m) => m.stream_id,
            Msg::Status(m) => m.stream_id,
            Msg::Generic(m) => m.stream_id,
            Msg::Post(m) => m.stream_id,
            Msg::Ack(m) => m.stream_id,
            Msg::Close(m) => m.stream_id,
        }
    }

    pub fn domain(&self) -> DomainType {
        match self {
            Msg::Request(m) => m.domain,
            Msg::Refresh(m) => m.domain,
            Msg::Update(m) => m.domain,
            Msg::Status(m) => m.domain,
            Msg::Generic(m) => m.domain,
            Msg::Post(m) => m.domain,
            Msg::Ack(m) => m.domain,
            Msg::Close(m) => m.domain,
        }
    }

    /// The key carried by the message, if any. Request keys are mandatory and always returned.
    pub fn key(&self) -> Option<&MsgKey> {
        match self {
            Msg::Request(m) => Some(&m.key),
            Msg::Refresh(m) => m.key.as_ref(),
            Msg::Update(m) => m.key.as_ref(),
            Msg::Status(m) => m.key.as_ref(),
            Msg::Generic(m) => m.key.as_ref(),
            Msg::Post(m) => m.key.as_ref(),
            Msg::Ack(m) => m.key.as_ref(),
            Msg::Close(_) => None,
        }
    }

    /// Returns a copy of this message carrying `key`, or `None` for message classes that have
    ///  no optional key.
    pub fn with_key(&self, key: MsgKey) -> Option<Msg> {
        let mut result = self.clone();
        match &mut result {
            Msg::Refresh(m) => m.key = Some(key),
            Msg::Update(m) => m.key = Some(key),
            Msg::Status(m) => m.key = Some(key),
            Msg::Generic(m) => m.key = Some(key),
            Msg::Ack(m) => m.key = Some(key),
            Msg::Request(_) | Msg::Post(_) | Msg::Close(_) => return None,
        }
        Some(result)
    }
}

/// A message as delivered to one logical request: the inbound message is shared between all
///  recipients, and `stream_id` is the recipient's (logical) stream id which takes precedence
///  over the stream id inside `msg`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MsgView {
    pub stream_id: i32,
    pub msg: Arc<Msg>,
    pub user_context: Option<u64>,
}
