use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum StreamState {
    Unspecified = 0,
    /// The stream is open and will receive updates.
    Open = 1,
    /// The stream delivers a refresh and closes afterwards; used for snapshots, and by providers
    ///  that do not support streaming for an item.
    NonStreaming = 2,
    /// The stream was closed, but a request for the same item may succeed later (e.g. after a
    ///  service comes back up).
    ClosedRecover = 3,
    /// The stream was closed, and re-requesting the item is not expected to succeed.
    Closed = 4,
    /// The stream was closed, and the item is available under a different key.
    Redirected = 5,
}
impl StreamState {
    pub fn is_closed(&self) -> bool {
        use StreamState::*;

        match self {
            Unspecified | Open | NonStreaming => false,
            ClosedRecover | Closed | Redirected => true,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum DataState {
    NoChange = 0,
    Ok = 1,
    Suspect = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum StateCode {
    None = 0,
    NotFound = 1,
    Timeout = 2,
    NotEntitled = 3,
    InvalidArgument = 4,
    UsageError = 5,
    Preempted = 6,
    NoResources = 9,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: StateCode,
    pub text: String,
}
impl State {
    pub fn new(stream_state: StreamState, data_state: DataState, text: impl Into<String>) -> State {
        State {
            stream_state,
            data_state,
            code: StateCode::None,
            text: text.into(),
        }
    }

    pub fn open_ok() -> State {
        State::new(StreamState::Open, DataState::Ok, "")
    }

    pub fn with_code(mut self, code: StateCode) -> State {
        self.code = code;
        self
    }
}
