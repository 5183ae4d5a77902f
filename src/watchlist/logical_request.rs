use std::sync::Arc;

use crate::message::msgs::{Msg, MsgView, RequestMsg};
use crate::message::qos::Qos;
use crate::watchlist::error::WatchlistError;
use crate::watchlist::pending_requests::ServiceTarget;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestState {
    /// not (currently) sent, e.g. waiting for a service or for its physical stream
    PendingRequest,
    /// sent, waiting for a refresh
    RefreshPending,
    /// received part of a multi-part refresh, waiting for the rest
    RefreshCompletePending,
    Open,
}

/// Where a request currently lives. A request is in exactly one of these places, and the
///  referenced collection lists it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Placement {
    /// in no collection, e.g. queued for resubmission after a request timeout
    Unplaced,
    /// in the pending request index, waiting for its service
    Parked(ServiceTarget),
    /// in the service's waiting list, waiting for its open window
    ServiceWaiting(u16),
    /// in a physical stream's waiting list, waiting for a refresh in progress to complete
    StreamWaiting(i32),
    /// attached to a physical stream, receiving its messages
    Attached(i32),
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Addresses the service by name. Mutually exclusive with a service id in the request's key.
    pub service_name: Option<String>,
    /// Passed back with every message delivered for the request.
    pub user_context: Option<u64>,
}

#[derive(Debug)]
pub struct LogicalRequest {
    /// the application's copy of the request; its stream id is the logical stream id
    pub request: RequestMsg,
    pub state: RequestState,
    pub placement: Placement,
    pub service_target: ServiceTarget,
    pub matched_qos: Option<Qos>,
    /// set once a refresh confirmed a non-dynamic matched QoS; the QoS is not renegotiated after that
    pub has_static_qos: bool,
    pub user_context: Option<u64>,
}

impl LogicalRequest {
    pub fn new(request: RequestMsg, options: &SubmitOptions) -> Result<LogicalRequest, WatchlistError> {
        let service_target = match (&options.service_name, request.key.service_id) {
            (Some(_), Some(_)) => return Err(WatchlistError::ServiceNameAndId),
            (Some(name), None) => ServiceTarget::Name(name.clone()),
            (None, Some(id)) => ServiceTarget::Id(id),
            (None, None) => return Err(WatchlistError::NoService),
        };

        Ok(LogicalRequest {
            request,
            state: RequestState::PendingRequest,
            placement: Placement::Unplaced,
            service_target,
            matched_qos: None,
            has_static_qos: false,
            user_context: options.user_context,
        })
    }

    pub fn id(&self) -> i32 {
        self.request.stream_id
    }

    pub fn physical_stream_id(&self) -> Option<i32> {
        match self.placement {
            Placement::Attached(id) | Placement::StreamWaiting(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_awaiting_refresh(&self) -> bool {
        matches!(self.state, RequestState::RefreshPending | RequestState::RefreshCompletePending)
    }

    /// The view of a shared inbound message as it is delivered to this request. If the request
    ///  asked for its key in every message, a copy carrying the key is made for messages that
    ///  lack one.
    pub fn view_of(&self, msg: &Arc<Msg>) -> MsgView {
        let msg = if self.request.msg_key_in_updates && msg.key().is_none() {
            msg.with_key(self.request.key.clone())
                .map(Arc::new)
                .unwrap_or_else(|| msg.clone())
        }
        else {
            msg.clone()
        };

        MsgView {
            stream_id: self.id(),
            msg,
            user_context: self.user_context,
        }
    }
}


#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;
    use crate::message::msg_key::{DomainType, MsgKey};
    use crate::message::msgs::UpdateMsg;
    use super::*;

    fn update(key: Option<MsgKey>) -> Arc<Msg> {
        Arc::new(Msg::Update(UpdateMsg {
            stream_id: 5,
            domain: DomainType::MARKET_PRICE,
            key,
            update_type: 0,
            seq_num: None,
            payload: Bytes::from_static(b"abc"),
        }))
    }

    #[rstest]
    #[case::name(Some("ELEKTRON"), None, Ok(ServiceTarget::Name("ELEKTRON".to_string())))]
    #[case::id(None, Some(7), Ok(ServiceTarget::Id(7)))]
    #[case::both(Some("ELEKTRON"), Some(7), Err(WatchlistError::ServiceNameAndId))]
    #[case::neither(None, None, Err(WatchlistError::NoService))]
    fn test_service_target(#[case] name: Option<&str>, #[case] id: Option<u16>, #[case] expected: Result<ServiceTarget, WatchlistError>) {
        let mut key = MsgKey::for_name("IBM.N");
        key.service_id = id;
        let options = SubmitOptions {
            service_name: name.map(|n| n.to_string()),
            user_context: None,
        };

        let actual = LogicalRequest::new(RequestMsg::new(3, DomainType::MARKET_PRICE, key), &options)
            .map(|r| r.service_target);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_view_shares_message_without_key_in_updates() {
        let request = LogicalRequest::new(RequestMsg::new(3, DomainType::MARKET_PRICE, MsgKey::for_name("IBM.N").with_service_id(7)), &SubmitOptions::default()).unwrap();
        let msg = update(None);

        let view = request.view_of(&msg);
        assert_eq!(view.stream_id, 3);
        assert!(Arc::ptr_eq(&view.msg, &msg));
    }

    #[test]
    fn test_view_adds_key_in_updates() {
        let mut request_msg = RequestMsg::new(3, DomainType::MARKET_PRICE, MsgKey::for_name("IBM.N").with_service_id(7));
        request_msg.msg_key_in_updates = true;
        let request = LogicalRequest::new(request_msg, &SubmitOptions::default()).unwrap();
        let msg = update(None);

        let view = request.view_of(&msg);
        assert_eq!(view.msg.key(), Some(&MsgKey::for_name("IBM.N").with_service_id(7)));
        // the shared message is untouched
        assert_eq!(msg.key(), None);

        let keyed = update(Some(MsgKey::for_name("OTHER")));
        assert!(Arc::ptr_eq(&request.view_of(&keyed).msg, &keyed));
    }
}
