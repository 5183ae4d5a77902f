use bytes::Bytes;

use crate::message::msg_key::DomainType;
use crate::message::msgs::{AckMsg, GenericMsg, NakCode, PostMsg, RefreshMsg, StatusMsg, UpdateMsg};
use crate::message::qos::Qos;
use crate::message::state::State;
use crate::watchlist::service_view::ServiceInfo;

/// An up service providing market price and dictionaries in realtime, without open window.
pub fn service_info(service_id: u16, name: &str) -> ServiceInfo {
    ServiceInfo {
        service_id,
        name: name.to_string(),
        service_up: true,
        accepting_requests: true,
        capabilities: vec![DomainType::MARKET_PRICE, DomainType::DICTIONARY],
        qos: vec![Qos::REALTIME_TICK_BY_TICK],
        open_window: None,
    }
}

/// A solicited open / ok market price refresh.
pub fn refresh(stream_id: i32, complete: bool) -> RefreshMsg {
    RefreshMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        key: None,
        state: State::open_ok(),
        qos: Some(Qos::REALTIME_TICK_BY_TICK),
        solicited: true,
        complete,
        clear_cache: true,
        group_id: Bytes::new(),
        seq_num: None,
        part_num: None,
        payload: Bytes::from_static(b"refresh"),
    }
}

pub fn update(stream_id: i32) -> UpdateMsg {
    UpdateMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        key: None,
        update_type: 0,
        seq_num: None,
        payload: Bytes::from_static(b"update"),
    }
}

pub fn status(stream_id: i32, state: State) -> StatusMsg {
    StatusMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        key: None,
        state: Some(state),
        group_id: None,
        payload: Bytes::new(),
    }
}

pub fn generic(stream_id: i32) -> GenericMsg {
    GenericMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        key: None,
        seq_num: None,
        complete: true,
        payload: Bytes::from_static(b"generic"),
    }
}

pub fn post(stream_id: i32, post_id: u32, seq_num: Option<u32>, ack_requested: bool) -> PostMsg {
    PostMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        key: None,
        post_id: Some(post_id),
        seq_num,
        ack_requested,
        post_complete: true,
        payload: Bytes::from_static(b"post"),
    }
}

pub fn ack(stream_id: i32, ack_id: u32, seq_num: Option<u32>, nak_code: Option<NakCode>) -> AckMsg {
    AckMsg {
        stream_id,
        domain: DomainType::MARKET_PRICE,
        ack_id,
        seq_num,
        nak_code,
        text: None,
        key: None,
    }
}

/// The item names of a batch request.
pub fn batch_names(names: &[&str]) -> Vec<Bytes> {
    names.iter()
        .map(|n| Bytes::copy_from_slice(n.as_bytes()))
        .collect()
}
