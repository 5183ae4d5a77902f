use std::collections::VecDeque;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::message::msg_key::DomainType;
use crate::message::qos::Qos;
use crate::watchlist::logical_request::LogicalRequest;
use crate::watchlist::qos_matcher::match_qos;

/// A service as announced by the directory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    pub service_id: u16,
    pub name: String,
    pub service_up: bool,
    pub accepting_requests: bool,
    pub capabilities: Vec<DomainType>,
    pub qos: Vec<Qos>,
    /// Maximum number of requests that may be outstanding at a time; `None` for no limit.
    ///  Zero closes the window.
    pub open_window: Option<u32>,
}

/// Why a request can not be sent to a service at the moment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Unservable {
    NotAvailable,
    NotUp,
    CapabilityNotSupported,
    NoMatchingQos,
}
impl Unservable {
    pub fn text(&self) -> &'static str {
        match self {
            Unservable::NotAvailable => "Service not available",
            Unservable::NotUp => "Service not up",
            Unservable::CapabilityNotSupported => "Capability not supported",
            Unservable::NoMatchingQos => "Service does not provide a matching QoS",
        }
    }
}

#[derive(Debug)]
pub struct ServiceView {
    pub info: ServiceInfo,
    /// number of requests sent to the service that did not get a final response yet
    pub outstanding_requests: u32,
    pub streams: FxHashSet<i32>,
    /// requests waiting for the open window
    pub waiting: VecDeque<i32>,
    item_groups: FxHashMap<Bytes, FxHashSet<i32>>,
}

impl ServiceView {
    pub fn new(info: ServiceInfo) -> ServiceView {
        ServiceView {
            info,
            outstanding_requests: 0,
            streams: Default::default(),
            waiting: Default::default(),
            item_groups: Default::default(),
        }
    }

    pub fn is_servable(&self) -> bool {
        self.info.service_up && self.info.accepting_requests
    }

    pub fn is_window_open(&self) -> bool {
        match self.info.open_window {
            None => true,
            Some(window) => self.outstanding_requests < window,
        }
    }

    /// Determines whether the service can serve the request now, and with which QoS. Dictionary
    ///  requests are not QoS-negotiated and match with `None`.
    pub fn check_request(&self, request: &LogicalRequest) -> Result<Option<Qos>, Unservable> {
        if !self.is_servable() {
            return Err(Unservable::NotUp);
        }
        if !self.info.capabilities.contains(&request.request.domain) {
            return Err(Unservable::CapabilityNotSupported);
        }
        if request.request.domain == DomainType::DICTIONARY {
            return Ok(None);
        }
        if request.has_static_qos {
            if let Some(qos) = request.matched_qos {
                return Ok(Some(qos));
            }
        }

        match_qos(request.request.qos.as_ref(), request.request.worst_qos.as_ref(), &self.info.qos)
            .map(Some)
            .ok_or(Unservable::NoMatchingQos)
    }

    pub fn add_to_item_group(&mut self, group_id: Bytes, stream_id: i32) {
        self.item_groups.entry(group_id).or_default().insert(stream_id);
    }

    pub fn remove_from_item_group(&mut self, group_id: &Bytes, stream_id: i32) {
        if let Some(group) = self.item_groups.get_mut(group_id) {
            group.remove(&stream_id);
            if group.is_empty() {
                self.item_groups.remove(group_id);
            }
        }
    }

    pub fn item_group_streams(&self, group_id: &Bytes) -> Vec<i32> {
        let mut result = self.item_groups.get(group_id)
            .map(|g| g.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        result.sort();
        result
    }

    /// Moves all streams of `from` into `to`, returning the streams that were moved.
    pub fn merge_item_groups(&mut self, from: &Bytes, to: &Bytes) -> Vec<i32> {
        let Some(moved) = self.item_groups.remove(from) else {
            return Vec::new();
        };
        self.item_groups.entry(to.clone()).or_default().extend(moved.iter().copied());

        let mut result = moved.into_iter().collect::<Vec<_>>();
        result.sort();
        result
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::message::msg_key::MsgKey;
    use crate::message::msgs::RequestMsg;
    use crate::message::qos::Rate::*;
    use crate::message::qos::Timeliness::*;
    use crate::watchlist::logical_request::SubmitOptions;
    use super::*;

    fn info() -> ServiceInfo {
        ServiceInfo {
            service_id: 7,
            name: "ELEKTRON".to_string(),
            service_up: true,
            accepting_requests: true,
            capabilities: vec![DomainType::MARKET_PRICE, DomainType::DICTIONARY],
            qos: vec![Qos::REALTIME_TICK_BY_TICK],
            open_window: None,
        }
    }

    fn request(domain: DomainType, qos: Option<Qos>) -> LogicalRequest {
        let mut msg = RequestMsg::new(3, domain, MsgKey::for_name("IBM.N").with_service_id(7));
        msg.qos = qos;
        LogicalRequest::new(msg, &SubmitOptions::default()).unwrap()
    }

    #[rstest]
    #[case::ok(info(), DomainType::MARKET_PRICE, None, Ok(Some(Qos::REALTIME_TICK_BY_TICK)))]
    #[case::down(ServiceInfo { service_up: false, ..info() }, DomainType::MARKET_PRICE, None, Err(Unservable::NotUp))]
    #[case::not_accepting(ServiceInfo { accepting_requests: false, ..info() }, DomainType::MARKET_PRICE, None, Err(Unservable::NotUp))]
    #[case::capability(info(), DomainType::MARKET_BY_ORDER, None, Err(Unservable::CapabilityNotSupported))]
    #[case::qos(info(), DomainType::MARKET_PRICE, Some(Qos::delayed(3, TickByTick)), Err(Unservable::NoMatchingQos))]
    #[case::dictionary_ignores_qos(info(), DomainType::DICTIONARY, Some(Qos::new(DelayedUnknown, JitConflated)), Ok(None))]
    fn test_check_request(#[case] info: ServiceInfo, #[case] domain: DomainType, #[case] qos: Option<Qos>, #[case] expected: Result<Option<Qos>, Unservable>) {
        let view = ServiceView::new(info);
        assert_eq!(view.check_request(&request(domain, qos)), expected);
    }

    #[test]
    fn test_static_qos_is_reused() {
        let view = ServiceView::new(info());
        let mut request = request(DomainType::MARKET_PRICE, Some(Qos::delayed(3, TickByTick)));
        request.matched_qos = Some(Qos::delayed(3, TickByTick));
        request.has_static_qos = true;

        assert_eq!(view.check_request(&request), Ok(Some(Qos::delayed(3, TickByTick))));
    }

    #[rstest]
    #[case::unlimited(None, 100, true)]
    #[case::closed(Some(0), 0, false)]
    #[case::below(Some(2), 1, true)]
    #[case::exhausted(Some(2), 2, false)]
    fn test_is_window_open(#[case] open_window: Option<u32>, #[case] outstanding: u32, #[case] expected: bool) {
        let mut view = ServiceView::new(ServiceInfo { open_window, ..info() });
        view.outstanding_requests = outstanding;
        assert_eq!(view.is_window_open(), expected);
    }

    #[test]
    fn test_item_groups() {
        let mut view = ServiceView::new(info());
        let a = Bytes::from_static(b"a");
        let b = Bytes::from_static(b"b");

        view.add_to_item_group(a.clone(), 5);
        view.add_to_item_group(a.clone(), 6);
        view.add_to_item_group(b.clone(), 7);
        assert_eq!(view.item_group_streams(&a), vec![5, 6]);

        assert_eq!(view.merge_item_groups(&a, &b), vec![5, 6]);
        assert!(view.item_group_streams(&a).is_empty());
        assert_eq!(view.item_group_streams(&b), vec![5, 6, 7]);

        view.remove_from_item_group(&b, 6);
        assert_eq!(view.item_group_streams(&b), vec![5, 7]);
    }
}
