use std::collections::VecDeque;
use std::time::Duration;
use bytes::Bytes;
use tokio::time::Instant;

use crate::message::msgs::{Msg, Priority, RequestMsg};
use crate::message::qos::Qos;
use crate::message::state::{DataState, State};
use crate::watchlist::aggregation_key::AggregationKey;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RefreshState {
    /// no refresh outstanding
    NotRequired,
    /// request sent, no refresh received yet
    Pending,
    /// part of a multi-part refresh received
    CompletePending,
}

/// A message waiting to be written to the transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PendingSend {
    /// the stream's request as it is at the time of sending
    Request,
    Msg(Msg),
}

/// One request / response exchange with the provider, shared by all logical requests attached
///  to it.
#[derive(Debug)]
pub struct PhysicalStream {
    pub stream_id: i32,
    pub service_id: u16,
    /// `None` for private streams which are never shared
    pub aggregation_key: Option<AggregationKey>,
    /// the outbound request, merged from all attached requests
    pub request: RequestMsg,
    /// the most recent state received from the provider
    pub state: Option<State>,
    pub refresh_state: RefreshState,
    /// number of attached snapshot requests that did not get their refresh yet
    pub pending_snapshots: u32,
    pub attached: Vec<i32>,
    pub waiting: VecDeque<i32>,
    pub pending_sends: VecDeque<PendingSend>,
    /// set while a request is sent and neither refresh nor status arrived
    pub request_deadline: Option<Instant>,
    /// whether this stream's outstanding request is counted against the service's open window
    pub counts_against_window: bool,
    pub item_group: Option<Bytes>,
}

impl PhysicalStream {
    /// Derives the stream's outbound request from the first request attached to it: the service
    ///  is addressed by id, the QoS is the negotiated one, and flags that only concern the
    ///  logical request are cleared.
    pub fn new(stream_id: i32, service_id: u16, aggregation_key: Option<AggregationKey>, first: &RequestMsg, qos: Option<Qos>) -> PhysicalStream {
        let mut request = first.clone();
        request.stream_id = stream_id;
        request.key.service_id = Some(service_id);
        request.qos = qos;
        request.worst_qos = None;
        request.priority = Some(first.effective_priority());
        request.msg_key_in_updates = false;
        request.no_refresh = false;
        request.batch_item_names.clear();

        PhysicalStream {
            stream_id,
            service_id,
            aggregation_key,
            request,
            state: None,
            refresh_state: RefreshState::NotRequired,
            pending_snapshots: 0,
            attached: Vec::new(),
            waiting: VecDeque::new(),
            pending_sends: VecDeque::new(),
            request_deadline: None,
            counts_against_window: false,
            item_group: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.waiting.is_empty()
    }

    pub fn is_request_pending(&self) -> bool {
        self.request_deadline.is_some()
    }

    pub fn is_private(&self) -> bool {
        self.request.private_stream
    }

    /// A request can join the stream unless a multi-part refresh is in progress, or a snapshot
    ///  refresh is pending (which only other snapshot requests can share).
    pub fn can_attach(&self, streaming: bool) -> bool {
        match self.refresh_state {
            RefreshState::NotRequired => true,
            RefreshState::Pending => self.request.streaming || !streaming,
            RefreshState::CompletePending => false,
        }
    }

    pub fn is_suspect(&self) -> bool {
        self.state.as_ref()
            .map(|s| s.data_state == DataState::Suspect)
            .unwrap_or(false)
    }

    pub fn start_request_timer(&mut self, now: Instant, timeout: Duration) {
        self.request_deadline = Some(now + timeout);
    }

    pub fn response_received(&mut self) {
        self.request_deadline = None;
    }

    /// Recomputes the outbound request's streaming flag, priority and pause flag from the requests
    ///  attached to the stream. Priority class is the maximum and priority count the sum over all
    ///  streaming requests (or over all requests if none is streaming).
    pub fn merge_requests<'a>(&mut self, attached: impl Iterator<Item = &'a RequestMsg>, pause_all: bool) {
        let attached = attached.collect::<Vec<_>>();
        if attached.is_empty() {
            return;
        }

        let streaming = attached.iter().any(|r| r.streaming);
        let relevant = attached.iter()
            .filter(|r| r.streaming == streaming)
            .collect::<Vec<_>>();

        let mut priority = Priority { class: 0, count: 0 };
        for r in &relevant {
            let p = r.effective_priority();
            priority.class = priority.class.max(p.class);
            priority.count = priority.count.saturating_add(p.count);
        }

        self.request.streaming = streaming;
        self.request.priority = Some(priority);
        self.request.pause = pause_all || (streaming && relevant.iter().all(|r| r.pause));
    }

    /// Queues a message for sending. A queued request is sent only once, with the stream's request
    ///  as it is at that time.
    pub fn queue_send(&mut self, send: PendingSend) {
        if send == PendingSend::Request && self.pending_sends.contains(&PendingSend::Request) {
            return;
        }
        self.pending_sends.push_back(send);
    }

    pub fn msg_for(&self, send: &PendingSend) -> Msg {
        match send {
            PendingSend::Request => Msg::Request(self.request.clone()),
            PendingSend::Msg(msg) => msg.clone(),
        }
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::message::msg_key::{DomainType, MsgKey};
    use super::*;

    fn request(stream_id: i32) -> RequestMsg {
        RequestMsg::new(stream_id, DomainType::MARKET_PRICE, MsgKey::for_name("IBM.N"))
    }

    fn stream() -> PhysicalStream {
        let mut first = request(3);
        first.msg_key_in_updates = true;
        first.worst_qos = Some(Qos::delayed(5, crate::message::qos::Rate::TickByTick));
        PhysicalStream::new(11, 7, None, &first, Some(Qos::REALTIME_TICK_BY_TICK))
    }

    #[test]
    fn test_new_derives_outbound_request() {
        let stream = stream();
        assert_eq!(stream.request.stream_id, 11);
        assert_eq!(stream.request.key.service_id, Some(7));
        assert_eq!(stream.request.qos, Some(Qos::REALTIME_TICK_BY_TICK));
        assert_eq!(stream.request.worst_qos, None);
        assert_eq!(stream.request.priority, Some(Priority { class: 1, count: 1 }));
        assert!(!stream.request.msg_key_in_updates);
        assert!(stream.is_empty());
    }

    #[rstest]
    #[case::single(vec![(2, 3)], Priority { class: 2, count: 3 })]
    #[case::max_class_sum_count(vec![(2, 3), (5, 1), (1, 4)], Priority { class: 5, count: 8 })]
    #[case::defaults(vec![(1, 1), (1, 1)], Priority { class: 1, count: 2 })]
    fn test_merge_priority(#[case] priorities: Vec<(u8, u16)>, #[case] expected: Priority) {
        let requests = priorities.iter()
            .enumerate()
            .map(|(i, (class, count))| request(i as i32).with_priority(*class, *count))
            .collect::<Vec<_>>();

        let mut stream = stream();
        stream.merge_requests(requests.iter(), false);
        assert_eq!(stream.request.priority, Some(expected));
        assert!(stream.request.streaming);
    }

    #[test]
    fn test_merge_ignores_snapshots_when_streaming() {
        let requests = vec![
            request(1).with_priority(3, 2),
            request(2).with_priority(9, 9).snapshot(),
        ];
        let mut stream = stream();
        stream.merge_requests(requests.iter(), false);
        assert_eq!(stream.request.priority, Some(Priority { class: 3, count: 2 }));

        let snapshots = vec![request(2).snapshot()];
        stream.merge_requests(snapshots.iter(), false);
        assert!(!stream.request.streaming);
    }

    #[test]
    fn test_merge_pause() {
        let mut paused = request(1);
        paused.pause = true;
        let mut stream = stream();

        stream.merge_requests([paused.clone(), request(2)].iter(), false);
        assert!(!stream.request.pause);
        stream.merge_requests([paused.clone()].iter(), false);
        assert!(stream.request.pause);
        stream.merge_requests([request(2)].iter(), true);
        assert!(stream.request.pause);
    }

    #[rstest]
    #[case::idle_streaming(RefreshState::NotRequired, true, true, true)]
    #[case::idle_snapshot(RefreshState::NotRequired, false, false, true)]
    #[case::pending_streaming_joins_streaming(RefreshState::Pending, true, true, true)]
    #[case::pending_snapshot_joins_streaming(RefreshState::Pending, true, false, true)]
    #[case::pending_snapshot_joins_snapshot(RefreshState::Pending, false, false, true)]
    #[case::pending_streaming_waits_for_snapshot(RefreshState::Pending, false, true, false)]
    #[case::multi_part(RefreshState::CompletePending, true, true, false)]
    fn test_can_attach(#[case] refresh_state: RefreshState, #[case] stream_streaming: bool, #[case] request_streaming: bool, #[case] expected: bool) {
        let mut stream = stream();
        stream.refresh_state = refresh_state;
        stream.request.streaming = stream_streaming;
        assert_eq!(stream.can_attach(request_streaming), expected);
    }

    #[test]
    fn test_queue_send_deduplicates_requests() {
        let mut stream = stream();
        stream.queue_send(PendingSend::Request);
        stream.queue_send(PendingSend::Request);
        assert_eq!(stream.pending_sends.len(), 1);
    }
}
