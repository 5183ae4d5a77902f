//! The watchlist's orchestrator: maps logical requests onto shared physical streams, fans inbound
//!  messages out to them, and recovers them when streams, services or the channel fail.
//!
//! All state is owned by one [WatchlistHandler] per channel, and all calls for a channel must be
//!  serialized by the caller. Nothing in here blocks: messages the transport can not take right
//!  away are queued and retried by [WatchlistHandler::dispatch].

mod inbound;
mod recovery;
mod submit;

use std::collections::VecDeque;
use std::sync::Arc;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::message::msg_key::DomainType;
use crate::message::msgs::{CloseMsg, Msg, MsgView, StatusMsg};
use crate::message::state::{DataState, State, StreamState};
use crate::watchlist::aggregation_key::AggregationKey;
use crate::watchlist::error::WatchlistError;
use crate::watchlist::logical_request::{LogicalRequest, Placement, RequestState};
use crate::watchlist::login::LoginFeatures;
use crate::watchlist::pending_requests::{PendingRequestIndex, ServiceTarget};
use crate::watchlist::physical_stream::{PendingSend, PhysicalStream, RefreshState};
use crate::watchlist::post_tracker::PostAckTracker;
use crate::watchlist::service_view::{ServiceView, Unservable};
use crate::watchlist::transport::{SendResult, Transport};
use crate::watchlist::watchlist_config::WatchlistConfig;

pub struct WatchlistHandler<T: Transport> {
    config: Arc<WatchlistConfig>,
    transport: T,
    login: Option<LoginFeatures>,
    channel_up: bool,

    requests: FxHashMap<i32, LogicalRequest>,
    streams: FxHashMap<i32, PhysicalStream>,
    streams_by_key: FxHashMap<AggregationKey, i32>,
    services: FxHashMap<u16, ServiceView>,
    service_ids_by_name: FxHashMap<String, u16>,
    pending_requests: PendingRequestIndex,

    /// status messages for requests that could not be sent, delivered on the next dispatch
    queued_status: VecDeque<StatusMsg>,
    /// requests whose stream timed out, resubmitted on the next dispatch
    timed_out_requests: VecDeque<i32>,
    /// streams with messages the transport did not accept yet
    pending_send_streams: VecDeque<i32>,
    pending_closes: VecDeque<CloseMsg>,
    post_tracker: PostAckTracker,

    delivered: VecDeque<MsgView>,
    next_stream_id: i32,
    all_paused: bool,
    dispatch_requested: bool,
}

impl<T: Transport> WatchlistHandler<T> {
    pub fn new(config: Arc<WatchlistConfig>, transport: T) -> WatchlistHandler<T> {
        WatchlistHandler {
            next_stream_id: config.initial_stream_id,
            post_tracker: PostAckTracker::new(config.post_ack_timeout),
            config,
            transport,
            login: None,
            channel_up: true,
            requests: Default::default(),
            streams: Default::default(),
            streams_by_key: Default::default(),
            services: Default::default(),
            service_ids_by_name: Default::default(),
            pending_requests: Default::default(),
            queued_status: Default::default(),
            timed_out_requests: Default::default(),
            pending_send_streams: Default::default(),
            pending_closes: Default::default(),
            delivered: Default::default(),
            all_paused: false,
            dispatch_requested: false,
        }
    }

    pub fn config(&self) -> &WatchlistConfig {
        &self.config
    }

    /// Returns the next message for the application, in the order they were produced.
    pub fn poll_msg(&mut self) -> Option<MsgView> {
        self.delivered.pop_front()
    }

    pub fn drain_msgs(&mut self) -> Vec<MsgView> {
        self.delivered.drain(..).collect()
    }

    /// true if there is work for [WatchlistHandler::dispatch]
    pub fn needs_dispatch(&self) -> bool {
        self.dispatch_requested
    }

    /// The earliest point in time at which [WatchlistHandler::process_timeouts] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.streams.values()
            .filter_map(|s| s.request_deadline)
            .chain(self.post_tracker.next_deadline())
            .min()
    }

    pub fn request_state(&self, request_id: i32) -> Option<RequestState> {
        self.requests.get(&request_id)
            .map(|r| r.state)
    }

    pub fn request(&self, request_id: i32) -> Option<&LogicalRequest> {
        self.requests.get(&request_id)
    }

    /// The physical stream the request is attached to or waiting for.
    pub fn physical_stream_of(&self, request_id: i32) -> Option<i32> {
        self.requests.get(&request_id)
            .and_then(|r| r.physical_stream_id())
    }

    pub fn stream(&self, stream_id: i32) -> Option<&PhysicalStream> {
        self.streams.get(&stream_id)
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn num_pending_requests(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn service(&self, service_id: u16) -> Option<&ServiceView> {
        self.services.get(&service_id)
    }

    pub fn outstanding_posts(&self) -> usize {
        self.post_tracker.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn single_open(&self) -> bool {
        self.login.map(|l| l.single_open).unwrap_or(false)
    }

    fn tolerates_suspect_data(&self) -> bool {
        self.login.map(|l| l.single_open || l.allow_suspect_data).unwrap_or(false)
    }

    fn deliver(&mut self, request_id: i32, msg: &Arc<Msg>) {
        if let Some(request) = self.requests.get(&request_id) {
            let view = request.view_of(msg);
            trace!("delivering {:?} to request {}", view.msg, request_id);
            self.delivered.push_back(view);
        }
    }

    fn deliver_to_removed(&mut self, request: &LogicalRequest, msg: &Arc<Msg>) {
        trace!("delivering final {:?} to request {}", msg, request.id());
        self.delivered.push_back(request.view_of(msg));
    }

    fn resolve_service(&self, target: &ServiceTarget) -> Option<u16> {
        match target {
            ServiceTarget::Name(name) => self.service_ids_by_name.get(name).copied(),
            ServiceTarget::Id(id) => self.services.contains_key(id).then_some(*id),
        }
    }

    fn queue_status(&mut self, request_id: i32, state: State) {
        let Some(request) = self.requests.get(&request_id) else {
            return;
        };
        let status = status_msg(request_id, request.request.domain, state);
        self.queued_status.retain(|s| s.stream_id != request_id);
        self.queued_status.push_back(status);
        self.dispatch_requested = true;
    }

    /// Parks a request that can not be sent to its service right now. The application learns
    ///  about it through a queued status: open / suspect if the request will be recovered when the
    ///  service becomes available, closed otherwise.
    fn park_request(&mut self, request_id: i32, reason: Unservable) {
        let single_open = self.single_open();
        let Some(request) = self.requests.get_mut(&request_id) else {
            return;
        };
        request.state = RequestState::PendingRequest;

        // a dictionary can only be downloaded from a service the directory knows about
        let fatal = request.request.domain == DomainType::DICTIONARY && reason == Unservable::NotAvailable;
        let recoverable = !fatal && !request.request.private_stream;

        let stream_state = if fatal {
            StreamState::Closed
        }
        else if recoverable && single_open {
            StreamState::Open
        }
        else {
            StreamState::ClosedRecover
        };

        if recoverable {
            self.pending_requests.insert(&request.service_target, request_id);
            request.placement = Placement::Parked(request.service_target.clone());
        }
        else {
            request.placement = Placement::Unplaced;
        }
        debug!("request {} can not be sent to service {}: {}", request_id, request.service_target, reason.text());

        self.queue_status(request_id, State::new(stream_state, DataState::Suspect, reason.text()));
    }

    /// Sends a request to its service if possible, either on an existing physical stream or on a
    ///  new one. Otherwise the request is parked or queued, depending on why it can not be sent.
    fn open_request(&mut self, request_id: i32) -> Result<(), WatchlistError> {
        let Some(request) = self.requests.get(&request_id) else {
            return Ok(());
        };

        let service_id = self.resolve_service(&request.service_target);
        let check = match service_id.and_then(|id| self.services.get(&id)) {
            None => Err(Unservable::NotAvailable),
            Some(service) => service.check_request(request),
        };
        let (service_id, qos) = match (service_id, check) {
            (Some(service_id), Ok(qos)) => (service_id, qos),
            (_, Err(reason)) => {
                self.park_request(request_id, reason);
                return Ok(());
            }
            (None, Ok(_)) => {
                self.park_request(request_id, Unservable::NotAvailable);
                return Ok(());
            }
        };

        let is_dictionary = request.request.domain == DomainType::DICTIONARY;
        if !is_dictionary && self.config.obey_open_window {
            if let Some(service) = self.services.get_mut(&service_id) {
                if !service.is_window_open() {
                    debug!("open window of service {} is exhausted, request {} waits", service_id, request_id);
                    service.waiting.push_back(request_id);
                    if let Some(request) = self.requests.get_mut(&request_id) {
                        request.state = RequestState::PendingRequest;
                        request.placement = Placement::ServiceWaiting(service_id);
                    }
                    return Ok(());
                }
            }
        }

        if let Some(request) = self.requests.get_mut(&request_id) {
            request.matched_qos = qos;
        }
        self.attach_to_stream(request_id, service_id)
    }

    fn attach_to_stream(&mut self, request_id: i32, service_id: u16) -> Result<(), WatchlistError> {
        let Some(request) = self.requests.get(&request_id) else {
            return Ok(());
        };
        let streaming = request.request.streaming;
        let aggregation_key = if request.request.private_stream {
            None
        }
        else {
            Some(AggregationKey::new(&request.request.key, service_id, request.request.domain, request.matched_qos))
        };

        let existing = aggregation_key.as_ref()
            .and_then(|k| self.streams_by_key.get(k))
            .copied();

        let stream_id = match existing {
            Some(stream_id) => stream_id,
            None => {
                // ids start over when exhausted, skipping those still in use
                let mut stream_id = self.next_stream_id;
                while self.streams.contains_key(&stream_id) {
                    stream_id = stream_id.checked_add(1).unwrap_or(self.config.initial_stream_id);
                }
                self.next_stream_id = stream_id.checked_add(1)
                    .unwrap_or(self.config.initial_stream_id);
                debug!("opening physical stream {} for {:?} on service {}", stream_id, request.request.key.name_lossy(), service_id);

                let stream = PhysicalStream::new(stream_id, service_id, aggregation_key.clone(), &request.request, request.matched_qos);
                if let Some(key) = aggregation_key {
                    self.streams_by_key.insert(key, stream_id);
                }
                if let Some(service) = self.services.get_mut(&service_id) {
                    service.streams.insert(stream_id);
                }
                self.streams.insert(stream_id, stream);
                stream_id
            }
        };

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let Some(request) = self.requests.get_mut(&request_id) else {
            return Ok(());
        };

        if !stream.can_attach(streaming) {
            trace!("stream {} has a refresh in progress, request {} waits", stream_id, request_id);
            stream.waiting.push_back(request_id);
            request.state = RequestState::PendingRequest;
            request.placement = Placement::StreamWaiting(stream_id);
            return Ok(());
        }

        // a snapshot joining a refresh that is already on its way needs no request of its own
        let joins_pending_refresh = !streaming && stream.refresh_state == RefreshState::Pending;

        stream.attached.push(request_id);
        if !streaming {
            stream.pending_snapshots += 1;
        }
        request.placement = Placement::Attached(stream_id);
        let no_refresh = request.request.no_refresh;
        request.state = if no_refresh {
            RequestState::Open
        }
        else {
            RequestState::RefreshPending
        };

        if joins_pending_refresh {
            return Ok(());
        }

        self.merge_stream_request(stream_id);
        self.send_stream_request(stream_id, no_refresh)
    }

    fn merge_stream_request(&mut self, stream_id: i32) {
        let all_paused = self.all_paused;
        let requests = &self.requests;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let attached = stream.attached.clone();
            stream.merge_requests(
                attached.iter()
                    .filter_map(|id| requests.get(id))
                    .map(|r| &r.request),
                all_paused,
            );
        }
    }

    /// Sends the stream's request. Without `no_refresh`, this (re)starts the request timer and
    ///  counts the stream against its service's open window.
    fn send_stream_request(&mut self, stream_id: i32, no_refresh: bool) -> Result<(), WatchlistError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        if no_refresh {
            let mut request = stream.request.clone();
            request.no_refresh = true;
            return self.send_on_stream(stream_id, PendingSend::Msg(Msg::Request(request)));
        }

        if !stream.counts_against_window && stream.request.domain != DomainType::DICTIONARY {
            stream.counts_against_window = true;
            if let Some(service) = self.services.get_mut(&stream.service_id) {
                service.outstanding_requests += 1;
            }
        }
        stream.refresh_state = RefreshState::Pending;
        stream.start_request_timer(Instant::now(), self.config.request_timeout);

        self.send_on_stream(stream_id, PendingSend::Request)
    }

    fn release_window(&mut self, stream_id: i32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.counts_against_window {
                stream.counts_against_window = false;
                if let Some(service) = self.services.get_mut(&stream.service_id) {
                    service.outstanding_requests = service.outstanding_requests.saturating_sub(1);
                }
            }
        }
    }

    fn send_on_stream(&mut self, stream_id: i32, send: PendingSend) -> Result<(), WatchlistError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        if self.channel_up && stream.pending_sends.is_empty() {
            let msg = stream.msg_for(&send);
            match self.transport.send_msg(&msg) {
                SendResult::Ok => {
                    trace!("sent {:?}", msg);
                    return Ok(());
                }
                SendResult::WouldBlock => {
                    debug!("transport would block, queueing message for stream {}", stream_id);
                    self.dispatch_requested = true;
                }
                SendResult::Fatal(e) => {
                    error!("error sending message on stream {}: {}", stream_id, e);
                    return Err(WatchlistError::Transport(e));
                }
            }
        }

        stream.queue_send(send);
        if !self.pending_send_streams.contains(&stream_id) {
            self.pending_send_streams.push_back(stream_id);
        }
        Ok(())
    }

    fn send_close(&mut self, stream_id: i32, domain: DomainType) {
        let close = CloseMsg { stream_id, domain };
        if self.channel_up && self.pending_closes.is_empty() {
            match self.transport.send_msg(&Msg::Close(close.clone())) {
                SendResult::Ok => return,
                SendResult::WouldBlock => {}
                SendResult::Fatal(e) => {
                    error!("error sending close for stream {}: {}", stream_id, e);
                    return;
                }
            }
        }
        self.pending_closes.push_back(close);
        self.dispatch_requested = true;
    }

    /// Retries queued messages in the order they were queued, stopping at the first one the
    ///  transport does not accept.
    fn flush_pending_sends(&mut self) -> Result<(), WatchlistError> {
        if !self.channel_up {
            return Ok(());
        }

        let mut remaining = self.pending_send_streams.len();
        while remaining > 0 {
            remaining -= 1;
            let Some(stream_id) = self.pending_send_streams.pop_front() else {
                break;
            };
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };

            while let Some(send) = stream.pending_sends.front() {
                let msg = stream.msg_for(send);
                match self.transport.send_msg(&msg) {
                    SendResult::Ok => {
                        trace!("sent queued {:?}", msg);
                        stream.pending_sends.pop_front();
                    }
                    SendResult::WouldBlock => {
                        self.pending_send_streams.push_front(stream_id);
                        self.dispatch_requested = true;
                        return Ok(());
                    }
                    SendResult::Fatal(e) => {
                        error!("error sending queued message on stream {}: {}", stream_id, e);
                        self.pending_send_streams.push_front(stream_id);
                        return Err(WatchlistError::Transport(e));
                    }
                }
            }
        }

        while let Some(close) = self.pending_closes.front() {
            match self.transport.send_msg(&Msg::Close(close.clone())) {
                SendResult::Ok => {
                    self.pending_closes.pop_front();
                }
                SendResult::WouldBlock => {
                    self.dispatch_requested = true;
                    return Ok(());
                }
                SendResult::Fatal(e) => return Err(WatchlistError::Transport(e)),
            }
        }
        Ok(())
    }

    /// Removes a physical stream from all indexes. Its queued messages and tracked posts are
    ///  discarded, and its timer stops.
    fn close_stream(&mut self, stream_id: i32, send_close: bool) -> Option<PhysicalStream> {
        self.release_window(stream_id);
        let stream = self.streams.remove(&stream_id)?;
        debug!("closing physical stream {}", stream_id);

        if let Some(key) = &stream.aggregation_key {
            if self.streams_by_key.get(key) == Some(&stream_id) {
                self.streams_by_key.remove(key);
            }
        }
        self.pending_send_streams.retain(|id| *id != stream_id);
        if let Some(service) = self.services.get_mut(&stream.service_id) {
            service.streams.remove(&stream_id);
            if let Some(group) = &stream.item_group {
                service.remove_from_item_group(group, stream_id);
            }
        }

        let num_dropped_posts = self.post_tracker.remove_stream(stream_id);
        if num_dropped_posts > 0 {
            debug!("discarding {} unacknowledged posts of stream {}", num_dropped_posts, stream_id);
        }

        if send_close {
            self.send_close(stream_id, stream.request.domain);
        }
        Some(stream)
    }

    /// returns true if the stream was closed
    fn close_stream_if_empty(&mut self, stream_id: i32, send_close: bool) -> bool {
        let is_empty = self.streams.get(&stream_id)
            .map(|s| s.is_empty())
            .unwrap_or(false);
        if is_empty {
            self.close_stream(stream_id, send_close);
        }
        is_empty
    }

    /// Removes a request from the handler and from wherever it is placed. Physical streams it
    ///  leaves are not closed here, even if they become empty.
    fn remove_request(&mut self, request_id: i32) -> Option<LogicalRequest> {
        let request = self.requests.remove(&request_id)?;

        match &request.placement {
            Placement::Unplaced => {}
            Placement::Parked(target) => {
                self.pending_requests.remove(target, request_id);
            }
            Placement::ServiceWaiting(service_id) => {
                if let Some(service) = self.services.get_mut(service_id) {
                    service.waiting.retain(|id| *id != request_id);
                }
            }
            Placement::StreamWaiting(stream_id) => {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.waiting.retain(|id| *id != request_id);
                }
            }
            Placement::Attached(stream_id) => {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.attached.retain(|id| *id != request_id);
                    if !request.request.streaming && request.is_awaiting_refresh() {
                        stream.pending_snapshots = stream.pending_snapshots.saturating_sub(1);
                    }
                }
            }
        }

        self.queued_status.retain(|s| s.stream_id != request_id);
        self.timed_out_requests.retain(|id| *id != request_id);
        Some(request)
    }

    fn join_item_group(&mut self, stream_id: i32, group_id: &Bytes) {
        if group_id.is_empty() {
            return;
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        if stream.item_group.as_ref() == Some(group_id) {
            return;
        }

        let previous = stream.item_group.replace(group_id.clone());
        if let Some(service) = self.services.get_mut(&stream.service_id) {
            if let Some(previous) = previous {
                service.remove_from_item_group(&previous, stream_id);
            }
            service.add_to_item_group(group_id.clone(), stream_id);
        }
    }

    /// Sends the next request waiting for the service's open window, if the window has room.
    fn drain_service_waiting(&mut self, service_id: u16) -> Result<(), WatchlistError> {
        let next = self.services.get_mut(&service_id)
            .filter(|s| s.is_window_open())
            .and_then(|s| s.waiting.pop_front());
        if let Some(request_id) = next {
            if let Some(request) = self.requests.get_mut(&request_id) {
                request.placement = Placement::Unplaced;
            }
            self.open_request(request_id)?;
        }
        Ok(())
    }

    /// Sends the requests waiting for the stream's refresh to complete, until one of them starts
    ///  a new refresh.
    fn drain_stream_waiting(&mut self, stream_id: i32) -> Result<(), WatchlistError> {
        loop {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            if stream.refresh_state != RefreshState::NotRequired {
                break;
            }
            let Some(request_id) = stream.waiting.pop_front() else {
                break;
            };
            if let Some(request) = self.requests.get_mut(&request_id) {
                request.placement = Placement::Unplaced;
            }
            self.open_request(request_id)?;
        }

        self.close_stream_if_empty(stream_id, true);
        Ok(())
    }
}

fn status_msg(stream_id: i32, domain: DomainType, state: State) -> StatusMsg {
    StatusMsg {
        stream_id,
        domain,
        key: None,
        state: Some(state),
        group_id: None,
        payload: Bytes::new(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use crate::message::msg_key::{DomainType, MsgKey};
    use crate::message::msgs::{Msg, RequestMsg};
    use crate::message::qos::Qos;
    use crate::message::state::{DataState, State, StreamState};
    use crate::test_util::msgs::{refresh, service_info, status, update};
    use crate::test_util::tracking_transport::TrackingTransport;
    use crate::watchlist::logical_request::{RequestState, SubmitOptions};
    use crate::watchlist::login::LoginFeatures;
    use crate::watchlist::transport::ChannelEvent;
    use crate::watchlist::watchlist_config::WatchlistConfig;
    use super::WatchlistHandler;

    fn handler() -> (WatchlistHandler<TrackingTransport>, TrackingTransport) {
        let transport = TrackingTransport::new();
        let mut handler = WatchlistHandler::new(Arc::new(WatchlistConfig::new()), transport.clone());
        handler.on_login_established(LoginFeatures::new()).unwrap();
        (handler, transport)
    }

    fn by_name() -> SubmitOptions {
        SubmitOptions {
            service_name: Some("ELEKTRON".to_string()),
            user_context: None,
        }
    }

    fn ibm(stream_id: i32) -> RequestMsg {
        RequestMsg::new(stream_id, DomainType::MARKET_PRICE, MsgKey::for_name("IBM.N"))
            .with_qos(Qos::REALTIME_TICK_BY_TICK)
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_waits_for_service_then_opens() {
        let (mut handler, transport) = handler();

        assert_eq!(handler.submit(ibm(3), by_name()), Ok(3));
        assert_eq!(handler.request_state(3), Some(RequestState::PendingRequest));
        assert_eq!(handler.num_pending_requests(), 1);
        transport.assert_no_remaining_msgs();

        assert!(handler.needs_dispatch());
        handler.dispatch().unwrap();
        let msgs = handler.drain_msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].stream_id, 3);
        match msgs[0].msg.as_ref() {
            Msg::Status(s) => assert_eq!(s.state, Some(State::new(StreamState::Open, DataState::Suspect, "Service not available"))),
            other => panic!("unexpected {:?}", other),
        }

        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        let sent = transport.pop_request();
        assert_eq!(sent.key, MsgKey::for_name("IBM.N").with_service_id(7));
        assert_eq!(sent.stream_id, 5);
        assert_eq!(handler.num_pending_requests(), 0);
        assert_eq!(handler.request_state(3), Some(RequestState::RefreshPending));

        handler.on_msg(Msg::Refresh(refresh(5, true))).unwrap();
        assert_eq!(handler.request_state(3), Some(RequestState::Open));
        let msgs = handler.drain_msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].stream_id, 3);
        assert!(matches!(msgs[0].msg.as_ref(), Msg::Refresh(_)));
        assert!(handler.drain_msgs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregated_requests_recover_after_channel_down() {
        let (mut handler, transport) = handler();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();

        handler.submit(ibm(3), by_name()).unwrap();
        handler.submit(ibm(4), by_name()).unwrap();
        assert_eq!(handler.num_streams(), 1);
        assert_eq!(handler.physical_stream_of(3), Some(5));
        assert_eq!(handler.physical_stream_of(4), Some(5));
        assert_eq!(handler.stream(5).unwrap().attached, vec![3, 4]);
        assert_eq!(transport.take_sent().len(), 2);

        handler.on_msg(Msg::Refresh(refresh(5, true))).unwrap();
        assert_eq!(handler.drain_msgs().len(), 2);

        handler.on_channel_event(ChannelEvent::DownRecoverable).unwrap();
        let msgs = handler.drain_msgs();
        assert_eq!(msgs.iter().map(|m| m.stream_id).collect::<Vec<_>>(), vec![3, 4]);
        for m in &msgs {
            match m.msg.as_ref() {
                Msg::Status(s) => {
                    let state = s.state.as_ref().unwrap();
                    assert_eq!(state.stream_state, StreamState::Open);
                    assert_eq!(state.data_state, DataState::Suspect);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(handler.request_state(3), Some(RequestState::PendingRequest));
        assert_eq!(handler.request_state(4), Some(RequestState::PendingRequest));
        assert_eq!(handler.num_streams(), 0);
        assert_eq!(handler.num_pending_requests(), 2);

        // a second channel down has nothing left to do
        handler.on_channel_event(ChannelEvent::DownRecoverable).unwrap();
        assert!(handler.drain_msgs().is_empty());
        assert_eq!(handler.num_pending_requests(), 2);

        handler.on_channel_event(ChannelEvent::Up).unwrap();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        assert_eq!(handler.num_streams(), 1);
        let stream_id = handler.physical_stream_of(3).unwrap();
        assert_eq!(handler.physical_stream_of(4), Some(stream_id));
        assert_eq!(handler.stream(stream_id).unwrap().attached, vec![3, 4]);
        assert!(!transport.take_sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_part_refresh() {
        let (mut handler, transport) = handler();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        handler.submit(ibm(3), by_name()).unwrap();
        transport.pop_request();

        let first_deadline = handler.next_deadline().unwrap();
        tokio::time::advance(std::time::Duration::from_secs(1)).await;

        handler.on_msg(Msg::Refresh(refresh(5, false))).unwrap();
        assert_eq!(handler.request_state(3), Some(RequestState::RefreshCompletePending));
        assert_eq!(handler.stream(5).unwrap().refresh_state, super::RefreshState::CompletePending);
        let second_deadline = handler.next_deadline().unwrap();
        assert!(second_deadline > first_deadline);

        // each further part restarts the timer
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        handler.on_msg(Msg::Refresh(refresh(5, false))).unwrap();
        assert_eq!(handler.request_state(3), Some(RequestState::RefreshCompletePending));
        assert!(handler.next_deadline().unwrap() > second_deadline);

        handler.on_msg(Msg::Refresh(refresh(5, true))).unwrap();
        assert_eq!(handler.request_state(3), Some(RequestState::Open));
        assert_eq!(handler.stream(5).unwrap().refresh_state, super::RefreshState::NotRequired);
        assert_eq!(handler.next_deadline(), None);
        assert_eq!(handler.drain_msgs().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ids_start_over_when_exhausted() {
        let (mut handler, transport) = handler();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        handler.submit(ibm(3), by_name()).unwrap();
        assert_eq!(transport.pop_request().stream_id, 5);

        handler.next_stream_id = i32::MAX;
        let msft = RequestMsg::new(4, DomainType::MARKET_PRICE, MsgKey::for_name("MSFT.O"));
        handler.submit(msft, by_name()).unwrap();
        assert_eq!(transport.pop_request().stream_id, i32::MAX);

        // 5 is still in use
        let tri = RequestMsg::new(6, DomainType::MARKET_PRICE, MsgKey::for_name("TRI.N"));
        handler.submit(tri, by_name()).unwrap();
        assert_eq!(transport.pop_request().stream_id, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_multi_part_refresh_times_out() {
        let (mut handler, transport) = handler();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        handler.submit(ibm(3), by_name()).unwrap();
        transport.pop_request();

        handler.on_msg(Msg::Refresh(refresh(5, false))).unwrap();
        handler.on_msg(Msg::Refresh(refresh(5, false))).unwrap();
        handler.drain_msgs();

        let deadline = handler.next_deadline().unwrap();
        tokio::time::advance(deadline - tokio::time::Instant::now()).await;
        handler.process_timeouts().unwrap();
        assert!(matches!(transport.pop_sent(), Some(Msg::Close(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_only_reach_open_requests() {
        let (mut handler, _transport) = handler();
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();
        handler.submit(ibm(3), by_name()).unwrap();

        handler.on_msg(Msg::Update(update(5))).unwrap();
        assert!(handler.drain_msgs().is_empty());

        handler.on_msg(Msg::Refresh(refresh(5, true))).unwrap();
        handler.on_msg(Msg::Update(update(5))).unwrap();
        let msgs = handler.drain_msgs();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[1].msg.as_ref(), Msg::Update(_)));
        assert_eq!(msgs[1].stream_id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_for_unknown_stream_is_dropped() {
        let (mut handler, _transport) = handler();
        handler.on_msg(Msg::Status(status(99, State::open_ok()))).unwrap();
        assert!(handler.drain_msgs().is_empty());
    }
}
