use std::sync::Arc;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::message::msgs::{AckMsg, Msg, NakCode};
use crate::message::state::{DataState, State, StateCode, StreamState};
use crate::watchlist::error::WatchlistError;
use crate::watchlist::item_handler::{status_msg, WatchlistHandler};
use crate::watchlist::logical_request::{Placement, RequestState};
use crate::watchlist::login::LoginFeatures;
use crate::watchlist::post_tracker::PendingPost;
use crate::watchlist::service_view::{ServiceInfo, ServiceView};
use crate::watchlist::transport::{ChannelEvent, Transport};

impl<T: Transport> WatchlistHandler<T> {
    /// Requests can only be submitted after login. Requests parked before (e.g. during a
    ///  reconnect) are sent now if their service is available.
    pub fn on_login_established(&mut self, features: LoginFeatures) -> Result<(), WatchlistError> {
        info!("login established: {:?}", features);
        self.login = Some(features);

        for service_id in self.sorted_service_ids() {
            self.release_pending_for_service(service_id)?;
        }
        Ok(())
    }

    pub fn on_login_stream_closed(&mut self, state: &State) {
        warn!("login stream closed: {:?}", state);
        let text = if state.text.is_empty() {
            "Login stream was closed."
        }
        else {
            state.text.as_str()
        };

        if state.stream_state == StreamState::ClosedRecover {
            let closed = State::new(StreamState::ClosedRecover, DataState::Suspect, text).with_code(state.code);
            let recover = self.single_open();
            self.tear_down_all_streams(&closed, recover);
        }
        else {
            let closed = State::new(StreamState::Closed, DataState::Suspect, text).with_code(state.code);
            self.tear_down_all_streams(&closed, false);
            self.close_all_requests(&closed);
        }
        self.login = None;
    }

    /// Without a directory, no service is known any more.
    pub fn on_directory_stream_closed(&mut self, state: &State) {
        warn!("directory stream closed: {:?}", state);
        let stream_state = if state.stream_state == StreamState::ClosedRecover {
            StreamState::ClosedRecover
        }
        else {
            StreamState::Closed
        };
        let text = if state.text.is_empty() {
            "Directory stream was closed."
        }
        else {
            state.text.as_str()
        };

        let closed = State::new(stream_state, DataState::Suspect, text).with_code(state.code);
        for service_id in self.sorted_service_ids() {
            self.remove_service(service_id, &closed);
        }
    }

    pub fn on_channel_event(&mut self, event: ChannelEvent) -> Result<(), WatchlistError> {
        match event {
            ChannelEvent::Up => {
                info!("channel up");
                self.channel_up = true;
                self.dispatch_requested = true;
            }
            ChannelEvent::Ready => {
                self.dispatch_requested = true;
            }
            ChannelEvent::DownRecoverable => {
                warn!("channel down, streams will be recovered");
                self.channel_up = false;
                self.pending_closes.clear();
                let closed = State::new(StreamState::ClosedRecover, DataState::Suspect, "channel down.");
                for service_id in self.sorted_service_ids() {
                    self.remove_service(service_id, &closed);
                }
            }
            ChannelEvent::Down => {
                warn!("channel down");
                self.channel_up = false;
                self.pending_closes.clear();
                let closed = State::new(StreamState::Closed, DataState::Suspect, "channel down.");
                for service_id in self.sorted_service_ids() {
                    self.remove_service(service_id, &closed);
                }
                self.close_all_requests(&closed);
            }
        }
        Ok(())
    }

    pub fn on_service_added(&mut self, info: ServiceInfo) -> Result<(), WatchlistError> {
        self.upsert_service(info)
    }

    /// A service that stops accepting requests leaves its streams in place, but their requests
    ///  are told their data is suspect.
    pub fn on_service_updated(&mut self, info: ServiceInfo) -> Result<(), WatchlistError> {
        let service_id = info.service_id;
        let was_servable = self.services.get(&service_id)
            .map(|s| s.is_servable())
            .unwrap_or(false);

        self.upsert_service(info)?;

        let is_servable = self.services.get(&service_id)
            .map(|s| s.is_servable())
            .unwrap_or(false);
        if was_servable && !is_servable {
            debug!("service {} went down", service_id);
            let mut stream_ids = self.services.get(&service_id)
                .map(|s| s.streams.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default();
            stream_ids.sort();
            for stream_id in stream_ids {
                self.apply_stream_status(stream_id, State::new(StreamState::Open, DataState::Suspect, "Service down"))?;
            }
        }
        Ok(())
    }

    pub fn on_service_deleted(&mut self, service_id: u16) {
        let closed = State::new(StreamState::ClosedRecover, DataState::Suspect, "Service for this item was lost.");
        self.remove_service(service_id, &closed);
    }

    /// Applies a status the directory sent for an item group to every stream in that group.
    pub fn on_group_status(&mut self, service_id: u16, group_id: &Bytes, state: State) -> Result<(), WatchlistError> {
        let stream_ids = self.services.get(&service_id)
            .map(|s| s.item_group_streams(group_id))
            .unwrap_or_default();
        debug!("group status {:?} for {} streams of service {}", state, stream_ids.len(), service_id);

        for stream_id in stream_ids {
            self.apply_stream_status(stream_id, state.clone())?;
        }
        Ok(())
    }

    pub fn on_group_merged(&mut self, service_id: u16, from: &Bytes, to: &Bytes) {
        let Some(service) = self.services.get_mut(&service_id) else {
            return;
        };
        for stream_id in service.merge_item_groups(from, to) {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.item_group = Some(to.clone());
            }
        }
    }

    /// Delivers queued status messages, resubmits requests whose stream timed out, and retries
    ///  messages the transport did not accept earlier.
    pub fn dispatch(&mut self) -> Result<(), WatchlistError> {
        self.dispatch_requested = false;

        while let Some(status) = self.queued_status.pop_front() {
            let request_id = status.stream_id;
            let is_final = status.state.as_ref()
                .map(|s| s.stream_state != StreamState::Open)
                .unwrap_or(false);
            let msg = Arc::new(Msg::Status(status));

            if is_final {
                if let Some(request) = self.remove_request(request_id) {
                    self.deliver_to_removed(&request, &msg);
                }
            }
            else {
                self.deliver(request_id, &msg);
            }
        }

        while let Some(request_id) = self.timed_out_requests.pop_front() {
            self.open_request(request_id)?;
        }

        self.flush_pending_sends()
    }

    /// Expires outstanding requests and posts whose deadline has passed.
    pub fn process_timeouts(&mut self) -> Result<(), WatchlistError> {
        let now = Instant::now();

        let mut expired_streams = self.streams.values()
            .filter(|s| s.request_deadline.map(|d| d <= now).unwrap_or(false))
            .map(|s| s.stream_id)
            .collect::<Vec<_>>();
        expired_streams.sort();
        for stream_id in expired_streams {
            self.on_request_timeout(stream_id)?;
        }

        for post in self.post_tracker.take_expired(now) {
            self.nak_expired_post(post);
        }
        Ok(())
    }

    fn on_request_timeout(&mut self, stream_id: i32) -> Result<(), WatchlistError> {
        let single_open = self.single_open();
        let Some(stream) = self.close_stream(stream_id, true) else {
            return Ok(());
        };
        warn!("request on stream {} timed out", stream_id);

        for request_id in stream.attached.iter().chain(stream.waiting.iter()).copied() {
            let Some(request) = self.requests.get_mut(&request_id) else {
                continue;
            };
            let domain = request.request.domain;

            if single_open && !request.request.private_stream {
                request.state = RequestState::PendingRequest;
                request.placement = Placement::Unplaced;
                self.timed_out_requests.push_back(request_id);

                let state = State::new(StreamState::Open, DataState::Suspect, "Request timeout").with_code(StateCode::Timeout);
                self.deliver(request_id, &Arc::new(Msg::Status(status_msg(request_id, domain, state))));
            }
            else if let Some(request) = self.remove_request(request_id) {
                let state = State::new(StreamState::ClosedRecover, DataState::Suspect, "Request timeout").with_code(StateCode::Timeout);
                self.deliver_to_removed(&request, &Arc::new(Msg::Status(status_msg(request_id, domain, state))));
            }
        }

        self.dispatch_requested = true;
        self.drain_service_waiting(stream.service_id)
    }

    fn nak_expired_post(&mut self, post: PendingPost) {
        debug!("post {:?} / {:?} on request {} timed out", post.post.post_id, post.post.seq_num, post.request_id);
        let nak = AckMsg {
            stream_id: post.request_id,
            domain: post.post.domain,
            ack_id: post.post.post_id.unwrap_or_default(),
            seq_num: post.post.seq_num,
            nak_code: Some(NakCode::NoResponse),
            text: Some("Acknowledgement timed out.".to_string()),
            key: post.post.key.clone(),
        };
        self.deliver(post.request_id, &Arc::new(Msg::Ack(nak)));
    }

    fn sorted_service_ids(&self) -> Vec<u16> {
        let mut result = self.services.keys().copied().collect::<Vec<_>>();
        result.sort();
        result
    }

    fn upsert_service(&mut self, info: ServiceInfo) -> Result<(), WatchlistError> {
        let service_id = info.service_id;
        let name = info.name.clone();
        debug!("service {} '{}': up={} accepting={}", service_id, name, info.service_up, info.accepting_requests);

        match self.services.get_mut(&service_id) {
            Some(service) => {
                if service.info.name != name {
                    self.service_ids_by_name.remove(&service.info.name);
                }
                service.info = info;
            }
            None => {
                self.services.insert(service_id, ServiceView::new(info));
            }
        }
        self.service_ids_by_name.insert(name, service_id);

        self.release_pending_for_service(service_id)?;
        self.drain_service_waiting_while_open(service_id)?;
        self.dispatch_requested = true;
        Ok(())
    }

    /// Tries to send all requests parked for the service.
    pub(super) fn release_pending_for_service(&mut self, service_id: u16) -> Result<(), WatchlistError> {
        if self.login.is_none() {
            return Ok(());
        }
        let Some(service) = self.services.get(&service_id) else {
            return Ok(());
        };
        if !service.is_servable() {
            return Ok(());
        }

        let request_ids = self.pending_requests.take_for_service(service_id, &service.info.name);
        if !request_ids.is_empty() {
            debug!("releasing {} pending requests for service {}", request_ids.len(), service_id);
        }
        for request_id in request_ids {
            if let Some(request) = self.requests.get_mut(&request_id) {
                request.placement = Placement::Unplaced;
            }
            self.open_request(request_id)?;
        }
        Ok(())
    }

    fn drain_service_waiting_while_open(&mut self, service_id: u16) -> Result<(), WatchlistError> {
        loop {
            let Some(service) = self.services.get_mut(&service_id) else {
                return Ok(());
            };
            if !service.is_window_open() {
                return Ok(());
            }
            let Some(request_id) = service.waiting.pop_front() else {
                return Ok(());
            };
            if let Some(request) = self.requests.get_mut(&request_id) {
                request.placement = Placement::Unplaced;
            }
            self.open_request(request_id)?;
        }
    }

    fn apply_stream_status(&mut self, stream_id: i32, state: State) -> Result<(), WatchlistError> {
        let Some(stream) = self.streams.get(&stream_id) else {
            return Ok(());
        };
        let status = status_msg(stream_id, stream.request.domain, state);
        let msg = Arc::new(Msg::Status(status.clone()));
        self.on_status(stream_id, &msg, &status, false)
    }

    /// Removes a service with all its streams. Their requests are re-parked or closed depending
    ///  on `state`.
    fn remove_service(&mut self, service_id: u16, state: &State) {
        let Some(service) = self.services.remove(&service_id) else {
            return;
        };
        debug!("removing service {} '{}'", service_id, service.info.name);
        if self.service_ids_by_name.get(&service.info.name) == Some(&service_id) {
            self.service_ids_by_name.remove(&service.info.name);
        }

        let recover = state.stream_state == StreamState::ClosedRecover && self.single_open();

        let mut stream_ids = service.streams.iter().copied().collect::<Vec<_>>();
        stream_ids.sort();
        for stream_id in stream_ids {
            let Some(stream) = self.streams.get(&stream_id) else {
                continue;
            };
            let msg = Arc::new(Msg::Status(status_msg(stream_id, stream.request.domain, state.clone())));
            self.tear_down_stream(stream_id, &msg, state, recover);
        }

        for request_id in service.waiting {
            let Some(request) = self.requests.get(&request_id) else {
                continue;
            };
            let msg = Arc::new(Msg::Status(status_msg(request_id, request.request.domain, state.clone())));
            self.recover_or_close_request(request_id, &msg, state, recover);
        }
    }

    fn tear_down_all_streams(&mut self, state: &State, recover: bool) {
        let mut stream_ids = self.streams.keys().copied().collect::<Vec<_>>();
        stream_ids.sort();
        for stream_id in stream_ids {
            let Some(stream) = self.streams.get(&stream_id) else {
                continue;
            };
            let msg = Arc::new(Msg::Status(status_msg(stream_id, stream.request.domain, state.clone())));
            self.tear_down_stream(stream_id, &msg, state, recover);
        }
    }

    /// Closes a stream without telling the provider, and re-parks or closes its requests. Returns
    ///  the stream's service.
    pub(super) fn tear_down_stream(&mut self, stream_id: i32, msg: &Arc<Msg>, state: &State, recover: bool) -> Option<u16> {
        let stream = self.close_stream(stream_id, false)?;
        for request_id in stream.attached.iter().chain(stream.waiting.iter()) {
            self.recover_or_close_request(*request_id, msg, state, recover);
        }
        Some(stream.service_id)
    }

    /// A recovered request is told its data is suspect and waits for its service. Otherwise
    ///  it receives `msg` as its final message.
    fn recover_or_close_request(&mut self, request_id: i32, msg: &Arc<Msg>, state: &State, recover: bool) {
        let Some(request) = self.requests.get_mut(&request_id) else {
            return;
        };

        if recover && !request.request.private_stream {
            request.state = RequestState::PendingRequest;
            request.placement = Placement::Parked(request.service_target.clone());
            self.pending_requests.insert(&request.service_target, request_id);

            let recovering = State::new(StreamState::Open, DataState::Suspect, state.text.clone()).with_code(state.code);
            let status = Arc::new(Msg::Status(status_msg(request_id, request.request.domain, recovering)));
            self.deliver(request_id, &status);
        }
        else if let Some(request) = self.remove_request(request_id) {
            self.deliver_to_removed(&request, msg);
        }
    }

    fn close_all_requests(&mut self, state: &State) {
        let mut request_ids = self.requests.keys().copied().collect::<Vec<_>>();
        request_ids.sort();
        for request_id in request_ids {
            if let Some(request) = self.remove_request(request_id) {
                let msg = Arc::new(Msg::Status(status_msg(request_id, request.request.domain, state.clone())));
                self.deliver_to_removed(&request, &msg);
            }
        }
    }
}
