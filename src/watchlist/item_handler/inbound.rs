use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::message::msg_key::DomainType;
use crate::message::msgs::{AckMsg, Msg, RefreshMsg, StatusMsg};
use crate::message::state::{DataState, State, StreamState};
use crate::watchlist::error::WatchlistError;
use crate::watchlist::item_handler::{status_msg, WatchlistHandler};
use crate::watchlist::logical_request::RequestState;
use crate::watchlist::physical_stream::RefreshState;
use crate::watchlist::transport::Transport;

impl<T: Transport> WatchlistHandler<T> {
    /// Handles a message the provider sent on a physical stream, delivering it to the stream's
    ///  requests as their state permits. Messages for unknown streams are dropped.
    pub fn on_msg(&mut self, msg: Msg) -> Result<(), WatchlistError> {
        let stream_id = msg.stream_id();
        let Some(stream) = self.streams.get(&stream_id) else {
            warn!("dropping message for unknown stream {}: {:?}", stream_id, msg);
            return Ok(());
        };
        let service_id = stream.service_id;

        let msg = Arc::new(msg);
        match msg.as_ref() {
            Msg::Refresh(refresh) => return self.on_refresh(stream_id, &msg, refresh),
            Msg::Status(status) => self.on_status(stream_id, &msg, status, true)?,
            Msg::Update(_) => self.fan_out(stream_id, &msg, |s| matches!(s, RequestState::Open | RequestState::RefreshCompletePending)),
            Msg::Generic(_) => self.fan_out(stream_id, &msg, |s| s != RequestState::PendingRequest),
            Msg::Ack(ack) => self.on_ack(stream_id, &msg, ack),
            Msg::Request(_) | Msg::Post(_) | Msg::Close(_) => {
                warn!("unexpected inbound message on stream {}: {:?}", stream_id, msg);
            }
        }

        self.drain_service_waiting(service_id)
    }

    fn fan_out(&mut self, stream_id: i32, msg: &Arc<Msg>, accepts: impl Fn(RequestState) -> bool) {
        let Some(stream) = self.streams.get(&stream_id) else {
            return;
        };
        for request_id in stream.attached.clone() {
            let accepted = self.requests.get(&request_id)
                .map(|r| accepts(r.state))
                .unwrap_or(false);
            if accepted {
                self.deliver(request_id, msg);
            }
        }
    }

    fn on_refresh(&mut self, stream_id: i32, msg: &Arc<Msg>, refresh: &RefreshMsg) -> Result<(), WatchlistError> {
        let tolerates_suspect_data = self.tolerates_suspect_data();
        let (was_suspect, service_id, has_attached) = {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            if refresh.solicited {
                stream.response_received();
            }
            let was_suspect = stream.is_suspect();
            stream.state = Some(refresh.state.clone());
            (was_suspect, stream.service_id, !stream.attached.is_empty())
        };

        if !matches!(refresh.state.stream_state, StreamState::Open | StreamState::NonStreaming) {
            return self.on_stream_closed(stream_id, msg, &refresh.state);
        }
        if refresh.state.data_state == DataState::Suspect && !tolerates_suspect_data && was_suspect {
            self.close_suspect_stream(stream_id, &refresh.state);
            return Ok(());
        }

        if refresh.complete && has_attached {
            self.release_window(stream_id);
        }

        // snapshot requests see their final refresh as non-streaming
        let mut snapshot_msg: Option<Arc<Msg>> = None;
        let now = Instant::now();

        let attached = self.streams.get(&stream_id)
            .map(|s| s.attached.clone())
            .unwrap_or_default();
        for request_id in attached {
            let Some(request) = self.requests.get_mut(&request_id) else {
                continue;
            };
            if request.request.no_refresh || (refresh.solicited && !request.is_awaiting_refresh()) {
                continue;
            }

            if !refresh.complete {
                if request.state == RequestState::RefreshPending {
                    request.state = RequestState::RefreshCompletePending;
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.refresh_state = RefreshState::CompletePending;
                    }
                }
                self.deliver(request_id, msg);
                continue;
            }

            if request.request.streaming && refresh.state.stream_state == StreamState::Open {
                request.state = RequestState::Open;
                if request.request.domain != DomainType::DICTIONARY
                    && !request.has_static_qos
                    && request.matched_qos.map(|q| !q.dynamic).unwrap_or(false)
                {
                    request.has_static_qos = true;
                }
                self.deliver(request_id, msg);
                continue;
            }

            let final_msg = if !request.request.streaming && refresh.state.stream_state == StreamState::Open {
                snapshot_msg.get_or_insert_with(|| {
                    let mut non_streaming = refresh.clone();
                    non_streaming.state.stream_state = StreamState::NonStreaming;
                    Arc::new(Msg::Refresh(non_streaming))
                }).clone()
            }
            else {
                msg.clone()
            };
            if let Some(request) = self.remove_request(request_id) {
                trace!("request {} received its final refresh", request_id);
                self.deliver_to_removed(&request, &final_msg);
            }
        }

        if refresh.complete {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.refresh_state = RefreshState::NotRequired;
            }
            self.join_item_group(stream_id, &refresh.group_id);
        }
        else if let Some(stream) = self.streams.get_mut(&stream_id) {
            // every part of a multi-part refresh gets its own timeout
            if stream.refresh_state == RefreshState::CompletePending {
                stream.start_request_timer(now, self.config.request_timeout);
            }
        }

        if !self.close_stream_if_empty(stream_id, false) {
            self.drain_stream_waiting(stream_id)?;
        }
        if refresh.complete {
            self.drain_service_waiting(service_id)?;
        }
        Ok(())
    }

    /// `is_response` is false for statuses that do not come from the stream itself, e.g. group
    ///  status: those neither answer an outstanding request nor free the service's open window.
    pub(super) fn on_status(&mut self, stream_id: i32, msg: &Arc<Msg>, status: &StatusMsg, is_response: bool) -> Result<(), WatchlistError> {
        let tolerates_suspect_data = self.tolerates_suspect_data();

        if is_response {
            let request_pending = self.streams.get(&stream_id)
                .map(|s| s.is_request_pending())
                .unwrap_or(false);
            if request_pending {
                self.release_window(stream_id);
            }
        }

        let was_suspect = {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            if is_response {
                stream.response_received();
            }
            let was_suspect = stream.is_suspect();
            if let Some(state) = &status.state {
                stream.state = Some(state.clone());
            }
            was_suspect
        };

        if let Some(group_id) = &status.group_id {
            self.join_item_group(stream_id, group_id);
        }

        match &status.state {
            Some(state) if state.stream_state != StreamState::Open => {
                self.on_stream_closed(stream_id, msg, state)
            }
            Some(state) if state.data_state == DataState::Suspect && !tolerates_suspect_data && was_suspect => {
                self.close_suspect_stream(stream_id, state);
                Ok(())
            }
            _ => {
                self.fan_out(stream_id, msg, |_| true);
                Ok(())
            }
        }
    }

    fn on_ack(&mut self, stream_id: i32, msg: &Arc<Msg>, ack: &AckMsg) {
        match self.post_tracker.on_ack(stream_id, ack.ack_id, ack.seq_num) {
            Some(pending) => {
                trace!("post {} / {:?} on stream {} acknowledged", ack.ack_id, ack.seq_num, stream_id);
                self.deliver(pending.request_id, msg);
            }
            None => {
                warn!("dropping acknowledgement {} / {:?} for unknown post on stream {}", ack.ack_id, ack.seq_num, stream_id);
            }
        }
    }

    /// The provider closed the stream, or a message closed it on its behalf. Requests are
    ///  re-parked if the provider may serve them again later, and closed otherwise.
    pub(super) fn on_stream_closed(&mut self, stream_id: i32, msg: &Arc<Msg>, state: &State) -> Result<(), WatchlistError> {
        let recover = state.stream_state == StreamState::ClosedRecover && self.single_open();
        let Some(service_id) = self.tear_down_stream(stream_id, msg, state, recover) else {
            return Ok(());
        };
        self.release_pending_for_service(service_id)
    }

    /// Suspect data on a stream that already was suspect, for an application that does not
    ///  accept it: the stream is closed, and its requests are closed as recoverable.
    fn close_suspect_stream(&mut self, stream_id: i32, state: &State) {
        let Some(stream) = self.close_stream(stream_id, true) else {
            return;
        };
        debug!("closing stream {} after repeated suspect data", stream_id);

        let closed = State {
            stream_state: StreamState::ClosedRecover,
            data_state: DataState::Suspect,
            code: state.code,
            text: state.text.clone(),
        };
        for request_id in stream.attached.iter().chain(stream.waiting.iter()) {
            if let Some(request) = self.remove_request(*request_id) {
                let status = Arc::new(Msg::Status(status_msg(*request_id, request.request.domain, closed.clone())));
                self.deliver_to_removed(&request, &status);
            }
        }
    }
}
