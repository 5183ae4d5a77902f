use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::message::msg_key::DomainType;
use crate::message::msgs::{GenericMsg, Msg, MsgView, PostMsg, RequestMsg};
use crate::message::state::{DataState, State, StreamState};
use crate::watchlist::error::WatchlistError;
use crate::watchlist::item_handler::{status_msg, WatchlistHandler};
use crate::watchlist::logical_request::{LogicalRequest, Placement, RequestState, SubmitOptions};
use crate::watchlist::physical_stream::PendingSend;
use crate::watchlist::qos_matcher::validate_request_qos;
use crate::watchlist::transport::Transport;

impl<T: Transport> WatchlistHandler<T> {
    /// Submits a new request, or reissues it if a request with the same stream id exists. Returns
    ///  the request's stream id.
    ///
    /// A request that can not be sent right away is not an error: it is parked, and the
    ///  application learns about that through a status message on the next dispatch.
    pub fn submit(&mut self, request: RequestMsg, options: SubmitOptions) -> Result<i32, WatchlistError> {
        if self.login.is_none() {
            return Err(WatchlistError::NotLoggedIn);
        }
        if self.requests.contains_key(&request.stream_id) {
            let id = request.stream_id;
            self.reissue(id, request)?;
            return Ok(id);
        }

        validate_request_qos(&request)?;

        if !request.batch_item_names.is_empty() {
            return self.submit_batch(request, options);
        }

        let request = LogicalRequest::new(request, &options)?;
        let request_id = request.id();
        debug!("submitting request {} for {:?} on service {}", request_id, request.request.key.name_lossy(), request.service_target);

        self.requests.insert(request_id, request);
        self.open_request(request_id)?;
        Ok(request_id)
    }

    /// Splits a batch request into one request per item name. The items get consecutive stream
    ///  ids following the batch's, and the batch stream itself is closed right away.
    fn submit_batch(&mut self, request: RequestMsg, options: SubmitOptions) -> Result<i32, WatchlistError> {
        let batch_id = request.stream_id;

        let mut items = Vec::with_capacity(request.batch_item_names.len());
        for (idx, name) in request.batch_item_names.iter().enumerate() {
            let item_id = i32::try_from(idx).ok()
                .and_then(|idx| batch_id.checked_add(idx + 1))
                .ok_or(WatchlistError::BatchIdInUse)?;
            if self.requests.contains_key(&item_id) {
                return Err(WatchlistError::BatchIdInUse);
            }

            let mut item = request.clone();
            item.stream_id = item_id;
            item.key.name = Some(name.clone());
            item.batch_item_names.clear();
            items.push(LogicalRequest::new(item, &options)?);
        }

        debug!("submitting batch {} with {} items", batch_id, items.len());
        for item in items {
            let item_id = item.id();
            self.requests.insert(item_id, item);
            self.open_request(item_id)?;
        }

        let closed = status_msg(batch_id, request.domain, State::new(StreamState::Closed, DataState::Ok, "Stream closed for batch"));
        self.delivered.push_back(MsgView {
            stream_id: batch_id,
            msg: Arc::new(Msg::Status(closed)),
            user_context: options.user_context,
        });
        Ok(batch_id)
    }

    /// Changes an existing request, e.g. its priority or pause flag. A request with a refresh in
    ///  progress on a multi-part stream is moved to the stream's waiting list and sent once the
    ///  refresh completes.
    pub fn reissue(&mut self, request_id: i32, new: RequestMsg) -> Result<(), WatchlistError> {
        let request = self.requests.get(&request_id)
            .ok_or(WatchlistError::UnknownStream(request_id))?;

        validate_request_qos(&new)?;

        let Some(stream_id) = request.physical_stream_id() else {
            return Err(WatchlistError::ReissueOnUnopenStream);
        };
        if new.streaming != request.request.streaming {
            return Err(WatchlistError::StreamingFlagChanged);
        }
        if new.domain != request.request.domain
            || new.key.name != request.request.key.name
            || new.key.name_type != request.request.key.name_type
        {
            return Err(WatchlistError::ReissueChangedKey);
        }

        let stream = self.streams.get(&stream_id)
            .ok_or(WatchlistError::ReissueOnUnopenStream)?;
        if let Some(state) = &stream.state {
            if state.stream_state != StreamState::Open {
                return Err(WatchlistError::ReissueWhileNotOpen);
            }
        }

        let is_attached = matches!(request.placement, Placement::Attached(_));
        let streaming = new.streaming;
        let no_refresh = new.no_refresh;
        let can_attach = stream.can_attach(streaming);

        let Some(request) = self.requests.get_mut(&request_id) else {
            return Ok(());
        };
        let mut new = new;
        new.stream_id = request_id;
        new.key.service_id = request.request.key.service_id;
        new.batch_item_names.clear();
        request.request = new;

        debug!("reissuing request {} on stream {}", request_id, stream_id);
        if !is_attached {
            // picked up with its new content once the stream's refresh completes
            return Ok(());
        }

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            // dictionary downloads may change their filter (e.g. info to normal verbosity)
            if stream.request.domain == DomainType::DICTIONARY {
                stream.request.key.filter = request.request.key.filter;
            }

            if !can_attach {
                stream.attached.retain(|id| *id != request_id);
                stream.waiting.push_back(request_id);
                request.placement = Placement::StreamWaiting(stream_id);
                request.state = RequestState::PendingRequest;
                return Ok(());
            }
        }

        if !no_refresh {
            request.state = RequestState::RefreshPending;
        }
        self.merge_stream_request(stream_id);
        self.send_stream_request(stream_id, no_refresh)
    }

    /// Sends a post on an open request's stream. If the post requests an acknowledgement, it is
    ///  tracked until the acknowledgement arrives, or is NAKed when it times out.
    pub fn submit_post(&mut self, request_id: i32, post: PostMsg) -> Result<(), WatchlistError> {
        let request = self.requests.get(&request_id)
            .ok_or(WatchlistError::UnknownStream(request_id))?;

        if post.domain.is_administrative() {
            return Err(WatchlistError::PostOnAdministrativeDomain);
        }
        if !self.login.map(|l| l.supports_posting).unwrap_or(false) {
            return Err(WatchlistError::PostingNotSupported);
        }
        let Placement::Attached(stream_id) = request.placement else {
            return Err(WatchlistError::PostStreamNotOpen);
        };
        if request.state != RequestState::Open {
            return Err(WatchlistError::PostStreamNotOpen);
        }

        let tracked = if post.ack_requested {
            let post_id = post.post_id.ok_or(WatchlistError::MissingPostId)?;
            if !post.post_complete && post.seq_num.is_none() {
                return Err(WatchlistError::MissingPostSeqNum);
            }
            if self.post_tracker.len() >= self.config.max_outstanding_posts {
                return Err(WatchlistError::MaxOutstandingPosts);
            }
            let key = (stream_id, post_id, post.seq_num);
            if self.post_tracker.contains(&key) {
                return Err(WatchlistError::DuplicatePostSeqNum);
            }
            Some(key)
        }
        else {
            None
        };

        let mut outbound = post.clone();
        outbound.stream_id = stream_id;
        self.send_on_stream(stream_id, PendingSend::Msg(Msg::Post(outbound)))?;

        if let Some(key) = tracked {
            self.post_tracker.track(key, request_id, post, Instant::now());
        }
        Ok(())
    }

    pub fn submit_generic(&mut self, request_id: i32, generic: GenericMsg) -> Result<(), WatchlistError> {
        let request = self.requests.get(&request_id)
            .ok_or(WatchlistError::UnknownStream(request_id))?;
        let Placement::Attached(stream_id) = request.placement else {
            return Err(WatchlistError::GenericStreamNotOpen);
        };
        if request.state != RequestState::Open {
            return Err(WatchlistError::GenericStreamNotOpen);
        }

        let mut outbound = generic;
        outbound.stream_id = stream_id;
        self.send_on_stream(stream_id, PendingSend::Msg(Msg::Generic(outbound)))
    }

    /// Closes a request. Its physical stream is closed upstream when no other request uses it,
    ///  and its request is re-sent with the remaining requests' priority otherwise.
    pub fn close(&mut self, request_id: i32) -> Result<(), WatchlistError> {
        let request = self.remove_request(request_id)
            .ok_or(WatchlistError::UnknownStream(request_id))?;
        debug!("closing request {}", request_id);

        let (stream_id, was_attached) = match request.placement {
            Placement::Attached(id) => (id, true),
            Placement::StreamWaiting(id) => (id, false),
            _ => return Ok(()),
        };
        let Some(stream) = self.streams.get(&stream_id) else {
            return Ok(());
        };
        let service_id = stream.service_id;

        if stream.is_empty() {
            self.close_stream(stream_id, true);
            return self.drain_service_waiting(service_id);
        }
        if was_attached && request.request.streaming && stream.request.streaming {
            self.merge_stream_request(stream_id);
            self.send_stream_request(stream_id, true)?;
        }
        Ok(())
    }

    /// Routes a message submitted by the application to the operation for its class.
    pub fn submit_msg(&mut self, msg: Msg, options: SubmitOptions) -> Result<(), WatchlistError> {
        match msg {
            Msg::Request(request) => self.submit(request, options).map(|_| ()),
            Msg::Close(close) => self.close(close.stream_id),
            Msg::Post(post) => self.submit_post(post.stream_id, post),
            Msg::Generic(generic) => self.submit_generic(generic.stream_id, generic),
            Msg::Refresh(_) | Msg::Update(_) | Msg::Status(_) | Msg::Ack(_) => Err(WatchlistError::UnsupportedMsgClass),
        }
    }

    /// Pauses every stream, regardless of the pause flags of individual requests.
    pub fn pause_all(&mut self) -> Result<(), WatchlistError> {
        info!("pausing all streams");
        self.all_paused = true;
        self.resend_all_streams()
    }

    pub fn resume_all(&mut self) -> Result<(), WatchlistError> {
        info!("resuming all streams");
        self.all_paused = false;
        self.resend_all_streams()
    }

    fn resend_all_streams(&mut self) -> Result<(), WatchlistError> {
        let mut stream_ids = self.streams.keys().copied().collect::<Vec<_>>();
        stream_ids.sort();
        for stream_id in stream_ids {
            self.merge_stream_request(stream_id);
            self.send_stream_request(stream_id, true)?;
        }
        Ok(())
    }
}
