use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::message::msgs::{GenericMsg, Msg, MsgView, PostMsg, RequestMsg};
use crate::message::state::State;
use crate::watchlist::error::WatchlistError;
use crate::watchlist::item_handler::WatchlistHandler;
use crate::watchlist::logical_request::SubmitOptions;
use crate::watchlist::login::LoginFeatures;
use crate::watchlist::service_view::ServiceInfo;
use crate::watchlist::transport::{ChannelEvent, Transport};

/// Operations the application invokes on the watchlist. Each carries the channel its result is
///  sent back on.
#[derive(Debug)]
pub enum WatchlistCommand {
    Submit {
        request: RequestMsg,
        options: SubmitOptions,
        reply: oneshot::Sender<Result<i32, WatchlistError>>,
    },
    Post {
        request_id: i32,
        post: PostMsg,
        reply: oneshot::Sender<Result<(), WatchlistError>>,
    },
    Generic {
        request_id: i32,
        generic: GenericMsg,
        reply: oneshot::Sender<Result<(), WatchlistError>>,
    },
    Close {
        request_id: i32,
        reply: oneshot::Sender<Result<(), WatchlistError>>,
    },
    PauseAll {
        reply: oneshot::Sender<Result<(), WatchlistError>>,
    },
    ResumeAll {
        reply: oneshot::Sender<Result<(), WatchlistError>>,
    },
}

/// Everything the channel, login and directory layers report to the watchlist.
#[derive(Debug, Clone)]
pub enum WatchlistInput {
    Msg(Msg),
    Channel(ChannelEvent),
    LoginEstablished(LoginFeatures),
    LoginClosed(State),
    DirectoryClosed(State),
    ServiceAdded(ServiceInfo),
    ServiceUpdated(ServiceInfo),
    ServiceDeleted(u16),
    GroupStatus {
        service_id: u16,
        group_id: Bytes,
        state: State,
    },
    GroupMerged {
        service_id: u16,
        from: Bytes,
        to: Bytes,
    },
}

/// Receives the messages the watchlist delivers to the application.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchlistListener: Send + Sync + 'static {
    async fn on_msg(&self, view: MsgView);
}

/// Runs a watchlist until either of its input channels is closed. Commands, inputs and timer
///  expiry are processed one at a time, and the resulting messages are passed to the listener
///  after each of them.
///
/// Errors returned from a command are sent to the command's reply channel. An error processing
///  an input means the transport failed, and terminates the watchlist. So does an invalid
///  configuration, before anything is processed.
pub async fn run_watchlist<T: Transport>(
    mut handler: WatchlistHandler<T>,
    mut commands: mpsc::Receiver<WatchlistCommand>,
    mut inputs: mpsc::Receiver<WatchlistInput>,
    listener: Arc<dyn WatchlistListener>,
) -> anyhow::Result<()> {
    handler.config().validate()?;
    info!("starting watchlist");

    loop {
        let deadline = handler.next_deadline();

        select! {
            opt_cmd = commands.recv() => {
                match opt_cmd {
                    Some(cmd) => on_command(&mut handler, cmd),
                    None => {
                        info!("command channel closed, shutting down watchlist");
                        return Ok(());
                    }
                }
            }
            opt_input = inputs.recv() => {
                match opt_input {
                    Some(input) => on_input(&mut handler, input)?,
                    None => {
                        info!("input channel closed, shutting down watchlist");
                        return Ok(());
                    }
                }
            }
            _ = sleep_until_deadline(deadline) => {
                handler.process_timeouts()?;
            }
        }

        if handler.needs_dispatch() {
            handler.dispatch()?;
        }
        while let Some(view) = handler.poll_msg() {
            listener.on_msg(view).await;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn on_command<T: Transport>(handler: &mut WatchlistHandler<T>, cmd: WatchlistCommand) {
    debug!("command: {:?}", cmd);

    // the caller may have stopped waiting for the result, which is fine
    match cmd {
        WatchlistCommand::Submit { request, options, reply } => {
            let _ = reply.send(handler.submit(request, options));
        }
        WatchlistCommand::Post { request_id, post, reply } => {
            let _ = reply.send(handler.submit_post(request_id, post));
        }
        WatchlistCommand::Generic { request_id, generic, reply } => {
            let _ = reply.send(handler.submit_generic(request_id, generic));
        }
        WatchlistCommand::Close { request_id, reply } => {
            let _ = reply.send(handler.close(request_id));
        }
        WatchlistCommand::PauseAll { reply } => {
            let _ = reply.send(handler.pause_all());
        }
        WatchlistCommand::ResumeAll { reply } => {
            let _ = reply.send(handler.resume_all());
        }
    }
}

fn on_input<T: Transport>(handler: &mut WatchlistHandler<T>, input: WatchlistInput) -> Result<(), WatchlistError> {
    match input {
        WatchlistInput::Msg(msg) => handler.on_msg(msg),
        WatchlistInput::Channel(event) => handler.on_channel_event(event),
        WatchlistInput::LoginEstablished(features) => handler.on_login_established(features),
        WatchlistInput::LoginClosed(state) => {
            handler.on_login_stream_closed(&state);
            Ok(())
        }
        WatchlistInput::DirectoryClosed(state) => {
            handler.on_directory_stream_closed(&state);
            Ok(())
        }
        WatchlistInput::ServiceAdded(info) => handler.on_service_added(info),
        WatchlistInput::ServiceUpdated(info) => handler.on_service_updated(info),
        WatchlistInput::ServiceDeleted(service_id) => {
            handler.on_service_deleted(service_id);
            Ok(())
        }
        WatchlistInput::GroupStatus { service_id, group_id, state } => handler.on_group_status(service_id, &group_id, state),
        WatchlistInput::GroupMerged { service_id, from, to } => {
            handler.on_group_merged(service_id, &from, &to);
            Ok(())
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use mockall::predicate::eq;
    use tokio::sync::{mpsc, oneshot};
    use crate::message::msg_key::{DomainType, MsgKey};
    use crate::message::msgs::{CloseMsg, Msg, RequestMsg};
    use crate::message::state::StreamState;
    use crate::test_util::msgs::{refresh, service_info};
    use crate::test_util::tracking_transport::TrackingTransport;
    use crate::watchlist::error::WatchlistError;
    use crate::watchlist::item_handler::WatchlistHandler;
    use crate::watchlist::logical_request::SubmitOptions;
    use crate::watchlist::login::LoginFeatures;
    use crate::watchlist::transport::{MockTransport, SendResult, Transport};
    use crate::watchlist::watchlist_config::WatchlistConfig;
    use super::*;

    fn logged_in<T: Transport>(transport: T) -> WatchlistHandler<T> {
        let mut handler = WatchlistHandler::new(Arc::new(WatchlistConfig::new()), transport);
        handler.on_login_established(LoginFeatures::new()).unwrap();
        handler
    }

    fn request(stream_id: i32) -> RequestMsg {
        RequestMsg::new(stream_id, DomainType::MARKET_PRICE, MsgKey::for_name("IBM.N").with_service_id(7))
    }

    /// a listener that forwards every delivered message to the returned receiver
    fn forwarding_listener() -> (Arc<MockWatchlistListener>, mpsc::UnboundedReceiver<MsgView>) {
        let (send, recv) = mpsc::unbounded_channel();
        let mut listener = MockWatchlistListener::new();
        listener.expect_on_msg()
            .returning(move |view| { let _ = send.send(view); });
        (Arc::new(listener), recv)
    }

    async fn submit(commands: &mpsc::Sender<WatchlistCommand>, request: RequestMsg) -> Result<i32, WatchlistError> {
        let (reply, result) = oneshot::channel();
        commands.send(WatchlistCommand::Submit { request, options: SubmitOptions::default(), reply }).await.unwrap();
        result.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_deliver() {
        let transport = TrackingTransport::new();
        let mut handler = logged_in(transport.clone());
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();

        let (commands, command_recv) = mpsc::channel(16);
        let (inputs, input_recv) = mpsc::channel(16);
        let (listener, mut delivered) = forwarding_listener();
        let driver = tokio::spawn(run_watchlist(handler, command_recv, input_recv, listener));

        assert_eq!(submit(&commands, request(3)).await, Ok(3));
        let sent = transport.pop_request();
        assert_eq!(sent.stream_id, 5);

        inputs.send(WatchlistInput::Msg(Msg::Refresh(refresh(5, true)))).await.unwrap();
        let view = delivered.recv().await.unwrap();
        assert_eq!(view.stream_id, 3);
        assert!(matches!(view.msg.as_ref(), Msg::Refresh(_)));

        drop(commands);
        drop(inputs);
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_fires_while_idle() {
        let transport = TrackingTransport::new();
        let mut handler = logged_in(transport.clone());
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();

        let (commands, command_recv) = mpsc::channel(16);
        let (_inputs, input_recv) = mpsc::channel(16);
        let (listener, mut delivered) = forwarding_listener();
        tokio::spawn(run_watchlist(handler, command_recv, input_recv, listener));

        submit(&commands, request(3)).await.unwrap();
        transport.pop_request();

        // paused time advances to the request timeout as soon as everything is idle
        let view = delivered.recv().await.unwrap();
        match view.msg.as_ref() {
            Msg::Status(s) => {
                let state = s.state.as_ref().unwrap();
                assert_eq!(state.stream_state, StreamState::Open);
                assert_eq!(state.text, "Request timeout");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(transport.pop_sent(), Some(Msg::Close(_))));
        assert_eq!(transport.pop_request().stream_id, 6);
    }

    #[tokio::test]
    async fn test_transport_failure_terminates() {
        let mut transport = MockTransport::new();
        transport.expect_send_msg()
            .returning(|_| SendResult::Fatal("connection reset".to_string()));
        let handler = logged_in(transport);

        let (commands, command_recv) = mpsc::channel(16);
        let (inputs, input_recv) = mpsc::channel(16);
        let (listener, _delivered) = forwarding_listener();
        let driver = tokio::spawn(run_watchlist(handler, command_recv, input_recv, listener));

        // no service yet, so nothing is sent
        assert_eq!(submit(&commands, request(3)).await, Ok(3));

        inputs.send(WatchlistInput::ServiceAdded(service_info(7, "ELEKTRON"))).await.unwrap();
        let result = driver.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_command_closes_stream() {
        let mut transport = MockTransport::new();
        transport.expect_send_msg()
            .withf(|msg| matches!(msg, Msg::Request(_)))
            .times(1)
            .return_const(SendResult::Ok);
        transport.expect_send_msg()
            .with(eq(Msg::Close(CloseMsg { stream_id: 5, domain: DomainType::MARKET_PRICE })))
            .times(1)
            .return_const(SendResult::Ok);
        let mut handler = logged_in(transport);
        handler.on_service_added(service_info(7, "ELEKTRON")).unwrap();

        let (commands, command_recv) = mpsc::channel(16);
        let (_inputs, input_recv) = mpsc::channel(16);
        let (listener, _delivered) = forwarding_listener();
        let driver = tokio::spawn(run_watchlist(handler, command_recv, input_recv, listener));

        assert_eq!(submit(&commands, request(3)).await, Ok(3));

        let (reply, result) = oneshot::channel();
        commands.send(WatchlistCommand::Close { request_id: 3, reply }).await.unwrap();
        assert_eq!(result.await.unwrap(), Ok(()));

        drop(commands);
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = WatchlistConfig { initial_stream_id: 0, ..WatchlistConfig::new() };
        let handler = WatchlistHandler::new(Arc::new(config), TrackingTransport::new());

        let (_commands, command_recv) = mpsc::channel(16);
        let (_inputs, input_recv) = mpsc::channel(16);
        let (listener, _delivered) = forwarding_listener();
        let result = run_watchlist(handler, command_recv, input_recv, listener).await;
        assert!(result.is_err());
    }
}
