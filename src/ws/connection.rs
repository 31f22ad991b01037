#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::codec::{Frame, Incoming, Request};
use super::config::{Config, Proxy};
use super::connector::{self, WsStream};
use super::error::WsError;
use super::liveness::{Liveness, Tick};
use super::reconnect::{ReconnectController, Retry};
use super::subscription::{ChannelSpec, SubscriptionId, SubscriptionRegistry};
use super::traits::Subscriber;
use crate::Result;
use crate::error::Error;

/// How long a graceful close may take before the socket is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Performing the handshake
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting to retry after a failure
    Reconnecting {
        /// Consecutive failures so far
        attempt: u32,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// The retry budget is spent and the client has terminated
    Exhausted,
    /// The client was stopped or every handle to it was dropped
    Stopped,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Whether the client has terminated and will never connect again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Stopped)
    }
}

/// Point-in-time snapshot of a client.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Whether the socket is currently up
    pub connected: bool,
    /// Registered subscriptions
    pub subscription_count: usize,
    /// Subscribe requests queued while disconnected
    pub pending_message_count: usize,
    /// Consecutive failed connection attempts
    pub reconnect_attempts: u32,
    /// When the last frame arrived, `None` before the first connection
    pub last_received_at: Option<DateTime<Utc>>,
}

/// Requests a [`super::Client`] sends to its connection task.
pub(crate) enum Command {
    Subscribe {
        spec: ChannelSpec,
        subscriber: Box<dyn Subscriber>,
        reply: oneshot::Sender<Result<SubscriptionId>>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<Result<()>>,
    },
    IsConnected {
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<(SubscriptionId, ChannelSpec)>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

type Timer = Option<Pin<Box<Sleep>>>;

/// Sole owner of one socket and everything multiplexed over it.
///
/// Runs as a single task that handles one event at a time: client commands, inbound
/// frames, the heartbeat timer and the reconnect timer. Nothing else touches this state.
pub(crate) struct Connection {
    url: Url,
    proxy: Option<Proxy>,
    config: Config,
    socket: Option<WsStream>,
    /// Subscribe requests issued while disconnected, oldest first, tagged with the
    /// subscription they belong to
    pending: VecDeque<(SubscriptionId, String)>,
    registry: SubscriptionRegistry,
    liveness: Liveness,
    reconnect: ReconnectController,
    heartbeat: Timer,
    retry: Timer,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(
        url: Url,
        proxy: Option<Proxy>,
        config: Config,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            url,
            proxy,
            liveness: Liveness::new(config.stale_timeout),
            reconnect: ReconnectController::new(config.reconnect.clone()),
            config,
            socket: None,
            pending: VecDeque::new(),
            registry: SubscriptionRegistry::new(),
            heartbeat: None,
            retry: None,
            state_tx,
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Main event loop. Returns once the client is stopped, all handles are dropped or
    /// the retry budget is spent.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.schedule_heartbeat();
        let mut flow = self.establish().await;

        while flow.is_continue() {
            flow = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Every client handle is gone
                        self.terminate(ConnectionState::Stopped).await;
                        return;
                    }
                },
                frame = next_frame(&mut self.socket) => self.handle_frame(frame).await,
                () = expire(&mut self.heartbeat) => {
                    self.heartbeat = None;
                    self.on_heartbeat().await
                }
                () = expire(&mut self.retry) => {
                    self.retry = None;
                    self.establish().await
                }
            };
        }

        // A stop request has already cleaned up; anything else ending the loop is exhaustion
        let terminal = self.state_tx.borrow().is_terminal();
        if !terminal {
            self.terminate(ConnectionState::Exhausted).await;
        }
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Subscribe {
                spec,
                subscriber,
                reply,
            } => {
                let result = self.subscribe(spec, subscriber).await;
                _ = reply.send(result);
            }
            Command::Unsubscribe { id, reply } => {
                let result = self.unsubscribe(id).await;
                _ = reply.send(result);
            }
            Command::IsConnected { reply } => {
                _ = reply.send(self.is_connected());
            }
            Command::Stats { reply } => {
                _ = reply.send(self.stats());
            }
            Command::Subscriptions { reply } => {
                let subscriptions = self
                    .registry
                    .specs()
                    .map(|(id, spec)| (id, spec.clone()))
                    .collect();
                _ = reply.send(subscriptions);
            }
            Command::Stop { reply } => {
                #[cfg(feature = "tracing")]
                tracing::info!("Stopping WebSocket client");
                self.terminate(ConnectionState::Stopped).await;
                _ = reply.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    async fn subscribe(
        &mut self,
        spec: ChannelSpec,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        let request = Request::subscribe(&spec).to_json()?;
        let id = self.registry.insert(spec, subscriber);

        if !self.is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!(subscription = %id, "Disconnected, queueing subscribe request");
            self.pending.push_back((id, request));
            return Ok(id);
        }

        match self.transmit(request).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(subscription = %id, "Subscribed");
                Ok(id)
            }
            Err(source) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(subscription = %id, error = %source, "Failed to send subscribe request");
                // Still registered, so it is replayed after the next reconnect
                Err(WsError::SubscribeNotSent { id, source }.into())
            }
        }
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()> {
        let Some(spec) = self.registry.remove(id) else {
            return Err(Error::not_found(id));
        };
        // A subscribe still queued from a disconnected period must never reach the wire
        self.pending.retain(|(queued, _)| *queued != id);

        if self.is_connected() {
            let request = Request::unsubscribe(&spec).to_json()?;
            if let Err(e) = self.transmit(request).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(subscription = %id, error = %e, "Failed to send unsubscribe request");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        Ok(())
    }

    fn stats(&self) -> Stats {
        Stats {
            connected: self.is_connected(),
            subscription_count: self.registry.len(),
            pending_message_count: self.pending.len(),
            reconnect_attempts: self.reconnect.attempts(),
            last_received_at: self.liveness.last_received_at(),
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<std::result::Result<Message, tungstenite::Error>>,
    ) -> ControlFlow<()> {
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "WebSocket read failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return self.force_reconnect().await;
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!("WebSocket stream ended");
                return self.force_reconnect().await;
            }
        };

        let Some(frame) = Frame::classify(message) else {
            return ControlFlow::Continue(());
        };
        self.liveness.touch();

        match frame {
            Frame::Data(bytes) => self.route(&bytes),
            Frame::Ping(payload) => {
                if let Err(e) = self.transmit_message(Message::Pong(payload)).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Failed to answer ping");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    return self.force_reconnect().await;
                }
            }
            Frame::Pong => {}
            Frame::Close(close) => {
                #[cfg(feature = "tracing")]
                tracing::info!(?close, "Server closed the WebSocket");
                #[cfg(not(feature = "tracing"))]
                let _ = &close;
                return self.force_reconnect().await;
            }
        }

        ControlFlow::Continue(())
    }

    /// Decode one payload and hand data events to matching subscriptions.
    fn route(&self, bytes: &[u8]) {
        match Incoming::decode(bytes) {
            Ok(Incoming::Event { channel, data }) => {
                let matched = self.registry.dispatch(&channel, &data);
                #[cfg(feature = "tracing")]
                tracing::trace!(%channel, matched, "Routed event");
                #[cfg(not(feature = "tracing"))]
                let _ = matched;
            }
            Ok(Incoming::Pong | Incoming::SubscriptionResponse) => {}
            Ok(Incoming::Unknown(value)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%value, "Ignoring message of unknown shape");
                #[cfg(not(feature = "tracing"))]
                let _ = &value;
            }
            Err(e) => {
                let error = WsError::MessageParse(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Dropping undecodable frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
            }
        }
    }

    async fn on_heartbeat(&mut self) -> ControlFlow<()> {
        self.schedule_heartbeat();

        match self.liveness.check(Instant::now(), self.is_connected()) {
            Tick::Stale { idle } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    ?idle,
                    connected = self.is_connected(),
                    "No frames received, connection is stale"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = idle;
                self.force_reconnect().await
            }
            Tick::Ping => {
                if let Err(e) = self.send_heartbeat().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Heartbeat send failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    return self.force_reconnect().await;
                }
                ControlFlow::Continue(())
            }
            Tick::Wait => ControlFlow::Continue(()),
        }
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let ping = Request::ping().to_json()?;
        self.transmit(ping).await?;
        Ok(())
    }

    /// Attempt a fresh connection, replaying subscriptions on success and scheduling
    /// the next attempt on failure.
    async fn establish(&mut self) -> ControlFlow<()> {
        self.close_socket().await;
        self.state_tx.send_replace(ConnectionState::Connecting);

        match connector::connect(&self.url, self.proxy.as_ref(), self.config.handshake_timeout)
            .await
        {
            Ok(socket) => {
                #[cfg(feature = "tracing")]
                tracing::info!(url = %self.url, "WebSocket connected");
                self.socket = Some(socket);
                self.reconnect.reset();
                self.liveness.touch();
                self.state_tx.send_replace(ConnectionState::Connected {
                    since: Instant::now(),
                });
                self.resubscribe().await;
                self.schedule_heartbeat();
                ControlFlow::Continue(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %self.url, error = %e, "Unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.schedule_retry()
            }
        }
    }

    /// Send everything queued while disconnected, then a fresh subscribe for every
    /// registered subscription.
    async fn resubscribe(&mut self) {
        let batch = match replay_batch(&mut self.pending, &self.registry) {
            Ok(batch) => batch,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Unable to encode resubscription batch");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            messages = batch.len(),
            subscriptions = self.registry.len(),
            "Re-establishing subscriptions"
        );

        for request in batch {
            if let Err(e) = self.transmit(request).await {
                // The read side will notice the broken socket and reconnect, which
                // replays the registry again
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Resubscription interrupted");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                break;
            }
        }
    }

    /// Drop the current connection and schedule a reconnect with backoff.
    async fn force_reconnect(&mut self) -> ControlFlow<()> {
        self.close_socket().await;
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> ControlFlow<()> {
        match self.reconnect.on_failure() {
            Retry::After(delay) => {
                let attempt = self.reconnect.attempts();
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, ?delay, "Scheduling reconnect");
                self.retry = Some(Box::pin(sleep(delay)));
                self.state_tx
                    .send_replace(ConnectionState::Reconnecting { attempt, delay });
                ControlFlow::Continue(())
            }
            Retry::Exhausted => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    attempts = self.reconnect.attempts(),
                    "Reconnect attempts exhausted, terminating"
                );
                self.retry = None;
                ControlFlow::Break(())
            }
        }
    }

    /// Replace any pending heartbeat with a fresh one a full interval from now.
    fn schedule_heartbeat(&mut self) {
        self.heartbeat = Some(Box::pin(sleep(self.config.heartbeat_interval)));
    }

    async fn transmit(&mut self, text: String) -> std::result::Result<(), tungstenite::Error> {
        self.transmit_message(Message::text(text)).await
    }

    async fn transmit_message(
        &mut self,
        message: Message,
    ) -> std::result::Result<(), tungstenite::Error> {
        match self.socket.as_mut() {
            Some(socket) => socket.send(message).await,
            None => Err(tungstenite::Error::ConnectionClosed),
        }
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            match timeout(CLOSE_TIMEOUT, socket.close(None)).await {
                Ok(Ok(())) | Err(_) => {}
                Ok(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Error while closing WebSocket");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }
    }

    /// Release everything, socket first.
    async fn terminate(&mut self, state: ConnectionState) {
        self.close_socket().await;
        self.heartbeat = None;
        self.retry = None;
        self.pending.clear();
        self.registry.clear();
        self.state_tx.send_replace(state);
    }
}

/// Messages to send right after a reconnect: the pending queue in order, then one
/// subscribe per registered subscription.
///
/// A subscription created while disconnected appears in both parts and is therefore
/// sent twice.
fn replay_batch(
    pending: &mut VecDeque<(SubscriptionId, String)>,
    registry: &SubscriptionRegistry,
) -> Result<Vec<String>> {
    let mut batch: Vec<String> = pending.drain(..).map(|(_, request)| request).collect();
    for (_, spec) in registry.specs() {
        batch.push(Request::subscribe(spec).to_json()?);
    }
    Ok(batch)
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn expire(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
