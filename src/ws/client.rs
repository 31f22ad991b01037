use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use super::config::Options;
use super::connection::{Command, Connection, ConnectionState, Stats};
use super::error::WsError;
use super::subscription::{ChannelSpec, SubscriptionId};
use super::traits::Subscriber;
use crate::Result;
use crate::error::Error;

/// Handle to one resilient WebSocket connection.
///
/// Every subscription made through a client is multiplexed over a single socket owned by
/// a background task. That task reconnects with exponential backoff when the socket
/// fails and replays every subscription once it is back. When the retry budget is spent
/// the task terminates; from then on [`Client::is_terminated`] is `true` and every
/// request fails with [`crate::error::Kind::Closed`].
///
/// Cloning is cheap and clones share the same connection. The connection stops when
/// [`Client::stop`] is called or the last clone is dropped.
///
/// # Example
///
/// ```rust, no_run
/// use hyperliquid_stream::ws::{ChannelSpec, Client, Options};
/// use serde_json::Value;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::start(Options::new("wss://api.hyperliquid.xyz/ws"))?;
///
///     let id = client
///         .subscribe(ChannelSpec::trades("BTC"), |trades: &Value| {
///             println!("{trades}");
///         })
///         .await?;
///
///     // Later...
///     client.unsubscribe(id).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    /// Optional name given at start
    name: Option<String>,
    /// Inbox of the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Latest connection state published by the connection task
    state_rx: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Validate `options` and spawn the connection task.
    ///
    /// Returns immediately; the first connection is attempted in the background.
    /// Must be called from within a Tokio runtime.
    pub fn start(options: Options) -> Result<Self> {
        let url = Url::parse(&options.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported scheme `{}`, expected ws or wss",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::validation(format!("{url} has no host")));
        }

        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let connection = Connection::new(url, options.proxy, options.config, state_tx);

        #[cfg(feature = "tracing")]
        let task = {
            use tracing::Instrument as _;

            let span = tracing::info_span!(
                "ws_client",
                client = options.name.as_deref().unwrap_or("unnamed"),
                url = %options.url,
            );
            connection.run(inbox).instrument(span)
        };
        #[cfg(not(feature = "tracing"))]
        let task = connection.run(inbox);

        tokio::spawn(task);

        Ok(Self {
            inner: Arc::new(ClientInner {
                name: options.name,
                commands,
                state_rx,
            }),
        })
    }

    /// Send a command to the connection task and wait for its reply.
    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .map_err(|_e| WsError::ActorTerminated)?;
        response
            .await
            .map_err(|_e| Error::from(WsError::ActorTerminated))
    }

    /// Register `subscriber` for every event matching `spec`.
    ///
    /// While disconnected the subscribe request is queued and this returns `Ok`; it is
    /// sent once the connection is back. If the request cannot be sent on a live
    /// connection the subscription stays registered, to be replayed after the next
    /// reconnect, and a [`WsError::SubscribeNotSent`] carrying its id is returned.
    pub async fn subscribe<S: Subscriber>(
        &self,
        spec: ChannelSpec,
        subscriber: S,
    ) -> Result<SubscriptionId> {
        self.request(|reply| Command::Subscribe {
            spec,
            subscriber: Box::new(subscriber),
            reply,
        })
        .await?
    }

    /// Subscribe and receive matched event bodies as a stream instead of a callback.
    ///
    /// Events are buffered without bound until the stream is polled. The stream ends
    /// when the subscription is removed or the client terminates.
    pub async fn subscribe_stream(
        &self,
        spec: ChannelSpec,
    ) -> Result<(SubscriptionId, impl Stream<Item = Value>)> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(spec, move |data: &Value| {
                _ = tx.send(data.clone());
            })
            .await?;

        let events = stream! {
            while let Some(data) = rx.recv().await {
                yield data;
            }
        };

        Ok((id, events))
    }

    /// Remove a subscription.
    ///
    /// Fails with [`crate::error::Kind::NotFound`] for an unknown id. The unsubscribe
    /// request to the server is best effort: the subscription is removed locally even
    /// if it cannot be sent.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.request(|reply| Command::Unsubscribe { id, reply })
            .await?
    }

    /// Whether the socket is currently up. `false` once the client has terminated.
    pub async fn is_connected(&self) -> bool {
        self.request(|reply| Command::IsConnected { reply })
            .await
            .unwrap_or(false)
    }

    /// Snapshot of the connection's counters.
    pub async fn stats(&self) -> Result<Stats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Every registered subscription, oldest first.
    pub async fn subscriptions(&self) -> Result<Vec<(SubscriptionId, ChannelSpec)>> {
        self.request(|reply| Command::Subscriptions { reply })
            .await
    }

    /// Close the socket and terminate the connection task.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Name given in [`Options::name`], if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Whether the connection task has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.commands.is_closed()
    }

    /// Resolves once the connection task has terminated, whether stopped or exhausted.
    pub async fn terminated(&self) {
        self.inner.commands.closed().await;
    }
}
