#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use super::subscription::SubscriptionId;
use crate::error::Kind;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error reaching or talking to the HTTP proxy
    Proxy(std::io::Error),
    /// The proxy answered the CONNECT request with something other than 200
    TunnelRejected {
        /// Status line returned by the proxy
        status: String,
    },
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The handshake did not complete in time
    Timeout(Duration),
    /// Received an invalid or unexpected message
    InvalidMessage(String),
    /// The subscription was registered but its subscribe request could not be sent.
    /// It is replayed on the next reconnect and can be removed with `id`.
    SubscribeNotSent {
        id: SubscriptionId,
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// The connection actor is gone and can no longer answer requests
    ActorTerminated,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Proxy(e) => write!(f, "Proxy connection error: {e}"),
            Self::TunnelRejected { status } => write!(f, "Proxy refused tunnel: {status}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout(after) => write!(f, "WebSocket handshake timed out after {after:?}"),
            Self::InvalidMessage(msg) => write!(f, "Invalid WebSocket message: {msg}"),
            Self::SubscribeNotSent { id, source } => {
                write!(f, "Subscription {id} registered but not sent: {source}")
            }
            Self::ActorTerminated => write!(f, "WebSocket client has terminated"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Proxy(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            Self::SubscribeNotSent { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::ActorTerminated => Kind::Closed,
            _ => Kind::WebSocket,
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(Kind::WebSocket, WsError::Connection(e))
    }
}
