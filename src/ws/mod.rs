//! Resilient streaming over a single WebSocket connection.
//!
//! A [`Client`] owns one socket, shared by all of its subscriptions. Each subscription
//! pairs a [`ChannelSpec`] with a [`Subscriber`]. Inbound events are routed by channel
//! name and an optional coin or user filter.
//!
//! # Architecture
//!
//! - [`Client`]: cloneable handle; every call is a message to the connection task
//! - `connection`: the task owning the socket, registry, liveness and reconnect state
//! - `connector`: opens the socket, directly or through an HTTP `CONNECT` proxy
//! - [`codec`]: outbound request envelopes and inbound message classification
//! - [`SubscriptionRegistry`]: subscriptions and the dispatch of matching events
//!
//! # Example
//!
//! ```rust, no_run
//! use hyperliquid_stream::ws::{ChannelSpec, Client, Options};
//! use serde_json::Value;
//!
//! # async fn run() -> hyperliquid_stream::Result<()> {
//! let client = Client::start(Options::new(hyperliquid_stream::MAINNET_WS_URL))?;
//! let id = client
//!     .subscribe(ChannelSpec::l2_book("ETH"), |book: &Value| println!("{book}"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub(crate) mod connector;
pub mod error;
pub(crate) mod liveness;
pub(crate) mod reconnect;
pub mod subscription;
pub mod traits;

pub use client::Client;
pub use config::{Config, Options, Proxy, ProxyAuth, ReconnectConfig};
pub use connection::{ConnectionState, Stats};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use subscription::{ChannelSpec, Filter, SubscriptionId, SubscriptionRegistry};
pub use traits::*;
