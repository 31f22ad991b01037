//! Core traits for the streaming client.

use std::error::Error as StdError;

use serde_json::Value;

/// Error type a [`Subscriber`] may hand back to the connection.
pub type SubscriberError = Box<dyn StdError + Send + Sync + 'static>;

/// Receiver of the `data` body of every event matched to a subscription.
///
/// Subscribers run on the connection's own task, one event at a time. A slow subscriber
/// delays frame processing and heartbeats for every other subscription on the same
/// connection, so heavy work should be handed off (e.g. over a channel).
///
/// Returned errors and panics are caught, logged and otherwise ignored. They never
/// tear down the connection and never stop delivery to other subscriptions.
///
/// Any `Fn(&Value)` closure is a subscriber:
///
/// ```
/// use hyperliquid_stream::ws::Subscriber;
/// use serde_json::{Value, json};
///
/// let subscriber = |data: &Value| {
///     let _ = data.get("px");
/// };
/// assert!(subscriber.on_event(&json!({ "px": "100" })).is_ok());
/// ```
pub trait Subscriber: Send + 'static {
    /// Handle one matched event body.
    fn on_event(&self, data: &Value) -> Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&Value) + Send + 'static,
{
    fn on_event(&self, data: &Value) -> Result<(), SubscriberError> {
        self(data);
        Ok(())
    }
}
