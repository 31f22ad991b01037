//! Wire format of the streaming endpoint.
//!
//! Outgoing control messages are small JSON envelopes keyed by `method`; incoming
//! payloads are keyed by `channel`:
//!
//! ```text
//! -> {"method":"subscribe","subscription":{"type":"trades","coin":"BTC"}}
//! -> {"method":"ping"}
//! <- {"channel":"subscriptionResponse", ...}
//! <- {"channel":"pong"}
//! <- {"channel":"trades","data":{...}}
//! ```

use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use tokio_tungstenite::tungstenite::Bytes;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::subscription::ChannelSpec;
use crate::Result;

const PONG_CHANNEL: &str = "pong";
const SUBSCRIPTION_RESPONSE_CHANNEL: &str = "subscriptionResponse";

/// Control method of an outgoing request.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// Outgoing control message.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct Request<'spec> {
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<&'spec ChannelSpec>,
}

impl<'spec> Request<'spec> {
    #[must_use]
    pub fn subscribe(spec: &'spec ChannelSpec) -> Self {
        Self {
            method: Method::Subscribe,
            subscription: Some(spec),
        }
    }

    #[must_use]
    pub fn unsubscribe(spec: &'spec ChannelSpec) -> Self {
        Self {
            method: Method::Unsubscribe,
            subscription: Some(spec),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self {
            method: Method::Ping,
            subscription: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decoded inbound payload.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Acknowledgement of our heartbeat request
    Pong,
    /// Acknowledgement of a subscribe or unsubscribe request
    SubscriptionResponse,
    /// Data event to be routed to subscriptions
    Event {
        channel: String,
        data: Value,
    },
    /// Valid JSON of a shape we do not know
    Unknown(Value),
}

impl Incoming {
    /// Decode one text payload. Only malformed JSON is an error; unfamiliar shapes come
    /// back as [`Incoming::Unknown`].
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Self::classify(value))
    }

    fn classify(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::Unknown(value);
        };

        let channel = match object.get("channel") {
            Some(Value::String(channel)) => channel.clone(),
            _ => return Self::Unknown(Value::Object(object)),
        };

        match channel.as_str() {
            PONG_CHANNEL => Self::Pong,
            SUBSCRIPTION_RESPONSE_CHANNEL => Self::SubscriptionResponse,
            _ => match object.remove("data") {
                Some(data) if !data.is_null() => Self::Event { channel, data },
                _ => Self::Unknown(Value::Object(object)),
            },
        }
    }
}

/// Logical frame read off the socket.
#[derive(Debug)]
pub(crate) enum Frame {
    /// Text (or binary) payload carrying JSON
    Data(Bytes),
    Ping(Bytes),
    Pong,
    Close(Option<CloseFrame>),
}

impl Frame {
    /// Map a tungstenite message onto a logical frame. Raw frames are never surfaced
    /// by a reading socket and map to `None`.
    pub(crate) fn classify(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Data(Bytes::from(text))),
            Message::Binary(bytes) => Some(Self::Data(bytes)),
            Message::Ping(payload) => Some(Self::Ping(payload)),
            Message::Pong(_) => Some(Self::Pong),
            Message::Close(frame) => Some(Self::Close(frame)),
            Message::Frame(_) => None,
        }
    }
}
