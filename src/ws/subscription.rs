#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::ser::{Serialize, SerializeMap as _, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::traits::Subscriber;
use crate::Result;
use crate::error::Error;

/// Key under which the channel discriminator travels on the wire.
const TYPE_KEY: &str = "type";

/// Fields treated as the secondary filter when a [`ChannelSpec`] is built from loose JSON,
/// in order of precedence.
const FILTER_FIELDS: [&str; 2] = ["user", "coin"];

/// Opaque, process-unique identifier handed out by a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub(crate) fn new() -> Self {
        // v7 ids sort by creation time, which keeps replay order stable
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Secondary filter of a [`ChannelSpec`]: `field` of the event body must equal `value`,
/// ignoring case.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub value: String,
    normalized: String,
}

impl Filter {
    fn new(field: String, value: String) -> Self {
        let normalized = value.to_lowercase();
        Self {
            field,
            value,
            normalized,
        }
    }

    fn accepts(&self, data: &Value) -> bool {
        data.get(&self.field)
            .and_then(Value::as_str)
            .is_some_and(|candidate| candidate.to_lowercase() == self.normalized)
    }
}

/// What a subscription wants: a required message type plus an optional filter on one
/// field of the event body.
///
/// Extra parameters (for instance a candle `interval`) travel to the server with the
/// subscribe request but play no part in matching. Specs are immutable once handed to
/// the client; to change one, unsubscribe and subscribe again.
///
/// ```
/// use hyperliquid_stream::ws::ChannelSpec;
/// use serde_json::json;
///
/// let spec = ChannelSpec::new("trades").with_filter("coin", "BTC");
/// assert_eq!(
///     serde_json::to_value(&spec)?,
///     json!({ "type": "trades", "coin": "BTC" })
/// );
/// # Ok::<(), serde_json::Error>(())
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    channel_type: String,
    filter: Option<Filter>,
    params: Map<String, Value>,
}

impl ChannelSpec {
    /// Spec matching every event of `channel_type`.
    #[must_use]
    pub fn new<S: Into<String>>(channel_type: S) -> Self {
        Self {
            channel_type: channel_type.into(),
            filter: None,
            params: Map::new(),
        }
    }

    /// Only match events whose body has `field` equal to `value`, ignoring case.
    #[must_use]
    pub fn with_filter<F: Into<String>, V: Into<String>>(mut self, field: F, value: V) -> Self {
        self.filter = Some(Filter::new(field.into(), value.into()));
        self
    }

    /// Attach a parameter that is sent to the server but not used for matching.
    #[must_use]
    pub fn with_param<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Trades for one coin.
    #[must_use]
    pub fn trades<S: Into<String>>(coin: S) -> Self {
        Self::new("trades").with_filter("coin", coin)
    }

    /// Level 2 order book for one coin.
    #[must_use]
    pub fn l2_book<S: Into<String>>(coin: S) -> Self {
        Self::new("l2Book").with_filter("coin", coin)
    }

    /// Mid prices for every coin.
    #[must_use]
    pub fn all_mids() -> Self {
        Self::new("allMids")
    }

    /// A user-scoped channel such as `webData2`, `userFills` or `orderUpdates`.
    #[must_use]
    pub fn for_user<T: Into<String>, U: Into<String>>(channel_type: T, user: U) -> Self {
        Self::new(channel_type).with_filter("user", user)
    }

    #[must_use]
    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Whether an event of type `channel` carrying `data` belongs to this spec.
    #[must_use]
    pub fn matches(&self, channel: &str, data: &Value) -> bool {
        self.channel_type == channel && self.filter.as_ref().is_none_or(|f| f.accepts(data))
    }
}

impl Serialize for ChannelSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = 1 + usize::from(self.filter.is_some()) + self.params.len();
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(TYPE_KEY, &self.channel_type)?;
        if let Some(filter) = &self.filter {
            map.serialize_entry(&filter.field, &filter.value)?;
        }
        for (key, value) in &self.params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl TryFrom<Value> for ChannelSpec {
    type Error = Error;

    /// Build a spec from a loose JSON object such as `{"type": "webData2", "user": "0x.."}`.
    ///
    /// `user` (or failing that `coin`) becomes the filter; every other key is kept as a
    /// parameter.
    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(Error::validation("channel spec must be a JSON object"));
        };

        let channel_type = match object.remove(TYPE_KEY) {
            Some(Value::String(channel_type)) => channel_type,
            _ => {
                return Err(Error::validation(
                    "channel spec requires a string `type` field",
                ));
            }
        };

        let mut spec = Self::new(channel_type);
        for field in FILTER_FIELDS {
            if let Some(Value::String(filter)) = object.get(field) {
                spec = spec.with_filter(field, filter.clone());
                object.remove(field);
                break;
            }
        }
        spec.params = object;

        Ok(spec)
    }
}

struct Entry {
    spec: ChannelSpec,
    subscriber: Box<dyn Subscriber>,
}

/// Every live subscription of one connection, keyed by id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<SubscriptionId, Entry>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscription under a freshly generated id.
    pub fn insert(&mut self, spec: ChannelSpec, subscriber: Box<dyn Subscriber>) -> SubscriptionId {
        let mut id = SubscriptionId::new();
        while self.entries.contains_key(&id) {
            id = SubscriptionId::new();
        }
        self.entries.insert(id, Entry { spec, subscriber });
        id
    }

    /// Remove a subscription, returning its spec if it was registered.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<ChannelSpec> {
        self.entries.remove(&id).map(|entry| entry.spec)
    }

    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<&ChannelSpec> {
        self.entries.get(&id).map(|entry| &entry.spec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Ids and specs in creation order.
    pub fn specs(&self) -> impl Iterator<Item = (SubscriptionId, &ChannelSpec)> {
        self.entries.iter().map(|(id, entry)| (*id, &entry.spec))
    }

    /// Hand `data` to every subscription matching `channel`, returning how many matched.
    ///
    /// Each delivery runs inside its own failure boundary: an error or panic from one
    /// subscriber is logged and does not affect the others.
    pub fn dispatch(&self, channel: &str, data: &Value) -> usize {
        let mut matched = 0;

        for (id, entry) in &self.entries {
            if !entry.spec.matches(channel, data) {
                continue;
            }
            matched += 1;

            match catch_unwind(AssertUnwindSafe(|| entry.subscriber.on_event(data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(subscription = %id, channel, error = %e, "Subscriber returned an error");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (&id, &e);
                }
                Err(_panic) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(subscription = %id, channel, "Subscriber panicked");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &id;
                }
            }
        }

        matched
    }
}
