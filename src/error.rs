use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::ws::subscription::SubscriptionId;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to invalid input supplied by the caller
    Validation,
    /// Error related to WebSocket connections
    WebSocket,
    /// The referenced subscription is not registered
    NotFound,
    /// The connection actor has terminated and no longer answers requests
    Closed,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_found(id: SubscriptionId) -> Self {
        NotFound { id }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// Returned by an unsubscribe for an id the registry does not hold.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotFound {
    pub id: SubscriptionId,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription {} is not registered", self.id)
    }
}

impl StdError for NotFound {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<NotFound> for Error {
    fn from(err: NotFound) -> Self {
        Error::with_source(Kind::NotFound, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_should_name_the_id() {
        let id = SubscriptionId::new();
        let error = Error::not_found(id);

        assert_eq!(error.kind(), Kind::NotFound);
        assert!(error.to_string().contains(&id.to_string()));
    }

    #[test]
    fn validation_into_error_should_succeed() {
        let error = Error::validation("missing host");

        assert_eq!(error.kind(), Kind::Validation);
        assert_eq!(error.to_string(), "Validation: invalid: missing host");
        assert!(error.downcast_ref::<Validation>().is_some());
    }

    #[test]
    fn url_parse_error_is_validation() {
        let error: Error = url::Url::parse("not a url").unwrap_err().into();

        assert_eq!(error.kind(), Kind::Validation);
    }
}
