use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::State;

/// Errors reported by a transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("transport is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ErrorKind {
    /// The transport could not be created or configured.
    Construction,
    /// A description operation was rejected.
    Negotiation,
    /// The connection was used in a way it does not support.
    ProtocolViolation,
    /// The transport or the data channel failed permanently.
    Transport,
    /// The connection was closed before the operation finished.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Construction => "construction failure",
            Self::Negotiation => "negotiation failure",
            Self::ProtocolViolation => "protocol violation",
            Self::Transport => "transport failure",
            Self::Closed => "connection closed",
        })
    }
}

/// A non-fatal anomaly, kept for the lifetime of the connection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Warning {
    pub state: State,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.state, self.message)
    }
}

#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
    warnings: Vec<Warning>,
    #[source]
    cause: Option<Arc<TransportError>>,
}

impl ConnectionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            warnings: Vec::new(),
            cause: None,
        }
    }

    pub fn closed() -> Self {
        Self::new(
            ErrorKind::Closed,
            "connection closed before negotiation finished",
        )
    }

    pub fn with_cause(mut self, cause: impl Into<Arc<TransportError>>) -> Self {
        let cause = cause.into();
        self.context.insert("cause".to_owned(), cause.to_string());
        self.cause = Some(cause);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn cause(&self) -> Option<&TransportError> {
        self.cause.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn carries_cause_context_and_warnings() {
        let warnings = vec![Warning {
            state: State::Connecting,
            message: "peer connection disconnected".to_owned(),
        }];
        let err = ConnectionError::new(ErrorKind::Negotiation, "remote description rejected")
            .with_cause(TransportError::InvalidDescription("missing m-line".to_owned()))
            .with_context("state", "Offline")
            .with_warnings(warnings.clone());

        assert_eq!(
            err.to_string(),
            "negotiation failure: remote description rejected"
        );
        assert_eq!(err.warnings(), &warnings[..]);
        assert_eq!(err.context()["state"], "Offline");
        assert_eq!(
            err.context()["cause"],
            "invalid session description: missing m-line"
        );
        assert!(err.source().is_some());
        assert!(!err.is_closed());
        assert!(ConnectionError::closed().is_closed());
    }
}
