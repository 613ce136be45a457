use tracing::{debug, error, warn};

use crate::error::{ConnectionError, ErrorKind, TransportError, Warning};

use super::{Inner, Shared};

impl Inner {
    /// The error a pending or new operation must fail with, if the connection
    /// has already ended.
    pub(super) fn terminal_error(&self) -> Option<ConnectionError> {
        if let Some(failure) = &self.failure {
            return Some(failure.clone());
        }
        self.closed.then(ConnectionError::closed)
    }
}

impl Shared {
    pub(super) fn warn(&self, message: String) {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!("warning after close: {}", message);
            return;
        }
        warn!("{}", message);
        let state = inner.state;
        inner.warnings.push(Warning { state, message });
    }

    /// Ends the connection with a failure on the status stream, then closes it.
    ///
    /// Returns the error so that a caller-facing operation can also report it.
    /// A connection that has already ended keeps its original terminal event
    /// and the returned error is that event.
    pub(super) fn fail(
        &self,
        kind: ErrorKind,
        reason: &str,
        cause: Option<TransportError>,
    ) -> ConnectionError {
        let err = {
            let mut inner = self.inner.lock();
            if let Some(terminal) = inner.terminal_error() {
                debug!("{} after the connection ended: {}", kind, reason);
                return terminal;
            }
            let mut err = ConnectionError::new(kind, reason)
                .with_context("state", format!("{:?}", inner.state))
                .with_warnings(inner.warnings.clone());
            if let Some(cause) = cause {
                err = err.with_cause(cause);
            }
            error!("{}", err);
            inner.failure = Some(err.clone());
            self.status.deactivate(err.clone());
            err
        };
        self.close();
        err
    }
}
