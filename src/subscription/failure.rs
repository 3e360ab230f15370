//! Handler failures contained by the delivery loop.

use std::sync::Arc;

use thiserror::Error;

use super::{HandlerError, Sid};

/// A message handler invocation that did not complete normally.
///
/// The delivery loop logs every failure and passes it to the connection's
/// [`HandlerFailureHook`], if one is installed, then moves on to the next
/// message.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HandlerFailure {
    /// The handler returned an error.
    #[error("handler returned an error: {0}")]
    Error(HandlerError),
    /// The handler panicked; carries the panic message.
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl HandlerFailure {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Panic(_) => "panic",
        }
    }
}

/// Observer invoked for every contained handler failure.
///
/// Runs on the subscription's delivery worker; a slow hook delays that
/// subscription's later messages.
pub type HandlerFailureHook = Arc<dyn Fn(Sid, &HandlerFailure) + Send + Sync>;
