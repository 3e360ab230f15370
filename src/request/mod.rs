//! Request/reply correlation.
//!
//! Every outstanding request is a [`RequestFuture`] stored in
//! [`PendingRequests`] under its correlation key (the reply subject). Three
//! independent paths race to finish it: an inbound reply, connection close and
//! the expiry sweep. The future's state cell guarantees that exactly one of
//! them wins; the caller observes the winner through a [`RequestHandle`].

use std::{fmt, time::Duration};

use static_assertions::const_assert;

use crate::{error::RequestError, message::Message};

mod future;
mod registry;
mod sweeper;

pub use future::RequestHandle;
pub(crate) use future::RequestFuture;
pub use registry::PendingRequests;
pub(crate) use sweeper::spawn_sweeper;

/// Extra time granted past a request's timeout before it is expired locally.
///
/// Covers the latency between the server giving up and the client noticing,
/// so a reply already in flight is not cancelled early.
pub const REQUEST_GRACE_MARGIN: Duration = Duration::from_millis(10);

const_assert!(REQUEST_GRACE_MARGIN.as_millis() < 100);

/// What the caller sees when a request is cancelled instead of answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CancelAction {
    /// Fail with a generic cancellation.
    #[default]
    Cancel,
    /// Fail with the error specific to why the request was cancelled.
    Report,
    /// Succeed with no message.
    Complete,
}

/// Why a request ended without a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The owning connection closed.
    Closing,
    /// The expiry sweep found the request past its deadline.
    TimedOut,
    /// The server answered that nobody is listening on the subject.
    NoResponders,
}

impl CancelReason {
    fn into_error(self) -> RequestError {
        match self {
            Self::Closing => RequestError::ConnectionClosing,
            Self::TimedOut => RequestError::TimedOut,
            Self::NoResponders => RequestError::NoResponders,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closing => "connection closing",
            Self::TimedOut => "response not registered in time",
            Self::NoResponders => "no responders",
        })
    }
}

/// The single terminal result recorded for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Fulfilled(Message),
    Cancelled(CancelReason),
}

impl RequestOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fulfilled(_) => "fulfilled",
            Self::Cancelled(CancelReason::Closing) => "cancelled_closing",
            Self::Cancelled(CancelReason::TimedOut) => "cancelled_timed_out",
            Self::Cancelled(CancelReason::NoResponders) => "no_responders",
        }
    }
}

/// Per-request settings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use streamlink::{CancelAction, RequestOptions};
///
/// let options = RequestOptions::default()
///     .timeout(Duration::from_millis(250))
///     .cancel_action(CancelAction::Report);
/// assert_eq!(options.cancel_action, CancelAction::Report);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    /// Time to wait for a reply; the connection default applies when `None`.
    pub timeout: Option<Duration>,
    pub cancel_action: CancelAction,
    /// Report expiry as [`RequestError::TimedOut`] rather than a generic
    /// cancellation when the cancel action is [`CancelAction::Cancel`].
    pub timeout_error: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel_action: CancelAction::Cancel,
            timeout_error: true,
        }
    }
}

impl RequestOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cancel_action(mut self, action: CancelAction) -> Self {
        self.cancel_action = action;
        self
    }

    #[must_use]
    pub fn timeout_error(mut self, enabled: bool) -> Self {
        self.timeout_error = enabled;
        self
    }

    /// Translate a recorded outcome into what the caller receives.
    pub(crate) fn settle(self, outcome: RequestOutcome) -> Result<Option<Message>, RequestError> {
        let reason = match outcome {
            RequestOutcome::Fulfilled(message) => return Ok(Some(message)),
            RequestOutcome::Cancelled(reason) => reason,
        };
        match self.cancel_action {
            CancelAction::Complete => Ok(None),
            CancelAction::Report => Err(reason.into_error()),
            CancelAction::Cancel if self.timeout_error && reason == CancelReason::TimedOut => {
                Err(RequestError::TimedOut)
            }
            CancelAction::Cancel => Err(RequestError::Cancelled(reason)),
        }
    }
}
