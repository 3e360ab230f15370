//! Declarative description of the stream consumer a subscription binds to.
//!
//! Options are validated once, when built, and are immutable afterwards. The
//! builder copies any consumer configuration it is given, so one configuration
//! value can seed many subscriptions without them affecting each other.

use std::fmt;

use thiserror::Error;

/// Largest batch a pull subscription may request at once.
pub const MAX_PULL_BATCH_SIZE: u64 = 256;

/// Errors returned when subscribe options fail validation.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// A stream, consumer or durable name is empty or contains a forbidden
    /// character.
    #[error("invalid {field} name {value:?}: must be non-empty without whitespace, '.', '*' or '>'")]
    InvalidName { field: &'static str, value: String },
    /// The push delivery subject is empty or contains whitespace.
    #[error("invalid deliver subject {0:?}")]
    InvalidDeliverSubject(String),
    /// Pull batch size outside `1..=MAX_PULL_BATCH_SIZE`.
    #[error("pull batch size {0} out of range 1..={MAX_PULL_BATCH_SIZE}")]
    InvalidPullBatchSize(u64),
}

/// Server-side consumer settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerConfiguration {
    pub durable: Option<String>,
    pub deliver_subject: Option<String>,
    pub filter_subject: Option<String>,
    /// Upper bound on unacknowledged messages the server will push.
    pub max_ack_pending: Option<u64>,
}

impl ConsumerConfiguration {
    #[must_use]
    pub fn with_durable(mut self, name: impl Into<String>) -> Self {
        self.durable = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_deliver_subject(mut self, subject: impl Into<String>) -> Self {
        self.deliver_subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_filter_subject(mut self, subject: impl Into<String>) -> Self {
        self.filter_subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_max_ack_pending(mut self, max: u64) -> Self {
        self.max_ack_pending = Some(max);
        self
    }
}

impl fmt::Display for ConsumerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsumerConfiguration{{durable={:?}, deliver_subject={:?}, filter_subject={:?}}}",
            self.durable, self.deliver_subject, self.filter_subject
        )
    }
}

/// Validated subscribe options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    stream: Option<String>,
    consumer: Option<String>,
    consumer_configuration: ConsumerConfiguration,
    auto_ack: bool,
    pull_batch_size: u64,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            stream: None,
            consumer: None,
            consumer_configuration: ConsumerConfiguration::default(),
            auto_ack: true,
            pull_batch_size: 0,
        }
    }
}

impl SubscribeOptions {
    #[must_use]
    pub fn builder() -> SubscribeOptionsBuilder { SubscribeOptionsBuilder::default() }

    #[must_use]
    pub fn stream(&self) -> Option<&str> { self.stream.as_deref() }

    #[must_use]
    pub fn consumer(&self) -> Option<&str> { self.consumer.as_deref() }

    #[must_use]
    pub fn consumer_configuration(&self) -> &ConsumerConfiguration { &self.consumer_configuration }

    #[must_use]
    pub fn auto_ack(&self) -> bool { self.auto_ack }

    /// Batch size for pull subscriptions; `0` for push.
    #[must_use]
    pub fn pull_batch_size(&self) -> u64 { self.pull_batch_size }

    #[must_use]
    pub fn is_pull(&self) -> bool { self.pull_batch_size > 0 }
}

impl fmt::Display for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SubscribeOptions{{stream={:?}, consumer={:?}, {}, auto_ack={}, pull={}}}",
            self.stream,
            self.consumer,
            self.consumer_configuration,
            self.auto_ack,
            self.pull_batch_size
        )
    }
}

/// Builder for [`SubscribeOptions`].
///
/// Setters record values; [`build`](Self::build) validates them all.
///
/// # Examples
///
/// ```
/// use streamlink::{ConsumerConfiguration, SubscribeOptions};
///
/// let shared = ConsumerConfiguration::default().with_filter_subject("orders.>");
/// let options = SubscribeOptions::builder()
///     .configuration("ORDERS", &shared)
///     .durable("billing")
///     .build()
///     .expect("valid options");
///
/// assert_eq!(options.consumer_configuration().durable.as_deref(), Some("billing"));
/// assert!(shared.durable.is_none());
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct SubscribeOptionsBuilder {
    stream: Option<String>,
    consumer: Option<String>,
    consumer_configuration: Option<ConsumerConfiguration>,
    auto_ack: bool,
    durable: Option<String>,
    deliver_subject: Option<String>,
    pull_batch_size: Option<u64>,
}

impl Default for SubscribeOptionsBuilder {
    fn default() -> Self {
        Self {
            stream: None,
            consumer: None,
            consumer_configuration: None,
            auto_ack: true,
            durable: None,
            deliver_subject: None,
            pull_batch_size: None,
        }
    }
}

impl SubscribeOptionsBuilder {
    /// Bind to `stream` using a copy of `configuration`.
    pub fn configuration(mut self, stream: impl Into<String>, configuration: &ConsumerConfiguration) -> Self {
        self.stream = Some(stream.into());
        self.consumer_configuration = Some(configuration.clone());
        self
    }

    /// Use a copy of `configuration` without naming a stream.
    pub fn consumer_configuration(mut self, configuration: &ConsumerConfiguration) -> Self {
        self.consumer_configuration = Some(configuration.clone());
        self
    }

    pub fn durable(mut self, name: impl Into<String>) -> Self {
        self.durable = Some(name.into());
        self
    }

    pub fn auto_ack(mut self, enabled: bool) -> Self {
        self.auto_ack = enabled;
        self
    }

    /// Make this a pull subscription fetching `batch_size` messages at a time.
    pub fn pull(mut self, batch_size: u64) -> Self {
        self.pull_batch_size = Some(batch_size);
        self
    }

    /// Pull from an existing consumer.
    pub fn pull_direct(
        mut self,
        stream: impl Into<String>,
        consumer: impl Into<String>,
        batch_size: u64,
    ) -> Self {
        self.stream = Some(stream.into());
        self.consumer = Some(consumer.into());
        self.pull_batch_size = Some(batch_size);
        self
    }

    /// Have the server push to `deliver_subject`.
    pub fn push_direct(mut self, deliver_subject: impl Into<String>) -> Self {
        self.deliver_subject = Some(deliver_subject.into());
        self
    }

    /// Bind to an existing consumer on `stream`.
    pub fn attach(mut self, stream: impl Into<String>, consumer: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self.consumer = Some(consumer.into());
        self
    }

    /// Validate and produce the options.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] for the first invalid value found.
    pub fn build(self) -> Result<SubscribeOptions, OptionsError> {
        let stream = self.stream.map(|s| validate_name("stream", s)).transpose()?;
        let consumer = self.consumer.map(|c| validate_name("consumer", c)).transpose()?;
        let durable = self.durable.map(|d| validate_name("durable", d)).transpose()?;
        let deliver_subject = self.deliver_subject.map(validate_deliver_subject).transpose()?;
        let pull_batch_size = self.pull_batch_size.map(validate_pull_batch_size).transpose()?;

        let mut consumer_configuration = self.consumer_configuration.unwrap_or_default();
        if durable.is_some() {
            consumer_configuration.durable = durable;
        }
        if deliver_subject.is_some() {
            consumer_configuration.deliver_subject = deliver_subject;
        }

        Ok(SubscribeOptions {
            stream,
            consumer,
            consumer_configuration,
            auto_ack: self.auto_ack,
            pull_batch_size: pull_batch_size.unwrap_or(0),
        })
    }
}

fn validate_name(field: &'static str, value: String) -> Result<String, OptionsError> {
    let forbidden = |c: char| c.is_whitespace() || matches!(c, '.' | '*' | '>');
    if value.is_empty() || value.contains(forbidden) {
        return Err(OptionsError::InvalidName { field, value });
    }
    Ok(value)
}

fn validate_deliver_subject(value: String) -> Result<String, OptionsError> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(OptionsError::InvalidDeliverSubject(value));
    }
    Ok(value)
}

fn validate_pull_batch_size(size: u64) -> Result<u64, OptionsError> {
    if (1..=MAX_PULL_BATCH_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(OptionsError::InvalidPullBatchSize(size))
    }
}
