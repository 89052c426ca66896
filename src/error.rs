use std::fmt;

use thiserror::Error;

use crate::config::IntegrationConfig;

/// Errors produced while delivering a notification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("notification rate limited")]
    RateLimited,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Transport level failure, the equivalent of a failed HTTP round trip.
    #[error("{method} \"{url}\": {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
        timeout: bool,
    },

    #[error("unexpected status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to build payload: {0}")]
    Payload(String),

    #[error("{0}")]
    Sender(String),
}

impl NotifyError {
    /// Whether the calling pipeline should retry this attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Cancelled | Self::Payload(_) => false,
            Self::DeadlineExceeded | Self::Transport { .. } | Self::Sender(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::Transport { timeout: true, .. }
        )
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// Errors raised while parsing and validating integration settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("notifier {0} is not supported")]
    Unsupported(String),

    #[error("failed to unmarshal settings: {0}")]
    Unmarshal(#[from] serde_json::Error),

    #[error("failed to decode secure settings key {key}: {source}")]
    SecretDecode {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    /// A required field is absent.
    #[error("{0}")]
    Required(&'static str),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// A settings error attributed to one integration.
#[derive(Error, Debug)]
#[error("failed to validate integration \"{name}\" (UID {uid}) of type \"{integration_type}\": {source}")]
pub struct IntegrationValidationError {
    pub uid: String,
    pub name: String,
    pub integration_type: String,
    #[source]
    pub source: ConfigError,
}

impl IntegrationValidationError {
    pub fn new(config: &IntegrationConfig, source: ConfigError) -> Self {
        Self {
            uid: config.uid.clone(),
            name: config.name.clone(),
            integration_type: config.integration_type.clone(),
            source,
        }
    }
}

/// Failure to construct the notifier of one integration.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to build integration \"{name}\" (UID {uid}) of type \"{integration_type}\": {reason}")]
pub struct BuildError {
    pub uid: String,
    pub name: String,
    pub integration_type: String,
    pub reason: String,
}

/// Every construction failure of one receiver build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildErrors(pub Vec<BuildError>);

impl fmt::Display for BuildErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.0)
    }
}

impl std::error::Error for BuildErrors {}

/// Every required field a history entry is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryValidationError(pub Vec<&'static str>);

impl fmt::Display for HistoryValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.0)
    }
}

impl std::error::Error for HistoryValidationError {}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// A receiver whose integration could not be built during a test dispatch.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("the receiver is invalid: {reason}")]
pub struct InvalidReceiverError {
    pub receiver: String,
    pub reason: String,
}

/// A test notification that did not complete in time.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("the receiver timed out: {source}")]
pub struct IntegrationTimeoutError {
    pub uid: String,
    pub name: String,
    pub integration_type: String,
    #[source]
    pub source: NotifyError,
}

/// Classified outcome of one failed integration in a test report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error(transparent)]
    Timeout(#[from] IntegrationTimeoutError),

    #[error(transparent)]
    Invalid(#[from] InvalidReceiverError),

    #[error(transparent)]
    Notify(NotifyError),
}

#[derive(Error, Debug)]
pub enum TestReceiversError {
    #[error("no receivers")]
    NoReceivers,

    #[error("test dispatch worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("notification log query failed: {0}")]
    Log(String),

    #[error("unexpected entry result size {0}")]
    UnexpectedEntries(usize),

    #[error("missing {0} in notification context")]
    MissingContext(&'static str),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] IntegrationValidationError),

    #[error(transparent)]
    Build(#[from] BuildErrors),

    #[error(transparent)]
    TestReceivers(#[from] TestReceiversError),

    #[error("receiver not found: {0}")]
    ReceiverNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
