use std::sync::Arc;

/// Result type used throughout the SDK, with [`Error`] as the error variant.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK.
///
/// Only configuration and construction paths return errors. Evaluation
/// never does: data problems degrade to the caller's default value.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The SDK key is required to talk to the server.
    #[error("server_sdk_key is required and must not be blank")]
    MissingSdkKey,

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid SDK key.
    #[error("unauthorized, server_sdk_key is likely invalid")]
    Unauthorized,

    /// A repository document could not be parsed.
    #[error("error parsing repository data")]
    RepositoryParseError,

    /// The bounded wait for the first synchronization elapsed. The
    /// background synchronizer keeps running.
    #[error("timed out waiting for the first repository sync")]
    InitializationTimeout,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
