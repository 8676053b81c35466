use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Startup configuration failures. Any of these stops the exporter before it
/// accepts a single event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Failure of a single `PutEvents` submission.
///
/// These never propagate past the dispatcher: they are reported, counted and
/// the batch is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The batch could not be turned into a valid request. Data dropped.
    #[error("failed to build request: {0}")]
    Payload(String),

    /// The destination answered with an error.
    #[error("destination rejected batch (status {status:?}): {message}")]
    Destination {
        status: Option<u16>,
        message: String,
    },

    /// Network, timeout or any other failure before a response was read.
    #[error("transport error: {0}")]
    Transport(String),
}
