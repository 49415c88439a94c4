// src/error.rs

/// Result type used throughout the queuescale library
pub type QueueScaleResult<T> = Result<T, QueueScaleError>;

/// All possible errors that can occur in the queuescale library
#[derive(thiserror::Error, Debug)]
pub enum QueueScaleError {
    /// The scaling provider could not be reached or rejected the call
    #[error("Scaling provider unavailable during '{operation}': {message}")]
    ProviderUnavailable { operation: String, message: String },

    /// The policy cannot produce scaling decisions
    #[error("Invalid scaling policy: {message}")]
    InvalidPolicy { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Reading or writing the shared debounce timestamp failed
    #[error("Debounce store error: {message}")]
    DebounceStore { message: String },

    /// Listing or deregistering workers failed
    #[error("Worker registry error: {message}")]
    Registry { message: String },

    /// The job queue snapshot could not be taken
    #[error("Job queue error: {message}")]
    Queue { message: String },

    /// Engine is not running or has stopped
    #[error("Decision engine is not running: {message}")]
    EngineNotRunning { message: String },

    /// Channel communication error (internal)
    #[error("Internal channel error: {message}")]
    ChannelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Stored timestamps that do not parse
    #[error("Timestamp parse error: {source}")]
    Timestamp {
        #[from]
        source: chrono::ParseError,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl QueueScaleError {
    pub fn provider_unavailable<S: Into<String>>(operation: S, message: S) -> Self {
        Self::ProviderUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_policy<S: Into<String>>(message: S) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn debounce_store<S: Into<String>>(message: S) -> Self {
        Self::DebounceStore {
            message: message.into(),
        }
    }

    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    pub fn queue<S: Into<String>>(message: S) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    pub fn engine_not_running<S: Into<String>>(message: S) -> Self {
        Self::EngineNotRunning {
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Whether the failure came from the scaling provider
    pub fn is_provider_error(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for QueueScaleError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelError {
            message: format!("Failed to send on channel: {}", error),
        }
    }
}

/// Convert from channel receive errors
impl From<tokio::sync::oneshot::error::RecvError> for QueueScaleError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelError {
            message: format!("Failed to receive on channel: {}", error),
        }
    }
}
