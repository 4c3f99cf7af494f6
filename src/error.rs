//! # Bridge Error Types
//!
//! Structured error handling for the host-side bridge using thiserror.
//! Registry misuse (double release, lookup of an unknown token) is a caller
//! contract and is never reported through these types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed constructing IO poll pipe: {source}")]
    PipeCreation {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed closing IO poll pipe ({end} end): {source}")]
    PipeClose {
        end: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed spawning IO reader thread: {source}")]
    ReaderSpawn {
        #[source]
        source: std::io::Error,
    },

    #[error("IO reader thread panicked for fd {fd}")]
    ReaderJoin { fd: i32 },

    #[error("Unable to create new native topic \"{topic}\": {message}")]
    TopicCreation { topic: String, message: String },

    #[error("No partition queue available for {topic} [{partition}]")]
    PartitionQueueUnavailable { topic: String, partition: i32 },

    #[error("Invalid handle state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Handle {name} is closed")]
    HandleClosed { name: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Foreign library error: {operation}: {message}")]
    Foreign { operation: String, message: String },
}

impl BridgeError {
    /// Create a pipe construction error
    pub fn pipe(source: std::io::Error) -> Self {
        Self::PipeCreation { source }
    }

    /// Create a pipe close error for the given end ("reader" or "writer")
    pub fn pipe_close(end: &'static str, source: std::io::Error) -> Self {
        Self::PipeClose { end, source }
    }

    /// Create a native topic creation error
    pub fn topic_creation(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TopicCreation {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a foreign library error
    pub fn foreign(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Foreign {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True when the operation was refused because the handle is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::HandleClosed { .. })
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::configuration(err.to_string())
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::topic_creation("orders", "Invalid argument");
        let display = format!("{err}");
        assert!(display.contains("orders"));
        assert!(display.contains("Invalid argument"));

        let err = BridgeError::pipe(std::io::Error::from_raw_os_error(libc::EMFILE));
        assert!(format!("{err}").contains("IO poll pipe"));
    }

    #[test]
    fn test_error_classification() {
        let closed = BridgeError::HandleClosed {
            name: "rdkafka#consumer-1".to_string(),
        };
        assert!(closed.is_closed());
        assert!(!BridgeError::configuration("bad").is_closed());
    }
}
