//! Error type shared by every areg layer

use thiserror::Error;

use crate::message::ResultType;

type Source = Option<Box<dyn std::error::Error + Send + Sync>>;

fn boxed<E>(source: E) -> Source
where
    E: std::error::Error + Send + Sync + 'static,
{
    Some(Box::new(source))
}

/// Error of every areg operation
#[derive(Error, Debug)]
pub enum Error {
    // Sockets and the router link
    #[error("Transport layer error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Router frame that violates the wire format
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        expected: Option<String>,
        received: Option<String>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    // Hub, dispatcher threads and components
    #[error("Stub with role '{role}' not found")]
    StubNotFound { role: String },

    /// Thread, role or class names that must be unique in a process
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// Dispatcher thread is missing or no longer accepts events
    #[error("Dispatcher thread '{thread}' is not running")]
    DispatcherStopped { thread: String },

    /// Component model used in the wrong state, e.g. loaded twice
    #[error("Service lifecycle error: {message}")]
    ServiceLifecycle {
        message: String,
        service: String,
        state: String,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Calls through a proxy
    /// Message identifier not part of a service interface
    #[error("Message 0x{msg_id:04X} is not part of service '{service}'")]
    UnknownMessage { service: String, msg_id: u32 },

    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<String>,
    },

    /// The stub answered with a result code other than success
    #[error("Request 0x{msg_id:04X} failed with {result:?}")]
    RequestFailed { msg_id: u32, result: ResultType },

    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Event payload that cannot be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: boxed(source),
        }
    }

    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: boxed(source),
        }
    }

    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol(
        message: impl Into<String>,
        expected: Option<String>,
        received: Option<String>,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            expected,
            received,
        }
    }

    pub fn stub_not_found(role: impl Into<String>) -> Self {
        Self::StubNotFound { role: role.into() }
    }

    pub fn duplicate_name(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    pub fn dispatcher_stopped(thread: impl Into<String>) -> Self {
        Self::DispatcherStopped {
            thread: thread.into(),
        }
    }

    pub fn service_lifecycle(
        message: impl Into<String>,
        service: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::ServiceLifecycle {
            message: message.into(),
            service: service.into(),
            state: state.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field,
        }
    }

    pub fn runtime<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Runtime {
            message: message.into(),
            source: boxed(source),
        }
    }

    pub fn runtime_msg(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    pub fn unknown_message(service: impl Into<String>, msg_id: u32) -> Self {
        Self::UnknownMessage {
            service: service.into(),
            msg_id,
        }
    }

    pub fn invalid_request(message: impl Into<String>, context: Option<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context,
        }
    }

    pub fn request_failed(msg_id: u32, result: ResultType) -> Self {
        Self::RequestFailed { msg_id, result }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether the same operation may succeed later: lost or unreachable
    /// connections, timeouts, and calls the stub answered busy or that
    /// could not be delivered
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. }
            | Error::Connection { .. }
            | Error::Io { .. }
            | Error::Timeout { .. } => true,
            Error::RequestFailed { result, .. } => matches!(
                result,
                ResultType::RequestBusy | ResultType::MessageUndelivered
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization {
            message: "bincode encoding failed".to_string(),
            source: boxed(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::configuration(format!("JSON parsing failed: {err}"), None)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::runtime_msg(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::runtime_msg(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
