//! Error types
//!
//! Every fallible operation in the crate returns [`Result`]. Errors fall into
//! four groups:
//!
//! - [`ConfigError`]: the startup document or a programmatic call names
//!   something that does not exist or cannot be decoded. Never retried.
//! - [`ConnectionError`]: a peer closed, timed out or reset. Local to one
//!   adapter.
//! - [`Error::Factory`]: an adapter could not be constructed or initialized
//!   (bind failure, spawn failure). Aborts startup.
//! - [`Error::Io`]: raw IO failures surfaced by adapters.
//!
//! Backpressure drops are not errors; they are counted in [`crate::stats`].

use std::fmt;
use std::io;

use crate::component::Role;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Misconfiguration detected before or while wiring the topology
    Config(ConfigError),
    /// Connection-level failure inside an adapter
    Connection(ConnectionError),
    /// Adapter construction or initialization failed
    Factory {
        /// Component id
        id: String,
        /// Human readable cause
        reason: String,
    },
    /// Underlying IO error
    Io(io::Error),
}

impl Error {
    /// Build a factory error for the component `id`
    pub fn factory(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Factory {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error belongs to the configuration group
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::Factory { id, reason } => {
                write!(f, "failed to create component '{}': {}", id, reason)
            }
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Connection(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Factory { .. } => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Connection(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Error::Connection(ConnectionError::TimedOut),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Error::Connection(ConnectionError::Reset(e.to_string()))
            }
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
                Error::Connection(ConnectionError::Closed)
            }
            _ => Error::Io(e),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No constructor registered for this type tag in this role
    UnknownType {
        /// Role namespace that was searched
        role: Role,
        /// Requested type tag
        type_tag: String,
    },
    /// Option payload could not be decoded into the constructor's options
    InvalidOptions {
        /// Component id
        id: String,
        /// Type tag of the constructor
        type_tag: String,
        /// Decoder message
        reason: String,
    },
    /// Component id already taken in the role namespace
    DuplicateId {
        /// Namespace holding the existing id
        role: Role,
        /// Conflicting id
        id: String,
    },
    /// Pipe names a source id that is not registered
    UnknownSource(String),
    /// Pipe names a sink id that is not registered
    UnknownSink(String),
    /// Pipe declared without any destination
    EmptyPipe(String),
    /// A numeric or enumerated setting is out of range
    InvalidValue {
        /// Setting name
        field: String,
        /// Why it was rejected
        reason: String,
    },
    /// The startup document could not be read or parsed
    Document(String),
    /// The id only multiplexes other sinks and cannot be written directly
    NotWritable {
        /// Component id that was written to
        id: String,
        /// Usage hint for the operator
        hint: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownType { role, type_tag } => {
                write!(f, "unknown {} type '{}'", role, type_tag)
            }
            ConfigError::InvalidOptions {
                id,
                type_tag,
                reason,
            } => write!(f, "invalid options for '{}' ({}): {}", id, type_tag, reason),
            ConfigError::DuplicateId { role, id } => {
                write!(f, "{} id '{}' is already registered", role, id)
            }
            ConfigError::UnknownSource(id) => write!(f, "pipe references unknown source '{}'", id),
            ConfigError::UnknownSink(id) => write!(f, "pipe references unknown sink '{}'", id),
            ConfigError::EmptyPipe(id) => write!(f, "pipe from '{}' has no destinations", id),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
            ConfigError::Document(msg) => write!(f, "invalid config document: {}", msg),
            ConfigError::NotWritable { id, hint } => {
                write!(f, "cannot write directly to '{}': {}", id, hint)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Connection-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Peer closed the connection or the stream reached end of file
    Closed,
    /// Operation exceeded the adapter's timeout
    TimedOut,
    /// Connection reset by the peer
    Reset(String),
    /// The component was used before `init` or after `shutdown`
    NotReady,
    /// The producer side of a read bridge dropped a pending read
    BridgeAbandoned,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Closed => write!(f, "connection closed"),
            ConnectionError::TimedOut => write!(f, "connection timed out"),
            ConnectionError::Reset(msg) => write!(f, "connection reset: {}", msg),
            ConnectionError::NotReady => write!(f, "component is not initialized"),
            ConnectionError::BridgeAbandoned => write!(f, "read request abandoned by producer"),
        }
    }
}

impl std::error::Error for ConnectionError {}
