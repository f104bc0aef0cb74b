//! Error types shared by the scheduler and the plugin contracts.
//!
//! The split follows how far a failure is allowed to reach:
//! - [`ProtocolError`] comes out of the protocol client.
//! - [`HandlerError`] comes out of a device handler and decides whether only
//!   the handler's turn or the whole poll cycle is aborted.
//! - [`PersistError`] comes out of a data handler and never leaves it.
//! - [`SourceError`] comes out of inventory and type sources.

use std::any::Any;

use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a protocol client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The device did not answer within the client's timeout.
    #[error("Timeout querying {target}")]
    Timeout { target: String },

    /// The request could not be sent or the response could not be decoded.
    #[error("Protocol error: {0}")]
    Other(String),
}

/// Errors raised by a device handler plugin.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Protocol timeout. Aborts only the current handler's turn.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Any other protocol failure. Aborts the poll cycle.
    #[error("Protocol failure: {0}")]
    Protocol(String),

    /// Handler-internal failure. Aborts the poll cycle.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The plugin was written against an interface this engine no longer offers.
    #[error("Obsolete plugin interface: {0}")]
    ObsoleteInterface(String),

    /// The handler panicked. Aborts the poll cycle.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// True for failures that only abort the current handler's turn.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Wrap a panic payload caught around a handler call.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Timeout { target } => HandlerError::Timeout(target),
            ProtocolError::Other(msg) => HandlerError::Protocol(msg),
        }
    }
}

/// Errors raised by a data handler while initializing storage or persisting.
#[derive(Error, Debug)]
pub enum PersistError {
    /// The persistence layer rejected a statement.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The container handed to the handler was not the one it created.
    #[error("Unexpected container: {0}")]
    ContainerMismatch(String),

    #[error("Persist error: {0}")]
    Other(String),

    #[error("Data handler panicked: {0}")]
    Panicked(String),
}

impl PersistError {
    /// Wrap a panic payload caught around a data handler call.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// Text of a panic payload, for the `&str` and `String` payloads `panic!` produces.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Errors raised by inventory and type sources.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source could not be reached.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// A row from the source could not be interpreted.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Failure of the scheduling machinery itself.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Two plugins were registered under the same id.
    #[error("Duplicate plugin id: {0}")]
    DuplicatePlugin(String),

    /// Invalid device type definition.
    #[error("Invalid device type {type_id}: {message}")]
    InvalidType { type_id: String, message: String },
}
