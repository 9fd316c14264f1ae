//! Error types for gaxgate.

use std::io;
use thiserror::Error;

/// Main error type for gaxgate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Channel-level errors (open, read, write)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Modem control protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Builder/configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Runtime setup failures
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors.
///
/// Every variant is terminal for the side of the session it happened on.
/// `RemoteClosed` is the expected way for a peer to hang up and is only
/// distinguished so it can be logged quietly.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer closed its end of the connection
    #[error("Remote end closed connection")]
    RemoteClosed,

    /// I/O failure on an open channel
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The channel could not be opened
    #[error("Failed to open '{target}': {message}")]
    OpenFailed { target: String, message: String },

    /// The connection string could not be parsed
    #[error("Invalid connection string '{0}'")]
    InvalidTarget(String),

    /// Operation on a channel that is already closed
    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    /// Whether this error is the peer hanging up rather than a failure.
    pub fn is_remote_closed(&self) -> bool {
        match self {
            ChannelError::RemoteClosed => true,
            ChannelError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Modem control protocol errors.
///
/// These are caught per command line and never end the control session.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Blank command line
    #[error("Empty command line")]
    Empty,

    /// A command arrived without its required arguments
    #[error("'{command}' expects {expected} arguments, got {got}")]
    MissingArguments {
        command: String,
        expected: usize,
        got: usize,
    },

    /// A command arrived in a state where it makes no sense
    #[error("Unexpected '{command}': {reason}")]
    UnexpectedEvent { command: String, reason: String },
}

/// Configuration errors raised by the builders.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting was not provided
    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    /// A setting has an unusable value
    #[error("Invalid value for '{name}': {message}")]
    Invalid { name: &'static str, message: String },

    /// A connection string could not be parsed
    #[error("Invalid connection string: {0}")]
    Target(#[from] ChannelError),
}

/// Result type alias using gaxgate's Error.
pub type Result<T> = std::result::Result<T, Error>;
