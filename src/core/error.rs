//! Error taxonomy
//!
//! Satu enum per kelas kegagalan, digabung oleh [`Error`]:
//! - [`ConnectionError`]: registry/transport tidak terjangkau
//! - [`TransportError`]: exchange selesai di level transport tapi gagal
//! - [`SchemaError`]: schema string tidak valid
//! - [`DecodeError`]: buffer lebih pendek dari schema, atau UTF-8 rusak
//! - [`EncodeError`]: input tidak valid (hanya pada `Strictness::Strict`)

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::CommandId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not resolve registry address {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("i/o error on connection: {0}")]
    Io(#[from] io::Error),
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("command '{command}' failed with status {status} {reason}")]
    Status {
        command: CommandId,
        status: u16,
        reason: String,
    },
    #[error("websocket handshake for '{command}' rejected: {reason}")]
    Handshake { command: CommandId, reason: String },
    #[error("malformed response for '{command}': {reason}")]
    Protocol { command: CommandId, reason: String },
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Connection(ConnectionError::Io(e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field '{field}' is missing the ':' between type and name")]
    MissingColon { field: String },
    #[error("field '{field}' has an empty name")]
    EmptyName { field: String },
    #[error("field '{field}' has unknown type '{ty}'")]
    UnknownType { field: String, ty: String },
    #[error("field '{field}' has an invalid char block width")]
    InvalidWidth { field: String },
    #[error("field name '{name}' appears more than once")]
    DuplicateName { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("field '{field}' needs {needed} bytes but only {remaining} remain")]
    Truncated {
        field: String,
        needed: usize,
        remaining: usize,
    },
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("no value supplied for field '{name}'")]
    MissingField { name: String },
    #[error("value '{value}' is not a valid {ty} for field '{field}'")]
    InvalidNumber {
        field: String,
        ty: &'static str,
        value: String,
    },
    #[error("encoded size overflows at field '{field}'")]
    TooLarge { field: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("no contract with id '{0}' in the current snapshot")]
    UnknownCommand(CommandId),
    #[error("contract '{id}' is a {actual} command, not {expected}")]
    WrongKind {
        id: CommandId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("failed to write generated client to {path}: {source}")]
    Artifact {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Short class name, used as the explorer status line.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Connection(_) | Error::Transport(TransportError::Connection(_)) => {
                "ConnectionError"
            }
            Error::Transport(_) => "TransportError",
            Error::Schema(_) => "SchemaError",
            Error::Decode(_) => "DecodeError",
            Error::Encode(_) => "EncodeError",
            Error::UnknownCommand(_) | Error::WrongKind { .. } => "UsageError",
            Error::Artifact { .. } => "ArtifactError",
        }
    }
}

/// Discovery reports connection-level failures as [`ConnectionError`]
/// instead of nesting them inside a transport error.
pub(crate) fn lift_transport(err: TransportError) -> Error {
    match err {
        TransportError::Connection(e) => Error::Connection(e),
        other => Error::Transport(other),
    }
}
