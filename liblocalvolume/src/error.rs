//! Driver error types.
//!
//! All errors in the `liblocalvolume` crate are represented by the
//! [`CsiError`] enum, which derives [`thiserror::Error`] for ergonomic error
//! handling and also implements [`Serialize`]/[`Deserialize`] so errors can
//! travel across the QUIC transport layer.
//!
//! Callers that need to decide on retry policy should look at
//! [`CsiError::code`] rather than matching on individual variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for driver operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid or incomplete request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A request named a backend that is not in the registry.
    #[error("backend {0} not found")]
    BackendNotFound(String),

    /// A volume handle could not be decoded into `<backend>/<local-id>`.
    #[error("malformed volume handle {0:?}: expected <backend>/<local-id>")]
    MalformedHandle(String),

    /// The backend does not recognize the requested local volume ID.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The volume backend (e.g. LVM) returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The driver was started with an unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse status class of a [`CsiError`], mirroring the gRPC codes a CSI
/// container orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// Client specified an invalid argument. Not retryable as-is.
    InvalidArgument,
    /// The referenced volume or handle is unknown.
    NotFound,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// Internal failure of a collaborator (backend, mounter).
    Internal,
    /// The service could not be reached.
    Unavailable,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::InvalidArgument => "InvalidArgument",
            Code::NotFound => "NotFound",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
        };
        f.write_str(s)
    }
}

impl CsiError {
    /// Status class reported to the caller.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) | Self::BackendNotFound(_) => Code::InvalidArgument,
            Self::MalformedHandle(_) | Self::VolumeNotFound(_) => Code::NotFound,
            Self::Configuration(_) => Code::FailedPrecondition,
            Self::TransportError(_) => Code::Unavailable,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => Code::Internal,
        }
    }

    /// Create a [`CsiError::InvalidArgument`] from a message.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}
