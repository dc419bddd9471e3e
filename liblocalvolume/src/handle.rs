//! Volume handle codec.
//!
//! A handle is the only durable reference to a volume across calls.  It
//! records which backend created the volume so that DeleteVolume can route
//! back to the same pool:
//!
//! ```text
//! <backend-name>/<backend-local-id>
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

/// Separator between backend name and local volume ID.
pub const HANDLE_SEPARATOR: char = '/';

/// Opaque, globally routable identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeHandle(pub String);

impl VolumeHandle {
    /// Join `backend` and `local_id` into a handle.
    ///
    /// Neither part may contain the separator, otherwise the handle could
    /// not be decoded again.
    pub fn encode(backend: &str, local_id: &str) -> Result<Self, CsiError> {
        if backend.contains(HANDLE_SEPARATOR) {
            return Err(CsiError::Internal(format!(
                "backend name {backend:?} contains {HANDLE_SEPARATOR:?}"
            )));
        }
        if local_id.contains(HANDLE_SEPARATOR) {
            return Err(CsiError::Internal(format!(
                "local volume id {local_id:?} contains {HANDLE_SEPARATOR:?}"
            )));
        }
        Ok(Self(format!("{backend}{HANDLE_SEPARATOR}{local_id}")))
    }

    /// Split the handle into `(backend, local_id)`.
    ///
    /// Exactly one separator is accepted; anything else is
    /// [`CsiError::MalformedHandle`].
    pub fn decode(&self) -> Result<(&str, &str), CsiError> {
        match self.0.split_once(HANDLE_SEPARATOR) {
            Some((backend, local_id)) if !local_id.contains(HANDLE_SEPARATOR) => {
                Ok((backend, local_id))
            }
            _ => Err(CsiError::MalformedHandle(self.0.clone())),
        }
    }

    /// The raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
