//! Pluggable volume backends.
//!
//! A backend carves block devices out of one physical pool.  Every backend
//! implements [`VolumeBackend`]; the controller never branches on the
//! concrete type.
//!
//! | Kind | Type | Pool |
//! |---|---|---|
//! | `lvm` | [`LvmBackend`] | one LVM volume group |
//! | `fake` | [`FakeBackend`] | none (stateless, for tests) |

pub mod fake;
pub mod lvm;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CsiError;

pub use fake::FakeBackend;
pub use lvm::LvmBackend;

/// One gibibyte, the allocation granularity of every backend.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Size provisioned when the caller does not ask for one.
pub const MIN_VOLUME_BYTES: u64 = GIB;

/// Metadata reported by a backend for one of its volumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Backend-local volume ID.
    pub volume_id: String,
    /// Allocated size in bytes.
    pub size_bytes: u64,
    /// Block device path on the node.
    pub device_path: String,
}

/// Capability set shared by all backends.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Allocate `size_gib` GiB under `volume_id`.
    async fn create_volume(&self, volume_id: &str, size_gib: u64) -> Result<VolumeInfo, CsiError>;

    /// Release `volume_id`.
    ///
    /// Should return [`CsiError::VolumeNotFound`] when the ID is unknown, so
    /// the controller can treat a repeated delete as success.
    async fn delete_volume(&self, volume_id: &str) -> Result<(), CsiError>;

    /// List every volume in the pool.
    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, CsiError>;

    /// Look up one volume.
    async fn get_volume(&self, volume_id: &str) -> Result<VolumeInfo, CsiError>;

    /// Pool capacity in bytes.
    async fn capacity(&self) -> Result<u64, CsiError>;
}

/// Declared backend kind, parsed from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// LVM volume groups.
    Lvm,
    /// Stateless test backend.
    Fake,
}

impl FromStr for BackendKind {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lvm" => Ok(Self::Lvm),
            "fake" => Ok(Self::Fake),
            other => Err(CsiError::Configuration(format!(
                "unrecognized backend type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lvm => "lvm",
            Self::Fake => "fake",
        })
    }
}

/// Round a requested size up to whole GiB.
///
/// `0` yields [`MIN_VOLUME_BYTES`].  Already-aligned sizes are returned
/// unchanged.  Returns `None` if the rounded size does not fit in `u64`.
pub fn round_up_to_gib(bytes: u64) -> Option<u64> {
    if bytes == 0 {
        return Some(MIN_VOLUME_BYTES);
    }
    bytes.div_ceil(GIB).checked_mul(GIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rounds_to_minimum() {
        assert_eq!(round_up_to_gib(0), Some(1_073_741_824));
    }

    #[test]
    fn rounding_is_idempotent() {
        for bytes in [1, GIB - 1, GIB, GIB + 1, 10 * GIB, 10 * GIB + 7] {
            let once = round_up_to_gib(bytes).unwrap();
            assert_eq!(once % GIB, 0);
            assert!(once >= bytes);
            assert_eq!(round_up_to_gib(once), Some(once));
        }
    }

    #[test]
    fn rounding_is_monotonic() {
        let sizes = [1, 512, GIB, GIB + 1, 2 * GIB, 3 * GIB - 1];
        for pair in sizes.windows(2) {
            assert!(round_up_to_gib(pair[0]) <= round_up_to_gib(pair[1]));
        }
    }

    #[test]
    fn rounding_overflow() {
        assert_eq!(round_up_to_gib(u64::MAX), None);
    }

    #[test]
    fn backend_kind_parse() {
        assert_eq!("lvm".parse::<BackendKind>().unwrap(), BackendKind::Lvm);
        assert_eq!("fake".parse::<BackendKind>().unwrap(), BackendKind::Fake);
        let err = "zfs".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, CsiError::Configuration(_)));
    }
}
