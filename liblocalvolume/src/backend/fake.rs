//! Stateless backend used to exercise the controller without a real pool.

use async_trait::async_trait;

use super::{GIB, VolumeBackend, VolumeInfo};
use crate::error::CsiError;

/// Device path reported for every "created" volume.
pub const FAKE_DEVICE_PATH: &str = "/dev/xxx";

/// A backend that allocates nothing and remembers nothing.
#[derive(Debug, Default, Clone)]
pub struct FakeBackend {
    capacity_bytes: u64,
}

impl FakeBackend {
    /// A fake pool reporting `capacity_bytes` from [`VolumeBackend::capacity`].
    pub fn new(capacity_bytes: u64) -> Self {
        Self { capacity_bytes }
    }
}

#[async_trait]
impl VolumeBackend for FakeBackend {
    async fn create_volume(&self, volume_id: &str, size_gib: u64) -> Result<VolumeInfo, CsiError> {
        Ok(VolumeInfo {
            volume_id: volume_id.to_owned(),
            size_bytes: size_gib * GIB,
            device_path: FAKE_DEVICE_PATH.to_owned(),
        })
    }

    async fn delete_volume(&self, _volume_id: &str) -> Result<(), CsiError> {
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, CsiError> {
        Ok(Vec::new())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeInfo, CsiError> {
        Err(CsiError::VolumeNotFound(volume_id.to_owned()))
    }

    async fn capacity(&self) -> Result<u64, CsiError> {
        Ok(self.capacity_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_backend_contract() {
        let backend = FakeBackend::new(100 * GIB);

        let info = backend.create_volume("v1", 10).await.unwrap();
        assert_eq!(info.volume_id, "v1");
        assert_eq!(info.size_bytes, 10 * GIB);
        assert_eq!(info.device_path, "/dev/xxx");

        backend.delete_volume("v1").await.unwrap();
        backend.delete_volume("never-existed").await.unwrap();
        assert!(backend.list_volumes().await.unwrap().is_empty());
        assert!(matches!(
            backend.get_volume("v1").await,
            Err(CsiError::VolumeNotFound(_))
        ));
        assert_eq!(backend.capacity().await.unwrap(), 100 * GIB);
    }
}
