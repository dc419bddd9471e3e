//! Controller role: volume create / delete / capacity.
//!
//! The controller resolves a backend through the [`BackendRegistry`],
//! delegates allocation to it, and wraps the result in a [`VolumeHandle`]
//! that records which backend owns the volume.  Node-side state is never
//! consulted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::backend::{GIB, round_up_to_gib};
use crate::error::CsiError;
use crate::handle::{HANDLE_SEPARATOR, VolumeHandle};
use crate::lock::KeyedLocks;
use crate::registry::BackendRegistry;
use crate::types::{
    AccessMode, CapacityRange, ControllerCapability, CreateVolumeRequest, DEVICE_PATH_KEY,
    GetCapacityRequest, Topology, Volume, VolumeCapability,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// The returned [`Volume`] carries the handle, the device path and the
    /// topology segment that subsequent Node operations need.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeHandle) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeHandle,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// List all volumes across every pool.
    ///
    /// Handles carry the pool name, so a volume created through the
    /// `"default"` alias is listed as `<first-pool>/<id>`.  Both handles
    /// address the same volume (see [`BackendRegistry::canonical_name`]).
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError>;

    /// Return the available capacity of the requested pool in bytes.
    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<u64, CsiError>;

    /// RPCs this controller implements.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}

/// Access modes the driver advertises.
const SUPPORTED_ACCESS_MODES: &[AccessMode] = &[AccessMode::SingleNodeWriter];

/// Registry-backed [`CsiController`].
pub struct VolumeController {
    registry: Arc<BackendRegistry>,
    /// Node name stamped into topology; `None` makes CreateVolume fail.
    node_name: Option<String>,
    locks: KeyedLocks,
}

impl VolumeController {
    /// Create a controller over `registry`.
    ///
    /// `node_name` identifies the node volumes are placed on; an empty
    /// string is treated as absent.
    pub fn new(registry: Arc<BackendRegistry>, node_name: Option<String>) -> Self {
        Self {
            registry,
            node_name: node_name.filter(|n| !n.is_empty()),
            locks: KeyedLocks::new(),
        }
    }

    /// Lock key of a volume, shared by every handle that addresses it.
    fn lock_key(&self, backend_name: &str, local_id: &str) -> String {
        format!(
            "{}{HANDLE_SEPARATOR}{local_id}",
            self.registry.canonical_name(backend_name)
        )
    }

    fn to_volume(&self, handle: VolumeHandle, size_bytes: u64, device_path: String) -> Volume {
        Volume {
            volume_id: handle,
            capacity_bytes: size_bytes,
            volume_context: HashMap::from([(DEVICE_PATH_KEY.to_owned(), device_path.clone())]),
            device_path,
            accessible_topology: self
                .node_name
                .as_deref()
                .map(Topology::node)
                .into_iter()
                .collect(),
        }
    }
}

/// Size to provision for `range`, rounded up to whole GiB.
fn provisioned_size(range: Option<CapacityRange>) -> Result<u64, CsiError> {
    let range = range.unwrap_or_default();
    let size = round_up_to_gib(range.required_bytes).ok_or_else(|| {
        CsiError::invalid(format!("requested size {} is too large", range.required_bytes))
    })?;
    if range.limit_bytes != 0 && size > range.limit_bytes {
        return Err(CsiError::invalid(format!(
            "rounded size {size} exceeds limit {}",
            range.limit_bytes
        )));
    }
    Ok(size)
}

#[async_trait]
impl CsiController for VolumeController {
    #[instrument(skip(self), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let size_bytes = provisioned_size(req.capacity_range)?;
        let (backend_name, backend) = self.registry.resolve(req.backend_name())?;

        // Topology needs a node to point at; refuse to hand out an
        // unplaceable volume.
        let Some(node_name) = self.node_name.as_deref() else {
            return Err(CsiError::invalid("node name unset"));
        };

        let local_id = uuid::Uuid::new_v4().to_string();
        let handle = VolumeHandle::encode(backend_name, &local_id)?;

        let info = backend.create_volume(&local_id, size_bytes / GIB).await?;
        info!(
            %handle,
            backend = backend_name,
            node = node_name,
            size_bytes = info.size_bytes,
            "volume created",
        );

        Ok(self.to_volume(handle, info.size_bytes, info.device_path))
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeHandle) -> Result<(), CsiError> {
        let (backend_name, local_id) = volume_id.decode()?;
        let (_, backend) = self.registry.resolve(Some(backend_name))?;
        let _guard = self.locks.lock(&self.lock_key(backend_name, local_id)).await;

        match backend.delete_volume(local_id).await {
            Ok(()) => info!(%volume_id, "volume deleted"),
            Err(CsiError::VolumeNotFound(_)) => {
                debug!(%volume_id, "volume already absent, treating delete as success");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeHandle,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        if capabilities.is_empty() {
            return Err(CsiError::invalid("volume capabilities missing in request"));
        }
        let (backend_name, local_id) = volume_id.decode()?;
        let (_, backend) = self.registry.resolve(Some(backend_name))?;
        backend.get_volume(local_id).await?;

        Ok(capabilities
            .iter()
            .all(|cap| SUPPORTED_ACCESS_MODES.contains(&cap.access_mode)))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        let mut volumes = Vec::new();
        for (pool, backend) in self.registry.pools() {
            for info in backend.list_volumes().await? {
                let handle = VolumeHandle::encode(pool, &info.volume_id)?;
                volumes.push(self.to_volume(handle, info.size_bytes, info.device_path));
            }
        }
        Ok(volumes)
    }

    #[instrument(skip(self))]
    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<u64, CsiError> {
        let (backend_name, backend) = self.registry.resolve(req.backend_name())?;
        let capacity = backend.capacity().await.map_err(|e| match e {
            CsiError::BackendError(msg) => CsiError::Internal(msg),
            other => other,
        })?;
        debug!(backend = backend_name, capacity, "capacity queried");
        Ok(capacity)
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::GetCapacity,
            ControllerCapability::ListVolumes,
        ])
    }
}
