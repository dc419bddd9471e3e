//! Node role.
//!
//! The Node service runs on each worker node and makes a provisioned block
//! device available to workloads:
//!
//! 1. **Stage**: format (if blank) and mount the device at a node-global
//!    staging path.
//! 2. **Publish**: bind-mount the staging path into a workload's target path.
//! 3. **Unpublish**: remove the bind mount.
//! 4. **Unstage**: unmount the staging path and remove it.
//!
//! No state is kept between calls.  Whether a path is mounted is read back
//! from the host on every call, which is what makes redelivered calls safe.
//! Calls touching the same path are serialized so the inspect-then-act step
//! cannot race.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::CsiError;
use crate::lock::KeyedLocks;
use crate::mount::Mounter;
use crate::types::{
    MountVolume, NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest,
    Topology, VolumeCapability,
};

/// Permissions of target directories created by publish.
const TARGET_DIR_MODE: u32 = 0o750;

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume: format and mount the device at the staging path.
    ///
    /// Idempotent: an already-mounted staging path is left alone.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume: unmount the staging path and remove it.
    ///
    /// Idempotent: a missing or unmounted staging path succeeds.
    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume: bind-mount the staging path at the target path.
    ///
    /// Idempotent: an already-mounted target path is left alone.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount the bind mount at the target path.
    ///
    /// Idempotent: a missing or unmounted target path succeeds.
    async fn unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// RPCs this node service implements.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;
}

/// [`CsiNode`] driving a [`Mounter`].
pub struct NodeMounter {
    mounter: Arc<dyn Mounter>,
    node_id: String,
    node_name: Option<String>,
    locks: KeyedLocks,
}

impl NodeMounter {
    /// Create the node service for `node_id`.
    ///
    /// `node_name` is reported as the node's topology segment.
    pub fn new(mounter: Arc<dyn Mounter>, node_id: String, node_name: Option<String>) -> Self {
        Self {
            mounter,
            node_id,
            node_name: node_name.filter(|n| !n.is_empty()),
            locks: KeyedLocks::new(),
        }
    }
}

/// The mount descriptor of a request, or InvalidArgument.
fn mount_capability(
    cap: Option<&VolumeCapability>,
) -> Result<(&VolumeCapability, &MountVolume), CsiError> {
    cap.and_then(|c| c.mount.as_ref().map(|m| (c, m)))
        .ok_or_else(|| CsiError::invalid("volume capability missing in request"))
}

fn inspect_failed(path: &str, e: io::Error) -> CsiError {
    CsiError::Internal(format!("inspect {path}: {e}"))
}

#[async_trait]
impl CsiNode for NodeMounter {
    #[instrument(skip(self), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        let (cap, mount) = mount_capability(req.volume_capability.as_ref())?;
        let device_path = req.device_path();
        if device_path.is_empty() {
            return Err(CsiError::invalid("device path missing in request"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::invalid("staging target path missing in request"));
        }

        let staging = Path::new(&req.staging_target_path);
        let _guard = self.locks.lock(&req.staging_target_path).await;

        let not_mounted = self
            .mounter
            .is_likely_not_mount_point(staging)
            .await
            .map_err(|e| inspect_failed(&req.staging_target_path, e))?;
        if !not_mounted {
            debug!(path = %req.staging_target_path, "staging path already mounted");
            return Ok(());
        }

        let mut options = vec![if cap.access_mode.is_reader_only() {
            "ro".to_owned()
        } else {
            "rw".to_owned()
        }];
        options.extend(mount.mount_flags.iter().cloned());

        self.mounter
            .format_and_mount(device_path, staging, &mount.fs_type, &options)
            .await?;

        info!(device_path, path = %req.staging_target_path, "volume staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        if staging_target_path.is_empty() {
            return Err(CsiError::invalid("staging target path missing in request"));
        }
        let _guard = self.locks.lock(staging_target_path).await;

        self.mounter
            .unmount_path(Path::new(staging_target_path))
            .await?;

        info!(volume_id, path = staging_target_path, "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let (_, mount) = mount_capability(req.volume_capability.as_ref())?;
        if req.target_path.is_empty() {
            return Err(CsiError::invalid("target path missing in request"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::invalid("staging target path missing in request"));
        }

        let target = Path::new(&req.target_path);
        let _guard = self.locks.lock(&req.target_path).await;

        let not_mounted = match self.mounter.is_likely_not_mount_point(target).await {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(TARGET_DIR_MODE)
                    .create(target)
                    .await
                    .map_err(|e| CsiError::Internal(format!("create {}: {e}", req.target_path)))?;
                true
            }
            Err(e) => return Err(inspect_failed(&req.target_path, e)),
        };
        if !not_mounted {
            debug!(target_path = %req.target_path, "target already mounted");
            return Ok(());
        }

        let mut options = vec!["bind".to_owned()];
        options.extend(mount.mount_flags.iter().cloned());
        if req.read_only {
            options.push("ro".to_owned());
        }

        self.mounter
            .mount(&req.staging_target_path, target, "", &options)
            .await?;

        info!(
            target_path = %req.target_path,
            read_only = req.read_only,
            "volume published (bind mount)",
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<(), CsiError> {
        if target_path.is_empty() {
            return Err(CsiError::invalid("target path missing in request"));
        }
        let _guard = self.locks.lock(target_path).await;

        // Redelivered unpublish: nothing mounted here any more.
        match self
            .mounter
            .is_likely_not_mount_point(Path::new(target_path))
            .await
        {
            Ok(true) => {
                debug!(volume_id, "target not mounted, nothing to unpublish");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(volume_id, "target path gone, nothing to unpublish");
                return Ok(());
            }
            Err(e) => return Err(inspect_failed(target_path, e)),
            Ok(false) => {}
        }

        self.mounter.unmount(Path::new(target_path)).await?;

        info!(volume_id, target_path, "volume unpublished");
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: 0,
            accessible_topology: self.node_name.as_deref().map(Topology::node),
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![NodeCapability::StageUnstageVolume])
    }
}
