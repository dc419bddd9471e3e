//! The assembled driver.
//!
//! [`Driver`] wires the registry-backed controller, the node mount manager and
//! the plugin identity together and implements all three role traits, which is
//! what [`CsiServer`](crate::transport::server::CsiServer) dispatches to.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::BackendKind;
use crate::controller::{CsiController, VolumeController};
use crate::error::CsiError;
use crate::exec::Exec;
use crate::handle::VolumeHandle;
use crate::identity::{CsiIdentity, PluginIdentity};
use crate::mount::Mounter;
use crate::node::{CsiNode, NodeMounter};
use crate::registry::BackendRegistry;
use crate::types::{
    ControllerCapability, CreateVolumeRequest, GetCapacityRequest, NodeCapability, NodeInfo,
    NodePublishVolumeRequest, NodeStageVolumeRequest, PluginCapability, PluginInfo, Volume,
    VolumeCapability,
};

/// Startup configuration of a [`Driver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Name the plugin registers under.
    pub driver_name: String,
    /// Node id reported by NodeGetInfo.
    pub node_id: String,
    /// Backend kind, `"lvm"` or `"fake"`.
    pub backend: String,
    /// Volume groups in priority order; the first is the default pool.
    #[serde(default)]
    pub volume_groups: Vec<String>,
    /// Name of this node, used as the topology segment.
    #[serde(default)]
    pub node_name: Option<String>,
    /// Capacity reported by the fake backend.
    #[serde(default)]
    pub fake_capacity_bytes: u64,
}

/// Identity + Controller + Node in one handler.
pub struct Driver {
    identity: PluginIdentity,
    controller: VolumeController,
    node: NodeMounter,
}

impl Driver {
    /// Build the driver.
    ///
    /// Fails with [`CsiError::Configuration`] on an unknown backend kind, a
    /// missing driver name or node id, or an unusable pool list.
    pub fn new(
        config: DriverConfig,
        exec: Arc<dyn Exec>,
        mounter: Arc<dyn Mounter>,
    ) -> Result<Self, CsiError> {
        let kind: BackendKind = config.backend.parse()?;
        if config.node_id.is_empty() {
            return Err(CsiError::Configuration("node id missing".into()));
        }
        let identity = PluginIdentity::new(config.driver_name)?;
        let registry = BackendRegistry::new(
            kind,
            &config.volume_groups,
            exec,
            config.fake_capacity_bytes,
        )?;

        info!(
            driver = identity.name(),
            node_id = %config.node_id,
            node_name = ?config.node_name,
            %kind,
            "driver initialized",
        );
        Ok(Self {
            identity,
            controller: VolumeController::new(Arc::new(registry), config.node_name.clone()),
            node: NodeMounter::new(mounter, config.node_id, config.node_name),
        })
    }
}

#[async_trait]
impl CsiIdentity for Driver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        self.identity.get_plugin_info().await
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        self.identity.probe().await
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        self.identity.get_plugin_capabilities().await
    }
}

#[async_trait]
impl CsiController for Driver {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        self.controller.create_volume(req).await
    }

    async fn delete_volume(&self, volume_id: &VolumeHandle) -> Result<(), CsiError> {
        self.controller.delete_volume(volume_id).await
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeHandle,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        self.controller
            .validate_volume_capabilities(volume_id, capabilities)
            .await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        self.controller.list_volumes().await
    }

    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<u64, CsiError> {
        self.controller.get_capacity(req).await
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        CsiController::get_capabilities(&self.controller).await
    }
}

#[async_trait]
impl CsiNode for Driver {
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        self.node.stage_volume(req).await
    }

    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        self.node
            .unstage_volume(volume_id, staging_target_path)
            .await
    }

    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        self.node.publish_volume(req).await
    }

    async fn unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<(), CsiError> {
        self.node.unpublish_volume(volume_id, target_path).await
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        self.node.get_info().await
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        CsiNode::get_capabilities(&self.node).await
    }
}
