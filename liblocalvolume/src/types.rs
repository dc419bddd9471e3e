//! Core driver types: volumes, capabilities, requests, and topology.
//!
//! These types form the data model shared by the role traits, transport
//! layer, and backend implementations.  They are all
//! [`Serialize`]/[`Deserialize`] so they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::handle::VolumeHandle;

/// Key in [`Volume::volume_context`] (and in the stage request's
/// `volume_context`) that carries the block device path.
pub const DEVICE_PATH_KEY: &str = "device-path";

/// Parameter key selecting the backend (pool) for CreateVolume / GetCapacity.
pub const BACKEND_PARAM_KEY: &str = "storage-backend";

/// Topology key stamped on every created volume.
pub const NODE_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write on a single node.
    #[default]
    SingleNodeWriter,
    /// Read-only on a single node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// Many nodes, one writer.
    MultiNodeSingleWriter,
    /// Many nodes, many writers.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// `true` for the modes that never write to the device.
    pub fn is_reader_only(self) -> bool {
        matches!(
            self,
            AccessMode::SingleNodeReaderOnly | AccessMode::MultiNodeReaderOnly
        )
    }
}

/// Filesystem-mount access type of a capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountVolume {
    /// Filesystem type, e.g. `"ext4"`. Empty selects the mounter's default.
    #[serde(default)]
    pub fs_type: String,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Mount descriptor. Node operations reject a capability without one.
    #[serde(default)]
    pub mount: Option<MountVolume>,
}

impl VolumeCapability {
    /// A filesystem-mount capability with the given access mode.
    pub fn mount(access_mode: AccessMode, fs_type: &str, mount_flags: &[&str]) -> Self {
        Self {
            access_mode,
            mount: Some(MountVolume {
                fs_type: fs_type.to_owned(),
                mount_flags: mount_flags.iter().map(|f| (*f).to_owned()).collect(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Topology segments, e.g. `{"kubernetes.io/hostname": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

impl Topology {
    /// Topology pinning a volume to a single node.
    pub fn node(node_name: &str) -> Self {
        Self {
            segments: HashMap::from([(NODE_TOPOLOGY_KEY.to_owned(), node_name.to_owned())]),
        }
    }
}

/// A provisioned volume as returned by the Controller role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Globally routable handle, `<backend>/<local-id>`.
    pub volume_id: VolumeHandle,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Block device backing the volume.
    pub device_path: String,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Topology constraints (node affinity).
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

// ---------------------------------------------------------------------------
// Controller requests
// ---------------------------------------------------------------------------

/// Requested size bounds for CreateVolume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    /// Minimum size in bytes; `0` means "use the driver minimum".
    #[serde(default)]
    pub required_bytes: u64,
    /// Maximum size in bytes; `0` means unbounded.
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Human-readable name. Informational only; creates are not deduplicated.
    #[serde(default)]
    pub name: String,
    /// Desired capacity. `None` provisions the minimum size.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Parameters; `storage-backend` selects the pool.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl CreateVolumeRequest {
    /// Backend requested through [`BACKEND_PARAM_KEY`], if any.
    pub fn backend_name(&self) -> Option<&str> {
        self.parameters.get(BACKEND_PARAM_KEY).map(String::as_str)
    }
}

/// Request to query available capacity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetCapacityRequest {
    /// Parameters; `storage-backend` selects the pool.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl GetCapacityRequest {
    /// Backend requested through [`BACKEND_PARAM_KEY`], if any.
    pub fn backend_name(&self) -> Option<&str> {
        self.parameters.get(BACKEND_PARAM_KEY).map(String::as_str)
    }
}

/// RPCs advertised by the Controller role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    /// CreateVolume / DeleteVolume.
    CreateDeleteVolume,
    /// GetCapacity.
    GetCapacity,
    /// ListVolumes.
    ListVolumes,
}

// ---------------------------------------------------------------------------
// Node requests
// ---------------------------------------------------------------------------

/// Request to stage (format and mount) a volume on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: String,
    /// Block device to mount. Empty falls back to
    /// `volume_context["device-path"]`.
    #[serde(default)]
    pub device_path: String,
    /// Node-global staging mount point.
    pub staging_target_path: String,
    /// Requested capability; must carry a mount descriptor.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

impl NodeStageVolumeRequest {
    /// The device path, from the explicit field or the volume context.
    pub fn device_path(&self) -> &str {
        if !self.device_path.is_empty() {
            return &self.device_path;
        }
        self.volume_context
            .get(DEVICE_PATH_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Request to publish (bind-mount) a staged volume into a workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: String,
    /// The staging mount point (source of the bind mount).
    pub staging_target_path: String,
    /// Per-workload target path.
    pub target_path: String,
    /// Requested capability; must carry a mount descriptor.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// RPCs advertised by the Node role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    /// NodeStageVolume / NodeUnstageVolume.
    StageUnstageVolume,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"local.csi.rk8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Information about the node on which the Node role runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes: u64,
    /// Optional topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}
