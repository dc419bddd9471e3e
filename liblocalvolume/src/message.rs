//! Driver protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between an orchestrator and the driver via QUIC
//! bi-directional streams, JSON-encoded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::handle::VolumeHandle;
use crate::types::*;

/// Top-level message envelope.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(VolumeHandle),
    /// List volumes across all pools (Controller).
    ListVolumes,
    /// Query the capacity of a pool (Controller).
    GetCapacity(GetCapacityRequest),
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities {
        volume_id: VolumeHandle,
        capabilities: Vec<VolumeCapability>,
    },
    /// Query controller capabilities (Controller).
    GetControllerCapabilities,

    /// Format and mount a device at a staging path (Node).
    StageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume (Node).
    UnstageVolume {
        volume_id: String,
        staging_target_path: String,
    },
    /// Bind-mount a staged volume into a workload (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    UnpublishVolume {
        volume_id: String,
        target_path: String,
    },
    /// Query node info (Node).
    GetNodeInfo,
    /// Query node capabilities (Node).
    GetNodeCapabilities,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// A list of volumes.
    VolumeList(Vec<Volume>),
    /// Available capacity in bytes.
    Capacity(u64),
    /// Whether the requested capabilities are valid.
    CapabilitiesValid(bool),
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity(req) => write!(
                f,
                "GetCapacity(backend={})",
                req.backend_name().unwrap_or("default")
            ),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::GetControllerCapabilities => f.write_str("GetControllerCapabilities"),
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({volume_id})"),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => write!(f, "UnpublishVolume({volume_id})"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeList(vs) => write!(f, "VolumeList(count={})", vs.len()),
            Self::Capacity(c) => write!(f, "Capacity({c})"),
            Self::CapabilitiesValid(v) => write!(f, "CapabilitiesValid({v})"),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Error(e) => write!(f, "Error({}: {e})", e.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn create_request_wire_shape() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "pvc-1".into(),
            capacity_range: Some(CapacityRange {
                required_bytes: 1 << 30,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::mount(
                AccessMode::SingleNodeWriter,
                "ext4",
                &[],
            )],
            parameters: HashMap::from([(BACKEND_PARAM_KEY.into(), "vg1".into())]),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let CsiMessage::CreateVolume(req) =
            serde_json::from_str::<CsiMessage>(&json).expect("deserialize")
        else {
            panic!("wrong variant");
        };
        assert_eq!(req.backend_name(), Some("vg1"));
        assert!(req.volume_capabilities[0].mount.is_some());
    }

    #[test]
    fn handle_travels_as_plain_string() {
        let msg = CsiMessage::DeleteVolume(VolumeHandle::from("vg0/abc"));
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"DeleteVolume":"vg0/abc"}"#
        );
    }

    #[test]
    fn error_keeps_variant() {
        let msg = CsiMessage::Error(CsiError::BackendNotFound("vg9".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::BackendNotFound(n)) if n == "vg9"));
    }

    #[test]
    fn stage_request_defaults_optional_fields() {
        let json = r#"{"StageVolume":{"volume_id":"default/x","staging_target_path":"/s"}}"#;
        let CsiMessage::StageVolume(req) = serde_json::from_str::<CsiMessage>(json).unwrap() else {
            panic!("wrong variant");
        };
        assert!(req.device_path.is_empty());
        assert!(req.volume_capability.is_none());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(
            CsiMessage::GetCapacity(GetCapacityRequest::default()).to_string(),
            "GetCapacity(backend=default)"
        );
        assert_eq!(
            CsiMessage::Error(CsiError::MalformedHandle("x".into())).to_string(),
            r#"Error(NotFound: malformed volume handle "x": expected <backend>/<local-id>)"#
        );
    }
}
