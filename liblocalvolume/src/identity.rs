//! Identity role.
//!
//! The Identity service allows callers to discover plugin metadata and check
//! plugin health.  Every CSI plugin must implement this service.

use async_trait::async_trait;
use tracing::debug;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Version string reported by [`CsiIdentity::get_plugin_info`].
pub const DRIVER_VERSION: &str = "0.2.0";

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Liveness probe.  Returns `true` when the plugin is healthy.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Advertise the capabilities supported by this plugin.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}

/// Static plugin identity.
#[derive(Debug, Clone)]
pub struct PluginIdentity {
    name: String,
    version: String,
}

impl PluginIdentity {
    /// Identity for a driver registered as `name`.
    pub fn new(name: impl Into<String>) -> Result<Self, CsiError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CsiError::Configuration("driver name missing".into()));
        }
        Ok(Self {
            name,
            version: DRIVER_VERSION.to_owned(),
        })
    }

    /// Name the plugin registers under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CsiIdentity for PluginIdentity {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.name.clone(),
            vendor_version: self.version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        debug!(driver = %self.name, "probe");
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints,
        ])
    }
}
