//! Process environment of the driver.
//!
//! Environment variables:
//! - `NODE_NAME`: name of the node this process runs on, stamped into the
//!   topology of created volumes. Unset or empty leaves it absent, and
//!   CreateVolume is then rejected.

use std::sync::LazyLock;

/// Settings read from the environment.
pub struct NodeEnv {
    /// Node name for topology, `None` when unset or empty.
    pub node_name: Option<String>,
}

/// Read from the environment at first access.
pub static NODE_ENV: LazyLock<NodeEnv> = LazyLock::new(|| NodeEnv {
    node_name: std::env::var("NODE_NAME").ok().filter(|n| !n.is_empty()),
});
