//! # liblocalvolume: node-local block volumes for RK8s
//!
//! `liblocalvolume` implements a [Container Storage Interface][csi] style
//! driver that provisions node-local block volumes (LVM logical volumes)
//! and mounts them into workloads.  Requests travel as JSON over QUIC (via
//! [`quinn`]) instead of gRPC, following the RK8s conventions (Tokio async
//! runtime, `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: `Volume`, capabilities, requests, topology. |
//! | [`error`] | [`CsiError`] and its status [`Code`]. |
//! | [`handle`] | [`VolumeHandle`] codec, `<backend>/<local-id>`. |
//! | [`backend`] | LVM and fake volume backends. |
//! | [`registry`] | Name to backend mapping, `"default"` alias. |
//! | [`exec`] | External command runner used by LVM and mkfs. |
//! | [`mount`] | Host mount / format executor. |
//! | [`lock`] | Per-key async locks. |
//! | [`identity`] | [`CsiIdentity`]: plugin discovery and health. |
//! | [`controller`] | [`CsiController`]: create, delete, capacity. |
//! | [`node`] | [`CsiNode`]: stage, publish, unpublish, unstage. |
//! | [`driver`] | [`Driver`]: all three roles assembled from a config. |
//! | [`message`] | [`CsiMessage`] protocol envelope. |
//! | [`transport`] | QUIC server built on `quinn`. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod driver;
pub mod error;
pub mod exec;
pub mod handle;
pub mod identity;
pub mod lock;
pub mod message;
pub mod mount;
pub mod node;
pub mod registry;
pub mod transport;
pub mod types;

pub use controller::CsiController;
pub use driver::{Driver, DriverConfig};
pub use error::{Code, CsiError};
pub use handle::VolumeHandle;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
