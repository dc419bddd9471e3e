//! LVM backend: one instance per volume group.
//!
//! Volumes are logical volumes named after their local ID, so the device
//! path is fully determined by the pool:
//!
//! ```text
//! <root_path>/<volume_group>/<volume-id>      e.g. /dev/vg0/3f1c...
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{GIB, VolumeBackend, VolumeInfo};
use crate::error::CsiError;
use crate::exec::{Exec, ExecOutput};

/// Directory under which device-mapper exposes volume groups.
pub const DEFAULT_ROOT_PATH: &str = "/dev";

/// Message LVM prints for a missing logical volume.
const LV_NOT_FOUND: &str = "Failed to find logical volume";

/// Backend managing logical volumes inside a single volume group.
pub struct LvmBackend {
    volume_group: String,
    root_path: PathBuf,
    exec: Arc<dyn Exec>,
}

impl LvmBackend {
    /// Create a backend for `volume_group`, exposing devices under
    /// `root_path`.
    pub fn new(
        volume_group: impl Into<String>,
        root_path: impl Into<PathBuf>,
        exec: Arc<dyn Exec>,
    ) -> Self {
        Self {
            volume_group: volume_group.into(),
            root_path: root_path.into(),
            exec,
        }
    }

    /// Device path of a logical volume.
    fn lv_path(&self, volume_id: &str) -> PathBuf {
        self.root_path.join(&self.volume_group).join(volume_id)
    }

    /// `<vg>/<lv>` as LVM tools address a logical volume.
    fn lv_name(&self, volume_id: &str) -> String {
        format!("{}/{}", self.volume_group, volume_id)
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput, CsiError> {
        let out = self.exec.run(program, args).await?;
        if out.success() {
            return Ok(out);
        }
        let stderr = out.stderr.trim();
        if stderr.contains(LV_NOT_FOUND) {
            // Tools only ever address one LV per call.
            let missing = args.last().copied().unwrap_or_default();
            return Err(CsiError::VolumeNotFound(missing.to_owned()));
        }
        Err(CsiError::backend(format!(
            "{program} exited with {:?}: {stderr}",
            out.code
        )))
    }
}

/// Parse a byte count printed with `--units b --nosuffix`.
fn parse_bytes(raw: &str) -> Result<u64, CsiError> {
    let trimmed = raw.trim().trim_end_matches('B');
    // LVM may print a fractional part even in byte units.
    let integral = trimmed.split('.').next().unwrap_or_default();
    integral
        .parse::<u64>()
        .map_err(|e| CsiError::backend(format!("unexpected size {raw:?}: {e}")))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl VolumeBackend for LvmBackend {
    #[instrument(skip(self), fields(vg = %self.volume_group))]
    async fn create_volume(&self, volume_id: &str, size_gib: u64) -> Result<VolumeInfo, CsiError> {
        let size = format!("{size_gib}g");
        self.run(
            "lvcreate",
            &["-n", volume_id, "-L", &size, "-y", &self.volume_group],
        )
        .await?;

        let device_path = path_string(&self.lv_path(volume_id));
        info!(%device_path, "logical volume created");
        Ok(VolumeInfo {
            volume_id: volume_id.to_owned(),
            size_bytes: size_gib * GIB,
            device_path,
        })
    }

    #[instrument(skip(self), fields(vg = %self.volume_group))]
    async fn delete_volume(&self, volume_id: &str) -> Result<(), CsiError> {
        let lv = self.lv_name(volume_id);
        self.run("lvremove", &["-f", &lv]).await?;
        info!(%lv, "logical volume removed");
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, CsiError> {
        let out = self
            .run("lvs", &["--noheadings", "-o", "lv_name", &self.volume_group])
            .await?;

        let mut volumes = Vec::new();
        for name in out.stdout.split_whitespace() {
            volumes.push(self.get_volume(name).await?);
        }
        debug!(vg = %self.volume_group, count = volumes.len(), "listed logical volumes");
        Ok(volumes)
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeInfo, CsiError> {
        let lv = self.lv_name(volume_id);
        let out = self
            .run(
                "lvs",
                &["--noheadings", "--units", "b", "--nosuffix", "-o", "lv_size", &lv],
            )
            .await
            .map_err(|e| match e {
                CsiError::VolumeNotFound(_) => CsiError::VolumeNotFound(volume_id.to_owned()),
                other => other,
            })?;

        Ok(VolumeInfo {
            volume_id: volume_id.to_owned(),
            size_bytes: parse_bytes(&out.stdout)?,
            device_path: path_string(&self.lv_path(volume_id)),
        })
    }

    async fn capacity(&self) -> Result<u64, CsiError> {
        let out = self
            .run(
                "vgs",
                &[
                    "--noheadings",
                    "--units",
                    "b",
                    "--nosuffix",
                    "-o",
                    "vg_size",
                    &self.volume_group,
                ],
            )
            .await?;
        parse_bytes(&out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeExec;

    fn backend(exec: FakeExec) -> (LvmBackend, Arc<FakeExec>) {
        let exec = Arc::new(exec);
        let backend = LvmBackend::new("vg0", DEFAULT_ROOT_PATH, exec.clone());
        (backend, exec)
    }

    #[tokio::test]
    async fn create_runs_lvcreate() {
        let (backend, exec) = backend(FakeExec::new().ok("  Logical volume \"v1\" created.\n"));

        let info = backend.create_volume("v1", 10).await.unwrap();
        assert_eq!(info.device_path, "/dev/vg0/v1");
        assert_eq!(info.size_bytes, 10 * GIB);
        assert_eq!(exec.calls(), vec!["lvcreate -n v1 -L 10g -y vg0"]);
    }

    #[tokio::test]
    async fn create_failure_is_backend_error() {
        let (backend, _) = backend(
            FakeExec::new().fail(5, "  Volume group \"vg0\" has insufficient free space"),
        );
        let err = backend.create_volume("v1", 1000).await.unwrap_err();
        assert!(matches!(err, CsiError::BackendError(msg) if msg.contains("insufficient")));
    }

    #[tokio::test]
    async fn delete_missing_lv_is_not_found() {
        let (backend, exec) =
            backend(FakeExec::new().fail(5, "  Failed to find logical volume \"vg0/gone\""));
        let err = backend.delete_volume("gone").await.unwrap_err();
        assert!(matches!(err, CsiError::VolumeNotFound(_)));
        assert_eq!(exec.calls(), vec!["lvremove -f vg0/gone"]);
    }

    #[tokio::test]
    async fn get_parses_size() {
        let (backend, exec) = backend(FakeExec::new().ok("  10737418240\n"));
        let info = backend.get_volume("v1").await.unwrap();
        assert_eq!(info.size_bytes, 10 * GIB);
        assert_eq!(info.device_path, "/dev/vg0/v1");
        assert_eq!(
            exec.calls(),
            vec!["lvs --noheadings --units b --nosuffix -o lv_size vg0/v1"]
        );
    }

    #[tokio::test]
    async fn get_missing_reports_local_id() {
        let (backend, _) =
            backend(FakeExec::new().fail(5, "  Failed to find logical volume \"vg0/nope\""));
        let err = backend.get_volume("nope").await.unwrap_err();
        assert!(matches!(err, CsiError::VolumeNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn list_queries_each_volume() {
        let (backend, exec) = backend(
            FakeExec::new()
                .ok("  a\n  b\n")
                .ok("  1073741824\n")
                .ok("  2147483648\n"),
        );
        let volumes = backend.list_volumes().await.unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].volume_id, "a");
        assert_eq!(volumes[1].size_bytes, 2 * GIB);
        assert_eq!(exec.calls().len(), 3);
    }

    #[tokio::test]
    async fn list_empty_group() {
        let (backend, _) = backend(FakeExec::new().ok(""));
        assert!(backend.list_volumes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_reads_vg_size() {
        let (backend, exec) = backend(FakeExec::new().ok("  107374182400\n"));
        assert_eq!(backend.capacity().await.unwrap(), 100 * GIB);
        assert_eq!(
            exec.calls(),
            vec!["vgs --noheadings --units b --nosuffix -o vg_size vg0"]
        );
    }

    #[test]
    fn parse_bytes_variants() {
        assert_eq!(parse_bytes(" 42 ").unwrap(), 42);
        assert_eq!(parse_bytes("42B").unwrap(), 42);
        assert_eq!(parse_bytes("42.00").unwrap(), 42);
        assert!(parse_bytes("lots").is_err());
    }
}
