//! Mount executor.
//!
//! [`Mounter`] is the node's only way to touch the mount table.  The node
//! manager keeps no state of its own: every decision is re-derived from
//! [`Mounter::is_likely_not_mount_point`] on each call.
//!
//! [`HostMounter`] talks to the kernel through `nix` and shells out to
//! `blkid` / `mkfs.*` through an [`Exec`] for formatting.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use nix::mount::{MsFlags, mount, umount};
use tracing::{debug, info, instrument, warn};

use crate::error::CsiError;
use crate::exec::Exec;

/// Filesystem used when a stage request leaves `fs_type` empty.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Mount table of the current process' namespace.
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Operations the node manager needs from the host.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// `Ok(true)` if `path` exists and is not a mount point.
    ///
    /// A missing path is reported as an [`io::Error`] of kind
    /// [`io::ErrorKind::NotFound`] so callers can tell it apart from other
    /// inspection failures.
    async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Mount `source` at `target`.  An empty `fs_type` means "none" (bind).
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Format `source` with `fs_type` if it carries no filesystem, then
    /// mount it at `target`.
    async fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Unmount `target`.
    async fn unmount(&self, target: &Path) -> Result<(), CsiError>;

    /// Unmount `path` if mounted, then remove the directory.
    ///
    /// A path that does not exist is already clean.
    async fn unmount_path(&self, path: &Path) -> Result<(), CsiError> {
        let not_mounted = match self.is_likely_not_mount_point(path).await {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "path gone, nothing to unmount");
                return Ok(());
            }
            Err(e) => return Err(unmount_failed(path, e)),
        };

        if !not_mounted {
            self.unmount(path).await?;
            let now_not_mounted = self
                .is_likely_not_mount_point(path)
                .await
                .map_err(|e| unmount_failed(path, e))?;
            if !now_not_mounted {
                return Err(unmount_failed(path, "still mounted after unmount"));
            }
        }

        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| unmount_failed(path, format!("remove dir: {e}")))?;
        debug!(path = %path.display(), "mount path cleaned up");
        Ok(())
    }
}

fn mount_failed(path: &Path, reason: impl ToString) -> CsiError {
    CsiError::MountFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn unmount_failed(path: &Path, reason: impl ToString) -> CsiError {
    CsiError::UnmountFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Option handling
// ---------------------------------------------------------------------------

/// Split `mount(8)`-style options into kernel flags and fs-specific data.
pub(crate) fn parse_options(options: &[String]) -> (MsFlags, Vec<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for opt in options {
        match opt.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rw" | "defaults" => flags.remove(MsFlags::MS_RDONLY),
            "bind" => flags |= MsFlags::MS_BIND,
            "rbind" => flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
            "remount" => flags |= MsFlags::MS_REMOUNT,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodiratime" => flags |= MsFlags::MS_NODIRATIME,
            "relatime" => flags |= MsFlags::MS_RELATIME,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
            "dirsync" => flags |= MsFlags::MS_DIRSYNC,
            "" => {}
            other => data.push(other.to_owned()),
        }
    }
    (flags, data)
}

/// Flags honoured by the initial bind call; the kernel ignores the rest.
const BIND_FLAGS: MsFlags = MsFlags::MS_BIND.union(MsFlags::MS_REC);

/// Flags for the `bind,remount` pass that applies per-mount options to a
/// fresh bind mount, or `None` when the bind carries no such options.
pub(crate) fn bind_remount_flags(flags: MsFlags) -> Option<MsFlags> {
    let options = flags - BIND_FLAGS - MsFlags::MS_REMOUNT;
    (!options.is_empty()).then_some(options | MsFlags::MS_BIND | MsFlags::MS_REMOUNT)
}

/// Decode the octal escapes `/proc/self/mounts` uses for whitespace.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        });
        let decoded = escape.and_then(|d| {
            let code = d.iter().fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
            u8::try_from(code).ok()
        });
        match decoded {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `true` if `path` is the mount point of any line in `table`.
fn table_has_mount_point(table: &str, path: &Path) -> bool {
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mp| Path::new(&unescape_mount_path(mp)) == path)
}

// ---------------------------------------------------------------------------
// HostMounter
// ---------------------------------------------------------------------------

/// [`Mounter`] backed by the host kernel.
pub struct HostMounter {
    exec: Arc<dyn Exec>,
}

impl HostMounter {
    /// Create a mounter that formats devices through `exec`.
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self { exec }
    }

    /// Filesystem currently on `device`, or `None` if it is blank.
    async fn existing_format(&self, device: &str) -> Result<Option<String>, CsiError> {
        let out = self
            .exec
            .run("blkid", &["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", device])
            .await?;
        match out.code {
            Some(0) => {}
            // blkid exits 2 when it finds nothing to report.
            Some(2) => return Ok(None),
            code => {
                return Err(CsiError::Internal(format!(
                    "blkid {device} exited with {code:?}: {}",
                    out.stderr.trim()
                )));
            }
        }

        for line in out.stdout.lines() {
            if let Some(fs) = line.strip_prefix("TYPE=") {
                return Ok(Some(fs.trim().to_owned()));
            }
            if line.starts_with("PTTYPE=") {
                return Ok(Some("partition table".to_owned()));
            }
        }
        Ok(None)
    }

    async fn format(&self, device: &str, fs_type: &str) -> Result<(), CsiError> {
        let program = format!("mkfs.{fs_type}");
        let args: Vec<&str> = if fs_type.starts_with("ext") {
            vec!["-F", "-m0", device]
        } else {
            vec![device]
        };
        info!(device, fs_type, "formatting device");
        let out = self.exec.run(&program, &args).await?;
        if !out.success() {
            return Err(CsiError::Internal(format!(
                "{program} {device} exited with {:?}: {}",
                out.code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Mounter for HostMounter {
    async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
        // Surfaces NotFound before consulting the table.
        tokio::fs::metadata(path).await?;
        let table = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        Ok(!table_has_mount_point(&table, path))
    }

    #[instrument(skip(self))]
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let (flags, data) = parse_options(options);
        let source = source.to_owned();
        let target_buf = target.to_path_buf();
        let fs_type = (!fs_type.is_empty()).then(|| fs_type.to_owned());
        let data = (!data.is_empty()).then(|| data.join(","));

        // Blocking syscalls run to completion even if the caller goes away.
        tokio::task::spawn_blocking(move || {
            let bind = flags.contains(MsFlags::MS_BIND);
            let first_flags = if bind {
                flags & BIND_FLAGS
            } else {
                flags
            };
            mount(
                Some(source.as_str()),
                &target_buf,
                fs_type.as_deref(),
                first_flags,
                data.as_deref(),
            )
            .map_err(|e| mount_failed(&target_buf, e))?;

            if bind && let Some(remount_flags) = bind_remount_flags(flags) {
                mount(
                    None::<&str>,
                    &target_buf,
                    None::<&str>,
                    remount_flags,
                    None::<&str>,
                )
                .map_err(|e| mount_failed(&target_buf, format!("remount bind options: {e}")))?;
            }
            Ok(())
        })
        .await
        .map_err(CsiError::internal)?
    }

    #[instrument(skip(self))]
    async fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let fs_type = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type
        };
        let (flags, _) = parse_options(options);
        let read_only = flags.contains(MsFlags::MS_RDONLY);

        match self.existing_format(source).await? {
            None if read_only => {
                return Err(mount_failed(
                    target,
                    format!("{source} is unformatted and the mount is read-only"),
                ));
            }
            None => self.format(source, fs_type).await?,
            Some(existing) if existing != fs_type => {
                warn!(source, %existing, requested = fs_type, "device format mismatch");
                return Err(mount_failed(
                    target,
                    format!("{source} already contains {existing}, requested {fs_type}"),
                ));
            }
            Some(_) => debug!(source, fs_type, "device already formatted"),
        }

        self.mount(source, target, fs_type, options).await
    }

    #[instrument(skip(self))]
    async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        let target_buf = target.to_path_buf();
        tokio::task::spawn_blocking(move || {
            umount(&target_buf).map_err(|e| unmount_failed(&target_buf, e))
        })
        .await
        .map_err(CsiError::internal)?
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// A recorded mounter call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum MountAction {
        Mount {
            source: String,
            target: PathBuf,
            fs_type: String,
            options: Vec<String>,
        },
        FormatAndMount {
            source: String,
            target: PathBuf,
            fs_type: String,
            options: Vec<String>,
        },
        Unmount {
            target: PathBuf,
        },
    }

    /// In-memory mount table over real directories.
    ///
    /// Existence checks hit the real filesystem (tests use temp dirs); the
    /// mount state lives only in memory.
    #[derive(Default)]
    pub(crate) struct FakeMounter {
        mounted: Mutex<HashSet<PathBuf>>,
        actions: Mutex<Vec<MountAction>>,
        fail_mounts: bool,
        mount_delay: Option<Duration>,
    }

    impl FakeMounter {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// A mounter whose mount calls always fail.
        pub(crate) fn failing() -> Self {
            Self {
                fail_mounts: true,
                ..Self::default()
            }
        }

        /// A mounter whose mount calls take `delay` before taking effect.
        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                mount_delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn actions(&self) -> Vec<MountAction> {
            self.actions.lock().unwrap().clone()
        }

        pub(crate) fn is_mounted(&self, path: &Path) -> bool {
            self.mounted.lock().unwrap().contains(path)
        }

        pub(crate) fn mark_mounted(&self, path: &Path) {
            self.mounted.lock().unwrap().insert(path.to_path_buf());
        }

        async fn record(&self, action: MountAction, target: &Path) -> Result<(), CsiError> {
            if let Some(delay) = self.mount_delay {
                tokio::time::sleep(delay).await;
            }
            self.actions.lock().unwrap().push(action);
            if self.fail_mounts {
                return Err(mount_failed(target, "injected failure"));
            }
            self.mark_mounted(target);
            Ok(())
        }
    }

    #[async_trait]
    impl Mounter for FakeMounter {
        async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
            tokio::fs::metadata(path).await?;
            Ok(!self.is_mounted(path))
        }

        async fn mount(
            &self,
            source: &str,
            target: &Path,
            fs_type: &str,
            options: &[String],
        ) -> Result<(), CsiError> {
            let action = MountAction::Mount {
                source: source.to_owned(),
                target: target.to_path_buf(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            };
            self.record(action, target).await
        }

        async fn format_and_mount(
            &self,
            source: &str,
            target: &Path,
            fs_type: &str,
            options: &[String],
        ) -> Result<(), CsiError> {
            let action = MountAction::FormatAndMount {
                source: source.to_owned(),
                target: target.to_path_buf(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            };
            self.record(action, target).await
        }

        async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
            self.actions.lock().unwrap().push(MountAction::Unmount {
                target: target.to_path_buf(),
            });
            if !self.mounted.lock().unwrap().remove(target) {
                return Err(unmount_failed(target, "not mounted"));
            }
            Ok(())
        }
    }
}
