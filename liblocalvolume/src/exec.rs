//! External command execution.
//!
//! The LVM backend and the filesystem formatter shell out to host tools
//! (`lvcreate`, `vgs`, `blkid`, `mkfs.*`).  They do so through the [`Exec`]
//! trait so that tests can script the tool output.

use async_trait::async_trait;
use tracing::debug;

use crate::error::CsiError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// `true` if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion and captures its output.
///
/// A non-zero exit is *not* an error at this layer; callers inspect
/// [`ExecOutput`] and decide.  `Err` is reserved for failing to spawn.
#[async_trait]
pub trait Exec: Send + Sync {
    /// Run `program` with `args`.
    async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput, CsiError>;
}

/// [`Exec`] implementation that spawns processes on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExec;

#[async_trait]
impl Exec for HostExec {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput, CsiError> {
        debug!(program, ?args, "exec");
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CsiError::Internal(format!("spawn {program}: {e}")))?;

        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_exec_captures_output() {
        let out = HostExec.run("sh", &["-c", "echo hi; echo err >&2; exit 3"]).await.unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn host_exec_missing_program_is_error() {
        let err = HostExec
            .run("/nonexistent/definitely-not-a-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
    }
}
