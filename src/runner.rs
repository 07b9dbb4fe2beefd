//! Driver for the underlying OCI runtime binary.
//!
//! [`CommandRunner`] shells out to a `runc`-compatible binary for the
//! start/exec/kill lifecycle and implements filesystem streaming against
//! the bundle's rootfs directly. The control plane stays agnostic to the
//! runtime binary: anything speaking the OCI runtime CLI works.
//!
//! # Streaming Security
//!
//! Tar extraction is a security boundary: a hostile stream can attempt
//! to escape the rootfs. Every requested path and every archive entry is
//! validated against `..` components and absolute paths before anything
//! touches the disk, and streams are capped at `MAX_STREAM_SIZE`.

use crate::bundle::Bundle;
use crate::constants::MAX_STREAM_SIZE;
use crate::containerizer::{BundleRunner, Process};
use crate::error::{Error, Result};
use crate::spec::{ProcessIo, ProcessSpec, StreamInSpec, StreamOutSpec};
use async_trait::async_trait;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs containers through an OCI runtime CLI (`runc` by default).
pub struct CommandRunner {
    runtime_bin: PathBuf,
}

impl CommandRunner {
    pub fn new(runtime_bin: impl Into<PathBuf>) -> Self {
        Self {
            runtime_bin: runtime_bin.into(),
        }
    }

    fn command(&self, bundle_path: &Path) -> Command {
        let mut cmd = Command::new(&self.runtime_bin);
        cmd.current_dir(bundle_path);
        cmd
    }

    fn spawn(&self, mut cmd: Command, handle: &str, action: &str, io: ProcessIo) -> Result<Box<dyn Process>> {
        cmd.stdin(if io.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(if io.stdout.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(if io.stderr.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|err| Error::RunnerFailed {
            handle: handle.to_string(),
            action: action.to_string(),
            reason: err.to_string(),
        })?;
        let pid = child.id().unwrap_or(0);

        if let (Some(mut stdin), Some(mut reader)) = (child.stdin.take(), io.stdin) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut reader, &mut stdin).await;
            });
        }
        if let (Some(mut stdout), Some(mut writer)) = (child.stdout.take(), io.stdout) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stdout, &mut writer).await;
            });
        }
        if let (Some(mut stderr), Some(mut writer)) = (child.stderr.take(), io.stderr) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stderr, &mut writer).await;
            });
        }

        debug!(handle, action, pid, "runtime process spawned");
        Ok(Box::new(ChildProcess { pid, child }))
    }

    /// Resolves the rootfs a bundle points at.
    fn rootfs(bundle_path: &Path) -> Result<PathBuf> {
        let bundle = Bundle::load(bundle_path)?;
        let rootfs = bundle.root.path;
        if rootfs.is_absolute() {
            Ok(rootfs)
        } else {
            Ok(bundle_path.join(rootfs))
        }
    }
}

#[async_trait]
impl BundleRunner for CommandRunner {
    async fn start(
        &self,
        bundle_path: &Path,
        handle: &str,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>> {
        let mut cmd = self.command(bundle_path);
        cmd.arg("run").arg(handle);
        self.spawn(cmd, handle, "start", io)
    }

    async fn exec(
        &self,
        bundle_path: &Path,
        handle: &str,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>> {
        // Unique per exec so concurrent execs never clobber each other.
        let process_file = bundle_path.join(format!("process-{}.json", uuid::Uuid::new_v4()));
        let descriptor = serde_json::to_vec_pretty(&spec)
            .map_err(|err| Error::Serialization(err.to_string()))?;
        fs::write(&process_file, descriptor)?;

        let mut cmd = self.command(bundle_path);
        cmd.arg("exec")
            .arg("--process")
            .arg(&process_file)
            .arg(handle);
        self.spawn(cmd, handle, "exec", io)
    }

    async fn kill(&self, handle: &str) -> Result<()> {
        let output = Command::new(&self.runtime_bin)
            .arg("kill")
            .arg(handle)
            .arg(libc::SIGKILL.to_string())
            .output()
            .await
            .map_err(|err| Error::RunnerFailed {
                handle: handle.to_string(),
                action: "kill".to_string(),
                reason: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::RunnerFailed {
                handle: handle.to_string(),
                action: "kill".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn stream_in(
        &self,
        bundle_path: &Path,
        handle: &str,
        mut spec: StreamInSpec,
    ) -> Result<()> {
        let rootfs = Self::rootfs(bundle_path)?;
        let dest = safe_join(&rootfs, &spec.path)?;

        let mut archive_bytes = Vec::new();
        let copied = tokio::io::copy(
            &mut (&mut spec.tar).take(MAX_STREAM_SIZE + 1),
            &mut archive_bytes,
        )
        .await?;
        if copied > MAX_STREAM_SIZE {
            return Err(Error::StreamTooLarge {
                size: copied,
                limit: MAX_STREAM_SIZE,
            });
        }

        fs::create_dir_all(&dest)?;

        let mut archive = tar::Archive::new(archive_bytes.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();
            validate_archive_path(&entry_path)?;
            if !entry.unpack_in(&dest)? {
                warn!(handle, path = %entry_path.display(), "skipped unsafe archive entry");
            }
        }

        if !spec.user.is_empty() {
            debug!(handle, user = %spec.user, "stream-in ownership left to the caller's user mapping");
        }

        debug!(handle, dest = %dest.display(), bytes = copied, "stream-in unpacked");
        Ok(())
    }

    async fn stream_out(
        &self,
        bundle_path: &Path,
        handle: &str,
        spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let rootfs = Self::rootfs(bundle_path)?;
        let src = safe_join(&rootfs, &spec.path)?;

        if !src.exists() {
            return Err(Error::ContainerNotFound(format!(
                "{handle}: no such path {}",
                spec.path.display()
            )));
        }

        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);

        let name = src
            .file_name()
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        if src.is_dir() {
            builder.append_dir_all(&name, &src)?;
        } else {
            builder.append_path_with_name(&src, &name)?;
        }

        let bytes = builder
            .into_inner()
            .map_err(|err| Error::Serialization(format!("building tar stream: {err}")))?;

        debug!(handle, src = %src.display(), bytes = bytes.len(), "stream-out packed");
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }
}

/// Joins `path` onto `root`, refusing components that would escape it.
fn safe_join(root: &Path, path: &Path) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(path.to_path_buf()));
            }
        }
    }
    Ok(joined)
}

/// Rejects archive entries with absolute or parent-relative paths.
fn validate_archive_path(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(Error::PathTraversal(path.to_path_buf()));
    }
    Ok(())
}

/// A spawned runtime process.
struct ChildProcess {
    pid: u32,
    child: Child,
}

#[async_trait]
impl Process for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Result<i32> {
        use std::os::unix::process::ExitStatusExt;
        let status = self.child.wait().await?;
        Ok(status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
    }
}
