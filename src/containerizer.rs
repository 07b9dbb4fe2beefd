//! The containerizer pipeline: bundle → depot → runtime start → liveness.
//!
//! [`DepotContainerizer`] turns a desired container spec into a running
//! container in four steps:
//!
//! ```text
//! Bundler::bundle(spec)          pure spec → bundle transformation
//!        │
//! Depot::create(handle, bundle)  materialize config.json on disk
//!        │
//! BundleRunner::start(path, id)  launch the OCI runtime
//!        │
//! StartChecker::check(stdout)    bounded wait for the readiness token
//! ```
//!
//! A failure at any point after the depot directory exists kills the
//! runtime process (best effort) and removes the directory, so a failed
//! create leaves no trace of the handle behind.

use crate::bundle::Bundle;
use crate::constants::{READY_TOKEN, START_CHECK_TIMEOUT, STDOUT_PIPE_CAPACITY};
use crate::error::{Error, Result};
use crate::orchestrator::Containerizer;
use crate::spec::{
    ActualContainerSpec, DesiredContainerSpec, ProcessIo, ProcessSpec, StreamInSpec, StreamOutSpec,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

// =============================================================================
// Collaborator Traits
// =============================================================================

/// A process started inside a container.
#[async_trait]
pub trait Process: Send {
    /// Host pid of the process.
    fn id(&self) -> u32;

    /// Waits for the process to exit and returns its exit code.
    async fn wait(&mut self) -> Result<i32>;
}

/// Pure transformation of a desired container spec into a bundle.
pub trait Bundler: Send + Sync {
    fn bundle(&self, spec: &DesiredContainerSpec) -> Result<Bundle>;
}

/// On-disk store of bundle directories, keyed by handle.
///
/// The depot is the source of truth for which containers exist on this
/// host; its directory tree persists across daemon restarts.
#[async_trait]
pub trait Depot: Send + Sync {
    /// Materializes the bundle under a fresh directory for `handle`.
    ///
    /// # Errors
    ///
    /// [`Error::HandleExists`] when the handle already has a directory.
    async fn create(&self, handle: &str, bundle: &Bundle) -> Result<()>;

    /// Returns the bundle directory for `handle`.
    ///
    /// # Errors
    ///
    /// [`Error::ContainerNotFound`] when no directory exists.
    async fn lookup(&self, handle: &str) -> Result<PathBuf>;

    /// Removes the handle's directory recursively. Idempotent.
    async fn destroy(&self, handle: &str) -> Result<()>;

    /// Lists all handles with a directory in the depot.
    async fn handles(&self) -> Result<Vec<String>>;
}

/// Driver for the underlying OCI runtime binary.
#[async_trait]
pub trait BundleRunner: Send + Sync {
    /// Starts the container whose bundle lives at `bundle_path`.
    async fn start(
        &self,
        bundle_path: &Path,
        handle: &str,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>>;

    /// Runs an additional process inside a started container.
    async fn exec(
        &self,
        bundle_path: &Path,
        handle: &str,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>>;

    /// Kills the container's processes.
    async fn kill(&self, handle: &str) -> Result<()>;

    /// Unpacks a tar stream into the container's filesystem.
    async fn stream_in(&self, bundle_path: &Path, handle: &str, spec: StreamInSpec) -> Result<()>;

    /// Reads part of the container's filesystem as a tar stream.
    async fn stream_out(
        &self,
        bundle_path: &Path,
        handle: &str,
        spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>>;
}

/// Bounded wait for a container to come up.
#[async_trait]
pub trait StartChecker: Send + Sync {
    async fn check(&self, stdout: Pin<Box<dyn AsyncRead + Send>>) -> Result<()>;
}

// =============================================================================
// Stdout Start Check
// =============================================================================

/// Scans runtime stdout for a literal readiness token.
pub struct StdoutCheck {
    /// Token to wait for.
    pub expect: String,
    /// Deadline for the whole scan.
    pub timeout: Duration,
}

impl Default for StdoutCheck {
    fn default() -> Self {
        Self {
            expect: READY_TOKEN.to_string(),
            timeout: START_CHECK_TIMEOUT,
        }
    }
}

#[async_trait]
impl StartChecker for StdoutCheck {
    async fn check(&self, mut stdout: Pin<Box<dyn AsyncRead + Send>>) -> Result<()> {
        let scan = async {
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    return Err(Error::StartFailed(format!(
                        "runtime stdout closed before {:?} was seen",
                        self.expect
                    )));
                }
                seen.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&seen).contains(&self.expect) {
                    return Ok(());
                }
            }
        };

        match tokio::time::timeout(self.timeout, scan).await {
            Ok(result) => result,
            Err(_) => Err(Error::StartTimeout {
                expect: self.expect.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

// =============================================================================
// Depot Containerizer
// =============================================================================

/// The shipped [`Containerizer`]: a pipeline over a bundler, a depot, a
/// bundle runner, and a start checker.
pub struct DepotContainerizer {
    depot: Arc<dyn Depot>,
    bundler: Arc<dyn Bundler>,
    runner: Arc<dyn BundleRunner>,
    start_check: Arc<dyn StartChecker>,
}

impl DepotContainerizer {
    pub fn new(
        depot: Arc<dyn Depot>,
        bundler: Arc<dyn Bundler>,
        runner: Arc<dyn BundleRunner>,
        start_check: Arc<dyn StartChecker>,
    ) -> Self {
        Self {
            depot,
            bundler,
            runner,
            start_check,
        }
    }

    /// Removes whatever a failed create left behind for `handle`.
    async fn discard(&self, handle: &str, kill: bool) {
        if kill {
            if let Err(err) = self.runner.kill(handle).await {
                debug!(handle, error = %err, "kill during create cleanup failed");
            }
        }
        if let Err(err) = self.depot.destroy(handle).await {
            warn!(handle, error = %err, "failed to remove depot directory after aborted create");
        }
    }
}

#[async_trait]
impl Containerizer for DepotContainerizer {
    async fn create(&self, spec: DesiredContainerSpec) -> Result<()> {
        let handle = spec.handle.clone();
        let bundle = self.bundler.bundle(&spec)?;

        self.depot.create(&handle, &bundle).await?;

        let path = match self.depot.lookup(&handle).await {
            Ok(path) => path,
            Err(err) => {
                self.discard(&handle, false).await;
                return Err(err);
            }
        };

        let (stdout_rd, stdout_wr) = tokio::io::duplex(STDOUT_PIPE_CAPACITY);
        if let Err(err) = self
            .runner
            .start(&path, &handle, ProcessIo::stdout_only(stdout_wr))
            .await
        {
            self.discard(&handle, false).await;
            return Err(err);
        }

        if let Err(err) = self.start_check.check(Box::pin(stdout_rd)).await {
            self.discard(&handle, true).await;
            return Err(err);
        }

        debug!(handle, bundle_path = %path.display(), "container created");
        Ok(())
    }

    async fn run(
        &self,
        handle: &str,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>> {
        let path = self.depot.lookup(handle).await?;
        self.runner.exec(&path, handle, spec, io).await
    }

    async fn stream_in(&self, handle: &str, spec: StreamInSpec) -> Result<()> {
        let path = self.depot.lookup(handle).await?;
        self.runner.stream_in(&path, handle, spec).await
    }

    async fn stream_out(
        &self,
        handle: &str,
        spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.depot.lookup(handle).await?;
        self.runner.stream_out(&path, handle, spec).await
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        // A failed kill keeps the depot directory: the process may still be
        // alive and the directory is the only forensic record of it.
        self.runner.kill(handle).await?;
        self.depot.destroy(handle).await
    }

    async fn handles(&self) -> Result<Vec<String>> {
        self.depot.handles().await
    }

    async fn info(&self, handle: &str) -> Result<ActualContainerSpec> {
        let bundle_path = self.depot.lookup(handle).await?;
        Ok(ActualContainerSpec { bundle_path })
    }
}
