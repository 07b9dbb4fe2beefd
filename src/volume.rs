//! Rootfs provisioning.
//!
//! The shipped volume creator handles `raw://` URIs and bare paths: the
//! referenced directory is used as the container rootfs as-is, with no
//! copy, no quota, and nothing to tear down. Richer providers (layered
//! images, per-container copies, disk quotas) plug in behind the same
//! [`VolumeCreator`] seam.

use crate::error::{Error, Result};
use crate::orchestrator::VolumeCreator;
use crate::spec::RootfsSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Pass-through rootfs provider for `raw://` URIs and bare paths.
pub struct RawVolumeCreator {
    default_rootfs: PathBuf,
}

impl RawVolumeCreator {
    /// `default_rootfs` backs containers whose spec names no rootfs.
    pub fn new(default_rootfs: impl Into<PathBuf>) -> Self {
        Self {
            default_rootfs: default_rootfs.into(),
        }
    }
}

#[async_trait]
impl VolumeCreator for RawVolumeCreator {
    async fn create(&self, handle: &str, spec: RootfsSpec) -> Result<(PathBuf, Vec<String>)> {
        match spec.rootfs.scheme.as_str() {
            "" | "raw" => {}
            other => {
                return Err(Error::InvalidRootfsUri {
                    uri: spec.rootfs.to_string(),
                    reason: format!("unsupported scheme '{other}'"),
                })
            }
        }

        if spec.quota_bytes > 0 {
            debug!(
                handle,
                quota_bytes = spec.quota_bytes,
                "raw rootfs provider does not enforce disk quotas"
            );
        }

        let path = if spec.rootfs.path.as_os_str().is_empty() {
            self.default_rootfs.clone()
        } else {
            spec.rootfs.path.clone()
        };

        debug!(handle, rootfs = %path.display(), namespaced = spec.namespaced, "rootfs resolved");
        Ok((path, Vec::new()))
    }

    async fn destroy(&self, _handle: &str) -> Result<()> {
        // Nothing was copied, so there is nothing to remove.
        Ok(())
    }
}
