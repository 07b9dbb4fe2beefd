//! On-disk depot of container bundle directories.
//!
//! Layout:
//!
//! ```text
//! <depot_root>/
//! └── <handle>/
//!     └── config.json    (serialized bundle)
//! ```
//!
//! The depot is the source of truth for which containers exist on this
//! host and survives daemon restarts. There is no separate index: the
//! handle list is the directory listing.

use crate::bundle::Bundle;
use crate::constants::HANDLE_VALID_CHARS;
use crate::containerizer::Depot;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

/// Directory-per-handle depot.
pub struct DirDepot {
    root: PathBuf,
}

impl DirDepot {
    /// Opens (and creates if needed) a depot rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "depot opened");
        Ok(Self { root })
    }

    /// Rejects handles that would escape or mangle the directory tree.
    fn validate(handle: &str) -> Result<()> {
        if handle.is_empty() {
            return Err(Error::InvalidHandle {
                handle: handle.to_string(),
                reason: "empty".to_string(),
            });
        }
        if let Some(bad) = handle.chars().find(|c| !HANDLE_VALID_CHARS.contains(*c)) {
            return Err(Error::InvalidHandle {
                handle: handle.to_string(),
                reason: format!("character '{bad}' is not allowed"),
            });
        }
        if handle == "." || handle == ".." {
            return Err(Error::InvalidHandle {
                handle: handle.to_string(),
                reason: "reserved name".to_string(),
            });
        }
        Ok(())
    }

    fn dir(&self, handle: &str) -> PathBuf {
        self.root.join(handle)
    }
}

#[async_trait]
impl Depot for DirDepot {
    async fn create(&self, handle: &str, bundle: &Bundle) -> Result<()> {
        Self::validate(handle)?;
        let dir = self.dir(handle);

        // create_dir (not create_dir_all) so a concurrent create of the
        // same handle loses at the filesystem level.
        if let Err(err) = fs::create_dir(&dir) {
            return match err.kind() {
                ErrorKind::AlreadyExists => Err(Error::HandleExists(handle.to_string())),
                _ => Err(err.into()),
            };
        }

        if let Err(err) = bundle.save(&dir) {
            let _ = fs::remove_dir_all(&dir);
            return Err(err);
        }

        debug!(handle, dir = %dir.display(), "bundle materialized");
        Ok(())
    }

    async fn lookup(&self, handle: &str) -> Result<PathBuf> {
        Self::validate(handle)?;
        let dir = self.dir(handle);
        if !dir.is_dir() {
            return Err(Error::ContainerNotFound(handle.to_string()));
        }
        Ok(dir)
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        Self::validate(handle)?;
        let dir = self.dir(handle);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(handle, "depot directory removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn handles(&self) -> Result<Vec<String>> {
        let mut handles = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    handles.push(name.to_string());
                }
            }
        }
        handles.sort();
        Ok(handles)
    }
}
