//! Bundle rule chain: ordered, mostly-pure spec → bundle transformations.
//!
//! Each rule reads its own slice of the desired spec and overwrites only
//! its own subtree of the bundle; later rules may extend what earlier
//! rules wrote but never clobber sibling fields. [`ChainBundler`] folds
//! the chain over the base template to produce the final bundle.
//!
//! All shipped rules are pure except [`MkdirChownRule`], which prepares
//! directories on the host rootfs and can therefore fail a create.

use crate::bundle::{Bundle, OciIdMapping, OciMount};
use crate::constants::{ID_MAP_SIZE, UNPRIVILEGED_ID_BASE};
use crate::containerizer::Bundler;
use crate::error::Result;
use crate::spec::{BindMountMode, DesiredContainerSpec};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// One link of the bundle rule chain.
pub trait BundleRule: Send + Sync {
    fn apply(&self, bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle>;
}

// =============================================================================
// Limits
// =============================================================================

/// Writes the memory byte limit into the bundle resources.
///
/// A zero limit means unlimited and leaves the memory subtree unset.
/// Only the memory subtree is touched; devices, cpu, and any other
/// resource fields pass through untouched.
pub struct LimitsRule;

impl BundleRule for LimitsRule {
    fn apply(&self, bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        if spec.limits.memory.limit_in_bytes == 0 {
            return Ok(bundle);
        }
        Ok(bundle.with_memory_limit(spec.limits.memory.limit_in_bytes))
    }
}

// =============================================================================
// Rootfs
// =============================================================================

/// Points the bundle at the provisioned rootfs.
pub struct RootfsRule;

impl BundleRule for RootfsRule {
    fn apply(&self, bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        Ok(bundle.with_rootfs(spec.rootfs_path.clone()))
    }
}

// =============================================================================
// Env
// =============================================================================

/// Installs the resolved environment as the init process env.
pub struct EnvRule;

impl BundleRule for EnvRule {
    fn apply(&self, bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        Ok(bundle.with_env(spec.env.clone()))
    }
}

// =============================================================================
// Bind Mounts
// =============================================================================

/// Adds one mount entry per bind mount and installs the identity
/// mappings: privileged containers run with host identities, everything
/// else is shifted onto the unprivileged id range.
pub struct BindMountsRule;

impl BundleRule for BindMountsRule {
    fn apply(&self, mut bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        for mount in &spec.bind_mounts {
            let mode = match mount.mode {
                BindMountMode::ReadOnly => "ro",
                BindMountMode::ReadWrite => "rw",
            };
            bundle = bundle.with_mount(OciMount {
                destination: mount.dst_path.clone(),
                mount_type: "bind".to_string(),
                source: mount.src_path.clone(),
                options: vec!["bind".to_string(), mode.to_string()],
            });
        }

        let host_id_base = if spec.privileged {
            0
        } else {
            UNPRIVILEGED_ID_BASE
        };
        Ok(bundle.with_id_mappings(vec![OciIdMapping {
            container_id: 0,
            host_id: host_id_base,
            size: ID_MAP_SIZE,
        }]))
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Injects the networker's hook pair into the bundle.
pub struct HooksRule;

impl BundleRule for HooksRule {
    fn apply(&self, mut bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        if !spec.network_hooks.prestart.is_empty() {
            bundle = bundle.with_prestart_hooks(vec![spec.network_hooks.prestart.clone()]);
        }
        if !spec.network_hooks.poststop.is_empty() {
            bundle = bundle.with_poststop_hooks(vec![spec.network_hooks.poststop.clone()]);
        }
        Ok(bundle)
    }
}

// =============================================================================
// Mkdir / Chown
// =============================================================================

/// Prepares directories inside the host-side rootfs.
///
/// The runtime refuses to start when mount targets like `/proc` are
/// missing from the rootfs, so this rule creates them up front with the
/// configured mode. Ownership is applied only when the daemon runs as
/// root. This rule touches the filesystem and may abort a create.
pub struct MkdirChownRule {
    dirs: Vec<PathBuf>,
    mode: u32,
    uid: u32,
    gid: u32,
}

impl MkdirChownRule {
    pub fn new(dirs: Vec<PathBuf>, mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            dirs,
            mode,
            uid,
            gid,
        }
    }
}

impl Default for MkdirChownRule {
    fn default() -> Self {
        Self::new(
            ["proc", "sys", "dev", "tmp"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            0o755,
            0,
            0,
        )
    }
}

impl BundleRule for MkdirChownRule {
    fn apply(&self, bundle: Bundle, spec: &DesiredContainerSpec) -> Result<Bundle> {
        if spec.rootfs_path.as_os_str().is_empty() {
            return Ok(bundle);
        }
        for dir in &self.dirs {
            let path = spec.rootfs_path.join(dir);
            fs::create_dir_all(&path)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(self.mode))?;
            if nix::unistd::geteuid().is_root() {
                nix::unistd::chown(
                    &path,
                    Some(nix::unistd::Uid::from_raw(self.uid)),
                    Some(nix::unistd::Gid::from_raw(self.gid)),
                )
                .map_err(|err| std::io::Error::from_raw_os_error(err as i32))?;
            }
        }
        Ok(bundle)
    }
}

// =============================================================================
// Chain Bundler
// =============================================================================

/// Folds an ordered rule chain over the base bundle template.
pub struct ChainBundler {
    rules: Vec<Box<dyn BundleRule>>,
}

impl ChainBundler {
    pub fn new(rules: Vec<Box<dyn BundleRule>>) -> Self {
        Self { rules }
    }

    /// The shipped chain, in its fixed order.
    #[must_use]
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            Box::new(LimitsRule),
            Box::new(RootfsRule),
            Box::new(EnvRule),
            Box::new(BindMountsRule),
            Box::new(HooksRule),
            Box::new(MkdirChownRule::default()),
        ])
    }
}

impl Bundler for ChainBundler {
    fn bundle(&self, spec: &DesiredContainerSpec) -> Result<Bundle> {
        let mut bundle = Bundle::default();
        for rule in &self.rules {
            bundle = rule.apply(bundle, spec)?;
        }
        Ok(bundle)
    }
}
