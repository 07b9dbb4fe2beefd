//! OCI-style runtime bundle model.
//!
//! A [`Bundle`] is the serialized contract between this control plane and
//! the underlying OCI runtime: a rootfs path, a process descriptor,
//! mounts, namespaces, resource limits, and lifecycle hooks. Bundles are
//! built by folding the rule chain (see the `rules` module) over
//! [`Bundle::default`] and are persisted as `config.json` inside the
//! container's depot directory.
//!
//! The default template runs a minimal init that writes the readiness
//! token to stdout and then blocks on stdin, which is what the start
//! check waits for.

use crate::constants::{BUNDLE_CONFIG_FILE, OCI_SPEC_VERSION, READY_TOKEN};
use crate::error::{Error, Result};
use crate::spec::Hook;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// OCI-style runtime configuration for one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// OCI runtime spec version this config follows.
    pub oci_version: String,
    /// Root filesystem.
    pub root: OciRoot,
    /// Init process.
    pub process: OciProcess,
    /// Container hostname.
    pub hostname: String,
    /// Filesystem mounts, applied in order.
    pub mounts: Vec<OciMount>,
    /// Lifecycle hooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<OciHooks>,
    /// Linux-specific configuration.
    pub linux: OciLinux,
}

/// Root filesystem config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciRoot {
    pub path: PathBuf,
    pub readonly: bool,
}

/// Process config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciProcess {
    pub terminal: bool,
    pub user: OciUser,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
}

/// User identity the process runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

/// Mount entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMount {
    pub destination: PathBuf,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciHooks {
    /// Run inside the container's namespace set, before user code.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestart: Vec<Hook>,
    /// Run after the container's last process exits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststop: Vec<Hook>,
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<OciResources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid_mappings: Vec<OciIdMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gid_mappings: Vec<OciIdMapping>,
}

/// Namespace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl OciNamespace {
    fn new(ns_type: &str) -> Self {
        Self {
            ns_type: ns_type.to_string(),
            path: None,
        }
    }
}

/// cgroup resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<OciMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<OciCpu>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<OciDeviceCgroup>,
}

/// Memory cgroup limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMemory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// CPU cgroup limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciCpu {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
}

/// Device cgroup entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciDeviceCgroup {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

/// uid/gid mapping entry for user namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciIdMapping {
    #[serde(rename = "containerID")]
    pub container_id: u32,
    #[serde(rename = "hostID")]
    pub host_id: u32,
    pub size: u32,
}

impl Default for Bundle {
    /// The base template the rule chain starts from.
    fn default() -> Self {
        Self {
            oci_version: OCI_SPEC_VERSION.to_string(),
            root: OciRoot {
                path: PathBuf::from("rootfs"),
                readonly: false,
            },
            process: OciProcess {
                terminal: false,
                user: OciUser::default(),
                args: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!("echo \"{READY_TOKEN}\"; read x"),
                ],
                env: Vec::new(),
                cwd: "/".to_string(),
            },
            hostname: String::new(),
            mounts: default_mounts(),
            hooks: None,
            linux: OciLinux {
                namespaces: vec![
                    OciNamespace::new("pid"),
                    OciNamespace::new("network"),
                    OciNamespace::new("ipc"),
                    OciNamespace::new("uts"),
                    OciNamespace::new("mount"),
                ],
                resources: None,
                uid_mappings: Vec::new(),
                gid_mappings: Vec::new(),
            },
        }
    }
}

/// Mounts every container gets.
fn default_mounts() -> Vec<OciMount> {
    vec![
        OciMount {
            destination: PathBuf::from("/proc"),
            mount_type: "proc".to_string(),
            source: PathBuf::from("proc"),
            options: Vec::new(),
        },
        OciMount {
            destination: PathBuf::from("/dev"),
            mount_type: "tmpfs".to_string(),
            source: PathBuf::from("tmpfs"),
            options: vec![
                "nosuid".to_string(),
                "strictatime".to_string(),
                "mode=755".to_string(),
            ],
        },
        OciMount {
            destination: PathBuf::from("/sys"),
            mount_type: "sysfs".to_string(),
            source: PathBuf::from("sysfs"),
            options: vec![
                "nosuid".to_string(),
                "noexec".to_string(),
                "nodev".to_string(),
                "ro".to_string(),
            ],
        },
    ]
}

impl Bundle {
    /// Sets the rootfs path.
    #[must_use]
    pub fn with_rootfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.root.path = path.into();
        self
    }

    /// Replaces the process environment.
    #[must_use]
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.process.env = env;
        self
    }

    /// Replaces the process argv.
    #[must_use]
    pub fn with_process_args(mut self, args: Vec<String>) -> Self {
        self.process.args = args;
        self
    }

    /// Sets the memory limit, leaving sibling resource fields untouched.
    #[must_use]
    pub fn with_memory_limit(mut self, limit_in_bytes: u64) -> Self {
        let resources = self.linux.resources.get_or_insert_with(Default::default);
        resources.memory = Some(OciMemory {
            limit: Some(limit_in_bytes),
        });
        self
    }

    /// Replaces the resources section wholesale.
    #[must_use]
    pub fn with_resources(mut self, resources: OciResources) -> Self {
        self.linux.resources = Some(resources);
        self
    }

    /// Appends a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: OciMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Replaces the prestart hooks.
    #[must_use]
    pub fn with_prestart_hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.hooks.get_or_insert_with(Default::default).prestart = hooks;
        self
    }

    /// Replaces the poststop hooks.
    #[must_use]
    pub fn with_poststop_hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.hooks.get_or_insert_with(Default::default).poststop = hooks;
        self
    }

    /// Replaces the uid and gid mappings.
    #[must_use]
    pub fn with_id_mappings(mut self, mappings: Vec<OciIdMapping>) -> Self {
        self.linux.uid_mappings = mappings.clone();
        self.linux.gid_mappings = mappings;
        self
    }

    /// Returns the resources section, if any rule has written one.
    #[must_use]
    pub fn resources(&self) -> Option<&OciResources> {
        self.linux.resources.as_ref()
    }

    /// Writes the bundle as `config.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let config = serde_json::to_vec_pretty(self).map_err(|e| {
            Error::Serialization(format!("failed to encode bundle config: {e}"))
        })?;
        fs::write(dir.join(BUNDLE_CONFIG_FILE), config)?;
        Ok(())
    }

    /// Reads a bundle back from the `config.json` in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let raw = fs::read(dir.join(BUNDLE_CONFIG_FILE))?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Serialization(format!("failed to decode bundle config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_announces_readiness() {
        let bundle = Bundle::default();
        assert!(bundle.process.args.iter().any(|a| a.contains(READY_TOKEN)));
    }

    #[test]
    fn test_memory_limit_preserves_devices() {
        let bundle = Bundle::default().with_resources(OciResources {
            devices: vec![OciDeviceCgroup {
                allow: false,
                access: Some("rwm".to_string()),
            }],
            ..Default::default()
        });

        let limited = bundle.clone().with_memory_limit(4096);

        assert_eq!(limited.resources().unwrap().memory.unwrap().limit, Some(4096));
        assert_eq!(
            limited.resources().unwrap().devices,
            bundle.resources().unwrap().devices
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::default()
            .with_rootfs("/srv/rootfs")
            .with_env(vec!["A=1".to_string()]);

        bundle.save(dir.path()).unwrap();
        let loaded = Bundle::load(dir.path()).unwrap();

        assert_eq!(loaded, bundle);
    }
}
