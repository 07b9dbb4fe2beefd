//! API data model for the container host control plane.
//!
//! These types form the boundary between the RPC surface and the
//! orchestrator: the desired container spec accepted on create, the
//! process/stream descriptors used against a live container, and the
//! info/capacity views reported back.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

// =============================================================================
// Container Spec (input to create)
// =============================================================================

/// Declarative specification of a container to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Handle for the container. Empty means the host generates one.
    #[serde(default)]
    pub handle: String,
    /// Rootfs URI (`raw:///path/to/rootfs` or a bare path).
    #[serde(default)]
    pub rootfs: String,
    /// Host directories bind-mounted into the container, in order.
    #[serde(default)]
    pub bind_mounts: Vec<BindMount>,
    /// Environment in `KEY=VALUE` form, in order.
    #[serde(default)]
    pub env: Vec<String>,
    /// Privileged containers keep host identity mappings.
    #[serde(default)]
    pub privileged: bool,
    /// Resource limits.
    #[serde(default)]
    pub limits: Limits,
    /// Network spec: empty, an IP, or a CIDR hint (see the net module).
    #[serde(default)]
    pub network: String,
    /// Initial properties registered for the handle.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Source path on the host.
    pub src_path: PathBuf,
    /// Destination path inside the container.
    pub dst_path: PathBuf,
    /// Mount mode.
    #[serde(default)]
    pub mode: BindMountMode,
}

/// Bind mount access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMountMode {
    /// Read-only mount.
    #[default]
    ReadOnly,
    /// Read-write mount.
    ReadWrite,
}

// =============================================================================
// Limits
// =============================================================================

/// Resource limits for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub memory: MemoryLimits,
    #[serde(default)]
    pub disk: DiskLimits,
    #[serde(default)]
    pub cpu: CpuLimits,
    #[serde(default)]
    pub bandwidth: BandwidthLimits,
}

/// Memory limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Hard memory limit in bytes. Zero means unlimited.
    #[serde(default)]
    pub limit_in_bytes: u64,
}

/// Disk limits, delegated to the volume creator as a quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLimits {
    /// Hard disk usage limit in bytes. Zero means unlimited.
    #[serde(default)]
    pub byte_hard: u64,
    /// What the quota counts.
    #[serde(default)]
    pub scope: DiskLimitScope,
}

/// Scope of a disk quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLimitScope {
    /// Quota covers the container's total disk usage, base image included.
    #[default]
    Total,
    /// Quota covers only the container's writable layer.
    Exclusive,
}

/// CPU limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuLimits {
    /// cgroup CPU shares. Zero means the runtime default.
    #[serde(default)]
    pub limit_in_shares: u64,
}

/// Network bandwidth limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthLimits {
    /// Sustained rate in bytes per second.
    #[serde(default)]
    pub rate_in_bytes_per_second: u64,
    /// Burst rate in bytes per second.
    #[serde(default)]
    pub burst_rate_in_bytes_per_second: u64,
}

// =============================================================================
// Hooks
// =============================================================================

/// An executable invoked by the runtime at a lifecycle point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Absolute path of the hook executable.
    pub path: PathBuf,
    /// Arguments, argv[0] excluded.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Hook {
    /// Returns true if no hook was configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

/// The hook pair computed by the networker and injected into the bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    /// Runs inside the container's namespace set, before user code.
    pub prestart: Hook,
    /// Runs after the container's last process exits.
    pub poststop: Hook,
}

// =============================================================================
// Desired / Actual Container Specs (orchestrator ⇄ containerizer)
// =============================================================================

/// Fully resolved spec handed from the orchestrator to the containerizer.
#[derive(Debug, Clone, Default)]
pub struct DesiredContainerSpec {
    /// Handle, already generated if the caller left it empty.
    pub handle: String,
    /// Provisioned rootfs path on the host.
    pub rootfs_path: PathBuf,
    /// Caller env followed by env contributed by the volume creator.
    pub env: Vec<String>,
    /// Bind mounts, in caller order.
    pub bind_mounts: Vec<BindMount>,
    /// Resource limits.
    pub limits: Limits,
    /// Privileged containers keep host identity mappings.
    pub privileged: bool,
    /// Network hooks computed for this handle.
    pub network_hooks: Hooks,
}

/// What the containerizer reports about a live container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualContainerSpec {
    /// Path of the container's bundle directory in the depot.
    pub bundle_path: PathBuf,
}

// =============================================================================
// Rootfs URI
// =============================================================================

/// A parsed rootfs location.
///
/// Accepted forms are `scheme://path` and a bare path (empty scheme).
/// Which schemes are honored is up to the volume creator; parsing only
/// validates the shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootfsUri {
    /// URI scheme, lowercase. Empty for bare paths.
    pub scheme: String,
    /// Path component.
    pub path: PathBuf,
}

impl RootfsUri {
    /// Parses a rootfs URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRootfsUri`] when a scheme separator is
    /// present but the scheme is empty or contains non-alphanumeric
    /// characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((scheme, path)) = raw.split_once("://") else {
            return Ok(Self {
                scheme: String::new(),
                path: PathBuf::from(raw),
            });
        };

        if scheme.is_empty() {
            return Err(Error::InvalidRootfsUri {
                uri: raw.to_string(),
                reason: "missing scheme".to_string(),
            });
        }

        if !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidRootfsUri {
                uri: raw.to_string(),
                reason: format!("malformed scheme '{scheme}'"),
            });
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            path: PathBuf::from(path),
        })
    }
}

impl std::fmt::Display for RootfsUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scheme.is_empty() {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{}://{}", self.scheme, self.path.display())
        }
    }
}

/// Rootfs provisioning request handed to the volume creator.
#[derive(Debug, Clone)]
pub struct RootfsSpec {
    /// Where the base rootfs comes from.
    pub rootfs: RootfsUri,
    /// Disk quota in bytes. Zero means unlimited.
    pub quota_bytes: u64,
    /// What the quota counts.
    pub quota_scope: DiskLimitScope,
    /// Whether the rootfs ownership must be shifted for a user namespace.
    pub namespaced: bool,
}

// =============================================================================
// Processes
// =============================================================================

/// Specification of a process to run inside a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable path inside the container.
    pub path: String,
    /// Arguments, argv[0] excluded.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment in `KEY=VALUE` form.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory inside the container.
    #[serde(default)]
    pub cwd: String,
    /// User to run as (name or uid). Empty means the bundle default.
    #[serde(default)]
    pub user: String,
    /// Allocate a TTY.
    #[serde(default)]
    pub tty: bool,
}

/// Streams attached to a container process.
///
/// Absent streams are discarded by the runner.
#[derive(Default)]
pub struct ProcessIo {
    /// Fed to the process stdin until EOF.
    pub stdin: Option<Pin<Box<dyn AsyncRead + Send>>>,
    /// Receives the process stdout.
    pub stdout: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    /// Receives the process stderr.
    pub stderr: Option<Pin<Box<dyn AsyncWrite + Send>>>,
}

impl ProcessIo {
    /// Io that discards everything.
    #[must_use]
    pub fn discard() -> Self {
        Self::default()
    }

    /// Io that captures only stdout into the given writer.
    #[must_use]
    pub fn stdout_only(writer: impl AsyncWrite + Send + 'static) -> Self {
        Self {
            stdin: None,
            stdout: Some(Box::pin(writer)),
            stderr: None,
        }
    }
}

impl std::fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

// =============================================================================
// Filesystem Streaming
// =============================================================================

/// A tar stream to unpack into the container filesystem.
pub struct StreamInSpec {
    /// Destination path inside the container.
    pub path: PathBuf,
    /// User the unpacked files should belong to. Empty means root.
    pub user: String,
    /// The tar stream.
    pub tar: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for StreamInSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamInSpec")
            .field("path", &self.path)
            .field("user", &self.user)
            .finish()
    }
}

/// A request to read part of the container filesystem as a tar stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOutSpec {
    /// Source path inside the container.
    pub path: PathBuf,
    /// User performing the read. Empty means root.
    #[serde(default)]
    pub user: String,
}

// =============================================================================
// Network Rules
// =============================================================================

/// Outbound network rule applied to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetOutRule {
    /// Protocol the rule matches.
    #[serde(default)]
    pub protocol: Protocol,
    /// Destination IP ranges the rule opens.
    #[serde(default)]
    pub networks: Vec<IpRange>,
    /// Destination port ranges the rule opens.
    #[serde(default)]
    pub ports: Vec<PortRange>,
    /// Log matching packets.
    #[serde(default)]
    pub log: bool,
}

/// Network protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    All,
    Tcp,
    Udp,
    Icmp,
}

/// Inclusive IPv4 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    /// Range covering a single address.
    #[must_use]
    pub fn single(ip: Ipv4Addr) -> Self {
        Self { start: ip, end: ip }
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Range covering a single port.
    #[must_use]
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }
}

// =============================================================================
// Info / Capacity Views
// =============================================================================

/// A host-to-container port mapping.
///
/// Serialized with the wire field names used in the mapped-ports property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(rename = "HostPort")]
    pub host_port: u16,
    #[serde(rename = "ContainerPort")]
    pub container_port: u16,
}

/// Snapshot of a live container reported by `info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Always `"active"`: a container exists only between create and destroy.
    pub state: String,
    /// IP assigned to the container's interface.
    pub container_ip: String,
    /// IP of the host side of the container's bridge.
    pub host_ip: String,
    /// IP the container's mapped ports are reachable on.
    pub external_ip: String,
    /// Bundle directory in the depot.
    pub container_path: PathBuf,
    /// Property snapshot.
    pub properties: HashMap<String, String>,
    /// Host-to-container port mappings, in allocation order.
    pub mapped_ports: Vec<PortMapping>,
    /// Lifecycle events recorded against the container. Event tracking
    /// lives above this control plane, so the list is always empty.
    pub events: Vec<String>,
    /// Pids of processes run in the container. Process tracking lives
    /// above this control plane, so the list is always empty.
    pub process_ids: Vec<u32>,
}

/// Host capacity summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub memory_in_bytes: u64,
    pub disk_in_bytes: u64,
    pub max_containers: u64,
}

/// Resource usage snapshot for a container.
///
/// Metering is owned by infrastructure above this control plane; the
/// facade reports zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub memory_bytes: u64,
    pub cpu_usage_ns: u64,
    pub disk_bytes: u64,
}
