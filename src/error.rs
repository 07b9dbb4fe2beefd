//! Error types for the container host control plane.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for control plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the container host control plane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container already exists.
    #[error("container already exists: {0}")]
    HandleExists(String),

    /// Handle contains characters that are not safe on disk.
    #[error("invalid container handle '{handle}': {reason}")]
    InvalidHandle { handle: String, reason: String },

    /// Container start check never observed the readiness token.
    #[error("container did not report readiness ({expect:?}) within {timeout:?}")]
    StartTimeout { expect: String, timeout: Duration },

    /// Container start check failed before the deadline.
    #[error("container start check failed: {0}")]
    StartFailed(String),

    // =========================================================================
    // Spec Validation Errors
    // =========================================================================
    /// Rootfs URI could not be parsed.
    #[error("invalid rootfs uri '{uri}': {reason}")]
    InvalidRootfsUri { uri: String, reason: String },

    /// Network spec could not be parsed.
    #[error("invalid network spec '{spec}': {reason}")]
    InvalidNetworkSpec { spec: String, reason: String },

    // =========================================================================
    // Network Allocation Errors
    // =========================================================================
    /// Every subnet in the pool is allocated.
    #[error("no free subnets in pool {0}")]
    SubnetPoolExhausted(String),

    /// Every usable IP in the subnet is allocated.
    #[error("no free IPs in subnet {0}")]
    IpPoolExhausted(String),

    /// Requested subnet lies outside the configured pool.
    #[error("subnet {subnet} out of range of pool {pool}")]
    SubnetOutOfRange { subnet: String, pool: String },

    /// Requested subnet overlaps an existing allocation.
    #[error("subnet {requested} conflicts with allocated subnet {existing}")]
    SubnetConflict { requested: String, existing: String },

    /// Requested IP is reserved or already handed out.
    #[error("IP {0} already allocated")]
    IpAlreadyAllocated(Ipv4Addr),

    /// Requested IP does not belong to the chosen subnet.
    #[error("IP {ip} not in subnet {subnet}")]
    IpNotInSubnet { ip: Ipv4Addr, subnet: String },

    /// The ephemeral host port range is drained.
    #[error("port pool exhausted")]
    PortPoolExhausted,

    // =========================================================================
    // Property Errors
    // =========================================================================
    /// Property key not set for the handle.
    #[error("property '{key}' not found for container '{handle}'")]
    PropertyNotFound { handle: String, key: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// The underlying OCI runtime binary failed.
    #[error("runtime failed to {action} container '{handle}': {reason}")]
    RunnerFailed {
        handle: String,
        action: String,
        reason: String,
    },

    /// Operation not supported by this control plane.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Archive entry would escape the container rootfs.
    #[error("path escapes container rootfs: {0}")]
    PathTraversal(PathBuf),

    /// Stream exceeded the in-memory archive limit.
    #[error("stream exceeds size limit: {size} > {limit} bytes")]
    StreamTooLarge { size: u64, limit: u64 },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Host introspection failed.
    #[error("failed to read host capacity: {0}")]
    SysInfo(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}
