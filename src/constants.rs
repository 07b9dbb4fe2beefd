//! Constants for the container host control plane.
//!
//! All timeouts, defaults, and property keys are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Start Check
// =============================================================================

/// Literal token the container init process writes to stdout once pid 1 is up.
pub const READY_TOKEN: &str = "Pid 1 Running";

/// How long the start check scans runtime stdout for the readiness token.
pub const START_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Capacity of the in-process pipe that tees runtime stdout to the start check.
pub const STDOUT_PIPE_CAPACITY: usize = 64 * 1024;

// =============================================================================
// Networking Defaults
// =============================================================================

/// Pool of dynamically allocated container subnets.
pub const DEFAULT_SUBNET_POOL: &str = "10.254.0.0/22";

/// Prefix length of the per-container subnets carved out of the pool.
pub const SUBNET_PREFIX: u8 = 30;

/// Start of the ephemeral port range used for mapped container ports.
pub const DEFAULT_PORT_POOL_START: u16 = 60000;

/// Size of the port pool used for mapped container ports.
pub const DEFAULT_PORT_POOL_SIZE: u16 = 5000;

/// MTU for container network interfaces.
pub const DEFAULT_MTU: u32 = 1500;

// =============================================================================
// Runtime Defaults
// =============================================================================

/// OCI runtime binary invoked to start, exec into, and kill containers.
pub const DEFAULT_RUNTIME_BIN: &str = "runc";

/// OCI runtime spec version written into bundle configs.
pub const OCI_SPEC_VERSION: &str = "1.0.2";

/// File name of the serialized bundle inside a depot directory.
pub const BUNDLE_CONFIG_FILE: &str = "config.json";

// =============================================================================
// User Namespace Mappings
// =============================================================================

/// First host uid/gid that unprivileged container identities are shifted onto.
pub const UNPRIVILEGED_ID_BASE: u32 = 100_000;

/// Number of uids/gids mapped into a container.
pub const ID_MAP_SIZE: u32 = 65_536;

// =============================================================================
// Streaming Limits
// =============================================================================

/// Maximum size of a tar stream held in memory (512 MiB).
/// Prevents disk and memory exhaustion from unbounded stream-in requests.
pub const MAX_STREAM_SIZE: u64 = 512 * 1024 * 1024;

// =============================================================================
// Validation Patterns
// =============================================================================

/// Valid characters for container handles.
/// Handles become depot directory names, so path separators are excluded.
pub const HANDLE_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";
