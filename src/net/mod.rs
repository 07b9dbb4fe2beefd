//! Container networking: spec parsing, address allocation, and the
//! shipped [`Networker`] implementation.
//!
//! A network spec is the user-supplied hint on create:
//!
//! | Spec            | Subnet          | IP                     |
//! |-----------------|-----------------|------------------------|
//! | `""`            | dynamic         | dynamic                |
//! | `10.0.0.0/30`   | static          | dynamic                |
//! | `10.0.0.2/30`   | static          | static (`10.0.0.2`)    |
//! | `10.0.0.2`      | static (`/30`)  | static (`10.0.0.2`)    |
//!
//! The [`PoolNetworker`] allocates from a [`SubnetPool`], records the
//! per-container addressing under the handle's property key-space, and
//! emits the prestart/poststop hook pair that performs the actual
//! interface plumbing. The hooks run as a separate binary inside (and
//! after) the container's namespace set; this module never touches the
//! network itself.

pub mod subnets;

use crate::constants::SUBNET_PREFIX;
use crate::error::{Error, Result};
use crate::orchestrator::{
    Networker, BRIDGE_IP_KEY, CONTAINER_IP_KEY, EXTERNAL_IP_KEY, MAPPED_PORTS_KEY,
};
use crate::properties::PropertyManager;
use crate::spec::{Hook, Hooks, NetOutRule, PortMapping};
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use subnets::{gateway_ip, IpSelector, SubnetPool, SubnetSelector};
use tracing::debug;

/// Property holding the JSON-encoded outbound rules applied to a handle.
pub const NET_OUT_RULES_KEY: &str = "arbor.network.net-out-rules";

// =============================================================================
// Spec Parsing
// =============================================================================

/// Parses a user-supplied network spec into its selector pair.
///
/// An empty spec selects everything dynamically. A spec without a CIDR
/// suffix is read as a single address in its enclosing /30. When the
/// address part equals the subnet's network address, only the subnet is
/// pinned and the IP stays dynamic.
pub fn parse_spec(spec: &str) -> Result<(SubnetSelector, IpSelector)> {
    if spec.is_empty() {
        return Ok((SubnetSelector::Dynamic, IpSelector::Dynamic));
    }

    let suffixed = if spec.contains('/') {
        spec.to_string()
    } else {
        format!("{spec}/{SUBNET_PREFIX}")
    };

    let parsed: Ipv4Network = suffixed.parse().map_err(|err| Error::InvalidNetworkSpec {
        spec: spec.to_string(),
        reason: format!("{err}"),
    })?;

    let subnet = Ipv4Network::new(parsed.network(), parsed.prefix()).map_err(|err| {
        Error::InvalidNetworkSpec {
            spec: spec.to_string(),
            reason: format!("{err}"),
        }
    })?;

    let ip_selector = if parsed.ip() == subnet.network() {
        IpSelector::Dynamic
    } else {
        IpSelector::Static(parsed.ip())
    };

    Ok((SubnetSelector::Static(subnet), ip_selector))
}

// =============================================================================
// Port Pool
// =============================================================================

/// Ephemeral host port range for mapped container ports.
pub struct PortPool {
    free: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    /// Pool covering `[start, start + size)`, clamped to the u16 range.
    #[must_use]
    pub fn new(start: u16, size: u16) -> Self {
        let end = u32::from(start) + u32::from(size);
        let free = (u32::from(start)..end)
            .take_while(|port| *port <= u32::from(u16::MAX))
            .map(|port| port as u16)
            .collect();
        Self {
            free: Mutex::new(free),
        }
    }

    /// Takes the lowest free port.
    pub fn acquire(&self) -> Result<u16> {
        let mut free = self.lock();
        let port = free.iter().next().copied().ok_or(Error::PortPoolExhausted)?;
        free.remove(&port);
        Ok(port)
    }

    /// Returns a port to the pool.
    pub fn release(&self, port: u16) {
        self.lock().insert(port);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<u16>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Pool Networker
// =============================================================================

/// Per-handle network allocation, kept for teardown.
struct Allocation {
    subnet: Ipv4Network,
    ip: Ipv4Addr,
    acquired_ports: Vec<u16>,
}

/// The shipped [`Networker`]: allocates addressing from a [`SubnetPool`],
/// records it as properties, and delegates interface plumbing to a hook
/// binary.
pub struct PoolNetworker {
    subnets: Arc<SubnetPool>,
    ports: Arc<PortPool>,
    property_manager: Arc<PropertyManager>,
    external_ip: Ipv4Addr,
    hook_bin: PathBuf,
    mtu: u32,
    allocations: Mutex<HashMap<String, Allocation>>,
}

impl PoolNetworker {
    pub fn new(
        subnets: Arc<SubnetPool>,
        ports: Arc<PortPool>,
        property_manager: Arc<PropertyManager>,
        external_ip: Ipv4Addr,
        hook_bin: impl Into<PathBuf>,
        mtu: u32,
    ) -> Self {
        Self {
            subnets,
            ports,
            property_manager,
            external_ip,
            hook_bin: hook_bin.into(),
            mtu,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Allocation>> {
        self.allocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hook(&self, action: &str, handle: &str, subnet: Ipv4Network, ip: Ipv4Addr) -> Hook {
        Hook {
            path: self.hook_bin.clone(),
            args: vec![
                "--action".to_string(),
                action.to_string(),
                "--handle".to_string(),
                handle.to_string(),
                "--ip".to_string(),
                ip.to_string(),
                "--subnet".to_string(),
                subnet.to_string(),
                "--gateway".to_string(),
                gateway_ip(subnet).to_string(),
                "--mtu".to_string(),
                self.mtu.to_string(),
            ],
        }
    }
}

#[async_trait]
impl Networker for PoolNetworker {
    async fn hooks(&self, handle: &str, spec: &str) -> Result<Hooks> {
        let (subnet_selector, ip_selector) = parse_spec(spec)?;

        let mut allocations = self.lock();
        if allocations.contains_key(handle) {
            return Err(Error::HandleExists(handle.to_string()));
        }

        let (subnet, ip) = self.subnets.allocate(&subnet_selector, &ip_selector)?;
        allocations.insert(
            handle.to_string(),
            Allocation {
                subnet,
                ip,
                acquired_ports: Vec::new(),
            },
        );
        drop(allocations);

        self.property_manager
            .set(handle, CONTAINER_IP_KEY, &ip.to_string());
        self.property_manager
            .set(handle, BRIDGE_IP_KEY, &gateway_ip(subnet).to_string());
        self.property_manager
            .set(handle, EXTERNAL_IP_KEY, &self.external_ip.to_string());

        debug!(handle, %subnet, %ip, "network allocated");

        Ok(Hooks {
            prestart: self.hook("up", handle, subnet, ip),
            poststop: self.hook("down", handle, subnet, ip),
        })
    }

    async fn net_in(
        &self,
        handle: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<(u16, u16)> {
        let host_port = if host_port == 0 {
            let acquired = self.ports.acquire()?;
            let mut allocations = self.lock();
            match allocations.get_mut(handle) {
                Some(allocation) => allocation.acquired_ports.push(acquired),
                None => {
                    drop(allocations);
                    self.ports.release(acquired);
                    return Err(Error::ContainerNotFound(handle.to_string()));
                }
            }
            acquired
        } else {
            if !self.lock().contains_key(handle) {
                return Err(Error::ContainerNotFound(handle.to_string()));
            }
            host_port
        };

        let container_port = if container_port == 0 {
            host_port
        } else {
            container_port
        };

        let mut mappings: Vec<PortMapping> = self
            .property_manager
            .get(handle, MAPPED_PORTS_KEY)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        mappings.push(PortMapping {
            host_port,
            container_port,
        });
        let encoded = serde_json::to_string(&mappings)
            .map_err(|err| Error::Serialization(err.to_string()))?;
        self.property_manager.set(handle, MAPPED_PORTS_KEY, &encoded);

        debug!(handle, host_port, container_port, "port mapped");
        Ok((host_port, container_port))
    }

    async fn net_out(&self, handle: &str, rule: NetOutRule) -> Result<()> {
        if !self.lock().contains_key(handle) {
            return Err(Error::ContainerNotFound(handle.to_string()));
        }

        let mut rules: Vec<NetOutRule> = self
            .property_manager
            .get(handle, NET_OUT_RULES_KEY)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        rules.push(rule);
        let encoded =
            serde_json::to_string(&rules).map_err(|err| Error::Serialization(err.to_string()))?;
        self.property_manager.set(handle, NET_OUT_RULES_KEY, &encoded);

        debug!(handle, "outbound rule recorded");
        Ok(())
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        let Some(allocation) = self.lock().remove(handle) else {
            return Ok(());
        };

        self.subnets.release(allocation.subnet, allocation.ip);
        for port in allocation.acquired_ports {
            self.ports.release(port);
        }

        debug!(handle, "network released");
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.subnets.capacity()
    }
}
