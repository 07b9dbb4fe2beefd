//! Subnet and IP allocation for container networks.
//!
//! The host carves a configured pool (say `10.254.0.0/22`) into /30
//! subnets and hands out one IP per container. Within every subnet three
//! addresses are reserved: the network address, the broadcast address,
//! and the gateway (first usable address, owned by the host side of the
//! bridge).
//!
//! A subnet stays leased while at least one IP in it is allocated; the
//! lease's refcount is exactly the number of live containers on the
//! subnet, and the subnet becomes reassignable only when the last IP is
//! released.

use crate::constants::SUBNET_PREFIX;
use crate::error::{Error, Result};
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Chooses the subnet an allocation lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetSelector {
    /// Any subnet from the pool, preferring subnets already in use.
    Dynamic,
    /// Exactly this subnet.
    Static(Ipv4Network),
}

/// Chooses the IP within the selected subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSelector {
    /// Any unreserved, unallocated IP.
    Dynamic,
    /// Exactly this IP.
    Static(Ipv4Addr),
}

/// The gateway convention: first usable address of the subnet.
#[must_use]
pub fn gateway_ip(subnet: Ipv4Network) -> Ipv4Addr {
    subnet.nth(1).unwrap_or_else(|| subnet.network())
}

/// Thread-safe allocator over a pool of /30 subnets.
pub struct SubnetPool {
    pool: Ipv4Network,
    leases: Mutex<BTreeMap<Ipv4Network, BTreeSet<Ipv4Addr>>>,
}

impl SubnetPool {
    /// Creates an allocator over `pool`.
    #[must_use]
    pub fn new(pool: Ipv4Network) -> Self {
        Self {
            pool,
            leases: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of /30 subnets the pool can hand out.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        if self.pool.prefix() > SUBNET_PREFIX {
            return 0;
        }
        1u64 << (SUBNET_PREFIX - self.pool.prefix())
    }

    /// Allocates a (subnet, IP) pair according to the selectors.
    pub fn allocate(
        &self,
        subnet_selector: &SubnetSelector,
        ip_selector: &IpSelector,
    ) -> Result<(Ipv4Network, Ipv4Addr)> {
        let mut leases = self.lock();

        let subnet = match subnet_selector {
            SubnetSelector::Static(requested) => self.select_static_subnet(&leases, *requested)?,
            SubnetSelector::Dynamic => self.select_dynamic_subnet(&leases)?,
        };

        let ip = match ip_selector {
            IpSelector::Static(requested) => {
                Self::select_static_ip(subnet, leases.get(&subnet), *requested)?
            }
            IpSelector::Dynamic => Self::select_dynamic_ip(subnet, leases.get(&subnet))?,
        };

        leases.entry(subnet).or_default().insert(ip);
        Ok((subnet, ip))
    }

    /// Releases an allocated IP. The subnet lease is dropped with its
    /// last IP. Releasing something not allocated is a no-op.
    pub fn release(&self, subnet: Ipv4Network, ip: Ipv4Addr) {
        let mut leases = self.lock();
        if let Some(allocated) = leases.get_mut(&subnet) {
            allocated.remove(&ip);
            if allocated.is_empty() {
                leases.remove(&subnet);
            }
        }
    }

    /// Number of live allocations in `subnet` (zero when unleased).
    #[must_use]
    pub fn refcount(&self, subnet: Ipv4Network) -> usize {
        self.lock().get(&subnet).map_or(0, BTreeSet::len)
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<Ipv4Network, BTreeSet<Ipv4Addr>>> {
        self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The i-th /30 subnet of the pool.
    fn nth_subnet(&self, index: u64) -> Option<Ipv4Network> {
        if index >= self.capacity() {
            return None;
        }
        let subnet_size = 1u32 << (32 - SUBNET_PREFIX);
        let base = u32::from(self.pool.network()) + (index as u32) * subnet_size;
        Ipv4Network::new(Ipv4Addr::from(base), SUBNET_PREFIX).ok()
    }

    fn select_static_subnet(
        &self,
        leases: &BTreeMap<Ipv4Network, BTreeSet<Ipv4Addr>>,
        requested: Ipv4Network,
    ) -> Result<Ipv4Network> {
        if !self.pool.contains(requested.network())
            || !self.pool.contains(requested.broadcast())
        {
            return Err(Error::SubnetOutOfRange {
                subnet: requested.to_string(),
                pool: self.pool.to_string(),
            });
        }

        // Sharing an existing identical lease is fine; overlapping a
        // different one is not.
        for existing in leases.keys() {
            if *existing != requested && overlaps(*existing, requested) {
                return Err(Error::SubnetConflict {
                    requested: requested.to_string(),
                    existing: existing.to_string(),
                });
            }
        }

        Ok(requested)
    }

    fn select_dynamic_subnet(
        &self,
        leases: &BTreeMap<Ipv4Network, BTreeSet<Ipv4Addr>>,
    ) -> Result<Ipv4Network> {
        // Reuse a leased subnet with spare capacity before opening a
        // fresh one.
        for (subnet, allocated) in leases {
            if (allocated.len() as u64) < usable_ips(*subnet) {
                return Ok(*subnet);
            }
        }

        for index in 0..self.capacity() {
            let Some(candidate) = self.nth_subnet(index) else {
                break;
            };
            if !leases.contains_key(&candidate)
                && leases.keys().all(|existing| !overlaps(*existing, candidate))
            {
                return Ok(candidate);
            }
        }

        Err(Error::SubnetPoolExhausted(self.pool.to_string()))
    }

    fn select_dynamic_ip(
        subnet: Ipv4Network,
        allocated: Option<&BTreeSet<Ipv4Addr>>,
    ) -> Result<Ipv4Addr> {
        let gateway = gateway_ip(subnet);
        subnet
            .iter()
            .find(|ip| {
                *ip != subnet.network()
                    && *ip != subnet.broadcast()
                    && *ip != gateway
                    && !allocated.is_some_and(|set| set.contains(ip))
            })
            .ok_or_else(|| Error::IpPoolExhausted(subnet.to_string()))
    }

    fn select_static_ip(
        subnet: Ipv4Network,
        allocated: Option<&BTreeSet<Ipv4Addr>>,
        requested: Ipv4Addr,
    ) -> Result<Ipv4Addr> {
        if !subnet.contains(requested) {
            return Err(Error::IpNotInSubnet {
                ip: requested,
                subnet: subnet.to_string(),
            });
        }

        let reserved = requested == subnet.network()
            || requested == subnet.broadcast()
            || requested == gateway_ip(subnet);
        if reserved || allocated.is_some_and(|set| set.contains(&requested)) {
            return Err(Error::IpAlreadyAllocated(requested));
        }

        Ok(requested)
    }
}

/// IPs a subnet can hand to containers: everything except network,
/// broadcast, and gateway.
fn usable_ips(subnet: Ipv4Network) -> u64 {
    let size = u64::from(subnet.size());
    size.saturating_sub(3)
}

fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    let a_range = u32::from(a.network())..=u32::from(a.broadcast());
    let b_range = u32::from(b.network())..=u32::from(b.broadcast());
    a_range.start() <= b_range.end() && b_range.start() <= a_range.end()
}
