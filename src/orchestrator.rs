//! Top-level orchestrator for the container host.
//!
//! The [`Orchestrator`] owns the create/destroy lifecycle: it sequences
//! the networker, the volume creator, and the containerizer, registers
//! initial properties, and hands back per-handle [`Container`] facades.
//!
//! # Create Is All-Or-Nothing
//!
//! Resources are acquired in a fixed order (network, rootfs, container)
//! and released in reverse order when a later step fails, so a failed
//! create never leaks a network allocation or a provisioned rootfs.
//! Destroy is the opposite: strictly ordered, short-circuiting on the
//! first failure, because each step depends on the side effects of the
//! previous one (network teardown needs the container processes gone).

use crate::container::Container;
use crate::containerizer::Process;
use crate::error::Result;
use crate::properties::PropertyManager;
use crate::spec::{
    ActualContainerSpec, Capacity, ContainerInfo, ContainerSpec, DesiredContainerSpec, Hooks,
    NetOutRule, ProcessIo, ProcessSpec, RootfsSpec, RootfsUri, StreamInSpec, StreamOutSpec,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};
use uuid::Uuid;

// =============================================================================
// Property Keys
// =============================================================================

/// Property under which the networker records the container's IP.
pub const CONTAINER_IP_KEY: &str = "arbor.network.container-ip";

/// Property under which the networker records the host side of the bridge.
pub const BRIDGE_IP_KEY: &str = "arbor.network.host-ip";

/// Property under which the networker records the externally reachable IP.
pub const EXTERNAL_IP_KEY: &str = "arbor.network.external-ip";

/// Property holding the JSON-encoded list of host-to-container port mappings.
pub const MAPPED_PORTS_KEY: &str = "arbor.network.mapped-ports";

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Network lifecycle for a container.
#[async_trait]
pub trait Networker: Send + Sync {
    /// Allocates network resources for `handle` according to the spec
    /// string and returns the hook pair to inject into the bundle.
    async fn hooks(&self, handle: &str, spec: &str) -> Result<Hooks>;

    /// Maps a host port to a container port. A zero port on either side
    /// asks the networker to pick; the actually assigned pair is returned.
    async fn net_in(&self, handle: &str, host_port: u16, container_port: u16)
        -> Result<(u16, u16)>;

    /// Opens outbound connectivity described by `rule`.
    async fn net_out(&self, handle: &str, rule: NetOutRule) -> Result<()>;

    /// Releases everything allocated for `handle`.
    async fn destroy(&self, handle: &str) -> Result<()>;

    /// Upper bound on the number of containers the network can carry.
    fn capacity(&self) -> u64;
}

/// Rootfs provisioning for a container.
#[async_trait]
pub trait VolumeCreator: Send + Sync {
    /// Provisions a rootfs and returns its path plus any environment the
    /// image demands of processes run inside the container.
    async fn create(&self, handle: &str, spec: RootfsSpec) -> Result<(PathBuf, Vec<String>)>;

    /// Releases the rootfs provisioned for `handle`.
    async fn destroy(&self, handle: &str) -> Result<()>;
}

/// Host resource totals.
pub trait SysInfoProvider: Send + Sync {
    fn total_memory(&self) -> Result<u64>;
    fn total_disk(&self) -> Result<u64>;
}

/// Generator for container handles when the caller supplies none.
pub trait HandleGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// The shipped [`HandleGenerator`]: random UUIDs rendered as strings.
pub struct UuidHandleGenerator;

impl HandleGenerator for UuidHandleGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Container realization: the seam between the orchestrator and the
/// bundle/depot/runtime pipeline.
#[async_trait]
pub trait Containerizer: Send + Sync {
    /// Realizes the desired spec as a running container.
    async fn create(&self, spec: DesiredContainerSpec) -> Result<()>;

    /// Runs a process inside a container.
    async fn run(&self, handle: &str, spec: ProcessSpec, io: ProcessIo)
        -> Result<Box<dyn Process>>;

    /// Unpacks a tar stream into the container filesystem.
    async fn stream_in(&self, handle: &str, spec: StreamInSpec) -> Result<()>;

    /// Reads part of the container filesystem as a tar stream.
    async fn stream_out(
        &self,
        handle: &str,
        spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Kills the container and removes its bundle directory.
    async fn destroy(&self, handle: &str) -> Result<()>;

    /// Lists the handles of all containers on this host.
    async fn handles(&self) -> Result<Vec<String>>;

    /// Reports where the container's bundle lives.
    async fn info(&self, handle: &str) -> Result<ActualContainerSpec>;
}

// =============================================================================
// Orchestrator
// =============================================================================

/// The top-level container host: create, destroy, lookup, list, capacity.
pub struct Orchestrator {
    containerizer: Arc<dyn Containerizer>,
    networker: Arc<dyn Networker>,
    volume_creator: Arc<dyn VolumeCreator>,
    sysinfo: Arc<dyn SysInfoProvider>,
    handle_generator: Arc<dyn HandleGenerator>,
    property_manager: Arc<PropertyManager>,
}

impl Orchestrator {
    pub fn new(
        containerizer: Arc<dyn Containerizer>,
        networker: Arc<dyn Networker>,
        volume_creator: Arc<dyn VolumeCreator>,
        sysinfo: Arc<dyn SysInfoProvider>,
        handle_generator: Arc<dyn HandleGenerator>,
        property_manager: Arc<PropertyManager>,
    ) -> Self {
        Self {
            containerizer,
            networker,
            volume_creator,
            sysinfo,
            handle_generator,
            property_manager,
        }
    }

    /// Creates a container and returns its facade.
    ///
    /// Acquisition order is network → rootfs → container. Once the
    /// network allocation exists, every failure path releases the
    /// resources acquired so far, in reverse order, before surfacing
    /// the original error.
    pub async fn create(&self, spec: ContainerSpec) -> Result<Container> {
        let handle = if spec.handle.is_empty() {
            self.handle_generator.generate()
        } else {
            spec.handle.clone()
        };

        info!(handle = %handle, "creating container");

        let network_hooks = self.networker.hooks(&handle, &spec.network).await?;

        let rootfs = match RootfsUri::parse(&spec.rootfs) {
            Ok(rootfs) => rootfs,
            Err(err) => {
                self.undo_network(&handle).await;
                return Err(err);
            }
        };

        let rootfs_spec = RootfsSpec {
            rootfs,
            quota_bytes: spec.limits.disk.byte_hard,
            quota_scope: spec.limits.disk.scope,
            namespaced: !spec.privileged,
        };
        let (rootfs_path, extra_env) =
            match self.volume_creator.create(&handle, rootfs_spec).await {
                Ok(created) => created,
                Err(err) => {
                    self.undo_network(&handle).await;
                    return Err(err);
                }
            };

        let mut env = spec.env.clone();
        env.extend(extra_env);

        let desired = DesiredContainerSpec {
            handle: handle.clone(),
            rootfs_path,
            env,
            bind_mounts: spec.bind_mounts.clone(),
            limits: spec.limits,
            privileged: spec.privileged,
            network_hooks,
        };

        if let Err(err) = self.containerizer.create(desired).await {
            self.undo_volume(&handle).await;
            self.undo_network(&handle).await;
            return Err(err);
        }

        for (key, value) in &spec.properties {
            self.property_manager.set(&handle, key, value);
        }

        info!(handle = %handle, "container created");
        Ok(self.lookup(&handle))
    }

    /// Returns a facade for `handle`.
    ///
    /// Whether a container actually exists behind the handle is checked
    /// by the collaborators when the facade is used.
    #[must_use]
    pub fn lookup(&self, handle: &str) -> Container {
        Container::new(
            handle,
            Arc::clone(&self.containerizer),
            Arc::clone(&self.networker),
            Arc::clone(&self.property_manager),
        )
    }

    /// Lists containers whose properties match every pair in `filter`.
    pub async fn containers(&self, filter: &HashMap<String, String>) -> Result<Vec<Container>> {
        let handles = self.containerizer.handles().await?;
        Ok(handles
            .into_iter()
            .filter(|handle| self.property_manager.matches_all(handle, filter))
            .map(|handle| self.lookup(&handle))
            .collect())
    }

    /// Destroys a container.
    ///
    /// Strictly ordered: container processes and bundle first, then the
    /// network, then the rootfs, then the property key-space. The first
    /// failure aborts the remaining steps and propagates unchanged; a
    /// partial destroy is retried by calling destroy again.
    pub async fn destroy(&self, handle: &str) -> Result<()> {
        info!(handle, "destroying container");
        self.containerizer.destroy(handle).await?;
        self.networker.destroy(handle).await?;
        self.volume_creator.destroy(handle).await?;
        self.property_manager.destroy_key_space(handle);
        Ok(())
    }

    /// Reports total host capacity.
    pub fn capacity(&self) -> Result<Capacity> {
        Ok(Capacity {
            memory_in_bytes: self.sysinfo.total_memory()?,
            disk_in_bytes: self.sysinfo.total_disk()?,
            max_containers: self.networker.capacity(),
        })
    }

    /// Collects `info` for each handle.
    ///
    /// Never fails as a whole: each handle's result, error or not, is
    /// stored in the returned map.
    pub async fn bulk_info(
        &self,
        handles: &[String],
    ) -> HashMap<String, Result<ContainerInfo>> {
        let mut infos = HashMap::with_capacity(handles.len());
        for handle in handles {
            infos.insert(handle.clone(), self.lookup(handle).info().await);
        }
        infos
    }

    async fn undo_network(&self, handle: &str) {
        if let Err(err) = self.networker.destroy(handle).await {
            warn!(handle, error = %err, "failed to release network after aborted create");
        }
    }

    async fn undo_volume(&self, handle: &str) {
        if let Err(err) = self.volume_creator.destroy(handle).await {
            warn!(handle, error = %err, "failed to release rootfs after aborted create");
        }
    }
}
