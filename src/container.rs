//! Per-handle container facade.
//!
//! A [`Container`] is a thin dispatcher bound to one handle. It holds no
//! state of its own: every operation forwards to the containerizer, the
//! networker, or the property manager, so facades are cheap to mint and
//! two facades for the same handle are interchangeable.

use crate::containerizer::Process;
use crate::error::{Error, Result};
use crate::orchestrator::{
    Containerizer, Networker, BRIDGE_IP_KEY, CONTAINER_IP_KEY, EXTERNAL_IP_KEY, MAPPED_PORTS_KEY,
};
use crate::properties::PropertyManager;
use crate::spec::{
    BandwidthLimits, ContainerInfo, CpuLimits, DiskLimits, MemoryLimits, Metrics, NetOutRule,
    ProcessIo, ProcessSpec, StreamInSpec, StreamOutSpec,
};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::debug;

/// Handle-bound view of a container.
pub struct Container {
    handle: String,
    containerizer: Arc<dyn Containerizer>,
    networker: Arc<dyn Networker>,
    property_manager: Arc<PropertyManager>,
}

impl Container {
    pub(crate) fn new(
        handle: &str,
        containerizer: Arc<dyn Containerizer>,
        networker: Arc<dyn Networker>,
        property_manager: Arc<PropertyManager>,
    ) -> Self {
        Self {
            handle: handle.to_string(),
            containerizer,
            networker,
            property_manager,
        }
    }

    /// The container's handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    // =========================================================================
    // Processes
    // =========================================================================

    /// Runs a process inside the container.
    pub async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Box<dyn Process>> {
        self.containerizer.run(&self.handle, spec, io).await
    }

    /// Reattaches to a process started earlier.
    pub fn attach(&self, _pid: u32, _io: ProcessIo) -> Result<Box<dyn Process>> {
        Err(Error::NotSupported(
            "attach is not implemented by this host".to_string(),
        ))
    }

    /// Stops the container without destroying it.
    pub fn stop(&self, _kill: bool) -> Result<()> {
        Err(Error::NotSupported(
            "stop is not implemented by this host; destroy the container instead".to_string(),
        ))
    }

    // =========================================================================
    // Filesystem Streaming
    // =========================================================================

    /// Unpacks a tar stream into the container filesystem.
    pub async fn stream_in(&self, spec: StreamInSpec) -> Result<()> {
        self.containerizer.stream_in(&self.handle, spec).await
    }

    /// Reads part of the container filesystem as a tar stream.
    pub async fn stream_out(
        &self,
        spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        self.containerizer.stream_out(&self.handle, spec).await
    }

    // =========================================================================
    // Networking
    // =========================================================================

    /// Maps a host port to a container port; returns the assigned pair.
    pub async fn net_in(&self, host_port: u16, container_port: u16) -> Result<(u16, u16)> {
        self.networker
            .net_in(&self.handle, host_port, container_port)
            .await
    }

    /// Opens outbound connectivity described by `rule`.
    pub async fn net_out(&self, rule: NetOutRule) -> Result<()> {
        self.networker.net_out(&self.handle, rule).await
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Snapshot of all properties.
    pub fn properties(&self) -> Result<HashMap<String, String>> {
        self.property_manager.all(&self.handle)
    }

    /// One property value.
    pub fn property(&self, name: &str) -> Result<String> {
        self.property_manager.get(&self.handle, name)
    }

    /// Sets a property.
    pub fn set_property(&self, name: &str, value: &str) -> Result<()> {
        self.property_manager.set(&self.handle, name, value);
        Ok(())
    }

    /// Removes a property.
    pub fn remove_property(&self, name: &str) -> Result<()> {
        self.property_manager.remove(&self.handle, name)
    }

    // =========================================================================
    // Info
    // =========================================================================

    /// Assembles the container info view.
    ///
    /// Every lookup is fatal except the mapped-ports property: a
    /// container that never mapped a port has no such key, so a missing
    /// or unreadable value reports as an empty mapping list.
    pub async fn info(&self) -> Result<ContainerInfo> {
        let container_ip = self.property_manager.get(&self.handle, CONTAINER_IP_KEY)?;
        let host_ip = self.property_manager.get(&self.handle, BRIDGE_IP_KEY)?;
        let external_ip = self.property_manager.get(&self.handle, EXTERNAL_IP_KEY)?;

        let actual = self.containerizer.info(&self.handle).await?;
        let properties = self.property_manager.all(&self.handle)?;

        let mapped_ports = match self.property_manager.get(&self.handle, MAPPED_PORTS_KEY) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(err) => {
                debug!(handle = %self.handle, error = %err, "no mapped ports recorded");
                Vec::new()
            }
        };

        Ok(ContainerInfo {
            state: "active".to_string(),
            container_ip,
            host_ip,
            external_ip,
            container_path: actual.bundle_path,
            properties,
            mapped_ports,
            events: Vec::new(),
            process_ids: Vec::new(),
        })
    }

    /// Resource usage. Metering lives above this control plane.
    pub fn metrics(&self) -> Result<Metrics> {
        Ok(Metrics::default())
    }

    // =========================================================================
    // Limits
    //
    // Limits are applied once, at create time, through the bundle. The
    // post-create limit surface is accepted for API compatibility and
    // reports zero values.
    // =========================================================================

    pub fn limit_bandwidth(&self, _limits: BandwidthLimits) -> Result<()> {
        Ok(())
    }

    pub fn current_bandwidth_limits(&self) -> Result<BandwidthLimits> {
        Ok(BandwidthLimits::default())
    }

    pub fn limit_cpu(&self, _limits: CpuLimits) -> Result<()> {
        Ok(())
    }

    pub fn current_cpu_limits(&self) -> Result<CpuLimits> {
        Ok(CpuLimits::default())
    }

    pub fn limit_disk(&self, _limits: DiskLimits) -> Result<()> {
        Ok(())
    }

    pub fn current_disk_limits(&self) -> Result<DiskLimits> {
        Ok(DiskLimits::default())
    }

    pub fn limit_memory(&self, _limits: MemoryLimits) -> Result<()> {
        Ok(())
    }

    pub fn current_memory_limits(&self) -> Result<MemoryLimits> {
        Ok(MemoryLimits::default())
    }

    /// Grace time is enforced by the server wrapper above this crate.
    pub fn set_grace_time(&self, _grace: Duration) -> Result<()> {
        Ok(())
    }
}
