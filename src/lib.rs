//! # arbor
//!
//! **Control plane for a Linux container host daemon.**
//!
//! This crate turns declarative container specs into running OCI
//! containers and sustains them across their lifecycle. It owns the
//! orchestration, the on-disk bundle depot, the network address algebra,
//! and the per-container metadata store; syscalls, packet filtering, and
//! image handling live behind small collaborator traits.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             arbor                                  │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────────────┐  │
//! │  │                        Orchestrator                          │  │
//! │  │   create(spec) → Container     destroy(handle)               │  │
//! │  │   lookup / containers / capacity / bulk_info                 │  │
//! │  └───────┬──────────────────┬──────────────────┬────────────────┘  │
//! │          │                  │                  │                   │
//! │  ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼────────────────┐  │
//! │  │   Networker   │  │ VolumeCreator │  │     Containerizer      │  │
//! │  │ subnet + IP   │  │ rootfs        │  │ bundle → depot → run   │  │
//! │  │ pool, hooks   │  │ provisioning  │  │ → readiness check      │  │
//! │  └───────────────┘  └───────────────┘  └───┬───────────┬────────┘  │
//! │                                            │           │           │
//! │                                    ┌───────▼────┐ ┌────▼────────┐  │
//! │                                    │   Depot    │ │ BundleRunner│  │
//! │                                    │ config.json│ │ OCI runtime │  │
//! │                                    │ per handle │ │ binary      │  │
//! │                                    └────────────┘ └─────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! A container is *active* from the moment create succeeds until destroy
//! completes; there is no stopped state in between. Create acquires
//! resources in a fixed order (network, rootfs, container) and releases
//! them in reverse when any step fails, so a failed create leaks
//! nothing. Destroy runs the same chain forwards and short-circuits on
//! the first failure, leaving a retryable partial state.
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor::{ContainerSpec, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> arbor::Result<()> {
//!     let orchestrator: Orchestrator = /* wired at daemon start */;
//!
//!     let container = orchestrator
//!         .create(ContainerSpec {
//!             rootfs: "raw:///srv/rootfs/alpine".to_string(),
//!             network: "10.254.1.2/30".to_string(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let info = container.info().await?;
//!     println!("{} is {} at {}", container.handle(), info.state, info.container_ip);
//!
//!     orchestrator.destroy(container.handle()).await?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod constants;
pub mod container;
pub mod containerizer;
pub mod depot;
pub mod error;
pub mod net;
pub mod orchestrator;
pub mod properties;
pub mod rules;
pub mod runner;
pub mod spec;
pub mod sysinfo;
pub mod volume;

pub use container::Container;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use spec::{Capacity, ContainerInfo, ContainerSpec, ProcessIo, ProcessSpec};
