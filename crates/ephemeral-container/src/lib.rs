//! Ephemeral Container
//!
//! Provisions one throwaway container on a local or remote Docker engine and
//! hands back where its ports ended up. Provides:
//! - Engine connection selection (environment first, docker-machine fallback)
//! - Image resolution (pull when missing, or always on request)
//! - Random host port allocation for transient ports, fixed host ports for mapped ones
//! - Optional readiness wait on a log line
//!
//! ## Usage
//!
//! ```no_run
//! use ephemeral_container::{provision, ClientConfig};
//!
//! # async fn run() -> ephemeral_container::Result<()> {
//! let config = ClientConfig::new("postgres:16")
//!     .env("POSTGRES_PASSWORD", "secret")
//!     .transient_port(5432)
//!     .wait_for_log_line("ready to accept connections");
//!
//! let handle = provision(&config).await?;
//! println!("postgres at {:?}", handle.endpoint(5432));
//! # Ok(())
//! # }
//! ```
//!
//! Provisioning never stops or removes a container, even on failure.
//! Teardown belongs to the caller: [`ContainerHandle::stop`] and
//! [`ContainerHandle::remove`], or the engine through [`ContainerHandle::engine`].

pub mod config;
pub mod connector;
pub mod docker;
pub mod error;
pub mod handle;
pub mod orchestrator;
pub mod ports;
pub mod readiness;
pub mod request;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, EnvironmentVar, MappedPort, DEFAULT_MACHINE_URL};
pub use connector::{
    AmbientEnvironment, CertificateSet, ConnectorCandidate, EngineConnector, EngineEnvironment,
    MachineCertificates,
};
pub use docker::{BollardBridge, EngineBridge, EngineClient};
pub use error::{ProvisionError, Result};
pub use handle::ContainerHandle;
pub use orchestrator::{provision, ContainerOrchestrator};
pub use ports::{PortAllocator, HOST_PORT_RANGE};
pub use readiness::ReadinessWaiter;
pub use request::{ContainerSpecBuilder, SpecCustomizer};
