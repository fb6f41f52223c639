use crate::docker::{EngineBridge, EngineClient};
use crate::error::{ProvisionError, Result};
use bollard::container::{RemoveContainerOptions, StopContainerOptions};
use bollard::models::ContainerInspectResponse;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

/// A provisioned, started container. Dropping the handle does not stop it.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub container_id: String,
    /// Inspection taken after start (and after the readiness wait).
    pub info: ContainerInspectResponse,
    /// Transient container port -> host port the engine actually bound.
    pub host_ports: HashMap<u16, u16>,
    pub engine_host: String,
    pub client: EngineClient,
    pub provisioned_at: DateTime<Utc>,
}

impl ContainerHandle {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.host_ports.get(&container_port).copied()
    }

    /// `host:port` a client outside the engine uses to reach `container_port`.
    pub fn endpoint(&self, container_port: u16) -> Option<String> {
        self.host_port(container_port)
            .map(|port| format!("{}:{port}", self.engine_host))
    }

    pub fn engine(&self) -> &dyn EngineBridge {
        self.client.bridge()
    }

    /// Stops the container, giving it `grace_secs` before it is killed.
    pub async fn stop(&self, grace_secs: i64) -> Result<()> {
        self.engine()
            .stop_container(&self.container_id, Some(StopContainerOptions { t: grace_secs }))
            .await
            .map_err(ProvisionError::engine("stop"))?;
        info!(container_id = %self.container_id, "Container stopped");
        Ok(())
    }

    /// Force-removes the container together with its anonymous volumes.
    pub async fn remove(&self) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.engine()
            .remove_container(&self.container_id, Some(options))
            .await
            .map_err(ProvisionError::engine("remove"))?;
        info!(container_id = %self.container_id, "Container removed");
        Ok(())
    }
}
