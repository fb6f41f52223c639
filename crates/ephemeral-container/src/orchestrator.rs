//! Provisioning sequence
//!
//! build spec -> connect -> resolve image -> create -> start -> await readiness
//! -> inspect -> resolve host ports. Each step runs once; the first failure is
//! returned and nothing is cleaned up, so a container that fails its readiness
//! wait is left running for the caller to inspect.

use crate::config::ClientConfig;
use crate::connector::EngineConnector;
use crate::docker::{split_image_reference, EngineBridge};
use crate::error::{ProvisionError, Result};
use crate::handle::ContainerHandle;
use crate::ports::tcp_key;
use crate::readiness::ReadinessWaiter;
use crate::request::{ContainerSpecBuilder, SpecCustomizer};
use bollard::container::{Config, StartContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::models::ContainerInspectResponse;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct ContainerOrchestrator {
    connector: EngineConnector,
    spec_builder: ContainerSpecBuilder,
    cancel: CancellationToken,
}

impl ContainerOrchestrator {
    pub fn new() -> Self {
        Self::with_connector(EngineConnector::from_environment())
    }

    pub fn with_connector(connector: EngineConnector) -> Self {
        Self {
            connector,
            spec_builder: ContainerSpecBuilder::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Hook run on every creation request after it has been assembled.
    pub fn with_customizer(
        mut self,
        customizer: impl Fn(&mut Config<String>) + Send + Sync + 'static,
    ) -> Self {
        let customizer: SpecCustomizer = Arc::new(customizer);
        self.spec_builder = self.spec_builder.with_customizer(customizer);
        self
    }

    /// Token that interrupts the readiness wait when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn provision(&self, config: &ClientConfig) -> Result<ContainerHandle> {
        config.validate().map_err(ProvisionError::InvalidConfig)?;

        let spec = self.spec_builder.build(config);
        let client = self.connector.connect(config)?;
        let engine = client.bridge();

        ensure_image(engine, &config.image_name, config.pull_always).await?;

        let container_id = engine
            .create_container(None, spec)
            .await
            .map_err(ProvisionError::engine("create"))?
            .id;
        info!(
            container_id = %container_id,
            image = %config.image_name,
            "Container created"
        );

        engine
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(ProvisionError::engine("start"))?;
        info!(container_id = %container_id, "Container started");

        if let Some(pattern) = config.ready_pattern() {
            ReadinessWaiter::new(engine)
                .with_cancellation(self.cancel.clone())
                .with_timeout(config.ready_timeout_duration())
                .wait_for(&container_id, pattern)
                .await?;
        }

        let info = engine
            .inspect_container(&container_id, None)
            .await
            .map_err(ProvisionError::engine("inspect_container"))?;
        let host_ports = resolve_host_ports(&info, &config.transient_ports)?;

        info!(
            container_id = %container_id,
            engine_host = %client.host(),
            host_ports = ?host_ports,
            "Container provisioned"
        );

        Ok(ContainerHandle {
            container_id,
            info,
            host_ports,
            engine_host: client.host().to_string(),
            client,
            provisioned_at: Utc::now(),
        })
    }
}

impl Default for ContainerOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Provisions `config` using the engine found in the process environment.
pub async fn provision(config: &ClientConfig) -> Result<ContainerHandle> {
    ContainerOrchestrator::new().provision(config).await
}

/// Pulls when forced or when the image is not available locally.
async fn ensure_image(engine: &dyn EngineBridge, image: &str, pull_always: bool) -> Result<()> {
    if !pull_always {
        match engine.inspect_image(image).await {
            Ok(_) => {
                debug!(image = %image, "Image present locally");
                return Ok(());
            }
            Err(e) => debug!(image = %image, error = %e, "Image not available locally"),
        }
    }
    pull_image(engine, image).await
}

async fn pull_image(engine: &dyn EngineBridge, image: &str) -> Result<()> {
    info!(image = %image, "Pulling image");

    let (from_image, tag) = split_image_reference(image);
    let options = CreateImageOptions {
        from_image: from_image.to_string(),
        tag: tag.to_string(),
        ..Default::default()
    };

    let mut stream = engine.create_image_stream(Some(options));
    while let Some(result) = stream.next().await {
        let progress = result.map_err(ProvisionError::engine("pull"))?;
        if let Some(status) = progress.status {
            debug!(status = %status, "Pull progress");
        }
    }

    info!(image = %image, "Image pulled");
    Ok(())
}

/// Host port bound to each transient port, read from the post-start inspection.
fn resolve_host_ports(
    info: &ContainerInspectResponse,
    transient_ports: &[u16],
) -> Result<HashMap<u16, u16>> {
    let ports = info
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref());

    transient_ports
        .iter()
        .map(|&port| -> Result<(u16, u16)> {
            let host_port = ports
                .and_then(|ports| ports.get(&tcp_key(port)))
                .and_then(|bindings| bindings.as_ref())
                .and_then(|bindings| bindings.first())
                .and_then(|binding| binding.host_port.as_deref())
                .ok_or(ProvisionError::MissingHostPort { port })?;
            let host_port = host_port
                .parse()
                .map_err(|_| ProvisionError::InvalidHostPort {
                    port,
                    value: host_port.to_string(),
                })?;
            Ok((port, host_port))
        })
        .collect()
}
