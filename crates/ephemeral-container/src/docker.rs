//! Docker engine bridge
//!
//! [`EngineBridge`] is the narrow slice of the engine API the provisioner needs.
//! [`BollardBridge`] implements it over a `bollard::Docker` client; tests swap in
//! a recording fake.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerCreateResponse, ContainerInspectResponse, CreateImageInfo, ImageInspect};
use bollard::Docker;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

pub type ImageStream = Pin<Box<dyn Stream<Item = Result<CreateImageInfo, DockerError>> + Send>>;
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogOutput, DockerError>> + Send>>;

#[async_trait]
pub trait EngineBridge: Send + Sync {
    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream;
    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError>;
    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError>;
    async fn start_container(
        &self,
        id: &str,
        options: Option<StartContainerOptions<String>>,
    ) -> Result<(), DockerError>;
    async fn inspect_container(
        &self,
        id: &str,
        options: Option<InspectContainerOptions>,
    ) -> Result<ContainerInspectResponse, DockerError>;
    fn logs_stream(&self, id: &str, options: LogsOptions<String>) -> LogStream;
    async fn stop_container(
        &self,
        id: &str,
        options: Option<StopContainerOptions>,
    ) -> Result<(), DockerError>;
    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError>;
}

#[derive(Clone)]
pub struct BollardBridge {
    docker: Docker,
}

impl BollardBridge {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// The wrapped client, for engine calls outside the bridge.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl EngineBridge for BollardBridge {
    /// Image pull progress; the pull is finished once the stream ends.
    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream {
        Box::pin(self.docker.create_image(options, None, None))
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError> {
        self.docker.inspect_image(image).await
    }

    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.docker.create_container(options, config).await
    }

    async fn start_container(
        &self,
        id: &str,
        options: Option<StartContainerOptions<String>>,
    ) -> Result<(), DockerError> {
        self.docker.start_container(id, options).await
    }

    async fn inspect_container(
        &self,
        id: &str,
        options: Option<InspectContainerOptions>,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.docker.inspect_container(id, options).await
    }

    /// Streams stdout and stderr frames in emission order. With `follow` set the
    /// stream stays open until the container stops.
    fn logs_stream(&self, id: &str, options: LogsOptions<String>) -> LogStream {
        Box::pin(self.docker.logs(id, Some(options)))
    }

    async fn stop_container(
        &self,
        id: &str,
        options: Option<StopContainerOptions>,
    ) -> Result<(), DockerError> {
        self.docker.stop_container(id, options).await
    }

    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError> {
        self.docker.remove_container(id, options).await
    }
}

/// A connected engine plus the host address its published ports are reachable on.
#[derive(Clone)]
pub struct EngineClient {
    bridge: Arc<dyn EngineBridge>,
    host: String,
}

impl EngineClient {
    pub fn new(bridge: Arc<dyn EngineBridge>, host: impl Into<String>) -> Self {
        Self {
            bridge,
            host: host.into(),
        }
    }

    pub fn from_docker(docker: Docker, host: impl Into<String>) -> Self {
        Self::new(Arc::new(BollardBridge::new(docker)), host)
    }

    pub fn bridge(&self) -> &dyn EngineBridge {
        &*self.bridge
    }

    pub fn shared_bridge(&self) -> Arc<dyn EngineBridge> {
        self.bridge.clone()
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Splits an image reference into the `fromImage`/`tag` pair the pull API
/// expects. An untagged reference means `latest`; digests pass through whole.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |slash| slash + 1);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let split = name_start + colon;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}
