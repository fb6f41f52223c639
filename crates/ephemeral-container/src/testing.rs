//! Recording fake engine shared by the unit tests

use crate::docker::{EngineBridge, ImageStream, LogStream};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, CreateImageInfo, ImageInspect,
    NetworkSettings, PortBinding,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CONTAINER_ID: &str = "c0ffee";

pub fn server_error(message: &str) -> DockerError {
    DockerError::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    }
}

pub fn not_found(message: &str) -> DockerError {
    DockerError::DockerResponseServerError {
        status_code: 404,
        message: message.to_string(),
    }
}

#[derive(Clone, Default)]
pub struct RecordingEngine {
    inner: Arc<RecordingEngineInner>,
}

#[derive(Default)]
struct RecordingEngineInner {
    calls: Mutex<Vec<String>>,
    image_present: Mutex<bool>,
    pull_error: Mutex<Option<String>>,
    create_error: Mutex<Option<String>>,
    start_error: Mutex<Option<String>>,
    created: Mutex<Vec<Config<String>>>,
    pulled: Mutex<Vec<(String, String)>>,
    host_ports: Mutex<HashMap<String, Option<Vec<PortBinding>>>>,
    log_frames: Mutex<Option<Vec<Vec<u8>>>>,
    log_error: Mutex<Option<String>>,
    frames_consumed: Arc<AtomicUsize>,
}

impl RecordingEngine {
    pub fn with_local_image() -> Self {
        let engine = Self::default();
        *engine.inner.image_present.lock().unwrap() = true;
        engine
    }

    /// Host port the engine reports for `container_port` after start.
    pub fn report_host_port(&self, container_port: u16, host_port: &str) {
        self.inner.host_ports.lock().unwrap().insert(
            format!("{container_port}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );
    }

    /// Frames yielded by the log stream, in order. Without frames the stream
    /// stays pending forever.
    pub fn set_log_frames(&self, frames: &[&str]) {
        *self.inner.log_frames.lock().unwrap() =
            Some(frames.iter().map(|f| f.as_bytes().to_vec()).collect());
    }

    pub fn set_raw_log_frames(&self, frames: Vec<Vec<u8>>) {
        *self.inner.log_frames.lock().unwrap() = Some(frames);
    }

    pub fn fail_logs(&self, message: &str) {
        *self.inner.log_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_pull(&self, message: &str) {
        *self.inner.pull_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_create(&self, message: &str) {
        *self.inner.create_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_start(&self, message: &str) {
        *self.inner.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(operation))
            .count()
    }

    pub fn created(&self) -> Vec<Config<String>> {
        self.inner.created.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<(String, String)> {
        self.inner.pulled.lock().unwrap().clone()
    }

    pub fn frames_consumed(&self) -> usize {
        self.inner.frames_consumed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EngineBridge for RecordingEngine {
    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream {
        let options = options.unwrap_or_default();
        self.record(format!("pull:{}:{}", options.from_image, options.tag));
        self.inner
            .pulled
            .lock()
            .unwrap()
            .push((options.from_image, options.tag));

        let failure = self.inner.pull_error.lock().unwrap().clone();
        match failure {
            Some(message) => futures::stream::iter(vec![
                Ok(CreateImageInfo {
                    status: Some("Pulling fs layer".to_string()),
                    ..Default::default()
                }),
                Err(not_found(&message)),
            ])
            .boxed(),
            None => {
                *self.inner.image_present.lock().unwrap() = true;
                futures::stream::iter(vec![Ok(CreateImageInfo {
                    status: Some("Download complete".to_string()),
                    ..Default::default()
                })])
                .boxed()
            }
        }
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError> {
        self.record(format!("inspect_image:{image}"));
        if *self.inner.image_present.lock().unwrap() {
            Ok(ImageInspect {
                id: Some(format!("sha256:{image}")),
                ..Default::default()
            })
        } else {
            Err(not_found("No such image"))
        }
    }

    async fn create_container(
        &self,
        _options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.record("create".to_string());
        if let Some(message) = self.inner.create_error.lock().unwrap().clone() {
            return Err(server_error(&message));
        }
        self.inner.created.lock().unwrap().push(config);
        Ok(ContainerCreateResponse {
            id: CONTAINER_ID.to_string(),
            warnings: vec![],
        })
    }

    async fn start_container(
        &self,
        id: &str,
        _options: Option<StartContainerOptions<String>>,
    ) -> Result<(), DockerError> {
        self.record(format!("start:{id}"));
        match self.inner.start_error.lock().unwrap().clone() {
            Some(message) => Err(server_error(&message)),
            None => Ok(()),
        }
    }

    async fn inspect_container(
        &self,
        id: &str,
        _options: Option<InspectContainerOptions>,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.record(format!("inspect_container:{id}"));
        Ok(ContainerInspectResponse {
            id: Some(id.to_string()),
            network_settings: Some(NetworkSettings {
                ports: Some(self.inner.host_ports.lock().unwrap().clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn logs_stream(&self, id: &str, options: LogsOptions<String>) -> LogStream {
        self.record(format!(
            "logs:{id}:follow={}:stdout={}:stderr={}",
            options.follow, options.stdout, options.stderr
        ));

        if let Some(message) = self.inner.log_error.lock().unwrap().clone() {
            return futures::stream::iter(vec![Err(server_error(&message))]).boxed();
        }

        let frames = self.inner.log_frames.lock().unwrap().clone();
        let Some(frames) = frames else {
            return futures::stream::pending().boxed();
        };

        let consumed = self.inner.frames_consumed.clone();
        futures::stream::iter(frames)
            .map(move |frame| {
                consumed.fetch_add(1, Ordering::SeqCst);
                Ok(LogOutput::StdOut {
                    message: frame.into(),
                })
            })
            .boxed()
    }

    async fn stop_container(
        &self,
        id: &str,
        options: Option<StopContainerOptions>,
    ) -> Result<(), DockerError> {
        let grace = options.map_or(-1, |o| o.t);
        self.record(format!("stop:{id}:t={grace}"));
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError> {
        let options = options.unwrap_or_default();
        self.record(format!("remove:{id}:force={}:v={}", options.force, options.v));
        Ok(())
    }
}
