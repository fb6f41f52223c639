//! Errors surfaced while provisioning a container

use bollard::errors::Error as DockerError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Every connector candidate failed to produce a client.
    #[error("no container engine connection could be established ({})", .attempts.join("; "))]
    Connection { attempts: Vec<String> },

    #[error("could not build an engine client for {endpoint}: {source}")]
    ClientSetup {
        endpoint: String,
        #[source]
        source: DockerError,
    },

    #[error("certificate material in {} is unusable: {reason}", .path.display())]
    Certificates { path: PathBuf, reason: String },

    /// An engine API call failed. Never retried.
    #[error("engine request `{operation}` failed: {source}")]
    EngineRequest {
        operation: &'static str,
        #[source]
        source: DockerError,
    },

    /// The container was started and is left running.
    #[error("readiness wait for `{pattern}` in container {container_id} was interrupted")]
    Interrupted {
        container_id: String,
        pattern: String,
    },

    /// The container was started and is left running.
    #[error("`{pattern}` did not appear in the logs of container {container_id} within {timeout:?}")]
    ReadinessTimeout {
        container_id: String,
        pattern: String,
        timeout: Duration,
    },

    #[error("engine reported no host binding for {port}/tcp")]
    MissingHostPort { port: u16 },

    #[error("engine reported host port `{value}` for {port}/tcp, which is not a port number")]
    InvalidHostPort { port: u16, value: String },

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ProvisionError {
    /// Container that was started before the failure, if any.
    pub fn started_container(&self) -> Option<&str> {
        match self {
            Self::Interrupted { container_id, .. } | Self::ReadinessTimeout { container_id, .. } => {
                Some(container_id)
            }
            _ => None,
        }
    }

    pub(crate) fn engine(operation: &'static str) -> impl FnOnce(DockerError) -> Self {
        move |source| Self::EngineRequest { operation, source }
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
