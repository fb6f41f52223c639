//! Caller-facing description of the container to provision

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote engine used when no local engine is configured (docker-machine default VM).
pub const DEFAULT_MACHINE_URL: &str = "https://192.168.99.100:2376";

/// A single `NAME=VALUE` entry passed to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVar {
    pub name: String,
    pub value: String,
}

impl EnvironmentVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn to_assignment(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Container port bound to a fixed host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedPort {
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to provision one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub image_name: String,
    #[serde(default)]
    pub env_vars: Vec<EnvironmentVar>,
    /// Space separated; no quoting rules apply.
    #[serde(default)]
    pub arguments: Option<String>,
    /// Container ports whose host port is picked at provisioning time.
    #[serde(default)]
    pub transient_ports: Vec<u16>,
    #[serde(default)]
    pub mapped_ports: Vec<MappedPort>,
    #[serde(default)]
    pub wait_for_log_line: Option<String>,
    #[serde(default)]
    pub pull_always: bool,
    #[serde(default)]
    pub docker_machine_url: Option<String>,
    /// Upper bound on the readiness wait. Unbounded when absent.
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
}

impl ClientConfig {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            ..Default::default()
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push(EnvironmentVar::new(name, value));
        self
    }

    pub fn arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    pub fn transient_port(mut self, port: u16) -> Self {
        self.transient_ports.push(port);
        self
    }

    pub fn mapped_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.mapped_ports.push(MappedPort {
            host_port,
            container_port,
        });
        self
    }

    pub fn wait_for_log_line(mut self, line: impl Into<String>) -> Self {
        self.wait_for_log_line = Some(line.into());
        self
    }

    pub fn pull_always(mut self, pull_always: bool) -> Self {
        self.pull_always = pull_always;
        self
    }

    pub fn docker_machine_url(mut self, url: impl Into<String>) -> Self {
        self.docker_machine_url = Some(url.into());
        self
    }

    /// Bounds the readiness wait. Stored in whole seconds, rounded up.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.ready_timeout_secs = Some(timeout.as_secs().saturating_add(partial));
        self
    }

    /// Argument string split on single spaces, if one was given.
    pub fn command(&self) -> Option<Vec<String>> {
        self.arguments
            .as_deref()
            .filter(|args| !args.is_empty())
            .map(|args| args.split(' ').map(str::to_string).collect())
    }

    /// The readiness substring, treating an empty string as absent.
    pub fn ready_pattern(&self) -> Option<&str> {
        self.wait_for_log_line
            .as_deref()
            .filter(|line| !line.is_empty())
    }

    pub fn ready_timeout_duration(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn machine_url(&self) -> &str {
        self.docker_machine_url
            .as_deref()
            .unwrap_or(DEFAULT_MACHINE_URL)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.image_name.trim().is_empty() {
            return Err("image name cannot be empty".to_string());
        }
        if self.image_name.chars().any(char::is_whitespace) {
            return Err(format!(
                "image name '{}' contains whitespace",
                self.image_name
            ));
        }
        if let Some(var) = self
            .env_vars
            .iter()
            .find(|var| var.name.is_empty() || var.name.contains('='))
        {
            return Err(format!("invalid environment variable name '{}'", var.name));
        }
        if self.transient_ports.contains(&0) {
            return Err("transient port 0 is not a valid container port".to_string());
        }
        if let Some(mapped) = self
            .mapped_ports
            .iter()
            .find(|m| m.host_port == 0 || m.container_port == 0)
        {
            return Err(format!(
                "mapped port {}:{} must use non-zero ports",
                mapped.host_port, mapped.container_port
            ));
        }
        if self.ready_timeout_secs == Some(0) {
            return Err("ready timeout must be at least one second".to_string());
        }
        Ok(())
    }
}
