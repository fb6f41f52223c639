//! Container creation request assembly

use crate::config::ClientConfig;
use crate::ports::{tcp_key, PortAllocator};
use bollard::container::Config;
use bollard::models::HostConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// Caller hook applied to the finished request, for engine features the
/// config does not model (volumes, labels, resource limits, ...).
pub type SpecCustomizer = Arc<dyn Fn(&mut Config<String>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ContainerSpecBuilder {
    allocator: PortAllocator,
    customizer: Option<SpecCustomizer>,
}

impl ContainerSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customizer(mut self, customizer: SpecCustomizer) -> Self {
        self.customizer = Some(customizer);
        self
    }

    /// Builds the creation request. Transient host ports are drawn here, so
    /// every call yields fresh random bindings.
    pub fn build(&self, config: &ClientConfig) -> Config<String> {
        let host_config = HostConfig {
            port_bindings: Some(
                self.allocator
                    .bindings(&config.transient_ports, &config.mapped_ports),
            ),
            ..Default::default()
        };

        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .transient_ports
            .iter()
            .copied()
            .chain(config.mapped_ports.iter().map(|m| m.container_port))
            .map(|port| (tcp_key(port), HashMap::new()))
            .collect();

        let mut spec = Config {
            image: Some(config.image_name.clone()),
            env: Some(
                config
                    .env_vars
                    .iter()
                    .map(|var| var.to_assignment())
                    .collect(),
            ),
            cmd: config.command(),
            exposed_ports: Some(exposed_ports),
            network_disabled: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        if let Some(customize) = &self.customizer {
            customize(&mut spec);
        }

        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::HOST_PORT_RANGE;

    fn host_ports(spec: &Config<String>, key: &str) -> Vec<String> {
        spec.host_config
            .as_ref()
            .and_then(|hc| hc.port_bindings.as_ref())
            .and_then(|pb| pb.get(key).cloned().flatten())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| b.host_port)
            .collect()
    }

    #[test]
    fn test_env_serialized_in_order() {
        let config = ClientConfig::new("postgres:16")
            .env("POSTGRES_USER", "app")
            .env("POSTGRES_PASSWORD", "a=b")
            .env("PGDATA", "/data");

        let spec = ContainerSpecBuilder::new().build(&config);
        assert_eq!(
            spec.env.unwrap(),
            vec![
                "POSTGRES_USER=app".to_string(),
                "POSTGRES_PASSWORD=a=b".to_string(),
                "PGDATA=/data".to_string(),
            ]
        );
        assert_eq!(spec.image.as_deref(), Some("postgres:16"));
    }

    #[test]
    fn test_exposed_ports_collapse_duplicates() {
        let config = ClientConfig::new("nginx")
            .transient_port(80)
            .transient_port(443)
            .transient_port(80);

        let spec = ContainerSpecBuilder::new().build(&config);
        let mut exposed: Vec<_> = spec.exposed_ports.unwrap().into_keys().collect();
        exposed.sort();
        assert_eq!(exposed, vec!["443/tcp".to_string(), "80/tcp".to_string()]);
    }

    #[test]
    fn test_command_from_arguments() {
        let spec = ContainerSpecBuilder::new()
            .build(&ClientConfig::new("alpine").arguments("run --flag value"));
        assert_eq!(
            spec.cmd,
            Some(vec![
                "run".to_string(),
                "--flag".to_string(),
                "value".to_string()
            ])
        );

        let spec = ContainerSpecBuilder::new().build(&ClientConfig::new("alpine"));
        assert!(spec.cmd.is_none());
    }

    #[test]
    fn test_networking_always_enabled() {
        let spec = ContainerSpecBuilder::new().build(&ClientConfig::new("alpine"));
        assert_eq!(spec.network_disabled, Some(false));
    }

    #[test]
    fn test_bindings_cover_transient_and_mapped_ports() {
        let config = ClientConfig::new("redis")
            .transient_port(6379)
            .mapped_port(18080, 8080);

        let spec = ContainerSpecBuilder::new().build(&config);

        let transient = host_ports(&spec, "6379/tcp");
        assert_eq!(transient.len(), 1);
        let port: u16 = transient[0].parse().unwrap();
        assert!(HOST_PORT_RANGE.contains(&port));

        assert_eq!(host_ports(&spec, "8080/tcp"), vec!["18080".to_string()]);
        assert!(spec.exposed_ports.unwrap().contains_key("8080/tcp"));
    }

    #[test]
    fn test_customizer_runs_last() {
        let builder = ContainerSpecBuilder::new().with_customizer(Arc::new(|spec| {
            spec.network_disabled = Some(true);
            spec.labels = Some(HashMap::from([(
                "owner".to_string(),
                "integration-tests".to_string(),
            )]));
        }));

        let spec = builder.build(&ClientConfig::new("alpine"));
        assert_eq!(spec.network_disabled, Some(true));
        assert_eq!(
            spec.labels.unwrap().get("owner").map(String::as_str),
            Some("integration-tests")
        );
    }
}
