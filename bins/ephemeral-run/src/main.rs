//! Ephemeral Run
//!
//! Starts one throwaway container and prints where its ports landed as JSON.
//! The container keeps running after exit.

use anyhow::{Context, Result};
use clap::Parser;
use ephemeral_container::{
    ClientConfig, ContainerHandle, ContainerOrchestrator, EnvironmentVar, MappedPort,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ==================== CLI ====================

#[derive(Parser, Debug)]
#[command(name = "ephemeral-run")]
#[command(about = "Start one throwaway container and report its endpoints")]
struct Args {
    /// Image to run (overrides the config file)
    #[arg(short, long, env = "EPHEMERAL_IMAGE")]
    image: Option<String>,

    /// JSON client configuration used as the base; flags are applied on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment variable, repeatable
    #[arg(short, long = "env", value_name = "NAME=VALUE", value_parser = parse_env_var)]
    env: Vec<EnvironmentVar>,

    /// Container arguments, split on spaces
    #[arg(long, allow_hyphen_values = true)]
    args: Option<String>,

    /// Container port published on a random host port, repeatable
    #[arg(short = 'p', long = "transient-port", value_name = "PORT")]
    transient_ports: Vec<u16>,

    /// Container port published on a fixed host port, repeatable
    #[arg(short = 'm', long = "map", value_name = "HOST:CONTAINER", value_parser = parse_mapped_port)]
    mapped_ports: Vec<MappedPort>,

    /// Log line that marks the container as ready
    #[arg(short, long)]
    wait_for: Option<String>,

    #[arg(long)]
    pull_always: bool,

    /// Remote engine used when no local engine is reachable
    #[arg(long, env = "DOCKER_MACHINE_URL")]
    machine_url: Option<String>,

    #[arg(long)]
    ready_timeout_secs: Option<u64>,
}

fn parse_env_var(raw: &str) -> Result<EnvironmentVar, String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(EnvironmentVar::new(name, value)),
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}

fn parse_mapped_port(raw: &str) -> Result<MappedPort, String> {
    let (host, container) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected HOST:CONTAINER, got `{raw}`"))?;
    let port = |value: &str| {
        value
            .parse::<u16>()
            .map_err(|e| format!("invalid port `{value}`: {e}"))
    };
    Ok(MappedPort {
        host_port: port(host)?,
        container_port: port(container)?,
    })
}

/// Config file (if any) with command-line flags layered on top.
fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut config: ClientConfig = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    if let Some(image) = &args.image {
        config.image_name = image.clone();
    }
    config.env_vars.extend(args.env.iter().cloned());
    if args.args.is_some() {
        config.arguments = args.args.clone();
    }
    config.transient_ports.extend(&args.transient_ports);
    config.mapped_ports.extend(&args.mapped_ports);
    if args.wait_for.is_some() {
        config.wait_for_log_line = args.wait_for.clone();
    }
    config.pull_always |= args.pull_always;
    if args.machine_url.is_some() {
        config.docker_machine_url = args.machine_url.clone();
    }
    if args.ready_timeout_secs.is_some() {
        config.ready_timeout_secs = args.ready_timeout_secs;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

// ==================== Output ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    container_id: &'a str,
    image: &'a str,
    engine_host: &'a str,
    host_ports: BTreeMap<u16, u16>,
    endpoints: BTreeMap<u16, String>,
    mapped_ports: &'a [MappedPort],
    provisioned_at: String,
}

impl<'a> Summary<'a> {
    fn new(handle: &'a ContainerHandle, config: &'a ClientConfig) -> Self {
        let host_ports: BTreeMap<u16, u16> =
            handle.host_ports.iter().map(|(&c, &h)| (c, h)).collect();
        let endpoints = host_ports
            .keys()
            .filter_map(|&port| handle.endpoint(port).map(|endpoint| (port, endpoint)))
            .collect();
        Self {
            container_id: &handle.container_id,
            image: &config.image_name,
            engine_host: &handle.engine_host,
            host_ports,
            endpoints,
            mapped_ports: &config.mapped_ports,
            provisioned_at: handle.provisioned_at.to_rfc3339(),
        }
    }
}

// ==================== Main ====================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ephemeral_container=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = client_config(&args)?;

    info!(image = %config.image_name, "Provisioning container");

    let cancel = CancellationToken::new();
    let orchestrator = ContainerOrchestrator::new().with_cancellation(cancel.clone());
    let provisioning = orchestrator.provision(&config);
    tokio::pin!(provisioning);

    let result = tokio::select! {
        result = &mut provisioning => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling provisioning");
            cancel.cancel();
            provisioning.await
        }
    };

    let handle = match result {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(container_id) = e.started_container() {
                warn!(container_id = %container_id, "Started container left running");
            }
            return Err(e.into());
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&Summary::new(&handle, &config))?
    );
    Ok(())
}
