//! Host port selection for container port bindings
//!
//! Transient ports get a host port drawn uniformly from [`HOST_PORT_RANGE`].
//! The draw is best effort: nothing is reserved and no socket is opened, so two
//! concurrent provisions can pick the same host port. The engine then rejects
//! the second start and the caller sees the failure.

use crate::config::MappedPort;
use bollard::models::PortBinding;
use rand::Rng;
use std::collections::HashMap;
use std::ops::Range;

/// Host ports handed out to transient container ports.
pub const HOST_PORT_RANGE: Range<u16> = 15000..45000;

/// Host IP every binding listens on.
pub const BIND_ALL: &str = "0.0.0.0";

/// Engine port binding table, keyed by `"<container port>/tcp"`.
pub type PortBindings = HashMap<String, Option<Vec<PortBinding>>>;

pub fn tcp_key(container_port: u16) -> String {
    format!("{container_port}/tcp")
}

#[derive(Debug, Clone, Default)]
pub struct PortAllocator;

impl PortAllocator {
    pub fn new() -> Self {
        Self
    }

    /// One random host port in [`HOST_PORT_RANGE`].
    pub fn random_host_port(&self) -> u16 {
        rand::thread_rng().gen_range(HOST_PORT_RANGE)
    }

    /// Bindings for transient and mapped ports together. A container port that
    /// is both transient and mapped keeps both host bindings, random one first.
    pub fn bindings(&self, transient: &[u16], mapped: &[MappedPort]) -> PortBindings {
        let mut bindings = self.transient_bindings(transient);
        for port in mapped {
            add_binding(&mut bindings, port.container_port, port.host_port);
        }
        bindings
    }

    /// One random host port per distinct container port.
    pub fn transient_bindings(&self, ports: &[u16]) -> PortBindings {
        let mut bindings = PortBindings::new();
        for &port in ports {
            bindings
                .entry(tcp_key(port))
                .or_insert_with(|| Some(vec![port_binding(self.random_host_port())]));
        }
        bindings
    }

    /// One binding per distinct (host, container) pair; several host ports may
    /// target the same container port.
    pub fn mapped_bindings(&self, ports: &[MappedPort]) -> PortBindings {
        let mut bindings = PortBindings::new();
        for port in ports {
            add_binding(&mut bindings, port.container_port, port.host_port);
        }
        bindings
    }
}

fn add_binding(bindings: &mut PortBindings, container_port: u16, host_port: u16) {
    let list = bindings
        .entry(tcp_key(container_port))
        .or_default()
        .get_or_insert_with(Vec::new);
    let binding = port_binding(host_port);
    if !list.iter().any(|b| b.host_port == binding.host_port) {
        list.push(binding);
    }
}

fn port_binding(host_port: u16) -> PortBinding {
    PortBinding {
        host_ip: Some(BIND_ALL.to_string()),
        host_port: Some(host_port.to_string()),
    }
}
