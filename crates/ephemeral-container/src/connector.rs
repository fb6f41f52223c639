//! Engine connection selection
//!
//! Candidates are tried in order and the first one that yields a client wins.
//! A failing candidate is logged and the next one is tried, so a broken local
//! setup still falls through to the remote machine endpoint.
//!
//! Default order:
//! 1. [`AmbientEnvironment`] - only on Unix-like hosts or when `DOCKER_HOST` is
//!    set. Uses `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`,
//!    otherwise the platform-local socket.
//! 2. [`MachineCertificates`] - the configured remote URL (or
//!    [`DEFAULT_MACHINE_URL`](crate::config::DEFAULT_MACHINE_URL)) with client
//!    certificates from `~/.docker/machine/certs` when they load, plain HTTP
//!    when they don't.

use crate::config::ClientConfig;
use crate::docker::EngineClient;
use crate::error::{ProvisionError, Result};
use bollard::errors::Error as DockerError;
use bollard::{Docker, API_DEFAULT_VERSION};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
pub const DOCKER_TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";
pub const DOCKER_CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";

/// Request timeout handed to every client, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const DOCKER_CONFIG_DIR: &str = ".docker";
const MACHINE_CERTS_DIR: &str = ".docker/machine/certs";
const LOCAL_HOST: &str = "localhost";

/// Environment signals that drive candidate selection, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEnvironment {
    pub unix: bool,
    pub docker_host: Option<String>,
    pub tls_verify: bool,
    pub cert_path: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
}

impl EngineEnvironment {
    pub fn from_process() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            unix: cfg!(unix),
            docker_host: var(DOCKER_HOST_ENV),
            tls_verify: var(DOCKER_TLS_VERIFY_ENV).is_some_and(|v| v != "0"),
            cert_path: var(DOCKER_CERT_PATH_ENV).map(PathBuf::from),
            home_dir: dirs::home_dir(),
        }
    }

    /// Whether the ambient (environment-configured) engine should be tried.
    pub fn prefers_ambient(&self) -> bool {
        self.unix || self.docker_host.is_some()
    }

    fn ambient_cert_dir(&self) -> Option<PathBuf> {
        self.cert_path
            .clone()
            .or_else(|| self.home_dir.as_ref().map(|home| home.join(DOCKER_CONFIG_DIR)))
    }

    fn machine_cert_dir(&self) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|home| home.join(MACHINE_CERTS_DIR))
    }
}

/// Paths of a validated TLS client certificate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSet {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertificateSet {
    /// Loads `ca.pem`, `cert.pem` and `key.pem` from `dir`; each must hold PEM data.
    pub fn load(dir: &Path) -> Result<Self> {
        let set = Self {
            ca: dir.join("ca.pem"),
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        };
        for path in [&set.ca, &set.cert, &set.key] {
            let contents = std::fs::read(path).map_err(|e| ProvisionError::Certificates {
                path: dir.to_path_buf(),
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
            if !contents.windows(11).any(|w| w == b"-----BEGIN ") {
                return Err(ProvisionError::Certificates {
                    path: dir.to_path_buf(),
                    reason: format!("{} holds no PEM data", path.display()),
                });
            }
        }
        Ok(set)
    }
}

/// One way of reaching an engine.
pub trait ConnectorCandidate: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, _env: &EngineEnvironment) -> bool {
        true
    }

    fn connect(&self, env: &EngineEnvironment, config: &ClientConfig) -> Result<EngineClient>;
}

/// Engine configured through the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientEnvironment;

impl ConnectorCandidate for AmbientEnvironment {
    fn name(&self) -> &'static str {
        "ambient environment"
    }

    fn applies(&self, env: &EngineEnvironment) -> bool {
        env.prefers_ambient()
    }

    fn connect(&self, env: &EngineEnvironment, _config: &ClientConfig) -> Result<EngineClient> {
        let Some(host) = env.docker_host.as_deref().filter(|h| is_network_address(h)) else {
            let docker = Docker::connect_with_local_defaults().map_err(client_setup("local socket"))?;
            return Ok(EngineClient::from_docker(docker, LOCAL_HOST));
        };

        let address = tcp_address(host);
        let docker = if env.tls_verify {
            let dir = env
                .ambient_cert_dir()
                .ok_or_else(|| ProvisionError::Certificates {
                    path: PathBuf::from(DOCKER_CONFIG_DIR),
                    reason: "no home directory or DOCKER_CERT_PATH to locate certificates".into(),
                })?;
            let certs = CertificateSet::load(&dir)?;
            connect_tls(&address, &certs)
        } else {
            Docker::connect_with_http(&address, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        .map_err(client_setup(host))?;

        Ok(EngineClient::from_docker(docker, host_of(host)))
    }
}

/// Remote docker-machine style engine with per-user client certificates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineCertificates;

impl ConnectorCandidate for MachineCertificates {
    fn name(&self) -> &'static str {
        "machine certificates"
    }

    fn connect(&self, env: &EngineEnvironment, config: &ClientConfig) -> Result<EngineClient> {
        let certs = match env.machine_cert_dir() {
            Some(dir) => match CertificateSet::load(&dir) {
                Ok(certs) => Some(certs),
                Err(e) => {
                    warn!(error = %e, "Continuing without machine TLS certificates");
                    None
                }
            },
            None => {
                warn!("No home directory; continuing without machine TLS certificates");
                None
            }
        };

        let url = config.machine_url();
        let address = tcp_address(url);
        let docker = match &certs {
            Some(certs) => connect_tls(&address, certs),
            None => Docker::connect_with_http(&address, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(client_setup(url))?;

        debug!(url = %url, tls = certs.is_some(), "Built machine engine client");
        Ok(EngineClient::from_docker(docker, host_of(url)))
    }
}

/// Picks an engine client from an ordered list of candidates.
pub struct EngineConnector {
    environment: EngineEnvironment,
    candidates: Vec<Box<dyn ConnectorCandidate>>,
}

impl EngineConnector {
    pub fn new(environment: EngineEnvironment) -> Self {
        Self::with_candidates(
            environment,
            vec![Box::new(AmbientEnvironment), Box::new(MachineCertificates)],
        )
    }

    pub fn from_environment() -> Self {
        Self::new(EngineEnvironment::from_process())
    }

    pub fn with_candidates(
        environment: EngineEnvironment,
        candidates: Vec<Box<dyn ConnectorCandidate>>,
    ) -> Self {
        Self {
            environment,
            candidates,
        }
    }

    pub fn environment(&self) -> &EngineEnvironment {
        &self.environment
    }

    pub fn connect(&self, config: &ClientConfig) -> Result<EngineClient> {
        let mut attempts = Vec::new();

        for candidate in &self.candidates {
            if !candidate.applies(&self.environment) {
                debug!(candidate = candidate.name(), "Connector candidate does not apply");
                continue;
            }

            match candidate.connect(&self.environment, config) {
                Ok(client) => {
                    info!(
                        candidate = candidate.name(),
                        host = %client.host(),
                        "Connected to container engine"
                    );
                    return Ok(client);
                }
                Err(e) => {
                    warn!(
                        candidate = candidate.name(),
                        error = %e,
                        "Connector candidate failed, trying next"
                    );
                    attempts.push(format!("{}: {e}", candidate.name()));
                }
            }
        }

        Err(ProvisionError::Connection { attempts })
    }
}

impl Default for EngineConnector {
    fn default() -> Self {
        Self::from_environment()
    }
}

fn connect_tls(address: &str, certs: &CertificateSet) -> std::result::Result<Docker, DockerError> {
    Docker::connect_with_ssl(
        address,
        &certs.key,
        &certs.cert,
        &certs.ca,
        DEFAULT_TIMEOUT_SECS,
        API_DEFAULT_VERSION,
    )
}

fn client_setup(endpoint: &str) -> impl FnOnce(DockerError) -> ProvisionError + '_ {
    move |source| ProvisionError::ClientSetup {
        endpoint: endpoint.to_string(),
        source,
    }
}

fn is_network_address(address: &str) -> bool {
    ["tcp://", "http://", "https://"]
        .iter()
        .any(|scheme| address.starts_with(scheme))
}

/// `host:port` part of an engine URL.
fn authority(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// Engine URL rewritten to the `tcp://host:port` form bollard expects for
/// both plain and TLS clients.
fn tcp_address(url: &str) -> String {
    format!("tcp://{}", authority(url))
}

/// Host part of an engine URL, without scheme, port or path.
pub fn host_of(url: &str) -> String {
    let authority = authority(url);
    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed
            .split(']')
            .next()
            .unwrap_or(bracketed)
            .to_string();
    }
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host)
        .to_string()
}
