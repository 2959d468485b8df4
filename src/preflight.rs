//! Checks that must pass before a deploy mutates anything.

use std::fmt;
use std::net::ToSocketAddrs;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConnectivityConfig;
use crate::util::exec::{CommandRunner, ExecError, ExecRequest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreflightFailure {
    #[error("{program} is not installed or not on PATH")]
    BinaryMissing { program: String },
    #[error("{program} is installed but not working: {detail}")]
    BinaryBroken { program: String, detail: String },
    #[error("docker compose is not available: {detail}")]
    ComposeMissing { detail: String },
}

impl PreflightFailure {
    pub fn remediation(&self) -> &'static str {
        match self {
            PreflightFailure::BinaryMissing { .. } => {
                "Install Docker and make sure `docker` is on PATH (or set STACKYARD_DOCKER)."
            }
            PreflightFailure::BinaryBroken { .. } => {
                "Check that the docker daemon is running and reachable from this user."
            }
            PreflightFailure::ComposeMissing { .. } => {
                "Install the docker compose v2 plugin so that `docker compose version` works."
            }
        }
    }
}

/// Which probe proved the host can reach the internet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityMethod {
    Http(String),
    Dns,
    Ping,
    ImagePull,
}

impl fmt::Display for ConnectivityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityMethod::Http(url) => write!(f, "http ({url})"),
            ConnectivityMethod::Dns => f.write_str("dns"),
            ConnectivityMethod::Ping => f.write_str("ping"),
            ConnectivityMethod::ImagePull => f.write_str("docker pull"),
        }
    }
}

/// Internet reachability, `None` when every probe failed.
pub trait Reachability: Send + Sync {
    fn probe(&self) -> Option<ConnectivityMethod>;
}

/// HTTP HEAD, then DNS, then ping, then an image pull; the first success wins.
pub struct NetworkReachability {
    cfg: ConnectivityConfig,
    docker: String,
    runner: Arc<dyn CommandRunner>,
}

impl NetworkReachability {
    pub fn new(cfg: ConnectivityConfig, docker: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cfg,
            docker: docker.into(),
            runner,
        }
    }

    fn http(&self) -> Option<ConnectivityMethod> {
        let client = match reqwest::blocking::Client::builder()
            .timeout(self.cfg.http_timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "http client unavailable");
                return None;
            }
        };
        for url in &self.cfg.http_endpoints {
            match client.head(url).send() {
                Ok(_) => return Some(ConnectivityMethod::Http(url.clone())),
                Err(e) => tracing::debug!(url = %url, error = %e, "http probe failed"),
            }
        }
        None
    }

    fn dns(&self) -> bool {
        let host = self.cfg.dns_host.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let ok = (host.as_str(), 443)
                .to_socket_addrs()
                .map(|mut addrs| addrs.next().is_some())
                .unwrap_or(false);
            let _ = tx.send(ok);
        });
        rx.recv_timeout(self.cfg.probe_timeout).unwrap_or(false)
    }

    fn command_ok(&self, req: ExecRequest) -> bool {
        let line = req.command_line();
        match self.runner.run(req) {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(cmd = %line, error = %e, "connectivity probe failed");
                false
            }
        }
    }

    fn ping(&self) -> bool {
        let wait = self.cfg.probe_timeout.as_secs().max(1).to_string();
        self.command_ok(
            ExecRequest::new("ping")
                .args(["-c", "1", "-W"])
                .arg(wait)
                .arg(&self.cfg.ping_host)
                .timeout(self.cfg.probe_timeout),
        )
    }

    fn image_pull(&self) -> bool {
        self.command_ok(
            ExecRequest::new(&self.docker)
                .arg("pull")
                .arg(&self.cfg.probe_image)
                .timeout(self.cfg.probe_image_timeout),
        )
    }
}

impl Reachability for NetworkReachability {
    fn probe(&self) -> Option<ConnectivityMethod> {
        if let Some(m) = self.http() {
            return Some(m);
        }
        if self.dns() {
            return Some(ConnectivityMethod::Dns);
        }
        if self.ping() {
            return Some(ConnectivityMethod::Ping);
        }
        if self.image_pull() {
            return Some(ConnectivityMethod::ImagePull);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub docker_version: String,
    pub compose_version: String,
    pub connectivity: Option<ConnectivityMethod>,
}

impl PreflightReport {
    pub fn online(&self) -> bool {
        self.connectivity.is_some()
    }
}

fn version_of(
    runner: &dyn CommandRunner,
    req: ExecRequest,
    program: &str,
) -> Result<String, (bool, String)> {
    match runner.run(req) {
        Ok(out) if out.success() => Ok(out.stdout.trim().to_string()),
        Ok(out) => Err((false, out.failure_text())),
        Err(ExecError::NotFound { .. }) => Err((true, format!("{program}: command not found"))),
        Err(e) => Err((false, e.to_string())),
    }
}

/// Verify docker and compose respond, then probe connectivity.
pub fn run_preflight(
    runner: &dyn CommandRunner,
    docker: &str,
    timeout: Duration,
    reach: &dyn Reachability,
) -> Result<PreflightReport, PreflightFailure> {
    let docker_version = version_of(
        runner,
        ExecRequest::new(docker).arg("--version").timeout(timeout),
        docker,
    )
    .map_err(|(missing, detail)| {
        if missing {
            PreflightFailure::BinaryMissing {
                program: docker.to_string(),
            }
        } else {
            PreflightFailure::BinaryBroken {
                program: docker.to_string(),
                detail,
            }
        }
    })?;

    let compose_version = version_of(
        runner,
        ExecRequest::new(docker)
            .args(["compose", "version"])
            .timeout(timeout),
        docker,
    )
    .map_err(|(_, detail)| PreflightFailure::ComposeMissing { detail })?;

    let connectivity = reach.probe();
    match &connectivity {
        Some(m) => tracing::info!(method = %m, "internet connectivity confirmed"),
        None => tracing::warn!("no internet connectivity detected; image pull will be skipped"),
    }

    Ok(PreflightReport {
        docker_version,
        compose_version,
        connectivity,
    })
}
