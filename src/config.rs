//! Console configuration: defaults, then an optional YAML file, then environment overrides.
//!
//! The resulting [`ConsoleConfig`] is immutable and passed by reference everywhere; nothing in
//! the crate mutates it after [`ConsoleConfig::load`] returns.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid host_url {value:?}: {reason}")]
    HostUrl { value: String, reason: String },
    #[error("invalid duration in {key}: {value:?}")]
    Duration { key: String, value: String },
    #[error("home directory not found; set STACKYARD_DATA_DIR")]
    NoHome,
}

fn duration_from_str<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

/// Subprocess deadlines per CLI verb.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    #[serde(deserialize_with = "duration_from_str")]
    pub query: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub pull: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub up: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub restart: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub stop: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub down: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub lock_wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(30),
            pull: Duration::from_secs(300),
            up: Duration::from_secs(300),
            restart: Duration::from_secs(120),
            stop: Duration::from_secs(120),
            down: Duration::from_secs(120),
            lock_wait: Duration::from_secs(600),
        }
    }
}

/// Layered internet reachability probes, tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectivityConfig {
    pub http_endpoints: Vec<String>,
    #[serde(deserialize_with = "duration_from_str")]
    pub http_timeout: Duration,
    pub dns_host: String,
    pub ping_host: String,
    #[serde(deserialize_with = "duration_from_str")]
    pub probe_timeout: Duration,
    pub probe_image: String,
    #[serde(deserialize_with = "duration_from_str")]
    pub probe_image_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            http_endpoints: vec![
                "https://www.google.com".to_string(),
                "https://1.1.1.1".to_string(),
                "https://8.8.8.8".to_string(),
            ],
            http_timeout: Duration::from_secs(10),
            dns_host: "google.com".to_string(),
            ping_host: "8.8.8.8".to_string(),
            probe_timeout: Duration::from_secs(10),
            probe_image: "alpine:latest".to_string(),
            probe_image_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    /// Root for per-stack directories, lock files and the JSON store.
    pub data_dir: PathBuf,
    /// Shared template checkout; its `docker/` subdirectory is copied per stack.
    pub template_dir: Option<PathBuf>,
    pub template_repo: String,
    /// Where the docker daemon sees `<data_dir>/stacks`; bind mounts are rewritten against it.
    pub host_projects_path: Option<PathBuf>,
    pub host_url: String,
    pub docker: String,
    /// Host meminfo file mounted into this process's container, preferred over local memory.
    pub host_meminfo: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub connectivity: ConnectivityConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".stackyard"),
            template_dir: None,
            template_repo: "https://github.com/supabase/supabase".to_string(),
            host_projects_path: None,
            host_url: "http://localhost".to_string(),
            docker: "docker".to_string(),
            host_meminfo: None,
            timeouts: Timeouts::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load from the process environment, reading `file` (or `STACKYARD_CONFIG`) when given.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let path = file
            .map(Path::to_path_buf)
            .or_else(|| non_empty(&vars, "STACKYARD_CONFIG").map(PathBuf::from));
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(&p)?,
            None => {
                let mut c = Self::default();
                c.data_dir = home::home_dir().ok_or(ConfigError::NoHome)?.join(".stackyard");
                c
            }
        };
        cfg.apply_env(&vars)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Apply environment overrides from an explicit variable map.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(v) = non_empty(vars, "STACKYARD_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty(vars, "STACKYARD_TEMPLATE_DIR") {
            self.template_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(vars, "SUPABASE_CORE_REPO_URL") {
            self.template_repo = v.to_string();
        }
        if let Some(v) = non_empty(vars, "HOST_PROJECT_PATH") {
            self.host_projects_path = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(vars, "HOST_URL") {
            self.host_url = v.to_string();
        }
        if let Some(v) = non_empty(vars, "STACKYARD_DOCKER") {
            self.docker = v.to_string();
        }
        if non_empty(vars, "USE_HOST_MEMORY") == Some("true") {
            let p = non_empty(vars, "STACKYARD_HOST_MEMINFO").unwrap_or("/host/meminfo");
            self.host_meminfo = Some(PathBuf::from(p));
        }
        if let Some(v) = non_empty(vars, "STACKYARD_LOCK_WAIT") {
            self.timeouts.lock_wait =
                humantime::parse_duration(v).map_err(|_| ConfigError::Duration {
                    key: "STACKYARD_LOCK_WAIT".to_string(),
                    value: v.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.host_url).map_err(|e| ConfigError::HostUrl {
            value: self.host_url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(ConfigError::HostUrl {
                value: self.host_url.clone(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(())
    }

    pub fn template_dir(&self) -> PathBuf {
        self.template_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("template"))
    }

    /// Directory inside the template checkout that is copied for each stack.
    pub fn template_docker_dir(&self) -> PathBuf {
        self.template_dir().join("docker")
    }

    pub fn stacks_dir(&self) -> PathBuf {
        self.data_dir.join("stacks")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn host_projects_path(&self) -> PathBuf {
        self.host_projects_path
            .clone()
            .unwrap_or_else(|| self.stacks_dir())
    }

    /// Base URL without a trailing slash, ready for `{host_url}:{port}`.
    pub fn host_url_base(&self) -> &str {
        self.host_url.trim_end_matches('/')
    }
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}
