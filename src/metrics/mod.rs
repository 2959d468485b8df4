//! Container, volume and network observations for one stack, and host memory.
//!
//! Collection never fails: a docker call that errors or prints garbage contributes nothing and
//! is logged at warn level.

pub mod aggregate;
pub mod host;
pub mod parse;
pub mod units;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::ConsoleConfig;
use crate::store::Stack;
use crate::template::MaterializedTemplate;
use crate::util::exec::{CommandRunner, ExecRequest};
use crate::util::id::now_millis;
use crate::util::non_empty_lines;

pub use aggregate::{aggregate, ContainerRecord, MemorySummary, StackStats};
pub use host::HostMemory;
pub use parse::{NetworkRecord, StatsRecord, VolumeRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackAnalysis {
    pub stack_id: String,
    pub stack_name: String,
    pub slug: String,
    pub timestamp_ms: u64,
    pub stats: StackStats,
    pub containers: Vec<ContainerRecord>,
    pub volumes: Vec<VolumeRecord>,
    pub networks: Vec<NetworkRecord>,
}

pub struct Collector<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ConsoleConfig,
}

impl<'a> Collector<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ConsoleConfig) -> Self {
        Self { runner, config }
    }

    fn timeout(&self) -> Duration {
        self.config.timeouts.query
    }

    /// Stdout of a successful docker call, or `None` after logging why not.
    fn docker<I, S>(&self, args: I) -> Option<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let req = ExecRequest::new(&self.config.docker)
            .args(args)
            .timeout(self.timeout());
        self.query(req)
    }

    fn query(&self, req: ExecRequest) -> Option<String> {
        let line = req.command_line();
        tracing::debug!(cmd = %line, "metrics query");
        match self.runner.run(req) {
            Ok(out) if out.success() => Some(out.stdout),
            Ok(out) => {
                tracing::warn!(cmd = %line, error = %out.failure_text(), "metrics query failed");
                None
            }
            Err(e) => {
                tracing::warn!(cmd = %line, error = %e, "metrics query failed");
                None
            }
        }
    }

    /// Names of all containers (running or not) that belong to `slug`.
    pub fn container_names(&self, slug: &str) -> Vec<String> {
        let filter = format!("name={slug}");
        self.docker(["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"])
            .map(|out| {
                non_empty_lines(&out)
                    .filter(|n| n.starts_with(slug))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self, names: &[String]) -> Vec<StatsRecord> {
        if names.is_empty() {
            return Vec::new();
        }
        let req = ExecRequest::new(&self.config.docker)
            .args(["stats", "--no-stream", "--format", parse::STATS_FORMAT])
            .args(names)
            .timeout(self.timeout());
        self.query(req)
            .map(|out| parse::parse_stats(&out))
            .unwrap_or_default()
    }

    pub fn inspect(&self, name: &str) -> Option<parse::InspectRecord> {
        let out = self.docker(["inspect", name, "--format", parse::INSPECT_FORMAT])?;
        let rec = non_empty_lines(&out).find_map(parse::parse_inspect_line);
        if rec.is_none() {
            tracing::warn!(container = name, "unparseable inspect output");
        }
        rec
    }

    /// The stack's volumes, sized from a single `docker system df -v`.
    pub fn volumes(&self, slug: &str) -> Vec<VolumeRecord> {
        let filter = format!("name={slug}");
        let mut volumes = self
            .docker(["volume", "ls", "--filter", filter.as_str(), "--format", parse::VOLUME_FORMAT])
            .map(|out| parse::parse_volumes(&out, slug))
            .unwrap_or_default();
        if volumes.is_empty() {
            return volumes;
        }
        if let Some(out) = self.docker(["system", "df", "-v"]) {
            parse::apply_volume_sizes(&mut volumes, &parse::parse_volume_sizes(&out));
        }
        volumes
    }

    pub fn networks(&self, slug: &str) -> Vec<NetworkRecord> {
        let filter = format!("name={slug}");
        self.docker(["network", "ls", "--filter", filter.as_str(), "--format", parse::NETWORK_FORMAT])
            .map(|out| parse::parse_networks(&out, slug))
            .unwrap_or_default()
    }

    /// Bytes under `dir` per `du -sb`; walks the tree itself when `du` is unavailable.
    pub fn dir_size(&self, dir: &Path) -> u64 {
        if !dir.exists() {
            return 0;
        }
        let req = ExecRequest::new("du")
            .arg("-sb")
            .arg(dir)
            .timeout(self.timeout());
        if let Some(out) = self.query(req) {
            return parse::parse_du_total(&out);
        }
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    pub fn host_memory(&self) -> HostMemory {
        host::read_host_memory(self.config.host_meminfo.as_deref())
    }

    /// Full resource picture of one stack.
    pub fn analyze(&self, stack: &Stack) -> StackAnalysis {
        let slug = stack.slug.as_str();
        let names = self.container_names(slug);
        let stats = self.stats(&names);
        let containers: Vec<ContainerRecord> = names
            .iter()
            .filter_map(|n| self.inspect(n))
            .map(|inspect| {
                let row = stats.iter().find(|s| s.name == inspect.name);
                ContainerRecord::join(slug, inspect, row)
            })
            .collect();
        let volumes = self.volumes(slug);
        let networks = self.networks(slug);
        let dir_bytes = self.dir_size(&MaterializedTemplate::locate(self.config, slug).volumes_dir());
        let host = self.host_memory();

        StackAnalysis {
            stack_id: stack.id.clone(),
            stack_name: stack.name.clone(),
            slug: slug.to_string(),
            timestamp_ms: now_millis(),
            stats: aggregate(&containers, &volumes, &networks, dir_bytes, host.total_mb),
            containers,
            volumes,
            networks,
        }
    }

    /// Memory of every running container whose name starts with `slug`.
    pub fn memory_summary(&self, slug: &str) -> MemorySummary {
        let stats: Vec<StatsRecord> = self
            .docker(["stats", "--no-stream", "--format", parse::STATS_FORMAT])
            .map(|out| parse::parse_stats(&out))
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.name.starts_with(slug))
            .collect();
        aggregate::summarize_memory(slug, &stats)
    }
}
