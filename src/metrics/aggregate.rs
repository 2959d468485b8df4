use serde::Serialize;

use super::host::percent;
use super::parse::{InspectRecord, NetworkRecord, StatsRecord, VolumeRecord};
use super::units::{bytes_to_mb, format_bytes};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryFigures {
    pub used_mb: u64,
    pub limit_mb: u64,
    pub percent: f64,
}

/// One container of a stack: inspect data joined with its stats row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    /// Name without the `{slug}-` prefix.
    pub name: String,
    pub full_name: String,
    pub status: String,
    pub image: String,
    pub created: String,
    pub restart_count: u64,
    pub memory: MemoryFigures,
    #[serde(skip)]
    pub memory_used_bytes: u64,
    #[serde(skip)]
    pub memory_limit_bytes: u64,
    pub cpu: f64,
    pub network: String,
    pub block_io: String,
}

impl ContainerRecord {
    pub fn join(slug: &str, inspect: InspectRecord, stats: Option<&StatsRecord>) -> Self {
        let name = crate::util::strip_name_prefix(&inspect.name, &format!("{slug}-")).to_string();
        let (memory, used_bytes, limit_bytes, cpu, network, block_io) = match stats {
            Some(s) => (
                MemoryFigures {
                    used_mb: bytes_to_mb(s.mem_used_bytes).round() as u64,
                    limit_mb: bytes_to_mb(s.mem_limit_bytes).round() as u64,
                    percent: s.mem_percent,
                },
                s.mem_used_bytes,
                s.mem_limit_bytes,
                s.cpu_percent,
                s.net_io.clone(),
                s.block_io.clone(),
            ),
            None => (
                MemoryFigures::default(),
                0,
                0,
                0.0,
                "N/A".to_string(),
                "N/A".to_string(),
            ),
        };
        Self {
            id: inspect.id,
            name,
            full_name: inspect.name,
            status: inspect.status,
            image: inspect.image,
            created: inspect.created,
            restart_count: inspect.restart_count,
            memory,
            memory_used_bytes: used_bytes,
            memory_limit_bytes: limit_bytes,
            cpu,
            network,
            block_io,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackStats {
    pub total_containers: usize,
    pub running_containers: usize,
    pub stopped_containers: usize,
    pub total_restarts: u64,
    pub total_memory_used_mb: u64,
    pub total_memory_limit_mb: u64,
    pub system_total_memory_mb: u64,
    pub memory_usage_percent: u64,
    pub average_cpu: f64,
    pub total_volumes: usize,
    pub total_volume_size_bytes: u64,
    pub total_volume_size: String,
    pub total_networks: usize,
}

impl Default for StackStats {
    fn default() -> Self {
        aggregate(&[], &[], &[], 0, 0)
    }
}

/// Roll per-container records up into stack totals.
///
/// `system_total_mb` of 0 falls back to the summed container limits.
pub fn aggregate(
    containers: &[ContainerRecord],
    volumes: &[VolumeRecord],
    networks: &[NetworkRecord],
    volume_dir_bytes: u64,
    system_total_mb: u64,
) -> StackStats {
    let running = containers.iter().filter(|c| c.is_running()).count();
    let used_bytes: u64 = containers.iter().map(|c| c.memory_used_bytes).sum();
    let limit_bytes: u64 = containers.iter().map(|c| c.memory_limit_bytes).sum();
    let used_mb = bytes_to_mb(used_bytes);
    let limit_mb = bytes_to_mb(limit_bytes).round() as u64;
    let system_total = if system_total_mb > 0 {
        system_total_mb
    } else {
        limit_mb
    };
    let average_cpu = if containers.is_empty() {
        0.0
    } else {
        let sum: f64 = containers.iter().map(|c| c.cpu).sum();
        (sum / containers.len() as f64 * 100.0).round() / 100.0
    };

    StackStats {
        total_containers: containers.len(),
        running_containers: running,
        stopped_containers: containers.len() - running,
        total_restarts: containers.iter().map(|c| c.restart_count).sum(),
        total_memory_used_mb: used_mb.round() as u64,
        total_memory_limit_mb: limit_mb,
        system_total_memory_mb: system_total,
        memory_usage_percent: if system_total == 0 {
            0
        } else {
            (used_mb / system_total as f64 * 100.0).round() as u64
        },
        average_cpu,
        total_volumes: volumes.len(),
        total_volume_size_bytes: volume_dir_bytes,
        total_volume_size: format_bytes(volume_dir_bytes),
        total_networks: networks.len(),
    }
}

/// Memory of one container as docker printed it, plus MB figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerMemory {
    pub name: String,
    pub used: String,
    pub total: String,
    pub used_mb: u64,
    pub limit_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemorySummary {
    pub containers: Vec<ContainerMemory>,
    pub total_used_mb: u64,
    pub total_limit_mb: u64,
    pub used_percent: u64,
    pub unit: &'static str,
}

/// Per-container memory for one stack; percent is of the summed limits.
pub fn summarize_memory(slug: &str, stats: &[StatsRecord]) -> MemorySummary {
    let prefix = format!("{slug}-");
    let containers: Vec<ContainerMemory> = stats
        .iter()
        .map(|s| ContainerMemory {
            name: crate::util::strip_name_prefix(&s.name, &prefix).to_string(),
            used: s.mem_used.clone(),
            total: s.mem_limit.clone(),
            used_mb: bytes_to_mb(s.mem_used_bytes).round() as u64,
            limit_mb: bytes_to_mb(s.mem_limit_bytes).round() as u64,
        })
        .collect();
    let used = bytes_to_mb(stats.iter().map(|s| s.mem_used_bytes).sum());
    let limit = bytes_to_mb(stats.iter().map(|s| s.mem_limit_bytes).sum());
    MemorySummary {
        containers,
        total_used_mb: used.round() as u64,
        total_limit_mb: limit.round() as u64,
        used_percent: percent(used.round() as u64, limit.round() as u64),
        unit: "MB",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::parse::{parse_inspect_line, parse_stats_line};

    fn record(line_inspect: &str, line_stats: &str) -> ContainerRecord {
        let stats = parse_stats_line(line_stats).unwrap();
        ContainerRecord::join("s-1", parse_inspect_line(line_inspect).unwrap(), Some(&stats))
    }

    #[test]
    fn empty_input_is_all_zero() {
        let s = aggregate(&[], &[], &[], 0, 0);
        assert_eq!(s.total_containers, 0);
        assert_eq!(s.running_containers, 0);
        assert_eq!(s.stopped_containers, 0);
        assert_eq!(s.total_restarts, 0);
        assert_eq!(s.total_memory_used_mb, 0);
        assert_eq!(s.total_memory_limit_mb, 0);
        assert_eq!(s.system_total_memory_mb, 0);
        assert_eq!(s.memory_usage_percent, 0);
        assert_eq!(s.average_cpu, 0.0);
        assert_eq!(s.total_volume_size, "0 B");
        assert_eq!(s, StackStats::default());
    }

    #[test]
    fn totals_and_average_cpu() {
        let a = record(
            "aaaaaaaaaaaaaaaa|/s-1-db|running|1|postgres|2024-01-01T00:00:00Z",
            "s-1-db|512MiB / 2GiB|25%|1.111%|0B / 0B|0B / 0B",
        );
        let b = record(
            "bbbbbbbbbbbbbbbb|/s-1-kong|exited|3|kong|2024-01-01T00:00:00Z",
            "s-1-kong|512MiB / 2GiB|25%|2.222%|0B / 0B|0B / 0B",
        );
        assert_eq!(a.name, "db");
        let s = aggregate(&[a, b], &[], &[], 1536, 4096);
        assert_eq!(s.total_containers, 2);
        assert_eq!(s.running_containers, 1);
        assert_eq!(s.stopped_containers, 1);
        assert_eq!(s.total_restarts, 4);
        assert_eq!(s.total_memory_used_mb, 1024);
        assert_eq!(s.total_memory_limit_mb, 4096);
        assert_eq!(s.memory_usage_percent, 25);
        assert_eq!(s.average_cpu, 1.67);
        assert_eq!(s.total_volume_size, "1.5 KB");
    }

    #[test]
    fn memory_summary_percent_of_limits() {
        let stats = vec![
            parse_stats_line("s-1-db|1GiB / 4GiB|25%|0%|-|-").unwrap(),
            parse_stats_line("s-1-rest|1GiB / 4GiB|25%|0%|-|-").unwrap(),
        ];
        let m = summarize_memory("s-1", &stats);
        assert_eq!(m.containers[1].name, "rest");
        assert_eq!(m.total_used_mb, 2048);
        assert_eq!(m.total_limit_mb, 8192);
        assert_eq!(m.used_percent, 25);
        assert_eq!(m.unit, "MB");
    }
}
