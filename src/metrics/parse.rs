//! Parsers for pipe-delimited `docker ... --format` lines.
//!
//! Every parser skips lines it cannot make sense of instead of failing the whole batch.

use std::collections::HashMap;

use serde::Serialize;

use super::units::{parse_percent, parse_size};
use crate::util::{non_empty_lines, pipe_fields, strip_name_prefix};

/// Go template for `docker stats --no-stream --format`.
pub const STATS_FORMAT: &str =
    "{{.Name}}|{{.MemUsage}}|{{.MemPerc}}|{{.CPUPerc}}|{{.NetIO}}|{{.BlockIO}}";
pub const INSPECT_FORMAT: &str =
    "{{.Id}}|{{.Name}}|{{.State.Status}}|{{.RestartCount}}|{{.Config.Image}}|{{.Created}}";
pub const VOLUME_FORMAT: &str = "{{.Name}}|{{.Driver}}";
pub const NETWORK_FORMAT: &str = "{{.Name}}|{{.Driver}}|{{.Scope}}";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub name: String,
    pub mem_used: String,
    pub mem_limit: String,
    pub mem_used_bytes: u64,
    pub mem_limit_bytes: u64,
    pub mem_percent: f64,
    pub cpu_percent: f64,
    pub net_io: String,
    pub block_io: String,
}

pub fn parse_stats_line(line: &str) -> Option<StatsRecord> {
    let f = pipe_fields(line);
    let name = f.first().copied().filter(|n| !n.is_empty())?;
    let usage = f.get(1).copied().filter(|u| !u.is_empty())?;
    let (used, limit) = usage.split_once('/')?;
    let text = |i: usize| {
        f.get(i)
            .copied()
            .filter(|s| !s.is_empty())
            .unwrap_or("N/A")
            .to_string()
    };
    Some(StatsRecord {
        name: name.to_string(),
        mem_used: used.trim().to_string(),
        mem_limit: limit.trim().to_string(),
        mem_used_bytes: parse_size(used),
        mem_limit_bytes: parse_size(limit),
        mem_percent: f.get(2).map_or(0.0, |s| parse_percent(s)),
        cpu_percent: f.get(3).map_or(0.0, |s| parse_percent(s)),
        net_io: text(4),
        block_io: text(5),
    })
}

pub fn parse_stats(text: &str) -> Vec<StatsRecord> {
    non_empty_lines(text).filter_map(parse_stats_line).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub restart_count: u64,
    pub image: String,
    pub created: String,
}

pub fn parse_inspect_line(line: &str) -> Option<InspectRecord> {
    let f = pipe_fields(line);
    if f.len() < 6 || f[0].is_empty() {
        return None;
    }
    Some(InspectRecord {
        id: f[0].chars().take(12).collect(),
        name: f[1].trim_start_matches('/').to_string(),
        status: f[2].to_string(),
        restart_count: f[3].parse().unwrap_or(0),
        image: f[4].to_string(),
        created: f[5].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRecord {
    pub name: String,
    pub full_name: String,
    pub driver: String,
    /// As docker prints it, or `N/A` when `system df` has no row for the volume.
    pub size: String,
    pub size_bytes: u64,
}

/// Volumes named `{slug}_...`; the display name drops that prefix. Sizes start out unknown.
pub fn parse_volumes(text: &str, slug: &str) -> Vec<VolumeRecord> {
    let prefix = format!("{slug}_");
    non_empty_lines(text)
        .filter_map(|line| {
            let f = pipe_fields(line);
            let full = f.first().copied().filter(|n| !n.is_empty())?;
            Some(VolumeRecord {
                name: strip_name_prefix(full, &prefix).to_string(),
                full_name: full.to_string(),
                driver: f.get(1).copied().unwrap_or_default().to_string(),
                size: "N/A".to_string(),
                size_bytes: 0,
            })
        })
        .collect()
}

/// Volume name to size from the `VOLUME NAME  LINKS  SIZE` table of `docker system df -v`.
pub fn parse_volume_sizes(text: &str) -> HashMap<String, String> {
    let mut sizes = HashMap::new();
    let mut in_table = false;
    for line in text.lines() {
        if line.starts_with("VOLUME NAME") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.trim().is_empty() {
            break;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if let [name, _links, size, ..] = cols.as_slice() {
            sizes.insert(name.to_string(), size.to_string());
        }
    }
    sizes
}

/// Fill in `size`/`size_bytes` for every volume `sizes` knows about.
pub fn apply_volume_sizes(volumes: &mut [VolumeRecord], sizes: &HashMap<String, String>) {
    for v in volumes {
        if let Some(size) = sizes.get(&v.full_name) {
            v.size_bytes = parse_size(size);
            v.size = size.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    pub name: String,
    pub full_name: String,
    pub driver: String,
    pub scope: String,
}

pub fn parse_networks(text: &str, slug: &str) -> Vec<NetworkRecord> {
    let prefix = format!("{slug}_");
    non_empty_lines(text)
        .filter_map(|line| {
            let f = pipe_fields(line);
            let full = f.first().copied().filter(|n| !n.is_empty())?;
            Some(NetworkRecord {
                name: strip_name_prefix(full, &prefix).to_string(),
                full_name: full.to_string(),
                driver: f.get(1).copied().unwrap_or_default().to_string(),
                scope: f.get(2).copied().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Sum the leading byte counts of `du -sb` output.
pub fn parse_du_total(text: &str) -> u64 {
    non_empty_lines(text)
        .filter_map(|line| line.split_whitespace().next()?.parse::<u64>().ok())
        .sum()
}
