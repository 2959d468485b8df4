use std::fs;
use std::path::Path;

use serde::Serialize;

/// Host memory in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostMemory {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub available_mb: u64,
    pub used_percent: u64,
}

impl HostMemory {
    fn from_kb(total: u64, free: u64, available: u64) -> Self {
        let mb = |kb: u64| (kb as f64 / 1024.0).round() as u64;
        let (total_mb, free_mb, available_mb) = (mb(total), mb(free), mb(available));
        let used_mb = total_mb.saturating_sub(available_mb);
        Self {
            total_mb,
            used_mb,
            free_mb,
            available_mb,
            used_percent: percent(used_mb, total_mb),
        }
    }
}

pub(crate) fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        (part as f64 / whole as f64 * 100.0).round() as u64
    }
}

fn meminfo_kb(text: &str, key: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// `/proc/meminfo` text; used is total minus available.
pub fn parse_meminfo(text: &str) -> Option<HostMemory> {
    let total = meminfo_kb(text, "MemTotal")?;
    let free = meminfo_kb(text, "MemFree")?;
    let available = meminfo_kb(text, "MemAvailable")?;
    if total == 0 {
        return None;
    }
    Some(HostMemory::from_kb(total, free, available))
}

const PROC_MEMINFO: &str = "/proc/meminfo";

/// This machine's memory: the kernel's own MemAvailable estimate from `meminfo`, then
/// `sysinfo(2)` when that file is unreadable.
fn local_memory_from(meminfo: &Path) -> Option<HostMemory> {
    fs::read_to_string(meminfo)
        .ok()
        .and_then(|text| parse_meminfo(&text))
        .or_else(sysinfo_memory)
}

// sysinfo has no page cache figure, so available is only free plus buffers here and
// undercounts what MemAvailable reports.
#[cfg(target_os = "linux")]
fn sysinfo_memory() -> Option<HostMemory> {
    // SAFETY: sysinfo only writes into the zeroed struct we pass.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return None;
    }
    let unit = u64::from(info.mem_unit.max(1));
    let kb = |v: libc::c_ulong| (v as u64).saturating_mul(unit) / 1024;
    let total = kb(info.totalram);
    let free = kb(info.freeram);
    let available = free.saturating_add(kb(info.bufferram));
    (total > 0).then(|| HostMemory::from_kb(total, free, available))
}

#[cfg(not(target_os = "linux"))]
fn sysinfo_memory() -> Option<HostMemory> {
    None
}

/// Read host memory from a mounted meminfo file when given, else from this machine.
/// Zeros when neither is available.
pub fn read_host_memory(meminfo: Option<&Path>) -> HostMemory {
    if let Some(path) = meminfo {
        match fs::read_to_string(path) {
            Ok(text) => match parse_meminfo(&text) {
                Some(m) => return m,
                None => tracing::warn!(path = %path.display(), "meminfo lacks MemTotal/MemFree/MemAvailable"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot read host meminfo"),
        }
    }
    local_memory_from(Path::new(PROC_MEMINFO)).unwrap_or_default()
}
