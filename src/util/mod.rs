//! Small utilities: subprocess execution, filesystem helpers, ids, CLI-output tokenizing.

pub mod exec;
pub mod fs;
pub mod id;

/// Trimmed, non-empty lines of CLI output.
pub fn non_empty_lines(s: &str) -> impl Iterator<Item = &str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Split a pipe-delimited `--format` line into trimmed fields.
pub fn pipe_fields(line: &str) -> Vec<&str> {
    line.split('|').map(str::trim).collect()
}

/// Strip `prefix` from `name` when present, otherwise return `name` unchanged.
pub fn strip_name_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}
