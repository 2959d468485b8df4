/// One `container_name` the template ships with and how it maps to a tenant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameRule {
    pub source: &'static str,
    prefix: &'static str,
    pub service: &'static str,
}

impl RenameRule {
    const fn plain(source: &'static str, service: &'static str) -> Self {
        Self {
            source,
            prefix: "",
            service,
        }
    }

    pub fn target(&self, slug: &str) -> String {
        format!("{}{slug}-{}", self.prefix, self.service)
    }
}

pub const RENAME_TABLE: &[RenameRule] = &[
    RenameRule::plain("supabase-studio", "studio"),
    RenameRule::plain("supabase-kong", "kong"),
    RenameRule::plain("supabase-auth", "auth"),
    RenameRule::plain("supabase-rest", "rest"),
    RenameRule {
        source: "realtime-dev.supabase-realtime",
        prefix: "realtime-dev.",
        service: "realtime",
    },
    RenameRule::plain("supabase-storage", "storage"),
    RenameRule::plain("supabase-imgproxy", "imgproxy"),
    RenameRule::plain("supabase-meta", "meta"),
    RenameRule::plain("supabase-edge-functions", "edge-functions"),
    RenameRule::plain("supabase-analytics", "analytics"),
    RenameRule::plain("supabase-db", "db"),
    RenameRule::plain("supabase-vector", "vector"),
    RenameRule::plain("supabase-pooler", "pooler"),
];

/// Rewrite a `container_name:` line whose value is exactly a table source.
///
/// Returns the index of the matched rule and the new line with indentation kept.
pub fn rename_line(line: &str, slug: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    let value = trimmed.strip_prefix("container_name:")?.trim();
    let (unquoted, quote) = match value.as_bytes().first() {
        Some(q @ (b'"' | b'\'')) if value.len() >= 2 && value.as_bytes()[value.len() - 1] == *q => {
            (&value[1..value.len() - 1], Some(*q as char))
        }
        _ => (value, None),
    };
    let (idx, rule) = RENAME_TABLE
        .iter()
        .enumerate()
        .find(|(_, r)| r.source == unquoted)?;
    let target = rule.target(slug);
    let rendered = match quote {
        Some(q) => format!("{indent}container_name: {q}{target}{q}"),
        None => format!("{indent}container_name: {target}"),
    };
    Some((idx, rendered))
}
