//! Per-tenant copies of the shared compose template.
//!
//! A materialized template lives at `<data_dir>/stacks/<slug>/docker/` and differs from the
//! shared checkout in exactly these places:
//! - every known `container_name:` carries the slug ([`rename::RENAME_TABLE`]);
//! - the compose project `name:` is the slug;
//! - relative bind mounts point at the stack directory as the docker daemon sees it;
//! - the analytics port is published from `${ANALYTICS_PORT}`;
//! - the log shipper's `volumes/logs/vector.yml` names the tenant's vector container.
//!
//! A `.stackyard-materialized` marker holding the slug is written last.

pub mod rename;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConsoleConfig;
use crate::util::exec::{CommandRunner, ExecRequest};
use crate::util::fs::{copy_tree, remove_tree, write_atomic};

use rename::{rename_line, RENAME_TABLE};

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";
pub const MARKER_FILE: &str = ".stackyard-materialized";
pub const VECTOR_CONFIG: &str = "volumes/logs/vector.yml";
const TEMPLATE_PROJECT_NAME: &str = "supabase";
const ANALYTICS_PORT_LINE: &str = "- 4000:4000";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template directory {} not found; run `stackyard template-init`", .0.display())]
    MissingTemplate(PathBuf),
    #[error("{} is already a materialized stack", .0.display())]
    AlreadyMaterialized(PathBuf),
    #[error("rewritten compose file is not valid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("template I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cloning template repository failed: {0}")]
    Clone(String),
}

impl TemplateError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> TemplateError + '_ {
        move |source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What a rewrite changed, and which rename rules found nothing to rename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub renamed: usize,
    pub unmatched: Vec<&'static str>,
    pub project_named: bool,
    pub bind_mounts: usize,
    pub analytics_port: bool,
    pub vector_renamed: bool,
}

/// Paths of one stack's materialized template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedTemplate {
    pub root: PathBuf,
    pub docker_dir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: PathBuf,
}

impl MaterializedTemplate {
    pub fn locate(config: &ConsoleConfig, slug: &str) -> Self {
        let root = config.stacks_dir().join(slug);
        let docker_dir = root.join("docker");
        Self {
            compose_file: docker_dir.join(COMPOSE_FILE),
            env_file: docker_dir.join(ENV_FILE),
            docker_dir,
            root,
        }
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.docker_dir.join("volumes")
    }

    pub fn exists(&self) -> bool {
        self.compose_file.is_file()
    }
}

/// Split `line` into `(indent + "- " + opening quote, path after "./", rest)` when it is a
/// relative bind-mount list item.
fn split_relative_mount(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let item = trimmed.strip_prefix("- ")?.trim_start();
    let quote_len = usize::from(item.starts_with('"') || item.starts_with('\''));
    let rel = item[quote_len..].strip_prefix("./")?;
    let (path, _) = rel.split_once(':')?;
    if path.is_empty() {
        return None;
    }
    let head_len = line.len() - rel.len() - 2;
    Some((&line[..head_len], rel))
}

fn is_top_level_name(line: &str) -> Option<&str> {
    line.strip_prefix("name:").map(str::trim)
}

/// Rewrite compose text for `slug`.
///
/// `host_docker_dir` is the stack's docker directory as seen by the docker daemon.
pub fn rewrite_compose(
    content: &str,
    slug: &str,
    host_docker_dir: &str,
) -> Result<(String, RewriteReport), TemplateError> {
    let host_docker_dir = host_docker_dir.trim_end_matches('/');
    let mut report = RewriteReport::default();
    let mut matched = vec![false; RENAME_TABLE.len()];
    let mut out = String::with_capacity(content.len() + 256);

    for line in content.lines() {
        let rewritten = if let Some(name) = is_top_level_name(line) {
            let name = name.trim_matches(|c| c == '"' || c == '\'');
            if name != TEMPLATE_PROJECT_NAME {
                return Err(TemplateError::AlreadyMaterialized(PathBuf::from(
                    host_docker_dir,
                )));
            }
            report.project_named = true;
            format!("name: {slug}")
        } else if let Some((idx, renamed)) = rename_line(line, slug) {
            matched[idx] = true;
            report.renamed += 1;
            renamed
        } else if let Some((head, rel)) = split_relative_mount(line) {
            report.bind_mounts += 1;
            format!("{head}{host_docker_dir}/{rel}")
        } else if line.trim() == ANALYTICS_PORT_LINE {
            report.analytics_port = true;
            line.replacen(ANALYTICS_PORT_LINE, "- ${ANALYTICS_PORT}:4000", 1)
        } else {
            line.to_string()
        };
        out.push_str(&rewritten);
        out.push('\n');
    }
    if !content.ends_with('\n') {
        out.pop();
    }

    report.unmatched = RENAME_TABLE
        .iter()
        .zip(&matched)
        .filter(|(_, hit)| !**hit)
        .map(|(rule, _)| rule.source)
        .collect();

    serde_yaml::from_str::<serde_yaml::Value>(&out)?;
    Ok((out, report))
}

/// Point the log shipper at the tenant's vector container. Returns whether anything changed.
pub fn rewrite_vector_config(content: &str, slug: &str) -> (String, bool) {
    let needle = "- supabase-vector";
    if !content.contains(needle) {
        return (content.to_string(), false);
    }
    (content.replace(needle, &format!("- {slug}-vector")), true)
}

/// Copy the shared template for `slug` and rewrite it.
///
/// Any failure after the copy started removes `<data_dir>/stacks/<slug>` again.
pub fn materialize(
    config: &ConsoleConfig,
    slug: &str,
) -> Result<(MaterializedTemplate, RewriteReport), TemplateError> {
    let source = config.template_docker_dir();
    if !source.join(COMPOSE_FILE).is_file() {
        return Err(TemplateError::MissingTemplate(source));
    }
    let target = MaterializedTemplate::locate(config, slug);
    if target.root.exists() {
        return Err(TemplateError::AlreadyMaterialized(target.root));
    }

    match populate(config, slug, &source, &target) {
        Ok(report) => {
            for source in &report.unmatched {
                tracing::warn!(slug, container = source, "rename rule matched nothing in template");
            }
            tracing::info!(
                slug,
                renamed = report.renamed,
                bind_mounts = report.bind_mounts,
                "template materialized"
            );
            Ok((target, report))
        }
        Err(e) => {
            if let Err(cleanup) = remove_tree(&target.root) {
                tracing::warn!(slug, error = %cleanup, "could not remove partial stack directory");
            }
            Err(e)
        }
    }
}

fn populate(
    config: &ConsoleConfig,
    slug: &str,
    source: &Path,
    target: &MaterializedTemplate,
) -> Result<RewriteReport, TemplateError> {
    copy_tree(source, &target.docker_dir).map_err(TemplateError::io(&target.docker_dir))?;
    let marker = target.docker_dir.join(MARKER_FILE);
    if marker.exists() {
        return Err(TemplateError::AlreadyMaterialized(source.to_path_buf()));
    }

    let compose = fs::read_to_string(&target.compose_file)
        .map_err(TemplateError::io(&target.compose_file))?;
    let host_docker_dir = config.host_projects_path().join(slug).join("docker");
    let (rewritten, mut report) =
        rewrite_compose(&compose, slug, &host_docker_dir.to_string_lossy())?;
    write_atomic(&target.compose_file, rewritten.as_bytes())
        .map_err(TemplateError::io(&target.compose_file))?;

    let vector = target.docker_dir.join(VECTOR_CONFIG);
    if vector.is_file() {
        let text = fs::read_to_string(&vector).map_err(TemplateError::io(&vector))?;
        let (text, changed) = rewrite_vector_config(&text, slug);
        if changed {
            write_atomic(&vector, text.as_bytes()).map_err(TemplateError::io(&vector))?;
        }
        report.vector_renamed = changed;
    }

    fs::write(&marker, format!("{slug}\n")).map_err(TemplateError::io(&marker))?;
    Ok(report)
}

/// Shallow-clone the template repository unless the template is already present.
///
/// Returns `true` when a clone was made.
pub fn ensure_template(
    config: &ConsoleConfig,
    runner: &dyn CommandRunner,
) -> Result<bool, TemplateError> {
    let dir = config.template_dir();
    if config.template_docker_dir().join(COMPOSE_FILE).is_file() {
        return Ok(false);
    }
    if dir.exists() {
        return Err(TemplateError::MissingTemplate(config.template_docker_dir()));
    }
    if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(TemplateError::io(parent))?;
    }

    tracing::info!(repo = %config.template_repo, dir = %dir.display(), "cloning template");
    let req = ExecRequest::new("git")
        .args(["clone", "--depth", "1"])
        .arg(&config.template_repo)
        .arg(&dir)
        .timeout(config.timeouts.pull);
    let out = runner
        .run(req)
        .map_err(|e| TemplateError::Clone(e.to_string()))?;
    if !out.success() {
        return Err(TemplateError::Clone(out.failure_text()));
    }
    if !config.template_docker_dir().join(COMPOSE_FILE).is_file() {
        return Err(TemplateError::MissingTemplate(config.template_docker_dir()));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = "\
name: supabase

services:
  studio:
    container_name: supabase-studio
    image: supabase/studio
  db:
    container_name: supabase-db
    volumes:
      - ./volumes/db/realtime.sql:/docker-entrypoint-initdb.d/migrations/99-realtime.sql:Z
      - db-config:/etc/postgresql-custom
      - \"./volumes/db/jwt.sql:/docker-entrypoint-initdb.d/init-scripts/99-jwt.sql:Z\"
  analytics:
    container_name: supabase-analytics
    ports:
      - 4000:4000
volumes:
  db-config:
";

    #[test]
    fn compose_rewrite_touches_only_known_lines() {
        let (out, report) = rewrite_compose(COMPOSE, "demo-1", "/srv/stacks/demo-1/docker/").unwrap();
        assert!(out.starts_with("name: demo-1\n"));
        assert!(out.contains("    container_name: demo-1-studio\n"));
        assert!(out.contains("    container_name: demo-1-db\n"));
        assert!(out.contains(
            "      - /srv/stacks/demo-1/docker/volumes/db/realtime.sql:/docker-entrypoint-initdb.d/migrations/99-realtime.sql:Z\n"
        ));
        assert!(out.contains(
            "      - \"/srv/stacks/demo-1/docker/volumes/db/jwt.sql:/docker-entrypoint-initdb.d/init-scripts/99-jwt.sql:Z\"\n"
        ));
        assert!(out.contains("      - db-config:/etc/postgresql-custom\n"));
        assert!(out.contains("      - ${ANALYTICS_PORT}:4000\n"));
        assert!(!out.contains("./"));
        assert_eq!(report.renamed, 3);
        assert_eq!(report.bind_mounts, 2);
        assert!(report.analytics_port);
        assert!(report.unmatched.contains(&"supabase-kong"));
        assert!(!report.unmatched.contains(&"supabase-db"));
    }

    #[test]
    fn rewritten_compose_is_refused() {
        let (once, _) = rewrite_compose(COMPOSE, "demo-1", "/h").unwrap();
        assert!(matches!(
            rewrite_compose(&once, "demo-2", "/h"),
            Err(TemplateError::AlreadyMaterialized(_))
        ));
    }

    #[test]
    fn broken_yaml_is_rejected() {
        let bad = "name: supabase\nservices:\n  a: [unclosed\n";
        assert!(matches!(
            rewrite_compose(bad, "x-1", "/h"),
            Err(TemplateError::InvalidYaml(_))
        ));
    }

    #[test]
    fn vector_rename() {
        let (text, changed) =
            rewrite_vector_config("    include_containers:\n      - supabase-vector\n", "s-9");
        assert!(changed);
        assert_eq!(text, "    include_containers:\n      - s-9-vector\n");
        assert!(!rewrite_vector_config("nothing here\n", "s-9").1);
    }

    #[test]
    fn mount_split_requires_relative_path_with_target() {
        assert_eq!(
            split_relative_mount("  - ./a/b:/c"),
            Some(("  - ", "a/b:/c"))
        );
        assert!(split_relative_mount("  - ./a/b").is_none());
        assert!(split_relative_mount("  - /abs:/c").is_none());
        assert!(split_relative_mount("  - ../up:/c").is_none());
    }
}
