use std::time::Duration;

use stackyard::lifecycle::Orchestrator;
use stackyard::template::COMPOSE_FILE;
use stackyard::{ExecError, ExecRequest};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Print `label: value` for one docker query; `None` when the query failed.
fn report_version(orch: &Orchestrator, label: &str, req: ExecRequest) -> Option<String> {
    match orch.runner().run(req) {
        Ok(out) if out.success() => {
            let v = first_line(&out.stdout).to_string();
            eprintln!("  {label:<16} {v}");
            Some(v)
        }
        Ok(out) => {
            eprintln!("  {label:<16} error ({})", first_line(&out.failure_text()));
            None
        }
        Err(ExecError::NotFound { program }) => {
            eprintln!("  {label:<16} not found ({program})");
            None
        }
        Err(e) => {
            eprintln!("  {label:<16} error ({e})");
            None
        }
    }
}

pub(crate) fn run_doctor(orch: &Orchestrator) {
    let cfg = orch.config();
    eprintln!("stackyard doctor");
    eprintln!();
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  host:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    eprintln!();

    match which::which(&cfg.docker) {
        Ok(p) => eprintln!("  docker command:  {}", p.display()),
        Err(_) => {
            eprintln!("  docker command:  (not found: {})", cfg.docker);
            eprintln!("    tip: install Docker or set STACKYARD_DOCKER to the docker binary.");
        }
    }
    let docker = report_version(
        orch,
        "docker version:",
        ExecRequest::new(&cfg.docker)
            .arg("--version")
            .timeout(PROBE_TIMEOUT),
    );
    let compose = report_version(
        orch,
        "compose version:",
        ExecRequest::new(&cfg.docker)
            .args(["compose", "version"])
            .timeout(PROBE_TIMEOUT),
    );
    if docker.is_some() && compose.is_none() {
        eprintln!("    tip: install the Docker Compose v2 plugin (`docker compose`).");
    }
    eprintln!();

    eprintln!("  data dir:        {}", cfg.data_dir.display());
    eprintln!("  stacks dir:      {}", cfg.stacks_dir().display());
    eprintln!("  host mount path: {}", cfg.host_projects_path().display());
    let template = cfg.template_docker_dir();
    if template.join(COMPOSE_FILE).is_file() {
        eprintln!("  template:        {} (ok)", template.display());
    } else {
        eprintln!("  template:        {} (missing)", template.display());
        eprintln!("    tip: run `stackyard template-init` or set STACKYARD_TEMPLATE_DIR.");
    }
    match orch.list_stacks(None) {
        Ok(stacks) => eprintln!("  stacks:          {}", stacks.len()),
        Err(e) => eprintln!("  stacks:          error ({e})"),
    }
    eprintln!();

    match orch.reachability().probe() {
        Some(m) => eprintln!("  connectivity:    online via {m}"),
        None => {
            eprintln!("  connectivity:    offline");
            eprintln!("    tip: deploys will skip `docker compose pull` and use local images.");
        }
    }

    let mem = orch.collector().host_memory();
    let source = cfg
        .host_meminfo
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "local".to_string());
    eprintln!(
        "  host memory:     {} MB total, {} MB available ({}% used, source: {source})",
        mem.total_mb, mem.available_mb, mem.used_percent
    );
    eprintln!();
    eprintln!("doctor: completed diagnostics.");
}
