use std::io;
use std::time::Duration;

use serde::Serialize;

use stackyard::lifecycle::{NewStack, Orchestrator, Readiness};
use stackyard::util::id::now_millis;
use stackyard::{ServiceState, StackError};

use crate::cli::{Command, ConfigCmd};

const WAIT_INTERVAL: Duration = Duration::from_secs(2);

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), StackError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| StackError::io("encode json")(io::Error::from(e)))?;
    println!("{text}");
    Ok(())
}

fn print_services(services: &[ServiceState]) {
    if services.is_empty() {
        println!("  (no services)");
        return;
    }
    let width = services.iter().map(|s| s.service.len()).max().unwrap_or(0);
    for s in services {
        println!(
            "  {:<width$}  {:<10} {}",
            s.service,
            s.state,
            s.health,
            width = width
        );
    }
}

pub(crate) fn run(orch: &Orchestrator, command: Command) -> Result<(), StackError> {
    match command {
        Command::Create {
            name,
            description,
            owner,
        } => run_create(orch, name, description, owner),
        Command::List { owner, json } => run_list(orch, owner.as_deref(), json),
        Command::Deploy { stack } => run_deploy(orch, &stack),
        Command::Restart { stack } => {
            orch.restart(&stack)?;
            println!("restarted {stack}");
            Ok(())
        }
        Command::Pause { stack } => {
            orch.pause(&stack)?;
            println!("paused {stack}");
            Ok(())
        }
        Command::Delete { stack } => {
            let report = orch.delete(&stack)?;
            println!("deleted {stack}");
            if !report.containers_removed {
                println!("  note: containers may still exist; check `docker ps -a`");
            }
            if !report.files_removed {
                println!("  note: stack directory could not be removed");
            }
            Ok(())
        }
        Command::Status { stack, wait, json } => run_status(orch, &stack, wait, json),
        Command::Config { cmd } => run_config(orch, cmd),
        Command::RotateKeys { stack } => {
            let rotated = orch.rotate_keys(&stack, now_millis())?;
            println!("rotated keys for {stack}");
            if !rotated.secret_reused {
                println!("  note: no JWT secret was stored; a new one was generated");
            }
            println!("  ANON_KEY={}", rotated.tokens.anon_key);
            println!("  SERVICE_ROLE_KEY={}", rotated.tokens.service_role_key);
            Ok(())
        }
        Command::Analyze { stack, json } => {
            let s = orch.find(&stack)?;
            let analysis = orch.collector().analyze(&s);
            if json {
                return print_json(&analysis);
            }
            let st = &analysis.stats;
            println!("{} ({})", analysis.stack_name, analysis.slug);
            println!(
                "  containers: {} total, {} running, {} stopped, {} restarts",
                st.total_containers, st.running_containers, st.stopped_containers, st.total_restarts
            );
            println!(
                "  memory:     {} MB used / {} MB limit ({}% of {} MB)",
                st.total_memory_used_mb,
                st.total_memory_limit_mb,
                st.memory_usage_percent,
                st.system_total_memory_mb
            );
            println!("  cpu:        {:.2}% average", st.average_cpu);
            println!(
                "  volumes:    {} ({})",
                st.total_volumes, st.total_volume_size
            );
            println!("  networks:   {}", st.total_networks);
            for c in &analysis.containers {
                println!(
                    "    {:<16} {:<8} {:>6} MB  {:>6.2}%  {}",
                    c.name, c.status, c.memory.used_mb, c.cpu, c.image
                );
            }
            Ok(())
        }
        Command::Memory { stack, json } => {
            let s = orch.find(&stack)?;
            let summary = orch.collector().memory_summary(&s.slug);
            if json {
                return print_json(&summary);
            }
            for c in &summary.containers {
                println!("  {:<16} {} / {}", c.name, c.used, c.total);
            }
            println!(
                "  total: {} {} / {} {} ({}%)",
                summary.total_used_mb,
                summary.unit,
                summary.total_limit_mb,
                summary.unit,
                summary.used_percent
            );
            Ok(())
        }
        Command::HostMemory { json } => {
            let mem = orch.collector().host_memory();
            if json {
                return print_json(&mem);
            }
            println!(
                "  total: {} MB  used: {} MB  free: {} MB  available: {} MB  ({}%)",
                mem.total_mb, mem.used_mb, mem.free_mb, mem.available_mb, mem.used_percent
            );
            Ok(())
        }
        Command::Doctor => {
            crate::doctor::run_doctor(orch);
            Ok(())
        }
        Command::TemplateInit => {
            let cloned = stackyard::template::ensure_template(orch.config(), orch.runner())?;
            let dir = orch.config().template_dir();
            if cloned {
                println!("cloned template into {}", dir.display());
            } else {
                println!("template already present at {}", dir.display());
            }
            Ok(())
        }
    }
}

fn run_create(
    orch: &Orchestrator,
    name: String,
    description: String,
    owner: String,
) -> Result<(), StackError> {
    let created = orch.create_stack(
        NewStack {
            name,
            description,
            owner_id: owner,
        },
        now_millis(),
    )?;
    let ports = created.allocation.ports;
    let base = orch.config().host_url_base();
    println!("created {} ({})", created.stack.name, created.stack.slug);
    println!("  id:       {}", created.stack.id);
    println!("  api:      {base}:{}", ports.kong_http());
    println!("  studio:   {base}:{}", ports.studio());
    println!("  postgres: {}", ports.postgres());
    if !created.report.unmatched.is_empty() {
        println!(
            "  warning: template has no container named {}",
            created.report.unmatched.join(", ")
        );
    }
    println!("next: stackyard deploy {}", created.stack.slug);
    Ok(())
}

fn run_list(orch: &Orchestrator, owner: Option<&str>, json: bool) -> Result<(), StackError> {
    let stacks = orch.list_stacks(owner)?;
    if json {
        return print_json(&stacks);
    }
    if stacks.is_empty() {
        println!("no stacks");
        return Ok(());
    }
    for s in &stacks {
        println!("{:<40} {:<12} {}", s.slug, s.status, s.name);
    }
    Ok(())
}

fn run_deploy(orch: &Orchestrator, key: &str) -> Result<(), StackError> {
    let outcome = orch.deploy(key)?;
    println!("deployed {key}");
    println!("  {}", outcome.preflight.docker_version);
    println!("  {}", outcome.preflight.compose_version);
    match &outcome.preflight.connectivity {
        Some(m) => println!("  connectivity: {m}"),
        None => println!("  connectivity: offline (used local images)"),
    }
    if outcome.preflight.online() && !outcome.pulled {
        println!("  note: image pull failed; local images were used");
    }
    print_services(&outcome.services);
    Ok(())
}

fn run_status(
    orch: &Orchestrator,
    key: &str,
    wait: Option<u64>,
    json: bool,
) -> Result<(), StackError> {
    let Some(secs) = wait else {
        let (status, services) = orch.refresh_status(key)?;
        if json {
            #[derive(Serialize)]
            struct StatusView<'a> {
                status: String,
                services: &'a [ServiceState],
            }
            return print_json(&StatusView {
                status: status.to_string(),
                services: &services,
            });
        }
        println!("{key}: {status}");
        print_services(&services);
        return Ok(());
    };

    match orch.wait_ready(key, WAIT_INTERVAL, Duration::from_secs(secs))? {
        Readiness::Ready(services) => {
            if json {
                return print_json(&services);
            }
            println!("{key}: all services running");
            print_services(&services);
            Ok(())
        }
        Readiness::TimedOut(services) => {
            println!("{key}: not ready after {secs}s");
            print_services(&services);
            Err(StackError::NotReady {
                stack: key.to_string(),
                detail: format!("timed out after {secs}s"),
            })
        }
        Readiness::NotReady(reason) => Err(StackError::NotReady {
            stack: key.to_string(),
            detail: reason,
        }),
    }
}

fn run_config(orch: &Orchestrator, cmd: ConfigCmd) -> Result<(), StackError> {
    match cmd {
        ConfigCmd::Get { stack, key, json } => {
            let entries = orch.config_entries(&stack)?;
            let selected: Vec<_> = entries
                .into_iter()
                .filter(|e| key.as_deref().map_or(true, |k| e.key == k))
                .collect();
            if let Some(k) = key.as_deref() {
                if selected.is_empty() {
                    return Err(StackError::NotFound(format!("{stack}:{k}")));
                }
            }
            if json {
                return print_json(&selected);
            }
            for e in &selected {
                println!("{}={}", e.key, e.value);
            }
            Ok(())
        }
        ConfigCmd::Set { stack, pairs } => {
            orch.update_config(&stack, &pairs)?;
            println!("updated {} entr{} for {stack}", pairs.len(), if pairs.len() == 1 { "y" } else { "ies" });
            println!("  note: run `stackyard restart {stack}` to apply");
            Ok(())
        }
    }
}
