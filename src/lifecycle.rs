//! Stack lifecycle: create, deploy, restart, pause, delete, status, config edits, key rotation.
//!
//! Writes to one stack are serialized through `<data_dir>/locks/<slug>.lock`. Different stacks
//! never contend. Creation also holds `<data_dir>/locks/.create.lock` so that concurrent
//! processes see each other's port blocks. Status reads take no lock.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::alloc::{Allocation, PortLedger};
use crate::compose::{parse_ps_output, Compose, ServiceState};
use crate::config::ConsoleConfig;
use crate::credentials::{
    generate_secret, CredentialError, CredentialSet, RandomError, TokenPair, JWT_SECRET_LEN,
};
use crate::envfile::{default_entries, render, write_env_file};
use crate::errors::StackError;
use crate::lock::{acquire_lock_at, create_lock_path, stack_lock_path, FileLock};
use crate::metrics::Collector;
use crate::poll::{poll_until, PollOutcome, Probe};
use crate::preflight::{run_preflight, NetworkReachability, PreflightReport, Reachability};
use crate::store::{ConfigEntry, JsonFileStore, Stack, StackStatus, Store};
use crate::template::{self, MaterializedTemplate, RewriteReport};
use crate::util::exec::{CommandRunner, ExecService};
use crate::util::fs::remove_tree;
use crate::util::id::create_stack_id;

/// Input for [`Orchestrator::create_stack`].
#[derive(Debug, Clone, Default)]
pub struct NewStack {
    pub name: String,
    pub description: String,
    pub owner_id: String,
}

#[derive(Debug, Clone)]
pub struct CreatedStack {
    pub stack: Stack,
    pub allocation: Allocation,
    pub template: MaterializedTemplate,
    pub report: RewriteReport,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub preflight: PreflightReport,
    pub pulled: bool,
    /// Services seen right after `up`; empty when verification failed.
    pub services: Vec<ServiceState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub containers_removed: bool,
    pub files_removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(Vec<ServiceState>),
    /// Status could not be read; carries the reason.
    NotReady(String),
    TimedOut(Vec<ServiceState>),
}

#[derive(Debug, Clone)]
pub struct RotatedKeys {
    pub secret_reused: bool,
    pub tokens: TokenPair,
}

/// Status implied by a `ps` snapshot, given the status currently stored.
pub fn derive_status(current: StackStatus, services: &[ServiceState]) -> StackStatus {
    let running = services.iter().filter(|s| s.is_running()).count();
    if running == 0 {
        return match current {
            StackStatus::Created | StackStatus::Provisioned | StackStatus::Paused => current,
            _ => StackStatus::Down,
        };
    }
    if running == services.len() {
        StackStatus::Active
    } else {
        StackStatus::Degraded
    }
}

fn random_failure(e: getrandom::Error) -> StackError {
    StackError::Credentials(CredentialError::Random(RandomError::from(e)))
}

pub struct Orchestrator {
    config: ConsoleConfig,
    store: Arc<dyn Store>,
    runner: Arc<dyn CommandRunner>,
    reach: Arc<dyn Reachability>,
}

impl Orchestrator {
    pub fn new(
        config: ConsoleConfig,
        store: Arc<dyn Store>,
        runner: Arc<dyn CommandRunner>,
        reach: Arc<dyn Reachability>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            reach,
        }
    }

    /// Real subprocesses, the JSON store under the data directory and network probes.
    pub fn from_config(config: ConsoleConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ExecService::new(config.timeouts.query));
        let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(config.store_path()));
        let reach: Arc<dyn Reachability> = Arc::new(NetworkReachability::new(
            config.connectivity.clone(),
            config.docker.clone(),
            Arc::clone(&runner),
        ));
        Self::new(config, store, runner, reach)
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn reachability(&self) -> &dyn Reachability {
        self.reach.as_ref()
    }

    pub fn collector(&self) -> Collector<'_> {
        Collector::new(self.runner.as_ref(), &self.config)
    }

    /// Look a stack up by id, then by slug.
    pub fn find(&self, key: &str) -> Result<Stack, StackError> {
        if let Some(s) = self.store.find_stack(key)? {
            return Ok(s);
        }
        self.store
            .find_stack_by_slug(key)?
            .ok_or_else(|| StackError::NotFound(key.to_string()))
    }

    fn lock(&self, slug: &str) -> Result<FileLock, StackError> {
        let path = stack_lock_path(&self.config.locks_dir(), slug);
        acquire_lock_at(&path, self.config.timeouts.lock_wait)
            .map_err(|e| StackError::from_lock(slug, e))
    }

    /// Find and lock a stack, then re-read it: a delete may have won the lock first.
    fn locked(&self, key: &str) -> Result<(Stack, FileLock), StackError> {
        let found = self.find(key)?;
        let guard = self.lock(&found.slug)?;
        let stack = self
            .store
            .find_stack(&found.id)?
            .ok_or_else(|| StackError::NotFound(key.to_string()))?;
        Ok((stack, guard))
    }

    fn materialized(&self, stack: &Stack) -> Result<MaterializedTemplate, StackError> {
        let t = MaterializedTemplate::locate(&self.config, &stack.slug);
        if !t.exists() {
            return Err(StackError::InconsistentState {
                stack: stack.slug.clone(),
                detail: format!("{} is missing", t.compose_file.display()),
            });
        }
        Ok(t)
    }

    fn compose<'a>(&'a self, t: &'a MaterializedTemplate) -> Compose<'a> {
        Compose::new(
            self.runner.as_ref(),
            &self.config.docker,
            &self.config.timeouts,
            &t.docker_dir,
        )
    }

    fn set_status(&self, stack: &Stack, status: StackStatus) -> Result<(), StackError> {
        tracing::info!(slug = %stack.slug, %status, "stack status");
        self.store.update_status(&stack.id, status)?;
        Ok(())
    }

    fn ledger(&self) -> Result<PortLedger, StackError> {
        let mut ledger = PortLedger::new();
        for s in self.store.list_stacks(None)? {
            let entries = self.store.config_entries(&s.id)?;
            ledger.record_config(entries.iter().map(|e| (e.key.as_str(), e.value.as_str())));
            ledger.record_slug(s.slug);
        }
        Ok(ledger)
    }

    /// Rewrite `.env` from every stored entry of the stack.
    fn regenerate_env(&self, stack: &Stack, t: &MaterializedTemplate) -> Result<(), StackError> {
        let pairs: Vec<(String, String)> = self
            .store
            .config_entries(&stack.id)?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect();
        write_env_file(&t.env_file, &pairs).map_err(StackError::io(format!(
            "write {}",
            t.env_file.display()
        )))
    }

    /// Write `.env` from the stored entries with `updates` applied, then commit `updates`.
    /// A failed commit puts `.env` back to the stored set.
    fn apply_config(
        &self,
        stack: &Stack,
        t: &MaterializedTemplate,
        updates: &[(String, String)],
    ) -> Result<(), StackError> {
        let mut pairs: Vec<(String, String)> = self
            .store
            .config_entries(&stack.id)?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect();
        for (key, value) in updates {
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => pairs.push((key.clone(), value.clone())),
            }
        }
        write_env_file(&t.env_file, &pairs).map_err(StackError::io(format!(
            "write {}",
            t.env_file.display()
        )))?;
        if let Err(e) = self.store.upsert_config(&stack.id, updates) {
            if let Err(restore) = self.regenerate_env(stack, t) {
                tracing::warn!(slug = %stack.slug, error = %restore, "could not restore .env");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Allocate, materialize and record a new stack. Nothing persists if any step fails.
    #[tracing::instrument(level = "info", skip(self, req), fields(name = %req.name), err)]
    pub fn create_stack(&self, req: NewStack, now_ms: u64) -> Result<CreatedStack, StackError> {
        let _creating = acquire_lock_at(
            &create_lock_path(&self.config.locks_dir()),
            self.config.timeouts.lock_wait,
        )
        .map_err(|e| StackError::from_lock("create", e))?;
        let allocation = self.ledger()?.allocate(&req.name, now_ms)?;
        let creds = CredentialSet::generate(now_ms)?;
        let id = create_stack_id().map_err(random_failure)?;
        let _guard = self.lock(&allocation.slug)?;

        let (template, report) = template::materialize(&self.config, &allocation.slug)?;
        let stack = Stack {
            id,
            name: req.name.trim().to_string(),
            slug: allocation.slug.clone(),
            description: req.description,
            status: StackStatus::Created,
            created_at_ms: now_ms,
            owner_id: req.owner_id,
        };

        if let Err(e) = self.store.create_stack(&stack) {
            self.discard_files(&template);
            return Err(e.into());
        }
        let entries = default_entries(&allocation, &creds, self.config.host_url_base());
        let provisioned = self
            .store
            .upsert_config(&stack.id, &entries)
            .map_err(StackError::from)
            .and_then(|()| {
                write_env_file(&template.env_file, &entries).map_err(StackError::io(format!(
                    "write {}",
                    template.env_file.display()
                )))
            })
            .and_then(|()| self.set_status(&stack, StackStatus::Provisioned));
        if let Err(e) = provisioned {
            tracing::warn!(slug = %stack.slug, error = %e, "provisioning failed; rolling back");
            if let Err(cleanup) = self.store.delete_config(&stack.id) {
                tracing::warn!(error = %cleanup, "could not remove config entries");
            }
            if let Err(cleanup) = self.store.delete_stack(&stack.id) {
                tracing::warn!(error = %cleanup, "could not remove stack record");
            }
            self.discard_files(&template);
            return Err(e);
        }

        tracing::info!(slug = %stack.slug, base_port = allocation.ports.base, "stack provisioned");
        Ok(CreatedStack {
            stack: Stack {
                status: StackStatus::Provisioned,
                ..stack
            },
            allocation,
            template,
            report,
        })
    }

    fn discard_files(&self, t: &MaterializedTemplate) {
        if let Err(e) = remove_tree(&t.root) {
            tracing::warn!(dir = %t.root.display(), error = %e, "could not remove stack directory");
        }
    }

    pub fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StackError> {
        Ok(self.store.list_stacks(owner)?)
    }

    /// Preflight, optional pull, `up`, verification.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub fn deploy(&self, key: &str) -> Result<DeployOutcome, StackError> {
        let (stack, _guard) = self.locked(key)?;
        let t = self.materialized(&stack)?;

        let preflight = run_preflight(
            self.runner.as_ref(),
            &self.config.docker,
            self.config.timeouts.query,
            self.reach.as_ref(),
        )?;
        self.set_status(&stack, StackStatus::Deploying)?;
        let compose = self.compose(&t);

        let mut pulled = false;
        if preflight.online() {
            match compose.pull() {
                Ok(_) => pulled = true,
                Err(f) => tracing::warn!(slug = %stack.slug, error = %f, "image pull failed; continuing with local images"),
            }
        } else {
            tracing::warn!(slug = %stack.slug, "offline; skipping image pull");
        }

        if let Err(f) = compose.up() {
            tracing::warn!(slug = %stack.slug, error = %f, "compose up failed");
            self.set_status(&stack, StackStatus::Down)?;
            return Err(f.into());
        }

        let services = match compose.ps_raw() {
            Ok(out) => parse_ps_output(&out.stdout).unwrap_or_else(|e| {
                tracing::warn!(slug = %stack.slug, error = %e, "cannot parse service list after up");
                Vec::new()
            }),
            Err(f) => {
                tracing::warn!(slug = %stack.slug, error = %f, "cannot list services after up");
                Vec::new()
            }
        };
        let running = services.iter().filter(|s| s.is_running()).count();
        tracing::info!(slug = %stack.slug, running, total = services.len(), "deploy verified");

        self.set_status(&stack, StackStatus::Active)?;
        Ok(DeployOutcome {
            preflight,
            pulled,
            services,
        })
    }

    pub fn restart(&self, key: &str) -> Result<(), StackError> {
        let (stack, _guard) = self.locked(key)?;
        let t = self.materialized(&stack)?;
        self.compose(&t).restart()?;
        self.set_status(&stack, StackStatus::Active)
    }

    pub fn pause(&self, key: &str) -> Result<(), StackError> {
        let (stack, _guard) = self.locked(key)?;
        let t = self.materialized(&stack)?;
        self.compose(&t).stop()?;
        self.set_status(&stack, StackStatus::Paused)
    }

    /// Tear down containers and files (best effort), then remove the records (strict).
    #[tracing::instrument(level = "info", skip(self), err)]
    pub fn delete(&self, key: &str) -> Result<DeleteReport, StackError> {
        let (stack, guard) = self.locked(key)?;
        let t = MaterializedTemplate::locate(&self.config, &stack.slug);

        let containers_removed = if t.exists() {
            match self.compose(&t).down() {
                Ok(_) => true,
                Err(f) => {
                    tracing::warn!(slug = %stack.slug, error = %f, "compose down failed; continuing");
                    false
                }
            }
        } else {
            tracing::warn!(slug = %stack.slug, "no compose file; skipping compose down");
            false
        };

        let files_removed = match remove_tree(&t.root) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(slug = %stack.slug, error = %e, "cannot remove stack directory; continuing");
                false
            }
        };

        let records = self
            .store
            .delete_config(&stack.id)
            .and_then(|_| self.store.delete_stack(&stack.id));
        if let Err(e) = records {
            return Err(StackError::InconsistentState {
                stack: stack.slug,
                detail: e.to_string(),
            });
        }

        if let Err(e) = guard.remove() {
            tracing::warn!(slug = %stack.slug, error = %e, "cannot remove lock file");
        }
        tracing::info!(slug = %stack.slug, "stack deleted");
        Ok(DeleteReport {
            containers_removed,
            files_removed,
        })
    }

    fn services(&self, stack: &Stack) -> Result<Vec<ServiceState>, StackError> {
        let t = self.materialized(stack)?;
        let out = self.compose(&t).ps_raw()?;
        parse_ps_output(&out.stdout).map_err(|e| StackError::Parse {
            what: "docker compose ps output",
            detail: e.to_string(),
        })
    }

    pub fn get_status(&self, key: &str) -> Result<Vec<ServiceState>, StackError> {
        let stack = self.find(key)?;
        self.services(&stack)
    }

    /// Re-derive the stored status from what is actually running.
    pub fn refresh_status(&self, key: &str) -> Result<(StackStatus, Vec<ServiceState>), StackError> {
        let stack = self.find(key)?;
        let services = self.services(&stack)?;
        let status = derive_status(stack.status, &services);
        if status != stack.status {
            self.set_status(&stack, status)?;
        }
        Ok((status, services))
    }

    /// Poll until every service runs or `deadline` passes.
    pub fn wait_ready(
        &self,
        key: &str,
        interval: Duration,
        deadline: Duration,
    ) -> Result<Readiness, StackError> {
        let stack = self.find(key)?;
        let outcome = poll_until(interval, deadline, || match self.services(&stack) {
            Ok(s) if !s.is_empty() && s.iter().all(ServiceState::is_running) => Probe::Ready(s),
            Ok(s) => Probe::Pending(s),
            Err(e) => Probe::Failed(e.to_string()),
        });
        Ok(match outcome {
            PollOutcome::Ready(s) => Readiness::Ready(s),
            PollOutcome::Failed(msg) => Readiness::NotReady(msg),
            PollOutcome::TimedOut(last) => Readiness::TimedOut(last.unwrap_or_default()),
        })
    }

    pub fn config_entries(&self, key: &str) -> Result<Vec<ConfigEntry>, StackError> {
        let stack = self.find(key)?;
        Ok(self.store.config_entries(&stack.id)?)
    }

    /// Rewrite `.env` with the entries applied, then upsert them.
    pub fn update_config(&self, key: &str, entries: &[(String, String)]) -> Result<(), StackError> {
        render(entries).map_err(|e| StackError::InvalidConfig {
            detail: e.to_string(),
        })?;
        let (stack, _guard) = self.locked(key)?;
        let t = self.materialized(&stack)?;
        self.apply_config(&stack, &t, entries)?;
        tracing::info!(slug = %stack.slug, count = entries.len(), "config updated");
        Ok(())
    }

    /// Re-issue both role tokens from the stored signing secret (generated if absent).
    pub fn rotate_keys(&self, key: &str, now_ms: u64) -> Result<RotatedKeys, StackError> {
        let (stack, _guard) = self.locked(key)?;
        let t = self.materialized(&stack)?;

        let stored = self
            .store
            .config_entries(&stack.id)?
            .into_iter()
            .find(|e| e.key == "JWT_SECRET" && !e.value.is_empty())
            .map(|e| e.value);
        let secret_reused = stored.is_some();
        let secret = match stored {
            Some(s) => s,
            None => generate_secret(JWT_SECRET_LEN).map_err(CredentialError::from)?,
        };
        let tokens = TokenPair::issue(&secret, now_ms).map_err(CredentialError::from)?;

        self.apply_config(
            &stack,
            &t,
            &[
                ("JWT_SECRET".to_string(), secret),
                ("ANON_KEY".to_string(), tokens.anon_key.clone()),
                ("SERVICE_ROLE_KEY".to_string(), tokens.service_role_key.clone()),
            ],
        )?;
        tracing::info!(slug = %stack.slug, secret_reused, "keys rotated");
        Ok(RotatedKeys {
            secret_reused,
            tokens,
        })
    }
}
