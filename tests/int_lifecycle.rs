mod support;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stackyard::classify::FailureCategory;
use stackyard::credentials::{verify_token, Role};
use stackyard::envfile::read_env_file;
use stackyard::preflight::PreflightFailure;
use stackyard::template::{COMPOSE_FILE, MARKER_FILE};
use stackyard::{
    ConfigEntry, MemoryStore, NewStack, Readiness, Stack, StackError, StackStatus, Store,
    StoreError,
};
use support::{ps_lines, FakeRunner, Reply, Sandbox};

const T0: u64 = 1_700_000_000_000;
const SLUG: &str = "demo-1700000000000";

fn new_stack(name: &str) -> NewStack {
    NewStack {
        name: name.to_string(),
        description: "integration".to_string(),
        owner_id: "owner-1".to_string(),
    }
}

fn env_value(entries: &[(String, String)], key: &str) -> Option<String> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

#[test]
fn test_create_materializes_template_and_env() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).expect("create");

    assert_eq!(created.stack.slug, SLUG);
    assert_eq!(created.stack.status, StackStatus::Provisioned);
    assert_eq!(created.allocation.ports.kong_http(), 8000);
    assert_eq!(created.allocation.ports.studio(), 8100);
    assert!(
        created.report.unmatched.is_empty(),
        "unmatched: {:?}",
        created.report.unmatched
    );
    assert!(created.report.project_named);
    assert!(created.report.analytics_port);
    assert!(created.report.vector_renamed);
    assert_eq!(created.report.bind_mounts, 5);

    let compose = fs::read_to_string(&created.template.compose_file).unwrap();
    assert!(compose.starts_with(&format!("name: {SLUG}\n")));
    assert!(compose.contains(&format!("container_name: {SLUG}-db")));
    assert!(compose.contains(&format!("container_name: realtime-dev.{SLUG}-realtime")));
    assert!(compose.contains("- ${ANALYTICS_PORT}:4000"));
    assert!(!compose.contains("container_name: supabase-"));
    assert!(!compose.contains("- ./volumes"));
    assert!(created.template.docker_dir.join(MARKER_FILE).is_file());

    let vector = fs::read_to_string(created.template.docker_dir.join("volumes/logs/vector.yml")).unwrap();
    assert!(vector.contains(&format!("- {SLUG}-vector")));

    let env = read_env_file(&created.template.env_file).unwrap();
    assert_eq!(env_value(&env, "KONG_HTTP_PORT").as_deref(), Some("8000"));
    assert_eq!(env_value(&env, "POSTGRES_PORT").as_deref(), Some("10000"));
    assert_eq!(
        env_value(&env, "SITE_URL").as_deref(),
        Some("http://localhost:8000")
    );
    assert_eq!(
        env_value(&env, "POOLER_TENANT_ID").as_deref(),
        Some("project-1700000000000")
    );
    let secret = env_value(&env, "JWT_SECRET").unwrap();
    assert_eq!(secret.len(), 64);

    let stored = sb.store.config_entries(&created.stack.id).unwrap();
    assert_eq!(stored.len(), env.len());

    // template itself is untouched
    let source = fs::read_to_string(support::fixture_template().join("docker").join(COMPOSE_FILE)).unwrap();
    assert!(source.starts_with("name: supabase\n"));
}

#[test]
fn test_create_rejects_same_slug_and_moves_colliding_ports() {
    let sb = Sandbox::new(FakeRunner::healthy());
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let err = sb.orch.create_stack(new_stack("Demo"), T0).unwrap_err();
    assert!(matches!(err, StackError::Alloc(_)), "got {err:?}");

    // same millisecond modulo the port span lands on the same base port
    let other = sb.orch.create_stack(new_stack("Other"), T0 + 10_000).unwrap();
    assert_ne!(other.allocation.ports.base, 8000);
    assert_eq!(sb.orch.list_stacks(None).unwrap().len(), 2);
}

#[test]
fn test_create_empty_name_leaves_nothing_behind() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let err = sb.orch.create_stack(new_stack("   "), T0).unwrap_err();
    assert!(matches!(err, StackError::Alloc(_)));
    assert!(sb.orch.list_stacks(None).unwrap().is_empty());
    assert!(!sb.orch.config().stacks_dir().join("-1700000000000").exists());
}

#[test]
fn test_create_without_template_fails_cleanly() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let mut cfg = sb.orch.config().clone();
    cfg.template_dir = Some(sb.dir.path().join("no-such-template"));
    let orch = stackyard::Orchestrator::new(
        cfg,
        Arc::new(MemoryStore::new()),
        sb.runner.clone(),
        Arc::new(support::FixedReachability(None)),
    );
    let err = orch.create_stack(new_stack("Demo"), T0).unwrap_err();
    assert!(matches!(err, StackError::Template(_)), "got {err:?}");
    assert!(orch.list_stacks(None).unwrap().is_empty());
    assert!(!orch.config().stacks_dir().join(SLUG).exists());
}

#[test]
fn test_deploy_pulls_ups_and_marks_active() {
    let runner = FakeRunner::healthy();
    runner.on(
        "docker compose ps",
        Reply::Ok(ps_lines(SLUG, &[("db", "running"), ("kong", "running")])),
    );
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let outcome = sb.orch.deploy(SLUG).expect("deploy");
    assert!(outcome.pulled);
    assert_eq!(outcome.services.len(), 2);
    assert!(outcome.preflight.docker_version.starts_with("Docker version"));
    assert!(sb.runner.called("docker compose pull"));
    assert!(sb.runner.called("docker compose up -d"));
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Active);
}

#[test]
fn test_deploy_offline_skips_pull() {
    let sb = Sandbox::offline(FakeRunner::healthy());
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    let outcome = sb.orch.deploy(SLUG).unwrap();
    assert!(!outcome.pulled);
    assert!(!sb.runner.called("docker compose pull"));
    assert!(sb.runner.called("docker compose up"));
}

#[test]
fn test_deploy_without_docker_is_preflight_failure() {
    let runner = FakeRunner::healthy();
    runner.on("docker", Reply::Missing);
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let err = sb.orch.deploy(SLUG).unwrap_err();
    assert!(
        matches!(err, StackError::Preflight(PreflightFailure::BinaryMissing { .. })),
        "got {err:?}"
    );
    assert_eq!(err.exit_code(), 127);
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Provisioned);
    assert!(!sb.runner.called("docker compose up"));
}

#[test]
fn test_deploy_without_compose_plugin() {
    let runner = FakeRunner::healthy();
    runner.on(
        "docker compose version",
        Reply::Fail(1, "docker: 'compose' is not a docker command.".into()),
    );
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    let err = sb.orch.deploy(SLUG).unwrap_err();
    assert!(matches!(
        err,
        StackError::Preflight(PreflightFailure::ComposeMissing { .. })
    ));
}

#[test]
fn test_failed_up_marks_down_and_classifies() {
    let runner = FakeRunner::healthy();
    runner.on(
        "docker compose up",
        Reply::Fail(
            1,
            "Error response from daemon: pull access denied for supabase/studio".into(),
        ),
    );
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let err = sb.orch.deploy(SLUG).unwrap_err();
    match &err {
        StackError::Subprocess(f) => assert_eq!(f.category, FailureCategory::ImageNotFound),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Down);
}

#[test]
fn test_failed_pull_still_deploys() {
    let runner = FakeRunner::healthy();
    runner.on(
        "docker compose pull",
        Reply::Fail(1, "dial tcp: lookup registry-1.docker.io: no such host".into()),
    );
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    let outcome = sb.orch.deploy(SLUG).unwrap();
    assert!(!outcome.pulled);
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Active);
}

#[test]
fn test_restart_and_pause_update_status() {
    let sb = Sandbox::new(FakeRunner::healthy());
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    sb.orch.pause(SLUG).unwrap();
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Paused);
    assert!(sb.runner.called("docker compose stop"));

    sb.orch.restart(SLUG).unwrap();
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Active);
    assert!(sb.runner.called("docker compose restart"));
}

#[test]
fn test_compose_runs_inside_the_stack_copy() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    sb.orch.deploy(SLUG).unwrap();
    sb.orch.refresh_status(SLUG).unwrap();
    sb.orch.restart(SLUG).unwrap();
    sb.orch.pause(SLUG).unwrap();
    sb.orch.delete(SLUG).unwrap();

    let expected = sb.orch.config().stacks_dir().join(SLUG).join("docker");
    assert_eq!(created.template.docker_dir, expected);
    let template_docker = support::fixture_template().join("docker");
    for verb in ["pull", "up", "ps", "restart", "stop", "down"] {
        let cwds = sb.runner.cwds(&format!("docker compose {verb}"));
        assert!(!cwds.is_empty(), "no `compose {verb}` call recorded");
        for cwd in cwds {
            assert_eq!(cwd.as_deref(), Some(expected.as_path()), "compose {verb}");
            assert_ne!(cwd.as_deref(), Some(template_docker.as_path()));
        }
    }
}

#[test]
fn test_refresh_status_derives_degraded() {
    let runner = FakeRunner::healthy();
    runner.on(
        "docker compose ps",
        Reply::Ok(ps_lines(SLUG, &[("db", "running"), ("kong", "exited")])),
    );
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    sb.orch.deploy(SLUG).unwrap();

    let (status, services) = sb.orch.refresh_status(SLUG).unwrap();
    assert_eq!(status, StackStatus::Degraded);
    assert_eq!(services[1].health, "N/A");
    assert_eq!(sb.orch.find(SLUG).unwrap().status, StackStatus::Degraded);
}

#[test]
fn test_status_of_unknown_stack() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let err = sb.orch.get_status("nope").unwrap_err();
    assert!(matches!(err, StackError::NotFound(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_wait_ready_outcomes() {
    let runner = FakeRunner::healthy();
    runner.on("docker compose ps", Reply::Ok(ps_lines(SLUG, &[("db", "running")])));
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let ready = sb
        .orch
        .wait_ready(SLUG, Duration::from_millis(5), Duration::from_secs(2))
        .unwrap();
    assert!(matches!(ready, Readiness::Ready(ref s) if s.len() == 1));

    sb.runner
        .on("docker compose ps", Reply::Ok(ps_lines(SLUG, &[("db", "starting")])));
    let pending = sb
        .orch
        .wait_ready(SLUG, Duration::from_millis(5), Duration::from_millis(30))
        .unwrap();
    assert!(matches!(pending, Readiness::TimedOut(ref s) if s[0].state == "starting"));

    sb.runner
        .on("docker compose ps", Reply::Fail(1, "permission denied".into()));
    let failed = sb
        .orch
        .wait_ready(SLUG, Duration::from_millis(5), Duration::from_secs(2))
        .unwrap();
    assert!(matches!(failed, Readiness::NotReady(_)));
}

#[test]
fn test_update_config_regenerates_env() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    sb.orch
        .update_config(
            SLUG,
            &[
                ("SMTP_HOST".to_string(), "mail.internal".to_string()),
                ("EXTRA_FLAG".to_string(), "on".to_string()),
            ],
        )
        .unwrap();
    let env = read_env_file(&created.template.env_file).unwrap();
    assert_eq!(env_value(&env, "SMTP_HOST").as_deref(), Some("mail.internal"));
    assert_eq!(env_value(&env, "EXTRA_FLAG").as_deref(), Some("on"));
    assert_eq!(env_value(&env, "KONG_HTTP_PORT").as_deref(), Some("8000"));

    let bad = sb
        .orch
        .update_config(SLUG, &[("BROKEN".to_string(), "a\nb".to_string())])
        .unwrap_err();
    assert!(matches!(bad, StackError::InvalidConfig { .. }), "got {bad:?}");
    assert!(bad.remediation().contains("KEY=VALUE"));
    let env = read_env_file(&created.template.env_file).unwrap();
    assert!(env_value(&env, "BROKEN").is_none());
}

/// Memory store whose config upserts fail once armed.
#[derive(Default)]
struct ReadOnlyConfigStore {
    inner: MemoryStore,
    armed: AtomicBool,
}

impl Store for ReadOnlyConfigStore {
    fn create_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        self.inner.create_stack(stack)
    }
    fn find_stack(&self, id: &str) -> Result<Option<Stack>, StoreError> {
        self.inner.find_stack(id)
    }
    fn find_stack_by_slug(&self, slug: &str) -> Result<Option<Stack>, StoreError> {
        self.inner.find_stack_by_slug(slug)
    }
    fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StoreError> {
        self.inner.list_stacks(owner)
    }
    fn update_status(&self, id: &str, status: StackStatus) -> Result<(), StoreError> {
        self.inner.update_status(id, status)
    }
    fn delete_stack(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_stack(id)
    }
    fn config_entries(&self, stack_id: &str) -> Result<Vec<ConfigEntry>, StoreError> {
        self.inner.config_entries(stack_id)
    }
    fn upsert_config(&self, stack_id: &str, pairs: &[(String, String)]) -> Result<(), StoreError> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("read-only".into()));
        }
        self.inner.upsert_config(stack_id, pairs)
    }
    fn delete_config(&self, stack_id: &str) -> Result<usize, StoreError> {
        self.inner.delete_config(stack_id)
    }
}

#[test]
fn test_failed_config_commit_keeps_env_in_step() {
    let store = Arc::new(ReadOnlyConfigStore::default());
    let sb = Sandbox::with_store(FakeRunner::healthy(), store.clone());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    let before = read_env_file(&created.template.env_file).unwrap();

    store.armed.store(true, Ordering::SeqCst);
    let err = sb
        .orch
        .update_config(SLUG, &[("SMTP_HOST".to_string(), "mail.internal".to_string())])
        .unwrap_err();
    assert!(matches!(err, StackError::Store(_)), "got {err:?}");
    let err = sb.orch.rotate_keys(SLUG, T0 + 60_000).unwrap_err();
    assert!(matches!(err, StackError::Store(_)), "got {err:?}");

    let after = read_env_file(&created.template.env_file).unwrap();
    assert_eq!(after, before);
    let stored = store.config_entries(&created.stack.id).unwrap();
    assert_eq!(stored.len(), after.len());
    assert!(stored.iter().all(|e| e.key != "SMTP_HOST" || e.value != "mail.internal"));
    assert_eq!(env_value(&after, "ANON_KEY"), env_value(&before, "ANON_KEY"));
}

#[test]
fn test_rotate_keys_reuses_stored_secret() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();
    let before = read_env_file(&created.template.env_file).unwrap();
    let secret = env_value(&before, "JWT_SECRET").unwrap();

    let rotated = sb.orch.rotate_keys(SLUG, T0 + 60_000).unwrap();
    assert!(rotated.secret_reused);
    let anon = verify_token(&rotated.tokens.anon_key, &secret).unwrap();
    assert_eq!(anon.role, Role::Anon);
    let service = verify_token(&rotated.tokens.service_role_key, &secret).unwrap();
    assert_eq!(service.role, Role::ServiceRole);

    let after = read_env_file(&created.template.env_file).unwrap();
    assert_eq!(env_value(&after, "JWT_SECRET"), Some(secret));
    assert_eq!(
        env_value(&after, "ANON_KEY").as_deref(),
        Some(rotated.tokens.anon_key.as_str())
    );
}

#[test]
fn test_delete_twice_reports_not_found() {
    let sb = Sandbox::new(FakeRunner::healthy());
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let report = sb.orch.delete(SLUG).unwrap();
    assert!(report.containers_removed);
    assert!(report.files_removed);
    assert!(sb.runner.called("docker compose down --volumes"));
    assert!(!created.template.root.exists());
    assert!(sb.store.config_entries(&created.stack.id).unwrap().is_empty());
    assert!(!sb.orch.config().locks_dir().join(format!("{SLUG}.lock")).exists());

    let err = sb.orch.delete(SLUG).unwrap_err();
    assert!(matches!(err, StackError::NotFound(_)));
}

#[test]
fn test_delete_continues_when_down_fails() {
    let runner = FakeRunner::healthy();
    runner.on("docker compose down", Reply::Fail(1, "daemon unreachable".into()));
    let sb = Sandbox::new(runner);
    sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let report = sb.orch.delete(SLUG).unwrap();
    assert!(!report.containers_removed);
    assert!(report.files_removed);
    assert!(sb.orch.list_stacks(None).unwrap().is_empty());
}

/// Memory store whose stack deletion always fails.
#[derive(Default)]
struct StuckStore(MemoryStore);

impl Store for StuckStore {
    fn create_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        self.0.create_stack(stack)
    }
    fn find_stack(&self, id: &str) -> Result<Option<Stack>, StoreError> {
        self.0.find_stack(id)
    }
    fn find_stack_by_slug(&self, slug: &str) -> Result<Option<Stack>, StoreError> {
        self.0.find_stack_by_slug(slug)
    }
    fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StoreError> {
        self.0.list_stacks(owner)
    }
    fn update_status(&self, id: &str, status: StackStatus) -> Result<(), StoreError> {
        self.0.update_status(id, status)
    }
    fn delete_stack(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Corrupt("disk full".into()))
    }
    fn config_entries(&self, stack_id: &str) -> Result<Vec<ConfigEntry>, StoreError> {
        self.0.config_entries(stack_id)
    }
    fn upsert_config(&self, stack_id: &str, pairs: &[(String, String)]) -> Result<(), StoreError> {
        self.0.upsert_config(stack_id, pairs)
    }
    fn delete_config(&self, stack_id: &str) -> Result<usize, StoreError> {
        self.0.delete_config(stack_id)
    }
}

#[test]
fn test_delete_with_stuck_records_is_inconsistent() {
    let sb = Sandbox::with_store(FakeRunner::healthy(), Arc::new(StuckStore::default()));
    let created = sb.orch.create_stack(new_stack("Demo"), T0).unwrap();

    let err = sb.orch.delete(SLUG).unwrap_err();
    assert!(
        matches!(err, StackError::InconsistentState { .. }),
        "got {err:?}"
    );
    assert_eq!(err.exit_code(), 3);
    assert!(!created.template.root.exists());
    assert!(sb.orch.find(SLUG).is_ok());
    // the record survives, so its lock stays for the retry
    assert!(sb.orch.config().locks_dir().join(format!("{SLUG}.lock")).exists());
}

#[test]
fn test_list_filters_by_owner_newest_first() {
    let sb = Sandbox::new(FakeRunner::healthy());
    sb.orch.create_stack(new_stack("First"), T0).unwrap();
    sb.orch
        .create_stack(
            NewStack {
                owner_id: "someone-else".into(),
                ..new_stack("Second")
            },
            T0 + 1,
        )
        .unwrap();
    sb.orch.create_stack(new_stack("Third"), T0 + 2).unwrap();

    let all = sb.orch.list_stacks(None).unwrap();
    let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Third", "Second", "First"]);

    let mine = sb.orch.list_stacks(Some("owner-1")).unwrap();
    assert_eq!(mine.len(), 2);
}
