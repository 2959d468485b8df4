/*!
Test support shared across integration tests.

- FakeRunner: scripted CommandRunner that records every command line it sees, with its cwd
- FixedReachability: connectivity probe with a canned answer
- Sandbox: temp data dir wired to the fixture template, plus an Orchestrator over both

Scripts match on the command line prefix ("docker compose up"); the most recently
added rule wins, so a test can override a default reply.
*/

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackyard::{
    CommandRunner, ConnectivityMethod, ConsoleConfig, ExecError, ExecOutput, ExecRequest,
    MemoryStore, Orchestrator, Reachability, Store,
};

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(i32, String),
    Missing,
}

#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<(String, Option<PathBuf>)>>,
}

#[allow(dead_code)]
impl FakeRunner {
    /// Docker and compose answer their version queries; everything else succeeds silently.
    pub fn healthy() -> Self {
        let r = Self::default();
        r.on("docker --version", Reply::Ok("Docker version 27.0.3, build 7d4bcd8\n".into()));
        r.on("docker compose version", Reply::Ok("Docker Compose version v2.29.1\n".into()));
        r
    }

    pub fn on(&self, prefix: &str, reply: Reply) {
        self.rules.lock().unwrap().push((prefix.to_string(), reply));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(line, _)| line.clone()).collect()
    }

    /// Working directory of every call whose command line starts with `prefix`.
    pub fn cwds(&self, prefix: &str) -> Vec<Option<PathBuf>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(line, _)| line.starts_with(prefix))
            .map(|(_, cwd)| cwd.clone())
            .collect()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput, ExecError> {
        let line = request.command_line();
        self.calls
            .lock()
            .unwrap()
            .push((line.clone(), request.working_dir().map(Path::to_path_buf)));
        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or(Reply::Ok(String::new()));
        match reply {
            Reply::Ok(stdout) => Ok(ExecOutput {
                code: Some(0),
                duration: Duration::from_millis(1),
                stdout,
                stderr: String::new(),
            }),
            Reply::Fail(code, stderr) => Ok(ExecOutput {
                code: Some(code),
                duration: Duration::from_millis(1),
                stdout: String::new(),
                stderr,
            }),
            Reply::Missing => Err(ExecError::NotFound {
                program: request.program().to_string_lossy().to_string(),
            }),
        }
    }
}

pub struct FixedReachability(pub Option<ConnectivityMethod>);

impl Reachability for FixedReachability {
    fn probe(&self) -> Option<ConnectivityMethod> {
        self.0.clone()
    }
}

#[allow(dead_code)]
pub fn fixture_template() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("template")
}

#[allow(dead_code)]
pub fn test_config(data_dir: &Path) -> ConsoleConfig {
    ConsoleConfig {
        data_dir: data_dir.to_path_buf(),
        template_dir: Some(fixture_template()),
        host_url: "http://localhost".to_string(),
        ..ConsoleConfig::default()
    }
}

/// A temp data directory plus an orchestrator over a memory store and a fake runner.
#[allow(dead_code)]
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub runner: Arc<FakeRunner>,
    pub store: Arc<dyn Store>,
    pub orch: Orchestrator,
}

#[allow(dead_code)]
impl Sandbox {
    pub fn new(runner: FakeRunner) -> Self {
        Self::with_store(runner, Arc::new(MemoryStore::default()))
    }

    pub fn offline(runner: FakeRunner) -> Self {
        Self::build(runner, Arc::new(MemoryStore::default()), None)
    }

    pub fn with_store(runner: FakeRunner, store: Arc<dyn Store>) -> Self {
        Self::build(
            runner,
            store,
            Some(ConnectivityMethod::Http("https://example.test".into())),
        )
    }

    fn build(runner: FakeRunner, store: Arc<dyn Store>, online: Option<ConnectivityMethod>) -> Self {
        let dir = tempfile::tempdir().expect("tmpdir");
        let runner = Arc::new(runner);
        let orch = Orchestrator::new(
            test_config(dir.path()),
            Arc::clone(&store),
            runner.clone(),
            Arc::new(FixedReachability(online)),
        );
        Self {
            dir,
            runner,
            store,
            orch,
        }
    }
}

/// `docker compose ps --format json` output, one object per line.
#[allow(dead_code)]
pub fn ps_lines(slug: &str, services: &[(&str, &str)]) -> String {
    services
        .iter()
        .map(|(svc, state)| {
            format!(
                r#"{{"Name":"{slug}-{svc}","Service":"{svc}","State":"{state}","Health":""}}"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
