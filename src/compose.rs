//! `docker compose` verbs against one materialized stack.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{classify, ClassifiedFailure};
use crate::config::Timeouts;
use crate::util::exec::{CommandRunner, ExecOutput, ExecRequest};
use crate::util::non_empty_lines;

/// One service row from `docker compose ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub service: String,
    pub state: String,
    pub health: String,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

#[derive(Deserialize)]
struct PsRow {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Service", default)]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

impl From<PsRow> for ServiceState {
    fn from(row: PsRow) -> Self {
        let health = if row.health.trim().is_empty() {
            "N/A".to_string()
        } else {
            row.health
        };
        // older compose releases leave Name out of the json rows
        let name = if row.name.trim().is_empty() {
            row.service.clone()
        } else {
            row.name
        };
        Self {
            name,
            service: row.service,
            state: row.state,
            health,
        }
    }
}

/// Parse `ps --format json`, which is a JSON array on older compose releases and one object
/// per line on newer ones.
pub fn parse_ps_output(text: &str) -> Result<Vec<ServiceState>, serde_json::Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        let rows: Vec<PsRow> = serde_json::from_str(trimmed)?;
        return Ok(rows.into_iter().map(ServiceState::from).collect());
    }
    non_empty_lines(trimmed)
        .map(|line| serde_json::from_str::<PsRow>(line).map(ServiceState::from))
        .collect()
}

/// Compose commands scoped to a stack's docker directory.
pub struct Compose<'a> {
    runner: &'a dyn CommandRunner,
    docker: &'a str,
    timeouts: &'a Timeouts,
    dir: &'a Path,
}

impl<'a> Compose<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        docker: &'a str,
        timeouts: &'a Timeouts,
        dir: &'a Path,
    ) -> Self {
        Self {
            runner,
            docker,
            timeouts,
            dir,
        }
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<ExecOutput, ClassifiedFailure> {
        let req = ExecRequest::new(self.docker)
            .arg("compose")
            .args(args)
            .cwd(self.dir)
            .timeout(timeout);
        tracing::debug!(cmd = %req.command_line(), dir = %self.dir.display(), "compose");
        let out = self
            .runner
            .run(req)
            .map_err(|e| classify(&e.to_string()))?;
        if out.success() {
            Ok(out)
        } else {
            Err(classify(&out.failure_text()))
        }
    }

    pub fn pull(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["pull"], self.timeouts.pull)
    }

    pub fn up(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["up", "-d", "--remove-orphans"], self.timeouts.up)
    }

    pub fn restart(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["restart"], self.timeouts.restart)
    }

    pub fn stop(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["stop"], self.timeouts.stop)
    }

    pub fn down(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["down", "--volumes", "--remove-orphans"], self.timeouts.down)
    }

    /// Raw `ps --format json` output.
    pub fn ps_raw(&self) -> Result<ExecOutput, ClassifiedFailure> {
        self.run(&["ps", "--format", "json"], self.timeouts.query)
    }
}
