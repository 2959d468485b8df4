//! Error mapping guide:
//! - Missing docker binary exits 127, inconsistent state 3, unknown stack 2, everything else 1.
//! - Every variant has a remediation hint; the CLI prints message then hint.
use std::io;

use thiserror::Error;

use crate::alloc::AllocError;
use crate::classify::{ClassifiedFailure, FailureCategory};
use crate::credentials::CredentialError;
use crate::lock::LockError;
use crate::preflight::PreflightFailure;
use crate::store::StoreError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("stack {0} not found")]
    NotFound(String),
    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightFailure),
    #[error("{0}")]
    Subprocess(ClassifiedFailure),
    #[error("cannot parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    /// Infrastructure is gone but the records could not be removed.
    #[error("stack {stack} is in an inconsistent state: {detail}")]
    InconsistentState { stack: String, detail: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("invalid config entry: {detail}")]
    InvalidConfig { detail: String },
    #[error("stack {stack} is not ready: {detail}")]
    NotReady { stack: String, detail: String },
    #[error("another lifecycle operation holds stack {slug}")]
    LifecycleBusy { slug: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl From<ClassifiedFailure> for StackError {
    fn from(f: ClassifiedFailure) -> Self {
        StackError::Subprocess(f)
    }
}

impl StackError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> StackError {
        let context = context.into();
        move |source| StackError::Io { context, source }
    }

    pub(crate) fn from_lock(slug: &str, e: LockError) -> StackError {
        match e {
            LockError::Busy { .. } => StackError::LifecycleBusy {
                slug: slug.to_string(),
            },
            LockError::Io { path, source } => StackError::Io {
                context: format!("lock {}", path.display()),
                source,
            },
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            StackError::NotFound(_) => "Run `stackyard list` to see existing stacks.",
            StackError::Preflight(p) => p.remediation(),
            StackError::Subprocess(f) => f.remediation(),
            StackError::Parse { .. } => {
                "Docker returned output in an unexpected format; check the docker compose version."
            }
            StackError::InconsistentState { .. } => {
                "Containers and files were removed but records remain; retry the delete."
            }
            StackError::Template(TemplateError::MissingTemplate(_)) => {
                "Run `stackyard template-init` or set STACKYARD_TEMPLATE_DIR."
            }
            StackError::Template(_) => "Check the template directory and disk space, then retry.",
            StackError::Alloc(_) => "Choose a different stack name or retry in a moment.",
            StackError::Store(_) => "Check the data directory permissions and its state.json file.",
            StackError::Credentials(_) => "The OS random source failed; retry.",
            StackError::InvalidConfig { .. } => {
                "Use KEY=VALUE with a non-empty key and single-line values."
            }
            StackError::NotReady { .. } => {
                "Inspect the failing services with `docker compose logs` in the stack directory."
            }
            StackError::LifecycleBusy { .. } => {
                "Wait for the running operation on this stack to finish, then retry."
            }
            StackError::Io { .. } => "Check file permissions under the data directory.",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            StackError::Preflight(PreflightFailure::BinaryMissing { .. }) => 127,
            StackError::Subprocess(f) if f.category == FailureCategory::BinaryNotFound => 127,
            StackError::InconsistentState { .. } => 3,
            StackError::NotFound(_) => 2,
            _ => 1,
        }
    }
}

/// Message and hint as printed by the CLI.
pub fn display_for_stack_error(e: &StackError) -> String {
    format!("{e}\n  hint: {}", e.remediation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    #[test]
    fn exit_codes() {
        assert_eq!(StackError::NotFound("x".into()).exit_code(), 2);
        assert_eq!(
            StackError::InconsistentState {
                stack: "x".into(),
                detail: "d".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            StackError::Preflight(PreflightFailure::BinaryMissing {
                program: "docker".into()
            })
            .exit_code(),
            127
        );
        assert_eq!(
            StackError::from(classify("docker: command not found")).exit_code(),
            127
        );
        assert_eq!(StackError::from(classify("boom")).exit_code(), 1);
    }

    #[test]
    fn invalid_config_is_not_a_file_problem() {
        let e = StackError::InvalidConfig {
            detail: "env entry 0 (\"A\") cannot be written".into(),
        };
        assert_eq!(e.exit_code(), 1);
        assert!(e.to_string().starts_with("invalid config entry"));
        assert!(!e.remediation().contains("permissions"));
    }

    #[test]
    fn display_includes_hint() {
        let text = display_for_stack_error(&StackError::LifecycleBusy { slug: "s-1".into() });
        assert!(text.contains("s-1"));
        assert!(text.contains("hint: Wait"));
    }
}
