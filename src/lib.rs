//! Stackyard: provisions isolated copies of a docker-compose template ("stacks"), one per
//! tenant, and drives their lifecycle through the docker CLI.
//!
//! The [`lifecycle::Orchestrator`] is the entry point. It talks to the outside world only
//! through three seams: a [`Store`] for records, a [`CommandRunner`] for subprocesses and a
//! [`Reachability`] probe for internet access.

pub mod alloc;
pub mod classify;
pub mod compose;
pub mod config;
pub mod credentials;
pub mod envfile;
pub mod errors;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod poll;
pub mod preflight;
pub mod store;
pub mod template;
pub mod util;

pub use alloc::{Allocation, PortAllocation, PortLedger, PortRole};
pub use classify::{ClassifiedFailure, FailureCategory};
pub use compose::ServiceState;
pub use config::{ConfigError, ConsoleConfig, Timeouts};
pub use credentials::{CredentialSet, Role, TokenPair};
pub use errors::StackError;
pub use lifecycle::{NewStack, Orchestrator, Readiness};
pub use metrics::{Collector, HostMemory, StackAnalysis};
pub use preflight::{ConnectivityMethod, NetworkReachability, Reachability};
pub use store::{ConfigEntry, JsonFileStore, MemoryStore, Stack, StackStatus, Store, StoreError};
pub use util::exec::{CommandRunner, ExecError, ExecOutput, ExecRequest, ExecService};
