//! Record store for stacks and their config entries.
//!
//! The relational database behind the console is modelled as a small key-value record store:
//! CRUD for [`Stack`], and find/upsert/delete-many for [`ConfigEntry`] keyed by
//! `(stack_id, key)`.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackStatus {
    Created,
    Provisioned,
    Deploying,
    Active,
    Degraded,
    Down,
    Paused,
    Deleted,
}

impl StackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StackStatus::Created => "created",
            StackStatus::Provisioned => "provisioned",
            StackStatus::Deploying => "deploying",
            StackStatus::Active => "active",
            StackStatus::Degraded => "degraded",
            StackStatus::Down => "down",
            StackStatus::Paused => "paused",
            StackStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "created" => StackStatus::Created,
            "provisioned" => StackStatus::Provisioned,
            "deploying" => StackStatus::Deploying,
            "active" => StackStatus::Active,
            "degraded" => StackStatus::Degraded,
            "down" => StackStatus::Down,
            "paused" => StackStatus::Paused,
            "deleted" => StackStatus::Deleted,
            other => return Err(format!("unknown stack status: {other}")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub status: StackStatus,
    pub created_at_ms: u64,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub stack_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stack {0} already exists")]
    Duplicate(String),
    #[error("stack {0} not found")]
    Missing(String),
    #[error("store I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store data is corrupt: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

pub trait Store: Send + Sync {
    /// Insert a new stack; fails on duplicate id or slug.
    fn create_stack(&self, stack: &Stack) -> Result<(), StoreError>;
    fn find_stack(&self, id: &str) -> Result<Option<Stack>, StoreError>;
    fn find_stack_by_slug(&self, slug: &str) -> Result<Option<Stack>, StoreError>;
    /// Newest first; `owner` filters when given.
    fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StoreError>;
    fn update_status(&self, id: &str, status: StackStatus) -> Result<(), StoreError>;
    fn delete_stack(&self, id: &str) -> Result<(), StoreError>;

    /// Entries in first-insertion order.
    fn config_entries(&self, stack_id: &str) -> Result<Vec<ConfigEntry>, StoreError>;
    /// Upsert every pair in one atomic write.
    fn upsert_config(&self, stack_id: &str, pairs: &[(String, String)]) -> Result<(), StoreError>;
    /// Delete all entries of a stack, returning how many were removed.
    fn delete_config(&self, stack_id: &str) -> Result<usize, StoreError>;
}

/// In-memory state shared by both store implementations.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub stacks: Vec<Stack>,
    /// stack id -> ordered (key, value) pairs
    pub config: std::collections::BTreeMap<String, Vec<(String, String)>>,
}

impl StoreState {
    pub fn create_stack(&mut self, stack: &Stack) -> Result<(), StoreError> {
        if self
            .stacks
            .iter()
            .any(|s| s.id == stack.id || s.slug == stack.slug)
        {
            return Err(StoreError::Duplicate(stack.slug.clone()));
        }
        self.stacks.push(stack.clone());
        Ok(())
    }

    pub fn find_stack(&self, id: &str) -> Option<Stack> {
        self.stacks.iter().find(|s| s.id == id).cloned()
    }

    pub fn find_stack_by_slug(&self, slug: &str) -> Option<Stack> {
        self.stacks.iter().find(|s| s.slug == slug).cloned()
    }

    pub fn list_stacks(&self, owner: Option<&str>) -> Vec<Stack> {
        let mut out: Vec<Stack> = self
            .stacks
            .iter()
            .filter(|s| owner.map_or(true, |o| s.owner_id == o))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        out
    }

    pub fn update_status(&mut self, id: &str, status: StackStatus) -> Result<(), StoreError> {
        let stack = self
            .stacks
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;
        stack.status = status;
        Ok(())
    }

    pub fn delete_stack(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.stacks.len();
        self.stacks.retain(|s| s.id != id);
        if self.stacks.len() == before {
            return Err(StoreError::Missing(id.to_string()));
        }
        Ok(())
    }

    pub fn config_entries(&self, stack_id: &str) -> Vec<ConfigEntry> {
        self.config
            .get(stack_id)
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(k, v)| ConfigEntry {
                        stack_id: stack_id.to_string(),
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn upsert_config(&mut self, stack_id: &str, pairs: &[(String, String)]) {
        let entries = self.config.entry(stack_id.to_string()).or_default();
        for (key, value) in pairs {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => entries.push((key.clone(), value.clone())),
            }
        }
    }

    pub fn delete_config(&mut self, stack_id: &str) -> usize {
        self.config.remove(stack_id).map(|v| v.len()).unwrap_or(0)
    }
}
