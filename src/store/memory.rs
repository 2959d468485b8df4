use std::sync::Mutex;

use super::{ConfigEntry, Stack, StackStatus, Store, StoreError, StoreState};

/// Process-local store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T, StoreError> {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }
}

impl Store for MemoryStore {
    fn create_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        self.with(|s| s.create_stack(stack))?
    }

    fn find_stack(&self, id: &str) -> Result<Option<Stack>, StoreError> {
        self.with(|s| s.find_stack(id))
    }

    fn find_stack_by_slug(&self, slug: &str) -> Result<Option<Stack>, StoreError> {
        self.with(|s| s.find_stack_by_slug(slug))
    }

    fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StoreError> {
        self.with(|s| s.list_stacks(owner))
    }

    fn update_status(&self, id: &str, status: StackStatus) -> Result<(), StoreError> {
        self.with(|s| s.update_status(id, status))?
    }

    fn delete_stack(&self, id: &str) -> Result<(), StoreError> {
        self.with(|s| s.delete_stack(id))?
    }

    fn config_entries(&self, stack_id: &str) -> Result<Vec<ConfigEntry>, StoreError> {
        self.with(|s| s.config_entries(stack_id))
    }

    fn upsert_config(&self, stack_id: &str, pairs: &[(String, String)]) -> Result<(), StoreError> {
        self.with(|s| s.upsert_config(stack_id, pairs))
    }

    fn delete_config(&self, stack_id: &str) -> Result<usize, StoreError> {
        self.with(|s| s.delete_config(stack_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_contract() {
        super::super::contract::exercise(&MemoryStore::new());
    }
}
