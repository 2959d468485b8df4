use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ConfigEntry, Stack, StackStatus, Store, StoreError, StoreState};
use crate::lock::{acquire_lock_at, FileLock, LockError};
use crate::util::fs::write_atomic;

const LOCK_WAIT: Duration = Duration::from_secs(30);

/// Store persisted as a single JSON document.
///
/// Every operation runs under an exclusive lock on `<path>.lock`: read the document, apply
/// the change, replace the file atomically. Several processes can share one data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        acquire_lock_at(&self.lock_path, LOCK_WAIT).map_err(|e| match e {
            LockError::Io { path, source } => StoreError::Io {
                path: path.display().to_string(),
                source,
            },
            busy @ LockError::Busy { .. } => StoreError::Io {
                path: self.lock_path.display().to_string(),
                source: io::Error::new(io::ErrorKind::WouldBlock, busy.to_string()),
            },
        })
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn load(&self) -> Result<StoreState, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StoreState::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreState::default()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.path, &bytes).map_err(|e| self.io_err(e))
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let _guard = self.lock()?;
        Ok(f(&self.load()?))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock()?;
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }
}

impl Store for JsonFileStore {
    fn create_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        self.write(|s| s.create_stack(stack))
    }

    fn find_stack(&self, id: &str) -> Result<Option<Stack>, StoreError> {
        self.read(|s| s.find_stack(id))
    }

    fn find_stack_by_slug(&self, slug: &str) -> Result<Option<Stack>, StoreError> {
        self.read(|s| s.find_stack_by_slug(slug))
    }

    fn list_stacks(&self, owner: Option<&str>) -> Result<Vec<Stack>, StoreError> {
        self.read(|s| s.list_stacks(owner))
    }

    fn update_status(&self, id: &str, status: StackStatus) -> Result<(), StoreError> {
        self.write(|s| s.update_status(id, status))
    }

    fn delete_stack(&self, id: &str) -> Result<(), StoreError> {
        self.write(|s| s.delete_stack(id))
    }

    fn config_entries(&self, stack_id: &str) -> Result<Vec<ConfigEntry>, StoreError> {
        self.read(|s| s.config_entries(stack_id))
    }

    fn upsert_config(&self, stack_id: &str, pairs: &[(String, String)]) -> Result<(), StoreError> {
        self.write(|s| {
            s.upsert_config(stack_id, pairs);
            Ok(())
        })
    }

    fn delete_config(&self, stack_id: &str) -> Result<usize, StoreError> {
        self.write(|s| Ok(s.delete_config(stack_id)))
    }
}
