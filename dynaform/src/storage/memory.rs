use super::{DeleteItem, GetItem, PutItem, StorageClient, StorageError};
use crate::wire::{describe_key, Item};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// An in-process store honouring conditional writes. Used by tests and the
/// example crate in place of the real service.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<BTreeMap<String, BTreeMap<String, Item>>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful puts and deletes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every item in a table, ordered by key.
    pub fn scan(&self, table_name: &str) -> Vec<Item> {
        self.lock()
            .map(|tables| {
                tables
                    .get(table_name)
                    .map(|t| t.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, Item>>>, StorageError>
    {
        self.tables
            .lock()
            .map_err(|_| StorageError::Provider("memory storage lock poisoned".into()))
    }
}

impl StorageClient for MemoryStorage {
    fn get_item(&self, request: GetItem) -> Result<Option<Item>, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .get(&request.table_name)
            .and_then(|t| t.get(&describe_key(&request.key)))
            .cloned())
    }

    fn put_item(&self, request: PutItem) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let table = tables.entry(request.table_name).or_default();
        let key = describe_key(&request.key);
        if let Some(condition) = &request.condition {
            if !condition.holds(table.get(&key)) {
                return Err(StorageError::ConditionFailed);
            }
        }
        table.insert(key, request.item);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_item(&self, request: DeleteItem) -> Result<Option<Item>, StorageError> {
        let mut tables = self.lock()?;
        let table = tables.entry(request.table_name).or_default();
        let key = describe_key(&request.key);
        if let Some(condition) = &request.condition {
            if !condition.holds(table.get(&key)) {
                return Err(StorageError::ConditionFailed);
            }
        }
        let removed = table.remove(&key);
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}
