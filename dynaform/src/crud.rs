//! Optimistic-locking CRUD over any [`StorageClient`].

use crate::env::EnvContext;
use crate::error::{DynaformError, Result};
use crate::model::Model;
use crate::storage::{Condition, DeleteItem, GetItem, PutItem, StorageClient, StorageError};
use crate::wire::{describe_key, Item};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const PROVIDER: &str = "storage";

/// Typed data access for generated models.
#[derive(Clone)]
pub struct Store {
    storage: Arc<dyn StorageClient>,
    env: Arc<EnvContext>,
    clock: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("env", &self.env).finish()
    }
}

impl Store {
    pub fn new(storage: Arc<dyn StorageClient>, env: Arc<EnvContext>) -> Self {
        Store {
            storage,
            env,
            clock: Utc::now,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn env(&self) -> &EnvContext {
        &self.env
    }

    fn table<M: Model>(&self) -> Result<String> {
        self.env.table_name(M::TABLE_ENV).map(str::to_string)
    }

    /// Insert a new record. Fails with `AlreadyExists` if the key is taken.
    pub fn create<M: Model>(&self, mut record: M) -> Result<M> {
        let now = (self.clock)();
        record.before_create(now);
        let meta = record.meta_mut();
        meta.version = 1;
        meta.created_at = Some(now);
        meta.updated_at = Some(now);

        let key = record.key();
        let request = PutItem {
            table_name: self.table::<M>()?,
            key: key.clone(),
            item: record.to_item(),
            condition: Some(Condition::NotExists {
                attribute: M::PARTITION_ATTRIBUTE.to_string(),
            }),
        };
        match self.storage.put_item(request) {
            Ok(()) => {
                log::debug!("Created {} {}", M::TYPE_NAME, describe_key(&key));
                Ok(record)
            }
            Err(StorageError::ConditionFailed) => Err(DynaformError::AlreadyExists {
                model: M::TYPE_NAME.to_string(),
                key: describe_key(&key),
            }),
            Err(StorageError::Provider(message)) => Err(upstream(message)),
        }
    }

    /// Load a record by key, if present.
    pub fn find<M: Model>(&self, key: &Item) -> Result<Option<M>> {
        let request = GetItem {
            table_name: self.table::<M>()?,
            key: key.clone(),
            consistent_read: M::CONSISTENT,
        };
        let item = self.storage.get_item(request).map_err(storage_error)?;
        item.map(|item| M::unmarshal(&item)).transpose()
    }

    /// Load a record by key. Fails with `NotFound` if absent.
    pub fn get<M: Model>(&self, key: &Item) -> Result<M> {
        self.find(key)?.ok_or_else(|| DynaformError::NotFound {
            model: M::TYPE_NAME.to_string(),
            key: describe_key(key),
        })
    }

    /// Write a changed record back. Fails with `OptimisticLocking` when the
    /// stored version no longer matches the one the record was read at.
    pub fn update<M: Model>(&self, mut record: M) -> Result<M> {
        if M::LEDGER {
            return Err(DynaformError::Unexpected(format!(
                "{} is a ledger model and cannot be updated",
                M::TYPE_NAME
            )));
        }
        let expected = record.meta().version;
        let meta = record.meta_mut();
        meta.version = expected + 1;
        meta.updated_at = Some((self.clock)());

        let key = record.key();
        let request = PutItem {
            table_name: self.table::<M>()?,
            key: key.clone(),
            item: record.to_item(),
            condition: Some(Condition::VersionEquals { expected }),
        };
        match self.storage.put_item(request) {
            Ok(()) => {
                log::debug!(
                    "Updated {} {} to version {}",
                    M::TYPE_NAME,
                    describe_key(&key),
                    expected + 1
                );
                Ok(record)
            }
            Err(StorageError::ConditionFailed) => Err(DynaformError::OptimisticLocking {
                model: M::TYPE_NAME.to_string(),
                key: describe_key(&key),
                expected,
            }),
            Err(StorageError::Provider(message)) => Err(upstream(message)),
        }
    }

    /// Create when the record has never been written, update otherwise.
    pub fn save<M: Model>(&self, record: M) -> Result<M> {
        if record.meta().is_persisted() {
            self.update(record)
        } else {
            self.create(record)
        }
    }

    /// Remove a record and return what was stored.
    pub fn delete<M: Model>(&self, key: &Item) -> Result<M> {
        let request = DeleteItem {
            table_name: self.table::<M>()?,
            key: key.clone(),
            condition: Some(Condition::Exists {
                attribute: M::PARTITION_ATTRIBUTE.to_string(),
            }),
        };
        let not_found = || DynaformError::NotFound {
            model: M::TYPE_NAME.to_string(),
            key: describe_key(key),
        };
        match self.storage.delete_item(request) {
            Ok(Some(item)) => M::unmarshal(&item),
            Ok(None) | Err(StorageError::ConditionFailed) => Err(not_found()),
            Err(StorageError::Provider(message)) => Err(upstream(message)),
        }
    }
}

fn upstream(message: String) -> DynaformError {
    DynaformError::UnexpectedUpstream {
        provider: PROVIDER.to_string(),
        message,
    }
}

fn storage_error(err: StorageError) -> DynaformError {
    match err {
        StorageError::Provider(message) => upstream(message),
        StorageError::ConditionFailed => upstream("unexpected conditional failure".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{Entry, Note};
    use crate::model::RecordMeta;
    use crate::storage::MemoryStorage;
    use crate::ErrorKind;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (Arc<MemoryStorage>, Store) {
        let storage = Arc::new(MemoryStorage::new());
        let env = Arc::new(EnvContext::detached([("TABLE_NOTES", "notes-dev")]));
        let store = Store::new(storage.clone(), env).with_clock(fixed_now);
        (storage, store)
    }

    #[test]
    fn test_create_sets_system_attributes() {
        let (storage, store) = store();
        let created = store.create(Note::new("ada", "n1", "hi")).unwrap();
        assert_eq!(created.meta.version, 1);
        assert_eq!(created.meta.created_at, Some(fixed_now()));

        let items = storage.scan("notes-dev");
        assert_eq!(items.len(), 1);
        assert_eq!(crate::model::entity_type(&items[0]), Some("Note"));
    }

    #[test]
    fn test_create_existing_key_is_already_exists() {
        let (_, store) = store();
        store.create(Note::new("ada", "n1", "hi")).unwrap();
        let err = store.create(Note::new("ada", "n1", "again")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.is_transient());
    }

    #[test]
    fn test_update_bumps_version() {
        let (_, store) = store();
        let mut note = store.create(Note::new("ada", "n1", "hi")).unwrap();
        note.likes = 10;
        let updated = store.update(note).unwrap();
        assert_eq!(updated.meta.version, 2);

        let loaded: Note = store.get(&Note::key_for("ada", "n1")).unwrap();
        assert_eq!(loaded, updated);
    }

    #[test]
    fn test_stale_update_is_optimistic_locking() {
        let (_, store) = store();
        let original = store.create(Note::new("ada", "n1", "hi")).unwrap();
        store.update(original.clone()).unwrap();

        let err = store.update(original).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OptimisticLocking);
        match err {
            DynaformError::OptimisticLocking { expected, .. } => assert_eq!(expected, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ledger_models_reject_update() {
        let (_, store) = store();
        let entry = store
            .create(Entry {
                id: "e1".into(),
                meta: RecordMeta::default(),
            })
            .unwrap();
        assert!(store.update(entry).is_err());
    }

    #[test]
    fn test_get_and_delete_missing_are_not_found() {
        let (_, store) = store();
        let key = Note::key_for("nobody", "x");
        assert_eq!(store.get::<Note>(&key).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            store.delete::<Note>(&key).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(store.find::<Note>(&key).unwrap().is_none());
    }

    #[test]
    fn test_delete_returns_stored_record() {
        let (storage, store) = store();
        let created = store.create(Note::new("ada", "n1", "hi")).unwrap();
        let removed: Note = store.delete(&created.key()).unwrap();
        assert_eq!(removed, created);
        assert!(storage.scan("notes-dev").is_empty());
    }

    #[test]
    fn test_unbound_table_is_config_error() {
        let storage = Arc::new(MemoryStorage::new());
        let store = Store::new(storage, Arc::new(EnvContext::new()));
        let err = store.create(Note::new("ada", "n1", "hi")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
