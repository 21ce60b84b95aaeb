//! Handler capabilities and the runtime context they receive.
//!
//! A generated handler module implements exactly one of [`Reactor`],
//! [`Enricher`] or [`Reducer`] and forwards its broker events to the matching
//! adapter in [`super::consumer`].

use super::consumer::{retry, ChangeRecord, RetryPolicy, Sleeper, ThreadSleeper};
use crate::crud::Store;
use crate::error::Result;
use crate::model::Model;
use std::sync::Arc;

/// Everything a handler needs at run time.
#[derive(Clone)]
pub struct RuntimeContext {
    pub store: Store,
    pub retry_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("store", &self.store)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl RuntimeContext {
    pub fn new(store: Store) -> Self {
        RuntimeContext {
            store,
            retry_policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry_policy = policy;
        self.sleeper = sleeper;
        self
    }

    /// Run `operation` under this context's retry policy.
    pub fn retry<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        retry(&self.retry_policy, self.sleeper.as_ref(), operation)
    }
}

/// Side effects in response to a change.
pub trait Reactor {
    type Source: Model;

    fn react(&self, ctx: &RuntimeContext, change: &ChangeRecord<Self::Source>) -> Result<()>;
}

/// Derives or refreshes one target record from a source change.
pub trait Enricher {
    type Source: Model;
    type Target: Model;

    /// The target record to upsert, or `None` to skip.
    fn enrich(
        &self,
        ctx: &RuntimeContext,
        change: &ChangeRecord<Self::Source>,
    ) -> Result<Option<Self::Target>>;
}

/// Folds source changes into a summary record.
pub trait Reducer {
    type Source: Model;
    type Target: Model;

    /// The summary to start from when none is stored yet. Its key selects the
    /// summary to load.
    fn initial(&self, change: &ChangeRecord<Self::Source>) -> Result<Self::Target>;

    fn reduce(
        &self,
        current: Self::Target,
        change: &ChangeRecord<Self::Source>,
    ) -> Result<Self::Target>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::consumer::{enrich, react, reduce, BrokerEvent};
    use crate::cdc::stream::{MutationKind, StreamPayload, StreamRecord};
    use crate::env::EnvContext;
    use crate::model::testing::Note;
    use crate::storage::{MemoryStorage, PutItem, StorageClient, StorageError};
    use crate::wire::Item;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _: Duration) {}
    }

    fn context(storage: Arc<dyn StorageClient>) -> RuntimeContext {
        let env = Arc::new(EnvContext::detached([("TABLE_NOTES", "notes")]));
        RuntimeContext::new(Store::new(storage, env))
            .with_retry(RetryPolicy::default(), Arc::new(NoSleep))
    }

    fn event(kind: MutationKind, new: Option<Item>) -> BrokerEvent {
        BrokerEvent {
            id: None,
            detail_type: kind.as_str().into(),
            source: "Notes.Note".into(),
            time: None,
            detail: StreamRecord {
                event_id: None,
                event_name: kind,
                event_source_arn: "arn:aws:dynamodb:eu-west-1:1:table/Notes/stream/x".into(),
                dynamodb: StreamPayload {
                    new_image: new,
                    ..Default::default()
                },
            },
        }
    }

    struct CountingReactor(AtomicUsize);

    impl Reactor for CountingReactor {
        type Source = Note;

        fn react(&self, _: &RuntimeContext, change: &ChangeRecord<Note>) -> Result<()> {
            assert_eq!(change.new.as_ref().map(|n| n.body.as_str()), Some("hi"));
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_react_runs_handler_once() {
        let ctx = context(Arc::new(MemoryStorage::new()));
        let reactor = CountingReactor(AtomicUsize::new(0));
        let note = Note::new("ada", "n1", "hi");
        react(&ctx, &reactor, &event(MutationKind::Insert, Some(note.to_item()))).unwrap();
        assert_eq!(reactor.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_react_without_new_image_never_calls_handler() {
        let ctx = context(Arc::new(MemoryStorage::new()));
        let reactor = CountingReactor(AtomicUsize::new(0));
        let err = react(&ctx, &reactor, &event(MutationKind::Insert, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert_eq!(reactor.0.load(Ordering::SeqCst), 0);
    }

    /// Copies each note into a per-owner digest note.
    struct Digest;

    impl Enricher for Digest {
        type Source = Note;
        type Target = Note;

        fn enrich(&self, _: &RuntimeContext, change: &ChangeRecord<Note>) -> Result<Option<Note>> {
            Ok(change
                .new
                .as_ref()
                .map(|n| Note::new(&n.owner, "digest", &n.body)))
        }
    }

    #[test]
    fn test_enrich_creates_then_updates_target() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context(storage.clone());

        let first = Note::new("ada", "n1", "one");
        enrich(&ctx, &Digest, &event(MutationKind::Insert, Some(first.to_item()))).unwrap();
        let second = Note::new("ada", "n2", "two");
        enrich(&ctx, &Digest, &event(MutationKind::Insert, Some(second.to_item()))).unwrap();

        let digest: Note = ctx.store.get(&Note::key_for("ada", "digest")).unwrap();
        assert_eq!(digest.body, "two");
        assert_eq!(digest.meta.version, 2);
    }

    /// Counts notes per owner in the `likes` column of a summary note.
    struct Tally;

    impl Reducer for Tally {
        type Source = Note;
        type Target = Note;

        fn initial(&self, change: &ChangeRecord<Note>) -> Result<Note> {
            let owner = change.current().map(|n| n.owner.clone()).unwrap_or_default();
            Ok(Note::new(&owner, "tally", ""))
        }

        fn reduce(&self, mut current: Note, _: &ChangeRecord<Note>) -> Result<Note> {
            current.likes += 1;
            Ok(current)
        }
    }

    #[test]
    fn test_reduce_accumulates_into_summary() {
        let ctx = context(Arc::new(MemoryStorage::new()));
        for id in ["n1", "n2", "n3"] {
            let note = Note::new("ada", id, "x");
            reduce(&ctx, &Tally, &event(MutationKind::Insert, Some(note.to_item()))).unwrap();
        }
        let tally: Note = ctx.store.get(&Note::key_for("ada", "tally")).unwrap();
        assert_eq!(tally.likes, 3);
    }

    /// Fails the first `conflicts` conditional puts as if a concurrent writer
    /// got there first.
    struct Contended {
        inner: MemoryStorage,
        conflicts: AtomicUsize,
    }

    impl StorageClient for Contended {
        fn get_item(&self, request: crate::storage::GetItem) -> std::result::Result<Option<Item>, StorageError> {
            self.inner.get_item(request)
        }

        fn put_item(&self, request: PutItem) -> std::result::Result<(), StorageError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(StorageError::ConditionFailed);
            }
            self.inner.put_item(request)
        }

        fn delete_item(
            &self,
            request: crate::storage::DeleteItem,
        ) -> std::result::Result<Option<Item>, StorageError> {
            self.inner.delete_item(request)
        }
    }

    #[test]
    fn test_reduce_retries_conflicting_writes() {
        let storage = Arc::new(Contended {
            inner: MemoryStorage::new(),
            conflicts: AtomicUsize::new(2),
        });
        let ctx = context(storage.clone());
        let note = Note::new("ada", "n1", "x");
        reduce(&ctx, &Tally, &event(MutationKind::Insert, Some(note.to_item()))).unwrap();

        let tally: Note = ctx.store.get(&Note::key_for("ada", "tally")).unwrap();
        assert_eq!(tally.likes, 1);
        assert_eq!(storage.inner.write_count(), 1);
    }

    #[test]
    fn test_persistent_conflict_surfaces_after_exhaustion() {
        let storage = Arc::new(Contended {
            inner: MemoryStorage::new(),
            conflicts: AtomicUsize::new(100),
        });
        let ctx = context(storage.clone());
        let note = Note::new("ada", "n1", "x");
        let err = reduce(&ctx, &Tally, &event(MutationKind::Insert, Some(note.to_item())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(storage.conflicts.load(Ordering::SeqCst), 95);
    }
}
