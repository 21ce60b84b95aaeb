//! Consumer side of change data capture: broker event envelopes, typed change
//! records and retry on transient conflicts.

use super::dispatcher::PublishedEvent;
use super::handlers::{Enricher, Reactor, Reducer, RuntimeContext};
use super::stream::{MutationKind, StreamRecord};
use crate::error::{DynaformError, Result};
use crate::model::Model;
use crate::wire::{unmarshall, Item};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker event envelope as delivered to handler functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub detail: StreamRecord,
}

impl BrokerEvent {
    /// The envelope the broker delivers for an event the dispatcher published.
    pub fn from_published(event: &PublishedEvent) -> Result<Self> {
        Ok(BrokerEvent {
            id: None,
            detail_type: event.detail_type.clone(),
            source: event.source.clone(),
            time: event.time,
            detail: serde_json::from_value(event.detail.clone())?,
        })
    }
}

/// A change with images converted to typed records.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord<M> {
    pub event: MutationKind,
    pub source: String,
    pub old: Option<M>,
    pub new: Option<M>,
}

/// A change with images converted to plain JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub event: MutationKind,
    pub old: Option<serde_json::Map<String, serde_json::Value>>,
    pub new: Option<serde_json::Map<String, serde_json::Value>>,
}

impl<M: Model> ChangeRecord<M> {
    /// Unmarshal both images. A missing new image on an insert or modify is
    /// fatal, as is a missing old image on a remove.
    pub fn from_event(event: &BrokerEvent) -> Result<Self> {
        let record = &event.detail;
        let kind = record.event_name;
        let new = unmarshal_image::<M>(record.dynamodb.new_image.as_ref())?;
        let old = unmarshal_image::<M>(record.dynamodb.old_image.as_ref())?;
        match kind {
            MutationKind::Insert | MutationKind::Modify if new.is_none() => {
                return Err(missing_image(M::TYPE_NAME, kind, "NewImage"));
            }
            MutationKind::Remove if old.is_none() => {
                return Err(missing_image(M::TYPE_NAME, kind, "OldImage"));
            }
            _ => {}
        }
        Ok(ChangeRecord {
            event: kind,
            source: event.source.clone(),
            old,
            new,
        })
    }

    /// The record as it exists after the change, or as it was before a
    /// removal.
    pub fn current(&self) -> Option<&M> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

impl RawChange {
    pub fn from_event(event: &BrokerEvent) -> Self {
        let payload = &event.detail.dynamodb;
        RawChange {
            event: event.detail.event_name,
            old: payload.old_image.as_ref().map(unmarshall),
            new: payload.new_image.as_ref().map(unmarshall),
        }
    }
}

fn unmarshal_image<M: Model>(image: Option<&Item>) -> Result<Option<M>> {
    image.map(M::unmarshal).transpose()
}

fn missing_image(model: &str, kind: MutationKind, image: &str) -> DynaformError {
    DynaformError::integrity(
        model,
        image,
        format!("{} change record has no {image}", kind.as_str()),
    )
}

/// Retry schedule for transient conflicts. The delay before retry `n`
/// (zero-based) is `base_delay * multiplier * (n + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * self.multiplier.saturating_mul(attempt + 1)
    }
}

/// Blocking backoff.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
enum RetryState {
    Attempting(u32),
    Succeeded,
    FailedFatal,
    FailedExhausted,
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy's attempts are used up. The operation receives the zero-based
/// attempt number. The last error is returned unmodified.
pub fn retry<T, F>(policy: &RetryPolicy, sleeper: &dyn Sleeper, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        log::trace!("{:?}", RetryState::Attempting(attempt));
        match operation(attempt) {
            Ok(value) => {
                log::debug!("{:?} after {} attempt(s)", RetryState::Succeeded, attempt + 1);
                return Ok(value);
            }
            Err(err) if !err.is_transient() => {
                log::debug!("{:?}: {err}", RetryState::FailedFatal);
                return Err(err);
            }
            Err(err) if attempt + 1 >= max_attempts => {
                log::warn!(
                    "{:?} after {max_attempts} attempt(s): {err}",
                    RetryState::FailedExhausted
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay(attempt);
                log::info!(
                    "Transient failure on attempt {}: {err}; retrying in {}ms",
                    attempt + 1,
                    delay.as_millis()
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Run a reactor for one broker event.
pub fn react<R: Reactor>(ctx: &RuntimeContext, handler: &R, event: &BrokerEvent) -> Result<()> {
    let change = ChangeRecord::<R::Source>::from_event(event)?;
    ctx.retry(|_| handler.react(ctx, &change))
}

/// Upsert the enriched record: create it, or update it at the stored version.
pub fn enrich<E: Enricher>(ctx: &RuntimeContext, handler: &E, event: &BrokerEvent) -> Result<()> {
    let change = ChangeRecord::<E::Source>::from_event(event)?;
    ctx.retry(|_| {
        let Some(mut target) = handler.enrich(ctx, &change)? else {
            log::debug!("Enricher skipped {} {}", event.source, event.detail_type);
            return Ok(());
        };
        match ctx.store.find::<E::Target>(&target.key())? {
            Some(existing) => {
                *target.meta_mut() = existing.meta().clone();
                ctx.store.update(target)?;
            }
            None => {
                ctx.store.create(target)?;
            }
        }
        Ok(())
    })
}

/// Load the summary (or seed it), fold the change in and write it back with
/// optimistic locking.
pub fn reduce<R: Reducer>(ctx: &RuntimeContext, handler: &R, event: &BrokerEvent) -> Result<()> {
    let change = ChangeRecord::<R::Source>::from_event(event)?;
    ctx.retry(|_| {
        let seed = handler.initial(&change)?;
        let current = ctx.store.find::<R::Target>(&seed.key())?.unwrap_or(seed);
        let reduced = handler.reduce(current, &change)?;
        ctx.store.save(reduced)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::stream::StreamPayload;
    use crate::model::testing::Note;
    use crate::ErrorKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn conflict() -> DynaformError {
        DynaformError::OptimisticLocking {
            model: "Note".into(),
            key: "pk=NOTE#1".into(),
            expected: 1,
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = retry(&RetryPolicy::default(), &sleeper, |_| {
            calls += 1;
            if calls <= 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );
    }

    #[test]
    fn test_always_transient_exhausts_after_five_attempts() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = retry::<(), _>(&RetryPolicy::default(), &sleeper, |_| {
            calls += 1;
            Err(DynaformError::AlreadyExists {
                model: "Note".into(),
                key: format!("attempt {calls}"),
            })
        })
        .unwrap_err();
        assert_eq!(calls, 5);
        assert_eq!(sleeper.0.lock().unwrap().len(), 4);
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("attempt 5"));
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = retry::<(), _>(&RetryPolicy::default(), &sleeper, |_| {
            calls += 1;
            Err(DynaformError::integrity("Note", "body", "bad"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(sleeper.0.lock().unwrap().is_empty());
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
    }

    #[test]
    fn test_policy_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    fn event(kind: MutationKind, new: Option<Item>, old: Option<Item>) -> BrokerEvent {
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
                    old_image: old,
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn test_change_record_unmarshals_images() {
        let note = Note::new("ada", "n1", "hello");
        let change: ChangeRecord<Note> =
            ChangeRecord::from_event(&event(MutationKind::Insert, Some(note.to_item()), None))
                .unwrap();
        assert_eq!(change.new, Some(note.clone()));
        assert!(change.old.is_none());
        assert_eq!(change.current(), Some(&note));
    }

    #[test]
    fn test_missing_new_image_is_fatal() {
        let err = ChangeRecord::<Note>::from_event(&event(MutationKind::Modify, None, None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert!(err.to_string().contains("NewImage"));
    }

    #[test]
    fn test_broker_envelope_parses_and_raw_change() {
        let json = r#"{
            "id": "e-1",
            "detail-type": "REMOVE",
            "source": "Notes.Note",
            "time": "2024-01-01T00:00:00Z",
            "detail": {
                "eventName": "REMOVE",
                "eventSourceARN": "arn:aws:dynamodb:eu-west-1:1:table/Notes/stream/x",
                "dynamodb": {"OldImage": {"id": {"S": "n1"}, "likes": {"N": "2"}}}
            }
        }"#;
        let event: BrokerEvent = serde_json::from_str(json).unwrap();
        let raw = RawChange::from_event(&event);
        assert_eq!(raw.event, MutationKind::Remove);
        assert!(raw.new.is_none());
        assert_eq!(raw.old.unwrap()["likes"], serde_json::json!(2));
    }

    #[test]
    fn test_from_published_round_trips_the_record() {
        let note = Note::new("ada", "n1", "hello");
        let record = event(MutationKind::Insert, Some(note.to_item()), None).detail;
        let published = PublishedEvent {
            source: "Notes.Note".into(),
            detail_type: "INSERT".into(),
            detail: serde_json::to_value(&record).unwrap(),
            time: None,
            event_bus_name: None,
        };

        let delivered = BrokerEvent::from_published(&published).unwrap();
        assert_eq!(delivered.detail, record);
        assert_eq!(delivered.source, "Notes.Note");
        let change = ChangeRecord::<Note>::from_event(&delivered).unwrap();
        assert_eq!(change.new, Some(note));
    }
}
