use super::stream::{StreamEvent, StreamRecord};
use crate::error::{DynaformError, Result};
use crate::model::entity_type;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One event handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishedEvent {
    /// `<table>.<model>`
    pub source: String,
    /// The mutation kind, e.g. `INSERT`.
    pub detail_type: String,
    pub detail: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_bus_name: Option<String>,
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: PublishedEvent) -> Result<()>;
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventPublisher for MemoryPublisher {
    fn publish(&self, event: PublishedEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| DynaformError::Unexpected("publisher lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

/// Turns stream records into broker events.
pub struct Dispatcher<P> {
    publisher: P,
    event_bus_name: Option<String>,
    arn_pattern: Regex,
}

impl<P: EventPublisher> Dispatcher<P> {
    pub fn new(publisher: P, event_bus_name: Option<String>) -> Result<Self> {
        let arn_pattern = Regex::new(r":table/([^/]+)/stream/")
            .map_err(|e| DynaformError::Unexpected(e.to_string()))?;
        Ok(Dispatcher {
            publisher,
            event_bus_name,
            arn_pattern,
        })
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Publish exactly one event for `record`. Nothing is published when the
    /// record cannot be attributed to a table and model.
    pub fn dispatch(&self, record: &StreamRecord) -> Result<PublishedEvent> {
        let table = self.table_name(&record.event_source_arn)?;
        let model = record
            .current_image()
            .and_then(entity_type)
            .ok_or_else(|| {
                DynaformError::integrity(
                    table,
                    "_et",
                    format!(
                        "{} record has no model type discriminator",
                        record.event_name.as_str()
                    ),
                )
            })?;

        let event = PublishedEvent {
            source: format!("{table}.{model}"),
            detail_type: record.event_name.as_str().to_string(),
            detail: serde_json::to_value(record)?,
            time: record.changed_at(),
            event_bus_name: self.event_bus_name.clone(),
        };
        log::debug!("Publishing {} {}", event.source, event.detail_type);
        self.publisher.publish(event.clone())?;
        Ok(event)
    }

    /// Dispatch records in order, stopping at the first failure so the
    /// stream redelivers the batch.
    pub fn dispatch_all(&self, event: &StreamEvent) -> Result<usize> {
        for record in &event.records {
            self.dispatch(record)?;
        }
        log::info!("Dispatched {} record(s)", event.records.len());
        Ok(event.records.len())
    }

    fn table_name<'a>(&self, arn: &'a str) -> Result<&'a str> {
        self.arn_pattern
            .captures(arn)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                DynaformError::integrity("stream", "eventSourceARN", format!("cannot parse {arn}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::stream::{MutationKind, StreamPayload};
    use crate::wire::{AttributeValue, Item};
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    const ARN: &str =
        "arn:aws:dynamodb:us-east-1:123456789012:table/Orders/stream/2024-01-01T00:00:00.000";

    fn image(entity: Option<&str>) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttributeValue::S("ORDER#1".into()));
        if let Some(entity) = entity {
            item.insert("_et".into(), AttributeValue::S(entity.into()));
        }
        item
    }

    fn record(kind: MutationKind, new: Option<Item>, old: Option<Item>) -> StreamRecord {
        StreamRecord {
            event_id: None,
            event_name: kind,
            event_source_arn: ARN.into(),
            dynamodb: StreamPayload {
                approximate_creation_date_time: Some(1_704_067_200.0),
                new_image: new,
                old_image: old,
                ..Default::default()
            },
        }
    }

    fn dispatcher() -> Dispatcher<MemoryPublisher> {
        Dispatcher::new(MemoryPublisher::new(), Some("bus".into())).unwrap()
    }

    #[test]
    fn test_dispatch_publishes_once_with_table_model_source() {
        let dispatcher = dispatcher();
        let event = dispatcher
            .dispatch(&record(MutationKind::Insert, Some(image(Some("Order"))), None))
            .unwrap();

        assert_eq!(event.source, "Orders.Order");
        assert_eq!(event.detail_type, "INSERT");
        assert_eq!(event.event_bus_name.as_deref(), Some("bus"));
        assert!(event.time.is_some());
        assert_eq!(dispatcher.publisher().events(), vec![event]);
    }

    #[test]
    fn test_missing_discriminator_fails_without_publish() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(&record(MutationKind::Modify, Some(image(None)), None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert!(dispatcher.publisher().events().is_empty());
    }

    #[test]
    fn test_remove_reads_old_image() {
        let dispatcher = dispatcher();
        let event = dispatcher
            .dispatch(&record(MutationKind::Remove, None, Some(image(Some("Order")))))
            .unwrap();
        assert_eq!(event.detail_type, "REMOVE");
        assert_eq!(event.source, "Orders.Order");
    }

    #[test]
    fn test_unparseable_arn_is_fatal() {
        let dispatcher = dispatcher();
        let mut bad = record(MutationKind::Insert, Some(image(Some("Order"))), None);
        bad.event_source_arn = "not-an-arn".into();
        assert!(dispatcher.dispatch(&bad).is_err());
        assert!(dispatcher.publisher().events().is_empty());
    }

    #[test]
    fn test_dispatch_all_stops_at_first_failure() {
        let dispatcher = dispatcher();
        let batch = StreamEvent {
            records: vec![
                record(MutationKind::Insert, Some(image(Some("Order"))), None),
                record(MutationKind::Insert, Some(image(None)), None),
                record(MutationKind::Insert, Some(image(Some("Order"))), None),
            ],
        };
        assert!(dispatcher.dispatch_all(&batch).is_err());
        assert_eq!(dispatcher.publisher().events().len(), 1);
    }
}
