//! Change-stream record envelope as delivered by the storage service.

use crate::schema::CdcEvent;
use crate::wire::Item;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The mutation a stream record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    Insert,
    Modify,
    Remove,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Insert => "INSERT",
            MutationKind::Modify => "MODIFY",
            MutationKind::Remove => "REMOVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(MutationKind::Insert),
            "MODIFY" => Some(MutationKind::Modify),
            "REMOVE" => Some(MutationKind::Remove),
            _ => None,
        }
    }

    /// Whether a handler subscribed to `event` fires for this mutation.
    pub fn triggers(self, event: CdcEvent) -> bool {
        event.stream_event_names().contains(&self.as_str())
    }
}

/// A batch of records handed to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "eventName")]
    pub event_name: MutationKind,
    #[serde(rename = "eventSourceARN")]
    pub event_source_arn: String,
    pub dynamodb: StreamPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_creation_date_time: Option<f64>,
    #[serde(default)]
    pub keys: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<String>,
}

impl StreamRecord {
    /// The image describing the record after the mutation, or before it for
    /// removals.
    pub fn current_image(&self) -> Option<&Item> {
        match self.event_name {
            MutationKind::Remove => self.dynamodb.old_image.as_ref(),
            _ => self.dynamodb.new_image.as_ref(),
        }
    }

    /// When the change happened, if the stream reported it.
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        let seconds = self.dynamodb.approximate_creation_date_time?;
        Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
            .single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::AttributeValue;

    const RECORD: &str = r#"{
        "eventID": "1",
        "eventName": "INSERT",
        "eventSourceARN": "arn:aws:dynamodb:us-east-1:123456789012:table/Orders/stream/2024-01-01T00:00:00.000",
        "dynamodb": {
            "ApproximateCreationDateTime": 1704067200,
            "Keys": {"pk": {"S": "ORDER#1"}},
            "NewImage": {"pk": {"S": "ORDER#1"}, "_et": {"S": "Order"}, "total": {"N": "12.5"}},
            "SequenceNumber": "111",
            "StreamViewType": "NEW_AND_OLD_IMAGES"
        }
    }"#;

    #[test]
    fn test_parse_stream_record() {
        let record: StreamRecord = serde_json::from_str(RECORD).unwrap();
        assert_eq!(record.event_name, MutationKind::Insert);
        assert_eq!(
            record.current_image().unwrap()["total"],
            AttributeValue::N("12.5".into())
        );
        assert_eq!(
            record.changed_at().unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
        assert!(record.dynamodb.old_image.is_none());
    }

    #[test]
    fn test_upsert_triggers_insert_and_modify() {
        assert!(MutationKind::Insert.triggers(CdcEvent::Upsert));
        assert!(MutationKind::Modify.triggers(CdcEvent::Upsert));
        assert!(!MutationKind::Remove.triggers(CdcEvent::Upsert));
        assert!(MutationKind::Remove.triggers(CdcEvent::Remove));
    }
}
