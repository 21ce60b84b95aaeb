//! The contract between generated record types and the runtime.

use crate::error::Result;
use crate::storage::{
    CREATED_AT_ATTRIBUTE, ENTITY_TYPE_ATTRIBUTE, UPDATED_AT_ATTRIBUTE, VERSION_ATTRIBUTE,
};
use crate::wire::{put_attribute, read_optional, read_required, AttributeValue, Item};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System-managed attributes every stored record carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    /// Zero until the record has been written once.
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    pub fn from_item(item: &Item, model: &str) -> Result<Self> {
        Ok(RecordMeta {
            version: read_required(item, model, &[VERSION_ATTRIBUTE])?,
            created_at: read_optional(item, model, &[CREATED_AT_ATTRIBUTE])?,
            updated_at: read_optional(item, model, &[UPDATED_AT_ATTRIBUTE])?,
        })
    }

    pub fn write_to(&self, item: &mut Item) {
        put_attribute(item, VERSION_ATTRIBUTE, &self.version);
        put_attribute(item, CREATED_AT_ATTRIBUTE, &self.created_at);
        put_attribute(item, UPDATED_AT_ATTRIBUTE, &self.updated_at);
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }
}

/// Implemented by every generated record type.
pub trait Model: Sized + Clone + Send + Sync {
    /// Schema type name, stored in the `_et` discriminator.
    const TYPE_NAME: &'static str;
    /// Environment key resolving the physical table, e.g. `TABLE_ORDERS`.
    const TABLE_ENV: &'static str;
    /// Attribute holding the partition key.
    const PARTITION_ATTRIBUTE: &'static str;
    const LEDGER: bool;
    const CONSISTENT: bool;

    /// Primary key attributes of this record.
    fn key(&self) -> Item;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Data, key and index attributes. System attributes are added by
    /// [`Model::to_item`].
    fn marshal(&self) -> Item;

    /// Read a stored image, accepting legacy column names.
    fn unmarshal(item: &Item) -> Result<Self>;

    /// Called by the store before the first write, e.g. to default a TTL.
    fn before_create(&mut self, _now: DateTime<Utc>) {}

    /// The full stored image.
    fn to_item(&self) -> Item {
        let mut item = self.marshal();
        self.meta().write_to(&mut item);
        item.insert(
            ENTITY_TYPE_ATTRIBUTE.to_string(),
            AttributeValue::S(Self::TYPE_NAME.to_string()),
        );
        item
    }
}

/// Read the `_et` discriminator of a stored image.
pub fn entity_type(item: &Item) -> Option<&str> {
    item.get(ENTITY_TYPE_ATTRIBUTE).and_then(AttributeValue::as_s)
}
