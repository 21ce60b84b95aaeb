//! The storage service boundary.
//!
//! Generated code and the CRUD runtime talk to the store only through
//! [`StorageClient`]. The conditional write is the one primitive optimistic
//! locking depends on: a put or delete whose [`Condition`] does not hold fails
//! with [`StorageError::ConditionFailed`] and leaves the item untouched.

mod memory;

pub use memory::MemoryStorage;

use crate::wire::{AttributeValue, Item};
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute holding the model-type discriminator.
pub const ENTITY_TYPE_ATTRIBUTE: &str = "_et";
/// Attribute holding the optimistic-locking version.
pub const VERSION_ATTRIBUTE: &str = "_v";
pub const CREATED_AT_ATTRIBUTE: &str = "_ct";
pub const UPDATED_AT_ATTRIBUTE: &str = "_md";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("{0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// No item exists under the key.
    NotExists { attribute: String },
    /// An item exists under the key.
    Exists { attribute: String },
    /// The stored version equals `expected`.
    VersionEquals { expected: i64 },
    All(Vec<Condition>),
}

/// A condition rendered as a storage expression with its placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub text: String,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, AttributeValue>,
}

impl Condition {
    pub fn to_expression(&self) -> Expression {
        let mut expr = Expression::default();
        expr.text = self.render(&mut expr.names, &mut expr.values);
        expr
    }

    fn render(
        &self,
        names: &mut BTreeMap<String, String>,
        values: &mut BTreeMap<String, AttributeValue>,
    ) -> String {
        match self {
            Condition::NotExists { attribute } => {
                let placeholder = format!("#{}", placeholder_name(attribute));
                names.insert(placeholder.clone(), attribute.clone());
                format!("attribute_not_exists({placeholder})")
            }
            Condition::Exists { attribute } => {
                let placeholder = format!("#{}", placeholder_name(attribute));
                names.insert(placeholder.clone(), attribute.clone());
                format!("attribute_exists({placeholder})")
            }
            Condition::VersionEquals { expected } => {
                names.insert("#version".into(), VERSION_ATTRIBUTE.into());
                values.insert(":version".into(), AttributeValue::N(expected.to_string()));
                "#version = :version".to_string()
            }
            Condition::All(conditions) => conditions
                .iter()
                .map(|c| c.render(names, values))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Evaluate against the currently stored item, if any.
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::NotExists { attribute } => {
                current.map_or(true, |item| !item.contains_key(attribute))
            }
            Condition::Exists { attribute } => {
                current.is_some_and(|item| item.contains_key(attribute))
            }
            Condition::VersionEquals { expected } => current
                .and_then(|item| item.get(VERSION_ATTRIBUTE))
                .and_then(AttributeValue::as_n)
                .and_then(|n| n.parse::<i64>().ok())
                == Some(*expected),
            Condition::All(conditions) => conditions.iter().all(|c| c.holds(current)),
        }
    }
}

fn placeholder_name(attribute: &str) -> String {
    attribute
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetItem {
    pub table_name: String,
    pub key: Item,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutItem {
    pub table_name: String,
    pub key: Item,
    pub item: Item,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteItem {
    pub table_name: String,
    pub key: Item,
    pub condition: Option<Condition>,
}

/// The storage operations the runtime needs.
pub trait StorageClient: Send + Sync {
    fn get_item(&self, request: GetItem) -> Result<Option<Item>, StorageError>;

    fn put_item(&self, request: PutItem) -> Result<(), StorageError>;

    /// Delete and return the removed item, if there was one.
    fn delete_item(&self, request: DeleteItem) -> Result<Option<Item>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(version: i64) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttributeValue::S("A#1".into()));
        item.insert(VERSION_ATTRIBUTE.into(), AttributeValue::N(version.to_string()));
        item
    }

    #[test]
    fn test_condition_expression_rendering() {
        let condition = Condition::All(vec![
            Condition::Exists {
                attribute: "pk".into(),
            },
            Condition::VersionEquals { expected: 4 },
        ]);
        let expr = condition.to_expression();
        assert_eq!(expr.text, "attribute_exists(#pk) AND #version = :version");
        assert_eq!(expr.names["#pk"], "pk");
        assert_eq!(expr.names["#version"], "_v");
        assert_eq!(expr.values[":version"], AttributeValue::N("4".into()));
    }

    #[test]
    fn test_condition_evaluation() {
        let not_exists = Condition::NotExists {
            attribute: "pk".into(),
        };
        assert!(not_exists.holds(None));
        assert!(!not_exists.holds(Some(&stored(1))));

        let version = Condition::VersionEquals { expected: 2 };
        assert!(version.holds(Some(&stored(2))));
        assert!(!version.holds(Some(&stored(3))));
        assert!(!version.holds(None));
    }
}
