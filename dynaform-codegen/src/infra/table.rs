//! Storage resources: one encrypted table (plus its key) per IR table.

use dynaform::schema::{IntermediateRepresentation, KeyPart, SecondaryIndex, Table};
use dynaform::{DynaformError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::template::{get_att, ref_, sub, Resource, Template};
use crate::type_utils::{key_attribute_type, table_logical_id};

pub const EVENT_BUS_ID: &str = "EventBus";

/// Logical id of the encryption key guarding a table.
pub fn key_logical_id(table_name: &str) -> String {
    format!("{}Key", table_logical_id(table_name))
}

/// Add every table, its key and (when any CDC exists) the event bus.
pub fn emit_tables(ir: &IntermediateRepresentation, root: &mut Template) -> Result<()> {
    for table in &ir.tables {
        let logical_id = table_logical_id(&table.table_name);
        let key_id = key_logical_id(&table.table_name);
        for id in [&logical_id, &key_id] {
            if root.resources.contains_key(id.as_str()) {
                return Err(DynaformError::Schema(format!(
                    "Table `{}` maps to logical id `{id}`, which is already in use",
                    table.table_name
                )));
            }
        }

        root.add_resource(key_id.clone(), encryption_key(table));
        root.add_resource(
            logical_id.clone(),
            Resource::new("AWS::DynamoDB::Table", table_properties(ir, table, &key_id)),
        );

        root.outputs.insert(
            format!("{logical_id}TableName"),
            json!({ "Value": ref_(&logical_id) }),
        );
        if table.enable_streaming {
            root.outputs.insert(
                format!("{logical_id}StreamArn"),
                json!({ "Value": get_att(&logical_id, "StreamArn") }),
            );
        }
        log::debug!("Table {} -> {logical_id}", table.table_name);
    }

    if ir.tables.iter().any(Table::has_cdc) {
        root.add_resource(
            EVENT_BUS_ID,
            Resource::new(
                "AWS::Events::EventBus",
                json!({ "Name": sub("${AWS::StackName}-changes") }),
            ),
        );
        root.outputs.insert(
            "EventBusName".to_string(),
            json!({ "Value": ref_(EVENT_BUS_ID) }),
        );
    }
    Ok(())
}

fn encryption_key(table: &Table) -> Resource {
    Resource::new(
        "AWS::KMS::Key",
        json!({
            "Description": format!("Encrypts table {}", table.table_name),
            "EnableKeyRotation": true,
            "KeyPolicy": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "AccountAdministration",
                    "Effect": "Allow",
                    "Principal": { "AWS": sub("arn:${AWS::Partition}:iam::${AWS::AccountId}:root") },
                    "Action": "kms:*",
                    "Resource": "*"
                }]
            }
        }),
    )
}

fn table_properties(ir: &IntermediateRepresentation, table: &Table, key_id: &str) -> Value {
    let mut properties = json!({
        "BillingMode": "PAY_PER_REQUEST",
        "AttributeDefinitions": attribute_definitions(ir, table),
        "KeySchema": key_schema(table.primary_key.partition_key(), table.primary_key.sort_key()),
        "PointInTimeRecoverySpecification": {
            "PointInTimeRecoveryEnabled": table.enable_point_in_time_recovery
        },
        "SSESpecification": {
            "SSEEnabled": true,
            "SSEType": "KMS",
            "KMSMasterKeyId": ref_(key_id)
        }
    });

    let mut globals = Vec::new();
    let mut locals = Vec::new();
    for index in &table.secondary_indexes {
        let projection = json!({ "ProjectionType": index.projection().as_str() });
        match index {
            SecondaryIndex::Gsi {
                name,
                partition_key,
                sort_key,
                ..
            } => globals.push(json!({
                "IndexName": name,
                "KeySchema": key_schema(partition_key, sort_key.as_ref()),
                "Projection": projection,
            })),
            SecondaryIndex::Lsi { name, sort_key, .. } => locals.push(json!({
                "IndexName": name,
                "KeySchema": key_schema(table.primary_key.partition_key(), Some(sort_key)),
                "Projection": projection,
            })),
        }
    }

    if !globals.is_empty() {
        properties["GlobalSecondaryIndexes"] = Value::Array(globals);
    }
    if !locals.is_empty() {
        properties["LocalSecondaryIndexes"] = Value::Array(locals);
    }
    if table.enable_streaming {
        properties["StreamSpecification"] = json!({ "StreamViewType": "NEW_AND_OLD_IMAGES" });
    }
    if let Some(attribute) = &table.ttl_attribute {
        properties["TimeToLiveSpecification"] = json!({
            "AttributeName": attribute,
            "Enabled": true
        });
    }
    properties
}

fn key_schema(partition_key: &KeyPart, sort_key: Option<&KeyPart>) -> Value {
    let mut schema = vec![json!({
        "AttributeName": partition_key.attribute_name,
        "KeyType": "HASH"
    })];
    if let Some(sort_key) = sort_key {
        schema.push(json!({
            "AttributeName": sort_key.attribute_name,
            "KeyType": "RANGE"
        }));
    }
    Value::Array(schema)
}

/// Every key attribute the table and its indexes use, with its type.
fn attribute_definitions(ir: &IntermediateRepresentation, table: &Table) -> Value {
    let mut attributes: BTreeMap<&str, &str> = BTreeMap::new();
    for model in ir.models_on(table) {
        let parts = model
            .primary_key
            .parts()
            .into_iter()
            .chain(model.secondary_indexes.iter().flat_map(SecondaryIndex::parts));
        for part in parts {
            attributes
                .entry(part.attribute_name.as_str())
                .or_insert_with(|| key_attribute_type(model, part));
        }
    }
    Value::Array(
        attributes
            .into_iter()
            .map(|(name, kind)| json!({ "AttributeName": name, "AttributeType": kind }))
            .collect(),
    )
}
