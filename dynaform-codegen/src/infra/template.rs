//! Template documents and the stack set the infrastructure backend produces.

use dynaform::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: &str = "2010-09-09";
pub const SERVERLESS_TRANSFORM: &str = "AWS::Serverless-2016-10-31";
pub const APPLICATION_TYPE: &str = "AWS::Serverless::Application";
pub const FUNCTION_TYPE: &str = "AWS::Serverless::Function";

/// One CloudFormation/SAM template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globals: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl Template {
    /// An empty template using the serverless transform.
    pub fn serverless(description: impl Into<String>) -> Self {
        Template {
            format_version: FORMAT_VERSION.to_string(),
            transform: Some(SERVERLESS_TRANSFORM.to_string()),
            description: Some(description.into()),
            globals: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Declare a string parameter unless one of that name exists.
    pub fn add_string_parameter(&mut self, name: &str) {
        self.parameters
            .entry(name.to_string())
            .or_insert_with(|| json!({ "Type": "String" }));
    }

    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) {
        self.resources.insert(logical_id.into(), resource);
    }

    /// Logical ids of every function resource.
    pub fn function_ids(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, r)| r.kind == FUNCTION_TYPE)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Set an environment variable on every function in the template.
    pub fn set_function_variable(&mut self, name: &str, value: Value) {
        for id in self.function_ids() {
            let Some(resource) = self.resources.get_mut(&id) else {
                continue;
            };
            let properties = object_entry(&mut resource.properties);
            let environment = object_entry(
                properties
                    .entry("Environment".to_string())
                    .or_insert_with(|| json!({})),
            );
            let variables = object_entry(
                environment
                    .entry("Variables".to_string())
                    .or_insert_with(|| json!({})),
            );
            variables.insert(name.to_string(), value.clone());
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Coerce `value` into an object and borrow its map.
fn object_entry(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(serde_json::Map::new());
            object_entry(other)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
}

impl Resource {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Resource {
            kind: kind.into(),
            properties,
        }
    }

    /// Parameters a nested-stack resource forwards to its template.
    pub fn forwarded_parameters(&self) -> Option<&serde_json::Map<String, Value>> {
        self.properties.get("Parameters").and_then(Value::as_object)
    }

    /// Forward `value` into a nested stack as parameter `name`.
    pub fn forward_parameter(&mut self, name: &str, value: Value) {
        let properties = object_entry(&mut self.properties);
        let parameters = object_entry(
            properties
                .entry("Parameters".to_string())
                .or_insert_with(|| json!({})),
        );
        parameters.insert(name.to_string(), value);
    }
}

/// A nested stack and the tables its functions touch.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedStack {
    pub template: Template,
    pub tables: Vec<String>,
}

/// The root template plus every nested stack, keyed by logical id.
#[derive(Debug, Clone, PartialEq)]
pub struct Stacks {
    pub root: Template,
    pub nested: BTreeMap<String, NestedStack>,
}

impl Stacks {
    pub fn new(root: Template) -> Self {
        Stacks {
            root,
            nested: BTreeMap::new(),
        }
    }

    /// Add a nested stack and the root resource that deploys it.
    pub fn add_nested(&mut self, name: &str, stack: NestedStack) {
        self.root.add_resource(
            name,
            Resource::new(
                APPLICATION_TYPE,
                json!({ "Location": nested_location(name) }),
            ),
        );
        self.nested.insert(name.to_string(), stack);
    }

    /// Declare `name` on a nested stack and forward `value` to it.
    pub fn bind_parameter(&mut self, stack: &str, name: &str, value: Value) {
        if let Some(nested) = self.nested.get_mut(stack) {
            nested.template.add_string_parameter(name);
        }
        if let Some(resource) = self.root.resources.get_mut(stack) {
            resource.forward_parameter(name, value);
        }
    }

    pub fn nested_names(&self) -> Vec<String> {
        self.nested.keys().cloned().collect()
    }
}

/// Path of a nested template relative to the root template.
pub fn nested_location(name: &str) -> String {
    format!("nested/{name}.yml")
}

pub fn ref_(name: &str) -> Value {
    json!({ "Ref": name })
}

pub fn get_att(resource: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [resource, attribute] })
}

pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

/// An external name an intrinsic function points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    Ref(String),
    GetAtt { resource: String, attribute: String },
}

impl Reference {
    /// Parameter name that carries this reference into a nested stack.
    pub fn parameter_name(&self) -> String {
        match self {
            Reference::Ref(name) => name.clone(),
            Reference::GetAtt {
                resource,
                attribute,
            } => format!("{resource}{attribute}")
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect(),
        }
    }

    /// The intrinsic that resolves this reference in the declaring template.
    pub fn to_value(&self) -> Value {
        match self {
            Reference::Ref(name) => ref_(name),
            Reference::GetAtt {
                resource,
                attribute,
            } => get_att(resource, attribute),
        }
    }

    /// Pseudo parameters such as `AWS::Region` resolve everywhere.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Reference::Ref(name) if name.starts_with("AWS::"))
    }

    pub(crate) fn from_sub_variable(variable: &str) -> Self {
        match variable.split_once('.') {
            Some((resource, attribute)) => Reference::GetAtt {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
            },
            None => Reference::Ref(variable.to_string()),
        }
    }
}

/// Every `Ref`, `Fn::GetAtt` and `Fn::Sub` variable under `value`.
pub fn collect_references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk_references(value, &mut found);
    found.sort();
    found.dedup();
    found
}

fn walk_references(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk_references(v, found)),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(reference) = intrinsic_reference(map, found) {
                    found.push(reference);
                    return;
                }
            }
            map.values().for_each(|v| walk_references(v, found));
        }
        _ => {}
    }
}

/// Resolve a single-key intrinsic object. `Fn::Sub` pushes its variables
/// directly and reports `None` so its bindings are still walked.
fn intrinsic_reference(
    map: &serde_json::Map<String, Value>,
    found: &mut Vec<Reference>,
) -> Option<Reference> {
    if let Some(name) = map.get("Ref").and_then(Value::as_str) {
        return Some(Reference::Ref(name.to_string()));
    }
    if let Some(target) = map.get("Fn::GetAtt") {
        let (resource, attribute) = match target {
            Value::Array(parts) => (parts.first()?.as_str()?, parts.get(1)?.as_str()?),
            Value::String(dotted) => dotted.split_once('.')?,
            _ => return None,
        };
        return Some(Reference::GetAtt {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        });
    }
    if let Some(sub) = map.get("Fn::Sub") {
        let (text, bindings) = match sub {
            Value::String(text) => (text.as_str(), None),
            Value::Array(parts) => (parts.first()?.as_str()?, parts.get(1)),
            _ => return None,
        };
        let local: Vec<&str> = bindings
            .and_then(Value::as_object)
            .map(|b| b.keys().map(String::as_str).collect())
            .unwrap_or_default();
        for variable in sub_variables(text) {
            if !local.contains(&variable) {
                found.push(Reference::from_sub_variable(variable));
            }
        }
    }
    None
}

/// Variables named in an `Fn::Sub` string. `${!Literal}` is an escape.
pub fn sub_variables(text: &str) -> Vec<&str> {
    let mut variables = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let variable = after[..end].trim();
        if !variable.is_empty() && !variable.starts_with('!') {
            variables.push(variable);
        }
        rest = &after[end + 1..];
    }
    variables
}
