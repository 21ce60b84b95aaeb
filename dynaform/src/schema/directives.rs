//! The closed catalog of directives the compiler understands.
//!
//! Every directive declares its location and argument schema up front;
//! [`parse_directives`] checks each AST directive against that schema and
//! hands back typed arguments. Directives outside the catalog (for example
//! `@deprecated`) are skipped.

use crate::error::{DynaformError, Result};
use graphql_parser::schema::{Directive, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Table,
    PartitionKey,
    CompositeKey,
    SimpleIndex,
    SecondaryIndex,
    Ledger,
    Public,
    Consistent,
    Reacts,
    Enriches,
    Reduces,
    Column,
    Computed,
    Ttl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveLocation {
    Type,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Boolean,
    Int,
    Enum(&'static [&'static str]),
    StringList,
}

impl ArgKind {
    fn describe(self) -> String {
        match self {
            ArgKind::String => "string".to_string(),
            ArgKind::Boolean => "boolean".to_string(),
            ArgKind::Int => "int".to_string(),
            ArgKind::Enum(values) => format!("enum ({})", values.join("|")),
            ArgKind::StringList => "list of strings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

const fn arg(name: &'static str, kind: ArgKind, required: bool) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        required,
    }
}

pub const CDC_EVENTS: &[&str] = &["INSERT", "MODIFY", "REMOVE", "UPSERT"];
pub const INDEX_TYPES: &[&str] = &["GSI", "LSI"];
pub const PROJECTION_TYPES: &[&str] = &["ALL", "KEYS_ONLY"];

const TABLE_ARGS: &[ArgSpec] = &[
    arg("name", ArgKind::String, true),
    arg("enablePointInTimeRecovery", ArgKind::Boolean, false),
    arg("enableStreaming", ArgKind::Boolean, false),
];

const PARTITION_KEY_ARGS: &[ArgSpec] = &[
    arg("pkFields", ArgKind::StringList, true),
    arg("pkPrefix", ArgKind::String, false),
];

const COMPOSITE_KEY_ARGS: &[ArgSpec] = &[
    arg("pkFields", ArgKind::StringList, true),
    arg("pkPrefix", ArgKind::String, false),
    arg("skFields", ArgKind::StringList, true),
    arg("skPrefix", ArgKind::String, false),
];

const SIMPLE_INDEX_ARGS: &[ArgSpec] = &[
    arg("field", ArgKind::String, true),
    arg("name", ArgKind::String, false),
];

const SECONDARY_INDEX_ARGS: &[ArgSpec] = &[
    arg("name", ArgKind::String, true),
    arg("type", ArgKind::Enum(INDEX_TYPES), false),
    arg("pkFields", ArgKind::StringList, false),
    arg("pkPrefix", ArgKind::String, false),
    arg("skFields", ArgKind::StringList, false),
    arg("skPrefix", ArgKind::String, false),
    arg("projection", ArgKind::Enum(PROJECTION_TYPES), false),
];

const REACTS_ARGS: &[ArgSpec] = &[
    arg("event", ArgKind::Enum(CDC_EVENTS), true),
    arg("handler", ArgKind::String, false),
    arg("readsFrom", ArgKind::StringList, false),
    arg("writesTo", ArgKind::StringList, false),
    arg("memorySize", ArgKind::Int, false),
    arg("timeout", ArgKind::Int, false),
];

const TARGETED_CDC_ARGS: &[ArgSpec] = &[
    arg("event", ArgKind::Enum(CDC_EVENTS), true),
    arg("targetModel", ArgKind::String, true),
    arg("handler", ArgKind::String, false),
    arg("readsFrom", ArgKind::StringList, false),
    arg("writesTo", ArgKind::StringList, false),
    arg("memorySize", ArgKind::Int, false),
    arg("timeout", ArgKind::Int, false),
];

const COLUMN_ARGS: &[ArgSpec] = &[
    arg("name", ArgKind::String, true),
    arg("legacyNames", ArgKind::StringList, false),
];

const COMPUTED_ARGS: &[ArgSpec] = &[
    arg("function", ArgKind::String, true),
    arg("virtual", ArgKind::Boolean, false),
];

const TTL_ARGS: &[ArgSpec] = &[arg("duration", ArgKind::String, false)];

impl DirectiveKind {
    pub const ALL: &'static [DirectiveKind] = &[
        DirectiveKind::Table,
        DirectiveKind::PartitionKey,
        DirectiveKind::CompositeKey,
        DirectiveKind::SimpleIndex,
        DirectiveKind::SecondaryIndex,
        DirectiveKind::Ledger,
        DirectiveKind::Public,
        DirectiveKind::Consistent,
        DirectiveKind::Reacts,
        DirectiveKind::Enriches,
        DirectiveKind::Reduces,
        DirectiveKind::Column,
        DirectiveKind::Computed,
        DirectiveKind::Ttl,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DirectiveKind::Table => "table",
            DirectiveKind::PartitionKey => "partitionKey",
            DirectiveKind::CompositeKey => "compositeKey",
            DirectiveKind::SimpleIndex => "simpleIndex",
            DirectiveKind::SecondaryIndex => "secondaryIndex",
            DirectiveKind::Ledger => "ledger",
            DirectiveKind::Public => "public",
            DirectiveKind::Consistent => "consistent",
            DirectiveKind::Reacts => "reacts",
            DirectiveKind::Enriches => "enriches",
            DirectiveKind::Reduces => "reduces",
            DirectiveKind::Column => "column",
            DirectiveKind::Computed => "computed",
            DirectiveKind::Ttl => "ttl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn location(self) -> DirectiveLocation {
        match self {
            DirectiveKind::Column | DirectiveKind::Computed | DirectiveKind::Ttl => {
                DirectiveLocation::Field
            }
            _ => DirectiveLocation::Type,
        }
    }

    pub fn arguments(self) -> &'static [ArgSpec] {
        match self {
            DirectiveKind::Table => TABLE_ARGS,
            DirectiveKind::PartitionKey => PARTITION_KEY_ARGS,
            DirectiveKind::CompositeKey => COMPOSITE_KEY_ARGS,
            DirectiveKind::SimpleIndex => SIMPLE_INDEX_ARGS,
            DirectiveKind::SecondaryIndex => SECONDARY_INDEX_ARGS,
            DirectiveKind::Ledger | DirectiveKind::Public | DirectiveKind::Consistent => &[],
            DirectiveKind::Reacts => REACTS_ARGS,
            DirectiveKind::Enriches | DirectiveKind::Reduces => TARGETED_CDC_ARGS,
            DirectiveKind::Column => COLUMN_ARGS,
            DirectiveKind::Computed => COMPUTED_ARGS,
            DirectiveKind::Ttl => TTL_ARGS,
        }
    }

    /// Whether a node may carry this directive more than once.
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            DirectiveKind::SimpleIndex
                | DirectiveKind::SecondaryIndex
                | DirectiveKind::Reacts
                | DirectiveKind::Enriches
                | DirectiveKind::Reduces
        )
    }

    pub fn is_primary_key(self) -> bool {
        matches!(self, DirectiveKind::PartitionKey | DirectiveKind::CompositeKey)
    }
}

/// A type-checked argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Boolean(bool),
    Int(i64),
    Enum(String),
    StringList(Vec<String>),
}

/// A catalog directive whose arguments matched its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDirective {
    pub kind: DirectiveKind,
    /// `Type` or `Type.field`, used in error messages.
    pub location: String,
    args: BTreeMap<&'static str, ArgValue>,
}

impl ParsedDirective {
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.args.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.args.get(name) {
            Some(ArgValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.args.get(name) {
            Some(ArgValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn enum_value(&self, name: &str) -> Option<&str> {
        match self.args.get(name) {
            Some(ArgValue::Enum(s)) => Some(s),
            _ => None,
        }
    }

    pub fn string_list(&self, name: &str) -> Option<&[String]> {
        match self.args.get(name) {
            Some(ArgValue::StringList(list)) => Some(list),
            _ => None,
        }
    }

    /// Value of a required string argument; the catalog guarantees presence.
    pub fn required_string(&self, name: &str) -> Result<&str> {
        self.string(name).ok_or_else(|| self.error(name, "is required"))
    }

    pub fn required_string_list(&self, name: &str) -> Result<&[String]> {
        self.string_list(name)
            .ok_or_else(|| self.error(name, "is required"))
    }

    /// Integer argument that must fit a positive u32.
    pub fn positive_int(&self, name: &str) -> Result<Option<u32>> {
        match self.int(name) {
            None => Ok(None),
            Some(value) if value > 0 && value <= i64::from(u32::MAX) => Ok(Some(value as u32)),
            Some(value) => Err(self.error(name, format!("must be a positive integer, got {value}"))),
        }
    }

    pub fn error(&self, argument: &str, message: impl Into<String>) -> DynaformError {
        DynaformError::directive(&self.location, self.kind.name(), argument, message)
    }
}

/// Parse every catalog directive attached to a schema node.
pub fn parse_directives(
    location: &str,
    expected: DirectiveLocation,
    directives: &[Directive<'_, String>],
) -> Result<Vec<ParsedDirective>> {
    let mut parsed: Vec<ParsedDirective> = Vec::new();
    for directive in directives {
        if let Some(d) = parse_directive(location, expected, directive)? {
            if !d.kind.is_repeatable() && parsed.iter().any(|p| p.kind == d.kind) {
                return Err(d.error("", "may only appear once"));
            }
            parsed.push(d);
        }
    }
    Ok(parsed)
}

/// Parse one directive. Returns `None` for directives outside the catalog.
pub fn parse_directive(
    location: &str,
    expected: DirectiveLocation,
    directive: &Directive<'_, String>,
) -> Result<Option<ParsedDirective>> {
    let kind = match DirectiveKind::from_name(&directive.name) {
        Some(kind) => kind,
        None => {
            log::debug!("Ignoring directive @{} on {location}", directive.name);
            return Ok(None);
        }
    };

    if kind.location() != expected {
        let allowed = match kind.location() {
            DirectiveLocation::Type => "types",
            DirectiveLocation::Field => "fields",
        };
        return Err(DynaformError::directive(
            location,
            kind.name(),
            "",
            format!("may only be used on {allowed}"),
        ));
    }

    let specs = kind.arguments();
    let mut args = BTreeMap::new();

    for (arg_name, value) in &directive.arguments {
        let spec = specs
            .iter()
            .find(|s| s.name == arg_name.as_str())
            .ok_or_else(|| {
                DynaformError::directive(location, kind.name(), arg_name, "is not a known argument")
            })?;

        if args.contains_key(spec.name) {
            return Err(DynaformError::directive(
                location,
                kind.name(),
                spec.name,
                "is given more than once",
            ));
        }

        if matches!(value, Value::Null) {
            continue;
        }

        let typed = coerce(value, spec.kind).map_err(|found| {
            DynaformError::directive(
                location,
                kind.name(),
                spec.name,
                format!("expected {}, found {found}", spec.kind.describe()),
            )
        })?;
        args.insert(spec.name, typed);
    }

    for spec in specs {
        if spec.required && !args.contains_key(spec.name) {
            return Err(DynaformError::directive(
                location,
                kind.name(),
                spec.name,
                format!("is required ({})", spec.kind.describe()),
            ));
        }
    }

    Ok(Some(ParsedDirective {
        kind,
        location: location.to_string(),
        args,
    }))
}

/// Convert an AST value into the expected kind, or describe what was found.
fn coerce(value: &Value<'_, String>, kind: ArgKind) -> std::result::Result<ArgValue, String> {
    match (kind, value) {
        (ArgKind::String, Value::String(s)) => Ok(ArgValue::String(s.clone())),
        (ArgKind::Boolean, Value::Boolean(b)) => Ok(ArgValue::Boolean(*b)),
        (ArgKind::Int, Value::Int(n)) => n
            .as_i64()
            .map(ArgValue::Int)
            .ok_or_else(|| "an out-of-range int".to_string()),
        (ArgKind::Enum(allowed), Value::Enum(e)) => {
            if allowed.contains(&e.as_str()) {
                Ok(ArgValue::Enum(e.clone()))
            } else {
                Err(format!("unknown enum value {e}"))
            }
        }
        (ArgKind::StringList, Value::List(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(format!("a list containing {}", value_kind(other))),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(ArgValue::StringList),
        (_, other) => Err(value_kind(other).to_string()),
    }
}

fn value_kind(value: &Value<'_, String>) -> &'static str {
    match value {
        Value::Variable(_) => "variable",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::Boolean(_) => "boolean",
        Value::Null => "null",
        Value::Enum(_) => "enum",
        Value::List(_) => "list",
        Value::Object(_) => "object",
    }
}
