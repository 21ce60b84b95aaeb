//! Process environment contract shared by generated functions.
//!
//! Deployed functions receive two JSON maps: `TABLE_NAMES` (logical table
//! key such as `TABLE_ORDERS` to physical table name) and `ENV` (user
//! variables declared in the compiler config). Both are unpacked once per
//! process into an [`EnvContext`].

use crate::error::{DynaformError, Result};
use std::collections::BTreeMap;

pub const TABLE_NAMES_VAR: &str = "TABLE_NAMES";
pub const ENV_VAR: &str = "ENV";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvContext {
    tables: BTreeMap<String, String>,
    vars: BTreeMap<String, String>,
    unpacked: bool,
}

impl EnvContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with fixed bindings, already unpacked. Used by tests and
    /// local runs.
    pub fn detached<I, K, V>(tables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvContext {
            tables: tables
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            vars: BTreeMap::new(),
            unpacked: true,
        }
    }

    /// Unpack from the real process environment.
    pub fn from_process() -> Result<Self> {
        let mut ctx = Self::new();
        ctx.unpack_process()?;
        Ok(ctx)
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn unpack_process(&mut self) -> Result<bool> {
        self.unpack(|name| std::env::var(name).ok())
    }

    /// Read both maps through `lookup`. Returns `false` without reading
    /// anything when the context was already unpacked.
    pub fn unpack<F>(&mut self, lookup: F) -> Result<bool>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.unpacked {
            log::debug!("Environment already unpacked");
            return Ok(false);
        }
        let tables = parse_map(TABLE_NAMES_VAR, lookup(TABLE_NAMES_VAR))?;
        let vars = parse_map(ENV_VAR, lookup(ENV_VAR))?;
        log::debug!(
            "Unpacked {} table binding(s) and {} variable(s)",
            tables.len(),
            vars.len()
        );
        self.tables.extend(tables);
        self.vars.extend(vars);
        self.unpacked = true;
        Ok(true)
    }

    pub fn is_unpacked(&self) -> bool {
        self.unpacked
    }

    /// Physical table name for a logical key such as `TABLE_ORDERS`.
    pub fn table_name(&self, env_key: &str) -> Result<&str> {
        self.tables.get(env_key).map(String::as_str).ok_or_else(|| {
            DynaformError::Config(format!("no table bound to {env_key} in {TABLE_NAMES_VAR}"))
        })
    }

    pub fn var(&self, name: &str) -> Result<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DynaformError::Config(format!("{name} is not set in {ENV_VAR}")))
    }

    pub fn tables(&self) -> &BTreeMap<String, String> {
        &self.tables
    }
}

fn parse_map(variable: &str, raw: Option<String>) -> Result<BTreeMap<String, String>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(BTreeMap::new());
    };
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| DynaformError::Config(format!("{variable} is not valid JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(DynaformError::Config(format!(
            "{variable} must be a JSON object"
        )));
    };
    map.into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(DynaformError::Config(format!(
                "{variable}.{key} must be a string, found {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_unpack_reads_both_maps() {
        let mut ctx = EnvContext::new();
        let unpacked = ctx
            .unpack(|name| match name {
                "TABLE_NAMES" => Some(r#"{"TABLE_ORDERS":"prod-Orders-1A2B"}"#.into()),
                "ENV" => Some(r#"{"STAGE":"prod"}"#.into()),
                _ => None,
            })
            .unwrap();
        assert!(unpacked);
        assert_eq!(ctx.table_name("TABLE_ORDERS").unwrap(), "prod-Orders-1A2B");
        assert_eq!(ctx.var("STAGE").unwrap(), "prod");
        assert!(ctx.table_name("TABLE_USERS").is_err());
    }

    #[test]
    fn test_second_unpack_is_noop() {
        let reads = Cell::new(0);
        let mut ctx = EnvContext::new();
        let lookup = |name: &str| {
            reads.set(reads.get() + 1);
            (name == "TABLE_NAMES").then(|| r#"{"TABLE_A":"a"}"#.to_string())
        };
        assert!(ctx.unpack(lookup).unwrap());
        let after_first = ctx.clone();
        assert!(!ctx.unpack(lookup).unwrap());
        assert_eq!(reads.get(), 2);
        assert_eq!(ctx, after_first);
    }

    #[test]
    fn test_non_string_value_is_config_error() {
        let mut ctx = EnvContext::new();
        let err = ctx
            .unpack(|name| (name == "ENV").then(|| r#"{"RETRIES":3}"#.to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert!(err.to_string().contains("ENV.RETRIES"));
        assert!(!ctx.is_unpacked());
    }

    #[test]
    fn test_missing_variables_unpack_empty() {
        let mut ctx = EnvContext::new();
        assert!(ctx.unpack(|_| None).unwrap());
        assert!(ctx.tables().is_empty());
    }
}
