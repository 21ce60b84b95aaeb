//! Compiler configuration, read from `dynaform.yml`.

use crate::error::{DynaformError, Result};
use crate::schema::ComputeSizing;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Glob patterns of schema files, merged in sorted path order.
    pub schema: Vec<String>,
    pub outputs: OutputConfig,
    pub dispatcher: DispatcherDefaults,
    pub handler: HandlerDefaults,
    /// Environment variable names forwarded to every function as parameters.
    pub environment: Vec<String>,
    /// Copied verbatim into the root template's `Globals` section.
    pub globals: Option<serde_json::Value>,
    /// Root template parameters, by name.
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub code: CodeConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            schema: vec!["schema/**/*.graphql".to_string()],
            outputs: OutputConfig::default(),
            dispatcher: DispatcherDefaults::default(),
            handler: HandlerDefaults::default(),
            environment: Vec::new(),
            globals: None,
            parameters: BTreeMap::new(),
            code: CodeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Directory receiving `template.yml` and `nested/`.
    pub infrastructure: String,
    /// Directory receiving `models.rs` and `handlers/`.
    pub runtime: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            infrastructure: "build/infra".to_string(),
            runtime: "src/generated".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatcherDefaults {
    pub batch_size: u32,
    pub maximum_retry_attempts: u32,
    pub memory_size: u32,
    pub timeout: u32,
}

impl Default for DispatcherDefaults {
    fn default() -> Self {
        DispatcherDefaults {
            batch_size: 10,
            maximum_retry_attempts: 3,
            memory_size: 384,
            timeout: 60,
        }
    }
}

impl DispatcherDefaults {
    pub fn sizing(&self) -> ComputeSizing {
        ComputeSizing {
            memory_size: self.memory_size,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandlerDefaults {
    pub memory_size: u32,
    pub timeout: u32,
}

impl Default for HandlerDefaults {
    fn default() -> Self {
        HandlerDefaults {
            memory_size: 256,
            timeout: 30,
        }
    }
}

impl HandlerDefaults {
    pub fn sizing(&self) -> ComputeSizing {
        ComputeSizing {
            memory_size: self.memory_size,
            timeout: self.timeout,
        }
    }
}

/// Where deployed function code lives, relative to the nested templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeConfig {
    pub code_uri: String,
    pub runtime: String,
    pub architecture: String,
}

impl Default for CodeConfig {
    fn default() -> Self {
        CodeConfig {
            code_uri: "../../target/lambda".to_string(),
            runtime: "provided.al2023".to_string(),
            architecture: "arm64".to_string(),
        }
    }
}

/// Load configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<CompilerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a YAML string. Missing sections take defaults.
pub fn parse_config_str(content: &str) -> Result<CompilerConfig> {
    if content.trim().is_empty() {
        return Ok(CompilerConfig::default());
    }
    let config: CompilerConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl CompilerConfig {
    fn validate(&self) -> Result<()> {
        if self.dispatcher.batch_size == 0 {
            return Err(DynaformError::Config(
                "dispatcher.batchSize must be at least 1".into(),
            ));
        }
        for name in &self.environment {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(DynaformError::Config(format!(
                    "environment variable '{name}' must be SCREAMING_SNAKE_CASE"
                )));
            }
        }
        if let Some(globals) = &self.globals {
            if !globals.is_object() {
                return Err(DynaformError::Config("globals must be a mapping".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(parse_config_str("").unwrap(), CompilerConfig::default());
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = parse_config_str(
            r#"
dispatcher:
  batchSize: 25
handler:
  memorySize: 1024
environment: [STAGE, SENTRY_DSN]
globals:
  Function:
    Tracing: Active
"#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.batch_size, 25);
        assert_eq!(config.dispatcher.maximum_retry_attempts, 3);
        assert_eq!(config.handler.memory_size, 1024);
        assert_eq!(config.handler.timeout, 30);
        assert_eq!(config.environment, vec!["STAGE", "SENTRY_DSN"]);
        assert!(config.globals.is_some());
    }

    #[test]
    fn test_rejects_lowercase_environment_names() {
        let err = parse_config_str("environment: [stage]").unwrap_err();
        assert!(err.to_string().contains("SCREAMING_SNAKE_CASE"));
    }

    #[test]
    fn test_load_config_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("dynaform.yml");
        std::fs::write(&path, "schema: [\"*.graphql\"]\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.schema, vec!["*.graphql"]);
    }
}
