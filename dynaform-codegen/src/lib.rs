//! Dynaform code generation: infrastructure templates and typed data-access
//! code from one schema.
//!
//! [`generate`] runs both backends over the same IR. [`write_artifacts`]
//! writes their output all-or-nothing. Build scripts that only need the
//! runtime models can call [`generate_from_schema`].

pub mod infra;
pub mod runtime;
pub mod type_utils;

use dynaform::config::CompilerConfig;
use dynaform::schema::IntermediateRepresentation;
use dynaform::{DynaformError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use runtime::RuntimeModule;

/// Everything one compilation produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    /// Template files keyed by path relative to the infrastructure directory.
    pub infrastructure: BTreeMap<String, String>,
    pub runtime: RuntimeModule,
}

/// Run the infrastructure and runtime backends concurrently over `ir`.
pub fn generate(ir: &IntermediateRepresentation, config: &CompilerConfig) -> Result<Artifacts> {
    let (infrastructure, runtime) = std::thread::scope(|scope| {
        let infrastructure = scope.spawn(|| infra::emit(ir, config).and_then(|s| infra::render(&s)));
        let runtime = scope.spawn(|| runtime::emit(ir));
        (infrastructure.join(), runtime.join())
    });
    let infrastructure = infrastructure
        .map_err(|_| DynaformError::Unexpected("infrastructure backend panicked".into()))??;
    let runtime = runtime.map_err(|_| DynaformError::Unexpected("runtime backend panicked".into()))??;

    log::info!(
        "Generated {} template file(s) and {} handler skeleton(s)",
        infrastructure.len(),
        runtime.handlers.len()
    );
    Ok(Artifacts {
        infrastructure,
        runtime,
    })
}

/// Paths written (or left alone) by [`write_artifacts`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    /// Handler skeletons that already existed.
    pub skipped: Vec<PathBuf>,
}

/// Write every artifact under the two output directories.
///
/// All files are staged next to their destination first; nothing is
/// renamed into place unless every file was staged. Handler skeletons are
/// only written when absent so hand edits survive regeneration.
pub fn write_artifacts(artifacts: &Artifacts, infra_dir: &Path, runtime_dir: &Path) -> Result<WriteReport> {
    let mut report = WriteReport::default();
    let mut pending: Vec<(PathBuf, &str)> = Vec::new();

    for (relative, contents) in &artifacts.infrastructure {
        pending.push((infra_dir.join(relative), contents.as_str()));
    }
    pending.push((runtime_dir.join("models.rs"), artifacts.runtime.models.as_str()));
    let handlers_mod = artifacts.runtime.handlers_mod();
    let handlers_dir = runtime_dir.join("handlers");
    if !artifacts.runtime.handlers.is_empty() {
        pending.push((handlers_dir.join("mod.rs"), handlers_mod.as_str()));
    }
    for (name, contents) in &artifacts.runtime.handlers {
        let path = handlers_dir.join(format!("{name}.rs"));
        if path.exists() {
            report.skipped.push(path);
        } else {
            pending.push((path, contents.as_str()));
        }
    }

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (path, contents) in &pending {
        match stage(path, contents) {
            Ok(tmp) => staged.push((tmp, path.clone())),
            Err(e) => {
                for (tmp, _) in &staged {
                    let _ = std::fs::remove_file(tmp);
                }
                return Err(e);
            }
        }
    }
    for (tmp, path) in staged {
        std::fs::rename(&tmp, &path)?;
        log::debug!("Wrote {}", path.display());
        report.written.push(path);
    }
    for path in &report.skipped {
        log::info!("Keeping existing handler {}", path.display());
    }
    Ok(report)
}

fn stage(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".dynaform-tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    Ok(tmp)
}

/// Generate the runtime models for a schema file.
///
/// Reads the schema at `schema_path` and writes the formatted models to
/// `output_path`. Intended to be called from a `build.rs` build script.
///
/// # Example
///
/// ```no_run
/// // In build.rs:
/// dynaform_codegen::generate_from_schema(
///     "schema/orders.graphql",
///     &format!("{}/models.rs", std::env::var("OUT_DIR").unwrap()),
/// )
/// .unwrap();
/// ```
pub fn generate_from_schema(schema_path: &str, output_path: &str) -> Result<()> {
    let ir = dynaform::schema::parse_schema(Path::new(schema_path), &CompilerConfig::default())?;
    let module = runtime::emit(&ir)?;
    std::fs::write(output_path, module.models)?;
    Ok(())
}

/// Like [`generate_from_schema`] but takes the schema source directly and
/// returns the formatted models. Useful for testing.
pub fn generate_from_schema_str(schema: &str) -> Result<String> {
    let ir = dynaform::schema::parse_schema_str(schema, &CompilerConfig::default())?;
    Ok(runtime::emit(&ir)?.models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaform::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    const ORDER_SCHEMA: &str = r#"
enum OrderStatus { PENDING SHIPPED DELIVERED }

type Order
  @table(name: "Orders")
  @compositeKey(pkFields: ["customerId"], pkPrefix: "CUSTOMER", skFields: ["orderId"], skPrefix: "ORDER")
  @reacts(event: INSERT, handler: "notifyCustomer") {
  customerId: ID!
  orderId: ID!
  status: OrderStatus!
  total: Float! @column(name: "total", legacyNames: ["amount"])
  type: String
}
"#;

    fn artifacts() -> Artifacts {
        let config = CompilerConfig::default();
        let ir = parse_schema_str(ORDER_SCHEMA, &config).unwrap();
        generate(&ir, &config).unwrap()
    }

    #[test]
    fn test_order_scenario() {
        let artifacts = artifacts();

        let root = &artifacts.infrastructure["template.yml"];
        assert_eq!(root.matches("AWS::DynamoDB::Table").count(), 1);
        assert!(root.contains("Orders:"));
        let nested: Vec<_> = artifacts
            .infrastructure
            .keys()
            .filter(|k| k.starts_with("nested/"))
            .cloned()
            .collect();
        assert_eq!(
            nested,
            vec!["nested/DispatcherOrdersStack.yml", "nested/FnNotifyCustomerStack.yml"]
        );

        let reactor = &artifacts.runtime.handlers["notify_customer"];
        assert!(reactor.contains("dynaform::cdc::consumer"));
        assert!(reactor.contains("impl Reactor for NotifyCustomer"));
    }

    #[test]
    fn test_generated_models_are_valid_rust() {
        let code = generate_from_schema_str(ORDER_SCHEMA).unwrap();
        assert!(
            syn::parse_file(&code).is_ok(),
            "Generated code is not valid Rust:\n{}",
            &code[..code.len().min(2000)]
        );
        assert!(code.contains("pub struct Order"));
        assert!(code.contains("pub r#type: Option<String>"));
        assert!(code.contains("fn update_order"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(artifacts(), artifacts());
    }

    #[test]
    fn test_write_artifacts_keeps_existing_handlers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let infra_dir = tmp.path().join("infra");
        let runtime_dir = tmp.path().join("src/generated");
        let handler = runtime_dir.join("handlers/notify_customer.rs");
        std::fs::create_dir_all(handler.parent().unwrap()).unwrap();
        std::fs::write(&handler, "// hand written\n").unwrap();

        let report = write_artifacts(&artifacts(), &infra_dir, &runtime_dir).unwrap();

        assert_eq!(report.skipped, vec![handler.clone()]);
        assert_eq!(std::fs::read_to_string(&handler).unwrap(), "// hand written\n");
        assert!(infra_dir.join("template.yml").exists());
        assert!(infra_dir.join("nested/FnNotifyCustomerStack.yml").exists());
        assert!(runtime_dir.join("models.rs").exists());
        assert!(runtime_dir.join("handlers/mod.rs").exists());
        let leftovers = std::fs::read_dir(&infra_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".dynaform-tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_write_artifacts_writes_nothing_when_staging_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let infra_dir = tmp.path().join("infra");
        // A file where the runtime directory should be makes staging fail.
        let runtime_dir = tmp.path().join("blocked");
        std::fs::write(&runtime_dir, "").unwrap();

        assert!(write_artifacts(&artifacts(), &infra_dir, &runtime_dir).is_err());
        assert!(!infra_dir.join("template.yml").exists());
        assert!(!infra_dir.join("template.yml.dynaform-tmp").exists());
    }
}
