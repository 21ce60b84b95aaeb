use super::builder::build_ir;
use super::types::IntermediateRepresentation;
use crate::config::CompilerConfig;
use crate::error::{DynaformError, Result};
use std::path::{Path, PathBuf};

/// Parse a schema file and build its IR.
pub fn parse_schema(path: &Path, config: &CompilerConfig) -> Result<IntermediateRepresentation> {
    parse_schema_files(&[path.to_path_buf()], config)
}

/// Parse several schema files as one merged document.
///
/// Files are concatenated in sorted path order so the merged source, and
/// therefore the IR, does not depend on the order paths were discovered in.
pub fn parse_schema_files(
    paths: &[PathBuf],
    config: &CompilerConfig,
) -> Result<IntermediateRepresentation> {
    if paths.is_empty() {
        return Err(DynaformError::Schema("No schema files given".into()));
    }
    let mut sorted = paths.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut merged = String::new();
    for path in &sorted {
        log::debug!("Reading schema {}", path.display());
        merged.push_str(&std::fs::read_to_string(path)?);
        merged.push('\n');
    }
    parse_schema_str(&merged, config)
}

/// Parse schema SDL and build its IR.
pub fn parse_schema_str(content: &str, config: &CompilerConfig) -> Result<IntermediateRepresentation> {
    let document = graphql_parser::schema::parse_schema::<String>(content)
        .map_err(|e| DynaformError::Parse(e.to_string()))?;
    build_ir(&document, config)
}
