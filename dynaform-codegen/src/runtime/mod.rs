//! Runtime backend: typed records, CRUD extensions and CDC handler skeletons.

mod crud_gen;
mod enum_gen;
mod handler_gen;
mod model_gen;

use dynaform::schema::IntermediateRepresentation;
use dynaform::{DynaformError, Result};
use proc_macro2::TokenStream;
use std::collections::BTreeMap;

use crate::type_utils::handler_module_name;

/// Header written at the top of every regenerated file.
pub const GENERATED_HEADER: &str = "// @generated by dynaform. Do not edit.\n\n";

/// Formatted Rust sources produced from one IR.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeModule {
    /// Contents of `models.rs`.
    pub models: String,
    /// Handler skeletons keyed by module name (`handlers/<name>.rs`).
    pub handlers: BTreeMap<String, String>,
}

impl RuntimeModule {
    /// `handlers/mod.rs` declaring every skeleton module.
    pub fn handlers_mod(&self) -> String {
        let mut out = String::from(GENERATED_HEADER);
        for name in self.handlers.keys() {
            out.push_str(&format!("pub mod {name};\n"));
        }
        out
    }
}

/// Generate every runtime source for the IR.
pub fn emit(ir: &IntermediateRepresentation) -> Result<RuntimeModule> {
    let mut tokens = TokenStream::new();
    tokens.extend(enum_gen::generate_enums(ir));
    tokens.extend(model_gen::generate_models(ir));
    tokens.extend(crud_gen::generate_store_ext(ir));

    let mut models = String::from(GENERATED_HEADER);
    models.push_str(&format_token_stream(tokens)?);

    let mut handlers = BTreeMap::new();
    for config in ir.cdc_configs() {
        let source = format_token_stream(handler_gen::generate_handler(config))?;
        handlers.insert(handler_module_name(&config.handler_name), source);
    }
    log::debug!(
        "Generated {} models and {} handler skeletons",
        ir.models.len(),
        handlers.len()
    );

    Ok(RuntimeModule { models, handlers })
}

/// Parse generated tokens as a file and pretty-print them.
pub fn format_token_stream(tokens: TokenStream) -> Result<String> {
    let file = syn::parse2::<syn::File>(tokens)
        .map_err(|e| DynaformError::Unexpected(format!("generated code does not parse: {e}")))?;
    Ok(prettyplease::unparse(&file))
}
