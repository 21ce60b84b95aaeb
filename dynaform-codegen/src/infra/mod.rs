//! Infrastructure backend: the root template with every table, nested
//! compute stacks for CDC, and the transforms that wire them together.

pub mod assertions;
pub mod functions;
pub mod table;
pub mod template;
pub mod transforms;

use dynaform::config::CompilerConfig;
use dynaform::schema::IntermediateRepresentation;
use dynaform::Result;
use serde_json::Value;
use std::collections::BTreeMap;

pub use template::{NestedStack, Resource, Stacks, Template};

pub const ROOT_TEMPLATE_FILE: &str = "template.yml";
const YAML_HEADER: &str = "# @generated by dynaform. Do not edit.\n";

/// Build, transform and check the stack set for an IR.
pub fn emit(ir: &IntermediateRepresentation, config: &CompilerConfig) -> Result<Stacks> {
    let mut root = Template::serverless("Tables and change-data-capture functions generated by dynaform");
    root.globals = config.globals.clone();
    for (name, definition) in &config.parameters {
        root.parameters.insert(name.clone(), definition.clone());
    }
    table::emit_tables(ir, &mut root)?;

    let mut stacks = Stacks::new(root);
    functions::emit_functions(ir, config, &mut stacks);

    let stacks = transforms::apply_all(ir, config, stacks)?;
    assertions::check(&stacks)?;
    log::debug!(
        "Infrastructure: {} root resources, {} nested stacks",
        stacks.root.resources.len(),
        stacks.nested.len()
    );
    Ok(stacks)
}

/// Serialize the stack set into files keyed by path relative to the
/// infrastructure output directory.
pub fn render(stacks: &Stacks) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    files.insert(
        ROOT_TEMPLATE_FILE.to_string(),
        format!("{YAML_HEADER}{}", stacks.root.to_yaml()?),
    );
    for (name, nested) in &stacks.nested {
        files.insert(
            template::nested_location(name),
            format!("{YAML_HEADER}{}", nested.template.to_yaml()?),
        );
    }
    Ok(files)
}

/// Resources of a given type in the root template.
pub fn resources_of_type<'a>(template: &'a Template, kind: &str) -> Vec<(&'a String, &'a Value)> {
    template
        .resources
        .iter()
        .filter(|(_, r)| r.kind == kind)
        .map(|(id, r)| (id, &r.properties))
        .collect()
}
