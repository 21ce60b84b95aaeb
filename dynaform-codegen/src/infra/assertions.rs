//! Consistency checks run on the final stack set. Any failure aborts
//! generation before a file is written.

use dynaform::{DynaformError, Result};
use serde_json::Value;
use std::collections::BTreeSet;

use super::template::{collect_references, nested_location, Reference, Stacks, Template, APPLICATION_TYPE};

/// Check that every reference resolves and every nested stack receives
/// exactly the parameters it declares.
pub fn check(stacks: &Stacks) -> Result<()> {
    check_parameter_names("root template", &stacks.root)?;
    check_references("root template", &stacks.root)?;

    for (name, nested) in &stacks.nested {
        let context = format!("nested stack `{name}`");
        check_parameter_names(&context, &nested.template)?;
        check_references(&context, &nested.template)?;

        let resource = stacks.root.resources.get(name).ok_or_else(|| {
            DynaformError::Assertion(format!("nested stack `{name}` has no root resource"))
        })?;
        if resource.kind != APPLICATION_TYPE {
            return Err(DynaformError::Assertion(format!(
                "root resource `{name}` is a {}, not a nested stack",
                resource.kind
            )));
        }
        let location = resource.properties.get("Location").and_then(Value::as_str);
        if location != Some(nested_location(name).as_str()) {
            return Err(DynaformError::Assertion(format!(
                "root resource `{name}` points at {location:?}, expected {}",
                nested_location(name)
            )));
        }

        let declared: BTreeSet<&str> = nested.template.parameters.keys().map(String::as_str).collect();
        let forwarded: BTreeSet<&str> = resource
            .forwarded_parameters()
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default();
        if let Some(missing) = declared.difference(&forwarded).next() {
            return Err(DynaformError::Assertion(format!(
                "nested stack `{name}` declares parameter `{missing}` that the root does not forward"
            )));
        }
        if let Some(extra) = forwarded.difference(&declared).next() {
            return Err(DynaformError::Assertion(format!(
                "root forwards `{extra}` to nested stack `{name}`, which does not declare it"
            )));
        }
    }

    for (id, resource) in &stacks.root.resources {
        if resource.kind == APPLICATION_TYPE && !stacks.nested.contains_key(id) {
            return Err(DynaformError::Assertion(format!(
                "root resource `{id}` deploys a nested stack that was never generated"
            )));
        }
    }
    Ok(())
}

/// Parameter names may only contain ASCII letters and digits.
fn check_parameter_names(context: &str, template: &Template) -> Result<()> {
    for name in template.parameters.keys() {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DynaformError::Assertion(format!(
                "{context} declares parameter `{name}`, which is not alphanumeric"
            )));
        }
    }
    Ok(())
}

fn check_references(context: &str, template: &Template) -> Result<()> {
    let mut values: Vec<&Value> = template.resources.values().map(|r| &r.properties).collect();
    values.extend(template.outputs.values());
    values.extend(template.globals.iter());

    for value in values {
        for reference in collect_references(value) {
            let resolved = match &reference {
                Reference::Ref(name) => {
                    reference.is_pseudo()
                        || template.parameters.contains_key(name)
                        || template.resources.contains_key(name)
                }
                Reference::GetAtt { resource, .. } => template.resources.contains_key(resource),
            };
            if !resolved {
                return Err(DynaformError::Assertion(format!(
                    "{context} references {reference:?}, which it does not define"
                )));
            }
        }
    }
    Ok(())
}
