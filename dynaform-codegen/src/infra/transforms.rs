//! Template transforms. Each takes the stack set by value and returns the
//! transformed set; they run in [`TRANSFORMS`] order.

use dynaform::config::CompilerConfig;
use dynaform::schema::{table_env_var, IntermediateRepresentation};
use dynaform::Result;
use serde_json::Value;
use std::collections::BTreeMap;

use super::template::{collect_references, ref_, sub, sub_variables, Reference, Stacks};
use crate::type_utils::{environment_parameter, table_logical_id, table_parameter};

pub const TABLE_NAMES_VARIABLE: &str = "TABLE_NAMES";
pub const ENV_VARIABLE: &str = "ENV";

pub type Transform = fn(&IntermediateRepresentation, &CompilerConfig, Stacks) -> Result<Stacks>;

pub const TRANSFORMS: &[(&str, Transform)] = &[
    ("globals", globals),
    ("table names", table_names),
    ("environment", environment),
];

/// Run every transform in order.
pub fn apply_all(ir: &IntermediateRepresentation, config: &CompilerConfig, stacks: Stacks) -> Result<Stacks> {
    TRANSFORMS.iter().try_fold(stacks, |stacks, (name, transform)| {
        log::debug!("Applying {name} transform");
        transform(ir, config, stacks)
    })
}

/// Copy the root `Globals` into every nested template. References the
/// globals make become nested parameters forwarded from the root.
pub fn globals(_ir: &IntermediateRepresentation, _config: &CompilerConfig, mut stacks: Stacks) -> Result<Stacks> {
    let Some(root_globals) = stacks.root.globals.clone() else {
        return Ok(stacks);
    };
    let references: Vec<Reference> = collect_references(&root_globals)
        .into_iter()
        .filter(|r| !r.is_pseudo())
        .collect();
    let nested_globals = localize(&root_globals);

    for name in stacks.nested_names() {
        if let Some(nested) = stacks.nested.get_mut(&name) {
            nested.template.globals = Some(nested_globals.clone());
        }
        for reference in &references {
            stacks.bind_parameter(&name, &reference.parameter_name(), reference.to_value());
        }
    }
    Ok(stacks)
}

/// Rewrite attribute references into references to the parameters that
/// carry them into a nested stack.
fn localize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(localize).collect()),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::Array(_) | Value::String(_)) = map.get("Fn::GetAtt") {
                    if let Some(reference) = collect_references(value).into_iter().next() {
                        return ref_(&reference.parameter_name());
                    }
                }
                match map.get("Fn::Sub") {
                    Some(Value::String(text)) => return sub(localize_sub(text)),
                    Some(Value::Array(parts)) => {
                        let mut parts: Vec<Value> = parts.iter().map(localize).collect();
                        if let Some(Value::String(text)) = parts.first_mut() {
                            *text = localize_sub(text);
                        }
                        return serde_json::json!({ "Fn::Sub": parts });
                    }
                    _ => {}
                }
            }
            Value::Object(map.iter().map(|(k, v)| (k.clone(), localize(v))).collect())
        }
        other => other.clone(),
    }
}

fn localize_sub(text: &str) -> String {
    let mut out = text.to_string();
    for variable in sub_variables(text) {
        if let reference @ Reference::GetAtt { .. } = Reference::from_sub_variable(variable) {
            out = out.replace(
                &format!("${{{variable}}}"),
                &format!("${{{}}}", reference.parameter_name()),
            );
        }
    }
    out
}

/// Bind each table a nested stack touches to a `Table<Name>` parameter and
/// publish the physical names as the `TABLE_NAMES` JSON map.
pub fn table_names(_ir: &IntermediateRepresentation, _config: &CompilerConfig, mut stacks: Stacks) -> Result<Stacks> {
    for name in stacks.nested_names() {
        let tables = stacks
            .nested
            .get(&name)
            .map(|n| n.tables.clone())
            .unwrap_or_default();
        let mut table_map = BTreeMap::new();
        for table in &tables {
            let parameter = table_parameter(table);
            stacks.bind_parameter(&name, &parameter, ref_(&table_logical_id(table)));
            table_map.insert(table_env_var(table), format!("${{{parameter}}}"));
        }
        let value = sub(serde_json::to_string(&table_map)?);
        if let Some(nested) = stacks.nested.get_mut(&name) {
            nested.template.set_function_variable(TABLE_NAMES_VARIABLE, value);
        }
    }
    Ok(stacks)
}

/// Declare each configured environment variable as a root parameter,
/// forward it to every nested stack and publish the values as `ENV`.
/// `SENTRY_DSN` is carried by the parameter `SentryDsn`.
pub fn environment(_ir: &IntermediateRepresentation, config: &CompilerConfig, mut stacks: Stacks) -> Result<Stacks> {
    if config.environment.is_empty() {
        return Ok(stacks);
    }
    let mut env_map = BTreeMap::new();
    let mut parameters = Vec::new();
    for variable in &config.environment {
        let parameter = environment_parameter(variable);
        stacks.root.add_string_parameter(&parameter);
        env_map.insert(variable.clone(), format!("${{{parameter}}}"));
        parameters.push(parameter);
    }
    let value = sub(serde_json::to_string(&env_map)?);

    for name in stacks.nested_names() {
        for parameter in &parameters {
            stacks.bind_parameter(&name, parameter, ref_(parameter));
        }
        if let Some(nested) = stacks.nested.get_mut(&name) {
            nested.template.set_function_variable(ENV_VARIABLE, value.clone());
        }
    }
    Ok(stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::template::{NestedStack, Resource, Template, FUNCTION_TYPE};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ir() -> IntermediateRepresentation {
        IntermediateRepresentation {
            models: vec![],
            tables: vec![],
            enums: vec![],
        }
    }

    fn stacks() -> Stacks {
        let mut root = Template::serverless("root");
        root.globals = Some(json!({
            "Function": {
                "Tracing": "Active",
                "Environment": {
                    "Variables": {
                        "STAGE": { "Ref": "Stage" },
                        "REGION": { "Ref": "AWS::Region" },
                        "TOPIC": { "Fn::GetAtt": ["Alerts", "TopicName"] },
                        "BUCKET": { "Fn::Sub": "s3://${Assets.Arn}/data" }
                    }
                }
            }
        }));
        let mut handler = Template::serverless("handler");
        handler.add_resource("FnNotify", Resource::new(FUNCTION_TYPE, json!({ "Handler": "bootstrap" })));
        let mut stacks = Stacks::new(root);
        stacks.add_nested(
            "FnNotifyStack",
            NestedStack {
                template: handler,
                tables: vec!["Orders".into(), "Customer".into()],
            },
        );
        stacks
    }

    #[test]
    fn test_globals_are_copied_and_forwarded() {
        let stacks = globals(&ir(), &CompilerConfig::default(), stacks()).unwrap();
        let nested = &stacks.nested["FnNotifyStack"].template;
        let variables = &nested.globals.as_ref().unwrap()["Function"]["Environment"]["Variables"];
        assert_eq!(variables["STAGE"], json!({ "Ref": "Stage" }));
        assert_eq!(variables["TOPIC"], json!({ "Ref": "AlertsTopicName" }));
        assert_eq!(variables["BUCKET"], json!({ "Fn::Sub": "s3://${AssetsArn}/data" }));

        let forwarded = stacks.root.resources["FnNotifyStack"].forwarded_parameters().unwrap();
        assert_eq!(forwarded["Stage"], json!({ "Ref": "Stage" }));
        assert_eq!(forwarded["AlertsTopicName"], json!({ "Fn::GetAtt": ["Alerts", "TopicName"] }));
        assert_eq!(forwarded["AssetsArn"], json!({ "Fn::GetAtt": ["Assets", "Arn"] }));
        assert!(!forwarded.contains_key("AWS::Region"));
        assert_eq!(nested.parameters.len(), 3);
    }

    #[test]
    fn test_table_names_map() {
        let stacks = table_names(&ir(), &CompilerConfig::default(), stacks()).unwrap();
        let nested = &stacks.nested["FnNotifyStack"].template;
        assert_eq!(
            nested.resources["FnNotify"].properties["Environment"]["Variables"]["TABLE_NAMES"],
            json!({ "Fn::Sub": r#"{"TABLE_CUSTOMER":"${TableCustomer}","TABLE_ORDERS":"${TableOrders}"}"# })
        );
        let forwarded = stacks.root.resources["FnNotifyStack"].forwarded_parameters().unwrap();
        assert_eq!(forwarded["TableOrders"], json!({ "Ref": "Orders" }));
    }

    #[test]
    fn test_environment_map() {
        let config = CompilerConfig {
            environment: vec!["STAGE".into(), "SENTRY_DSN".into()],
            ..CompilerConfig::default()
        };
        let stacks = environment(&ir(), &config, stacks()).unwrap();
        assert!(stacks.root.parameters.contains_key("SentryDsn"));
        assert!(!stacks.root.parameters.contains_key("SENTRY_DSN"));
        let nested = &stacks.nested["FnNotifyStack"].template;
        assert!(nested.parameters.contains_key("Stage"));
        assert!(nested.parameters.contains_key("SentryDsn"));
        assert_eq!(
            nested.resources["FnNotify"].properties["Environment"]["Variables"]["ENV"],
            json!({ "Fn::Sub": r#"{"SENTRY_DSN":"${SentryDsn}","STAGE":"${Stage}"}"# })
        );
        let forwarded = stacks.root.resources["FnNotifyStack"].forwarded_parameters().unwrap();
        assert_eq!(forwarded["SentryDsn"], json!({ "Ref": "SentryDsn" }));
    }

    #[test]
    fn test_no_environment_is_a_no_op() {
        let before = stacks();
        let after = environment(&ir(), &CompilerConfig::default(), before.clone()).unwrap();
        assert_eq!(before, after);
    }
}
