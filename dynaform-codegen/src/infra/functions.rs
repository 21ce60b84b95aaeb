//! Compute stacks: one dispatcher per CDC table and one handler per CDC config.

use dynaform::config::CompilerConfig;
use dynaform::schema::{ChangeDataCaptureConfig, ComputeSizing, DispatcherConfig, IntermediateRepresentation, Table};
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::table::EVENT_BUS_ID;
use super::template::{get_att, ref_, sub, NestedStack, Resource, Stacks, Template, FUNCTION_TYPE};
use crate::type_utils::{artifact_name, table_logical_id, table_parameter};

pub const EVENT_BUS_PARAMETER: &str = "EventBusName";
pub const STREAM_PARAMETER: &str = "StreamArn";
const DEAD_LETTER_QUEUE_ID: &str = "DeadLetterQueue";
const DISPATCHER_ARTIFACT: &str = "dispatcher";

/// Logical id of the nested stack deploying `function_name`.
pub fn stack_name(function_name: &str) -> String {
    format!("{function_name}Stack")
}

/// Add the dispatcher and handler stacks for every table with CDC.
pub fn emit_functions(ir: &IntermediateRepresentation, config: &CompilerConfig, stacks: &mut Stacks) {
    for table in &ir.tables {
        let Some(dispatcher) = &table.dispatcher_config else {
            continue;
        };
        let name = stack_name(&dispatcher.function_name);
        stacks.add_nested(
            &name,
            NestedStack {
                template: dispatcher_template(table, dispatcher, config),
                tables: vec![table.table_name.clone()],
            },
        );
        stacks.bind_parameter(
            &name,
            STREAM_PARAMETER,
            get_att(&table_logical_id(&table.table_name), "StreamArn"),
        );
        stacks.bind_parameter(&name, EVENT_BUS_PARAMETER, ref_(EVENT_BUS_ID));

        for model in ir.models_on(table) {
            for cdc in &model.change_data_capture {
                let name = stack_name(&cdc.function_name);
                let tables: BTreeSet<String> = cdc
                    .readable_tables
                    .iter()
                    .chain(&cdc.writable_tables)
                    .chain(std::iter::once(&table.table_name))
                    .cloned()
                    .collect();
                stacks.add_nested(
                    &name,
                    NestedStack {
                        template: handler_template(table, cdc, config),
                        tables: tables.into_iter().collect(),
                    },
                );
                stacks.bind_parameter(&name, EVENT_BUS_PARAMETER, ref_(EVENT_BUS_ID));
            }
        }
        log::debug!("Compute stacks for table {}", table.table_name);
    }
}

fn function_properties(config: &CompilerConfig, artifact: &str, sizing: ComputeSizing) -> Value {
    json!({
        "CodeUri": format!("{}/{artifact}", config.code.code_uri.trim_end_matches('/')),
        "Handler": "bootstrap",
        "Runtime": config.code.runtime,
        "Architectures": [config.code.architecture],
        "MemorySize": sizing.memory_size,
        "Timeout": sizing.timeout,
    })
}

fn dead_letter_queue() -> Resource {
    Resource::new(
        "AWS::SQS::Queue",
        json!({ "MessageRetentionPeriod": 1_209_600 }),
    )
}

fn dispatcher_template(table: &Table, dispatcher: &DispatcherConfig, config: &CompilerConfig) -> Template {
    let mut template = Template::serverless(format!(
        "Publishes change events for table {}",
        table.table_name
    ));
    template.add_resource(DEAD_LETTER_QUEUE_ID, dead_letter_queue());

    let mut properties = function_properties(config, DISPATCHER_ARTIFACT, dispatcher.sizing);
    properties["Environment"] = json!({
        "Variables": { "EVENT_BUS_NAME": ref_(EVENT_BUS_PARAMETER) }
    });
    properties["Events"] = json!({
        "Stream": {
            "Type": "DynamoDB",
            "Properties": {
                "Stream": ref_(STREAM_PARAMETER),
                "StartingPosition": "TRIM_HORIZON",
                "BatchSize": dispatcher.batch_size,
                "MaximumRetryAttempts": dispatcher.maximum_retry_attempts,
                "BisectBatchOnFunctionError": true,
                "DestinationConfig": {
                    "OnFailure": { "Destination": get_att(DEAD_LETTER_QUEUE_ID, "Arn") }
                }
            }
        }
    });
    properties["Policies"] = json!([
        { "EventBridgePutEventsPolicy": { "EventBusName": ref_(EVENT_BUS_PARAMETER) } },
        { "SQSSendMessagePolicy": { "QueueName": get_att(DEAD_LETTER_QUEUE_ID, "QueueName") } }
    ]);

    template.add_resource(
        dispatcher.function_name.clone(),
        Resource::new(FUNCTION_TYPE, properties),
    );
    template
}

fn handler_template(table: &Table, cdc: &ChangeDataCaptureConfig, config: &CompilerConfig) -> Template {
    let mut template = Template::serverless(format!(
        "{} {} for {} {} changes",
        cdc.kind.as_str().to_lowercase(),
        cdc.handler_name,
        cdc.source_model_name,
        cdc.event.as_str()
    ));
    template.add_resource(DEAD_LETTER_QUEUE_ID, dead_letter_queue());
    template.add_resource(
        format!("{DEAD_LETTER_QUEUE_ID}Policy"),
        Resource::new(
            "AWS::SQS::QueuePolicy",
            json!({
                "Queues": [ref_(DEAD_LETTER_QUEUE_ID)],
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": "events.amazonaws.com" },
                        "Action": "sqs:SendMessage",
                        "Resource": get_att(DEAD_LETTER_QUEUE_ID, "Arn")
                    }]
                }
            }),
        ),
    );

    // The dispatcher names sources after the physical table in the stream ARN.
    let source = sub(format!(
        "${{{}}}.{}",
        table_parameter(&table.table_name),
        cdc.source_model_name
    ));
    let mut properties = function_properties(config, &artifact_name(&cdc.handler_name), cdc.sizing);
    properties["Events"] = json!({
        "Trigger": {
            "Type": "EventBridgeRule",
            "Properties": {
                "EventBusName": ref_(EVENT_BUS_PARAMETER),
                "Pattern": {
                    "source": [source],
                    "detail-type": cdc.event.stream_event_names()
                },
                "DeadLetterConfig": { "Arn": get_att(DEAD_LETTER_QUEUE_ID, "Arn") }
            }
        }
    });
    properties["Policies"] = Value::Array(table_policies(cdc));

    template.add_resource(
        cdc.function_name.clone(),
        Resource::new(FUNCTION_TYPE, properties),
    );
    template
}

/// Read access to readable tables, CRUD access to writable ones.
fn table_policies(cdc: &ChangeDataCaptureConfig) -> Vec<Value> {
    let writable: BTreeSet<&String> = cdc.writable_tables.iter().collect();
    let readable = cdc
        .readable_tables
        .iter()
        .filter(|t| !writable.contains(t))
        .map(|t| json!({ "DynamoDBReadPolicy": { "TableName": ref_(&table_parameter(t)) } }));
    let crud = writable
        .iter()
        .map(|t| json!({ "DynamoDBCrudPolicy": { "TableName": ref_(&table_parameter(t)) } }));
    readable.chain(crud).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaform::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = r#"
type Order
  @table(name: "Orders")
  @compositeKey(pkFields: ["customerId"], pkPrefix: "CUSTOMER", skFields: ["orderId"], skPrefix: "ORDER")
  @reacts(event: INSERT, handler: "notifyCustomer", memorySize: 512)
  @enriches(event: UPSERT, targetModel: "Invoice", readsFrom: ["Customer"]) {
  customerId: ID!
  orderId: ID!
}

type Invoice @partitionKey(pkFields: ["invoiceId"]) {
  invoiceId: ID!
}

type Customer @partitionKey(pkFields: ["customerId"]) {
  customerId: ID!
}
"#;

    fn stacks() -> Stacks {
        let config = CompilerConfig::default();
        let ir = parse_schema_str(SCHEMA, &config).unwrap();
        let mut stacks = Stacks::new(Template::serverless("root"));
        emit_functions(&ir, &config, &mut stacks);
        stacks
    }

    #[test]
    fn test_one_dispatcher_and_one_stack_per_handler() {
        let stacks = stacks();
        assert_eq!(
            stacks.nested_names(),
            vec!["DispatcherOrdersStack", "FnEnrichOrderUpsertStack", "FnNotifyCustomerStack"]
        );
        assert_eq!(
            stacks.root.resources["FnNotifyCustomerStack"].properties["Location"],
            json!("nested/FnNotifyCustomerStack.yml")
        );
    }

    #[test]
    fn test_dispatcher_stream_source() {
        let stacks = stacks();
        let dispatcher = &stacks.nested["DispatcherOrdersStack"];
        assert_eq!(dispatcher.tables, vec!["Orders"]);
        let stream = &dispatcher.template.resources["DispatcherOrders"].properties["Events"]["Stream"];
        assert_eq!(stream["Type"], json!("DynamoDB"));
        assert_eq!(stream["Properties"]["BatchSize"], json!(10));
        assert_eq!(stream["Properties"]["BisectBatchOnFunctionError"], json!(true));

        let forwarded = stacks.root.resources["DispatcherOrdersStack"]
            .forwarded_parameters()
            .unwrap();
        assert_eq!(forwarded["StreamArn"], json!({ "Fn::GetAtt": ["Orders", "StreamArn"] }));
    }

    #[test]
    fn test_handler_rule_and_policies() {
        let stacks = stacks();
        let enricher = &stacks.nested["FnEnrichOrderUpsertStack"];
        assert_eq!(enricher.tables, vec!["Customer", "Invoice", "Orders"]);

        let function = &enricher.template.resources["FnEnrichOrderUpsert"].properties;
        let pattern = &function["Events"]["Trigger"]["Properties"]["Pattern"];
        assert_eq!(pattern["source"], json!([{ "Fn::Sub": "${TableOrders}.Order" }]));
        assert_eq!(pattern["detail-type"], json!(["INSERT", "MODIFY"]));
        assert_eq!(
            function["Policies"],
            json!([
                { "DynamoDBReadPolicy": { "TableName": { "Ref": "TableCustomer" } } },
                { "DynamoDBReadPolicy": { "TableName": { "Ref": "TableOrders" } } },
                { "DynamoDBCrudPolicy": { "TableName": { "Ref": "TableInvoice" } } }
            ])
        );

        let reactor = &stacks.nested["FnNotifyCustomerStack"].template;
        assert_eq!(reactor.resources["FnNotifyCustomer"].properties["MemorySize"], json!(512));
        assert_eq!(
            reactor.resources["FnNotifyCustomer"].properties["CodeUri"],
            json!("../../target/lambda/notify-customer")
        );
    }
}
