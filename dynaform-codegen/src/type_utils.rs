use dynaform::schema::{Field, FieldKind, KeyPart, Model};
use heck::{ToKebabCase, ToPascalCase, ToSnakeCase};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

/// Struct name for a model or enum type name.
/// e.g. "OrderSummary" -> "OrderSummary", "order_line" -> "OrderLine"
pub fn type_ident(type_name: &str) -> proc_macro2::Ident {
    format_ident!("{}", type_name.to_pascal_case())
}

/// Logical resource name for a table.
/// e.g. "orders" -> "Orders", "order-events" -> "OrderEvents"
pub fn table_logical_id(table_name: &str) -> String {
    table_name.to_pascal_case()
}

/// Parameter carrying a table's physical name into nested stacks.
/// e.g. "Orders" -> "TableOrders"
pub fn table_parameter(table_name: &str) -> String {
    format!("Table{}", table_name.to_pascal_case())
}

/// Parameter carrying an environment variable's value.
/// e.g. "SENTRY_DSN" -> "SentryDsn"
pub fn environment_parameter(variable: &str) -> String {
    variable.to_pascal_case()
}

/// Directory name of a function's build output.
/// e.g. "notifyCustomer" -> "notify-customer"
pub fn artifact_name(name: &str) -> String {
    name.to_kebab_case()
}

/// Handler struct name. e.g. "notifyCustomer" -> "NotifyCustomer"
pub fn handler_struct_name(handler_name: &str) -> String {
    handler_name.to_pascal_case()
}

/// Handler module (and file stem). e.g. "notifyCustomer" -> "notify_customer"
pub fn handler_module_name(handler_name: &str) -> String {
    handler_name.to_snake_case()
}

/// Enum variant for a schema enum value. e.g. "IN_TRANSIT" -> "InTransit"
pub fn enum_variant_ident(value: &str) -> proc_macro2::Ident {
    format_ident!("{}", value.to_pascal_case())
}

/// Rust type of a field without `Option` wrapping.
pub fn field_base_type(field: &Field) -> TokenStream {
    let item = match field.kind {
        FieldKind::Enum => {
            let ident = type_ident(&field.type_name);
            quote! { #ident }
        }
        FieldKind::Embedded => quote! { serde_json::Value },
        FieldKind::Scalar => scalar_type(&field.type_name),
    };
    if field.is_list {
        quote! { Vec<#item> }
    } else {
        item
    }
}

/// Rust type of a field as it appears in the generated struct. Optional
/// scalars become `Option`, lists default to empty.
pub fn field_to_rust_type(field: &Field) -> TokenStream {
    let base_type = field_base_type(field);
    if field.is_required || field.is_list {
        base_type
    } else {
        quote! { Option<#base_type> }
    }
}

fn scalar_type(type_name: &str) -> TokenStream {
    match type_name {
        "Int" => quote! { i64 },
        "Float" => quote! { f64 },
        "Boolean" => quote! { bool },
        "Date" => quote! { chrono::NaiveDate },
        "DateTime" => quote! { chrono::DateTime<chrono::Utc> },
        "JSONObject" => quote! { serde_json::Value },
        _ => quote! { String },
    }
}

/// Storage attribute type of a single-field key attribute.
pub fn key_attribute_type(model: &Model, part: &KeyPart) -> &'static str {
    if !part.is_single_field {
        return "S";
    }
    let numeric = part
        .fields
        .first()
        .and_then(|f| model.field(f))
        .is_some_and(|f| matches!(f.type_name.as_str(), "Int" | "Float"));
    if numeric {
        "N"
    } else {
        "S"
    }
}

/// Check if a field name is a Rust keyword and needs raw identifier syntax.
pub fn safe_field_ident(name: &str) -> proc_macro2::Ident {
    let snake = name.to_snake_case();
    match snake.as_str() {
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "super" | "mod" | "use"
        | "pub" | "impl" | "trait" | "for" | "loop" | "while" | "if" | "else" | "match"
        | "return" | "break" | "continue" | "as" | "in" | "where" | "async" | "await" | "dyn"
        | "move" | "static" | "const" | "unsafe" | "extern" | "true" | "false" | "abstract"
        | "become" | "box" | "do" | "final" | "macro" | "override" | "priv" | "typeof"
        | "unsized" | "virtual" | "yield" | "try" => format_ident!("r#{}", snake),
        // Not allowed as raw identifiers.
        "self" | "crate" => format_ident!("{}_", snake),
        // Clashes with the system metadata field.
        "meta" => format_ident!("meta_"),
        _ => format_ident!("{}", snake),
    }
}
