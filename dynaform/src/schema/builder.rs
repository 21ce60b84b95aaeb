//! Builds the [`IntermediateRepresentation`] from a parsed schema document.
//!
//! The walk is order independent: object types are visited sorted by name and
//! every cross-reference is resolved against the full set of declared types,
//! so the same schema always yields the same IR.

use crate::config::CompilerConfig;
use crate::error::{DynaformError, Result};
use crate::schema::directives::{parse_directives, DirectiveKind, DirectiveLocation, ParsedDirective};
use crate::schema::types::*;
use graphql_parser::schema::{
    Definition, Document, EnumType as AstEnum, Field as AstField, InterfaceType, ObjectType,
    Type, TypeDefinition,
};
use heck::{ToLowerCamelCase, ToPascalCase, ToShoutySnakeCase};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Scalars the runtime knows how to store.
pub const SCALARS: &[&str] = &[
    "ID", "String", "Int", "Float", "Boolean", "Date", "DateTime", "JSONObject",
];

/// Fields every model carries; supplied by the runtime rather than the schema.
pub const SYSTEM_FIELDS: &[&str] = &["version", "createdAt", "updatedAt"];

/// Attributes the runtime writes on every item.
pub const RESERVED_COLUMNS: &[&str] = &["pk", "sk", "_et", "_v", "_ct", "_md"];

/// Build the IR for a schema document.
pub fn build_ir(
    document: &Document<'_, String>,
    config: &CompilerConfig,
) -> Result<IntermediateRepresentation> {
    IrBuilder::new(document, config)?.build()
}

/// Table options set through `@table`; any model sharing the table may enable them.
#[derive(Debug, Clone, Copy, Default)]
struct TableFlags {
    enable_streaming: bool,
    enable_point_in_time_recovery: bool,
}

struct IrBuilder<'r, 'd, 'c> {
    config: &'c CompilerConfig,
    objects: BTreeMap<&'r str, &'r ObjectType<'d, String>>,
    interfaces: BTreeMap<&'r str, &'r InterfaceType<'d, String>>,
    enums: BTreeMap<&'r str, &'r AstEnum<'d, String>>,
    scalars: BTreeSet<&'r str>,
    /// Object types that declare a primary key.
    model_names: BTreeSet<&'r str>,
}

impl<'r, 'd, 'c> IrBuilder<'r, 'd, 'c> {
    fn new(document: &'r Document<'d, String>, config: &'c CompilerConfig) -> Result<Self> {
        let mut objects = BTreeMap::new();
        let mut interfaces = BTreeMap::new();
        let mut enums = BTreeMap::new();
        let mut scalars: BTreeSet<&str> = SCALARS.iter().copied().collect();
        let mut seen = BTreeSet::new();

        for definition in &document.definitions {
            let Definition::TypeDefinition(type_def) = definition else {
                continue;
            };
            let name = match type_def {
                TypeDefinition::Object(o) => {
                    objects.insert(o.name.as_str(), o);
                    o.name.as_str()
                }
                TypeDefinition::Interface(i) => {
                    interfaces.insert(i.name.as_str(), i);
                    i.name.as_str()
                }
                TypeDefinition::Enum(e) => {
                    enums.insert(e.name.as_str(), e);
                    e.name.as_str()
                }
                TypeDefinition::Scalar(s) => {
                    scalars.insert(s.name.as_str());
                    s.name.as_str()
                }
                TypeDefinition::Union(u) => u.name.as_str(),
                TypeDefinition::InputObject(i) => i.name.as_str(),
            };
            if !seen.insert(name) {
                return Err(DynaformError::Schema(format!(
                    "Type `{name}` is declared more than once"
                )));
            }
        }

        let mut model_names = BTreeSet::new();
        for (name, object) in &objects {
            let key_count = object
                .directives
                .iter()
                .filter(|d| {
                    DirectiveKind::from_name(&d.name).is_some_and(DirectiveKind::is_primary_key)
                })
                .count();
            if key_count > 1 {
                return Err(DynaformError::Schema(format!(
                    "Type `{name}` declares more than one primary key directive"
                )));
            }
            if key_count == 1 {
                model_names.insert(*name);
            }
        }

        for (name, interface) in &interfaces {
            let has_key = interface
                .directives
                .iter()
                .any(|d| DirectiveKind::from_name(&d.name).is_some_and(DirectiveKind::is_primary_key));
            if has_key {
                return Err(DynaformError::Schema(format!(
                    "Interface `{name}` cannot declare a primary key; put it on the implementing type"
                )));
            }
        }

        Ok(IrBuilder {
            config,
            objects,
            interfaces,
            enums,
            scalars,
            model_names,
        })
    }

    fn build(&self) -> Result<IntermediateRepresentation> {
        let mut models = Vec::new();
        let mut flags: BTreeMap<String, TableFlags> = BTreeMap::new();
        for (name, object) in &self.objects {
            if self.model_names.contains(name) {
                let (model, model_flags) = self.build_model(*object)?;
                let entry = flags.entry(model.table_name.clone()).or_default();
                entry.enable_streaming |= model_flags.enable_streaming;
                entry.enable_point_in_time_recovery |= model_flags.enable_point_in_time_recovery;
                models.push(model);
            } else {
                self.check_not_model(object)?;
            }
        }

        self.resolve_cdc_tables(&mut models)?;
        let tables = build_tables(&models, &flags, self.config)?;
        check_function_names(&models, &tables)?;

        let used_enums: BTreeSet<&str> = models
            .iter()
            .flat_map(|m| m.fields.iter())
            .filter(|f| f.kind == FieldKind::Enum)
            .map(|f| f.type_name.as_str())
            .collect();
        let enums = used_enums
            .into_iter()
            .filter_map(|name| self.enums.get(name))
            .map(|e| EnumType {
                type_name: e.name.clone(),
                values: e.values.iter().map(|v| v.name.clone()).collect(),
            })
            .collect();

        log::debug!(
            "Built IR with {} models on {} tables",
            models.len(),
            tables.len()
        );

        Ok(IntermediateRepresentation {
            models,
            tables,
            enums,
        })
    }

    /// Object types without a key may not carry table-level directives.
    fn check_not_model(&self, object: &ObjectType<'_, String>) -> Result<()> {
        let parsed = parse_directives(&object.name, DirectiveLocation::Type, &object.directives)?;
        if let Some(d) = parsed.first() {
            return Err(DynaformError::Schema(format!(
                "Type `{}` uses @{} but is missing a required @partitionKey or @compositeKey directive",
                object.name,
                d.kind.name()
            )));
        }
        Ok(())
    }

    fn build_model(&self, object: &'r ObjectType<'d, String>) -> Result<(Model, TableFlags)> {
        let type_name = object.name.clone();
        let directives = parse_directives(&type_name, DirectiveLocation::Type, &object.directives)?;
        let find = |kind: DirectiveKind| directives.iter().filter(move |d| d.kind == kind);

        let fields = self.build_fields(object)?;

        let key_directive = directives
            .iter()
            .find(|d| d.kind.is_primary_key())
            .ok_or_else(|| {
                DynaformError::Schema(format!("Type `{type_name}` is missing a primary key directive"))
            })?;
        let primary_key = build_primary_key(&type_name, key_directive, &fields)?;

        let mut secondary_indexes: Vec<SecondaryIndex> = Vec::new();
        for d in &directives {
            let index = match d.kind {
                DirectiveKind::SimpleIndex => build_simple_index(d, &fields)?,
                DirectiveKind::SecondaryIndex => build_secondary_index(d, &fields, &primary_key)?,
                _ => continue,
            };
            if secondary_indexes.iter().any(|i| i.name() == index.name()) {
                return Err(d.error("name", format!("index `{}` is declared twice", index.name())));
            }
            secondary_indexes.push(index);
        }

        let table = find(DirectiveKind::Table).next();
        let table_name = match table {
            Some(t) => t.required_string("name")?.to_string(),
            None => type_name.clone(),
        };
        let table_flags = TableFlags {
            enable_streaming: table.and_then(|t| t.boolean("enableStreaming")).unwrap_or(false),
            enable_point_in_time_recovery: table
                .and_then(|t| t.boolean("enablePointInTimeRecovery"))
                .unwrap_or(false),
        };

        let ttl = self.build_ttl(object, &fields)?;

        let mut change_data_capture = Vec::new();
        for d in &directives {
            let kind = match d.kind {
                DirectiveKind::Reacts => CdcKind::Reactor,
                DirectiveKind::Enriches => CdcKind::Enricher,
                DirectiveKind::Reduces => CdcKind::Reducer,
                _ => continue,
            };
            change_data_capture.push(self.build_cdc(&type_name, &table_name, kind, d)?);
        }

        check_reserved_columns(&type_name, &fields, &primary_key, &secondary_indexes)?;

        let model = Model {
            type_name,
            table_name,
            fields,
            primary_key,
            secondary_indexes,
            ttl,
            consistent: find(DirectiveKind::Consistent).next().is_some(),
            is_ledger: find(DirectiveKind::Ledger).next().is_some(),
            is_public: find(DirectiveKind::Public).next().is_some(),
            change_data_capture,
        };
        Ok((model, table_flags))
    }

    fn build_fields(&self, object: &'r ObjectType<'d, String>) -> Result<Vec<Field>> {
        let mut fields: Vec<Field> = Vec::new();
        let mut columns: BTreeMap<String, String> = BTreeMap::new();

        for ast_field in &object.fields {
            if SYSTEM_FIELDS.contains(&ast_field.name.as_str()) {
                continue;
            }
            let location = format!("{}.{}", object.name, ast_field.name);
            let directives = self.field_directives(object, ast_field)?;

            let (type_name, is_required, is_list) = unwrap_type(&ast_field.field_type);
            let kind = self.field_kind(&location, type_name)?;

            let column = directives.iter().find(|d| d.kind == DirectiveKind::Column);
            let column_name = match column {
                Some(c) => c.required_string("name")?.to_string(),
                None => ast_field.name.clone(),
            };
            let legacy_column_names: Vec<String> = column
                .and_then(|c| c.string_list("legacyNames"))
                .map(|names| names.to_vec())
                .unwrap_or_default();

            for name in std::iter::once(&column_name).chain(legacy_column_names.iter()) {
                if let Some(owner) = columns.insert(name.clone(), ast_field.name.clone()) {
                    return Err(DynaformError::Schema(format!(
                        "Column `{name}` on `{}` is used by both `{owner}` and `{}`",
                        object.name, ast_field.name
                    )));
                }
            }

            let computed = directives
                .iter()
                .find(|d| d.kind == DirectiveKind::Computed)
                .map(|d| -> Result<ComputeFunction> {
                    let function = d.required_string("function")?.trim().to_string();
                    if function.is_empty() {
                        return Err(d.error("function", "must not be empty"));
                    }
                    Ok(ComputeFunction {
                        function,
                        is_virtual: d.boolean("virtual").unwrap_or(false),
                    })
                })
                .transpose()?;

            let is_virtual = computed.as_ref().is_some_and(|c| c.is_virtual);

            fields.push(Field {
                field_name: ast_field.name.clone(),
                column_name,
                legacy_column_names,
                type_name: type_name.to_string(),
                kind,
                is_list,
                is_required: is_required && !is_virtual,
                is_date_type: matches!(type_name, "Date" | "DateTime"),
                computed,
                ean: format!("#{}", ast_field.name),
                eav: format!(":{}", ast_field.name),
            });
        }

        Ok(fields)
    }

    /// A field's own catalog directives, plus those of the same-named
    /// interface fields for every kind the field does not declare itself.
    fn field_directives(
        &self,
        object: &ObjectType<'d, String>,
        ast_field: &AstField<'d, String>,
    ) -> Result<Vec<ParsedDirective>> {
        let location = format!("{}.{}", object.name, ast_field.name);
        let mut directives = parse_directives(&location, DirectiveLocation::Field, &ast_field.directives)?;

        for interface_name in &object.implements_interfaces {
            let Some(interface) = self.interfaces.get(interface_name.as_str()) else {
                continue;
            };
            let Some(inherited) = interface.fields.iter().find(|f| f.name == ast_field.name) else {
                continue;
            };
            let inherited_location = format!("{interface_name}.{}", inherited.name);
            for d in parse_directives(&inherited_location, DirectiveLocation::Field, &inherited.directives)? {
                if !directives.iter().any(|own| own.kind == d.kind) {
                    directives.push(d);
                }
            }
        }
        Ok(directives)
    }

    fn build_ttl(&self, object: &ObjectType<'d, String>, fields: &[Field]) -> Result<Option<TtlConfig>> {
        let mut ttl = None;
        for ast_field in &object.fields {
            let directives = self.field_directives(object, ast_field)?;
            let Some(d) = directives.iter().find(|d| d.kind == DirectiveKind::Ttl) else {
                continue;
            };
            if ttl.is_some() {
                return Err(d.error("", "only one field per model may carry @ttl"));
            }
            let field = fields
                .iter()
                .find(|f| f.field_name == ast_field.name)
                .ok_or_else(|| d.error("", "cannot be applied to a system field"))?;
            if !field.is_date_type || field.is_list {
                return Err(d.error("", "must be applied to a Date or DateTime field"));
            }
            let duration_seconds = d
                .string("duration")
                .map(|s| parse_duration(s).ok_or_else(|| d.error("duration", format!("invalid duration `{s}`"))))
                .transpose()?;
            ttl = Some(TtlConfig {
                field_name: field.field_name.clone(),
                column_name: field.column_name.clone(),
                duration_seconds,
            });
        }
        Ok(ttl)
    }

    fn field_kind(&self, location: &str, type_name: &str) -> Result<FieldKind> {
        if self.scalars.contains(type_name) {
            return Ok(FieldKind::Scalar);
        }
        if self.enums.contains_key(type_name) {
            return Ok(FieldKind::Enum);
        }
        if self.model_names.contains(type_name) {
            return Err(DynaformError::Schema(format!(
                "Field `{location}` references model `{type_name}`; store its key fields instead"
            )));
        }
        if self.objects.contains_key(type_name) {
            return Ok(FieldKind::Embedded);
        }
        Err(DynaformError::Schema(format!(
            "Field `{location}` has unknown type `{type_name}`"
        )))
    }

    fn build_cdc(
        &self,
        type_name: &str,
        table_name: &str,
        kind: CdcKind,
        d: &ParsedDirective,
    ) -> Result<ChangeDataCaptureConfig> {
        let event_name = d
            .enum_value("event")
            .ok_or_else(|| d.error("event", "is required"))?;
        let event = CdcEvent::parse(event_name)
            .ok_or_else(|| d.error("event", format!("unknown event {event_name}")))?;

        let target_model_name = match kind {
            CdcKind::Reactor => None,
            CdcKind::Enricher | CdcKind::Reducer => {
                let target = d.required_string("targetModel")?;
                if !self.model_names.contains(target) {
                    return Err(d.error("targetModel", format!("unknown model `{target}`")));
                }
                Some(target.to_string())
            }
        };

        for arg in ["readsFrom", "writesTo"] {
            for model in d.string_list(arg).unwrap_or_default() {
                if !self.model_names.contains(model.as_str()) {
                    return Err(d.error(arg, format!("unknown model `{model}`")));
                }
            }
        }

        let handler_name = match d.string("handler") {
            Some(h) => h.to_lower_camel_case(),
            None => format!(
                "{}{}{}",
                kind.verb(),
                type_name,
                event.as_str().to_pascal_case()
            ),
        };
        let function_name = format!("Fn{}", handler_name.to_pascal_case());

        // Model names for now; resolved to table names once every model is built.
        let mut readable: Vec<String> = vec![type_name.to_string()];
        readable.extend(d.string_list("readsFrom").unwrap_or_default().iter().cloned());
        let mut writable: Vec<String> = d.string_list("writesTo").unwrap_or_default().to_vec();
        writable.extend(target_model_name.iter().cloned());

        let defaults = self.config.handler.sizing();
        let sizing = ComputeSizing {
            memory_size: d.positive_int("memorySize")?.unwrap_or(defaults.memory_size),
            timeout: d.positive_int("timeout")?.unwrap_or(defaults.timeout),
        };

        log::debug!(
            "{} {} on {table_name}: {type_name} {}",
            kind.as_str(),
            handler_name,
            event.as_str()
        );

        Ok(ChangeDataCaptureConfig {
            kind,
            event,
            source_model_name: type_name.to_string(),
            target_model_name,
            handler_name,
            function_name,
            readable_tables: readable,
            writable_tables: writable,
            sizing,
        })
    }

    /// Replace the model names collected in CDC configs with table names.
    fn resolve_cdc_tables(&self, models: &mut [Model]) -> Result<()> {
        let table_of: BTreeMap<String, String> = models
            .iter()
            .map(|m| (m.type_name.clone(), m.table_name.clone()))
            .collect();
        let resolve = |names: &[String]| -> Result<Vec<String>> {
            let tables: BTreeSet<String> = names
                .iter()
                .map(|n| {
                    table_of.get(n).cloned().ok_or_else(|| {
                        DynaformError::Schema(format!("Unknown model `{n}` in CDC config"))
                    })
                })
                .collect::<Result<_>>()?;
            Ok(tables.into_iter().collect())
        };

        for model in models.iter_mut() {
            for cdc in &mut model.change_data_capture {
                cdc.readable_tables = resolve(&cdc.readable_tables)?;
                cdc.writable_tables = resolve(&cdc.writable_tables)?;
            }
        }
        Ok(())
    }
}

/// Strip non-null and list wrappers: (named type, required, list).
fn unwrap_type<'a>(ty: &'a Type<'_, String>) -> (&'a str, bool, bool) {
    match ty {
        Type::NamedType(name) => (name.as_str(), false, false),
        Type::NonNullType(inner) => {
            let (name, _, list) = unwrap_type(inner);
            (name, true, list)
        }
        Type::ListType(inner) => {
            let (name, _, _) = unwrap_type(inner);
            (name, false, true)
        }
    }
}

fn key_part(
    d: &ParsedDirective,
    fields_arg: &str,
    prefix_arg: &str,
    attribute_name: &str,
    fields: &[Field],
) -> Result<KeyPart> {
    let names = d.required_string_list(fields_arg)?;
    if names.is_empty() {
        return Err(d.error(fields_arg, "must name at least one field"));
    }
    for name in names {
        let field = fields.iter().find(|f| &f.field_name == name).ok_or_else(|| {
            d.error(
                fields_arg,
                format!("references field `{name}` which is not declared on the model"),
            )
        })?;
        if field.is_list || field.kind == FieldKind::Embedded || !field.is_storage_required() {
            return Err(d.error(
                fields_arg,
                format!("field `{name}` must be a stored scalar to be part of a key"),
            ));
        }
        if !field.is_required {
            return Err(d.error(fields_arg, format!("key field `{name}` must be non-null")));
        }
    }

    let prefix = d.string(prefix_arg).map(str::to_string);
    let is_single_field = names.len() == 1 && prefix.is_none();
    let attribute_name = if is_single_field {
        fields
            .iter()
            .find(|f| f.field_name == names[0])
            .map(|f| f.column_name.clone())
            .unwrap_or_else(|| attribute_name.to_string())
    } else {
        attribute_name.to_string()
    };

    Ok(KeyPart {
        attribute_name,
        fields: names.to_vec(),
        prefix,
        is_single_field,
    })
}

fn build_primary_key(type_name: &str, d: &ParsedDirective, fields: &[Field]) -> Result<PrimaryKey> {
    let partition_key = key_part(d, "pkFields", "pkPrefix", "pk", fields)?;
    match d.kind {
        DirectiveKind::PartitionKey => Ok(PrimaryKey::Simple { partition_key }),
        DirectiveKind::CompositeKey => {
            let sort_key = key_part(d, "skFields", "skPrefix", "sk", fields)?;
            Ok(PrimaryKey::Composite {
                partition_key,
                sort_key,
            })
        }
        other => Err(DynaformError::Schema(format!(
            "@{} on `{type_name}` does not declare a primary key",
            other.name()
        ))),
    }
}

fn build_simple_index(d: &ParsedDirective, fields: &[Field]) -> Result<SecondaryIndex> {
    let field_name = d.required_string("field")?;
    let field = fields
        .iter()
        .find(|f| f.field_name == field_name)
        .ok_or_else(|| {
            d.error(
                "field",
                format!("references field `{field_name}` which is not declared on the model"),
            )
        })?;
    let name = d.string("name").unwrap_or(field_name).to_string();
    Ok(SecondaryIndex::Gsi {
        name,
        partition_key: KeyPart {
            attribute_name: field.column_name.clone(),
            fields: vec![field_name.to_string()],
            prefix: None,
            is_single_field: true,
        },
        sort_key: None,
        projection: ProjectionType::All,
    })
}

fn build_secondary_index(
    d: &ParsedDirective,
    fields: &[Field],
    primary_key: &PrimaryKey,
) -> Result<SecondaryIndex> {
    let name = d.required_string("name")?.to_string();
    let projection = match d.enum_value("projection") {
        Some("KEYS_ONLY") => ProjectionType::KeysOnly,
        _ => ProjectionType::All,
    };
    let pk_attr = format!("{name}pk");
    let sk_attr = format!("{name}sk");

    match d.enum_value("type").unwrap_or("GSI") {
        "LSI" => {
            if d.string_list("pkFields").is_some() {
                return Err(d.error("pkFields", "a local index shares the table partition key"));
            }
            let Some(primary_sort) = primary_key.sort_key() else {
                return Err(d.error("type", "a local index requires a composite primary key"));
            };
            let sort_key = key_part(d, "skFields", "skPrefix", &sk_attr, fields)?;
            if sort_key.fields == primary_sort.fields && sort_key.prefix == primary_sort.prefix {
                return Err(d.error(
                    "skFields",
                    "a local index sort key must differ from the primary sort key",
                ));
            }
            Ok(SecondaryIndex::Lsi {
                name,
                sort_key,
                projection,
            })
        }
        _ => {
            if d.string_list("pkFields").is_none() {
                return Err(d.error("pkFields", "is required for a global index"));
            }
            let partition_key = key_part(d, "pkFields", "pkPrefix", &pk_attr, fields)?;
            let sort_key = match d.string_list("skFields") {
                Some(_) => Some(key_part(d, "skFields", "skPrefix", &sk_attr, fields)?),
                None => None,
            };
            Ok(SecondaryIndex::Gsi {
                name,
                partition_key,
                sort_key,
                projection,
            })
        }
    }
}

/// Parse durations such as `90d`, `12h`, `30m` or `45s` into seconds.
pub fn parse_duration(value: &str) -> Option<u64> {
    let re = Regex::new(r"^(\d+)\s*([smhd])$").ok()?;
    let caps = re.captures(value.trim())?;
    let amount: u64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => 24 * 60 * 60,
    };
    amount.checked_mul(unit)
}

fn check_reserved_columns(
    type_name: &str,
    fields: &[Field],
    primary_key: &PrimaryKey,
    indexes: &[SecondaryIndex],
) -> Result<()> {
    let mut synthetic: BTreeSet<String> = RESERVED_COLUMNS.iter().map(|s| s.to_string()).collect();
    for part in primary_key.parts().into_iter().chain(indexes.iter().flat_map(|i| i.parts())) {
        if !part.is_single_field {
            synthetic.insert(part.attribute_name.clone());
        }
    }
    for field in fields {
        for column in field.column_names_for_read() {
            if synthetic.contains(&column) {
                return Err(DynaformError::Schema(format!(
                    "Column `{column}` of `{type_name}.{}` collides with a reserved key attribute",
                    field.field_name
                )));
            }
        }
    }
    Ok(())
}

/// Shape of an index as the storage service sees it.
fn index_shape(index: &SecondaryIndex) -> (bool, Vec<&str>, ProjectionType) {
    let attrs = index.parts().iter().map(|p| p.attribute_name.as_str()).collect();
    (matches!(index, SecondaryIndex::Lsi { .. }), attrs, index.projection())
}

fn build_tables(
    models: &[Model],
    flags: &BTreeMap<String, TableFlags>,
    config: &CompilerConfig,
) -> Result<Vec<Table>> {
    let mut by_table: BTreeMap<&str, Vec<&Model>> = BTreeMap::new();
    for model in models {
        by_table.entry(model.table_name.as_str()).or_default().push(model);
    }

    let mut tables = Vec::new();
    for (table_name, members) in by_table {
        let first = members[0];
        let mut secondary_indexes: Vec<SecondaryIndex> = Vec::new();
        let mut ttl_attribute: Option<String> = None;
        let mut enable_streaming = false;
        let mut enable_point_in_time_recovery = false;

        for model in &members {
            if model.primary_key.is_composite() != first.primary_key.is_composite() {
                return Err(DynaformError::KeyShape {
                    table: table_name.to_string(),
                    model: model.type_name.clone(),
                });
            }
            let attrs = |pk: &PrimaryKey| -> Vec<String> {
                pk.parts().iter().map(|p| p.attribute_name.clone()).collect()
            };
            if attrs(&model.primary_key) != attrs(&first.primary_key) {
                return Err(DynaformError::Schema(format!(
                    "Table `{table_name}`: `{}` and `{}` store their primary keys under different attributes",
                    first.type_name, model.type_name
                )));
            }

            for index in &model.secondary_indexes {
                match secondary_indexes.iter().find(|i| i.name() == index.name()) {
                    Some(existing) if index_shape(existing) != index_shape(index) => {
                        return Err(DynaformError::Schema(format!(
                            "Table `{table_name}`: index `{}` is declared with different shapes",
                            index.name()
                        )));
                    }
                    Some(_) => {}
                    None => secondary_indexes.push(index.clone()),
                }
            }

            if let Some(ttl) = &model.ttl {
                match &ttl_attribute {
                    Some(existing) if existing != &ttl.column_name => {
                        return Err(DynaformError::Schema(format!(
                            "Table `{table_name}`: models disagree on the TTL attribute (`{existing}` vs `{}`)",
                            ttl.column_name
                        )));
                    }
                    _ => ttl_attribute = Some(ttl.column_name.clone()),
                }
            }

            enable_streaming |= !model.change_data_capture.is_empty();
        }

        if let Some(f) = flags.get(table_name) {
            enable_streaming |= f.enable_streaming;
            enable_point_in_time_recovery |= f.enable_point_in_time_recovery;
        }

        let has_cdc = members.iter().any(|m| !m.change_data_capture.is_empty());
        let dispatcher_config = has_cdc.then(|| DispatcherConfig {
            batch_size: config.dispatcher.batch_size,
            maximum_retry_attempts: config.dispatcher.maximum_retry_attempts,
            sizing: config.dispatcher.sizing(),
            function_name: format!("Dispatcher{}", table_name.to_pascal_case()),
        });

        tables.push(Table {
            table_name: table_name.to_string(),
            primary_key: first.primary_key.clone(),
            secondary_indexes,
            enable_streaming,
            enable_point_in_time_recovery,
            ttl_attribute,
            dispatcher_config,
        });
    }
    Ok(tables)
}

fn check_function_names(models: &[Model], tables: &[Table]) -> Result<()> {
    let mut seen: BTreeMap<&str, String> = BTreeMap::new();
    let dispatchers = tables.iter().filter_map(|t| {
        t.dispatcher_config
            .as_ref()
            .map(|d| (d.function_name.as_str(), format!("dispatcher for table `{}`", t.table_name)))
    });
    let handlers = models.iter().flat_map(|m| {
        m.change_data_capture
            .iter()
            .map(move |c| (c.function_name.as_str(), format!("{} on `{}`", c.kind.as_str(), m.type_name)))
    });
    for (name, owner) in dispatchers.chain(handlers) {
        if let Some(previous) = seen.insert(name, owner.clone()) {
            return Err(DynaformError::Schema(format!(
                "Function name `{name}` is used by both the {previous} and the {owner}"
            )));
        }
    }
    Ok(())
}

/// Environment key under which a table's physical name is published.
pub fn table_env_var(table_name: &str) -> String {
    format!("TABLE_{}", table_name.to_shouty_snake_case())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    const ORDER_SCHEMA: &str = r#"
enum OrderStatus { PENDING SHIPPED }

interface Timestamped {
  placedAt: DateTime! @column(name: "placed_at")
}

type Address {
  street: String!
  city: String!
}

type Order implements Timestamped
  @table(name: "Orders", enablePointInTimeRecovery: true)
  @compositeKey(pkFields: ["customerId"], pkPrefix: "CUSTOMER", skFields: ["orderId"], skPrefix: "ORDER")
  @secondaryIndex(name: "gsi1", pkFields: ["status"], skFields: ["placedAt"])
  @secondaryIndex(name: "lsi1", type: LSI, skFields: ["placedAt"], projection: KEYS_ONLY)
  @reacts(event: INSERT, handler: "notifyCustomer", memorySize: 512) {
  customerId: ID!
  orderId: ID!
  status: OrderStatus!
  placedAt: DateTime!
  total: Float @column(name: "total", legacyNames: ["amount"])
  shipping: Address
  tags: [String!]
  label: String @computed(function: "crate::compute::order_label", virtual: true)
  expiresAt: DateTime @ttl(duration: "90d")
  version: Int!
  createdAt: DateTime!
  updatedAt: DateTime!
}

type OrderSummary
  @table(name: "Orders")
  @compositeKey(pkFields: ["customerId"], pkPrefix: "CUSTOMER", skFields: ["period"], skPrefix: "SUMMARY") {
  customerId: ID!
  period: String!
  orderCount: Int!
}

type Customer @partitionKey(pkFields: ["customerId"]) @public
  @enriches(event: UPSERT, targetModel: "OrderSummary", writesTo: ["Order"]) {
  customerId: ID!
  email: String!
}
"#;

    fn build(sdl: &str) -> Result<IntermediateRepresentation> {
        parse_schema_str(sdl, &CompilerConfig::default())
    }

    #[test]
    fn test_builds_order_model() {
        let ir = build(ORDER_SCHEMA).unwrap();
        let names: Vec<_> = ir.models.iter().map(|m| m.type_name.as_str()).collect();
        assert_eq!(names, vec!["Customer", "Order", "OrderSummary"]);

        let order = ir.model("Order").unwrap();
        assert_eq!(order.table_name, "Orders");
        assert!(order.primary_key.is_composite());
        let pk = order.primary_key.partition_key();
        assert_eq!(pk.attribute_name, "pk");
        assert_eq!(pk.prefix.as_deref(), Some("CUSTOMER"));
        assert!(!pk.is_single_field);

        // System fields are supplied by the runtime.
        assert!(order.field("version").is_none());
        assert!(order.field("createdAt").is_none());

        let total = order.field("total").unwrap();
        assert_eq!(total.column_names_for_read(), vec!["total", "amount"]);
        assert!(!total.is_required);
        assert_eq!(total.ean, "#total");
        assert_eq!(total.eav, ":total");

        let label = order.field("label").unwrap();
        assert!(!label.is_storage_required());

        assert_eq!(order.field("status").unwrap().kind, FieldKind::Enum);
        assert_eq!(order.field("shipping").unwrap().kind, FieldKind::Embedded);
        assert!(order.field("tags").unwrap().is_list);

        let ttl = order.ttl.as_ref().unwrap();
        assert_eq!(ttl.field_name, "expiresAt");
        assert_eq!(ttl.duration_seconds, Some(90 * 24 * 60 * 60));

        assert_eq!(ir.enums.len(), 1);
        assert_eq!(ir.enums[0].values, vec!["PENDING", "SHIPPED"]);
    }

    #[test]
    fn test_interface_field_directives_are_inherited() {
        let ir = build(ORDER_SCHEMA).unwrap();
        let placed = ir.model("Order").unwrap().field("placedAt").unwrap();
        assert_eq!(placed.column_name, "placed_at");
        assert!(placed.is_date_type);
    }

    #[test]
    fn test_interface_ttl_applies_to_implementing_type() {
        let ir = build(
            r#"
interface Expiring { expiresAt: DateTime @ttl(duration: "1d") }
type Session implements Expiring @partitionKey(pkFields: ["id"]) {
  id: ID!
  expiresAt: DateTime
}
"#,
        )
        .unwrap();
        let ttl = ir.model("Session").unwrap().ttl.as_ref().unwrap();
        assert_eq!(ttl.field_name, "expiresAt");
        assert_eq!(ttl.duration_seconds, Some(86_400));
    }

    #[test]
    fn test_own_directives_merge_with_interface_directives() {
        let ir = build(
            r#"
interface Expiring { expiresAt: DateTime @ttl(duration: "1h") @column(name: "expires") }
type Session implements Expiring @partitionKey(pkFields: ["id"]) {
  id: ID!
  expiresAt: DateTime @deprecated @column(name: "exp_at")
}
"#,
        )
        .unwrap();
        let session = ir.model("Session").unwrap();
        assert_eq!(session.field("expiresAt").unwrap().column_name, "exp_at");
        let ttl = session.ttl.as_ref().unwrap();
        assert_eq!(ttl.column_name, "exp_at");
        assert_eq!(ttl.duration_seconds, Some(3_600));
    }

    #[test]
    fn test_indexes_keep_declaration_order() {
        let ir = build(ORDER_SCHEMA).unwrap();
        let order = ir.model("Order").unwrap();
        let names: Vec<_> = order.secondary_indexes.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["gsi1", "lsi1"]);

        match &order.secondary_indexes[0] {
            SecondaryIndex::Gsi {
                partition_key,
                sort_key,
                ..
            } => {
                assert!(partition_key.is_single_field);
                assert_eq!(partition_key.attribute_name, "status");
                assert_eq!(sort_key.as_ref().unwrap().attribute_name, "placed_at");
            }
            other => panic!("expected GSI, got {other:?}"),
        }
        assert_eq!(order.secondary_indexes[1].projection(), ProjectionType::KeysOnly);
    }

    #[test]
    fn test_tables_merge_models_and_attach_dispatcher() {
        let ir = build(ORDER_SCHEMA).unwrap();
        let table_names: Vec<_> = ir.tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(table_names, vec!["Customer", "Orders"]);

        let orders = ir.table("Orders").unwrap();
        assert!(orders.enable_point_in_time_recovery);
        assert!(orders.enable_streaming);
        assert_eq!(orders.ttl_attribute.as_deref(), Some("expiresAt"));
        let dispatcher = orders.dispatcher_config.as_ref().unwrap();
        assert_eq!(dispatcher.batch_size, 10);
        assert_eq!(dispatcher.function_name, "DispatcherOrders");
        assert_eq!(ir.models_on(orders).count(), 2);
    }

    #[test]
    fn test_cdc_configs() {
        let ir = build(ORDER_SCHEMA).unwrap();
        let reactor = &ir.model("Order").unwrap().change_data_capture[0];
        assert_eq!(reactor.kind, CdcKind::Reactor);
        assert_eq!(reactor.event, CdcEvent::Insert);
        assert_eq!(reactor.handler_name, "notifyCustomer");
        assert_eq!(reactor.function_name, "FnNotifyCustomer");
        assert_eq!(reactor.readable_tables, vec!["Orders"]);
        assert!(reactor.writable_tables.is_empty());
        assert_eq!(reactor.sizing.memory_size, 512);
        assert_eq!(reactor.sizing.timeout, 30);

        let enricher = &ir.model("Customer").unwrap().change_data_capture[0];
        assert_eq!(enricher.kind, CdcKind::Enricher);
        assert_eq!(enricher.handler_name, "enrichCustomerUpsert");
        assert_eq!(enricher.target_model_name.as_deref(), Some("OrderSummary"));
        assert_eq!(enricher.readable_tables, vec!["Customer"]);
        assert_eq!(enricher.writable_tables, vec!["Orders"]);
    }

    #[test]
    fn test_build_is_deterministic_and_order_independent() {
        let first = build(ORDER_SCHEMA).unwrap();
        let second = build(ORDER_SCHEMA).unwrap();
        assert_eq!(first, second);

        // Same definitions, different declaration order.
        let split = ORDER_SCHEMA.find("type OrderSummary").unwrap();
        let reordered = format!("{}\n{}", &ORDER_SCHEMA[split..], &ORDER_SCHEMA[..split]);
        assert_eq!(first, build(&reordered).unwrap());
    }

    #[test]
    fn test_composite_mismatch_names_table() {
        let err = build(
            r#"
type A @table(name: "Shared") @partitionKey(pkFields: ["id"]) { id: ID! }
type B @table(name: "Shared") @compositeKey(pkFields: ["id"], skFields: ["at"]) { id: ID! at: String! }
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::KeyShape);
        let message = err.to_string();
        assert!(message.contains("Shared"), "{message}");
        assert!(message.contains("must be composite (or not)"), "{message}");
    }

    #[test]
    fn test_key_field_must_be_declared() {
        let err = build(r#"type A @partitionKey(pkFields: ["missing"]) { id: ID! }"#).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("@partitionKey(pkFields)"), "{message}");
        assert!(message.contains("`missing`"), "{message}");
    }

    #[test]
    fn test_legacy_alias_collision() {
        let err = build(
            r#"type A @partitionKey(pkFields: ["id"]) {
  id: ID!
  name: String @column(name: "name", legacyNames: ["title"])
  title: String
}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Column `title`"), "{err}");
    }

    #[test]
    fn test_lsi_requires_distinct_sort_key() {
        let err = build(
            r#"type A @compositeKey(pkFields: ["id"], skFields: ["at"])
  @secondaryIndex(name: "lsi1", type: LSI, skFields: ["at"]) { id: ID! at: String! }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must differ"), "{err}");

        let err = build(
            r#"type A @partitionKey(pkFields: ["id"])
  @secondaryIndex(name: "lsi1", type: LSI, skFields: ["at"]) { id: ID! at: String! }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("composite primary key"), "{err}");
    }

    #[test]
    fn test_duplicate_function_names() {
        let err = build(
            r#"
type A @partitionKey(pkFields: ["id"]) @reacts(event: INSERT, handler: "sync") { id: ID! }
type B @partitionKey(pkFields: ["id"]) @reacts(event: REMOVE, handler: "sync") { id: ID! }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Function name `FnSync`"), "{err}");
    }

    #[test]
    fn test_cdc_requires_key_directive() {
        let err = build(r#"type A @reacts(event: INSERT) { id: ID! }"#).unwrap_err();
        assert!(err.to_string().contains("missing a required @partitionKey"), "{err}");
    }

    #[test]
    fn test_unknown_target_model() {
        let err = build(
            r#"type A @partitionKey(pkFields: ["id"]) @reduces(event: INSERT, targetModel: "Nope") { id: ID! }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown model `Nope`"), "{err}");
    }

    #[test]
    fn test_single_field_key_uses_column() {
        let ir = build(
            r#"type A @partitionKey(pkFields: ["id"]) { id: ID! @column(name: "a_id") }"#,
        )
        .unwrap();
        let pk = ir.models[0].primary_key.partition_key();
        assert!(pk.is_single_field);
        assert_eq!(pk.attribute_name, "a_id");
        assert!(ir.tables[0].dispatcher_config.is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s"), Some(45));
        assert_eq!(parse_duration("30m"), Some(1800));
        assert_eq!(parse_duration("2h"), Some(7200));
        assert_eq!(parse_duration("1d"), Some(86400));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_table_env_var() {
        assert_eq!(table_env_var("Orders"), "TABLE_ORDERS");
        assert_eq!(table_env_var("OrderSummaries"), "TABLE_ORDER_SUMMARIES");
    }
}
