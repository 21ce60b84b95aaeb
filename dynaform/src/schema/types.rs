use serde::{Deserialize, Serialize};

/// The IR builder's output: every model and table in the schema, sorted by
/// name. Nothing downstream mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateRepresentation {
    pub models: Vec<Model>,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub enums: Vec<EnumType>,
}

impl IntermediateRepresentation {
    pub fn model(&self, type_name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.type_name == type_name)
    }

    pub fn table(&self, table_name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.table_name == table_name)
    }

    pub fn models_on<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = &'a Model> + 'a {
        self.models
            .iter()
            .filter(move |m| m.table_name == table.table_name)
    }

    /// Every CDC config in the IR, in model order.
    pub fn cdc_configs(&self) -> impl Iterator<Item = &ChangeDataCaptureConfig> {
        self.models.iter().flat_map(|m| m.change_data_capture.iter())
    }
}

/// An enum declared in the schema and used as a field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumType {
    pub type_name: String,
    pub values: Vec<String>,
}

/// One attribute of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Name used in the schema and in generated code.
    pub field_name: String,
    /// Attribute name used when persisting.
    pub column_name: String,
    /// Older attribute names still accepted on read.
    pub legacy_column_names: Vec<String>,
    pub type_name: String,
    pub kind: FieldKind,
    pub is_list: bool,
    pub is_required: bool,
    pub is_date_type: bool,
    pub computed: Option<ComputeFunction>,
    /// Expression attribute-name placeholder, e.g. `#customerId`.
    pub ean: String,
    /// Expression attribute-value placeholder, e.g. `:customerId`.
    pub eav: String,
}

impl Field {
    /// Canonical column name followed by legacy aliases.
    pub fn column_names_for_read(&self) -> Vec<String> {
        let mut names = vec![self.column_name.clone()];
        for legacy in &self.legacy_column_names {
            if !names.contains(legacy) {
                names.push(legacy.clone());
            }
        }
        names
    }

    /// Virtual computed fields are derived on read and never persisted.
    pub fn is_storage_required(&self) -> bool {
        !matches!(&self.computed, Some(ComputeFunction { is_virtual: true, .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    Scalar,
    Enum,
    /// A non-model object type stored as a nested map.
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeFunction {
    /// Path of the function in the consuming crate, e.g. `crate::compute::total`.
    pub function: String,
    pub is_virtual: bool,
}

/// One half of a key: the fields it is built from and an optional prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPart {
    /// Attribute the key is stored under.
    pub attribute_name: String,
    pub fields: Vec<String>,
    pub prefix: Option<String>,
    /// Exactly one field and no prefix: the field's own column is the key.
    pub is_single_field: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryKey {
    Simple {
        partition_key: KeyPart,
    },
    Composite {
        partition_key: KeyPart,
        sort_key: KeyPart,
    },
}

impl PrimaryKey {
    pub fn is_composite(&self) -> bool {
        matches!(self, PrimaryKey::Composite { .. })
    }

    pub fn partition_key(&self) -> &KeyPart {
        match self {
            PrimaryKey::Simple { partition_key } | PrimaryKey::Composite { partition_key, .. } => {
                partition_key
            }
        }
    }

    pub fn sort_key(&self) -> Option<&KeyPart> {
        match self {
            PrimaryKey::Simple { .. } => None,
            PrimaryKey::Composite { sort_key, .. } => Some(sort_key),
        }
    }

    pub fn parts(&self) -> Vec<&KeyPart> {
        let mut parts = vec![self.partition_key()];
        parts.extend(self.sort_key());
        parts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionType {
    All,
    KeysOnly,
}

impl ProjectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectionType::All => "ALL",
            ProjectionType::KeysOnly => "KEYS_ONLY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecondaryIndex {
    Gsi {
        name: String,
        partition_key: KeyPart,
        sort_key: Option<KeyPart>,
        projection: ProjectionType,
    },
    Lsi {
        name: String,
        sort_key: KeyPart,
        projection: ProjectionType,
    },
}

impl SecondaryIndex {
    pub fn name(&self) -> &str {
        match self {
            SecondaryIndex::Gsi { name, .. } | SecondaryIndex::Lsi { name, .. } => name,
        }
    }

    pub fn projection(&self) -> ProjectionType {
        match self {
            SecondaryIndex::Gsi { projection, .. } | SecondaryIndex::Lsi { projection, .. } => {
                *projection
            }
        }
    }

    /// Key parts this index adds on top of the primary key.
    pub fn parts(&self) -> Vec<&KeyPart> {
        match self {
            SecondaryIndex::Gsi {
                partition_key,
                sort_key,
                ..
            } => {
                let mut parts = vec![partition_key];
                parts.extend(sort_key.as_ref());
                parts
            }
            SecondaryIndex::Lsi { sort_key, .. } => vec![sort_key],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtlConfig {
    pub field_name: String,
    pub column_name: String,
    /// Applied on create when the field is unset.
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcEvent {
    Insert,
    Modify,
    Remove,
    Upsert,
}

impl CdcEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            CdcEvent::Insert => "INSERT",
            CdcEvent::Modify => "MODIFY",
            CdcEvent::Remove => "REMOVE",
            CdcEvent::Upsert => "UPSERT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(CdcEvent::Insert),
            "MODIFY" => Some(CdcEvent::Modify),
            "REMOVE" => Some(CdcEvent::Remove),
            "UPSERT" => Some(CdcEvent::Upsert),
            _ => None,
        }
    }

    /// Storage mutation kinds (stream `eventName`s) this trigger matches.
    pub fn stream_event_names(self) -> &'static [&'static str] {
        match self {
            CdcEvent::Insert => &["INSERT"],
            CdcEvent::Modify => &["MODIFY"],
            CdcEvent::Remove => &["REMOVE"],
            CdcEvent::Upsert => &["INSERT", "MODIFY"],
        }
    }

    /// Handlers for anything but REMOVE work from the new image.
    pub fn requires_new_image(self) -> bool {
        !matches!(self, CdcEvent::Remove)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcKind {
    Enricher,
    Reactor,
    Reducer,
}

impl CdcKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CdcKind::Enricher => "ENRICHER",
            CdcKind::Reactor => "REACTOR",
            CdcKind::Reducer => "REDUCER",
        }
    }

    /// Verb used when deriving default handler names.
    pub fn verb(self) -> &'static str {
        match self {
            CdcKind::Enricher => "enrich",
            CdcKind::Reactor => "react",
            CdcKind::Reducer => "reduce",
        }
    }
}

/// Memory (MB) and timeout (seconds) for a compute function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeSizing {
    pub memory_size: u32,
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDataCaptureConfig {
    #[serde(rename = "type")]
    pub kind: CdcKind,
    pub event: CdcEvent,
    pub source_model_name: String,
    pub target_model_name: Option<String>,
    /// camelCase handler name; also the generated module's stem.
    pub handler_name: String,
    /// Logical resource name of the handler function, e.g. `FnNotifyCustomer`.
    pub function_name: String,
    pub readable_tables: Vec<String>,
    pub writable_tables: Vec<String>,
    pub sizing: ComputeSizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
    pub batch_size: u32,
    pub maximum_retry_attempts: u32,
    pub sizing: ComputeSizing,
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub type_name: String,
    pub table_name: String,
    pub fields: Vec<Field>,
    pub primary_key: PrimaryKey,
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub ttl: Option<TtlConfig>,
    pub consistent: bool,
    pub is_ledger: bool,
    pub is_public: bool,
    pub change_data_capture: Vec<ChangeDataCaptureConfig>,
}

impl Model {
    pub fn field(&self, field_name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub table_name: String,
    pub primary_key: PrimaryKey,
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub enable_streaming: bool,
    pub enable_point_in_time_recovery: bool,
    /// Attribute the storage service expires items by, if any model sets one.
    pub ttl_attribute: Option<String>,
    pub dispatcher_config: Option<DispatcherConfig>,
}

impl Table {
    pub fn has_cdc(&self) -> bool {
        self.dispatcher_config.is_some()
    }
}
