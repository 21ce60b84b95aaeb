use thiserror::Error;

#[derive(Error, Debug)]
pub enum DynaformError {
    #[error("Schema parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Directive error on {location}: @{directive}({argument}) {message}")]
    Directive {
        location: String,
        directive: String,
        argument: String,
        message: String,
    },

    #[error("Table `{table}`: all models on a table must be composite (or not); `{model}` disagrees")]
    KeyShape { table: String, model: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{model} with key {key} already exists")]
    AlreadyExists { model: String, key: String },

    #[error("{model} with key {key} was modified since it was read (expected version {expected})")]
    OptimisticLocking {
        model: String,
        key: String,
        expected: i64,
    },

    #[error("Data integrity error on {model}.{field}: {message}")]
    DataIntegrity {
        model: String,
        field: String,
        message: String,
    },

    #[error("{model} with key {key} not found")]
    NotFound { model: String, key: String },

    #[error("Unexpected error from {provider}: {message}")]
    UnexpectedUpstream { provider: String, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Discriminant of [`DynaformError`]; retry logic and callers branch on this
/// rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    Directive,
    KeyShape,
    Assertion,
    Config,
    AlreadyExists,
    OptimisticLocking,
    DataIntegrity,
    NotFound,
    UnexpectedUpstream,
    Unexpected,
    Io,
}

impl ErrorKind {
    /// Conflicts that usually settle once a concurrent writer finishes.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::AlreadyExists | ErrorKind::OptimisticLocking)
    }
}

impl DynaformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DynaformError::Parse(_) | DynaformError::Schema(_) => ErrorKind::Schema,
            DynaformError::Directive { .. } => ErrorKind::Directive,
            DynaformError::KeyShape { .. } => ErrorKind::KeyShape,
            DynaformError::Assertion(_) => ErrorKind::Assertion,
            DynaformError::Config(_) | DynaformError::Yaml(_) => ErrorKind::Config,
            DynaformError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            DynaformError::OptimisticLocking { .. } => ErrorKind::OptimisticLocking,
            DynaformError::DataIntegrity { .. } | DynaformError::Json(_) => {
                ErrorKind::DataIntegrity
            }
            DynaformError::NotFound { .. } => ErrorKind::NotFound,
            DynaformError::UnexpectedUpstream { .. } => ErrorKind::UnexpectedUpstream,
            DynaformError::Io(_) => ErrorKind::Io,
            DynaformError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub(crate) fn directive(
        location: impl Into<String>,
        directive: impl Into<String>,
        argument: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DynaformError::Directive {
            location: location.into(),
            directive: directive.into(),
            argument: argument.into(),
            message: message.into(),
        }
    }

    pub(crate) fn integrity(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DynaformError::DataIntegrity {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DynaformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        let exists = DynaformError::AlreadyExists {
            model: "Order".into(),
            key: "pk=ORDER#1".into(),
        };
        let locked = DynaformError::OptimisticLocking {
            model: "Order".into(),
            key: "pk=ORDER#1".into(),
            expected: 3,
        };
        let integrity = DynaformError::integrity("Order", "total", "missing");

        assert!(exists.is_transient());
        assert!(locked.is_transient());
        assert!(!integrity.is_transient());
        assert!(!DynaformError::Unexpected("boom".into()).is_transient());
    }

    #[test]
    fn test_io_errors_have_their_own_kind() {
        let err: DynaformError = std::io::Error::new(std::io::ErrorKind::NotFound, "schema.graphql").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_key_shape_message_names_table() {
        let err = DynaformError::KeyShape {
            table: "Orders".into(),
            model: "Invoice".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Orders"));
        assert!(message.contains("must be composite (or not)"));
    }
}
