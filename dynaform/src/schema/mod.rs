pub mod builder;
pub mod directives;
pub mod parser;
pub mod types;

pub use builder::{build_ir, parse_duration, table_env_var};
pub use directives::{DirectiveKind, ParsedDirective};
pub use parser::{parse_schema, parse_schema_files, parse_schema_str};
pub use types::*;
