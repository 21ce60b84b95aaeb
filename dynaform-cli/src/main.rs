use clap::{Parser, Subcommand, ValueEnum};
use dynaform::config::{load_config, CompilerConfig};
use dynaform::schema::{parse_schema_files, IntermediateRepresentation};
use std::path::{Path, PathBuf};
use std::process;

const DEFAULT_CONFIG: &str = "dynaform.yml";

/// dynaform: compile a directive-annotated schema into infrastructure
/// templates and typed data-access code
#[derive(Parser)]
#[command(name = "dynaform", version, about)]
struct Cli {
    /// Compiler configuration (default: ./dynaform.yml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Schema file glob, overriding the configured patterns (repeatable)
    #[arg(long = "schema")]
    schema: Vec<String>,

    /// Output format for printed documents
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Generate templates, models and handler skeletons
    Generate {
        /// Infrastructure output directory
        #[arg(long)]
        infra_out: Option<PathBuf>,
        /// Runtime output directory
        #[arg(long)]
        runtime_out: Option<PathBuf>,
    },

    /// Build and check everything without writing files
    Check,

    /// Print the intermediate representation
    Ir,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config, base_dir) = resolve_config(cli.config.as_deref())?;
    let patterns = if cli.schema.is_empty() {
        config.schema.clone()
    } else {
        cli.schema.clone()
    };
    let files = schema_files(&base_dir, &patterns)?;
    log::info!("Compiling {} schema file(s)", files.len());
    let ir = parse_schema_files(&files, &config)?;

    match cli.command {
        Command::Generate {
            infra_out,
            runtime_out,
        } => {
            let infra_dir = infra_out.unwrap_or_else(|| base_dir.join(&config.outputs.infrastructure));
            let runtime_dir = runtime_out.unwrap_or_else(|| base_dir.join(&config.outputs.runtime));
            let artifacts = dynaform_codegen::generate(&ir, &config)?;
            let report = dynaform_codegen::write_artifacts(&artifacts, &infra_dir, &runtime_dir)?;
            for path in &report.written {
                println!("wrote {}", path.display());
            }
            for path in &report.skipped {
                println!("kept  {}", path.display());
            }
        }
        Command::Check => {
            dynaform_codegen::generate(&ir, &config)?;
            println!("{}", summary(&ir));
        }
        Command::Ir => {
            let value = serde_json::to_value(&ir)?;
            print_output(&value, &cli.format)?;
        }
    }

    Ok(())
}

/// Load the configuration and the directory relative paths resolve against.
fn resolve_config(path: Option<&Path>) -> Result<(CompilerConfig, PathBuf), Box<dyn std::error::Error>> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if path.exists() {
        log::debug!("Loading configuration from {}", path.display());
        Ok((load_config(&path)?, base_dir))
    } else if required {
        Err(format!("configuration file {} not found", path.display()).into())
    } else {
        Ok((CompilerConfig::default(), base_dir))
    }
}

/// Expand schema globs relative to `base_dir`, sorted and deduplicated.
fn schema_files(base_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let full = base_dir.join(pattern);
        for entry in glob::glob(&full.to_string_lossy())? {
            files.push(entry?);
        }
    }
    if files.is_empty() {
        return Err(format!("no schema files match {}", patterns.join(", ")).into());
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn summary(ir: &IntermediateRepresentation) -> String {
    let handlers = ir.cdc_configs().count();
    format!(
        "OK: {} model(s), {} table(s), {} CDC handler(s)",
        ir.models.len(),
        ir.tables.len(),
        handlers
    )
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
type Note @partitionKey(pkFields: ["noteId"]) {
  noteId: ID!
  body: String
}
"#;

    #[test]
    fn test_schema_files_expand_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("schema/nested")).unwrap();
        std::fs::write(tmp.path().join("schema/b.graphql"), SCHEMA).unwrap();
        std::fs::write(tmp.path().join("schema/nested/a.graphql"), "").unwrap();

        let files = schema_files(tmp.path(), &["schema/**/*.graphql".to_string()]).unwrap();
        assert_eq!(
            files,
            vec![
                tmp.path().join("schema/b.graphql"),
                tmp.path().join("schema/nested/a.graphql"),
            ]
        );
    }

    #[test]
    fn test_no_matching_schema_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = schema_files(tmp.path(), &["*.graphql".to_string()]).unwrap_err();
        assert!(err.to_string().contains("no schema files match"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(resolve_config(Some(&tmp.path().join("missing.yml"))).is_err());

        let path = tmp.path().join("dynaform.yml");
        std::fs::write(&path, "environment: [STAGE]\n").unwrap();
        let (config, base_dir) = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.environment, vec!["STAGE"]);
        assert_eq!(base_dir, tmp.path());
    }

    #[test]
    fn test_summary_counts() {
        let ir = dynaform::schema::parse_schema_str(SCHEMA, &CompilerConfig::default()).unwrap();
        assert_eq!(summary(&ir), "OK: 1 model(s), 1 table(s), 0 CDC handler(s)");
    }
}
