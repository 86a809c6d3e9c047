//! Flux CLI - Command-line interface for Retention Flux
//!
//! Commands:
//! - merge: Aggregate raw orders onto the customer register
//! - features: Derive the feature table from a merged customer table
//! - validate: Check a customer table before scoring
//! - training-set: Extract the numeric training matrix from a snapshot
//! - rank: Score a snapshot with a model and print the contact ranking
//! - schema: Print schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use retention_flux::encoder::{encode_rows_ndjson, SnapshotEncoder};
use retention_flux::schema::TableAdapter;
use retention_flux::training::LogisticPredictor;
use retention_flux::types::{RawRow, DERIVED_COLUMNS, REQUIRED_COLUMNS};
use retention_flux::{
    decode_snapshot, evaluate, predict_table, rank_predictions, top_fraction_rate, FeatureError,
    FeaturePipeline, PipelineConfig, RecordMerger, TrainingSet, FLUX_VERSION, SNAPSHOT_VERSION,
};

/// Flux - Customer feature derivation for repurchase propensity
#[derive(Parser)]
#[command(name = "rflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Derive RFM and engagement features from customer data", long_about = None)]
struct Cli {
    /// Log output format (logs go to stderr; filter with RUST_LOG)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate raw orders onto the customer register
    Merge {
        /// Orders file path
        #[arg(long)]
        orders: PathBuf,

        /// Customers file path
        #[arg(long)]
        customers: PathBuf,

        /// Supplemental per-customer attributes file path
        #[arg(long)]
        supplemental: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format of every source file
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Derive the feature table from a merged customer table
    Features {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format (json formats write a snapshot, ndjson writes rows)
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run ID recorded in the snapshot (random when omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Check a customer table before scoring
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract the numeric training matrix from a feature snapshot
    TrainingSet {
        /// Snapshot file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Score a feature snapshot and print the contact ranking
    Rank {
        /// Snapshot file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Logistic model file (feature_names, weights, intercept)
        #[arg(long)]
        model: PathBuf,

        /// Number of customers to list
        #[arg(long, default_value = "50")]
        top: usize,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (merged customer table)
    Input,
    /// Output schema (retention.features.v1)
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: &LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "retention_flux=info,rflux=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    // Ignore an already-installed subscriber
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Merge {
            orders,
            customers,
            supplemental,
            output,
            input_format,
            output_format,
            config,
        } => cmd_merge(
            &orders,
            &customers,
            supplemental.as_deref(),
            &output,
            input_format,
            output_format,
            config.as_deref(),
        ),

        Commands::Features {
            input,
            output,
            input_format,
            output_format,
            config,
            run_id,
        } => cmd_features(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            run_id,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::TrainingSet { input, output } => cmd_training_set(&input, &output),

        Commands::Rank {
            input,
            model,
            top,
            output_format,
        } => cmd_rank(&input, &model, top, output_format),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_merge(
    orders: &Path,
    customers: &Path,
    supplemental: Option<&Path>,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    let orders = read_rows(orders, &input_format)?;
    let customers = read_rows(customers, &input_format)?;
    let supplemental = match supplemental {
        Some(path) => read_rows(path, &input_format)?,
        None => Vec::new(),
    };

    if customers.is_empty() {
        return Err(FluxCliError::NoRows);
    }

    let table = RecordMerger::merge(&orders, &customers, &supplemental, &config)?;
    let output_data = format_rows(table.rows(), &output_format)?;
    write_output(output, &output_data)
}

fn cmd_features(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    run_id: Option<String>,
) -> Result<(), FluxCliError> {
    let pipeline = FeaturePipeline::with_config(load_config(config)?)?;
    let rows = read_rows(input, &input_format)?;

    if rows.is_empty() {
        return Err(FluxCliError::NoRows);
    }

    let table = TableAdapter::to_customer_table(rows)?;
    let features = pipeline.run(&table)?;

    let encoder = match run_id {
        Some(id) => SnapshotEncoder::with_run_id(id),
        None => SnapshotEncoder::new(),
    };
    info!(run_id = encoder.run_id(), rows = features.len(), "feature table written");

    let output_data = match output_format {
        OutputFormat::Ndjson => encode_rows_ndjson(&features)?,
        OutputFormat::Json => encoder.encode_to_json(&features)?,
        OutputFormat::JsonPretty => encoder.encode_to_json_pretty(&features)?,
    };
    write_output(output, &output_data)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), FluxCliError> {
    let rows = read_rows(input, &input_format)?;
    let report = TableAdapter::inspect(&rows);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:      {}", report.total_rows);
        println!("Columns:         {}", report.columns.join(", "));
        if !report.missing_columns.is_empty() {
            println!("Missing columns: {}", report.missing_columns.join(", "));
        }
        if !report.null_counts.is_empty() {
            println!("\nNull cells (imputed):");
            for (column, count) in &report.null_counts {
                println!("  - {}: {}", column, count);
            }
        }
        if !report.issues.is_empty() {
            println!("\nErrors:");
            for issue in &report.issues {
                println!(
                    "  - Customer {} (index {}): {}",
                    issue.customer_id.as_deref().unwrap_or("unknown"),
                    issue.index,
                    issue.error
                );
            }
        }
    }

    if report.is_valid() {
        Ok(())
    } else {
        Err(FluxCliError::ValidationFailed(
            report.issues.len() + report.missing_columns.len(),
        ))
    }
}

fn cmd_training_set(input: &Path, output: &Path) -> Result<(), FluxCliError> {
    let snapshot = decode_snapshot(&read_input(input)?)?;
    let training = TrainingSet::from_table(&snapshot.table)?;
    info!(
        positive_rate = training.positive_rate(),
        features = training.feature_names.len(),
        "training set ready"
    );
    write_output(output, &serde_json::to_string(&training)?)
}

fn cmd_rank(
    input: &Path,
    model: &Path,
    top: usize,
    output_format: OutputFormat,
) -> Result<(), FluxCliError> {
    let snapshot = decode_snapshot(&read_input(input)?)?;
    let predictor = LogisticPredictor::from_json(&fs::read_to_string(model)?)?;
    let predictions = predict_table(&predictor, &snapshot.table)?;

    let scored: Vec<(f64, u8)> = predictions
        .iter()
        .zip(&snapshot.table.rows)
        .map(|(p, row)| (p.probability, u8::from(row.is_active)))
        .collect();
    if let Some(rate) = top_fraction_rate(&scored, 0.10) {
        info!(rate, "active rate within top 10%");
    }
    if let Some(eval) = evaluate(&scored, 0.5) {
        info!(
            auc = ?eval.auc,
            accuracy = eval.accuracy,
            precision = eval.precision,
            recall = eval.recall,
            f1 = eval.f1,
            "predictions evaluated against is_active"
        );
    }

    let ranked = rank_predictions(&predictions, &snapshot.table, top);
    let output_data = format_rows(&ranked, &output_format)?;
    write_output(Path::new("-"), &output_data)
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), FluxCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: merged customer table");
                println!();
                println!("One row per customer, keyed by customer_id. Column names are");
                println!("trimmed and lower-cased before use.");
                println!();
                println!("Required columns: {}", REQUIRED_COLUMNS.join(", "));
                println!("Optional columns: channel, plus any customer attributes");
                println!();
                println!("last_order_date accepts RFC 3339, YYYY-MM-DD [HH:MM:SS] and");
                println!("DD/MM/YYYY [HH:MM]. Columns named like derived features are ignored.");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: {}", SNAPSHOT_VERSION);
                println!();
                println!("- snapshot_version, row_count");
                println!("- producer: {{ name, version, run_id }}");
                println!("- computed_at_utc, reference_date, top_channel");
                println!("- columns: input columns followed by the derived columns");
                println!("- warnings: non-fatal conditions (insufficient_cardinality)");
                println!("- rows: input fields plus {}", DERIVED_COLUMNS.join(", "));
            }
        }
    }
    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, FluxCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, FluxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_rows(input: &Path, format: &InputFormat) -> Result<Vec<RawRow>, FluxCliError> {
    let data = read_input(input)?;
    let rows = match format {
        InputFormat::Ndjson => TableAdapter::parse_ndjson(&data)?,
        InputFormat::Json => TableAdapter::parse_array(&data)?,
    };
    Ok(rows)
}

fn write_output(output: &Path, data: &str) -> Result<(), FluxCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_rows<T: serde::Serialize>(
    rows: &[T],
    format: &OutputFormat,
) -> Result<String, FluxCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for row in rows {
                lines.push(serde_json::to_string(row)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(rows)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(rows)?),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "customer_table",
        "description": "Merged customer table row",
        "type": "object",
        "required": ["customer_id"],
        "properties": {
            "customer_id": { "type": ["string", "integer"] },
            "total_orders": { "type": ["integer", "null"], "minimum": 0 },
            "avg_order_value": { "type": ["number", "null"], "minimum": 0 },
            "last_order_date": { "type": ["string", "integer", "null"] },
            "channel": { "type": ["string", "null"] }
        },
        "additionalProperties": true
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    let score = serde_json::json!({ "type": "integer", "minimum": 0, "maximum": 4 });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SNAPSHOT_VERSION,
        "description": "Retention Flux feature snapshot",
        "type": "object",
        "required": ["snapshot_version", "producer", "computed_at_utc", "row_count", "top_channel", "columns", "rows"],
        "properties": {
            "snapshot_version": { "type": "string", "const": SNAPSHOT_VERSION },
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "run_id": { "type": "string" }
                }
            },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "row_count": { "type": "integer", "minimum": 0 },
            "reference_date": { "type": ["string", "null"], "format": "date-time" },
            "top_channel": { "type": "string" },
            "columns": { "type": "array", "items": { "type": "string" } },
            "warnings": { "type": "array" },
            "rows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": DERIVED_COLUMNS,
                    "properties": {
                        "customer_id": { "type": "string" },
                        "recency_days": { "type": "integer", "minimum": 0 },
                        "frequency": { "type": "integer", "minimum": 0 },
                        "monetary_value": { "type": "number", "minimum": 0 },
                        "recency_score": score,
                        "frequency_score": score,
                        "monetary_score": score,
                        "rfm_score": { "type": "integer", "minimum": 0, "maximum": 12 },
                        "top_channel": { "type": "string" },
                        "is_active": { "type": "boolean" },
                        "is_inactive": { "type": "boolean" },
                        "engagement_score": { "type": "number" },
                        "order_growth_est": { "type": ["number", "null"] },
                        "spending_index": { "type": ["number", "null"] },
                        "loyalty_segment": { "enum": ["churned", "neutral", "loyal", "vip"] }
                    }
                }
            }
        }
    })
    .to_string()
}

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Feature(FeatureError),
    Json(serde_json::Error),
    NoRows,
    ValidationFailed(usize),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<FeatureError> for FluxCliError {
    fn from(e: FeatureError) -> Self {
        FluxCliError::Feature(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Feature(e) => {
                let (code, hint) = feature_error_code(&e);
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} problems found in input", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

fn feature_error_code(e: &FeatureError) -> (&'static str, &'static str) {
    match e {
        FeatureError::MissingColumn(_) => (
            "MISSING_COLUMN",
            "Input needs last_order_date, total_orders and avg_order_value",
        ),
        FeatureError::OutOfRangeScore { .. } => (
            "OUT_OF_RANGE_SCORE",
            "Scores must stay within their bucket domain",
        ),
        FeatureError::ParseError(_) | FeatureError::MissingField(_) => {
            ("PARSE_ERROR", "Run 'rflux validate' for details")
        }
        FeatureError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
        FeatureError::DuplicateCustomer(_) => (
            "DUPLICATE_CUSTOMER",
            "Each customer_id must appear once; run 'rflux merge' to deduplicate",
        ),
        FeatureError::InvariantViolation(_) => (
            "INVARIANT_VIOLATION",
            "The assembled table failed validation; no output was written",
        ),
        FeatureError::InvalidConfig(_) => ("INVALID_CONFIG", "Check the --config file"),
        FeatureError::FeatureMismatch(_) => (
            "FEATURE_MISMATCH",
            "The model was trained on features this snapshot lacks",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retention_flux::types::CustomerRecord;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_error_codes() {
        let err = CliError::from(FluxCliError::Feature(FeatureError::MissingColumn(
            "total_orders".to_string(),
        )));
        assert_eq!(err.code, "MISSING_COLUMN");

        let err = CliError::from(FluxCliError::ValidationFailed(2));
        assert_eq!(err.code, "VALIDATION_FAILED");
        assert!(err.message.contains('2'));
    }

    #[test]
    fn test_format_rows_ndjson() {
        let rows = vec![CustomerRecord::new("a"), CustomerRecord::new("b")];
        let out = format_rows(&rows, &OutputFormat::Ndjson).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.ends_with('\n'));
    }
}
