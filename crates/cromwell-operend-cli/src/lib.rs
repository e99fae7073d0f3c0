//! `cromwell2operend` command surface.
//!
//! - `list` prints the input and output fields found in Cromwell metadata.
//! - `columns` prints selected fields as a tab-separated table.
//! - `post` validates a mapping manifest against the metadata and posts one
//!   Operend entity per row, at one of three run levels.

mod logging;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cromwell_operend_client::{HttpOperendClient, OperendConfig};
use cromwell_operend_core::{FieldSide, RowTable};
use cromwell_operend_mapping::{load_manifest_from_path, Validator};
use cromwell_operend_posting::{
    confirm_job_run_exists, execute_run, simulate_run, RunRequest,
};
use serde_json::Value;

const EXAMPLE_WIDTH: usize = 40;
const EXAMPLE_KEEP: usize = 17;

#[derive(Debug, Parser)]
#[command(name = "cromwell2operend")]
#[command(about = "Post Cromwell workflow outputs to Operend as entities")]
pub struct Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the inputs and outputs found in the metadata, with one example
    /// value each.
    List(ListArgs),
    /// Print selected input and output fields as tab-separated rows.
    Columns(ColumnsArgs),
    /// Validate a mapping manifest and post one entity per row.
    Post(PostArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Cromwell metadata JSON, as written by `cromwell run -m`.
    metadata: PathBuf,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    metadata: PathBuf,
    #[arg(long = "input")]
    inputs: Vec<String>,
    #[arg(long = "output")]
    outputs: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PostArgs {
    metadata: PathBuf,
    /// JSON mapping from Cromwell field names to the Operend entity class.
    manifest: PathBuf,
    /// Operend job run to update. Without it only entities are posted.
    job_run_id: Option<String>,
    /// Operend connection YAML; defaults to the file named by `OPEREND_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Validate against the Operend server but only print what would be written.
    #[arg(long, conflicts_with = "very_dry_run")]
    dry_run: bool,
    /// Do not contact the Operend server; validate locally and print.
    #[arg(long)]
    very_dry_run: bool,
    /// Upload this file in place of every Cromwell output file.
    #[arg(long)]
    mock_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RunLevel {
    VeryDry,
    Dry,
    Execute,
}

impl PostArgs {
    fn run_level(&self) -> RunLevel {
        if self.very_dry_run {
            RunLevel::VeryDry
        } else if self.dry_run {
            RunLevel::Dry
        } else {
            RunLevel::Execute
        }
    }
}

/// Executes a parsed CLI invocation.
///
/// # Errors
/// Returns an error when an input file cannot be read, the metadata cannot be
/// reconstructed into rows, validation fails, or an Operend call fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    logging::init(&cli.log_level);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::List(args) => run_list(&args, &mut out),
        Command::Columns(args) => {
            let table = load_row_table(&args.metadata)?;
            table
                .write_columns(&args.inputs, &args.outputs, &mut out)
                .context("failed writing columns")
        }
        Command::Post(args) => run_post(&args, &mut out),
    }
}

fn run_list(args: &ListArgs, out: &mut dyn Write) -> Result<()> {
    let table = load_row_table(&args.metadata)?;
    let inputs = table.field_examples(FieldSide::Input);
    let outputs = table.field_examples(FieldSide::Output);

    writeln!(out, "{} INPUTS. Names and example values:", inputs.len())?;
    for (field, example) in &inputs {
        writeln!(out, "{field}\t{}", elide_example(example))?;
    }
    writeln!(out)?;
    writeln!(out, "{} OUTPUTS. Names and example values:", outputs.len())?;
    for (field, example) in &outputs {
        writeln!(out, "{field}\t{}", elide_example(example))?;
    }
    Ok(())
}

fn run_post(args: &PostArgs, out: &mut dyn Write) -> Result<()> {
    let table = load_row_table(&args.metadata)?;
    let manifest = load_manifest_from_path(&args.manifest)?;
    let validator = Validator::new(&manifest).with_mock_file(args.mock_file.as_deref());
    let request = RunRequest {
        table: &table,
        manifest: &manifest,
        job_run_id: args.job_run_id.as_deref(),
        mock_file: args.mock_file.as_deref(),
    };
    let level = args.run_level();
    tracing::info!(?level, entity_class = %manifest.entity_class, "starting post");

    if level == RunLevel::VeryDry {
        validator.validate_local(&table)?;
        simulate_run(&request, out)?;
        return Ok(());
    }

    let config = OperendConfig::resolve(args.config.as_deref())?;
    let client = HttpOperendClient::new(&config);
    validator.validate_schema(&table, &client)?;
    if let Some(job_run_id) = request.job_run_id {
        confirm_job_run_exists(&client, job_run_id)?;
    }

    if level == RunLevel::Dry {
        simulate_run(&request, out)?;
    } else {
        execute_run(&request, &client, out)?;
    }
    Ok(())
}

fn load_row_table(path: &Path) -> Result<RowTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading Cromwell metadata {}", path.display()))?;
    let metadata: Value = serde_json::from_str(&content)
        .with_context(|| format!("Cromwell metadata {} is not valid JSON", path.display()))?;
    let table = RowTable::from_json(&metadata)
        .with_context(|| format!("failed reading rows from {}", path.display()))?;
    tracing::debug!(rows = table.row_numbers().len(), "reconstructed rows");
    Ok(table)
}

/// JSON rendering of `value`, shortened to the middle-elided form when it is
/// wider than the listing allows.
fn elide_example(value: &Value) -> String {
    let rendered = value.to_string();
    let chars: Vec<char> = rendered.chars().collect();
    if chars.len() <= EXAMPLE_WIDTH {
        return rendered;
    }
    let head: String = chars[..EXAMPLE_KEEP].iter().collect();
    let tail: String = chars[chars.len() - EXAMPLE_KEEP..].iter().collect();
    format!("{head} [...] {tail}")
}
