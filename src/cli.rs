use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::{schema::SchemaKind, writer::OutputFormat};

pub const DEFAULT_TOP: usize = 20;

/// Summarize commission reports, transaction ledgers and volume sheets.
#[derive(Debug, Parser)]
#[command(name = "commission-summarizer", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Skip schema detection and treat every input as this layout.
    #[arg(long, global = true, value_enum, env = "SUMMARIZER_SCHEMA")]
    pub schema: Option<SchemaKind>,

    /// Field delimiter for CSV inputs (`.tsv` files always use tab).
    #[arg(
        long,
        global = true,
        env = "SUMMARIZER_DELIMITER",
        default_value = ",",
        value_parser = parse_delimiter
    )]
    pub delimiter: u8,

    /// Log more (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print metrics, a bar chart and the summary table.
    Report(ReportArgs),
    /// Write the summary table to stdout.
    Summarize(SummarizeArgs),
    /// Show the detected schema and column mapping.
    Detect(DetectArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// CSV, Parquet or Excel files, concatenated in order. `-` reads stdin.
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Number of groups shown in charts and the table.
    #[arg(long, env = "SUMMARIZER_TOP", default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Also save the full summary to this file.
    #[arg(long, value_name = "FILE")]
    pub summary_out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Write an SVG bar chart of the top groups.
    #[arg(long, value_name = "FILE")]
    pub bar_chart: Option<PathBuf>,

    /// Write an SVG treemap of all positive groups.
    #[arg(long, value_name = "FILE")]
    pub treemap: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Print the aggregation as SQL.
    #[arg(long)]
    pub explain: bool,
}

fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "\\t" | "tab" => Ok(b'\t'),
        _ => match value.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(format!("delimiter must be a single ASCII character, got {value:?}")),
        },
    }
}
