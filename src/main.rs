use anyhow::Result;
use clap::Parser;
use std::io::{self, BufWriter, Write};
use tracing_subscriber::EnvFilter;

mod chart;
mod cli;
mod engine;
mod errors;
mod models;
mod plan;
mod processor;
mod report;
mod schema;
mod source;
mod traits;
mod writer;

use cli::{Cli, Command, DetectArgs, ReportArgs, SummarizeArgs};
use engine::Engine;
use schema::SchemaKind;
use source::LoadOptions;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn report(args: ReportArgs, options: &LoadOptions, forced: Option<SchemaKind>) -> Result<()> {
    let summary = Engine::load(&args.input.inputs, options, forced)?.run()?;

    let mut out = BufWriter::new(io::stdout().lock());
    report::render(&summary, args.top, &mut out)?;
    out.flush()?;

    if let Some(path) = &args.summary_out {
        writer::save_summary(&summary, args.format, path)?;
    }
    if let Some(path) = &args.bar_chart {
        chart::save_svg(path, &chart::bar_chart_svg(&summary, args.top)?)?;
    }
    if let Some(path) = &args.treemap {
        chart::save_svg(path, &chart::treemap_svg(&summary)?)?;
    }
    Ok(())
}

fn summarize(args: SummarizeArgs, options: &LoadOptions, forced: Option<SchemaKind>) -> Result<()> {
    let summary = Engine::load(&args.input.inputs, options, forced)?.run()?;
    writer::write_summary(&summary, args.format, BufWriter::new(io::stdout().lock()))
}

fn detect(args: DetectArgs, options: &LoadOptions, forced: Option<SchemaKind>) -> Result<()> {
    let prepared = Engine::load(&args.input.inputs, options, forced)?.prepare()?;

    let mut out = BufWriter::new(io::stdout().lock());
    for detection in prepared.detections() {
        writeln!(out, "{}: {}", detection.origin(), detection.kind())?;
        for (role, idx) in detection.columns().roles() {
            writeln!(
                out,
                "  {:<12} <- {}",
                role.label(),
                detection.columns().headers()[idx]
            )?;
        }
    }
    writeln!(out, "Columns: {}", prepared.plan().labels().join(", "))?;
    if args.explain {
        writeln!(out)?;
        writeln!(out, "{}", prepared.plan().to_sql(prepared.detections()[0].columns()))?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = LoadOptions {
        delimiter: cli.delimiter,
    };

    match cli.command {
        Command::Report(args) => report(args, &options, cli.schema),
        Command::Summarize(args) => summarize(args, &options, cli.schema),
        Command::Detect(args) => detect(args, &options, cli.schema),
    }
}
