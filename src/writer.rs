use crate::{
    models::Summary,
    plan::Column,
    traits::{CSVExport, CSVWrite},
};
use anyhow::{Context, Result};
use clap::ValueEnum;
use csv::{Writer, WriterBuilder};
use rust_decimal::prelude::*;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};

/// Format of a downloadable summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
    Xlsx,
}

const SHEET_NAME: &str = "Summary";

pub struct CSVSummaryWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> CSVSummaryWriter<W> {
    pub fn new(sink: W) -> Self {
        CSVSummaryWriter {
            writer: WriterBuilder::new().from_writer(sink),
        }
    }
}

impl<W: Write> CSVWrite for CSVSummaryWriter<W> {
    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        Ok(self.writer.serialize(record)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

impl CSVExport for Summary {
    fn export(&self, writer: &mut impl CSVWrite) -> Result<()> {
        writer.write_record(&self.plan().labels())?;
        for row in self.rows() {
            writer.write_record(&self.format_row(row))?;
        }
        writer.flush()
    }
}

/// Writes `summary` to `sink` in the requested format.
pub fn write_summary<W: Write>(summary: &Summary, format: OutputFormat, mut sink: W) -> Result<()> {
    match format {
        OutputFormat::Csv => summary.export(&mut CSVSummaryWriter::new(sink)),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut sink, summary)?;
            writeln!(sink)?;
            Ok(sink.flush()?)
        }
        OutputFormat::Xlsx => {
            sink.write_all(&workbook_bytes(summary)?)?;
            Ok(sink.flush()?)
        }
    }
}

/// One worksheet: labels on the first row, keys as text, measures and
/// counts as numbers formatted with the plan's decimals.
fn workbook_bytes(summary: &Summary) -> Result<Vec<u8>> {
    let plan = summary.plan();
    let number = Format::new().set_num_format(format!(
        "0.{}",
        "0".repeat(plan.decimals() as usize)
    ));

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;
    for (col, label) in plan.labels().into_iter().enumerate() {
        sheet.write_string(0, col as u16, label)?;
    }
    for (idx, row) in summary.rows().iter().enumerate() {
        let line = idx as u32 + 1;
        for (col, column) in plan.layout().iter().enumerate() {
            let col = col as u16;
            match *column {
                Column::Key(key) => {
                    sheet.write_string(line, col, row.keys().get(key).map_or("", String::as_str))?;
                }
                Column::Measure(measure) => {
                    let value = row.values().get(measure).and_then(|v| v.to_f64()).unwrap_or(0.0);
                    sheet.write_number_with_format(line, col, value, &number)?;
                }
                Column::Count => {
                    sheet.write_number(line, col, row.count() as f64)?;
                }
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

/// Saves `summary` to `path`, the equivalent of the dashboard's download button.
pub fn save_summary(summary: &Summary, format: OutputFormat, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_summary(summary, format, io::BufWriter::new(file))
}
