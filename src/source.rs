use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use calamine::{Data, Reader, open_workbook_auto};
use csv::{ReaderBuilder, StringRecord};
use getset::Getters;
use parquet::{
    file::reader::{FileReader, SerializedFileReader},
    record::Field,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::ReportError;

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";
pub const STDIN_PATH: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Parquet,
    Excel,
}

impl InputFormat {
    /// Picks the reader by extension, falling back to the Parquet magic bytes.
    pub fn sniff(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("csv" | "txt" | "tsv") => return Ok(InputFormat::Csv),
            Some("parquet" | "pq") => return Ok(InputFormat::Parquet),
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => return Ok(InputFormat::Excel),
            _ => (),
        }

        let mut magic = [0u8; 4];
        let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let read = file.read(&mut magic)?;
        if read == magic.len() && &magic == PARQUET_MAGIC {
            Ok(InputFormat::Parquet)
        } else {
            Ok(InputFormat::Csv)
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub delimiter: u8,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

/// A fully loaded input: header row plus every data row as text.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Table {
    #[getset(get = "pub")]
    origin: String,
    #[getset(get = "pub")]
    headers: Vec<String>,
    #[getset(get = "pub")]
    rows: Vec<StringRecord>,
}

impl Table {
    pub fn new(origin: impl Into<String>, headers: Vec<String>, rows: Vec<StringRecord>) -> Self {
        Self {
            origin: origin.into(),
            headers,
            rows,
        }
    }
}

/// Standard input copied to a temp file so it can be sniffed and seeked.
/// The file is removed when this value is dropped.
pub struct StagedInput {
    file: NamedTempFile,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub fn stage_stdin() -> Result<StagedInput> {
    stage_reader(io::stdin().lock())
}

fn stage_reader<R: Read>(mut reader: R) -> Result<StagedInput> {
    let mut file = NamedTempFile::new().context("creating staging file")?;
    let copied = io::copy(&mut reader, file.as_file_mut())?;
    debug!(bytes = copied, path = %file.path().display(), "staged standard input");
    Ok(StagedInput { file })
}

/// Loads one input, staging it first when it is standard input.
pub fn load(path: &Path, options: &LoadOptions) -> Result<Table> {
    load_with(path, options, stage_stdin)
}

fn load_with(
    path: &Path,
    options: &LoadOptions,
    stage: impl FnOnce() -> Result<StagedInput>,
) -> Result<Table> {
    if path.as_os_str() == STDIN_PATH {
        let staged = stage()?;
        return load_file(staged.path(), "<stdin>", options);
    }
    load_file(path, &path.display().to_string(), options)
}

/// Loads every input, keeping their order for concatenation.
pub fn load_all(paths: &[PathBuf], options: &LoadOptions) -> Result<Vec<Table>> {
    if paths.is_empty() {
        return Err(ReportError::NoInput)?;
    }
    paths.iter().map(|path| load(path, options)).collect()
}

fn load_file(path: &Path, origin: &str, options: &LoadOptions) -> Result<Table> {
    let format = InputFormat::sniff(path)?;
    let table = match format {
        InputFormat::Csv => load_csv(path, origin, options)?,
        InputFormat::Parquet => load_parquet(path, origin)?,
        InputFormat::Excel => load_excel(path, origin)?,
    };
    info!(
        origin,
        ?format,
        columns = table.headers.len(),
        rows = table.rows.len(),
        "input loaded"
    );
    Ok(table)
}

fn csv_delimiter(path: &Path, options: &LoadOptions) -> u8 {
    let is_tsv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
    if is_tsv { b'\t' } else { options.delimiter }
}

fn load_csv(path: &Path, origin: &str, options: &LoadOptions) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {origin}"))?;
    read_csv(file, origin, csv_delimiter(path, options))
}

fn read_csv<R: Read>(input: R, origin: &str, delimiter: u8) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ReportError::EmptyInput(origin.to_string()))?;
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let mut record = record.with_context(|| format!("reading {origin}"))?;
        while record.len() < headers.len() {
            record.push_field("");
        }
        rows.push(record);
    }

    Ok(Table::new(origin, headers, rows))
}

fn field_text(field: &Field) -> String {
    match field {
        Field::Null => String::new(),
        Field::Str(text) => text.clone(),
        Field::Bytes(bytes) => String::from_utf8_lossy(bytes.data()).into_owned(),
        other => other.to_string(),
    }
}

fn load_parquet(path: &Path, origin: &str) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {origin}"))?;
    let reader = SerializedFileReader::new(file).with_context(|| format!("reading {origin}"))?;

    let headers: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema()
        .get_fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect();
    if headers.is_empty() {
        return Err(ReportError::EmptyInput(origin.to_string()))?;
    }

    let mut rows = Vec::new();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        let cells: Vec<String> = row
            .get_column_iter()
            .map(|(_, field)| field_text(field))
            .collect();
        rows.push(StringRecord::from(cells));
    }

    Ok(Table::new(origin, headers, rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Error(err) => format!("{err:?}"),
        other => other.to_string(),
    }
}

/// Reads the first worksheet, its first row being the header.
fn load_excel(path: &Path, origin: &str) -> Result<Table> {
    let mut workbook = open_workbook_auto(path).with_context(|| format!("opening {origin}"))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ReportError::EmptyInput(origin.to_string()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("reading sheet {sheet} of {origin}"))?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = sheet_rows
        .next()
        .map(|row| row.iter().map(cell_text).collect())
        .unwrap_or_default();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ReportError::EmptyInput(origin.to_string()))?;
    }

    let rows = sheet_rows
        .map(|row| StringRecord::from(row.iter().map(cell_text).collect::<Vec<_>>()))
        .collect();
    debug!(origin, %sheet, "worksheet read");

    Ok(Table::new(origin, headers, rows))
}
