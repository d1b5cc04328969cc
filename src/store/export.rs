//! Dataset export and import (CSV and JSON).
//!
//! CSV layout: header `id,context,input,output`, text fields always quoted
//! with embedded quotes doubled, rows joined by `\n` with no trailing
//! newline. Files are written atomically with the previous version kept as
//! `<file>.bak`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{DatagenError, Entry, ExportFormat, Result};

pub const CSV_HEADER: &str = "id,context,input,output";

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Render entries as CSV.
pub fn to_csv(entries: &[Entry]) -> String {
    let rows = entries
        .iter()
        .map(|e| {
            format!(
                "{},{},{},{}",
                e.id,
                quote(&e.context),
                quote(&e.input),
                quote(&e.output)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{CSV_HEADER}\n{rows}")
}

/// Split CSV text into records of raw fields.
///
/// Quoted fields may contain commas, newlines and doubled quotes.
fn csv_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DatagenError::ParseError(
            "CSV ends inside a quoted field".to_string(),
        ));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Parse CSV produced by [`to_csv`] back into entries.
pub fn parse_csv(text: &str) -> Result<Vec<Entry>> {
    let mut records = csv_records(text)?.into_iter();

    match records.next() {
        Some(header) if header.join(",") == CSV_HEADER => {}
        Some(header) => {
            return Err(DatagenError::ParseError(format!(
                "Unexpected CSV header: {}",
                header.join(",")
            )));
        }
        None => return Ok(Vec::new()),
    }

    records
        .enumerate()
        .map(|(row, fields)| {
            let [id, context, input, output]: [String; 4] =
                fields.try_into().map_err(|fields: Vec<String>| {
                    DatagenError::ParseError(format!(
                        "CSV row {} has {} fields, expected 4",
                        row + 1,
                        fields.len()
                    ))
                })?;
            let id = id.trim().parse::<u64>().map_err(|e| {
                DatagenError::ParseError(format!("CSV row {} has invalid id {id:?}: {e}", row + 1))
            })?;
            Ok(Entry {
                id,
                context,
                input,
                output,
            })
        })
        .collect()
}

/// Render entries as a pretty-printed JSON array (2-space indent).
pub fn to_json(entries: &[Entry]) -> Result<String> {
    serde_json::to_string_pretty(entries)
        .map_err(|e| DatagenError::Internal(format!("Serializing dataset: {e}")))
}

pub fn from_json(text: &str) -> Result<Vec<Entry>> {
    serde_json::from_str(text)
        .map_err(|e| DatagenError::ParseError(format!("Invalid dataset JSON: {e}")))
}

/// Render entries in the requested format.
pub fn render(entries: &[Entry], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(to_csv(entries)),
        ExportFormat::Json => to_json(entries),
    }
}

/// Guess the format from a file extension, defaulting to CSV.
pub fn format_for_path(path: &Path) -> ExportFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
        _ => ExportFormat::Csv,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write a dataset file atomically (temp file + rename).
pub fn write_export(path: &Path, entries: &[Entry], format: ExportFormat) -> Result<()> {
    let content = render(entries, format)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DatagenError::io("creating output dir", e))?;
    }

    // Backup existing export
    if path.exists() {
        fs::copy(path, sibling(path, ".bak"))
            .map_err(|e| DatagenError::io("backing up previous export", e))?;
    }

    let temp_path = sibling(path, ".tmp");
    let file =
        File::create(&temp_path).map_err(|e| DatagenError::io("creating temp export", e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(content.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| DatagenError::io("writing temp export", e))?;
    drop(writer);

    // Atomic rename
    fs::rename(&temp_path, path).map_err(|e| DatagenError::io("renaming export", e))?;

    debug!(path = %path.display(), entries = entries.len(), "Export written");
    Ok(())
}

/// Read a dataset file, choosing the parser from the extension.
pub fn read_dataset(path: &Path) -> Result<Vec<Entry>> {
    let text = fs::read_to_string(path)
        .map_err(|e| DatagenError::io(format!("reading dataset {}", path.display()), e))?;
    match format_for_path(path) {
        ExportFormat::Json => from_json(&text),
        ExportFormat::Csv => parse_csv(&text),
    }
}

/// Parse a comma-separated id list.
///
/// Each token contributes its leading digits (`"2abc"` is 2, `"1.5"` is 1);
/// tokens that do not start with a digit are ignored.
pub fn parse_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|token| {
            let token = token.trim();
            let end = token
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(token.len());
            token[..end].parse().ok()
        })
        .collect()
}
