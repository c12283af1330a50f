// Pipeline ingestion: source file discovery, tabular extraction, and archiving of loaded files

use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{Number, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::constants::SUPPORTED_EXTENSIONS;
use crate::error::{EtlError, Result};
use crate::types::RawRow;

/// Turns one source file into raw rows
pub trait RowSource {
    fn extract(&self, path: &Path) -> Result<Vec<RawRow>>;
}

/// Reads CSV files and the first worksheet of Excel workbooks.
///
/// The first row supplies column names. Empty cells become `null` so they
/// stay visible in `additional_info` and count as absent during promotion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRowSource;

impl RowSource for FileRowSource {
    fn extract(&self, path: &Path) -> Result<Vec<RawRow>> {
        let rows = match extension_of(path).as_deref() {
            Some("csv") => read_csv(path)?,
            Some("xlsx") | Some("xls") => read_workbook(path)?,
            _ => return Err(EtlError::UnsupportedFile(path.display().to_string())),
        };
        info!("Extracted {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_supported(path: &Path) -> bool {
    extension_of(path).map_or(false, |ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Column name for a header cell; blank headers get a positional name
fn header_name(raw: &str, index: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Unnamed: {index}")
    } else {
        trimmed.to_string()
    }
}

fn read_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| header_name(h.trim_start_matches('\u{feff}'), i))
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row = RawRow::new();
        for (index, column) in headers.iter().enumerate() {
            let value = match record.get(index) {
                Some(field) if !field.is_empty() => Value::String(field.to_string()),
                _ => Value::Null,
            };
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<RawRow>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| EtlError::Extraction {
            file: path.display().to_string(),
            message: "workbook contains no sheets".to_string(),
        })?;
    let range = workbook.worksheet_range(&sheet_name)?;
    debug!("Reading sheet '{}' of {}", sheet_name, path.display());

    let mut lines = range.rows();
    let Some(header_row) = lines.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| header_name(&header_text(cell), i))
        .collect();

    let rows = lines
        .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|cells| {
            headers
                .iter()
                .enumerate()
                .map(|(index, column)| {
                    let value = cells.get(index).map_or(Value::Null, cell_to_value);
                    (column.clone(), value)
                })
                .collect::<RawRow>()
        })
        .collect();
    Ok(rows)
}

fn header_text(cell: &Data) -> String {
    match cell_to_value(cell) {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Data::Int(i) => Value::Number((*i).into()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Number::from_f64(dt.as_f64()).map_or(Value::Null, Value::Number),
        Data::Error(e) => Value::String(format!("#{e:?}")),
    }
}

/// Supported source files in `dir`, sorted by file name.
/// A missing or unreadable directory is logged and yields no files.
pub fn find_source_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Source directory not found: {} ({})", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if files.is_empty() {
        warn!("No source files found in {}", dir.display());
    } else {
        info!("Found {} source files in {}", files.len(), dir.display());
    }
    files
}

/// Move a loaded file into `processed_dir`, returning its new location
pub fn move_processed_file(path: &Path, processed_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(processed_dir)?;
    let file_name = path.file_name().ok_or_else(|| EtlError::Extraction {
        file: path.display().to_string(),
        message: "path has no file name".to_string(),
    })?;
    let destination = processed_dir.join(file_name);

    if fs::rename(path, &destination).is_err() {
        // rename fails across filesystems
        fs::copy(path, &destination)?;
        fs::remove_file(path)?;
    }
    info!("Moved processed file to {}", destination.display());
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_csv_rows_keep_every_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "leads.csv",
            "Company,Phone,Notes\nAcme,(555) 123-4567,\nGlobex,555-000-1111,vip\n",
        );

        let rows = FileRowSource.extract(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Company"], json!("Acme"));
        assert_eq!(rows[0]["Notes"], Value::Null);
        assert_eq!(rows[1]["Notes"], json!("vip"));
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["Company", "Notes", "Phone"]);
    }

    #[test]
    fn test_short_csv_rows_fill_missing_cells_with_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "short.csv", "Company,Phone,,Notes\nAcme\n");

        let rows = FileRowSource.extract(&path).unwrap();
        assert_eq!(rows[0]["Phone"], Value::Null);
        assert_eq!(rows[0]["Notes"], Value::Null);
        assert!(rows[0].contains_key("Unnamed: 2"));
    }

    #[test]
    fn test_unsupported_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "notes.txt", "hello");
        assert!(matches!(
            FileRowSource.extract(&path),
            Err(EtlError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_find_source_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b_leads.csv", "Company\n");
        write(dir.path(), "a_leads.XLSX", "");
        write(dir.path(), "readme.md", "");
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let names: Vec<String> = find_source_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_leads.XLSX", "b_leads.csv"]);

        assert!(find_source_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_move_processed_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(dir.path(), "leads.csv", "Company\nAcme\n");
        let processed = dir.path().join("processed");

        let moved = move_processed_file(&source, &processed).unwrap();
        assert!(!source.exists());
        assert_eq!(moved, processed.join("leads.csv"));
        assert_eq!(fs::read_to_string(moved).unwrap(), "Company\nAcme\n");
    }

    fn write_workbook(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let leads = workbook.add_worksheet().set_name("Leads").unwrap();
        leads.write_string(0, 0, "Company").unwrap();
        leads.write_string(0, 1, "Phone").unwrap();
        leads.write_string(0, 2, "Notes").unwrap();
        leads.write_string(1, 0, "Acme").unwrap();
        leads.write_number(1, 1, 5551234567.0).unwrap();
        // row 2 left blank
        leads.write_string(3, 0, "Globex").unwrap();
        leads.write_number(3, 1, 5550001111.0).unwrap();
        leads.write_string(3, 2, "vip").unwrap();

        let other = workbook.add_worksheet().set_name("Archive").unwrap();
        other.write_string(0, 0, "Ignored").unwrap();
        other.write_string(1, 0, "never read").unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_workbook_reads_first_sheet_with_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads.xlsx");
        write_workbook(&path);

        let rows = FileRowSource.extract(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["Company", "Notes", "Phone"]);
        assert_eq!(rows[0]["Company"], json!("Acme"));
        assert_eq!(rows[0]["Phone"].as_f64(), Some(5551234567.0));
        assert_eq!(rows[0]["Notes"], Value::Null);
        assert_eq!(rows[1]["Company"], json!("Globex"));
        assert_eq!(rows[1]["Notes"], json!("vip"));
        assert!(rows.iter().all(|row| !row.contains_key("Ignored")));
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(cell_to_value(&Data::Empty), Value::Null);
        assert_eq!(cell_to_value(&Data::String(String::new())), Value::Null);
        assert_eq!(cell_to_value(&Data::Float(5551234567.0)), json!(5551234567.0));
        assert_eq!(cell_to_value(&Data::Int(7)), json!(7));
        assert_eq!(cell_to_value(&Data::Bool(true)), json!(true));
    }
}
