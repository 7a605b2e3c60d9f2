// 📄 Tabular Snapshot - The grid of strings an import works on
//
// Row 0 is the header row; every following row is a data row.
// Parsers turn uploaded files (CSV exports, spreadsheets) into this shape and
// nothing else: no typing, no validation, no column interpretation.

use anyhow::Context;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use csv::ReaderBuilder;
use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use crate::error::SnapshotError;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    rows: Vec<Vec<String>>,
}

impl Snapshot {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Snapshot { rows }
    }

    /// Build a snapshot from string-like rows (handy for literals)
    pub fn from_rows<R, S>(rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Snapshot {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// Data rows paired with their grid index (the header is row 0)
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, row)| (index, row.as_slice()))
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trimmed, non-empty cell at `index`. Short rows read as empty.
pub fn cell(row: &[String], index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| row.get(i))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

// ============================================================================
// PARSING COLLABORATOR
// ============================================================================

/// Turns an uploaded file into a `Snapshot`
pub trait SnapshotParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Snapshot, SnapshotError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Delimited text exports. Delimiter is sniffed from the first line unless fixed.
#[derive(Debug, Clone, Default)]
pub struct CsvSnapshotParser {
    delimiter: Option<u8>,
}

impl CsvSnapshotParser {
    pub fn new() -> Self {
        CsvSnapshotParser { delimiter: None }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        CsvSnapshotParser {
            delimiter: Some(delimiter),
        }
    }
}

impl SnapshotParser for CsvSnapshotParser {
    fn parse(&self, bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
        let text = decode_text(bytes);
        let delimiter = self
            .delimiter
            .unwrap_or_else(|| detect_delimiter(&text));

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Snapshot::new(rows))
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

/// Spreadsheet exports (xlsx, xls, xlsb, ods). Only the first sheet is read.
#[derive(Debug, Clone, Default)]
pub struct WorkbookSnapshotParser;

impl SnapshotParser for WorkbookSnapshotParser {
    fn parse(&self, bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| SnapshotError::Workbook(e.to_string()))?;

        let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
            return Ok(Snapshot::default());
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| SnapshotError::Workbook(format!("sheet '{}': {}", sheet_name, e)))?;

        Ok(Snapshot::new(sheet_rows(&range)))
    }

    fn name(&self) -> &'static str {
        "workbook"
    }
}

/// Pick a parser from the uploaded file name
pub fn parser_for(file_name: &str) -> Box<dyn SnapshotParser> {
    let lower = file_name.to_lowercase();
    let is_workbook = [".xlsx", ".xlsm", ".xlsb", ".xls", ".ods"]
        .iter()
        .any(|ext| lower.ends_with(ext));

    if is_workbook {
        Box::new(WorkbookSnapshotParser)
    } else {
        Box::new(CsvSnapshotParser::new())
    }
}

/// Parse an uploaded file's bytes, choosing the format from its name
pub fn parse_upload(file_name: &str, bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    parser_for(file_name).parse(bytes)
}

/// Read and parse a file from disk
pub fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.csv");

    parse_upload(file_name, &bytes)
        .with_context(|| format!("Failed to parse snapshot file: {}", path.display()))
}

// ============================================================================
// HELPERS
// ============================================================================

/// UTF-8 (BOM stripped) when valid, Windows-1252 otherwise.
///
/// Carrier exports generated on Windows arrive as cp1252 ("Ubicación" etc.).
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text
        }
    }
}

/// Most frequent of `;`, `,` and tab on the first non-blank line. Defaults to `,`.
pub fn detect_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");

    [b';', b',', b'\t']
        .into_iter()
        .map(|d| (d, first_line.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// Rows of a sheet's used range, re-anchored at column A.
///
/// calamine starts the range at the first used cell, so a sheet whose data
/// begins in column C would otherwise shift every index by two. Leading empty
/// rows are not restored: the first used row stays the header.
fn sheet_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    let column_offset = range.start().map_or(0, |(_, col)| col as usize);

    range
        .rows()
        .map(|row| {
            std::iter::repeat(String::new())
                .take(column_offset)
                .chain(row.iter().map(render_cell))
                .collect()
        })
        .collect()
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Tracking codes and phone lines come back as floats: 12345.0 -> "12345"
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_and_data_rows() {
        let snapshot = Snapshot::from_rows(vec![
            vec!["Guia", "Estado Guia"],
            vec!["T-001", "ENTREGADO"],
            vec!["T-002", "EN TRANSITO"],
        ]);

        assert_eq!(snapshot.header().unwrap()[0], "Guia");
        assert_eq!(snapshot.data_row_count(), 2);

        let indices: Vec<usize> = snapshot.data_rows().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_empty_snapshot_has_no_header() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert!(snapshot.header().is_none());
        assert_eq!(snapshot.data_row_count(), 0);
    }

    #[test]
    fn test_cell_reads_trimmed_values_and_tolerates_short_rows() {
        let row = vec!["  T-001 ".to_string(), "   ".to_string()];

        assert_eq!(cell(&row, Some(0)), Some("T-001"));
        assert_eq!(cell(&row, Some(1)), None);
        assert_eq!(cell(&row, Some(5)), None);
        assert_eq!(cell(&row, None), None);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("Guia;Estado Guia;Ubicacion\n1;2;3"), b';');
        assert_eq!(detect_delimiter("Guia,Estado Guia\n"), b',');
        assert_eq!(detect_delimiter("Guia\tEstado Guia\n"), b'\t');
        assert_eq!(detect_delimiter("Guia\n"), b',');
    }

    #[test]
    fn test_csv_semicolon_export_with_ragged_rows() {
        let data = "Guia;Estado Guia;Ubicacion\nT-001;ENTREGADO;CABA\nT-002;EN TRANSITO\n";
        let snapshot = CsvSnapshotParser::new().parse(data.as_bytes()).unwrap();

        assert_eq!(snapshot.data_row_count(), 2);
        let rows: Vec<&[String]> = snapshot.data_rows().map(|(_, r)| r).collect();
        assert_eq!(rows[0], ["T-001", "ENTREGADO", "CABA"]);
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn test_csv_quoted_fields_keep_delimiters() {
        let data = "Guia,Ultimo Evento Nombre\nT-001,\"Entregado, firmado\"\n";
        let snapshot = CsvSnapshotParser::with_delimiter(b',').parse(data.as_bytes()).unwrap();

        let (_, row) = snapshot.data_rows().next().unwrap();
        assert_eq!(row[1], "Entregado, firmado");
    }

    #[test]
    fn test_decode_windows_1252_export() {
        // "Ubicación" encoded as cp1252 (0xF3 = ó)
        let bytes = b"Guia;Ubicaci\xF3n\nT-001;Neuqu\xE9n\n";
        let snapshot = CsvSnapshotParser::new().parse(bytes).unwrap();

        assert_eq!(snapshot.header().unwrap()[1], "Ubicación");
        let (_, row) = snapshot.data_rows().next().unwrap();
        assert_eq!(row[1], "Neuquén");
    }

    #[test]
    fn test_decode_strips_utf8_bom() {
        let bytes = b"\xEF\xBB\xBFGuia,Estado Guia\n";
        assert_eq!(decode_text(bytes), "Guia,Estado Guia\n");
    }

    #[test]
    fn test_parser_for_picks_format_by_extension() {
        assert_eq!(parser_for("export_correo.XLSX").name(), "workbook");
        assert_eq!(parser_for("ventas.ods").name(), "workbook");
        assert_eq!(parser_for("correo.csv").name(), "csv");
        assert_eq!(parser_for("sin_extension").name(), "csv");
    }

    #[test]
    fn test_workbook_parser_rejects_garbage() {
        let result = WorkbookSnapshotParser.parse(b"definitely not a spreadsheet");
        assert!(matches!(result, Err(SnapshotError::Workbook(_))));
    }

    #[test]
    fn test_load_snapshot_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Guia,Estado Guia").unwrap();
        writeln!(file, "T-001,ENTREGADO").unwrap();
        file.flush().unwrap();

        let snapshot = load_snapshot(file.path()).unwrap();
        assert_eq!(snapshot.data_row_count(), 1);
    }

    #[test]
    fn test_sheet_rows_keep_absolute_column_positions() {
        // Used range starts at C2: columns A and B are empty on the sheet
        let mut range: Range<Data> = Range::new((1, 2), (2, 3));
        range.set_value((1, 2), Data::String("Guia".to_string()));
        range.set_value((1, 3), Data::String("Estado Guia".to_string()));
        range.set_value((2, 2), Data::String("T-001".to_string()));
        range.set_value((2, 3), Data::String("ENTREGADO".to_string()));

        let rows = sheet_rows(&range);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["", "", "Guia", "Estado Guia"]);
        assert_eq!(rows[1], vec!["", "", "T-001", "ENTREGADO"]);
    }

    #[test]
    fn test_sheet_rows_without_offset_are_unchanged() {
        let mut range: Range<Data> = Range::new((0, 0), (0, 1));
        range.set_value((0, 0), Data::String("T-001".to_string()));
        range.set_value((0, 1), Data::Float(7.0));

        assert_eq!(sheet_rows(&range), vec![vec!["T-001".to_string(), "7".to_string()]]);
    }

    #[test]
    fn test_render_cell_drops_integral_fraction() {
        assert_eq!(render_cell(&Data::Float(12345.0)), "12345");
        assert_eq!(render_cell(&Data::Float(1.5)), "1.5");
        assert_eq!(render_cell(&Data::Empty), "");
        assert_eq!(render_cell(&Data::String("CABA".to_string())), "CABA");
    }
}
