//! Table loading for broker exports.
//!
//! Turns raw upload bytes into a [`RawTable`] of string cells. Handles both
//! spreadsheet workbooks (via calamine) and delimited text (via csv with a
//! sniffed delimiter), including the metadata preamble some exports put in
//! front of the real header row.

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// How many lines the delimiter sniffer looks at.
const SNIFF_LINES: usize = 300;
/// How many lines the header-row scan looks at.
const HEADER_SCAN_LINES: usize = 180;

/// An in-memory table of string cells. Ephemeral: lives for one ingestion
/// call. Column names are not necessarily unique; lookups take the first
/// match.
#[derive(Debug, Clone)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a table, dropping fully-empty rows and columns whose names are
    /// auto-generated placeholders (empty or "Unnamed…").
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let keep: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let c = c.trim();
                !c.is_empty() && !c.starts_with("Unnamed")
            })
            .map(|(i, _)| i)
            .collect();

        let columns: Vec<String> = keep
            .iter()
            .map(|&i| columns[i].trim().to_string())
            .collect();

        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|r| {
                keep.iter()
                    .map(|&i| r.get(i).cloned().unwrap_or_default())
                    .collect::<Vec<String>>()
            })
            .filter(|r: &Vec<String>| r.iter().any(|c| !c.trim().is_empty()))
            .collect();

        RawTable { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column with this name.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell content at (row, column name); empty string when absent.
    pub fn cell(&self, row: usize, col: &str) -> &str {
        match self.col_index(col) {
            Some(i) => self
                .rows
                .get(row)
                .and_then(|r| r.get(i))
                .map(|s| s.as_str())
                .unwrap_or(""),
            None => "",
        }
    }

    /// All values of a named column, top to bottom.
    pub fn column_values<'a>(&'a self, col: &str) -> Vec<&'a str> {
        match self.col_index(col) {
            Some(i) => self
                .rows
                .iter()
                .map(|r| r.get(i).map(|s| s.as_str()).unwrap_or(""))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Load an uploaded file into a [`RawTable`].
///
/// Workbook extensions (.xlsx/.xlsm) read the sheet named "Summary" when
/// present, else the first sheet, with every cell stringified. Delimited
/// extensions (.csv/.tsv/.txt) go through BOM-tolerant decoding, delimiter
/// sniffing and header-row discovery.
pub fn load_table(raw: &[u8], filename: &str) -> Result<RawTable> {
    if raw.is_empty() {
        return Err(IngestError::EmptyFile.into());
    }

    let ext = filename
        .rsplit('.')
        .next()
        .filter(|e| *e != filename)
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "xlsx" | "xlsm" => load_workbook(raw),
        "csv" | "tsv" | "txt" => load_delimited(raw),
        other => Err(IngestError::UnsupportedFormat(if other.is_empty() {
            "(no extension)".to_string()
        } else {
            other.to_string()
        })
        .into()),
    }
}

fn load_workbook(raw: &[u8]) -> Result<RawTable> {
    let cursor = Cursor::new(raw.to_vec());
    let mut workbook: Xlsx<_> = Xlsx::new(cursor)
        .map_err(|e| IngestError::Parse(format!("workbook open failed: {e}")))?;

    let sheet_names = workbook.sheet_names();
    let sheet = sheet_names
        .iter()
        .find(|n| n.as_str() == "Summary")
        .cloned()
        .or_else(|| sheet_names.first().cloned())
        .ok_or_else(|| IngestError::Parse("workbook has no sheets".to_string()))?;

    info!("loading workbook sheet {:?}", sheet);

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| IngestError::Parse(format!("worksheet {sheet:?} read failed: {e}")))?;

    let mut rows_iter = range.rows();
    let header: Vec<String> = match rows_iter.next() {
        Some(r) => r.iter().map(cell_to_string).collect(),
        None => Vec::new(),
    };
    let rows: Vec<Vec<String>> = rows_iter
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();

    Ok(RawTable::new(header, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn load_delimited(raw: &[u8]) -> Result<RawTable> {
    // encoding_rs BOM-sniffs and strips the marker for us
    let (text, _, _) = encoding_rs::UTF_8.decode(raw);
    let text = text.into_owned();

    let preview: Vec<&str> = text.lines().take(SNIFF_LINES).collect();
    let delim = sniff_delimiter(&preview);

    // Some exports prepend metadata lines; the real header is the first line
    // that mentions both a symbol and a quantity column.
    let header_idx = preview
        .iter()
        .take(HEADER_SCAN_LINES)
        .position(|line| {
            let lo = line.to_lowercase();
            lo.contains("symbol") && lo.contains("quantity")
        })
        .unwrap_or(0);

    if header_idx > 0 {
        debug!("skipping {} preamble line(s) before header", header_idx);
    }

    let mut table = read_with(&text, delim, header_idx)?;

    // A single-column result usually means the delimiter guess was wrong.
    if table.columns().len() <= 1 {
        for retry in [b'\t', b','] {
            if retry == delim {
                continue;
            }
            let alt = read_with(&text, retry, header_idx)?;
            if alt.columns().len() > 1 {
                table = alt;
                break;
            }
        }
    }

    Ok(table)
}

/// Pick the most frequent of comma/tab/semicolon in the preview, with ties
/// resolved tab, then comma, then semicolon.
fn sniff_delimiter(preview: &[&str]) -> u8 {
    let joined: String = preview.join("\n");
    let commas = joined.matches(',').count();
    let tabs = joined.matches('\t').count();
    let semis = joined.matches(';').count();

    if tabs >= commas && tabs >= semis {
        b'\t'
    } else if commas >= semis {
        b','
    } else {
        b';'
    }
}

fn read_with(text: &str, delim: u8, skip: usize) -> Result<RawTable> {
    let body = text.lines().skip(skip).collect::<Vec<_>>().join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .flexible(true)
        .has_headers(true)
        .from_reader(body.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::Parse(format!("header read failed: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Parse(format!("record read failed: {e}")))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable::new(header, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_rejected() {
        let err = load_table(b"", "positions.csv").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::EmptyFile)
        ));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = load_table(b"hello", "statement.pdf").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnsupportedFormat(e)) if e == "pdf"
        ));
    }

    #[test]
    fn test_basic_csv() {
        let data = b"Symbol,Quantity,Last Price\nAAPL,100,187.50\nMSFT,25,402.10\n";
        let t = load_table(data, "positions.csv").unwrap();
        assert_eq!(t.columns(), &["Symbol", "Quantity", "Last Price"]);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.cell(0, "Symbol"), "AAPL");
        assert_eq!(t.cell(1, "Last Price"), "402.10");
    }

    #[test]
    fn test_preamble_before_header_is_skipped() {
        let data = concat!(
            "Account positions as of 01/03/2026\n",
            "Downloaded from brokerage\n",
            "\n",
            "Symbol,Quantity,Current Value\n",
            "AAPL,100,18750.00\n",
        );
        let t = load_table(data.as_bytes(), "export.csv").unwrap();
        assert_eq!(t.columns(), &["Symbol", "Quantity", "Current Value"]);
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.cell(0, "Symbol"), "AAPL");
    }

    #[test]
    fn test_tab_delimited_with_bom() {
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(b"Symbol\tQuantity\nAAPL\t100\n");
        let t = load_table(&data, "export.tsv").unwrap();
        assert_eq!(t.columns(), &["Symbol", "Quantity"]);
        assert_eq!(t.cell(0, "Quantity"), "100");
    }

    #[test]
    fn test_semicolon_delimited() {
        let data = b"Symbol;Quantity\nAAPL;100\nMSFT;25\n";
        let t = load_table(data, "export.csv").unwrap();
        assert_eq!(t.columns(), &["Symbol", "Quantity"]);
        assert_eq!(t.n_rows(), 2);
    }

    #[test]
    fn test_empty_rows_and_placeholder_columns_dropped() {
        let data = b"Symbol,Quantity,\nAAPL,100,x\n,,\nMSFT,25,y\n";
        let t = load_table(data, "export.csv").unwrap();
        assert_eq!(t.columns(), &["Symbol", "Quantity"]);
        assert_eq!(t.n_rows(), 2);
    }

    #[test]
    fn test_duplicate_column_lookup_takes_first() {
        let t = RawTable::new(
            vec!["Price".into(), "Price".into()],
            vec![vec!["1.00".into(), "2.00".into()]],
        );
        assert_eq!(t.cell(0, "Price"), "1.00");
    }

    #[test]
    fn test_corrupt_workbook_is_parse_error() {
        let err = load_table(b"this is not a zip archive", "book.xlsx").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Parse(_))
        ));
    }
}
