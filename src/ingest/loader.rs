use crate::db::models::{CellValue, ColumnDef, ColumnType, ParsedTable};
use crate::error::TabulaError;
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252_INIT};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

pub const CSV_EXTENSION: &str = "csv";

/// Single-byte encoding tried when UTF-8 fails. The WHATWG `ISO-8859-1` label resolves to it.
pub static FALLBACK_ENCODING: &Encoding = &WINDOWS_1252_INIT;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Cell spellings read as missing values.
const NA_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const TRUE_VALUES: &[&str] = &["True", "TRUE", "true"];
const FALSE_VALUES: &[&str] = &["False", "FALSE", "false"];

pub fn is_csv_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(CSV_EXTENSION))
        == Some(true)
}

/// Table name for a source file: its base name without the extension.
pub fn table_name_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode as UTF-8, falling back once to [`FALLBACK_ENCODING`].
pub fn decode(path: &Path, bytes: &[u8]) -> Result<(String, &'static Encoding), TabulaError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return Ok((text.into_owned(), UTF_8));
    }

    warn!(
        path = %path.display(),
        fallback = FALLBACK_ENCODING.name(),
        "UTF-8 decode failed, retrying with fallback encoding"
    );
    FALLBACK_ENCODING
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| (text.into_owned(), FALLBACK_ENCODING))
        .ok_or_else(|| {
            TabulaError::file_read(
                path,
                format!("not decodable as UTF-8 or {}", FALLBACK_ENCODING.name()),
            )
        })
}

/// Parse CSV text with a header row into a typed table called `name`.
pub fn parse_csv(name: &str, text: &str) -> Result<ParsedTable, String> {
    if ends_inside_quotes(text) {
        return Err("EOF inside quoted field".to_string());
    }

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| format!("failed to read header row: {e}"))?
        .clone();
    if headers.is_empty() {
        return Err("no columns to parse from file".to_string());
    }
    let names = normalize_headers(headers.iter());
    let width = names.len();

    let mut raw_rows: Vec<Vec<Option<&str>>> = Vec::new();
    let records = rdr
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("malformed record: {e}"))?;
    for record in &records {
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(format!(
                "expected {width} fields in line {line}, saw {}",
                record.len()
            ));
        }
        let row = (0..width)
            .map(|idx| record.get(idx).filter(|cell| !is_missing(cell)))
            .collect();
        raw_rows.push(row);
    }

    let columns: Vec<ColumnDef> = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| ColumnDef {
            name,
            column_type: infer_column_type(raw_rows.iter().map(|row| row[idx])),
        })
        .collect();

    let rows = raw_rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&columns)
                .map(|(cell, col)| coerce(cell, col.column_type))
                .collect()
        })
        .collect();

    Ok(ParsedTable {
        name: name.to_string(),
        columns,
        rows,
    })
}

/// Blank headers become `Unnamed: {idx}`; repeats get `.1`, `.2`, ... suffixes.
/// SQLite column names are case-insensitive, so uniqueness is checked that way.
fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    raw.enumerate()
        .map(|(idx, header)| {
            let base = if header.trim().is_empty() {
                format!("Unnamed: {idx}")
            } else {
                header.to_string()
            };
            let mut name = base.clone();
            let mut suffix = 0;
            while used.contains(&name.to_lowercase()) {
                suffix += 1;
                name = format!("{base}.{suffix}");
            }
            used.insert(name.to_lowercase());
            name
        })
        .collect()
}

/// True when a quoted field is still open at the end of `text`.
/// A quote only opens a field at its first character; `""` inside quotes is an escape.
fn ends_inside_quotes(text: &str) -> bool {
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            ',' | '\n' | '\r' => at_field_start = true,
            _ => at_field_start = false,
        }
    }
    in_quotes
}

fn is_missing(cell: &str) -> bool {
    NA_VALUES.contains(&cell)
}

fn parse_bool(cell: &str) -> Option<bool> {
    if TRUE_VALUES.contains(&cell) {
        Some(true)
    } else if FALSE_VALUES.contains(&cell) {
        Some(false)
    } else {
        None
    }
}

fn infer_column_type<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> ColumnType {
    let mut saw_value = false;
    let mut saw_missing = false;
    let mut all_bool = true;
    let mut all_int = true;
    let mut all_real = true;

    for cell in cells {
        let Some(value) = cell else {
            saw_missing = true;
            continue;
        };
        saw_value = true;
        let trimmed = value.trim();
        all_bool &= parse_bool(value).is_some();
        all_int &= trimmed.parse::<i64>().is_ok();
        all_real &= trimmed.parse::<f64>().is_ok();
    }

    match (saw_value, saw_missing) {
        (false, true) => ColumnType::Real,
        (false, false) => ColumnType::Text,
        _ if all_bool && !saw_missing => ColumnType::Boolean,
        _ if all_int && !saw_missing => ColumnType::Integer,
        _ if all_real => ColumnType::Real,
        _ => ColumnType::Text,
    }
}

fn coerce(cell: Option<&str>, column_type: ColumnType) -> CellValue {
    let Some(value) = cell else {
        return CellValue::Null;
    };
    let trimmed = value.trim();
    let parsed = match column_type {
        ColumnType::Boolean => parse_bool(value).map(CellValue::Bool),
        ColumnType::Integer => trimmed.parse().ok().map(CellValue::Integer),
        ColumnType::Real => trimmed.parse().ok().map(CellValue::Real),
        ColumnType::Text => None,
    };
    parsed.unwrap_or_else(|| CellValue::Text(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn types(table: &ParsedTable) -> Vec<ColumnType> {
        table.columns.iter().map(|c| c.column_type).collect()
    }

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(is_csv_file(Path::new("dir/grades.csv")));
        assert!(is_csv_file(Path::new("GRADES.CSV")));
        assert!(!is_csv_file(Path::new("notes.txt")));
        assert!(!is_csv_file(Path::new("csv")));
    }

    #[test]
    fn table_name_is_file_stem() {
        assert_eq!(
            table_name_for(Path::new("/tmp/up/students.csv")).as_deref(),
            Some("students")
        );
        assert_eq!(
            table_name_for(Path::new("archive.2024.csv")).as_deref(),
            Some("archive.2024")
        );
    }

    #[test]
    fn decode_falls_back_to_single_byte_encoding() {
        let path = PathBuf::from("cities.csv");
        let latin1 = b"city\nS\xe3o Paulo\n";
        let (text, encoding) = decode(&path, latin1).unwrap();
        assert_eq!(encoding, FALLBACK_ENCODING);
        assert_eq!(text, "city\nS\u{e3}o Paulo\n");
    }

    #[test]
    fn decode_strips_utf8_bom() {
        let path = PathBuf::from("bom.csv");
        let (text, encoding) = decode(&path, b"\xEF\xBB\xBFid\n1\n").unwrap();
        assert_eq!(encoding, UTF_8);
        assert_eq!(text, "id\n1\n");
    }

    #[test]
    fn infers_column_types_from_values() {
        let table = parse_csv(
            "students",
            "name,age,gpa,enrolled,notes\n\
             Alice,20,3.5,True,\n\
             Bob,22,3.9,False,transfer\n",
        )
        .unwrap();
        assert_eq!(
            types(&table),
            vec![
                ColumnType::Text,
                ColumnType::Integer,
                ColumnType::Real,
                ColumnType::Boolean,
                ColumnType::Text,
            ]
        );
        assert_eq!(
            table.rows[0],
            vec![
                CellValue::Text("Alice".into()),
                CellValue::Integer(20),
                CellValue::Real(3.5),
                CellValue::Bool(true),
                CellValue::Null,
            ]
        );
    }

    #[test]
    fn integers_with_gaps_become_real() {
        let table = parse_csv("t", "score\n10\nNA\n12\n").unwrap();
        assert_eq!(types(&table), vec![ColumnType::Real]);
        assert_eq!(
            table.rows,
            vec![
                vec![CellValue::Real(10.0)],
                vec![CellValue::Null],
                vec![CellValue::Real(12.0)],
            ]
        );
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let table = parse_csv("t", "a,b,c\n1,2\n").unwrap();
        assert_eq!(table.rows[0][2], CellValue::Null);
        assert_eq!(types(&table), vec![ColumnType::Integer, ColumnType::Integer, ColumnType::Real]);
    }

    #[test]
    fn long_rows_are_rejected() {
        let err = parse_csv("t", "a,b\n1,2\n3,4,5\n").unwrap_err();
        assert!(err.contains("expected 2 fields"), "{err}");
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let err = parse_csv("t", "a,b\n1,\"oops\n2,3\n").unwrap_err();
        assert_eq!(err, "EOF inside quoted field");
    }

    #[test]
    fn closed_and_inner_quotes_are_accepted() {
        let table = parse_csv(
            "t",
            "name,height\n\"Smith, \"\"Jo\"\"\",5\"\n\"multi\nline\",6\n",
        )
        .unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows[0][0], CellValue::Text("Smith, \"Jo\"".into()));
        assert_eq!(table.rows[0][1], CellValue::Text("5\"".into()));
        assert_eq!(table.rows[1][0], CellValue::Text("multi\nline".into()));
    }

    #[test]
    fn empty_input_has_no_columns() {
        assert!(parse_csv("t", "").is_err());
    }

    #[test]
    fn header_only_file_yields_empty_text_table() {
        let table = parse_csv("t", "id,name\n").unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(types(&table), vec![ColumnType::Text, ColumnType::Text]);
    }

    #[test]
    fn headers_are_deduplicated_and_named() {
        let names = normalize_headers(["id", "", "id", "ID", "id.1"].into_iter());
        assert_eq!(names, vec!["id", "Unnamed: 1", "id.1", "ID.2", "id.1.1"]);
    }
}
