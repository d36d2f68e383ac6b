//! Parse an uploaded member CSV into [`CsvRowInput`]s.
//!
//! Expects a header row with `name`, `email` and `role` columns in any order
//! (case-insensitive, extra columns ignored). Rows keep their raw values;
//! validation happens when the import is staged.

use std::io::Read;

use classdesk_types::import::CsvRowInput;

#[derive(Debug, thiserror::Error)]
pub enum CsvUploadError {
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
}

const REQUIRED: [&str; 3] = ["name", "email", "role"];

pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<CsvRowInput>, CsvUploadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let position = |column: &'static str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(column))
            .ok_or(CsvUploadError::MissingColumn(column))
    };
    let [name_idx, email_idx, role_idx] = [
        position(REQUIRED[0])?,
        position(REQUIRED[1])?,
        position(REQUIRED[2])?,
    ];

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        rows.push(CsvRowInput {
            row_number: index as u32 + 1,
            name: field(name_idx),
            email: field(email_idx),
            role: field(role_idx),
        });
    }

    tracing::debug!(rows = rows.len(), "parsed member CSV");
    Ok(rows)
}

/// Convenience wrapper for in-memory content.
pub fn parse_csv_str(content: &str) -> Result<Vec<CsvRowInput>, CsvUploadError> {
    parse_csv(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_reordered_headers() {
        let rows = parse_csv_str(
            "Email, Name ,ROLE,notes\n ada@example.com ,Ada Lovelace,student,x\ngrace@example.com,Grace Hopper,teacher,\n",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            CsvRowInput {
                row_number: 1,
                name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                role: "student".into(),
            }
        );
        assert_eq!(rows[1].row_number, 2);
        assert_eq!(rows[1].role, "teacher");
    }

    #[test]
    fn short_rows_yield_empty_fields() {
        let rows = parse_csv_str("name,email,role\nAda\n").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ada");
        assert_eq!(rows[0].email, "");
        assert_eq!(rows[0].role, "");
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = parse_csv_str("name,email\nAda,ada@example.com\n").unwrap_err();
        assert!(matches!(err, CsvUploadError::MissingColumn("role")));
    }

    #[test]
    fn header_only_file_has_no_rows() {
        assert!(parse_csv_str("name,email,role\n").unwrap().is_empty());
    }

    #[test]
    fn byte_order_mark_is_tolerated() {
        let rows = parse_csv_str("\u{feff}name,email,role\nAda,ada@example.com,student\n").unwrap();
        assert_eq!(rows[0].name, "Ada");
    }
}
