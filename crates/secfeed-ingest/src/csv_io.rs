//! Flat CSV hand-off format
//!
//! Comma-delimited UTF-8 with a mandatory header row, one record per line.
//! Values are rendered with [`FieldValue::render`] and read back through the
//! mapping's declared kinds, so a written file reads back into equal records.

use crate::error::Result;
use crate::mapping::{FieldMapping, Naming};
use secfeed_common::{FieldValue, Record};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Write internal records under the column names of `naming`
///
/// Fields a record lacks are written empty. Returns the number of rows.
pub fn write_records<W: Write>(
    writer: W,
    mapping: &FieldMapping,
    naming: Naming,
    records: &[Record],
) -> Result<usize> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(mapping.columns(naming))?;

    for record in records {
        out.write_record(mapping.fields().iter().map(|spec| {
            record
                .get(&spec.internal)
                .map(FieldValue::render)
                .unwrap_or_default()
        }))?;
    }
    out.flush()?;
    Ok(records.len())
}

/// Read records whose header uses the column names of `naming`
///
/// Columns the mapping does not know are ignored; returned records always
/// use internal names.
pub fn read_records<R: Read>(reader: R, mapping: &FieldMapping, naming: Naming) -> Result<Vec<Record>> {
    let mut input = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let columns: Vec<Option<(String, String)>> = input
        .headers()?
        .iter()
        .map(|column| {
            mapping
                .spec(naming, column)
                .map(|spec| (column.to_string(), spec.internal.clone()))
        })
        .collect();

    let mut records = Vec::new();
    for row in input.records() {
        let row = row?;
        let mut record = Record::new();
        for (column, text) in columns.iter().zip(row.iter()) {
            if let Some((name, internal)) = column {
                record.insert(internal.clone(), mapping.parse(naming, name, text)?);
            }
        }
        records.push(record);
    }
    Ok(records)
}

pub fn write_records_to_path(
    path: &Path,
    mapping: &FieldMapping,
    naming: Naming,
    records: &[Record],
) -> Result<usize> {
    write_records(File::create(path)?, mapping, naming, records)
}

pub fn read_records_from_path(path: &Path, mapping: &FieldMapping, naming: Naming) -> Result<Vec<Record>> {
    read_records(File::open(path)?, mapping, naming)
}

/// Column names of the header row
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut input = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    Ok(input.headers()?.iter().map(str::to_string).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secfeed_common::FieldKind;

    fn mapping() -> FieldMapping {
        FieldMapping::new(&[
            ("CVE_ID", "cve_id", FieldKind::Text),
            ("BSE_SCR", "base_score", FieldKind::Float),
            ("LST_MOD_DATETIME", "last_modified_datetime", FieldKind::Timestamp),
            ("DSCRPTN", "description", FieldKind::Text),
        ])
    }

    #[test]
    fn test_written_file_reads_back_equal() {
        let records = vec![
            Record::new()
                .with("cve_id", "CVE-2024-0001")
                .with("base_score", 9.8)
                .with(
                    "last_modified_datetime",
                    secfeed_common::types::parse_timestamp("2024-01-18T10:00:00.123").unwrap(),
                )
                .with("description", "Buffer overflow, \"quoted\""),
            Record::new()
                .with("cve_id", "CVE-2024-0002")
                .with("base_score", FieldValue::Null)
                .with("last_modified_datetime", FieldValue::Null)
                .with("description", FieldValue::Null),
        ];

        let mut buffer = Vec::new();
        assert_eq!(write_records(&mut buffer, &mapping(), Naming::External, &records).unwrap(), 2);
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("CVE_ID,BSE_SCR,LST_MOD_DATETIME,DSCRPTN\n"));

        let back = read_records(buffer.as_slice(), &mapping(), Naming::External).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_unknown_columns_are_ignored() {
        let data = "cve_id,base_score,extra\nCVE-2024-0001,5.0,ignored\n";
        let records = read_records(data.as_bytes(), &mapping(), Naming::Internal).unwrap();
        assert_eq!(
            records,
            vec![Record::new().with("cve_id", "CVE-2024-0001").with("base_score", 5.0)]
        );
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let data = "cve_id,base_score\nCVE-2024-0001,critical\n";
        assert!(read_records(data.as_bytes(), &mapping(), Naming::Internal).is_err());
    }
}
