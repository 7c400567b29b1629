// Primitives for reading and writing CSV files.

use csv::{ReaderBuilder, Writer};

use crate::etl::*;

pub fn csv_cell(s: &str) -> CellValue {
    if s.trim().is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(s.to_string())
    }
}

/// Reads a CSV file with a header row.
///
/// The cells are kept as text: the number coercion happens when reshaping, and
/// identifiers like `01001` keep their leading zeros. Rows of the wrong length
/// are accepted here and rejected by the reshaper.
pub fn read_csv_table(path: &Path) -> EtlResult<Table> {
    let path_s = path.display().to_string();
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .context(ReadingCsvSnafu { path: &path_s })?;
    let columns: Vec<String> = rdr
        .headers()
        .context(ReadingCsvSnafu { path: &path_s })?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    debug!("read_csv_table: {:?} header: {:?}", path_s, columns);
    let mut table = Table::new(columns);
    for record_r in rdr.records() {
        let record = record_r.context(ReadingCsvSnafu { path: &path_s })?;
        table.rows.push(record.iter().map(csv_cell).collect());
    }
    Ok(table)
}

/// Writes a table back to CSV. Empty cells are written as empty strings.
pub fn write_csv_table(path: &Path, table: &Table) -> EtlResult<()> {
    let path_s = path.display().to_string();
    let mut wtr = Writer::from_path(path).context(WritingCsvSnafu { path: &path_s })?;
    wtr.write_record(&table.columns)
        .context(WritingCsvSnafu { path: &path_s })?;
    for row in table.rows.iter() {
        let cells: Vec<String> = row.iter().map(|c| c.as_text().unwrap_or_default()).collect();
        wtr.write_record(&cells)
            .context(WritingCsvSnafu { path: &path_s })?;
    }
    wtr.flush().context(WritingFileSnafu { path: &path_s })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_keeps_text_and_empties() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("9.csv");
        fs::write(&p, "precinct_id,Smith, Jones \n01001,60,\n01002,1,2,3\n").unwrap();
        let table = read_csv_table(&p).unwrap();
        assert_eq!(table.columns, vec!["precinct_id", "Smith", "Jones"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][0], CellValue::Text("01001".to_string()));
        assert_eq!(table.rows[0][2], CellValue::Empty);
        // Ragged rows are kept as is.
        assert_eq!(table.rows[1].len(), 4);
    }

    #[test]
    fn header_only() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("9.csv");
        fs::write(&p, "precinct_id,Smith\n").unwrap();
        let table = read_csv_table(&p).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.csv");
        let table = Table {
            columns: vec!["ward".to_string(), "precinct_id".to_string()],
            rows: vec![
                vec![CellValue::Int(1), CellValue::Text("01001".to_string())],
                vec![CellValue::Empty, CellValue::Empty],
            ],
        };
        write_csv_table(&p, &table).unwrap();
        let contents = fs::read_to_string(&p).unwrap();
        assert_eq!(contents, "ward,precinct_id\n1,01001\n,\n");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_csv_table(&dir.path().join("missing.csv")).is_err());
    }
}
