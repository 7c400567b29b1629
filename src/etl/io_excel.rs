use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::etl::*;

pub fn excel_cell(cell: &DataType) -> CellValue {
    match cell {
        DataType::Empty => CellValue::Empty,
        DataType::Int(i) => CellValue::Int(*i),
        DataType::Float(f) => CellValue::Float(*f),
        DataType::DateTime(f) => CellValue::Float(*f),
        DataType::String(s) if s.trim().is_empty() => CellValue::Empty,
        DataType::String(s) => CellValue::Text(s.clone()),
        DataType::Bool(b) => CellValue::Text(b.to_string()),
        x => {
            warn!("excel_cell: could not understand cell {:?}", x);
            CellValue::Empty
        }
    }
}

/// Reads the first worksheet of an Excel file. The first row is the header.
pub fn read_excel_table(path: &Path) -> EtlResult<Table> {
    let path_s = path.display().to_string();
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path: &path_s })?;
    let wrange = workbook
        .worksheet_range_at(0)
        .context(EmptyExcelSnafu { path: &path_s })?
        .context(OpeningExcelSnafu { path: &path_s })?;

    let mut iter = wrange.rows();
    let header = iter.next().context(EmptyExcelSnafu { path: &path_s })?;
    debug!("read_excel_table: {:?} header: {:?}", path_s, header);
    let columns: Vec<String> = header
        .iter()
        .map(|c| excel_cell(c).as_text().unwrap_or_default().trim().to_string())
        .collect();
    let mut table = Table::new(columns);
    for row in iter {
        table.rows.push(row.iter().map(excel_cell).collect());
    }
    Ok(table)
}
