// Adds a canonical precinct_id column to the raw result CSV files, in place.

use crate::etl::*;

use precinct_returns::schema::PRECINCT_ID;

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum PrecinctIdOutcome {
    Rewritten {
        rows: usize,
        missing: usize,
        dropped_columns: Vec<String>,
    },
    /// No ward or no precinct column: the file was left untouched.
    Skipped { columns: Vec<String> },
}

fn find_column(columns: &[String], pattern: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c != PRECINCT_ID && c.to_lowercase().contains(pattern))
}

fn is_id_column(name: &str) -> bool {
    name != PRECINCT_ID && (name == "id" || name == "ID" || name.to_lowercase().contains("id"))
}

fn derive_id(ward: &CellValue, precinct: &CellValue) -> CellValue {
    let (w, p) = match (ward.as_integer(), precinct.as_integer()) {
        (Some(w), Some(p)) => (w, p),
        _ => return CellValue::Empty,
    };
    match (u32::try_from(w), u32::try_from(p)) {
        (Ok(w), Ok(p)) => match identity::canonical_id(w, p) {
            Ok(id) => CellValue::Text(id),
            Err(e) => {
                warn!("derive_id: {}", e);
                CellValue::Empty
            }
        },
        _ => CellValue::Empty,
    }
}

/// Sets the precinct_id column from the ward and precinct columns and drops
/// the other id columns.
pub fn add_precinct_id(table: &mut Table) -> PrecinctIdOutcome {
    let (ward_idx, precinct_idx) = match (
        find_column(&table.columns, "ward"),
        find_column(&table.columns, "precinct"),
    ) {
        (Some(w), Some(p)) => (w, p),
        _ => {
            return PrecinctIdOutcome::Skipped {
                columns: table.columns.clone(),
            }
        }
    };
    debug!(
        "add_precinct_id: ward column {:?}, precinct column {:?}",
        table.columns[ward_idx], table.columns[precinct_idx]
    );
    let ids: Vec<CellValue> = (0..table.len())
        .map(|r| derive_id(table.cell(r, ward_idx), table.cell(r, precinct_idx)))
        .collect();
    let missing = ids.iter().filter(|c| c.is_empty()).count();
    table.set_column(PRECINCT_ID, ids);

    let keep: Vec<bool> = table.columns.iter().map(|c| !is_id_column(c)).collect();
    let dropped_columns: Vec<String> = table
        .columns
        .iter()
        .zip(keep.iter())
        .filter(|(_, k)| !**k)
        .map(|(c, _)| c.clone())
        .collect();
    if !dropped_columns.is_empty() {
        table.columns = table
            .columns
            .iter()
            .zip(keep.iter())
            .filter(|(_, k)| **k)
            .map(|(c, _)| c.clone())
            .collect();
        for row in table.rows.iter_mut() {
            let mut idx = 0;
            row.retain(|_| {
                let k = keep.get(idx).copied().unwrap_or(true);
                idx += 1;
                k
            });
        }
    }
    PrecinctIdOutcome::Rewritten {
        rows: table.len(),
        missing,
        dropped_columns,
    }
}

pub fn add_precinct_id_file(path: &Path) -> EtlResult<PrecinctIdOutcome> {
    let mut table = io_csv::read_csv_table(path)?;
    let outcome = add_precinct_id(&mut table);
    match &outcome {
        PrecinctIdOutcome::Rewritten {
            rows,
            missing,
            dropped_columns,
        } => {
            io_csv::write_csv_table(path, &table)?;
            if *missing > 0 {
                warn!(
                    "add_precinct_id_file: {:?}: {} of {} rows without a precinct id",
                    path, missing, rows
                );
            }
            debug!(
                "add_precinct_id_file: {:?}: {} rows, dropped {:?}",
                path, rows, dropped_columns
            );
        }
        PrecinctIdOutcome::Skipped { columns } => {
            error!(
                "add_precinct_id_file: {:?}: could not find ward and precinct columns in {:?}",
                path, columns
            );
        }
    }
    Ok(outcome)
}

/// Processes every CSV file in the numbered directories under `base_dir`.
/// Returns the number of rewritten files and the number of files seen.
pub fn add_precinct_ids(base_dir: &Path) -> EtlResult<(usize, usize)> {
    let mut rewritten = 0;
    let mut total = 0;
    for (directory_id, dir) in io_common::numbered_entries(base_dir, |p| p.is_dir())? {
        let files = io_common::numbered_entries(&dir, |p| {
            p.extension().and_then(|e| e.to_str()) == Some(io_common::CSV_EXTENSION)
        })?;
        for (_, path) in files {
            total += 1;
            match add_precinct_id_file(&path) {
                Ok(PrecinctIdOutcome::Rewritten { .. }) => rewritten += 1,
                Ok(PrecinctIdOutcome::Skipped { .. }) => {}
                Err(e) => error!(
                    "add_precinct_ids: directory {}: {}: {}",
                    directory_id,
                    io_common::simplify_file_name(&path),
                    e
                ),
            }
        }
    }
    info!("add_precinct_ids: rewrote {} of {} files", rewritten, total);
    Ok((rewritten, total))
}
