use crate::etl::*;

pub const CSV_EXTENSION: &str = "csv";
pub const EXCEL_EXTENSION: &str = "xlsx";

pub fn simplify_file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Directory and file ids are plain non-negative integers.
pub fn numeric_id(s: &str) -> Option<i64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse::<i64>().ok()
}

pub fn file_id(path: &Path) -> Option<i64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(numeric_id)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

pub fn is_result_file(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some(CSV_EXTENSION) | Some(EXCEL_EXTENSION)
    )
}

/// Reads a result file into a table, picking the reader from the extension.
pub fn read_table(path: &Path) -> EtlResult<Table> {
    match extension(path).as_deref() {
        Some(CSV_EXTENSION) => io_csv::read_csv_table(path),
        Some(EXCEL_EXTENSION) => io_excel::read_excel_table(path),
        _ => UnsupportedFileSnafu {
            path: path.display().to_string(),
        }
        .fail(),
    }
}

/// The numbered entries of a directory, sorted by id.
///
/// Entries whose name (or file stem) is not a number are skipped.
pub fn numbered_entries(
    dir: &Path,
    keep: impl Fn(&Path) -> bool,
) -> EtlResult<Vec<(i64, PathBuf)>> {
    let path_s = dir.display().to_string();
    let mut res: Vec<(i64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).context(ListingDirectorySnafu { path: &path_s })? {
        let entry = entry.context(ListingDirectorySnafu { path: &path_s })?;
        let p = entry.path();
        if !keep(&p) {
            continue;
        }
        let id = if p.is_dir() {
            p.file_name().and_then(|s| s.to_str()).and_then(numeric_id)
        } else {
            file_id(&p)
        };
        match id {
            Some(id) => res.push((id, p)),
            None => debug!("numbered_entries: skipping {:?}", p),
        }
    }
    res.sort();
    Ok(res)
}
