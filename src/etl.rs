use log::{debug, error, info, warn};

use precinct_returns::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{Args, Command};
use crate::etl::config_reader::*;
use crate::etl::io_geojson::{GeoTable, GEOMETRY_COLUMN};
use crate::etl::metadata::*;

pub mod config_reader;
pub mod io_common;
pub mod io_csv;
pub mod io_excel;
pub mod io_geojson;
pub mod metadata;
pub mod precinct_ids;

#[derive(Debug, Snafu)]
pub enum EtlError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile { source: std::io::Error, path: String },
    #[snafu(display("Error writing file {path}"))]
    WritingFile { source: std::io::Error, path: String },
    #[snafu(display("Error listing directory {path}"))]
    ListingDirectory { source: std::io::Error, path: String },
    #[snafu(display("Error reading CSV file {path}"))]
    ReadingCsv { source: csv::Error, path: String },
    #[snafu(display("Error writing CSV file {path}"))]
    WritingCsv { source: csv::Error, path: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Excel file {path} has no worksheet or no header"))]
    EmptyExcel { path: String },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing JSON"))]
    WritingJson { source: serde_json::Error },
    #[snafu(display("Unsupported file type: {path}"))]
    UnsupportedFile { path: String },
    #[snafu(display("File {path} has no data rows"))]
    EmptyFile { path: String },
    #[snafu(display("{path}: row {row} has {found} cells for {expected} columns"))]
    RaggedFile {
        path: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[snafu(display("Could not open database {path}"))]
    OpeningDatabase {
        source: rusqlite::Error,
        path: String,
    },
    #[snafu(display("{path}"))]
    Schema { source: SchemaError, path: String },
    #[snafu(display("{path}"))]
    Identity {
        source: IdentityError,
        path: String,
    },
    #[snafu(display("Store error"))]
    Store { source: StoreError },
    #[snafu(display("Could not start the worker pool"))]
    WorkerPool { source: rayon::ThreadPoolBuildError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type EtlResult<T> = Result<T, EtlError>;

/// Why a file or a directory could not be loaded.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Missing columns, no option columns, rows of the wrong length.
    Structural,
    /// No usable precinct identifier.
    Identity,
    /// Duplicates after repair, overlapping boundary intervals.
    Integrity,
    /// The store could not hand out ids or append the rows.
    Allocation,
    Io,
    Empty,
}

impl EtlError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EtlError::Schema { .. }
            | EtlError::RaggedFile { .. }
            | EtlError::UnsupportedFile { .. } => FailureKind::Structural,
            EtlError::Identity {
                source: IdentityError::DuplicateSurvivedRepair { .. },
                ..
            } => FailureKind::Integrity,
            EtlError::Identity { .. } => FailureKind::Identity,
            EtlError::Store {
                source:
                    StoreError::OverlappingIntervals { .. }
                    | StoreError::ConflictingVersions { .. }
                    | StoreError::InvalidInterval { .. }
                    | StoreError::EmptyPayload { .. },
            } => FailureKind::Integrity,
            EtlError::Store { .. } => FailureKind::Allocation,
            EtlError::EmptyFile { .. } | EtlError::EmptyExcel { .. } => FailureKind::Empty,
            _ => FailureKind::Io,
        }
    }
}

/// The message of an error followed by the messages of its sources.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut res = e.to_string();
    let mut current = e.source();
    while let Some(s) = current {
        res.push_str(": ");
        res.push_str(&s.to_string());
        current = s.source();
    }
    res
}

/// A file (or a whole directory when `file_id` is None) that was skipped.
#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct FileFailure {
    pub directory_id: i64,
    pub file_id: Option<i64>,
    pub kind: FailureKind,
    pub message: String,
}

fn check_rectangular(table: &Table, path: &str) -> EtlResult<()> {
    let expected = table.columns.len();
    if let Some((row, r)) = table
        .rows
        .iter()
        .enumerate()
        .find(|(_, r)| r.len() != expected)
    {
        return RaggedFileSnafu {
            path,
            row,
            expected,
            found: r.len(),
        }
        .fail();
    }
    Ok(())
}

fn reshape_file(path: &Path, ctx: &ElectionContext) -> EtlResult<Vec<ResultRecord>> {
    let path_s = path.display().to_string();
    let table = io_common::read_table(path)?;
    ensure!(!table.is_empty(), EmptyFileSnafu { path: &path_s });
    check_rectangular(&table, &path_s)?;

    let resolved = identity::resolve(table).context(IdentitySnafu { path: &path_s })?;
    let schema = schema::classify_resolved(&resolved.table.columns, &resolved.source)
        .context(SchemaSnafu { path: &path_s })?;
    debug!(
        "reshape_file: {}: {:?} schema, identifiers from {:?}",
        path_s,
        schema.kind(),
        resolved.source
    );
    reshape::reshape(&resolved.table, &schema, ctx).context(SchemaSnafu { path: &path_s })
}

/// Reads, resolves, classifies and reshapes one result file.
pub fn process_file(path: &Path, ctx: &ElectionContext) -> Result<Vec<ResultRecord>, FileFailure> {
    reshape_file(path, ctx).map_err(|e| FileFailure {
        directory_id: ctx.election_id,
        file_id: Some(ctx.contest_id),
        kind: e.kind(),
        message: error_chain(&e),
    })
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct DirectoryResult {
    pub directory_id: i64,
    /// The records of all the successful files, in file id order.
    pub records: Vec<ResultRecord>,
    pub files_succeeded: usize,
    pub failures: Vec<FileFailure>,
}

/// Processes all the result files of one election directory.
///
/// Returns None when the directory is not described in the metadata or cannot
/// be listed. Failing files are skipped and reported in the result.
pub fn process_directory(
    directory_id: i64,
    path: &Path,
    metadata: &Metadata,
) -> Option<DirectoryResult> {
    let dm = match metadata.get(&directory_id) {
        Some(dm) => dm,
        None => {
            warn!(
                "process_directory: directory {} is not in the metadata, skipping",
                directory_id
            );
            return None;
        }
    };
    let files = match io_common::numbered_entries(path, io_common::is_result_file) {
        Ok(files) => files,
        Err(e) => {
            error!(
                "process_directory: directory {}: {}",
                directory_id,
                error_chain(&e)
            );
            return None;
        }
    };

    let mut res = DirectoryResult {
        directory_id,
        ..DirectoryResult::default()
    };
    for (file_id, file_path) in files {
        let ctx = dm.context(directory_id, file_id);
        match process_file(&file_path, &ctx) {
            Ok(mut records) => {
                debug!(
                    "process_directory: directory {} file {}: {} records",
                    directory_id,
                    file_id,
                    records.len()
                );
                res.files_succeeded += 1;
                res.records.append(&mut records);
            }
            Err(failure) => {
                warn!(
                    "process_directory: directory {} file {}: skipped ({:?}): {}",
                    directory_id, file_id, failure.kind, failure.message
                );
                res.failures.push(failure);
            }
        }
    }
    info!(
        "process_directory: directory {} ({}): {} records from {} files, {} files skipped",
        directory_id,
        dm.label.as_deref().unwrap_or("no label"),
        res.records.len(),
        res.files_succeeded,
        res.failures.len()
    );
    Some(res)
}

const MAX_FAILURE_SAMPLES: usize = 20;

#[derive(PartialEq, Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub directories_succeeded: usize,
    pub directories_failed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub records_appended: usize,
    pub next_result_id: i64,
    pub failures: Vec<FileFailure>,
}

impl RunSummary {
    fn add_failures(&mut self, failures: Vec<FileFailure>) {
        let room = MAX_FAILURE_SAMPLES.saturating_sub(self.failures.len());
        self.failures.extend(failures.into_iter().take(room));
    }
}

pub fn open_database(path: &Path) -> EtlResult<Connection> {
    let path_s = path.display().to_string();
    let conn = Connection::open(path).context(OpeningDatabaseSnafu { path: &path_s })?;
    debug!("open_database: {}", path_s);
    Ok(conn)
}

/// Appends the directory results in directory order. A directory that fails
/// to append is reported and the next one is attempted.
///
/// With `replace_existing`, the rows already stored for an election are
/// deleted before its records are appended.
pub fn append_directories(
    conn: &mut Connection,
    alloc: &SequenceAllocator,
    outcomes: Vec<(i64, Option<DirectoryResult>)>,
    batch_size: usize,
    replace_existing: bool,
) -> EtlResult<RunSummary> {
    let mut summary = RunSummary::default();
    for (directory_id, outcome) in outcomes {
        let dr = match outcome {
            Some(dr) => dr,
            None => {
                summary.directories_failed += 1;
                continue;
            }
        };
        summary.files_succeeded += dr.files_succeeded;
        summary.files_failed += dr.failures.len();
        summary.add_failures(dr.failures);
        if dr.records.is_empty() {
            warn!(
                "append_directories: directory {} produced no records",
                directory_id
            );
            summary.directories_failed += 1;
            continue;
        }
        let replaced = if replace_existing {
            results::delete_election(conn, directory_id)
        } else {
            Ok(0)
        };
        let appended = replaced
            .and_then(|_| results::append_in_chunks(conn, alloc, &dr.records, batch_size));
        match appended {
            Ok(report) => {
                debug!(
                    "append_directories: directory {}: {} records in {} chunks, next id {}",
                    directory_id, report.appended, report.chunks, report.next_id
                );
                summary.directories_succeeded += 1;
                summary.records_appended += report.appended;
            }
            Err(source) => {
                let e = EtlError::Store { source };
                error!(
                    "append_directories: directory {}: {}",
                    directory_id,
                    error_chain(&e)
                );
                summary.directories_failed += 1;
                summary.add_failures(vec![FileFailure {
                    directory_id,
                    file_id: None,
                    kind: e.kind(),
                    message: error_chain(&e),
                }]);
            }
        }
    }
    summary.next_result_id = alloc.current(conn).context(StoreSnafu)?;
    Ok(summary)
}

/// Imports all the election directories under the base directory.
///
/// The directories are processed in parallel. Only this thread touches the
/// database, after all the workers are done.
pub fn run_results_import(settings: &RunSettings) -> EtlResult<RunSummary> {
    let metadata = load_metadata(&settings.metadata_path)?;
    let directories = io_common::numbered_entries(&settings.base_dir, |p| p.is_dir())?;
    info!(
        "run_results_import: {} directories under {:?}, {} workers",
        directories.len(),
        settings.base_dir,
        settings.workers
    );

    let mut conn = open_database(&settings.db_path)?;
    let alloc = SequenceAllocator::for_results();
    results::ensure_schema(&conn, &alloc).context(StoreSnafu)?;
    if settings.fresh {
        alloc.reset(&mut conn).context(StoreSnafu)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.workers)
        .build()
        .context(WorkerPoolSnafu)?;
    let outcomes: Vec<(i64, Option<DirectoryResult>)> = pool.install(|| {
        directories
            .par_iter()
            .map(|(directory_id, path)| {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    process_directory(*directory_id, path, &metadata)
                }))
                .unwrap_or_else(|_| {
                    error!(
                        "run_results_import: worker failed on directory {}",
                        directory_id
                    );
                    None
                });
                (*directory_id, outcome)
            })
            .collect()
    });

    let summary = append_directories(
        &mut conn,
        &alloc,
        outcomes,
        settings.batch_size,
        !settings.fresh,
    )?;
    results::create_views(&conn).context(StoreSnafu)?;
    info!(
        "run_results_import: {} records appended, {} directories loaded, {} failed",
        summary.records_appended, summary.directories_succeeded, summary.directories_failed
    );
    Ok(summary)
}

#[derive(PartialEq, Debug, Clone)]
pub struct BoundaryImport {
    /// Features in the file, including the dropped ones.
    pub features: usize,
    pub dropped_geometries: usize,
    pub repair: identity::RepairReport,
    pub vintage: geometry::VintageReport,
}

fn boundary_shapes(gt: GeoTable, path: &str) -> EtlResult<(Vec<BoundaryShape>, identity::RepairReport)> {
    let resolved = identity::resolve(gt.table).context(IdentitySnafu { path })?;
    let table = resolved.table;
    let id_idx = table
        .column_index(schema::PRECINCT_ID)
        .whatever_context("Resolved table without a precinct_id column")?;
    let geometry_idx = table
        .column_index(GEOMETRY_COLUMN)
        .whatever_context("Boundary table without a geometry column")?;
    let shapes = (0..table.len())
        .map(|r| BoundaryShape {
            precinct_id: table.cell(r, id_idx).as_text().unwrap_or_default(),
            payload: table.cell(r, geometry_idx).as_text().unwrap_or_default(),
        })
        .collect();
    Ok((shapes, resolved.report))
}

/// Imports one boundary file as the vintage valid from `valid_from_year` to
/// `valid_to_year` (open-ended if None), replacing the vintage starting the
/// same year.
pub fn import_boundary_vintage(
    conn: &mut Connection,
    path: &Path,
    valid_from_year: i32,
    valid_to_year: Option<i32>,
) -> EtlResult<BoundaryImport> {
    let path_s = path.display().to_string();
    info!(
        "import_boundary_vintage: {} for [{}, {:?}]",
        path_s, valid_from_year, valid_to_year
    );
    let gt = io_geojson::read_geojson_table(path)?;
    let features = gt.table.len() + gt.dropped;
    let dropped_geometries = gt.dropped;
    ensure!(!gt.table.is_empty(), EmptyFileSnafu { path: &path_s });

    let (shapes, repair) = boundary_shapes(gt, &path_s)?;
    let alloc = SequenceAllocator::for_geometries();
    geometry::ensure_schema(conn, &alloc).context(StoreSnafu)?;
    let vintage = geometry::replace_version(conn, &alloc, valid_from_year, valid_to_year, &shapes)
        .context(StoreSnafu)?;
    if !vintage.sentinel_rows.is_empty() {
        error!(
            "import_boundary_vintage: {} sentinel precinct ids in the store, e.g. {:?}",
            vintage.sentinel_rows.len(),
            vintage.sentinel_rows.iter().take(5).collect::<Vec<_>>()
        );
    }
    Ok(BoundaryImport {
        features,
        dropped_geometries,
        repair,
        vintage,
    })
}

fn boundary_import_js(v: &ResolvedVintage, bi: &BoundaryImport) -> JSValue {
    json!({
        "file": v.path.display().to_string(),
        "valid_from_year": v.valid_from_year,
        "valid_to_year": v.valid_to_year,
        "features": bi.features,
        "dropped_geometries": bi.dropped_geometries,
        "generated_ids": bi.repair.empty_replaced,
        "renamed_zero_ids": bi.repair.sentinel_replaced,
        "dropped_duplicates": bi.repair.duplicates_dropped,
        "replaced": bi.vintage.replaced,
        "inserted": bi.vintage.inserted,
    })
}

/// Imports the vintages in order. A failing vintage is reported and the
/// following ones are still attempted.
pub fn run_boundary_imports(db_path: &Path, vintages: &[ResolvedVintage]) -> EtlResult<JSValue> {
    let mut conn = open_database(db_path)?;
    let mut imported: Vec<JSValue> = Vec::new();
    let mut failed = 0;
    for v in vintages.iter() {
        match import_boundary_vintage(&mut conn, &v.path, v.valid_from_year, v.valid_to_year) {
            Ok(bi) => imported.push(boundary_import_js(v, &bi)),
            Err(e) => {
                error!(
                    "run_boundary_imports: {:?} ({:?}): {}",
                    v.path,
                    e.kind(),
                    error_chain(&e)
                );
                failed += 1;
            }
        }
    }
    let js = json!({ "vintages": imported, "failed": failed });
    if failed > 0 {
        write_json(None, &js)?;
        whatever!("{} of {} boundary vintages failed to import", failed, vintages.len())
    }
    Ok(js)
}

/// Reports the identifier problems of a boundary file, without importing it.
pub fn check_boundaries(path: &Path) -> EtlResult<identity::IdentityAudit> {
    let path_s = path.display().to_string();
    let gt = io_geojson::read_geojson_table(path)?;
    let audit = identity::audit(&gt.table).context(IdentitySnafu { path: &path_s })?;
    if audit.is_clean() {
        info!("check_boundaries: {}: no problem found", path_s);
    } else {
        warn!(
            "check_boundaries: {}: {} empty ids, {} zero ids, {} duplicated ids",
            path_s,
            audit.empty,
            audit.sentinel,
            audit.duplicates.len()
        );
    }
    Ok(audit)
}

fn audit_js(path: &str, audit: &identity::IdentityAudit) -> JSValue {
    let source = match &audit.source {
        identity::IdSource::Direct(c) => json!({ "column": c }),
        identity::IdSource::WardPrecinct { ward, precinct } => {
            json!({ "ward": ward, "precinct": precinct })
        }
    };
    let duplicates: Vec<JSValue> = audit
        .duplicates
        .iter()
        .map(|(id, count)| json!({ "precinct_id": id, "count": count }))
        .collect();
    json!({
        "file": path,
        "source": source,
        "rows": audit.rows,
        "empty": audit.empty,
        "zero": audit.sentinel,
        "duplicates": duplicates,
    })
}

/// Restarts both id sequences and deletes the rows using them.
pub fn reset_all(db_path: &Path) -> EtlResult<()> {
    let mut conn = open_database(db_path)?;
    for (alloc, is_results) in [
        (SequenceAllocator::for_results(), true),
        (SequenceAllocator::for_geometries(), false),
    ] {
        if is_results {
            results::ensure_schema(&conn, &alloc).context(StoreSnafu)?;
        } else {
            geometry::ensure_schema(&conn, &alloc).context(StoreSnafu)?;
        }
        let purged = alloc.reset(&mut conn).context(StoreSnafu)?;
        info!(
            "reset_all: sequence {} restarted, {} rows deleted",
            alloc.namespace(),
            purged
        );
    }
    Ok(())
}

/// The statistics of the database, as JSON.
pub fn database_summary(conn: &Connection) -> EtlResult<JSValue> {
    let results_alloc = SequenceAllocator::for_results();
    let geometry_alloc = SequenceAllocator::for_geometries();
    results::ensure_schema(conn, &results_alloc).context(StoreSnafu)?;
    geometry::ensure_schema(conn, &geometry_alloc).context(StoreSnafu)?;

    let stats = results::load_stats(conn, &results_alloc).context(StoreSnafu)?;
    let vintages: Vec<JSValue> = geometry::vintage_counts(conn)
        .context(StoreSnafu)?
        .iter()
        .map(|vc| {
            json!({
                "valid_from_year": vc.valid_from_year,
                "valid_to_year": vc.valid_to_year,
                "precincts": vc.precincts,
            })
        })
        .collect();
    Ok(json!({
        "results": {
            "elections": stats.elections,
            "contests": stats.contests,
            "records": stats.results,
            "next_result_id": stats.next_result_id,
        },
        "boundaries": {
            "vintages": vintages,
            "next_geometry_id": geometry_alloc.current(conn).context(StoreSnafu)?,
        },
    }))
}

fn read_summary(path: &str) -> EtlResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_summary: {:?}", js);
    Ok(js)
}

/// Compares a summary with the reference summary stored at `reference_path`.
/// The differences are printed as a line diff.
pub fn check_reference(pretty_js: &str, reference_path: &str) -> EtlResult<()> {
    let summary_ref = read_summary(reference_path)?;
    let pretty_js_ref = serde_json::to_string_pretty(&summary_ref).context(WritingJsonSnafu)?;
    if pretty_js_ref != pretty_js {
        warn!("Found differences with the reference summary");
        print_diff(pretty_js_ref.as_str(), pretty_js, "\n");
        whatever!("Difference detected between the database summary and the reference summary")
    }
    info!("check_reference: the summary matches {}", reference_path);
    Ok(())
}

/// Writes pretty JSON to a file, or to the standard output if `out` is None
/// or `stdout`. Returns the written text.
pub fn write_json(out: Option<&str>, js: &JSValue) -> EtlResult<String> {
    let pretty = serde_json::to_string_pretty(js).context(WritingJsonSnafu)?;
    match out {
        None | Some("") | Some("stdout") => println!("{}", pretty),
        Some(p) => {
            fs::write(p, &pretty).context(WritingFileSnafu { path: p })?;
            info!("write_json: written to {}", p);
        }
    }
    Ok(pretty)
}

pub fn run(args: &Args) -> EtlResult<()> {
    let settings = load_settings(args)?;
    match &args.command {
        Command::ImportResults { out, .. } => {
            let summary = run_results_import(&settings)?;
            let js = serde_json::to_value(&summary).context(WritingJsonSnafu)?;
            write_json(out.as_deref(), &js)?;
        }
        Command::ImportBoundaries { file, from, to } => {
            let vintages = match (file, from) {
                (Some(f), Some(from)) => vec![ResolvedVintage {
                    path: PathBuf::from(f),
                    valid_from_year: *from,
                    valid_to_year: *to,
                }],
                _ => settings.vintages.clone(),
            };
            ensure_whatever!(
                !vintages.is_empty(),
                "No boundary file given and no boundaryVintages in the configuration"
            );
            let js = run_boundary_imports(&settings.db_path, &vintages)?;
            write_json(None, &js)?;
        }
        Command::CheckBoundaries { file } => {
            let audit = check_boundaries(Path::new(file))?;
            write_json(None, &audit_js(file, &audit))?;
        }
        Command::AddPrecinctIds { .. } => {
            precinct_ids::add_precinct_ids(&settings.base_dir)?;
        }
        Command::DeleteElection { election_id } => {
            let mut conn = open_database(&settings.db_path)?;
            results::ensure_schema(&conn, &SequenceAllocator::for_results())
                .context(StoreSnafu)?;
            results::delete_election(&mut conn, *election_id).context(StoreSnafu)?;
        }
        Command::Reset => {
            reset_all(&settings.db_path)?;
        }
        Command::Summary { out, reference } => {
            let conn = open_database(&settings.db_path)?;
            let js = database_summary(&conn)?;
            let pretty = write_json(out.as_deref(), &js)?;
            if let Some(reference_path) = reference {
                check_reference(&pretty, reference_path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"{
        "210": {"year": 2019, "date": "2/26/2019", "label": "2019 Municipal General",
                "races": {"1": "Registered voters", "9": "Mayor", "10": "Treasurer"}},
        "211": {"year": "2020", "date": "3/17/2020", "races": {"3": "Senator"}}
    }"#;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let p = dir.join(name);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&p, contents).unwrap();
        p
    }

    fn settings(root: &Path) -> RunSettings {
        EtlConfig {
            workers: Some(2),
            batch_size: Some(3),
            ..EtlConfig::default()
        }
        .resolve(root)
        .unwrap()
    }

    fn fixture(root: &Path) {
        write(root, "output/results-metadata.json", METADATA);
        write(
            root,
            "output/210/1.csv",
            "precinct_id,ward,precinct,registered,ballots,turnout\n01001,1,1,1000,400,40.0\n",
        );
        write(
            root,
            "output/210/9.csv",
            "precinct_id,ward,precinct,total,Smith,Jones,Smith Percent\n\
             01001,1,1,100,60,40,60.0\n01002,1,2,50,\"1,234\",,\n",
        );
        // No option column: skipped.
        write(root, "output/210/10.csv", "precinct_id,total\n01001,5\n");
        write(root, "output/210/notes.txt", "not a result file");
        write(root, "output/211/3.csv", "ward,precinct,Brown\n2,5,7\n");
        // Not in the metadata.
        write(root, "output/999/1.csv", "precinct_id,Smith\n01001,1\n");
    }

    #[test]
    fn process_file_options() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let md = load_metadata(&dir.path().join("output/results-metadata.json")).unwrap();
        let ctx = md[&210].context(210, 9);
        let records = process_file(&dir.path().join("output/210/9.csv"), &ctx).unwrap();
        assert_eq!(records.len(), 4);
        let smith: Vec<&ResultRecord> =
            records.iter().filter(|r| r.option_name == "Smith").collect();
        assert_eq!(smith[0].precinct_id, "01001");
        assert_eq!(smith[0].option_votes, 60);
        assert_eq!(smith[0].option_percent, Some(60.0));
        assert_eq!(smith[0].contest_name, Some("Mayor".to_string()));
        assert_eq!(smith[0].total_votes, Some(100));
        // First run of digits.
        assert_eq!(smith[1].option_votes, 1);
    }

    #[test]
    fn process_file_failures() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let ctx = ElectionContext {
            year: Some(2019),
            election_date: None,
            election_id: 210,
            contest_id: 10,
            contest_name: None,
        };
        let failure = process_file(&dir.path().join("output/210/10.csv"), &ctx).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Structural);
        assert_eq!(failure.directory_id, 210);
        assert_eq!(failure.file_id, Some(10));

        let p = write(dir.path(), "x/11.csv", "Smith,Jones\n1,2\n");
        let failure = process_file(&p, &ctx).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Identity);

        let p = write(dir.path(), "x/12.csv", "precinct_id,Smith\n");
        assert_eq!(process_file(&p, &ctx).unwrap_err().kind, FailureKind::Empty);

        let p = write(dir.path(), "x/13.csv", "precinct_id,Smith\n01001,1,2\n");
        assert_eq!(
            process_file(&p, &ctx).unwrap_err().kind,
            FailureKind::Structural
        );

        let failure = process_file(&dir.path().join("x/404.csv"), &ctx).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Io);
    }

    #[test]
    fn process_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let md = load_metadata(&dir.path().join("output/results-metadata.json")).unwrap();
        let dr = process_directory(210, &dir.path().join("output/210"), &md).unwrap();
        assert_eq!(dr.files_succeeded, 2);
        assert_eq!(dr.failures.len(), 1);
        assert_eq!(dr.failures[0].file_id, Some(10));
        // 2 turnout records, then 4 option records.
        assert_eq!(dr.records.len(), 6);
        assert_eq!(dr.records[0].option_name, "registered");
        assert_eq!(dr.records[0].contest_id, 1);
        assert_eq!(dr.records[2].contest_id, 9);

        assert!(process_directory(999, &dir.path().join("output/999"), &md).is_none());
    }

    #[test]
    fn import_results_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let s = settings(dir.path());
        let summary = run_results_import(&s).unwrap();
        assert_eq!(summary.directories_succeeded, 2);
        assert_eq!(summary.directories_failed, 1);
        assert_eq!(summary.files_succeeded, 3);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.records_appended, 7);
        assert_eq!(summary.next_result_id, 8);
        assert_eq!(summary.failures.len(), 1);

        let conn = open_database(&s.db_path).unwrap();
        let brown = results::contest_results(&conn, 211, 3).unwrap();
        assert_eq!(brown.len(), 1);
        assert_eq!(brown[0].precinct_id, "02005");
        assert_eq!(brown[0].year, Some(2020));
        assert_eq!(brown[0].result_id, Some(7));

        // A fresh run starts over.
        let summary = run_results_import(&s).unwrap();
        assert_eq!(summary.next_result_id, 8);
        let js = database_summary(&conn).unwrap();
        assert_eq!(js["results"]["records"], 7);
        assert_eq!(js["results"]["elections"], 2);
    }

    #[test]
    fn import_results_appending() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let mut s = settings(dir.path());
        run_results_import(&s).unwrap();
        s.fresh = false;
        let summary = run_results_import(&s).unwrap();
        assert_eq!(summary.records_appended, 7);
        // Ids keep growing but each election is stored once.
        assert_eq!(summary.next_result_id, 15);

        let conn = open_database(&s.db_path).unwrap();
        let js = database_summary(&conn).unwrap();
        assert_eq!(js["results"]["records"], 7);
        assert_eq!(js["results"]["elections"], 2);
        let mayor = results::contest_results(&conn, 210, 9).unwrap();
        assert_eq!(mayor.len(), 4);
        let smith_01001 = mayor
            .iter()
            .filter(|r| r.precinct_id == "01001" && r.option_name == "Smith")
            .count();
        assert_eq!(smith_01001, 1);
        assert!(mayor.iter().all(|r| r.result_id.unwrap() >= 8));
    }

    #[test]
    fn append_directories_counts_empty_directories_as_failed() {
        let mut conn = Connection::open_in_memory().unwrap();
        let alloc = SequenceAllocator::for_results();
        results::ensure_schema(&conn, &alloc).unwrap();
        let failures: Vec<FileFailure> = (0..30)
            .map(|i| FileFailure {
                directory_id: 1,
                file_id: Some(i),
                kind: FailureKind::Structural,
                message: "no option".to_string(),
            })
            .collect();
        let outcomes = vec![
            (
                1,
                Some(DirectoryResult {
                    directory_id: 1,
                    records: vec![],
                    files_succeeded: 0,
                    failures,
                }),
            ),
            (2, None),
        ];
        let summary = append_directories(&mut conn, &alloc, outcomes, 10, true).unwrap();
        assert_eq!(summary.directories_failed, 2);
        assert_eq!(summary.files_failed, 30);
        assert_eq!(summary.failures.len(), MAX_FAILURE_SAMPLES);
        assert_eq!(summary.next_result_id, 1);
    }

    const BOUNDARIES_2010: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"ward": 1, "precinct": 1}, "geometry": {"type": "Point", "coordinates": [0, 0]}},
        {"type": "Feature", "properties": {"ward": 1, "precinct": 2}, "geometry": {"type": "Point", "coordinates": [1, 0]}}
    ]}"#;

    const BOUNDARIES_2014: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"PRECINCT_ID": "1001"}, "geometry": {"type": "Point", "coordinates": [0, 1]}},
        {"type": "Feature", "properties": {"PRECINCT_ID": "00000"}, "geometry": {"type": "Point", "coordinates": [1, 1]}},
        {"type": "Feature", "properties": {"PRECINCT_ID": "01001"}, "geometry": {"type": "Point", "coordinates": [2, 1]}},
        {"type": "Feature", "properties": {"PRECINCT_ID": "01003"}, "geometry": null}
    ]}"#;

    #[test]
    fn boundary_vintages() {
        let dir = tempfile::tempdir().unwrap();
        let p2010 = write(dir.path(), "b/2010.geojson", BOUNDARIES_2010);
        let p2014 = write(dir.path(), "b/2014.geojson", BOUNDARIES_2014);
        let mut conn = Connection::open_in_memory().unwrap();

        let bi = import_boundary_vintage(&mut conn, &p2010, 2010, Some(2013)).unwrap();
        assert_eq!(bi.vintage.inserted, 2);
        assert_eq!(bi.features, 2);

        let bi = import_boundary_vintage(&mut conn, &p2014, 2014, None).unwrap();
        assert_eq!(bi.features, 4);
        assert_eq!(bi.dropped_geometries, 1);
        assert_eq!(bi.repair.sentinel_replaced, 1);
        assert_eq!(bi.repair.duplicates_dropped, 1);
        assert_eq!(bi.vintage.inserted, 2);
        assert!(bi.vintage.sentinel_rows.is_empty());

        let v = geometry::version_active_at(&conn, "01001", 2012)
            .unwrap()
            .unwrap();
        assert_eq!(v.valid_to_year, Some(2013));
        let v = geometry::version_active_at(&conn, "01001", 2020)
            .unwrap()
            .unwrap();
        assert_eq!(v.valid_from_year, 2014);
        assert!(v.shape_payload.contains("[0,1]"));

        // Importing the same vintage again replaces it.
        let bi = import_boundary_vintage(&mut conn, &p2014, 2014, None).unwrap();
        assert_eq!(bi.vintage.replaced, 2);
        let counts = geometry::vintage_counts(&conn).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[1].precincts, 2);

        // Overlaps with the 2014 vintage: rejected.
        let e = import_boundary_vintage(&mut conn, &p2010, 2012, Some(2016)).unwrap_err();
        assert_eq!(e.kind(), FailureKind::Integrity);
    }

    #[test]
    fn audit_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "b/2014.geojson", BOUNDARIES_2014);
        let audit = check_boundaries(&p).unwrap();
        assert_eq!(audit.rows, 3);
        assert_eq!(audit.sentinel, 1);
        assert_eq!(audit.duplicates, vec![("01001".to_string(), 2)]);
        let js = audit_js("2014.geojson", &audit);
        assert_eq!(js["source"]["column"], "PRECINCT_ID");
    }

    #[test]
    fn reset_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let p = write(dir.path(), "b/2010.geojson", BOUNDARIES_2010);
        let s = settings(dir.path());
        run_results_import(&s).unwrap();
        let js = run_boundary_imports(
            &s.db_path,
            &[ResolvedVintage {
                path: p,
                valid_from_year: 2010,
                valid_to_year: Some(2013),
            }],
        )
        .unwrap();
        assert_eq!(js["failed"], 0);

        reset_all(&s.db_path).unwrap();
        let conn = open_database(&s.db_path).unwrap();
        let js = database_summary(&conn).unwrap();
        assert_eq!(js["results"]["records"], 0);
        assert_eq!(js["results"]["next_result_id"], 1);
        assert_eq!(js["boundaries"]["next_geometry_id"], 1);
        assert_eq!(js["boundaries"]["vintages"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn reference_check() {
        let dir = tempfile::tempdir().unwrap();
        let js = json!({"results": {"records": 7}});
        let pretty = serde_json::to_string_pretty(&js).unwrap();
        let same = write(dir.path(), "same.json", r#"{"results": {"records": 7}}"#);
        let other = write(dir.path(), "other.json", r#"{"results": {"records": 8}}"#);
        assert!(check_reference(&pretty, same.to_str().unwrap()).is_ok());
        assert!(check_reference(&pretty, other.to_str().unwrap()).is_err());
    }

    #[test]
    fn failure_kinds() {
        let e = EtlError::Store {
            source: StoreError::MissingSequence {
                namespace: "result_id".to_string(),
            },
        };
        assert_eq!(e.kind(), FailureKind::Allocation);
        let e = EtlError::Identity {
            source: IdentityError::DuplicateSurvivedRepair {
                count: 1,
                samples: vec!["01001".to_string()],
            },
            path: "9.csv".to_string(),
        };
        assert_eq!(e.kind(), FailureKind::Integrity);
        assert!(error_chain(&e).starts_with("9.csv: "));
    }
}
