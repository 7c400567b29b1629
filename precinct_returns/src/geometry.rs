//! The temporal store of precinct boundaries.
//!
//! Boundaries are imported by vintage: all the precincts valid over one
//! interval of years. Importing a vintage replaces every version starting the
//! same year. For a given precinct, the intervals of its versions never
//! overlap, and at most one of them is open-ended.

use log::{info, warn};
use rusqlite::{params, Connection, Row, Transaction};
use snafu::prelude::*;

use crate::error::*;
use crate::identity::SENTINEL_IDS;
use crate::model::*;
use crate::sequence::SequenceAllocator;

pub const GEOMETRY_TABLE: &str = "precinct_geometries";

const MAX_SAMPLES: usize = 5;
// Stands for an open-ended interval in the overlap query.
const OPEN_END: i32 = i32::MAX;

pub fn ensure_schema(conn: &Connection, alloc: &SequenceAllocator) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            precinct_geometry_id INTEGER PRIMARY KEY,
            precinct_id VARCHAR NOT NULL,
            valid_from_year INTEGER NOT NULL,
            valid_to_year INTEGER,
            geometry TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_precinct_id ON {t}(precinct_id);
        CREATE INDEX IF NOT EXISTS idx_year_range ON {t}(valid_from_year, valid_to_year);",
        t = GEOMETRY_TABLE
    ))
    .context(DatabaseSnafu {
        operation: "creating the geometry table",
    })?;
    alloc.ensure(conn)
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct VintageReport {
    /// Versions of the same vintage that were deleted first.
    pub replaced: usize,
    pub inserted: usize,
    pub first_id: Option<i64>,
    /// Sentinel identifiers found in the store after the import, with their
    /// starting year. Reported, never repaired.
    pub sentinel_rows: Vec<(String, i32)>,
}

fn insert_versions_in(
    tx: &Transaction,
    start: i64,
    valid_from_year: i32,
    valid_to_year: Option<i32>,
    shapes: &[BoundaryShape],
) -> StoreResult<usize> {
    let mut stmt = tx
        .prepare_cached(&format!(
            "INSERT INTO {} (precinct_geometry_id, precinct_id, valid_from_year, valid_to_year, geometry)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            GEOMETRY_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing the geometry insert",
        })?;
    for (offset, shape) in shapes.iter().enumerate() {
        stmt.execute(params![
            start + offset as i64,
            shape.precinct_id,
            valid_from_year,
            valid_to_year,
            shape.payload,
        ])
        .context(DatabaseSnafu {
            operation: format!("inserting the boundary of {}", shape.precinct_id),
        })?;
    }
    Ok(shapes.len())
}

fn check_vintage(
    valid_from_year: i32,
    valid_to_year: Option<i32>,
    shapes: &[BoundaryShape],
) -> StoreResult<()> {
    if let Some(to) = valid_to_year {
        ensure!(
            to >= valid_from_year,
            InvalidIntervalSnafu {
                from: valid_from_year,
                to
            }
        );
    }
    for shape in shapes {
        ensure!(
            !shape.payload.trim().is_empty(),
            EmptyPayloadSnafu {
                precinct_id: shape.precinct_id.clone()
            }
        );
    }
    Ok(())
}

/// Replaces the vintage starting at `valid_from_year` with the given shapes.
///
/// The delete, the id reservation and the insert happen in one transaction,
/// which is rolled back if the result would hold overlapping intervals.
/// Identifiers must have gone through [`crate::identity::resolve`].
pub fn replace_version(
    conn: &mut Connection,
    alloc: &SequenceAllocator,
    valid_from_year: i32,
    valid_to_year: Option<i32>,
    shapes: &[BoundaryShape],
) -> StoreResult<VintageReport> {
    check_vintage(valid_from_year, valid_to_year, shapes)?;
    let tx = conn.transaction().context(DatabaseSnafu {
        operation: "starting a vintage import",
    })?;

    let replaced = tx
        .execute(
            &format!("DELETE FROM {} WHERE valid_from_year = ?1", GEOMETRY_TABLE),
            params![valid_from_year],
        )
        .context(DatabaseSnafu {
            operation: format!("deleting the {} vintage", valid_from_year),
        })?;
    if replaced > 0 {
        info!(
            "replace_version: deleted {} existing records for year {}",
            replaced, valid_from_year
        );
    }

    let start = alloc.reserve_in(&tx, shapes.len() as u64)?;
    let inserted = insert_versions_in(&tx, start, valid_from_year, valid_to_year, shapes)?;

    let (count, samples) = find_overlaps(&tx)?;
    if count > 0 {
        warn!(
            "replace_version: {} overlapping intervals, rolling back the {} vintage: {:?}",
            count, valid_from_year, samples
        );
        return OverlappingIntervalsSnafu { count, samples }.fail();
    }

    let sentinel_rows = sentinel_scan(&tx)?;
    for (pid, year) in sentinel_rows.iter() {
        warn!(
            "replace_version: precinct {:?} exists for year {} in the store",
            pid, year
        );
    }

    tx.commit().context(DatabaseSnafu {
        operation: "committing a vintage import",
    })?;
    info!(
        "replace_version: imported {} precincts for [{}, {:?}]",
        inserted, valid_from_year, valid_to_year
    );
    Ok(VintageReport {
        replaced,
        inserted,
        first_id: if inserted > 0 { Some(start) } else { None },
        sentinel_rows,
    })
}

fn read_version(row: &Row) -> rusqlite::Result<BoundaryVersion> {
    Ok(BoundaryVersion {
        surrogate_id: row.get(0)?,
        precinct_id: row.get(1)?,
        valid_from_year: row.get(2)?,
        valid_to_year: row.get(3)?,
        shape_payload: row.get(4)?,
    })
}

const VERSION_COLUMNS: &str =
    "precinct_geometry_id, precinct_id, valid_from_year, valid_to_year, geometry";

/// The version of a precinct valid in the given year.
///
/// More than one match means that the store is inconsistent, and is an error.
pub fn version_active_at(
    conn: &Connection,
    precinct_id: &str,
    year: i32,
) -> StoreResult<Option<BoundaryVersion>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM {} WHERE precinct_id = ?1 AND valid_from_year <= ?2
             AND (valid_to_year IS NULL OR ?2 <= valid_to_year)",
            VERSION_COLUMNS, GEOMETRY_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing a version lookup",
        })?;
    let mut versions: Vec<BoundaryVersion> = stmt
        .query_map(params![precinct_id, year], read_version)
        .context(DatabaseSnafu {
            operation: "looking up a version",
        })?
        .collect::<rusqlite::Result<Vec<BoundaryVersion>>>()
        .context(DatabaseSnafu {
            operation: "reading a version",
        })?;
    ensure!(
        versions.len() <= 1,
        ConflictingVersionsSnafu {
            precinct_id,
            year,
            count: versions.len(),
        }
    );
    Ok(versions.pop())
}

/// All the versions of a precinct, oldest first.
pub fn versions_of(conn: &Connection, precinct_id: &str) -> StoreResult<Vec<BoundaryVersion>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM {} WHERE precinct_id = ?1 ORDER BY valid_from_year, precinct_geometry_id",
            VERSION_COLUMNS, GEOMETRY_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing a version listing",
        })?;
    let res = stmt
        .query_map(params![precinct_id], read_version)
        .context(DatabaseSnafu {
            operation: "listing versions",
        })?
        .collect::<rusqlite::Result<Vec<BoundaryVersion>>>()
        .context(DatabaseSnafu {
            operation: "reading versions",
        })?;
    Ok(res)
}

/// Counts the pairs of versions of a same precinct whose intervals overlap,
/// with a few of them described.
pub fn find_overlaps(conn: &Connection) -> StoreResult<(usize, Vec<String>)> {
    let join = format!(
        "FROM {t} a JOIN {t} b
           ON a.precinct_id = b.precinct_id
          AND a.precinct_geometry_id < b.precinct_geometry_id
          AND a.valid_from_year <= COALESCE(b.valid_to_year, {open})
          AND b.valid_from_year <= COALESCE(a.valid_to_year, {open})",
        t = GEOMETRY_TABLE,
        open = OPEN_END
    );
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) {}", join), [], |row| row.get(0))
        .context(DatabaseSnafu {
            operation: "counting overlapping intervals",
        })?;
    if count == 0 {
        return Ok((0, Vec::new()));
    }
    let mut stmt = conn
        .prepare(&format!(
            "SELECT a.precinct_id, a.valid_from_year, a.valid_to_year, b.valid_from_year, b.valid_to_year {} LIMIT {}",
            join, MAX_SAMPLES
        ))
        .context(DatabaseSnafu {
            operation: "preparing the overlap samples",
        })?;
    let samples = stmt
        .query_map([], |row| {
            let pid: String = row.get(0)?;
            let a: (i32, Option<i32>) = (row.get(1)?, row.get(2)?);
            let b: (i32, Option<i32>) = (row.get(3)?, row.get(4)?);
            Ok(format!(
                "{}: {} overlaps {}",
                pid,
                format_interval(a),
                format_interval(b)
            ))
        })
        .context(DatabaseSnafu {
            operation: "sampling overlaps",
        })?
        .collect::<rusqlite::Result<Vec<String>>>()
        .context(DatabaseSnafu {
            operation: "reading overlap samples",
        })?;
    Ok((count as usize, samples))
}

fn format_interval((from, to): (i32, Option<i32>)) -> String {
    match to {
        Some(to) => format!("[{}, {}]", from, to),
        None => format!("[{}, present]", from),
    }
}

/// Rows whose identifier is a sentinel. Such rows should never reach the store.
pub fn sentinel_scan(conn: &Connection) -> StoreResult<Vec<(String, i32)>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT precinct_id, valid_from_year FROM {} WHERE precinct_id IN (?1, ?2)
             ORDER BY valid_from_year",
            GEOMETRY_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing the sentinel scan",
        })?;
    let res = stmt
        .query_map(params![SENTINEL_IDS[0], SENTINEL_IDS[1]], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context(DatabaseSnafu {
            operation: "scanning for sentinels",
        })?
        .collect::<rusqlite::Result<Vec<(String, i32)>>>()
        .context(DatabaseSnafu {
            operation: "reading sentinel rows",
        })?;
    Ok(res)
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VintageCount {
    pub valid_from_year: i32,
    pub valid_to_year: Option<i32>,
    pub precincts: i64,
}

/// The number of stored precincts per vintage.
pub fn vintage_counts(conn: &Connection) -> StoreResult<Vec<VintageCount>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT valid_from_year, valid_to_year, COUNT(*) FROM {}
             GROUP BY valid_from_year, valid_to_year ORDER BY valid_from_year",
            GEOMETRY_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing the vintage counts",
        })?;
    let res = stmt
        .query_map([], |row| {
            Ok(VintageCount {
                valid_from_year: row.get(0)?,
                valid_to_year: row.get(1)?,
                precincts: row.get(2)?,
            })
        })
        .context(DatabaseSnafu {
            operation: "counting vintages",
        })?
        .collect::<rusqlite::Result<Vec<VintageCount>>>()
        .context(DatabaseSnafu {
            operation: "reading vintage counts",
        })?;
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(pid: &str, payload: &str) -> BoundaryShape {
        BoundaryShape {
            precinct_id: pid.to_string(),
            payload: payload.to_string(),
        }
    }

    fn setup() -> (Connection, SequenceAllocator) {
        let conn = Connection::open_in_memory().unwrap();
        let alloc = SequenceAllocator::for_geometries();
        ensure_schema(&conn, &alloc).unwrap();
        (conn, alloc)
    }

    fn contents(conn: &Connection) -> Vec<(String, i32, Option<i32>, String)> {
        let mut stmt = conn
            .prepare(
                "SELECT precinct_id, valid_from_year, valid_to_year, geometry
                 FROM precinct_geometries ORDER BY precinct_id, valid_from_year",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn active_version_by_year() {
        let (mut conn, alloc) = setup();
        replace_version(&mut conn, &alloc, 2010, Some(2013), &[shape("01001", "old")]).unwrap();
        replace_version(&mut conn, &alloc, 2014, None, &[shape("01001", "new")]).unwrap();
        let v = version_active_at(&conn, "01001", 2012).unwrap().unwrap();
        assert_eq!(v.shape_payload, "old");
        assert_eq!(v.valid_to_year, Some(2013));
        let v = version_active_at(&conn, "01001", 2020).unwrap().unwrap();
        assert_eq!(v.shape_payload, "new");
        assert!(v.contains_year(2020));
        assert_eq!(version_active_at(&conn, "01001", 2009).unwrap(), None);
        assert_eq!(version_active_at(&conn, "99999", 2012).unwrap(), None);
        assert_eq!(versions_of(&conn, "01001").unwrap().len(), 2);
    }

    #[test]
    fn replace_is_idempotent() {
        let (mut conn, alloc) = setup();
        let shapes = vec![shape("01001", "a"), shape("01002", "b")];
        let first = replace_version(&mut conn, &alloc, 2022, None, &shapes).unwrap();
        assert_eq!(first.replaced, 0);
        assert_eq!(first.first_id, Some(1));
        let before = contents(&conn);
        let second = replace_version(&mut conn, &alloc, 2022, None, &shapes).unwrap();
        assert_eq!(second.replaced, 2);
        assert_eq!(second.inserted, 2);
        // Fresh ids, same content.
        assert_eq!(second.first_id, Some(3));
        assert_eq!(contents(&conn), before);
    }

    #[test]
    fn overlapping_import_is_rolled_back() {
        let (mut conn, alloc) = setup();
        replace_version(&mut conn, &alloc, 2014, Some(2021), &[shape("01001", "a")]).unwrap();
        let err = replace_version(&mut conn, &alloc, 2020, None, &[shape("01001", "b")]).unwrap_err();
        assert!(matches!(err, StoreError::OverlappingIntervals { count: 1, .. }));
        assert_eq!(contents(&conn).len(), 1);
        // The failed import did not consume ids.
        assert_eq!(alloc.current(&conn).unwrap(), 2);
    }

    #[test]
    fn two_open_versions_overlap() {
        let (mut conn, alloc) = setup();
        replace_version(&mut conn, &alloc, 2014, None, &[shape("01001", "a")]).unwrap();
        assert!(replace_version(&mut conn, &alloc, 2022, None, &[shape("01001", "b")]).is_err());
    }

    // Stores versions without the interval checks of replace_version.
    fn append_versions(
        conn: &mut Connection,
        alloc: &SequenceAllocator,
        valid_from_year: i32,
        valid_to_year: Option<i32>,
        shapes: &[BoundaryShape],
    ) -> StoreResult<i64> {
        check_vintage(valid_from_year, valid_to_year, shapes)?;
        let tx = conn.transaction().context(DatabaseSnafu {
            operation: "starting a raw append",
        })?;
        let start = alloc.reserve_in(&tx, shapes.len() as u64)?;
        insert_versions_in(&tx, start, valid_from_year, valid_to_year, shapes)?;
        tx.commit().context(DatabaseSnafu {
            operation: "committing a raw append",
        })?;
        Ok(start)
    }

    #[test]
    fn conflicting_versions_are_reported() {
        let (mut conn, alloc) = setup();
        append_versions(&mut conn, &alloc, 2010, Some(2015), &[shape("01001", "a")]).unwrap();
        append_versions(&mut conn, &alloc, 2014, None, &[shape("01001", "b")]).unwrap();
        assert_eq!(find_overlaps(&conn).unwrap().0, 1);
        assert_eq!(
            version_active_at(&conn, "01001", 2012).unwrap().unwrap().shape_payload,
            "a"
        );
        let err = version_active_at(&conn, "01001", 2014).unwrap_err();
        assert!(matches!(err, StoreError::ConflictingVersions { count: 2, .. }));
    }

    #[test]
    fn sentinels_are_reported_not_fixed() {
        let (mut conn, alloc) = setup();
        let report =
            replace_version(&mut conn, &alloc, 2010, Some(2013), &[shape("00000", "a")]).unwrap();
        assert_eq!(report.sentinel_rows, vec![("00000".to_string(), 2010)]);
        assert_eq!(contents(&conn).len(), 1);
    }

    #[test]
    fn invalid_vintages() {
        let (mut conn, alloc) = setup();
        assert!(matches!(
            replace_version(&mut conn, &alloc, 2014, Some(2010), &[shape("01001", "a")]),
            Err(StoreError::InvalidInterval { .. })
        ));
        assert!(matches!(
            replace_version(&mut conn, &alloc, 2014, None, &[shape("01001", " ")]),
            Err(StoreError::EmptyPayload { .. })
        ));
    }

    #[test]
    fn counts_by_vintage() {
        let (mut conn, alloc) = setup();
        replace_version(
            &mut conn,
            &alloc,
            2010,
            Some(2013),
            &[shape("01001", "a"), shape("01002", "b")],
        )
        .unwrap();
        replace_version(&mut conn, &alloc, 2014, None, &[shape("01001", "c")]).unwrap();
        assert_eq!(
            vintage_counts(&conn).unwrap(),
            vec![
                VintageCount {
                    valid_from_year: 2010,
                    valid_to_year: Some(2013),
                    precincts: 2
                },
                VintageCount {
                    valid_from_year: 2014,
                    valid_to_year: None,
                    precincts: 1
                },
            ]
        );
    }
}
