//! The long-form results store.

use log::{debug, info};
use rusqlite::{params, Connection};
use snafu::prelude::*;

use crate::error::*;
use crate::model::*;
use crate::sequence::{to_sql_int, SequenceAllocator};

pub const RESULTS_TABLE: &str = "election_results";

/// Creates the results table and its sequence.
pub fn ensure_schema(conn: &Connection, alloc: &SequenceAllocator) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            result_id INTEGER,
            year INTEGER,
            election_date VARCHAR,
            election_id INTEGER,
            contest_id INTEGER,
            contest_name VARCHAR,
            precinct_id VARCHAR,
            ward VARCHAR,
            precinct VARCHAR,
            total_votes INTEGER,
            option_name VARCHAR,
            option_votes INTEGER,
            option_percent DOUBLE
        );
        CREATE INDEX IF NOT EXISTS idx_results_election ON {}(election_id, contest_id);",
        RESULTS_TABLE, RESULTS_TABLE
    ))
    .context(DatabaseSnafu {
        operation: "creating the results table",
    })?;
    alloc.ensure(conn)
}

/// Appends a batch in one transaction, with ids from a freshly reserved block.
/// Returns the next free id.
pub fn append_batch(
    conn: &mut Connection,
    alloc: &SequenceAllocator,
    rows: &[ResultRecord],
) -> StoreResult<i64> {
    if rows.is_empty() {
        return alloc.current(conn);
    }
    let tx = conn.transaction().context(DatabaseSnafu {
        operation: "starting an append",
    })?;
    let start = alloc.reserve_in(&tx, rows.len() as u64)?;
    {
        let mut stmt = tx
            .prepare_cached(&format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                RESULTS_TABLE,
                ResultRecord::COLUMNS.join(", ")
            ))
            .context(DatabaseSnafu {
                operation: "preparing the results insert",
            })?;
        for (offset, r) in rows.iter().enumerate() {
            let total_votes = r.total_votes.map(to_sql_int).transpose()?;
            stmt.execute(params![
                start + offset as i64,
                r.year,
                r.election_date,
                r.election_id,
                r.contest_id,
                r.contest_name,
                r.precinct_id,
                r.ward,
                r.precinct,
                total_votes,
                r.option_name,
                to_sql_int(r.option_votes)?,
                r.option_percent,
            ])
            .context(DatabaseSnafu {
                operation: "inserting results",
            })?;
        }
    }
    tx.commit().context(DatabaseSnafu {
        operation: "committing an append",
    })?;
    let next = start + rows.len() as i64;
    info!("append_batch: saved {} rows, next id {}", rows.len(), next);
    Ok(next)
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct AppendReport {
    pub appended: usize,
    pub chunks: usize,
    pub next_id: i64,
}

/// Appends rows in chunks of at most `chunk_size`, one transaction per chunk.
///
/// On error, the chunks before the failing one stay committed and the
/// sequence reflects exactly those.
pub fn append_in_chunks(
    conn: &mut Connection,
    alloc: &SequenceAllocator,
    rows: &[ResultRecord],
    chunk_size: usize,
) -> StoreResult<AppendReport> {
    let mut report = AppendReport {
        next_id: alloc.current(conn)?,
        ..AppendReport::default()
    };
    for chunk in rows.chunks(chunk_size.max(1)) {
        report.next_id = append_batch(conn, alloc, chunk)?;
        report.appended += chunk.len();
        report.chunks += 1;
    }
    Ok(report)
}

/// Removes all the rows of one election, so that it can be reloaded.
pub fn delete_election(conn: &mut Connection, election_id: i64) -> StoreResult<usize> {
    let tx = conn.transaction().context(DatabaseSnafu {
        operation: "starting an election delete",
    })?;
    let n = tx
        .execute(
            &format!("DELETE FROM {} WHERE election_id = ?1", RESULTS_TABLE),
            params![election_id],
        )
        .context(DatabaseSnafu {
            operation: format!("deleting election {}", election_id),
        })?;
    tx.commit().context(DatabaseSnafu {
        operation: "committing an election delete",
    })?;
    info!("delete_election: removed {} rows of election {}", n, election_id);
    Ok(n)
}

/// Creates the summary views over the results table.
pub fn create_views(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "DROP VIEW IF EXISTS election_summary;
        CREATE VIEW election_summary AS
        SELECT year, election_date,
               COUNT(DISTINCT contest_id) AS contest_count,
               COUNT(DISTINCT precinct_id) AS precinct_count
        FROM {t}
        GROUP BY year, election_date
        ORDER BY year;

        DROP VIEW IF EXISTS contest_summary;
        CREATE VIEW contest_summary AS
        SELECT contest_id, contest_name, year, election_date,
               COUNT(DISTINCT precinct_id) AS precinct_count,
               SUM(total_votes) AS total_votes
        FROM {t}
        GROUP BY contest_id, contest_name, year, election_date
        ORDER BY year, contest_id;

        DROP VIEW IF EXISTS mapping_data;
        CREATE VIEW mapping_data AS
        SELECT year, contest_id, contest_name, precinct_id, ward, precinct, option_name,
               SUM(option_votes) AS total_option_votes,
               SUM(total_votes) AS precinct_total_votes
        FROM {t}
        GROUP BY year, contest_id, contest_name, precinct_id, ward, precinct, option_name
        ORDER BY year, contest_id, precinct_id, option_name;",
        t = RESULTS_TABLE
    ))
    .context(DatabaseSnafu {
        operation: "creating the views",
    })?;
    debug!("create_views: done");
    Ok(())
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct LoadStats {
    pub elections: i64,
    pub contests: i64,
    pub results: i64,
    pub next_result_id: i64,
}

pub fn load_stats(conn: &Connection, alloc: &SequenceAllocator) -> StoreResult<LoadStats> {
    let (elections, contests, results) = conn
        .query_row(
            &format!(
                "SELECT COUNT(DISTINCT election_id), COUNT(DISTINCT contest_id), COUNT(*) FROM {}",
                RESULTS_TABLE
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .context(DatabaseSnafu {
            operation: "computing load statistics",
        })?;
    Ok(LoadStats {
        elections,
        contests,
        results,
        next_result_id: alloc.current(conn)?,
    })
}

/// The stored records of one contest, in id order.
pub fn contest_results(
    conn: &Connection,
    election_id: i64,
    contest_id: i64,
) -> StoreResult<Vec<ResultRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM {} WHERE election_id = ?1 AND contest_id = ?2 ORDER BY result_id",
            ResultRecord::COLUMNS.join(", "),
            RESULTS_TABLE
        ))
        .context(DatabaseSnafu {
            operation: "preparing a contest query",
        })?;
    let rows = stmt
        .query_map(params![election_id, contest_id], |row| {
            Ok(ResultRecord {
                result_id: row.get(0)?,
                year: row.get(1)?,
                election_date: row.get(2)?,
                election_id: row.get(3)?,
                contest_id: row.get(4)?,
                contest_name: row.get(5)?,
                precinct_id: row.get(6)?,
                ward: row.get(7)?,
                precinct: row.get(8)?,
                total_votes: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
                option_name: row.get(10)?,
                option_votes: row.get::<_, i64>(11)? as u64,
                option_percent: row.get(12)?,
            })
        })
        .context(DatabaseSnafu {
            operation: "querying a contest",
        })?;
    rows.collect::<Result<Vec<ResultRecord>, rusqlite::Error>>()
        .context(DatabaseSnafu {
            operation: "reading a contest",
        })
}
