//! Surrogate key allocation.
//!
//! Each namespace owns one row of the `sequence_values` table. Ids are handed
//! out in contiguous blocks, and the block is reserved inside the transaction
//! that appends the rows using it: a failed append never advances the counter.

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use snafu::prelude::*;

use crate::error::*;

pub const SEQUENCE_TABLE: &str = "sequence_values";

pub const RESULT_ID_NAMESPACE: &str = "result_id";
pub const GEOMETRY_ID_NAMESPACE: &str = "precinct_geometry_id";

/// A durable counter for one namespace, and the table whose rows use it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SequenceAllocator {
    namespace: String,
    dependent_table: String,
}

pub(crate) fn to_sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value).ok().context(IntegerOverflowSnafu { value })
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()
        .context(DatabaseSnafu {
            operation: format!("looking up table {}", table),
        })?;
    Ok(found.is_some())
}

impl SequenceAllocator {
    pub fn new(namespace: &str, dependent_table: &str) -> SequenceAllocator {
        SequenceAllocator {
            namespace: namespace.to_string(),
            dependent_table: dependent_table.to_string(),
        }
    }

    pub fn for_results() -> SequenceAllocator {
        SequenceAllocator::new(RESULT_ID_NAMESPACE, crate::results::RESULTS_TABLE)
    }

    pub fn for_geometries() -> SequenceAllocator {
        SequenceAllocator::new(GEOMETRY_ID_NAMESPACE, crate::geometry::GEOMETRY_TABLE)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates the sequence table and the counter row if they do not exist.
    /// An existing counter is left untouched.
    pub fn ensure(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name VARCHAR PRIMARY KEY,
                    next_value INTEGER NOT NULL
                )",
                SEQUENCE_TABLE
            ),
            [],
        )
        .context(DatabaseSnafu {
            operation: "creating the sequence table",
        })?;
        conn.execute(
            &format!(
                "INSERT INTO {t} (name, next_value)
                 SELECT ?1, 1
                 WHERE NOT EXISTS (SELECT 1 FROM {t} WHERE name = ?1)",
                t = SEQUENCE_TABLE
            ),
            params![self.namespace],
        )
        .context(DatabaseSnafu {
            operation: format!("initializing sequence {}", self.namespace),
        })?;
        Ok(())
    }

    /// The next id this sequence will hand out.
    pub fn current(&self, conn: &Connection) -> StoreResult<i64> {
        let next: Option<i64> = conn
            .query_row(
                &format!("SELECT next_value FROM {} WHERE name = ?1", SEQUENCE_TABLE),
                params![self.namespace],
                |row| row.get(0),
            )
            .optional()
            .context(DatabaseSnafu {
                operation: format!("reading sequence {}", self.namespace),
            })?;
        next.context(MissingSequenceSnafu {
            namespace: self.namespace.clone(),
        })
    }

    /// Reserves the block `[start, start + count)` and returns `start`.
    ///
    /// The reservation is only durable if the transaction commits.
    pub fn reserve_in(&self, tx: &Transaction, count: u64) -> StoreResult<i64> {
        let delta = to_sql_int(count)?;
        let start: Option<i64> = tx
            .query_row(
                &format!("SELECT next_value FROM {} WHERE name = ?1", SEQUENCE_TABLE),
                params![self.namespace],
                |row| row.get(0),
            )
            .optional()
            .context(AllocationSnafu {
                namespace: self.namespace.clone(),
                count,
            })?;
        let start = start.context(MissingSequenceSnafu {
            namespace: self.namespace.clone(),
        })?;
        tx.execute(
            &format!(
                "UPDATE {} SET next_value = ?1 WHERE name = ?2",
                SEQUENCE_TABLE
            ),
            params![start + delta, self.namespace],
        )
        .context(AllocationSnafu {
            namespace: self.namespace.clone(),
            count,
        })?;
        debug!(
            "reserve_in: {}: reserved [{}, {})",
            self.namespace,
            start,
            start + delta
        );
        Ok(start)
    }

    /// Reserves a block in its own transaction.
    pub fn reserve(&self, conn: &mut Connection, count: u64) -> StoreResult<i64> {
        let tx = conn.transaction().context(AllocationSnafu {
            namespace: self.namespace.clone(),
            count,
        })?;
        let start = self.reserve_in(&tx, count)?;
        tx.commit().context(AllocationSnafu {
            namespace: self.namespace.clone(),
            count,
        })?;
        Ok(start)
    }

    /// Sets the counter back to 1 and purges the dependent table, atomically.
    /// Returns the number of purged rows.
    pub fn reset(&self, conn: &mut Connection) -> StoreResult<usize> {
        let tx = conn.transaction().context(DatabaseSnafu {
            operation: "starting a reset",
        })?;
        let purged = if table_exists(&tx, &self.dependent_table)? {
            tx.execute(&format!("DELETE FROM {}", self.dependent_table), [])
                .context(DatabaseSnafu {
                    operation: format!("purging {}", self.dependent_table),
                })?
        } else {
            0
        };
        let updated = tx
            .execute(
                &format!("UPDATE {} SET next_value = 1 WHERE name = ?1", SEQUENCE_TABLE),
                params![self.namespace],
            )
            .context(DatabaseSnafu {
                operation: format!("resetting sequence {}", self.namespace),
            })?;
        ensure!(
            updated == 1,
            MissingSequenceSnafu {
                namespace: self.namespace.clone()
            }
        );
        tx.commit().context(DatabaseSnafu {
            operation: "committing a reset",
        })?;
        info!(
            "reset: sequence {} back to 1, {} rows purged from {}",
            self.namespace, purged, self.dependent_table
        );
        Ok(purged)
    }
}
