//! Canonical precinct identifiers.
//!
//! A canonical identifier is the ward zero-padded to 2 digits followed by the
//! precinct zero-padded to 3 digits (`01001` is ward 1, precinct 1). Result
//! files and boundary files only join through this value, so every table is
//! routed through [`resolve`] before it reaches a store.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use snafu::prelude::*;

use crate::error::*;
use crate::model::*;
use crate::schema::PRECINCT_ID;

pub const CANONICAL_WIDTH: usize = 5;

/// Direct identifier columns, by decreasing priority.
pub const DIRECT_ID_COLUMNS: [&str; 5] = ["precinct_id", "PRECINCT_ID", "precinct", "PRECINCT", "ID"];
pub const WARD_COLUMNS: [&str; 2] = ["ward", "WARD"];
pub const PRECINCT_COLUMNS: [&str; 2] = ["precinct", "PRECINCT"];

/// Values that mean "no id" and are never valid identifiers.
pub const SENTINEL_IDS: [&str; 2] = ["0", "00000"];

pub const EMPTY_ID_PREFIX: &str = "GEN";
pub const SENTINEL_ID_PREFIX: &str = "ZERO";

const MAX_SAMPLES: usize = 5;

/// Builds the canonical identifier of a ward and a precinct.
pub fn canonical_id(ward: u32, precinct: u32) -> IdentityResult<String> {
    ensure!(
        ward <= 99 && precinct <= 999,
        OutOfRangeSnafu { ward, precinct }
    );
    Ok(format!("{:02}{:03}", ward, precinct))
}

/// The (ward, precinct) pair of a canonical identifier.
pub fn decompose(id: &str) -> Option<(u32, u32)> {
    if id.len() != CANONICAL_WIDTH || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let ward = id[..2].parse::<u32>().ok()?;
    let precinct = id[2..].parse::<u32>().ok()?;
    Some((ward, precinct))
}

/// Pads purely numeric identifiers to the canonical width.
///
/// Some vintages dropped the leading zero of single-digit wards upstream
/// (`1001` instead of `01001`).
pub fn normalize_width(id: &str) -> String {
    let id = id.trim();
    if !id.is_empty() && id.len() < CANONICAL_WIDTH && id.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>width$}", id, width = CANONICAL_WIDTH)
    } else {
        id.to_string()
    }
}

pub fn is_sentinel(id: &str) -> bool {
    SENTINEL_IDS.contains(&id)
}

/// Where the identifiers of a table come from.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum IdSource {
    Direct(String),
    WardPrecinct { ward: String, precinct: String },
}

fn first_present(columns: &[String], candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| columns.iter().any(|col| col == *c))
        .map(|c| c.to_string())
}

/// Finds the identifier source of a table.
///
/// A bare precinct column is only an identifier when there is no ward column
/// next to it: otherwise it holds the precinct number within the ward.
pub fn find_id_source(columns: &[String]) -> IdentityResult<IdSource> {
    let ward = first_present(columns, &WARD_COLUMNS);
    let precinct = first_present(columns, &PRECINCT_COLUMNS);
    for c in DIRECT_ID_COLUMNS.iter() {
        if !columns.iter().any(|col| col == c) {
            continue;
        }
        if PRECINCT_COLUMNS.contains(c) && ward.is_some() {
            continue;
        }
        return Ok(IdSource::Direct(c.to_string()));
    }
    match (ward, precinct) {
        (Some(ward), Some(precinct)) => Ok(IdSource::WardPrecinct { ward, precinct }),
        _ => NoIdentifierSourceSnafu {
            columns: columns.to_vec(),
        }
        .fail(),
    }
}

fn derive_ids(table: &Table, source: &IdSource) -> Vec<Option<String>> {
    match source {
        IdSource::Direct(col) => {
            let idx = table.column_index(col);
            (0..table.len())
                .map(|row| {
                    idx.and_then(|i| table.cell(row, i).as_text())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                })
                .collect()
        }
        IdSource::WardPrecinct { ward, precinct } => {
            let w_idx = table.column_index(ward);
            let p_idx = table.column_index(precinct);
            (0..table.len())
                .map(|row| {
                    let w = w_idx.and_then(|i| table.cell(row, i).as_integer());
                    let p = p_idx.and_then(|i| table.cell(row, i).as_integer());
                    let (w, p) = match (w, p) {
                        (Some(w), Some(p)) => (w, p),
                        _ => return None,
                    };
                    match (u32::try_from(w), u32::try_from(p)) {
                        (Ok(w), Ok(p)) => match canonical_id(w, p) {
                            Ok(id) => Some(id),
                            Err(e) => {
                                warn!("derive_ids: row {}: {}", row, e);
                                None
                            }
                        },
                        _ => None,
                    }
                })
                .collect()
        }
    }
}

/// A row of a table going through the repair pipeline.
#[derive(PartialEq, Debug, Clone)]
pub struct IdentifiedRow {
    pub precinct_id: Option<String>,
    pub cells: Vec<CellValue>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RepairReport {
    pub empty_replaced: usize,
    pub sentinel_replaced: usize,
    pub duplicates_dropped: usize,
    /// At most a handful of the dropped duplicate values.
    pub duplicate_samples: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.empty_replaced == 0 && self.sentinel_replaced == 0 && self.duplicates_dropped == 0
    }
}

/// The steps of the repair pipeline.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum RepairStep {
    /// Missing identifiers get `GEN001`, `GEN002`, ...
    FillEmpty,
    /// Sentinel identifiers get `ZERO001`, `ZERO002`, ...
    ReplaceSentinel,
    /// Later occurrences of an identifier are dropped.
    DropDuplicates,
}

/// Empties and sentinels are repaired first so that they are not counted as
/// duplicates of each other.
pub const REPAIR_PIPELINE: [RepairStep; 3] = [
    RepairStep::FillEmpty,
    RepairStep::ReplaceSentinel,
    RepairStep::DropDuplicates,
];

impl RepairStep {
    pub fn apply(self, rows: Vec<IdentifiedRow>, report: &mut RepairReport) -> Vec<IdentifiedRow> {
        match self {
            RepairStep::FillEmpty => {
                let mut next = 1;
                rows.into_iter()
                    .map(|mut r| {
                        if r.precinct_id.as_deref().map_or(true, str::is_empty) {
                            r.precinct_id = Some(format!("{}{:03}", EMPTY_ID_PREFIX, next));
                            next += 1;
                            report.empty_replaced += 1;
                        }
                        r
                    })
                    .collect()
            }
            RepairStep::ReplaceSentinel => {
                let mut next = 1;
                rows.into_iter()
                    .map(|mut r| {
                        if r.precinct_id.as_deref().map_or(false, is_sentinel) {
                            r.precinct_id = Some(format!("{}{:03}", SENTINEL_ID_PREFIX, next));
                            next += 1;
                            report.sentinel_replaced += 1;
                        }
                        r
                    })
                    .collect()
            }
            RepairStep::DropDuplicates => {
                let mut seen: HashSet<String> = HashSet::new();
                let mut res: Vec<IdentifiedRow> = Vec::with_capacity(rows.len());
                for r in rows {
                    let id = r.precinct_id.clone().unwrap_or_default();
                    if seen.insert(id.clone()) {
                        res.push(r);
                    } else {
                        report.duplicates_dropped += 1;
                        if report.duplicate_samples.len() < MAX_SAMPLES {
                            report.duplicate_samples.push(id);
                        }
                    }
                }
                res
            }
        }
    }
}

/// A table whose `precinct_id` column holds repaired canonical identifiers.
#[derive(PartialEq, Debug, Clone)]
pub struct Resolved {
    pub table: Table,
    pub source: IdSource,
    pub report: RepairReport,
}

/// Resolves and repairs the precinct identifiers of a table.
///
/// The output table has a `precinct_id` column (added if needed) with unique,
/// non-empty, non-sentinel values. Input row order decides which duplicate
/// survives.
pub fn resolve(table: Table) -> IdentityResult<Resolved> {
    let source = find_id_source(&table.columns)?;
    debug!("resolve: identifier source {:?}", source);
    let ids = derive_ids(&table, &source);

    let Table { columns, rows } = table;
    let mut identified: Vec<IdentifiedRow> = rows
        .into_iter()
        .zip(ids)
        .map(|(cells, id)| IdentifiedRow {
            precinct_id: id.map(|s| normalize_width(&s)),
            cells,
        })
        .collect();

    let mut report = RepairReport::default();
    for step in REPAIR_PIPELINE {
        identified = step.apply(identified, &mut report);
    }

    if report.empty_replaced > 0 {
        warn!(
            "resolve: {} records with empty precinct ids were given generated ids",
            report.empty_replaced
        );
    }
    if report.sentinel_replaced > 0 {
        warn!(
            "resolve: {} records with '0' or '00000' precinct ids were renamed",
            report.sentinel_replaced
        );
    }
    if report.duplicates_dropped > 0 {
        warn!(
            "resolve: dropped {} duplicate precinct ids, e.g. {:?}",
            report.duplicates_dropped, report.duplicate_samples
        );
    }

    let survivors = duplicated_values(identified.iter().filter_map(|r| r.precinct_id.as_deref()));
    ensure!(
        survivors.is_empty(),
        DuplicateSurvivedRepairSnafu {
            count: survivors.len(),
            samples: survivors
                .iter()
                .take(MAX_SAMPLES)
                .map(|(id, _)| id.clone())
                .collect::<Vec<String>>(),
        }
    );

    let mut out = Table::new(columns);
    let mut values: Vec<CellValue> = Vec::with_capacity(identified.len());
    for r in identified {
        values.push(CellValue::Text(r.precinct_id.unwrap_or_default()));
        out.rows.push(r.cells);
    }
    out.set_column(PRECINCT_ID, values);
    debug!("resolve: {} precinct ids resolved", out.len());
    Ok(Resolved {
        table: out,
        source,
        report,
    })
}

/// Values appearing more than once, with their multiplicity, most frequent first.
fn duplicated_values<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in ids {
        *counts.entry(id).or_insert(0) += 1;
    }
    let mut res: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, c)| *c > 1)
        .map(|(id, c)| (id.to_string(), c))
        .collect();
    res.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    res
}

/// The identifier problems of a table, before any repair.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct IdentityAudit {
    pub source: IdSource,
    pub rows: usize,
    pub empty: usize,
    pub sentinel: usize,
    /// Every identifier appearing more than once, with its count.
    pub duplicates: Vec<(String, usize)>,
}

impl IdentityAudit {
    pub fn is_clean(&self) -> bool {
        self.empty == 0 && self.sentinel == 0 && self.duplicates.is_empty()
    }
}

/// Inspects the identifiers of a table without changing it.
pub fn audit(table: &Table) -> IdentityResult<IdentityAudit> {
    let source = find_id_source(&table.columns)?;
    let ids: Vec<Option<String>> = derive_ids(table, &source)
        .into_iter()
        .map(|id| id.map(|s| normalize_width(&s)))
        .collect();
    let empty = ids.iter().filter(|id| id.is_none()).count();
    let sentinel = ids
        .iter()
        .filter(|id| id.as_deref().map_or(false, is_sentinel))
        .count();
    let duplicates = duplicated_values(ids.iter().filter_map(|id| id.as_deref()));
    Ok(IdentityAudit {
        source,
        rows: table.len(),
        empty,
        sentinel,
        duplicates,
    })
}
