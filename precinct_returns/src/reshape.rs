//! Conversion of the wide result tables into the canonical long form.

use std::collections::HashMap;
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use snafu::prelude::*;

use crate::error::*;
use crate::model::*;
use crate::schema::*;

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("Invalid digits regex"));
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.?\d*").expect("Invalid percent regex"));

/// The option names of the turnout files.
pub const REGISTERED_OPTION: &str = "registered";
pub const BALLOTS_OPTION: &str = "ballots";

/// Reads a vote count out of a cell.
///
/// The first run of digits is the value: `"1,234"` reads as 1 and
/// `"57 (amended)"` as 57. A missing cell or a cell without digits is 0.
pub fn coerce_votes(cell: &CellValue) -> u64 {
    let text = cell.as_text().unwrap_or_else(|| "0".to_string());
    match DIGITS_RE.find(&text) {
        Some(m) => match m.as_str().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("coerce_votes: value {:?} does not fit, using 0", text);
                0
            }
        },
        None => 0,
    }
}

/// Reads a percentage out of a cell: the first `digits[.digits]` run, or 0.0.
pub fn coerce_percent(cell: &CellValue) -> f64 {
    let text = cell.as_text().unwrap_or_else(|| "0.0".to_string());
    PERCENT_RE
        .find(&text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn check_rows(table: &Table) -> SchemaResult<()> {
    let expected = table.columns.len();
    for (row, cells) in table.rows.iter().enumerate() {
        ensure!(
            cells.len() == expected,
            RaggedRowSnafu {
                row,
                expected,
                found: cells.len(),
                columns: table.columns.clone(),
            }
        );
    }
    Ok(())
}

/// The parts of a record that come from the row itself.
struct RowKey {
    precinct_id: String,
    ward: Option<String>,
    precinct: Option<String>,
}

fn row_key(cells: &[CellValue], common: &CommonColumns) -> RowKey {
    RowKey {
        precinct_id: cells[common.precinct_id].as_text().unwrap_or_default(),
        ward: common.ward.and_then(|idx| cells[idx].as_text()),
        precinct: common.precinct.and_then(|idx| cells[idx].as_text()),
    }
}

fn make_record(
    ctx: &ElectionContext,
    key: &RowKey,
    option_name: &str,
    option_votes: u64,
    option_percent: Option<f64>,
    total_votes: Option<u64>,
) -> ResultRecord {
    ResultRecord {
        result_id: None,
        year: ctx.year,
        election_date: ctx.election_date.clone(),
        election_id: ctx.election_id,
        contest_id: ctx.contest_id,
        contest_name: ctx.contest_name.clone(),
        precinct_id: key.precinct_id.clone(),
        ward: key.ward.clone(),
        precinct: key.precinct.clone(),
        total_votes,
        option_name: option_name.to_string(),
        option_votes,
        option_percent,
    }
}

fn reshape_turnout(
    table: &Table,
    schema: &TurnoutSchema,
    ctx: &ElectionContext,
) -> Vec<ResultRecord> {
    let keys: Vec<RowKey> = table
        .rows
        .iter()
        .map(|cells| row_key(cells, &schema.common))
        .collect();
    let mut res: Vec<ResultRecord> = Vec::with_capacity(2 * table.len());
    for (cells, key) in table.rows.iter().zip(keys.iter()) {
        res.push(make_record(
            ctx,
            key,
            REGISTERED_OPTION,
            coerce_votes(&cells[schema.registered]),
            None,
            None,
        ));
    }
    for (cells, key) in table.rows.iter().zip(keys.iter()) {
        res.push(make_record(
            ctx,
            key,
            BALLOTS_OPTION,
            coerce_votes(&cells[schema.ballots]),
            Some(coerce_percent(&cells[schema.turnout])),
            None,
        ));
    }
    res
}

fn reshape_options(
    table: &Table,
    schema: &OptionsSchema,
    ctx: &ElectionContext,
) -> Vec<ResultRecord> {
    let keys: Vec<RowKey> = table
        .rows
        .iter()
        .map(|cells| row_key(cells, &schema.common))
        .collect();
    let mut res: Vec<ResultRecord> = Vec::with_capacity(schema.options.len() * table.len());
    for option in schema.options.iter() {
        // The sidecar percentages are looked up by precinct, not by position.
        let sidecar: Option<HashMap<&str, &CellValue>> = option.percent.map(|pidx| {
            let mut m: HashMap<&str, &CellValue> = HashMap::new();
            for (cells, key) in table.rows.iter().zip(keys.iter()) {
                m.entry(key.precinct_id.as_str()).or_insert(&cells[pidx]);
            }
            m
        });
        for (cells, key) in table.rows.iter().zip(keys.iter()) {
            let percent = sidecar
                .as_ref()
                .and_then(|m| m.get(key.precinct_id.as_str()))
                .map(|c| coerce_percent(c))
                .unwrap_or(0.0);
            let total = schema.total.map(|tidx| coerce_votes(&cells[tidx]));
            res.push(make_record(
                ctx,
                key,
                &option.name,
                coerce_votes(&cells[option.votes]),
                Some(percent),
                total,
            ));
        }
    }
    res
}

/// Unpivots a classified wide table into canonical records, with the
/// directory metadata back-filled on every record.
pub fn reshape(
    table: &Table,
    schema: &ResultSchema,
    ctx: &ElectionContext,
) -> SchemaResult<Vec<ResultRecord>> {
    check_rows(table)?;
    let res = match schema {
        ResultSchema::Turnout(t) => reshape_turnout(table, t, ctx),
        ResultSchema::Options(o) => reshape_options(table, o, ctx),
    };
    debug!(
        "reshape: election {} contest {}: {} rows -> {} records",
        ctx.election_id,
        ctx.contest_id,
        table.len(),
        res.len()
    );
    Ok(res)
}
