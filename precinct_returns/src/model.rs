// ********* Input data structures ***********

use std::fmt::Display;

/// The content of a single cell in a source table.
///
/// Readers map their native cell types onto this enumeration. A missing
/// value is always `Empty`, never an empty string.
#[derive(PartialEq, Debug, Clone)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// The textual rendering of the cell, or None for a missing value.
    ///
    /// Integral floats are rendered without a fractional part, so that a
    /// spreadsheet cell holding `1001.0` reads as `1001`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
                Some(format!("{}", *f as i64))
            }
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::Text(s) => Some(s.clone()),
        }
    }

    /// The cell as an integer, when it holds one (directly or as text).
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::Text(s) => {
                let t = s.trim();
                t.parse::<i64>().ok().or_else(|| {
                    t.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_text() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}

/// A wide source table, as returned by one of the file readers.
///
/// Rows are expected to have exactly one cell per column. Readers do not
/// enforce it: the reshaper reports ragged rows as a structural error.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Table {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the cell at the given row and column, treating short rows as empty.
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&CellValue::Empty)
    }

    /// Replaces the values of a column, or appends it if it does not exist yet.
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) {
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            if row.len() <= idx {
                row.resize(idx + 1, CellValue::Empty);
            }
            row[idx] = value;
        }
    }
}

/// The directory-level metadata that is back-filled on every record of a file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ElectionContext {
    pub year: Option<i32>,
    pub election_date: Option<String>,
    /// The source directory id.
    pub election_id: i64,
    /// The source file id.
    pub contest_id: i64,
    pub contest_name: Option<String>,
}

// ******** Output data structures *********

/// One row of the canonical long-form results store.
#[derive(PartialEq, Debug, Clone)]
pub struct ResultRecord {
    /// Only bound when the record is appended to the store.
    pub result_id: Option<i64>,
    pub year: Option<i32>,
    pub election_date: Option<String>,
    pub election_id: i64,
    pub contest_id: i64,
    pub contest_name: Option<String>,
    pub precinct_id: String,
    pub ward: Option<String>,
    pub precinct: Option<String>,
    pub total_votes: Option<u64>,
    pub option_name: String,
    pub option_votes: u64,
    pub option_percent: Option<f64>,
}

impl ResultRecord {
    /// The canonical column order of the results store.
    pub const COLUMNS: [&'static str; 13] = [
        "result_id",
        "year",
        "election_date",
        "election_id",
        "contest_id",
        "contest_name",
        "precinct_id",
        "ward",
        "precinct",
        "total_votes",
        "option_name",
        "option_votes",
        "option_percent",
    ];
}

/// An incoming boundary, after its identifier has been resolved.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BoundaryShape {
    pub precinct_id: String,
    /// Well-formed shape text. It is never interpreted by this crate.
    pub payload: String,
}

/// A stored boundary, valid over `[valid_from_year, valid_to_year]`.
/// An open-ended version (`valid_to_year` = None) is the current one.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BoundaryVersion {
    pub surrogate_id: i64,
    pub precinct_id: String,
    pub valid_from_year: i32,
    pub valid_to_year: Option<i32>,
    pub shape_payload: String,
}

impl BoundaryVersion {
    pub fn contains_year(&self, year: i32) -> bool {
        self.valid_from_year <= year && self.valid_to_year.map_or(true, |to| year <= to)
    }
}
