use snafu::prelude::*;

/// Errors raised while classifying or reshaping a wide table.
///
/// All of them are recoverable: the file is skipped and the batch goes on.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaError {
    #[snafu(display("No voting option columns found among {columns:?}"))]
    NoOptionColumns { columns: Vec<String> },

    #[snafu(display("Missing required column {column:?} among {columns:?}"))]
    MissingColumn {
        column: String,
        columns: Vec<String>,
    },

    #[snafu(display(
        "Row {row} has {found} cells but the table declares {expected} columns {columns:?}"
    ))]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
        columns: Vec<String>,
    },
}

/// Errors raised while resolving precinct identifiers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdentityError {
    #[snafu(display("Could not find a suitable precinct id column among {columns:?}"))]
    NoIdentifierSource { columns: Vec<String> },

    #[snafu(display("Ward {ward} / precinct {precinct} is out of the canonical range"))]
    OutOfRange { ward: u32, precinct: u32 },

    #[snafu(display(
        "{count} duplicate precinct ids survived the repair pipeline, e.g. {samples:?}"
    ))]
    DuplicateSurvivedRepair { count: usize, samples: Vec<String> },
}

/// Errors raised by the persistent stores.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Database error during {operation}"))]
    Database {
        source: rusqlite::Error,
        operation: String,
    },

    #[snafu(display("Could not reserve {count} ids in sequence {namespace:?}"))]
    Allocation {
        source: rusqlite::Error,
        namespace: String,
        count: u64,
    },

    #[snafu(display("Sequence {namespace:?} is not initialized"))]
    MissingSequence { namespace: String },

    #[snafu(display(
        "Import would leave {count} overlapping validity intervals, e.g. {samples:?}"
    ))]
    OverlappingIntervals { count: usize, samples: Vec<String> },

    #[snafu(display("Precinct {precinct_id:?} has {count} versions active in {year}"))]
    ConflictingVersions {
        precinct_id: String,
        year: i32,
        count: usize,
    },

    #[snafu(display("Validity interval [{from}, {to}] ends before it starts"))]
    InvalidInterval { from: i32, to: i32 },

    #[snafu(display("Boundary for precinct {precinct_id:?} has an empty shape payload"))]
    EmptyPayload { precinct_id: String },

    #[snafu(display("Value {value} does not fit in a database integer"))]
    IntegerOverflow { value: u64 },
}

pub type SchemaResult<T> = Result<T, SchemaError>;
pub type IdentityResult<T> = Result<T, IdentityError>;
pub type StoreResult<T> = Result<T, StoreError>;
