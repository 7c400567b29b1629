/*!
Normalization of precinct-level election returns, and temporal storage of
precinct boundaries.

The crate turns the wide per-contest result tables published by election
boards into one canonical long-form table (one row per precinct and per
option), and keeps the successive vintages of the precinct boundaries with
non-overlapping validity intervals. Both stores join on the canonical
precinct identifier built by the [`identity`] module.

A typical result file goes through:

```
use precinct_returns::*;

let table = Table {
    columns: vec!["ward".to_string(), "precinct".to_string(), "Smith".to_string()],
    rows: vec![vec![CellValue::Int(1), CellValue::Int(1), CellValue::Text("60".to_string())]],
};
let ctx = ElectionContext {
    year: Some(2019),
    election_date: Some("2/26/2019".to_string()),
    election_id: 210,
    contest_id: 9,
    contest_name: Some("Mayor".to_string()),
};
let resolved = identity::resolve(table)?;
let schema = schema::classify_resolved(&resolved.table.columns, &resolved.source)?;
let records = reshape::reshape(&resolved.table, &schema, &ctx)?;
assert_eq!(records[0].precinct_id, "01001");
assert_eq!(records[0].option_votes, 60);
# Ok::<(), Box<dyn std::error::Error>>(())
```

See the [`manual`] for the expected input formats.
*/

pub mod error;
pub mod geometry;
pub mod identity;
pub mod manual;
mod model;
pub mod reshape;
pub mod results;
pub mod schema;
pub mod sequence;

pub use crate::error::*;
pub use crate::model::*;
pub use crate::sequence::SequenceAllocator;
