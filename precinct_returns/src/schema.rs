//! Classification of the result files.
//!
//! The source files come in two shapes: registration/turnout files and
//! candidate (or ballot question) files with one column per option. The shape
//! is resolved once per table, and the reshaper only works from the resolved
//! column positions.

use log::debug;
use snafu::prelude::*;

use crate::error::*;
use crate::identity::{IdSource, PRECINCT_COLUMNS, WARD_COLUMNS};

pub const PRECINCT_ID: &str = "precinct_id";
pub const WARD: &str = "ward";
pub const PRECINCT: &str = "precinct";
pub const TOTAL: &str = "total";
pub const REGISTERED: &str = "registered";
pub const BALLOTS: &str = "ballots";
pub const TURNOUT: &str = "turnout";

/// Columns that are never voting options.
pub const RESERVED_COLUMNS: [&str; 7] =
    [PRECINCT_ID, WARD, PRECINCT, TOTAL, REGISTERED, BALLOTS, TURNOUT];

/// Suffix of the per-option percentage columns, as in `Smith Percent`.
pub const PERCENT_SUFFIX: &str = " Percent";
/// Any column ending with this is a percentage, never an option.
pub const PERCENT_MARKER: &str = "Percent";

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SchemaKind {
    Turnout,
    Options,
}

/// Columns shared by both shapes.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CommonColumns {
    pub precinct_id: usize,
    pub ward: Option<usize>,
    pub precinct: Option<usize>,
}

/// A registration/turnout file: two fixed options per precinct.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TurnoutSchema {
    pub common: CommonColumns,
    pub registered: usize,
    pub ballots: usize,
    pub turnout: usize,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OptionColumn {
    pub name: String,
    pub votes: usize,
    /// The `<name> Percent` sidecar column, when the file has one.
    pub percent: Option<usize>,
}

/// A file with one vote column per candidate or ballot option.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OptionsSchema {
    pub common: CommonColumns,
    pub total: Option<usize>,
    pub options: Vec<OptionColumn>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ResultSchema {
    Turnout(TurnoutSchema),
    Options(OptionsSchema),
}

impl ResultSchema {
    pub fn kind(&self) -> SchemaKind {
        match self {
            ResultSchema::Turnout(_) => SchemaKind::Turnout,
            ResultSchema::Options(_) => SchemaKind::Options,
        }
    }

    pub fn common(&self) -> &CommonColumns {
        match self {
            ResultSchema::Turnout(t) => &t.common,
            ResultSchema::Options(o) => &o.common,
        }
    }
}

fn position(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c == name)
}

fn first_position(columns: &[String], names: &[&str]) -> Option<usize> {
    names.iter().find_map(|n| position(columns, n))
}

fn require(columns: &[String], name: &str) -> SchemaResult<usize> {
    position(columns, name).context(MissingColumnSnafu {
        column: name.to_string(),
        columns: columns.to_vec(),
    })
}

pub fn is_percent_column(name: &str) -> bool {
    name.ends_with(PERCENT_MARKER)
}

fn is_reserved(name: &str, excluded: &[&str]) -> bool {
    RESERVED_COLUMNS.contains(&name)
        || WARD_COLUMNS.contains(&name)
        || PRECINCT_COLUMNS.contains(&name)
        || excluded.contains(&name)
}

/// Decides how a table with the given columns should be reshaped.
///
/// A table with both a `registered` and a `turnout` column is a turnout file.
/// Anything else is an options file, whose options are all the columns that
/// are neither reserved nor percentages.
pub fn classify(columns: &[String]) -> SchemaResult<ResultSchema> {
    classify_excluding(columns, &[])
}

/// Classifies a table whose identifiers were taken from `source`: the
/// identifier columns are never options.
pub fn classify_resolved(columns: &[String], source: &IdSource) -> SchemaResult<ResultSchema> {
    let excluded: Vec<&str> = match source {
        IdSource::Direct(c) => vec![c.as_str()],
        IdSource::WardPrecinct { ward, precinct } => vec![ward.as_str(), precinct.as_str()],
    };
    classify_excluding(columns, &excluded)
}

/// Same as [`classify`], with extra columns that are not options.
pub fn classify_excluding(columns: &[String], excluded: &[&str]) -> SchemaResult<ResultSchema> {
    let common = CommonColumns {
        precinct_id: require(columns, PRECINCT_ID)?,
        ward: first_position(columns, &WARD_COLUMNS),
        precinct: first_position(columns, &PRECINCT_COLUMNS),
    };

    if let (Some(registered), Some(turnout)) =
        (position(columns, REGISTERED), position(columns, TURNOUT))
    {
        let ballots = require(columns, BALLOTS)?;
        debug!("classify: turnout schema for {:?}", columns);
        return Ok(ResultSchema::Turnout(TurnoutSchema {
            common,
            registered,
            ballots,
            turnout,
        }));
    }

    let options: Vec<OptionColumn> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !is_reserved(c, excluded) && !is_percent_column(c))
        .map(|(votes, name)| OptionColumn {
            name: name.clone(),
            votes,
            percent: position(columns, &format!("{}{}", name, PERCENT_SUFFIX)),
        })
        .collect();

    ensure!(
        !options.is_empty(),
        NoOptionColumnsSnafu {
            columns: columns.to_vec()
        }
    );

    debug!(
        "classify: options schema with {:?}",
        options.iter().map(|o| o.name.as_str()).collect::<Vec<&str>>()
    );
    Ok(ResultSchema::Options(OptionsSchema {
        common,
        total: position(columns, TOTAL),
        options,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn turnout_file() {
        let schema = classify(&cols(&[
            "precinct_id",
            "ward",
            "precinct",
            "registered",
            "ballots",
            "turnout",
        ]))
        .unwrap();
        assert_eq!(schema.kind(), SchemaKind::Turnout);
        assert_eq!(
            schema,
            ResultSchema::Turnout(TurnoutSchema {
                common: CommonColumns {
                    precinct_id: 0,
                    ward: Some(1),
                    precinct: Some(2)
                },
                registered: 3,
                ballots: 4,
                turnout: 5,
            })
        );
    }

    #[test]
    fn turnout_without_ballots() {
        let err = classify(&cols(&["precinct_id", "registered", "turnout"])).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn { column, .. } if column == "ballots"));
    }

    #[test]
    fn registered_alone_is_not_turnout() {
        // Without a turnout measure the file is read as an options file.
        let schema = classify(&cols(&["precinct_id", "registered", "Yes", "No"])).unwrap();
        match schema {
            ResultSchema::Options(o) => {
                let names: Vec<&str> = o.options.iter().map(|x| x.name.as_str()).collect();
                assert_eq!(names, vec!["Yes", "No"]);
            }
            _ => panic!("expected an options schema"),
        }
    }

    #[test]
    fn options_with_sidecars() {
        let schema = classify(&cols(&[
            "precinct_id",
            "ward",
            "precinct",
            "total",
            "Smith",
            "Jones",
            "Smith Percent",
        ]))
        .unwrap();
        let o = match schema {
            ResultSchema::Options(o) => o,
            _ => panic!("expected an options schema"),
        };
        assert_eq!(o.total, Some(3));
        assert_eq!(
            o.options,
            vec![
                OptionColumn {
                    name: "Smith".to_string(),
                    votes: 4,
                    percent: Some(6)
                },
                OptionColumn {
                    name: "Jones".to_string(),
                    votes: 5,
                    percent: None
                },
            ]
        );
    }

    #[test]
    fn no_option_columns() {
        let err = classify(&cols(&["precinct_id", "ward", "total", "Yes Percent"])).unwrap_err();
        assert!(matches!(err, SchemaError::NoOptionColumns { .. }));
    }

    #[test]
    fn any_percent_column_is_not_an_option() {
        let schema = classify(&cols(&["precinct_id", "Smith", "Percent", "SmithPercent"])).unwrap();
        let o = match schema {
            ResultSchema::Options(o) => o,
            _ => panic!("expected an options schema"),
        };
        assert_eq!(
            o.options,
            vec![OptionColumn {
                name: "Smith".to_string(),
                votes: 1,
                percent: None
            }]
        );
    }

    #[test]
    fn identifier_columns_are_not_options() {
        let columns = cols(&["ID", "Smith", "precinct_id"]);
        let schema = classify_resolved(&columns, &IdSource::Direct("ID".to_string())).unwrap();
        let o = match schema {
            ResultSchema::Options(o) => o,
            _ => panic!("expected an options schema"),
        };
        let names: Vec<&str> = o.options.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(names, vec!["Smith"]);

        let columns = cols(&["WARD", "PRECINCT", "Smith", "precinct_id"]);
        let source = IdSource::WardPrecinct {
            ward: "WARD".to_string(),
            precinct: "PRECINCT".to_string(),
        };
        let o = match classify_resolved(&columns, &source).unwrap() {
            ResultSchema::Options(o) => o,
            _ => panic!("expected an options schema"),
        };
        let names: Vec<&str> = o.options.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(names, vec!["Smith"]);
        assert_eq!(o.common.ward, Some(0));
        assert_eq!(o.common.precinct, Some(1));
    }

    #[test]
    fn missing_precinct_id() {
        let err = classify(&cols(&["ward", "Smith"])).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn { column, .. } if column == "precinct_id"));
    }
}
