use clap::{Parser, Subcommand};

/// Loads precinct-level election returns and precinct boundaries into a database.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file with the settings of the run. For more information about the
    /// file format, read the documentation of the precinct_returns crate.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) The database file. Setting this option overrides the path that may be specified
    /// with the --config option.
    #[clap(long, value_parser)]
    pub db: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Imports all the result files under the base directory.
    ImportResults {
        /// (directory) The directory containing one numbered directory per election.
        #[clap(long, value_parser)]
        base_dir: Option<String>,

        /// (file path) The JSON file describing each election directory.
        #[clap(long, value_parser)]
        metadata: Option<String>,

        /// The number of records appended per transaction.
        #[clap(long, value_parser)]
        batch_size: Option<usize>,

        /// The number of directories processed in parallel.
        #[clap(long, value_parser)]
        workers: Option<usize>,

        /// Keeps the existing results instead of starting from an empty table.
        /// The elections being imported replace their stored rows.
        #[clap(long, takes_value = false)]
        append: bool,

        /// (file path, 'stdout' or empty) Where to write the JSON summary of the run.
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },

    /// Imports precinct boundaries, either one file or all the vintages of the configuration.
    ImportBoundaries {
        /// (file path) A GeoJSON file with the precinct boundaries.
        #[clap(long, value_parser, requires = "from")]
        file: Option<String>,

        /// The first year the boundaries are valid.
        #[clap(long, value_parser)]
        from: Option<i32>,

        /// The last year the boundaries are valid. Open-ended if not specified.
        #[clap(long, value_parser)]
        to: Option<i32>,
    },

    /// Reports empty, zero and duplicate precinct ids in a GeoJSON file, without importing it.
    CheckBoundaries {
        /// (file path) A GeoJSON file with the precinct boundaries.
        #[clap(value_parser)]
        file: String,
    },

    /// Adds a precinct_id column to the raw CSV result files, in place.
    AddPrecinctIds {
        /// (directory) The directory containing one numbered directory per election.
        #[clap(long, value_parser)]
        base_dir: Option<String>,
    },

    /// Deletes one election so that it can be imported again.
    DeleteElection {
        #[clap(value_parser)]
        election_id: i64,
    },

    /// Deletes all the results and boundaries and restarts the id sequences.
    Reset,

    /// Prints statistics about the database.
    Summary {
        /// (file path, 'stdout' or empty) Where to write the JSON summary.
        #[clap(short, long, value_parser)]
        out: Option<String>,

        /// (file path) A reference summary in JSON format. If provided, prload will check that the
        /// database matches the reference.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },
}
