// Directory-level metadata: one entry per election directory.

use crate::etl::*;

use serde::{Deserialize, Serialize};
use serde_json::Map as JSMap;
use std::collections::{BTreeMap, HashMap};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    /// Either a number or a string in the published files.
    pub year: Option<JSValue>,
    pub date: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub races: HashMap<String, String>,
}

impl DirectoryMetadata {
    pub fn year(&self) -> Option<i32> {
        match &self.year {
            Some(JSValue::Number(n)) => n.as_i64().and_then(|x| i32::try_from(x).ok()),
            Some(JSValue::String(s)) => s.trim().parse::<i32>().ok(),
            _ => None,
        }
    }

    pub fn contest_name(&self, file_id: i64) -> Option<String> {
        self.races.get(&file_id.to_string()).cloned()
    }

    pub fn context(&self, election_id: i64, contest_id: i64) -> ElectionContext {
        ElectionContext {
            year: self.year(),
            election_date: self.date.clone(),
            election_id,
            contest_id,
            contest_name: self.contest_name(contest_id),
        }
    }
}

/// Metadata keyed by directory id.
pub type Metadata = BTreeMap<i64, DirectoryMetadata>;

pub fn parse_metadata(contents: &str, path: &str) -> EtlResult<Metadata> {
    let raw: JSMap<String, JSValue> =
        serde_json::from_str(contents).context(ParsingJsonSnafu { path })?;
    let mut res: Metadata = BTreeMap::new();
    for (key, value) in raw.into_iter() {
        let directory_id = match io_common::numeric_id(&key) {
            Some(x) => x,
            None => {
                debug!("parse_metadata: skipping non-numeric key {:?}", key);
                continue;
            }
        };
        let dm: DirectoryMetadata =
            serde_json::from_value(value).context(ParsingJsonSnafu { path })?;
        if dm.year().is_none() {
            warn!(
                "parse_metadata: directory {}: could not read year {:?}",
                directory_id, dm.year
            );
        }
        res.insert(directory_id, dm);
    }
    Ok(res)
}

pub fn load_metadata(path: &Path) -> EtlResult<Metadata> {
    let path_s = path.display().to_string();
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path: &path_s })?;
    let res = parse_metadata(&contents, &path_s)?;
    info!(
        "load_metadata: {} directories described in {}",
        res.len(),
        path_s
    );
    Ok(res)
}
