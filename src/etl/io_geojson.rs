// Reading precinct boundary files (GeoJSON feature collections).

use serde::Deserialize;
use serde_json::Map as JSMap;

use crate::etl::*;

/// The column holding the GeoJSON text of the geometry.
pub const GEOMETRY_COLUMN: &str = "geometry";

#[derive(Debug, Clone, Deserialize)]
struct GeoFeature {
    #[serde(default)]
    properties: Option<JSMap<String, JSValue>>,
    #[serde(default)]
    geometry: Option<JSValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeoFeatureCollection {
    features: Vec<GeoFeature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    /// One row per feature with a geometry. The property columns come first,
    /// feature by feature, and the geometry is the last column.
    pub table: Table,
    /// Features without a geometry.
    pub dropped: usize,
}

fn property_cell(v: &JSValue) -> CellValue {
    match v {
        JSValue::Null => CellValue::Empty,
        JSValue::String(s) if s.trim().is_empty() => CellValue::Empty,
        JSValue::String(s) => CellValue::Text(s.clone()),
        JSValue::Number(n) => match n.as_i64() {
            Some(i) => CellValue::Int(i),
            None => CellValue::Float(n.as_f64().unwrap_or(0.0)),
        },
        JSValue::Bool(b) => CellValue::Text(b.to_string()),
        x => CellValue::Text(x.to_string()),
    }
}

pub fn parse_geojson(contents: &str, path: &str) -> EtlResult<GeoTable> {
    let fc: GeoFeatureCollection =
        serde_json::from_str(contents).context(ParsingJsonSnafu { path })?;

    let mut columns: Vec<String> = Vec::new();
    for f in fc.features.iter() {
        if let Some(props) = &f.properties {
            for k in props.keys() {
                if k != GEOMETRY_COLUMN && !columns.contains(k) {
                    columns.push(k.clone());
                }
            }
        }
    }
    columns.push(GEOMETRY_COLUMN.to_string());

    let mut table = Table::new(columns);
    let mut dropped = 0;
    for (idx, f) in fc.features.iter().enumerate() {
        let geometry = match &f.geometry {
            Some(g) if !g.is_null() => g.to_string(),
            _ => {
                warn!("parse_geojson: {}: feature {} has no geometry, dropping it", path, idx);
                dropped += 1;
                continue;
            }
        };
        let mut row: Vec<CellValue> = table.columns[..table.columns.len() - 1]
            .iter()
            .map(|c| {
                f.properties
                    .as_ref()
                    .and_then(|p| p.get(c))
                    .map(property_cell)
                    .unwrap_or(CellValue::Empty)
            })
            .collect();
        row.push(CellValue::Text(geometry));
        table.rows.push(row);
    }
    debug!(
        "parse_geojson: {}: {} features, {} dropped, columns {:?}",
        path,
        table.len(),
        dropped,
        table.columns
    );
    Ok(GeoTable { table, dropped })
}

pub fn read_geojson_table(path: &Path) -> EtlResult<GeoTable> {
    let path_s = path.display().to_string();
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path: &path_s })?;
    parse_geojson(&contents, &path_s)
}
