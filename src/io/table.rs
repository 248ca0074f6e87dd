//! Feature table files.
//!
//! Tables are stored as GeoJSON-compatible feature collections with Point
//! geometries, plus an optional `fields` member carrying field types and
//! aliases so derived fields survive a round trip.

use crate::error::{Error, Result};
use crate::models::{AttributeValue, Feature, FeatureTable, FieldDef, FieldType};
use chrono::Utc;
use geo::Point;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Read a feature table; its name is the file stem.
pub fn read_table(path: &Path) -> Result<FeatureTable> {
    let content = fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let table = parse_table(&content, &name)?;
    info!(
        "Read {} features and {} fields from {}",
        table.len(),
        table.fields.len(),
        path.display()
    );
    Ok(table)
}

/// Write a feature table as pretty-printed JSON.
pub fn write_table(table: &FeatureTable, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(&table_to_json(table))?;
    fs::write(path, content)?;
    info!("Wrote {} features to {}", table.len(), path.display());
    Ok(())
}

/// Parse a feature collection. `name` becomes the table name.
pub fn parse_table(content: &str, name: &str) -> Result<FeatureTable> {
    let root: Value = serde_json::from_str(content)?;

    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidTable("missing \"features\" array".to_string()))?;

    let mut table = FeatureTable::new(name);

    if let Some(fields) = root.get("fields") {
        table.fields = serde_json::from_value::<Vec<FieldDef>>(fields.clone())?;
    }

    // Property keys not declared in `fields`, in order of first appearance.
    let mut inferred: Vec<String> = Vec::new();
    let mut inferred_types: HashMap<String, FieldType> = HashMap::new();

    for (position, raw) in features.iter().enumerate() {
        let fid = raw
            .get("id")
            .and_then(Value::as_i64)
            .unwrap_or(position as i64 + 1);

        let geometry = parse_geometry(raw.get("geometry"))?;
        let mut feature = Feature::new(fid, geometry);

        if let Some(properties) = raw.get("properties").and_then(Value::as_object) {
            for (key, value) in properties {
                let value = parse_value(key, value)?;

                if table.find_field(key).is_none() {
                    if !inferred.contains(key) {
                        inferred.push(key.clone());
                    }
                    if let Some(field_type) = FieldType::of(&value) {
                        inferred_types.entry(key.clone()).or_insert(field_type);
                    }
                }

                feature.set(key.clone(), value);
            }
        }

        table.features.push(feature);
    }

    for key in inferred {
        let field_type = inferred_types.get(&key).copied().unwrap_or(FieldType::Double);
        debug!("Inferred field {} ({})", key, field_type);
        table.fields.push(FieldDef::new(key, field_type));
    }

    Ok(table)
}

fn parse_geometry(geometry: Option<&Value>) -> Result<Option<Point<f64>>> {
    let Some(geometry) = geometry.filter(|g| !g.is_null()) else {
        return Ok(None);
    };

    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidTable("geometry without \"type\"".to_string()))?;

    if kind != "Point" {
        return Err(Error::UnsupportedGeometry(kind.to_string()));
    }

    let coords = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| Error::InvalidTable("Point needs [x, y] coordinates".to_string()))?;

    match (coords[0].as_f64(), coords[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Some(Point::new(x, y))),
        _ => Err(Error::InvalidTable(
            "Point coordinates must be numbers".to_string(),
        )),
    }
}

fn parse_value(key: &str, value: &Value) -> Result<AttributeValue> {
    Ok(match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Int(i),
            None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AttributeValue::String(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(Error::InvalidTable(format!(
                "property {} holds a nested value",
                key
            )))
        }
    })
}

fn value_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => json!(b),
        AttributeValue::Int(i) => json!(i),
        // NaN sentinels and infinities have no JSON form.
        AttributeValue::Float(f) if f.is_finite() => json!(f),
        AttributeValue::Float(_) => Value::Null,
        AttributeValue::String(s) => json!(s),
    }
}

/// Serialize a table to a GeoJSON-compatible value.
pub fn table_to_json(table: &FeatureTable) -> Value {
    let features: Vec<Value> = table
        .features
        .iter()
        .map(|feature| {
            let properties: Map<String, Value> = table
                .fields
                .iter()
                .map(|field| (field.name.clone(), value_to_json(feature.get(&field.name))))
                .collect();

            let geometry = match feature.geometry {
                Some(p) => json!({"type": "Point", "coordinates": [p.x(), p.y()]}),
                None => Value::Null,
            };

            json!({
                "type": "Feature",
                "id": feature.fid,
                "geometry": geometry,
                "properties": properties,
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "name": table.name,
        "generated": Utc::now().to_rfc3339(),
        "fields": table.fields,
        "features": features,
    })
}
