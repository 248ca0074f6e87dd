//! Chained near analysis.
//!
//! For every near layer, finds each input feature's nearest near feature
//! and stores distance, location, angle and object id in a layer-specific
//! set of fields (`DIST_<layer>`, `X_<layer>`, `Y_<layer>`,
//! `ANGLE_<layer>`, `FID_<layer>`). Unlike a single near pass, which only
//! keeps the closest feature across all layers, each layer gets its own
//! columns.

use crate::analysis::kdtree::KdTree;
use crate::error::{Error, Result};
use crate::models::{validate_field_name, AttributeValue, FeatureTable, FieldType};
use geo::{HaversineBearing, HaversineDistance, Point};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Value written to distance, coordinate and fid fields when no near
/// feature is found within the search radius.
pub const NOT_FOUND: f64 = -1.0;

/// Distance method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NearMethod {
    /// Euclidean distance in the table's coordinate units
    #[default]
    Planar,
    /// Great-circle distance in meters over lon/lat coordinates
    Geodesic,
}

/// Options shared by every near layer in a run.
#[derive(Debug, Clone)]
pub struct NearOptions {
    /// Ignore near features farther than this (same units as the method).
    pub search_radius: Option<f64>,
    /// Write `X_` / `Y_` fields.
    pub location: bool,
    /// Write `ANGLE_` fields.
    pub angle: bool,
    /// Write `FID_` fields.
    pub fid: bool,
    pub method: NearMethod,
    /// Maximum length of generated field names.
    pub max_field_length: usize,
}

impl Default for NearOptions {
    fn default() -> Self {
        Self {
            search_radius: None,
            location: false,
            angle: false,
            fid: false,
            method: NearMethod::Planar,
            max_field_length: 64,
        }
    }
}

impl NearOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(radius) = self.search_radius {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(Error::InvalidParameter {
                    name: "search_radius",
                    value: radius.to_string(),
                    reason: "must be a positive number".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Nearest near feature for one input feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearHit {
    pub distance: f64,
    pub location: Point<f64>,
    /// Planar: degrees counter-clockwise from east.
    /// Geodesic: bearing in degrees clockwise from north.
    pub angle: f64,
    pub fid: i64,
}

/// Field names written for one near layer.
#[derive(Debug, Clone)]
pub struct LayerFields {
    pub layer: String,
    pub distance: String,
    pub x: Option<String>,
    pub y: Option<String>,
    pub angle: Option<String>,
    pub fid: Option<String>,
}

impl LayerFields {
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(self.distance.as_str())
            .chain(self.x.as_deref())
            .chain(self.y.as_deref())
            .chain(self.angle.as_deref())
            .chain(self.fid.as_deref())
            .collect()
    }
}

/// Find each input feature's nearest feature in `near`.
///
/// The result is parallel to `input.features`; `None` means no geometry on
/// the input feature, no geometry in the layer, or nothing within the
/// search radius.
pub fn find_nearest(
    input: &FeatureTable,
    near: &FeatureTable,
    options: &NearOptions,
) -> Vec<Option<NearHit>> {
    let candidates: Vec<(Point<f64>, i64)> = near
        .features
        .iter()
        .filter_map(|f| f.geometry.map(|g| (g, f.fid)))
        .collect();

    if candidates.is_empty() {
        warn!("Near layer {} has no point geometries", near.name);
        return vec![None; input.features.len()];
    }

    let points: Vec<Point<f64>> = candidates.iter().map(|(p, _)| *p).collect();
    let tree = match options.method {
        NearMethod::Planar => Some(KdTree::build(&points)),
        NearMethod::Geodesic => None,
    };

    input
        .features
        .iter()
        .map(|feature| {
            let origin = feature.geometry?;

            let (index, distance) = match &tree {
                Some(tree) => {
                    let nearest = tree.nearest(origin.x(), origin.y())?;
                    (nearest.index, nearest.distance_sq.sqrt())
                }
                None => nearest_geodesic(&origin, &points)?,
            };

            if let Some(radius) = options.search_radius {
                if distance > radius {
                    return None;
                }
            }

            let location = points[index];
            let angle = match options.method {
                NearMethod::Planar => {
                    (location.y() - origin.y())
                        .atan2(location.x() - origin.x())
                        .to_degrees()
                }
                NearMethod::Geodesic if distance > 0.0 => origin.haversine_bearing(location),
                NearMethod::Geodesic => 0.0,
            };

            Some(NearHit {
                distance,
                location,
                angle,
                fid: candidates[index].1,
            })
        })
        .collect()
}

/// Linear scan by haversine distance; ties go to the earlier point.
fn nearest_geodesic(origin: &Point<f64>, points: &[Point<f64>]) -> Option<(usize, f64)> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, origin.haversine_distance(p)))
        .fold(None, |best, (i, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((i, d)),
        })
}

/// Run near analysis against one layer and write its fields onto `input`.
pub fn apply_near_layer(
    input: &mut FeatureTable,
    near: &FeatureTable,
    options: &NearOptions,
) -> LayerFields {
    let layer = near.name.clone();
    info!(
        "Conducting NEAR Analysis with input feature class ({}) and near feature ({}).",
        input.name, layer
    );

    let hits = find_nearest(input, near, options);

    info!("Calculating Near Feature specific fields for {}.", layer);
    let mut add = |prefix: &str, enabled: bool| -> Option<String> {
        if !enabled {
            return None;
        }
        let raw = format!("{}_{}", prefix, layer);
        let valid = validate_field_name(&raw, options.max_field_length);
        Some(input.add_field(&valid, FieldType::Double, Some(&raw)))
    };

    let fields = LayerFields {
        distance: add("DIST", true).unwrap_or_default(),
        x: add("X", options.location),
        y: add("Y", options.location),
        angle: add("ANGLE", options.angle),
        fid: add("FID", options.fid),
        layer,
    };

    let mut found = 0usize;
    for (feature, hit) in input.features.iter_mut().zip(&hits) {
        let (distance, x, y, angle, fid) = match hit {
            Some(hit) => {
                found += 1;
                (
                    hit.distance,
                    hit.location.x(),
                    hit.location.y(),
                    hit.angle,
                    hit.fid as f64,
                )
            }
            None => (NOT_FOUND, NOT_FOUND, NOT_FOUND, 0.0, NOT_FOUND),
        };

        feature.set(fields.distance.clone(), AttributeValue::Float(distance));
        if let Some(name) = &fields.x {
            feature.set(name.clone(), AttributeValue::Float(x));
        }
        if let Some(name) = &fields.y {
            feature.set(name.clone(), AttributeValue::Float(y));
        }
        if let Some(name) = &fields.angle {
            feature.set(name.clone(), AttributeValue::Float(angle));
        }
        if let Some(name) = &fields.fid {
            feature.set(name.clone(), AttributeValue::Float(fid));
        }
    }

    debug!(
        "Layer {}: {} of {} features matched",
        fields.layer,
        found,
        input.features.len()
    );
    fields
}

/// Near analysis with one field set per near layer.
pub fn chained_near_analysis(
    input: &mut FeatureTable,
    layers: &[FeatureTable],
    options: &NearOptions,
    progress: &ProgressBar,
) -> Result<Vec<LayerFields>> {
    options.validate()?;

    let mut written = Vec::with_capacity(layers.len());
    for layer in layers {
        progress.set_message(layer.name.clone());
        written.push(apply_near_layer(input, layer, options));
        progress.inc(1);
    }

    Ok(written)
}

/// Split a near table into one layer per truthy unique value of
/// `filter_field`. Layers are named `F_<value>`.
pub fn filter_layers(near: &FeatureTable, filter_field: &str) -> Result<Vec<FeatureTable>> {
    let values = near.unique_values(filter_field, true)?;
    debug!(
        "{} unique values of {} in {}",
        values.len(),
        filter_field,
        near.name
    );

    values
        .iter()
        .map(|value| near.filter_by_value(filter_field, value, &format!("F_{}", value)))
        .collect()
}

/// Near analysis with one field set per unique value of a field in a
/// single near table.
pub fn chained_near_analysis_filter(
    input: &mut FeatureTable,
    near: &FeatureTable,
    filter_field: &str,
    options: &NearOptions,
    progress: &ProgressBar,
) -> Result<Vec<LayerFields>> {
    let layers = filter_layers(near, filter_field)?;
    progress.set_length(layers.len() as u64);
    chained_near_analysis(input, &layers, options, progress)
}
