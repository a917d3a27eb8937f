//! Boundary Loader - GeoJSON FeatureCollection to `RegionPolygon`s
//!
//! Responsibilities:
//! - Parse the collection and its (legacy) `crs` member
//! - Resolve one region identifier per feature
//! - Accept Polygon / MultiPolygon geometry, skip null geometry
//! - Reproject every coordinate into the working reference system
//!
//! The resulting `BoundarySet` is immutable for the rest of the run and keeps
//! the dataset's feature order, which the spatial filter's tie-break relies on.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::BoundaryParseError;
use crate::geometry::{Crs, WORKING_CRS};

/// One region of the boundary dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolygon {
    pub region_id: String,
    pub boundary: MultiPolygon<f64>,
    pub crs: Crs,
}

/// All regions of one boundary dataset, in dataset order.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    regions: Vec<RegionPolygon>,
    source_crs: Crs,
}

impl BoundarySet {
    pub fn new(regions: Vec<RegionPolygon>, source_crs: Crs) -> Self {
        Self {
            regions,
            source_crs,
        }
    }

    pub fn regions(&self) -> &[RegionPolygon] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Reference system the dataset was declared in, before reprojection.
    pub fn source_crs(&self) -> Crs {
        self.source_crs
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoundaryOptions {
    /// Read the region id from this property instead of the feature `id`.
    pub region_id_property: Option<String>,
}

// =============================================================================
// GeoJSON document shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct CollectionDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<CrsDoc>,
    #[serde(default)]
    features: Vec<FeatureDoc>,
}

#[derive(Debug, Deserialize)]
struct CrsDoc {
    #[serde(default)]
    properties: Option<CrsProperties>,
}

#[derive(Debug, Deserialize)]
struct CrsProperties {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureDoc {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    geometry: Option<GeometryDoc>,
}

#[derive(Debug, Deserialize)]
struct GeometryDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

type Position = Vec<f64>;
type PolygonCoords = Vec<Vec<Position>>;

/// Parse a boundary dataset into regions in the working reference system.
pub fn load_boundaries(
    bytes: &[u8],
    options: &BoundaryOptions,
) -> Result<BoundarySet, BoundaryParseError> {
    let doc: CollectionDoc = serde_json::from_slice(bytes)?;
    if doc.kind != "FeatureCollection" {
        return Err(BoundaryParseError::NotFeatureCollection(doc.kind));
    }

    let source_crs = match doc
        .crs
        .and_then(|c| c.properties)
        .and_then(|p| p.name)
    {
        Some(name) => {
            Crs::from_name(&name).ok_or_else(|| BoundaryParseError::UnsupportedCrs(name.clone()))?
        }
        // RFC 7946: no crs member means OGC:CRS84.
        None => Crs::Wgs84,
    };

    let mut regions = Vec::with_capacity(doc.features.len());
    let mut skipped = 0usize;

    for (index, mut feature) in doc.features.into_iter().enumerate() {
        // Null geometry is skipped before the id is required.
        let Some(geometry) = feature.geometry.take() else {
            warn!(index, "feature without geometry skipped");
            skipped += 1;
            continue;
        };

        let region_id = region_id_of(&feature, options)
            .ok_or(BoundaryParseError::MissingRegionId { index })?;

        let malformed = |reason: String| BoundaryParseError::MalformedCoordinates {
            index,
            region_id: region_id.clone(),
            reason,
        };

        let boundary = match geometry.kind.as_str() {
            "Polygon" => {
                let coords: PolygonCoords = serde_json::from_value(geometry.coordinates)
                    .map_err(|e| malformed(e.to_string()))?;
                MultiPolygon::new(vec![to_polygon(coords, source_crs).map_err(&malformed)?])
            }
            "MultiPolygon" => {
                let coords: Vec<PolygonCoords> = serde_json::from_value(geometry.coordinates)
                    .map_err(|e| malformed(e.to_string()))?;
                let polygons = coords
                    .into_iter()
                    .map(|p| to_polygon(p, source_crs))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(&malformed)?;
                MultiPolygon::new(polygons)
            }
            other => {
                return Err(BoundaryParseError::UnsupportedGeometry {
                    index,
                    region_id,
                    kind: other.to_string(),
                })
            }
        };

        regions.push(RegionPolygon {
            region_id,
            boundary,
            crs: WORKING_CRS,
        });
    }

    if regions.is_empty() {
        return Err(BoundaryParseError::Empty);
    }

    info!(
        regions = regions.len(),
        skipped,
        source_crs = %source_crs,
        working_crs = %WORKING_CRS,
        "Boundary dataset loaded"
    );

    Ok(BoundarySet::new(regions, source_crs))
}

fn region_id_of(feature: &FeatureDoc, options: &BoundaryOptions) -> Option<String> {
    let value = match &options.region_id_property {
        Some(prop) => feature.properties.as_ref()?.get(prop)?,
        None => feature.id.as_ref()?,
    };
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn to_polygon(rings: PolygonCoords, crs: Crs) -> Result<Polygon<f64>, String> {
    let mut rings = rings.into_iter().map(|r| to_ring(r, crs));
    let exterior = rings.next().ok_or_else(|| "polygon has no rings".to_string())??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn to_ring(positions: Vec<Position>, crs: Crs) -> Result<LineString<f64>, String> {
    if positions.len() < 3 {
        return Err(format!("ring has {} positions, need at least 3", positions.len()));
    }
    let coords = positions
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Ok(crs.to_working(*x, *y)),
            _ => Err(format!("invalid position {:?}", p)),
        })
        .collect::<Result<Vec<Coord<f64>>, String>>()?;
    Ok(LineString::new(coords))
}
