//! Geometry Builder and reference-system handling.
//!
//! All geometry in a run is expressed in the working reference system,
//! WGS84 longitude/latitude in degrees (x = longitude, y = latitude).

use std::fmt;

use geo::{Coord, Point};

use crate::error::InvalidCoordinateError;
use crate::record::EventRecord;

/// WGS84 semi-major axis used by the spherical Web Mercator projection.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Reference systems a boundary dataset may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326 / OGC:CRS84, longitude first as GeoJSON always writes it.
    Wgs84,
    /// EPSG:4269. Differs from WGS84 by about a metre, below filter precision.
    Nad83,
    /// EPSG:3857, metres.
    WebMercator,
}

/// The reference system event points are built in.
pub const WORKING_CRS: Crs = Crs::Wgs84;

impl Crs {
    /// Resolve a CRS name as written in a GeoJSON `crs` member.
    ///
    /// Accepts short (`EPSG:4326`), URN (`urn:ogc:def:crs:EPSG::4326`) and
    /// CRS84 (`urn:ogc:def:crs:OGC:1.3:CRS84`) spellings.
    pub fn from_name(name: &str) -> Option<Crs> {
        let upper = name.trim().to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Some(Crs::Wgs84);
        }
        let code = upper.rsplit(':').next()?;
        match code {
            "4326" => Some(Crs::Wgs84),
            "4269" => Some(Crs::Nad83),
            "3857" | "900913" | "3785" => Some(Crs::WebMercator),
            _ => None,
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Nad83 => 4269,
            Crs::WebMercator => 3857,
        }
    }

    /// Convert one coordinate from this system into the working system.
    pub fn to_working(&self, x: f64, y: f64) -> Coord<f64> {
        match self {
            Crs::Wgs84 | Crs::Nad83 => Coord { x, y },
            Crs::WebMercator => {
                let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
                let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                Coord { x: lon, y: lat }
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Build the point for a latitude/longitude pair. Out-of-range values are
/// rejected, never clamped.
pub fn build_point(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Point<f64>, InvalidCoordinateError> {
    let lat = latitude
        .filter(|v| v.is_finite())
        .ok_or(InvalidCoordinateError::MissingLatitude)?;
    let lon = longitude
        .filter(|v| v.is_finite())
        .ok_or(InvalidCoordinateError::MissingLongitude)?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err(InvalidCoordinateError::LatitudeOutOfRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(InvalidCoordinateError::LongitudeOutOfRange(lon));
    }

    Ok(Point::new(lon, lat))
}

/// Point geometry of a record in the working reference system.
pub fn record_point(record: &EventRecord) -> Result<Point<f64>, InvalidCoordinateError> {
    build_point(record.latitude, record.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_coordinates_equal_input() {
        let p = build_point(Some(38.8951), Some(-77.0364)).unwrap();
        assert_eq!(p.x(), -77.0364);
        assert_eq!(p.y(), 38.8951);
    }

    #[test]
    fn test_range_limits_are_inclusive() {
        assert!(build_point(Some(90.0), Some(180.0)).is_ok());
        assert!(build_point(Some(-90.0), Some(-180.0)).is_ok());
    }

    #[test]
    fn test_out_of_range_is_rejected_not_clamped() {
        assert_eq!(
            build_point(Some(10.0), Some(400.0)),
            Err(InvalidCoordinateError::LongitudeOutOfRange(400.0))
        );
        assert_eq!(
            build_point(Some(-90.5), Some(0.0)),
            Err(InvalidCoordinateError::LatitudeOutOfRange(-90.5))
        );
    }

    #[test]
    fn test_missing_values_are_rejected() {
        assert_eq!(
            build_point(None, Some(1.0)),
            Err(InvalidCoordinateError::MissingLatitude)
        );
        assert_eq!(
            build_point(Some(1.0), None),
            Err(InvalidCoordinateError::MissingLongitude)
        );
        assert_eq!(
            build_point(Some(f64::NAN), Some(1.0)),
            Err(InvalidCoordinateError::MissingLatitude)
        );
    }

    #[test]
    fn test_crs_names() {
        assert_eq!(Crs::from_name("EPSG:4326"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_name("urn:ogc:def:crs:EPSG::4326"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_name("urn:ogc:def:crs:EPSG::4269"), Some(Crs::Nad83));
        assert_eq!(Crs::from_name("EPSG:3857"), Some(Crs::WebMercator));
        assert_eq!(Crs::from_name("EPSG:27700"), None);
        assert_eq!(Crs::Nad83.to_string(), "EPSG:4269");
    }

    #[test]
    fn test_web_mercator_inverse() {
        let origin = Crs::WebMercator.to_working(0.0, 0.0);
        assert!(origin.x.abs() < 1e-12);
        assert!(origin.y.abs() < 1e-12);

        // Washington DC, forward-projected with the spherical formula.
        let c = Crs::WebMercator.to_working(-8_575_663.952_5, 4_707_028.550_8);
        assert!((c.x - (-77.0365)).abs() < 1e-4, "lon {}", c.x);
        assert!((c.y - 38.8977).abs() < 1e-4, "lat {}", c.y);
    }
}
