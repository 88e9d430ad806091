#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for household lookups around works locations.
//!
//! Postcode unit points are loaded from `DuckDB` (or supplied directly) and
//! bulk-loaded into an R-tree keyed on British National Grid coordinates.
//! Distances are therefore planar metres, with no reprojection.

use geo::{Centroid, Geometry, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use street_impact_wellbeing_models::PostcodeUnit;
use thiserror::Error;
use wkt::TryFromWkt;

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("Invalid WKT '{wkt}': {message}")]
    InvalidWkt { wkt: String, message: String },
    #[error("Geometry has no centroid: {0}")]
    EmptyGeometry(String),
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),
}

/// Parses a WKT geometry and returns its centroid.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidWkt`] if `wkt` does not parse and
/// [`SpatialError::EmptyGeometry`] if the geometry is empty.
pub fn centroid_from_wkt(wkt: &str) -> Result<Point<f64>, SpatialError> {
    let geometry =
        Geometry::<f64>::try_from_wkt_str(wkt).map_err(|e| SpatialError::InvalidWkt {
            wkt: wkt.to_string(),
            message: e.to_string(),
        })?;

    geometry
        .centroid()
        .ok_or_else(|| SpatialError::EmptyGeometry(wkt.to_string()))
}

type PostcodePoint = GeomWithData<[f64; 2], usize>;

/// R-tree over postcode unit points.
pub struct PostcodeIndex {
    units: Vec<PostcodeUnit>,
    tree: RTree<PostcodePoint>,
}

impl PostcodeIndex {
    /// Builds the index from postcode units. Units with non-finite
    /// coordinates are skipped.
    #[must_use]
    pub fn from_units(units: Vec<PostcodeUnit>) -> Self {
        let units: Vec<PostcodeUnit> = units
            .into_iter()
            .filter(|u| u.easting.is_finite() && u.northing.is_finite())
            .collect();

        let points = units
            .iter()
            .enumerate()
            .map(|(i, u)| GeomWithData::new([u.easting, u.northing], i))
            .collect();

        Self {
            tree: RTree::bulk_load(points),
            units,
        }
    }

    /// Loads every postcode unit with a grid reference from the warehouse.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load(conn: &duckdb::Connection) -> Result<Self, SpatialError> {
        let mut stmt = conn.prepare(
            "SELECT postcode, easting, northing, population, households \
             FROM postcodes \
             WHERE easting IS NOT NULL AND northing IS NOT NULL \
             ORDER BY postcode",
        )?;
        let mut rows = stmt.query([])?;
        let mut units = Vec::new();

        while let Some(row) = rows.next()? {
            let population: Option<i64> = row.get(3)?;
            let households: Option<i64> = row.get(4)?;
            units.push(PostcodeUnit {
                postcode: row.get(0)?,
                easting: row.get(1)?,
                northing: row.get(2)?,
                population: clamp_count(population),
                households: clamp_count(households),
            });
        }

        let index = Self::from_units(units);
        log::info!("Loaded {} postcode units into spatial index", index.len());
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Total households of every unit within `radius_metres` of `centre`.
    #[must_use]
    pub fn households_within(&self, centre: Point<f64>, radius_metres: f64) -> u64 {
        self.tree
            .locate_within_distance([centre.x(), centre.y()], radius_metres * radius_metres)
            .filter_map(|point| self.units.get(point.data))
            .map(|unit| u64::from(unit.households))
            .sum()
    }
}

fn clamp_count(value: Option<i64>) -> u32 {
    value.map_or(0, |v| u32::try_from(v.max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(postcode: &str, easting: f64, northing: f64, households: u32) -> PostcodeUnit {
        PostcodeUnit {
            postcode: postcode.to_string(),
            easting,
            northing,
            population: households * 2,
            households,
        }
    }

    #[test]
    fn point_centroid_is_the_point() {
        let centre = centroid_from_wkt("POINT(430000 433000)").unwrap();
        assert!((centre.x() - 430_000.0).abs() < 1e-9);
        assert!((centre.y() - 433_000.0).abs() < 1e-9);
    }

    #[test]
    fn linestring_centroid_is_midpoint() {
        let centre = centroid_from_wkt("LINESTRING(0 0, 100 0)").unwrap();
        assert!((centre.x() - 50.0).abs() < 1e-9);
        assert!(centre.y().abs() < 1e-9);
    }

    #[test]
    fn invalid_and_empty_wkt_are_errors() {
        assert!(matches!(
            centroid_from_wkt("POINT(abc"),
            Err(SpatialError::InvalidWkt { .. })
        ));
        assert!(centroid_from_wkt("LINESTRING EMPTY").is_err());
    }

    #[test]
    fn buffer_is_inclusive() {
        let index = PostcodeIndex::from_units(vec![
            unit("LS1 1AA", 500.0, 0.0, 40),
            unit("LS1 1AB", 0.0, 300.0, 80),
            unit("LS1 1AC", 500.1, 0.0, 1000),
        ]);

        let centre = Point::new(0.0, 0.0);
        assert_eq!(index.households_within(centre, 500.0), 120);
        assert_eq!(index.households_within(centre, 500.1), 1120);
    }

    #[test]
    fn skips_units_without_finite_coordinates() {
        let index = PostcodeIndex::from_units(vec![
            unit("A", f64::NAN, 0.0, 10),
            unit("B", 1.0, 1.0, 10),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.households_within(Point::new(1.0, 1.0), 0.0), 10);
    }

    #[test]
    fn empty_index_finds_nothing() {
        let index = PostcodeIndex::from_units(Vec::new());
        assert!(index.is_empty());
        assert_eq!(index.households_within(Point::new(0.0, 0.0), 500.0), 0);
    }
}
