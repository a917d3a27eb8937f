//! Spatial Filter - keep records whose point intersects a region
//!
//! Region polygons are indexed by bounding box in an R-tree; a point query
//! returns candidate regions, which are then tested exactly with `Intersects`
//! (a point on a shared edge intersects both neighbours).
//!
//! Tie-break: when several regions intersect a point, the region that comes
//! first in the boundary dataset wins. Candidates are sorted by dataset
//! position before the exact test, so attribution does not depend on R-tree
//! traversal order or on thread scheduling.

use geo::{BoundingRect, Intersects, Point};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use tracing::{debug, info, warn};

use crate::boundary::{BoundarySet, RegionPolygon};
use crate::error::InvalidCoordinateError;
use crate::geometry::record_point;
use crate::record::EventRecord;

/// Per-record coordinate warnings printed before the rest are summarised.
const MAX_COORDINATE_WARNINGS: usize = 5;

/// Bounding box of one region, pointing back at its dataset position.
#[derive(Debug, Clone)]
struct RegionEnvelope {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Immutable region index shared by every evaluation of a run.
#[derive(Debug)]
pub struct SpatialFilter {
    boundaries: BoundarySet,
    tree: RTree<RegionEnvelope>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub evaluated: usize,
    pub invalid_coordinates: usize,
    pub outside_boundaries: usize,
    pub retained: usize,
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub records: Vec<EventRecord>,
    pub stats: FilterStats,
}

enum Evaluation {
    Retained(EventRecord),
    InvalidCoordinate {
        event_id: String,
        error: InvalidCoordinateError,
    },
    Outside,
}

impl SpatialFilter {
    pub fn new(boundaries: BoundarySet) -> Self {
        let envelopes = boundaries
            .regions()
            .iter()
            .enumerate()
            .filter_map(|(idx, region)| {
                let rect = region.boundary.bounding_rect()?;
                Some(RegionEnvelope {
                    idx,
                    env: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            boundaries,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn boundaries(&self) -> &BoundarySet {
        &self.boundaries
    }

    /// First region (in dataset order) that the point intersects.
    pub fn locate(&self, point: &Point<f64>) -> Option<&RegionPolygon> {
        let mut candidates: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.x(), point.y()]))
            .map(|e| e.idx)
            .collect();
        candidates.sort_unstable();

        let regions = self.boundaries.regions();
        candidates
            .into_iter()
            .map(|idx| &regions[idx])
            .find(|region| region.boundary.intersects(point))
    }

    /// Filter records to those inside some region, attaching the point
    /// geometry and the matched `region_id`.
    ///
    /// Output order follows input order on both the sequential and the
    /// parallel path.
    pub fn filter(&self, records: Vec<EventRecord>, parallel: bool) -> FilterOutcome {
        let evaluations: Vec<Evaluation> = if parallel {
            records.into_par_iter().map(|r| self.evaluate(r)).collect()
        } else {
            records.into_iter().map(|r| self.evaluate(r)).collect()
        };

        let mut stats = FilterStats {
            evaluated: evaluations.len(),
            ..FilterStats::default()
        };
        let mut retained = Vec::with_capacity(evaluations.len());

        for evaluation in evaluations {
            match evaluation {
                Evaluation::Retained(record) => retained.push(record),
                Evaluation::InvalidCoordinate { event_id, error } => {
                    stats.invalid_coordinates += 1;
                    if stats.invalid_coordinates <= MAX_COORDINATE_WARNINGS {
                        warn!(event_id = %event_id, "excluded: {}", error);
                    }
                }
                Evaluation::Outside => stats.outside_boundaries += 1,
            }
        }
        if stats.invalid_coordinates > MAX_COORDINATE_WARNINGS {
            warn!(
                "  ... and {} more coordinate exclusions",
                stats.invalid_coordinates - MAX_COORDINATE_WARNINGS
            );
        }
        stats.retained = retained.len();

        info!(
            evaluated = stats.evaluated,
            retained = stats.retained,
            invalid_coordinates = stats.invalid_coordinates,
            outside = stats.outside_boundaries,
            regions = self.boundaries.len(),
            "Spatial filter applied"
        );

        FilterOutcome {
            records: retained,
            stats,
        }
    }

    fn evaluate(&self, mut record: EventRecord) -> Evaluation {
        record.clear_enrichment();

        let point = match record_point(&record) {
            Ok(p) => p,
            Err(error) => {
                return Evaluation::InvalidCoordinate {
                    event_id: record.event_id,
                    error,
                }
            }
        };

        match self.locate(&point) {
            Some(region) => {
                record.region_id = Some(region.region_id.clone());
                record.geometry = Some(point);
                Evaluation::Retained(record)
            }
            None => {
                debug!(event_id = %record.event_id, "outside all regions");
                Evaluation::Outside
            }
        }
    }
}
