//! Geo part indexing: turn a bounding box into the set of grid cells it covers
//! and into the sub-select that finds the tours touching those cells.
//!
//! Two strategies produce the same logical coverage:
//!
//! - **Enumerate** (narrow boxes): every cell id is listed, `GeoPart IN (?, ...)`.
//! - **Row ranges** (wide boxes): one inclusive `[first, last]` id pair per
//!   latitude row, `(GeoPart >= ? AND GeoPart <= ?) OR ...`. Ids within a row
//!   are contiguous because the longitude occupies the low digits.

use crate::config::Config;
use crate::grid::{GeoBoundingBox, GeoPartId};
use crate::query::{SqlStatement, SqlWriter};

pub const TOUR_GEO_PARTS_TABLE: &str = "TOURGEOPARTS";

/// Size of one grid cell in E2 units (0.01°).
pub const GRID_SIZE_E2: i32 = 1;

/// Default longitude width (in cells) from which row ranges are used.
pub const DEFAULT_NARROW_WIDTH_THRESHOLD: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStrategy {
    Enumerate,
    RowRanges,
}

/// Cells covered by a bounding box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoPartCoverage {
    /// Every covered cell, longitude-major order.
    Parts(Vec<GeoPartId>),
    /// One inclusive `(first, last)` pair per latitude row, south to north.
    RowRanges(Vec<(GeoPartId, GeoPartId)>),
}

impl GeoPartCoverage {
    pub fn strategy(&self) -> IndexStrategy {
        match self {
            GeoPartCoverage::Parts(_) => IndexStrategy::Enumerate,
            GeoPartCoverage::RowRanges(_) => IndexStrategy::RowRanges,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            GeoPartCoverage::Parts(parts) => parts.is_empty(),
            GeoPartCoverage::RowRanges(rows) => rows.is_empty(),
        }
    }

    /// Number of values bound into the generated query.
    pub fn param_count(&self) -> usize {
        match self {
            GeoPartCoverage::Parts(parts) => parts.len(),
            GeoPartCoverage::RowRanges(rows) => rows.len() * 2,
        }
    }

    /// Number of grid cells represented.
    pub fn part_count(&self) -> usize {
        match self {
            GeoPartCoverage::Parts(parts) => parts.len(),
            GeoPartCoverage::RowRanges(rows) => rows
                .iter()
                .map(|(first, last)| (last.value() - first.value() + 1) as usize)
                .sum(),
        }
    }

    /// Membership test with the same semantics as the generated SQL.
    pub fn contains(&self, part: GeoPartId) -> bool {
        match self {
            GeoPartCoverage::Parts(parts) => parts.contains(&part),
            GeoPartCoverage::RowRanges(rows) => rows
                .iter()
                .any(|(first, last)| part >= *first && part <= *last),
        }
    }

    /// Expand into individual cell ids.
    pub fn parts(&self) -> Vec<GeoPartId> {
        match self {
            GeoPartCoverage::Parts(parts) => parts.clone(),
            GeoPartCoverage::RowRanges(rows) => rows
                .iter()
                .flat_map(|(first, last)| (first.value()..=last.value()).map(GeoPartId::from_raw))
                .collect(),
        }
    }
}

/// `SELECT DISTINCT TourId FROM TOURGEOPARTS WHERE <coverage>`.
///
/// Never empty: the indexer returns `None` instead of a select without cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoPartSelect {
    coverage: GeoPartCoverage,
}

impl GeoPartSelect {
    pub fn coverage(&self) -> &GeoPartCoverage {
        &self.coverage
    }

    pub fn write_sql(&self, w: &mut SqlWriter) {
        w.push("SELECT DISTINCT TourId FROM ")
            .push(TOUR_GEO_PARTS_TABLE)
            .push(" WHERE ");

        match &self.coverage {
            GeoPartCoverage::Parts(parts) => {
                w.push("GeoPart IN (").bind_list(parts.iter().copied()).push(")");
            }
            GeoPartCoverage::RowRanges(rows) => {
                for (index, (first, last)) in rows.iter().enumerate() {
                    if index > 0 {
                        w.push(" OR ");
                    }
                    w.push("(GeoPart >= ")
                        .bind(*first)
                        .push(" AND GeoPart <= ")
                        .bind(*last)
                        .push(")");
                }
            }
        }
    }

    pub fn to_sql(&self) -> SqlStatement {
        let mut w = SqlWriter::new();
        self.write_sql(&mut w);
        w.finish()
    }
}

/// Computes geo part coverage for bounding boxes. Pure, never touches a store.
#[derive(Debug, Clone, Copy)]
pub struct GeoPartIndexer {
    narrow_width_threshold: i32,
}

impl GeoPartIndexer {
    pub fn new(narrow_width_threshold: i32) -> Self {
        Self {
            narrow_width_threshold: narrow_width_threshold.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.narrow_width_threshold)
    }

    pub fn strategy_for(&self, bbox: &GeoBoundingBox) -> IndexStrategy {
        if bbox.width_e2() < self.narrow_width_threshold {
            IndexStrategy::Enumerate
        } else {
            IndexStrategy::RowRanges
        }
    }

    /// Cells of `[lat2, lat1) x [lon1, lon2)` in normalized E2 space.
    pub fn coverage(&self, bbox: &GeoBoundingBox) -> GeoPartCoverage {
        if !bbox.top_left.is_valid() || !bbox.bottom_right.is_valid() {
            log::warn!("Box {:?} lies outside the geo part grid", bbox);
            return GeoPartCoverage::Parts(Vec::new());
        }

        let lon1 = bbox.top_left.normalized_lon();
        let lon2 = bbox.bottom_right.normalized_lon();
        let lat1 = bbox.top_left.normalized_lat();
        let lat2 = bbox.bottom_right.normalized_lat();

        let step = GRID_SIZE_E2 as usize;

        match self.strategy_for(bbox) {
            IndexStrategy::Enumerate => {
                let mut parts = Vec::new();
                for lon in (lon1..lon2).step_by(step) {
                    for lat in (lat2..lat1).step_by(step) {
                        parts.push(GeoPartId::from_normalized(lat, lon));
                    }
                }
                GeoPartCoverage::Parts(parts)
            }
            IndexStrategy::RowRanges => {
                let lon_last = lon2 - GRID_SIZE_E2;
                let rows = (lat2..lat1)
                    .step_by(step)
                    .map(|lat| {
                        (
                            GeoPartId::from_normalized(lat, lon1),
                            GeoPartId::from_normalized(lat, lon_last),
                        )
                    })
                    .collect();
                GeoPartCoverage::RowRanges(rows)
            }
        }
    }

    /// Sub-select of the tours inside `bbox`, or `None` when no cell is covered.
    pub fn select(&self, bbox: &GeoBoundingBox) -> Option<GeoPartSelect> {
        let coverage = self.coverage(bbox);
        if coverage.is_empty() {
            log::debug!("No geo parts covered by {:?}, skipping query", bbox);
            return None;
        }
        Some(GeoPartSelect { coverage })
    }
}

impl Default for GeoPartIndexer {
    fn default() -> Self {
        Self::new(DEFAULT_NARROW_WIDTH_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoPointE2;
    use crate::query::QueryParam;

    fn bbox(tl_lat: f64, tl_lon: f64, br_lat: f64, br_lon: f64) -> GeoBoundingBox {
        GeoBoundingBox::from_degrees(tl_lat, tl_lon, br_lat, br_lon).unwrap()
    }

    #[test]
    fn test_wide_box_uses_row_ranges() {
        let indexer = GeoPartIndexer::default();
        let b = bbox(47.50, 8.00, 47.40, 8.20);

        let coverage = indexer.coverage(&b);
        assert_eq!(coverage.strategy(), IndexStrategy::RowRanges);

        let GeoPartCoverage::RowRanges(rows) = &coverage else {
            panic!("expected row ranges");
        };
        assert_eq!(rows.len(), 10);
        assert_eq!(coverage.param_count(), 20);
        assert_eq!(coverage.part_count(), 200);

        // first row is the southern one
        assert_eq!(rows[0].0, GeoPartId::from_normalized(13_740, 18_800));
        assert_eq!(rows[0].1, GeoPartId::from_normalized(13_740, 18_819));
        assert_eq!(rows[9].0, GeoPartId::from_normalized(13_749, 18_800));
    }

    #[test]
    fn test_narrow_box_enumerates_every_part() {
        let indexer = GeoPartIndexer::default();
        let b = bbox(47.50, 8.00, 47.40, 8.03);

        let coverage = indexer.coverage(&b);
        assert_eq!(coverage.strategy(), IndexStrategy::Enumerate);
        assert_eq!(coverage.param_count(), 30);

        let GeoPartCoverage::Parts(parts) = &coverage else {
            panic!("expected parts");
        };
        // longitude-major, latitude ascending inside each column
        assert_eq!(parts[0], GeoPartId::from_normalized(13_740, 18_800));
        assert_eq!(parts[1], GeoPartId::from_normalized(13_741, 18_800));
        assert_eq!(parts[10], GeoPartId::from_normalized(13_740, 18_801));
    }

    #[test]
    fn test_threshold_boundary() {
        let indexer = GeoPartIndexer::default();
        assert_eq!(
            indexer.strategy_for(&bbox(1.0, 0.0, 0.0, 0.03)),
            IndexStrategy::Enumerate
        );
        assert_eq!(
            indexer.strategy_for(&bbox(1.0, 0.0, 0.0, 0.04)),
            IndexStrategy::RowRanges
        );
    }

    #[test]
    fn test_all_parts_fall_inside_the_box() {
        let indexer = GeoPartIndexer::default();
        for b in [
            bbox(47.50, 8.00, 47.40, 8.20),
            bbox(-33.10, 151.00, -33.20, 151.02),
            bbox(0.05, -0.05, -0.05, 0.05),
        ] {
            let coverage = indexer.coverage(&b);
            assert!(!coverage.is_empty());
            assert_eq!(coverage.part_count() as u64, b.cell_count());
            for part in coverage.parts() {
                assert!(b.contains_part(part), "{} outside {:?}", part, b);
            }
        }
    }

    #[test]
    fn test_strategies_cover_the_same_cells() {
        let b = bbox(-12.34, 100.00, -12.40, 100.07);
        let enumerate = GeoPartIndexer::new(i32::MAX).coverage(&b);
        let ranges = GeoPartIndexer::new(1).coverage(&b);

        assert_eq!(enumerate.strategy(), IndexStrategy::Enumerate);
        assert_eq!(ranges.strategy(), IndexStrategy::RowRanges);

        let mut a = enumerate.parts();
        let mut c = ranges.parts();
        a.sort();
        c.sort();
        assert_eq!(a, c);

        for part in &a {
            assert!(ranges.contains(*part));
        }
        assert!(!ranges.contains(GeoPartId::containing(-12.30, 100.01)));
    }

    #[test]
    fn test_empty_coverage_yields_no_query() {
        let indexer = GeoPartIndexer::default();
        let p = GeoPointE2::new(4740, 800);
        let degenerate = GeoBoundingBox::new(p, p).unwrap();
        assert!(indexer.coverage(&degenerate).is_empty());
        assert!(indexer.select(&degenerate).is_none());

        // flat but wide box takes the row range path and still has no rows
        let flat = GeoBoundingBox::new(p, GeoPointE2::new(4740, 900)).unwrap();
        assert!(indexer.select(&flat).is_none());

        // inverted (antimeridian-like) box is never a valid query
        let inverted =
            GeoBoundingBox::from_corners_unchecked(GeoPointE2::new(100, 17_990), GeoPointE2::new(0, -17_990));
        assert!(indexer.select(&inverted).is_none());
    }

    #[test]
    fn test_box_outside_grid_covers_nothing() {
        let indexer = GeoPartIndexer::default();
        let north_of_pole = GeoBoundingBox::from_corners_unchecked(
            GeoPointE2::from_normalized(30_000, 18_000),
            GeoPointE2::from_normalized(29_990, 18_010),
        );
        assert!(indexer.coverage(&north_of_pole).is_empty());
        assert!(indexer.select(&north_of_pole).is_none());
        assert!(GeoPartIndexer::new(1).select(&north_of_pole).is_none());
    }

    #[test]
    fn test_select_sql_enumerate() {
        let indexer = GeoPartIndexer::default();
        let b = GeoBoundingBox::new(GeoPointE2::new(2, 0), GeoPointE2::new(0, 1)).unwrap();
        let stmt = indexer.select(&b).unwrap().to_sql();

        assert_eq!(
            stmt.text,
            "SELECT DISTINCT TourId FROM TOURGEOPARTS WHERE GeoPart IN (?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![
                QueryParam::Int(900_018_000),
                QueryParam::Int(900_118_000)
            ]
        );
    }

    #[test]
    fn test_select_sql_row_ranges() {
        let indexer = GeoPartIndexer::default();
        let b = GeoBoundingBox::new(GeoPointE2::new(2, 0), GeoPointE2::new(0, 10)).unwrap();
        let stmt = indexer.select(&b).unwrap().to_sql();

        assert_eq!(
            stmt.text,
            "SELECT DISTINCT TourId FROM TOURGEOPARTS WHERE \
             (GeoPart >= ? AND GeoPart <= ?) OR (GeoPart >= ? AND GeoPart <= ?)"
        );
        assert_eq!(stmt.params.len(), 4);
        assert_eq!(stmt.placeholder_count(), 4);
        assert_eq!(stmt.params[0], QueryParam::Int(900_018_000));
        assert_eq!(stmt.params[1], QueryParam::Int(900_018_009));
    }
}
