//! Fixed-point geographic primitives.
//!
//! Coordinates are kept as hundredths of a degree ("E2"). A latitude of
//! `47.51°` is `4751`, a longitude of `-8.2°` is `-820`. Adding
//! [`NORMALIZED_LATITUDE_OFFSET_E2`] / [`NORMALIZED_LONGITUDE_OFFSET_E2`] makes
//! both non-negative, which is the form the geo part grid is indexed in.

use crate::error::{GeoFilterError, Result};
use geo::{Coord, Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NORMALIZED_LATITUDE_OFFSET_E2: i32 = 9_000;
pub const NORMALIZED_LONGITUDE_OFFSET_E2: i32 = 18_000;

/// Multiplier that places the normalized latitude above the longitude digits.
pub const GEO_PART_LATITUDE_FACTOR: i32 = 100_000;

const MAX_NORMALIZED_LAT_E2: i32 = 2 * NORMALIZED_LATITUDE_OFFSET_E2;
const MAX_NORMALIZED_LON_E2: i32 = 2 * NORMALIZED_LONGITUDE_OFFSET_E2;

/// Largest id the grid can produce, `18_000 * 100_000 + 36_000`.
pub const MAX_GEO_PART_ID: i32 =
    MAX_NORMALIZED_LAT_E2 * GEO_PART_LATITUDE_FACTOR + MAX_NORMALIZED_LON_E2;

/// A latitude/longitude pair in hundredths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoPointE2 {
    pub lat_e2: i32,
    pub lon_e2: i32,
}

impl GeoPointE2 {
    pub const fn new(lat_e2: i32, lon_e2: i32) -> Self {
        Self { lat_e2, lon_e2 }
    }

    /// Convert degrees to E2, rounding to the nearest hundredth so that values
    /// like `47.4` don't land on `4739` through float error.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_e2: (latitude * 100.0).round() as i32,
            lon_e2: (longitude * 100.0).round() as i32,
        }
    }

    /// Build from normalized (offset, non-negative) values.
    pub const fn from_normalized(norm_lat_e2: i32, norm_lon_e2: i32) -> Self {
        Self {
            lat_e2: norm_lat_e2 - NORMALIZED_LATITUDE_OFFSET_E2,
            lon_e2: norm_lon_e2 - NORMALIZED_LONGITUDE_OFFSET_E2,
        }
    }

    pub const fn normalized_lat(&self) -> i32 {
        self.lat_e2 + NORMALIZED_LATITUDE_OFFSET_E2
    }

    pub const fn normalized_lon(&self) -> i32 {
        self.lon_e2 + NORMALIZED_LONGITUDE_OFFSET_E2
    }

    /// Returns `(latitude, longitude)` in degrees.
    pub fn to_degrees(&self) -> (f64, f64) {
        (self.lat_e2 as f64 / 100.0, self.lon_e2 as f64 / 100.0)
    }

    pub fn is_valid(&self) -> bool {
        (0..=MAX_NORMALIZED_LAT_E2).contains(&self.normalized_lat())
            && (0..=MAX_NORMALIZED_LON_E2).contains(&self.normalized_lon())
    }
}

impl From<Point<f64>> for GeoPointE2 {
    /// `x` is the longitude, `y` the latitude.
    fn from(point: Point<f64>) -> Self {
        Self::from_degrees(point.y(), point.x())
    }
}

impl From<GeoPointE2> for Point<f64> {
    fn from(point: GeoPointE2) -> Self {
        let (lat, lon) = point.to_degrees();
        Point::new(lon, lat)
    }
}

/// Identifier of one 0.01° x 0.01° grid cell.
///
/// `id = normalized_lat_e2 * 100_000 + normalized_lon_e2`, which stays below
/// `i32::MAX` for every valid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoPartId(i32);

impl GeoPartId {
    pub const fn from_normalized(norm_lat_e2: i32, norm_lon_e2: i32) -> Self {
        Self(norm_lat_e2 * GEO_PART_LATITUDE_FACTOR + norm_lon_e2)
    }

    /// Cell that contains a position given in degrees.
    pub fn containing(latitude: f64, longitude: f64) -> Self {
        let lat = (latitude * 100.0).floor() as i32 + NORMALIZED_LATITUDE_OFFSET_E2;
        let lon = (longitude * 100.0).floor() as i32 + NORMALIZED_LONGITUDE_OFFSET_E2;
        Self::from_normalized(
            lat.clamp(0, MAX_NORMALIZED_LAT_E2),
            lon.clamp(0, MAX_NORMALIZED_LON_E2),
        )
    }

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn value(&self) -> i32 {
        self.0
    }

    pub const fn normalized_lat(&self) -> i32 {
        self.0 / GEO_PART_LATITUDE_FACTOR
    }

    pub const fn normalized_lon(&self) -> i32 {
        self.0 % GEO_PART_LATITUDE_FACTOR
    }

    /// South-west corner of the cell.
    pub const fn corner(&self) -> GeoPointE2 {
        GeoPointE2::from_normalized(self.normalized_lat(), self.normalized_lon())
    }
}

impl fmt::Display for GeoPartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rectangular region given by its north-west and south-east corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub top_left: GeoPointE2,
    pub bottom_right: GeoPointE2,
}

impl GeoBoundingBox {
    /// Create a box, rejecting out-of-range corners and inverted boxes.
    ///
    /// A box whose top-left longitude is east of its bottom-right longitude
    /// would cross the antimeridian; that is rejected rather than wrapped.
    pub fn new(top_left: GeoPointE2, bottom_right: GeoPointE2) -> Result<Self> {
        if !top_left.is_valid() || !bottom_right.is_valid() {
            return Err(GeoFilterError::InvalidFormat(format!(
                "corner out of range: {:?} / {:?}",
                top_left, bottom_right
            )));
        }

        if top_left.lat_e2 < bottom_right.lat_e2 {
            return Err(GeoFilterError::InvalidFormat(format!(
                "top-left latitude {} is south of bottom-right latitude {}",
                top_left.lat_e2, bottom_right.lat_e2
            )));
        }

        if top_left.lon_e2 > bottom_right.lon_e2 {
            return Err(GeoFilterError::InvalidFormat(format!(
                "top-left longitude {} is east of bottom-right longitude {}",
                top_left.lon_e2, bottom_right.lon_e2
            )));
        }

        Ok(Self {
            top_left,
            bottom_right,
        })
    }

    /// Create a box without any checks. The indexer treats inverted boxes as
    /// empty coverage.
    pub const fn from_corners_unchecked(top_left: GeoPointE2, bottom_right: GeoPointE2) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    pub fn from_degrees(
        top_left_lat: f64,
        top_left_lon: f64,
        bottom_right_lat: f64,
        bottom_right_lon: f64,
    ) -> Result<Self> {
        Self::new(
            GeoPointE2::from_degrees(top_left_lat, top_left_lon),
            GeoPointE2::from_degrees(bottom_right_lat, bottom_right_lon),
        )
    }

    /// Longitude span in E2 cells; negative for inverted boxes.
    pub const fn width_e2(&self) -> i32 {
        self.bottom_right.lon_e2 - self.top_left.lon_e2
    }

    /// Latitude span in E2 cells; negative for inverted boxes.
    pub const fn height_e2(&self) -> i32 {
        self.top_left.lat_e2 - self.bottom_right.lat_e2
    }

    /// Number of grid cells covered, zero for degenerate boxes.
    pub fn cell_count(&self) -> u64 {
        let width = self.width_e2().max(0) as u64;
        let height = self.height_e2().max(0) as u64;
        width * height
    }

    /// Whether a cell lies inside `[lat2, lat1) x [lon1, lon2)`.
    pub fn contains_part(&self, part: GeoPartId) -> bool {
        let lat = part.normalized_lat();
        let lon = part.normalized_lon();

        lat >= self.bottom_right.normalized_lat()
            && lat < self.top_left.normalized_lat()
            && lon >= self.top_left.normalized_lon()
            && lon < self.bottom_right.normalized_lon()
    }

    /// Expand the box outward onto a grid of `grid_size` E2 units.
    ///
    /// The result always spans at least one grid box in each direction and is
    /// clamped to the valid coordinate range.
    pub fn snap_to_grid(&self, grid_size: i32) -> Self {
        let grid = grid_size.max(1);

        let floor = |v: i32| v.div_euclid(grid) * grid;
        let ceil = |v: i32| {
            let f = floor(v);
            if f == v { v } else { f + grid }
        };

        let lon1 = floor(self.top_left.normalized_lon());
        let lon2 = ceil(self.bottom_right.normalized_lon()).max(lon1 + grid);
        let lat2 = floor(self.bottom_right.normalized_lat());
        let lat1 = ceil(self.top_left.normalized_lat()).max(lat2 + grid);

        Self {
            top_left: GeoPointE2::from_normalized(
                lat1.min(MAX_NORMALIZED_LAT_E2),
                lon1.max(0),
            ),
            bottom_right: GeoPointE2::from_normalized(
                lat2.max(0),
                lon2.min(MAX_NORMALIZED_LON_E2),
            ),
        }
    }

    /// Convert to a `geo::Rect` in degrees (x = longitude, y = latitude).
    pub fn to_rect(&self) -> Rect<f64> {
        let (lat1, lon1) = self.top_left.to_degrees();
        let (lat2, lon2) = self.bottom_right.to_degrees();
        Rect::new(Coord { x: lon1, y: lat2 }, Coord { x: lon2, y: lat1 })
    }
}

impl TryFrom<Rect<f64>> for GeoBoundingBox {
    type Error = GeoFilterError;

    fn try_from(rect: Rect<f64>) -> Result<Self> {
        let min = rect.min();
        let max = rect.max();
        Self::from_degrees(max.y, min.x, min.y, max.x)
    }
}

/// Map position a filter was created at. Only used to restore the map view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapViewState {
    pub zoom_level: u32,
    pub center_latitude: f64,
    pub center_longitude: f64,
}

impl MapViewState {
    pub const DEFAULT_ZOOM_LEVEL: u32 = 6;

    pub fn new(zoom_level: u32, center_latitude: f64, center_longitude: f64) -> Self {
        Self {
            zoom_level,
            center_latitude,
            center_longitude,
        }
    }
}

impl Default for MapViewState {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ZOOM_LEVEL, 0.0, 0.0)
    }
}
