//! Geo-partition tour filter with an asynchronous loader and a persisted
//! filter catalog.
//!
//! The world is cut into a grid of 0.01° cells ("geo parts"). Every tour is
//! indexed by the geo parts its track passes through, so a map region turns
//! into a parameterized SQL sub-select over the geo part table.
//!
//! ```rust
//! use geopart_filter::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryTourStore::with_tours(vec![
//!     TourRecord::from_track(1, &[Point::new(8.05, 47.45)]),
//! ]));
//! let service = ServiceBuilder::new().build(store)?;
//!
//! let zurich = GeoBoundingBox::from_degrees(47.50, 8.00, 47.40, 8.20)?;
//! let request = service.load_tours(zurich)?;
//! request.wait_timeout(Duration::from_secs(5));
//! assert_eq!(request.tour_ids(), vec![1]);
//! # service.close()?;
//! # Ok::<(), geopart_filter::GeoFilterError>(())
//! ```

pub mod builder;
pub mod catalog;
pub mod combinator;
pub mod config;
pub mod error;
pub mod grid;
pub mod indexer;
pub mod loader;
pub mod query;
pub mod request;
pub mod service;
pub mod store;

pub use builder::ServiceBuilder;
pub use error::{GeoFilterError, Result};
pub use service::GeoFilterService;

pub use catalog::{CatalogChange, CatalogEvent, GeoFilter, GeoFilterCatalog};
pub use combinator::{Membership, TourQuery, combine};
pub use config::{Config, QueuePolicy};
pub use grid::{GeoBoundingBox, GeoPartId, GeoPointE2, MapViewState};
pub use indexer::{GeoPartCoverage, GeoPartIndexer, GeoPartSelect, IndexStrategy};
pub use loader::{GeoFilterLoader, LoadListener, LoaderStats};
pub use query::{AttributeFilter, QueryParam, SqlStatement, SqlWriter};
pub use request::{LoadOptions, LoadOutcome, LoaderRequest, RequestState};
pub use store::{
    MemoryTourStore, QueryContext, TourConnection, TourId, TourRecord, TourStore,
};

pub use geo::{Point, Rect};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoFilterError, GeoFilterService, Result, ServiceBuilder};

    pub use geo::{Point, Rect};

    pub use crate::{Config, QueuePolicy};

    pub use crate::{GeoBoundingBox, GeoPartId, MapViewState};

    pub use crate::{AttributeFilter, LoaderRequest, RequestState};

    pub use crate::{MemoryTourStore, TourRecord, TourStore};

    pub use std::time::Duration;
}
