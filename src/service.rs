//! Geo filter service: catalog, loader and store wired together.

use crate::catalog::{GeoFilter, GeoFilterCatalog};
use crate::config::Config;
use crate::error::Result;
use crate::grid::{GeoBoundingBox, MapViewState};
use crate::loader::{GeoFilterLoader, LoaderStats};
use crate::query::{AttributeFilter, SqlStatement};
use crate::request::{LoadOptions, LoaderRequest};
use crate::store::TourStore;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point for map views and tour filters.
///
/// Built with [`crate::ServiceBuilder`].
pub struct GeoFilterService {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn TourStore>,
    pub(crate) loader: GeoFilterLoader,
    pub(crate) catalog: RwLock<GeoFilterCatalog>,
    pub(crate) catalog_path: Option<PathBuf>,
    pub(crate) attribute_filter: RwLock<Option<AttributeFilter>>,
    pub(crate) current: Mutex<Option<LoaderRequest>>,
}

impl GeoFilterService {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TourStore> {
        &self.store
    }

    pub fn catalog_path(&self) -> Option<&Path> {
        self.catalog_path.as_deref()
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, GeoFilterCatalog> {
        self.catalog.read()
    }

    /// Write access to the catalog. Do not hold the guard across calls to
    /// other service methods.
    pub fn catalog_mut(&self) -> RwLockWriteGuard<'_, GeoFilterCatalog> {
        self.catalog.write()
    }

    /// Attribute filter of the surrounding application, combined with the
    /// geo parts when app filters are in use.
    pub fn set_attribute_filter(&self, filter: Option<AttributeFilter>) {
        *self.attribute_filter.write() = filter;
    }

    pub fn attribute_filter(&self) -> Option<AttributeFilter> {
        self.attribute_filter.read().clone()
    }

    /// Load the tours in a map region.
    ///
    /// Replaces the previous load, which is canceled.
    pub fn load_tours(&self, bbox: GeoBoundingBox) -> Result<LoaderRequest> {
        self.submit(bbox, None)
    }

    /// Load the tours of the active filter. `Ok(None)` when nothing is active.
    pub fn load_active_filter(&self) -> Result<Option<LoaderRequest>> {
        let Some(filter) = self.catalog.read().active().cloned() else {
            return Ok(None);
        };
        let bbox = filter.geo_parts;
        self.submit(bbox, Some(filter)).map(Some)
    }

    fn submit(&self, bbox: GeoBoundingBox, filter: Option<GeoFilter>) -> Result<LoaderRequest> {
        self.loader.set_options(self.load_options());

        let mut current = self.current.lock();
        let request = self.loader.submit(current.as_ref(), bbox, filter)?;
        *current = Some(request.clone());
        Ok(request)
    }

    fn load_options(&self) -> LoadOptions {
        let catalog = self.catalog.read();
        let attribute_filter = if catalog.use_app_filter() {
            self.attribute_filter.read().clone()
        } else {
            None
        };
        LoadOptions {
            include_geo_parts: catalog.include_geo_parts(),
            attribute_filter,
        }
    }

    /// Cancel the current load, if any.
    pub fn stop_loading(&self) -> bool {
        match self.current.lock().take() {
            Some(request) => self.loader.stop_loading(&request),
            None => false,
        }
    }

    /// Most recently submitted request.
    pub fn current_request(&self) -> Option<LoaderRequest> {
        self.current.lock().clone()
    }

    /// SQL selecting the tours of the active filter, for use as a sub-select
    /// by tour lists. `None` when geo filtering does not apply.
    pub fn tour_filter_query(&self) -> Option<SqlStatement> {
        let attribute = self.attribute_filter.read().clone();
        self.catalog
            .read()
            .combined_query(attribute.as_ref())
            .map(|query| query.to_sql())
    }

    /// Create a filter from a drawn region and make it active.
    pub fn create_filter(&self, geo_location: GeoBoundingBox, map_view: MapViewState) -> GeoFilter {
        self.catalog.write().create(geo_location, map_view)
    }

    pub fn loader_stats(&self) -> LoaderStats {
        self.loader.stats()
    }

    /// Write the catalog if a path was configured.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.catalog_path {
            self.catalog.read().save(path)?;
            log::debug!("Saved geo filter catalog to {}", path.display());
        }
        Ok(())
    }

    /// Stop the loader and save the catalog.
    pub fn close(&self) -> Result<()> {
        self.stop_loading();
        self.loader.close();
        self.save()
    }
}

impl std::fmt::Debug for GeoFilterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoFilterService")
            .field("catalog", &*self.catalog.read())
            .field("catalog_path", &self.catalog_path)
            .field("loader", &self.loader.stats())
            .finish()
    }
}
