//! Service builder
//!
//! Collects configuration, the catalog location and the load listener before
//! the loader thread is started.

use crate::catalog::GeoFilterCatalog;
use crate::config::Config;
use crate::error::{GeoFilterError, Result};
use crate::loader::{GeoFilterLoader, LoadListener};
use crate::request::LoaderRequest;
use crate::service::GeoFilterService;
use crate::store::TourStore;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for [`GeoFilterService`].
pub struct ServiceBuilder {
    config: Config,
    catalog_path: Option<PathBuf>,
    strict_catalog: bool,
    listener: Option<Arc<dyn LoadListener>>,
}

impl ServiceBuilder {
    /// Default configuration, in-memory catalog, no listener.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            catalog_path: None,
            strict_catalog: false,
            listener: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Persist the catalog at `path`. It is loaded on build and written on close.
    pub fn catalog_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Fail the build on an unreadable catalog instead of starting empty.
    pub fn strict_catalog(mut self, strict: bool) -> Self {
        self.strict_catalog = strict;
        self
    }

    /// Called on the loader thread for every completed or failed request.
    pub fn listener<L: LoadListener + 'static>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self, store: Arc<dyn TourStore>) -> Result<GeoFilterService> {
        self.config
            .validate()
            .map_err(GeoFilterError::InvalidConfig)?;

        let catalog = match &self.catalog_path {
            Some(path) if self.strict_catalog => GeoFilterCatalog::load(path, &self.config)?,
            Some(path) => GeoFilterCatalog::open(path, &self.config),
            None => GeoFilterCatalog::new(&self.config),
        };

        let listener: Arc<dyn LoadListener> = match self.listener {
            Some(listener) => listener,
            None => Arc::new(|_: &LoaderRequest| {}),
        };
        let loader = GeoFilterLoader::new(Arc::clone(&store), listener, &self.config)?;

        Ok(GeoFilterService {
            config: self.config,
            store,
            loader,
            catalog: RwLock::new(catalog),
            catalog_path: self.catalog_path,
            attribute_filter: RwLock::new(None),
            current: Mutex::new(None),
        })
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
