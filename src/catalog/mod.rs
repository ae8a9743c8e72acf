//! User-named geo filters and the single active one.
//!
//! The catalog owns the list of filters a user has drawn on the map, knows
//! which one is active and builds the combined tour query for it. Every
//! change is announced to subscribers with a monotonically increasing
//! generation, so a listener that defers work can skip stale notifications
//! by comparing against [`GeoFilterCatalog::generation`].

mod file;

pub use file::{CATALOG_VERSION, CatalogDocument, CatalogFile, GeoFilterRecord, NormalizedBox};

use crate::combinator::{TourQuery, combine};
use crate::config::Config;
use crate::error::{GeoFilterError, Result};
use crate::grid::{GeoBoundingBox, MapViewState};
use crate::indexer::GeoPartIndexer;
use crate::query::AttributeFilter;
use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// A named region the user selected on the map.
///
/// Equality and hashing use the id only.
#[derive(Debug, Clone)]
pub struct GeoFilter {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Region as drawn.
    pub geo_location: GeoBoundingBox,
    /// Region snapped onto the geo part grid; this is what gets queried.
    pub geo_parts: GeoBoundingBox,
    pub num_geo_parts: u64,
    /// Pass-through for restoring the map, not used for matching.
    pub map_view: MapViewState,
}

impl GeoFilter {
    pub fn new(geo_location: GeoBoundingBox, grid_box_size: i32, map_view: MapViewState) -> Self {
        let geo_parts = geo_location.snap_to_grid(grid_box_size);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created: Utc::now(),
            geo_location,
            geo_parts,
            num_geo_parts: geo_parts.cell_count(),
            map_view,
        }
    }

    /// Rebuild a stored filter. Fails if a box has corners off the grid.
    fn from_record(record: GeoFilterRecord, grid_box_size: i32) -> Result<Self> {
        let geo_location = GeoBoundingBox::try_from(record.geo_location)?;
        let geo_parts = match record.geo_parts {
            Some(parts) => GeoBoundingBox::try_from(parts)?,
            None => geo_location.snap_to_grid(grid_box_size),
        };
        Ok(Self {
            id: record
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            created: record.created.unwrap_or_else(Utc::now),
            geo_location,
            geo_parts,
            num_geo_parts: record.num_geo_parts,
            map_view: MapViewState::new(
                record.map_zoom_level,
                record.map_center_latitude,
                record.map_center_longitude,
            ),
        })
    }

    fn to_record(&self) -> GeoFilterRecord {
        GeoFilterRecord {
            id: Some(self.id.clone()),
            created: Some(self.created),
            num_geo_parts: self.num_geo_parts,
            geo_location: NormalizedBox::from(&self.geo_location),
            geo_parts: Some(NormalizedBox::from(&self.geo_parts)),
            map_zoom_level: self.map_view.zoom_level,
            map_center_latitude: self.map_view.center_latitude,
            map_center_longitude: self.map_view.center_longitude,
        }
    }
}

impl PartialEq for GeoFilter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GeoFilter {}

impl Hash for GeoFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// What changed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    /// A filter was created and became active.
    Created { id: String },
    /// A filter was removed; `was_active` tells callers to hide its overlay.
    Deleted { id: String, was_active: bool },
    Cleared,
    Selected { id: String },
    EnabledChanged { enabled: bool },
    OptionsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogChange {
    pub generation: u64,
    pub event: CatalogEvent,
}

pub type CatalogListener = Box<dyn Fn(&CatalogChange) + Send + Sync>;

/// Collection of geo filters with the active selection.
pub struct GeoFilterCatalog {
    filters: Vec<GeoFilter>,
    selected_id: Option<String>,
    /// Active id read from disk, resolved lazily until the user selects.
    persisted_active_id: Option<String>,
    enabled: bool,
    include_geo_parts: bool,
    use_app_filter: bool,
    grid_box_size: i32,
    indexer: GeoPartIndexer,
    generation: u64,
    listeners: Vec<CatalogListener>,
}

impl GeoFilterCatalog {
    pub fn new(config: &Config) -> Self {
        Self {
            filters: Vec::new(),
            selected_id: None,
            persisted_active_id: None,
            enabled: config.filter_enabled,
            include_geo_parts: config.include_geo_parts,
            use_app_filter: config.use_app_filter,
            grid_box_size: config.grid_box_size,
            indexer: GeoPartIndexer::from_config(config),
            generation: 0,
            listeners: Vec::new(),
        }
    }

    /// Load a catalog, failing on unreadable or malformed documents.
    pub fn load<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        let mut catalog = Self::new(config);
        if let Some(document) = CatalogFile::new(path).read()? {
            catalog.apply_document(document);
        }
        Ok(catalog)
    }

    /// Load a catalog, falling back to an empty one when the document cannot
    /// be read.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Self {
        let path = path.as_ref();
        match Self::load(path, config) {
            Ok(catalog) => {
                log::debug!(
                    "Loaded {} geo filter(s) from {}",
                    catalog.len(),
                    path.display()
                );
                catalog
            }
            Err(e) => {
                log::error!(
                    "Failed to load geo filter catalog {}: {}; starting empty",
                    path.display(),
                    e
                );
                Self::new(config)
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        CatalogFile::new(path).write(&self.to_document())
    }

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            version: CATALOG_VERSION,
            saved_at: Some(Utc::now()),
            app_version: Some(crate::VERSION.to_string()),
            active_geo_filter_id: self.active().map(|f| f.id.clone()),
            filter_enabled: Some(self.enabled),
            filters: self.filters.iter().map(GeoFilter::to_record).collect(),
        }
    }

    fn apply_document(&mut self, document: CatalogDocument) {
        let mut filters: Vec<GeoFilter> = Vec::with_capacity(document.filters.len());
        for record in document.filters {
            let id = record.id.clone().unwrap_or_default();
            let filter = match GeoFilter::from_record(record, self.grid_box_size) {
                Ok(filter) => filter,
                Err(e) => {
                    log::warn!("Skipping geo filter '{}': {}", id, e);
                    continue;
                }
            };
            if filters.contains(&filter) {
                log::warn!("Skipping duplicate geo filter id {}", filter.id);
                continue;
            }
            filters.push(filter);
        }

        self.filters = filters;
        self.selected_id = None;
        self.persisted_active_id = document.active_geo_filter_id;
        if let Some(enabled) = document.filter_enabled {
            self.enabled = enabled;
        }
    }

    /// Register a change listener.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&CatalogChange) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, event: CatalogEvent) {
        self.generation += 1;
        let change = CatalogChange {
            generation: self.generation,
            event,
        };
        log::debug!("Geo filter catalog changed: {:?}", change);
        for listener in &self.listeners {
            listener(&change);
        }
    }

    /// Generation of the latest change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn filters(&self) -> &[GeoFilter] {
        &self.filters
    }

    pub fn get(&self, id: &str) -> Option<&GeoFilter> {
        self.filters.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The active filter, if any.
    pub fn active(&self) -> Option<&GeoFilter> {
        match &self.selected_id {
            Some(id) => self.get(id),
            None => self
                .persisted_active_id
                .as_deref()
                .and_then(|id| self.get(id)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn include_geo_parts(&self) -> bool {
        self.include_geo_parts
    }

    pub fn use_app_filter(&self) -> bool {
        self.use_app_filter
    }

    /// Create a filter for a drawn region, make it active and enable filtering.
    pub fn create(&mut self, geo_location: GeoBoundingBox, map_view: MapViewState) -> GeoFilter {
        let filter = GeoFilter::new(geo_location, self.grid_box_size, map_view);

        self.filters.push(filter.clone());
        self.selected_id = Some(filter.id.clone());
        self.persisted_active_id = None;
        self.enabled = true;

        self.notify(CatalogEvent::Created {
            id: filter.id.clone(),
        });
        filter
    }

    pub fn delete(&mut self, id: &str) -> Option<GeoFilter> {
        let index = self.filters.iter().position(|f| f.id == id)?;
        let was_active = self.active().is_some_and(|f| f.id == id);

        let removed = self.filters.remove(index);
        if was_active {
            self.selected_id = None;
            self.persisted_active_id = None;
        }

        self.notify(CatalogEvent::Deleted {
            id: removed.id.clone(),
            was_active,
        });
        Some(removed)
    }

    /// Remove every filter. Returns how many were removed.
    pub fn delete_all(&mut self) -> usize {
        let removed = self.filters.len();
        self.filters.clear();
        self.selected_id = None;
        self.persisted_active_id = None;

        self.notify(CatalogEvent::Cleared);
        removed
    }

    /// Make a filter active. Returns `Ok(false)` when it already was.
    pub fn select(&mut self, id: &str) -> Result<bool> {
        if self.get(id).is_none() {
            return Err(GeoFilterError::UnknownFilter(id.to_string()));
        }

        if self.active().is_some_and(|f| f.id == id) {
            return Ok(false);
        }

        self.selected_id = Some(id.to_string());
        self.persisted_active_id = None;

        self.notify(CatalogEvent::Selected { id: id.to_string() });
        Ok(true)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.notify(CatalogEvent::EnabledChanged { enabled });
    }

    pub fn set_include_geo_parts(&mut self, include: bool) {
        if self.include_geo_parts != include {
            self.include_geo_parts = include;
            self.notify(CatalogEvent::OptionsChanged);
        }
    }

    pub fn set_use_app_filter(&mut self, use_app_filter: bool) {
        if self.use_app_filter != use_app_filter {
            self.use_app_filter = use_app_filter;
            self.notify(CatalogEvent::OptionsChanged);
        }
    }

    /// Query for the tours selected by the active filter.
    ///
    /// `None` when filtering is disabled, nothing is active or the active
    /// filter covers no geo parts. The attribute filter is ignored unless
    /// app filters are in use.
    pub fn combined_query(&self, attribute: Option<&AttributeFilter>) -> Option<TourQuery> {
        if !self.enabled {
            return None;
        }

        let filter = self.active()?;
        let geo = self.indexer.select(&filter.geo_parts)?;

        let attribute = if self.use_app_filter {
            attribute.cloned()
        } else {
            None
        };

        Some(combine(geo, attribute, self.include_geo_parts))
    }
}

impl fmt::Debug for GeoFilterCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoFilterCatalog")
            .field("filters", &self.filters.len())
            .field("active", &self.active().map(|f| f.id.as_str()))
            .field("enabled", &self.enabled)
            .field("generation", &self.generation)
            .finish()
    }
}
