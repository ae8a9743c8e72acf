//! Store abstraction the loader runs its queries against
//!
//! The schema of the tour tables belongs to the application. The engine only
//! needs to acquire a connection, run one [`TourQuery`] and release the
//! connection again, which happens when the boxed connection is dropped.

use crate::combinator::{Membership, TourQuery};
use crate::error::{GeoFilterError, Result};
use crate::grid::GeoPartId;
use crate::indexer::{GeoPartCoverage, GeoPartSelect};
use crate::query::QueryParam;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub type TourId = i64;

/// Trait for tour store implementations
pub trait TourStore: Send + Sync {
    /// Acquire a connection. It is released when dropped.
    fn connect(&self) -> Result<Box<dyn TourConnection + '_>>;
}

/// One acquired store connection.
pub trait TourConnection {
    /// Run a query and return the matching tour ids.
    ///
    /// SQL backed stores render the query with [`TourQuery::to_sql`].
    fn execute_query(&mut self, query: &TourQuery, ctx: &QueryContext) -> Result<Vec<TourId>>;
}

/// Per-query execution context handed to the store.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext {
    started: Instant,
    timeout: Option<Duration>,
}

impl QueryContext {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stores call this at convenient points of long running work.
    pub fn check_deadline(&self) -> Result<()> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => {
                Err(GeoFilterError::QueryTimeout(timeout))
            }
            _ => Ok(()),
        }
    }
}

/// A tour as seen by [`MemoryTourStore`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TourRecord {
    pub tour_id: TourId,
    pub geo_parts: BTreeSet<GeoPartId>,
    pub attributes: BTreeMap<String, QueryParam>,
}

impl TourRecord {
    pub fn new(tour_id: TourId) -> Self {
        Self {
            tour_id,
            ..Default::default()
        }
    }

    /// Index a track given as `geo::Point`s (x = longitude, y = latitude).
    pub fn from_track(tour_id: TourId, track: &[geo::Point<f64>]) -> Self {
        let geo_parts = track
            .iter()
            .map(|p| GeoPartId::containing(p.y(), p.x()))
            .collect();
        Self {
            tour_id,
            geo_parts,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn has_geo_data(&self) -> bool {
        !self.geo_parts.is_empty()
    }
}

/// Evaluates one attribute filter clause against a tour.
pub type AttributeMatcher = Arc<dyn Fn(&TourRecord, &[QueryParam]) -> bool + Send + Sync>;

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub tour_count: usize,
    pub geo_part_count: usize,
    pub connections_opened: u64,
    pub open_connections: usize,
    pub queries_executed: u64,
}

#[derive(Default)]
struct Tables {
    tours: BTreeMap<TourId, TourRecord>,
    geo_parts: BTreeMap<GeoPartId, BTreeSet<TourId>>,
}

/// In-memory store with a geo part index, for tests and embedding.
///
/// Attribute filters are opaque SQL, so each clause the application uses must
/// be registered with [`register_attribute`](Self::register_attribute). An
/// unknown clause fails the query like a malformed statement would.
#[derive(Default)]
pub struct MemoryTourStore {
    tables: RwLock<Tables>,
    matchers: RwLock<HashMap<String, AttributeMatcher>>,
    connections_opened: AtomicU64,
    open_connections: AtomicUsize,
    queries_executed: AtomicU64,
}

impl MemoryTourStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tours(tours: impl IntoIterator<Item = TourRecord>) -> Self {
        let store = Self::new();
        for tour in tours {
            store.insert_tour(tour);
        }
        store
    }

    /// Insert or replace a tour and its geo parts.
    pub fn insert_tour(&self, tour: TourRecord) {
        let mut tables = self.tables.write();
        if let Some(old) = tables.tours.remove(&tour.tour_id) {
            Self::unindex(&mut tables, &old);
        }
        for part in &tour.geo_parts {
            tables
                .geo_parts
                .entry(*part)
                .or_default()
                .insert(tour.tour_id);
        }
        tables.tours.insert(tour.tour_id, tour);
    }

    pub fn remove_tour(&self, tour_id: TourId) -> Option<TourRecord> {
        let mut tables = self.tables.write();
        let old = tables.tours.remove(&tour_id)?;
        Self::unindex(&mut tables, &old);
        Some(old)
    }

    fn unindex(tables: &mut Tables, tour: &TourRecord) {
        for part in &tour.geo_parts {
            if let Some(ids) = tables.geo_parts.get_mut(part) {
                ids.remove(&tour.tour_id);
                if ids.is_empty() {
                    tables.geo_parts.remove(part);
                }
            }
        }
    }

    pub fn register_attribute<F>(&self, where_clause: &str, matcher: F)
    where
        F: Fn(&TourRecord, &[QueryParam]) -> bool + Send + Sync + 'static,
    {
        self.matchers
            .write()
            .insert(where_clause.to_string(), Arc::new(matcher));
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        StoreStats {
            tour_count: tables.tours.len(),
            geo_part_count: tables.geo_parts.len(),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            open_connections: self.open_connections.load(Ordering::Acquire),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
        }
    }

    fn tours_in(tables: &Tables, geo: &GeoPartSelect, ctx: &QueryContext) -> Result<BTreeSet<TourId>> {
        let mut found = BTreeSet::new();
        match geo.coverage() {
            GeoPartCoverage::Parts(parts) => {
                for part in parts {
                    if let Some(ids) = tables.geo_parts.get(part) {
                        found.extend(ids.iter().copied());
                    }
                }
            }
            GeoPartCoverage::RowRanges(rows) => {
                for (first, last) in rows {
                    ctx.check_deadline()?;
                    for ids in tables.geo_parts.range(*first..=*last).map(|(_, ids)| ids) {
                        found.extend(ids.iter().copied());
                    }
                }
            }
        }
        ctx.check_deadline()?;
        Ok(found)
    }

    fn run(&self, query: &TourQuery, ctx: &QueryContext) -> Result<Vec<TourId>> {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);

        let tables = self.tables.read();
        let in_geo_parts = Self::tours_in(&tables, query.geo(), ctx)?;

        if let TourQuery::GeoParts(_) = query {
            return Ok(in_geo_parts.into_iter().collect());
        }

        let matcher = match query.attribute() {
            Some(attribute) => {
                let matcher = self
                    .matchers
                    .read()
                    .get(&attribute.where_clause)
                    .cloned()
                    .ok_or_else(|| {
                        GeoFilterError::store(format!(
                            "unsupported attribute filter: {}",
                            attribute.where_clause
                        ))
                    })?;
                Some((matcher, attribute.params.as_slice()))
            }
            None => None,
        };

        let membership = query.membership();
        let mut result = Vec::new();
        for tour in tables.tours.values() {
            if let Some((matcher, params)) = &matcher
                && !matcher(tour, params)
            {
                continue;
            }

            let selected = match membership {
                Membership::Include => in_geo_parts.contains(&tour.tour_id),
                Membership::Exclude => {
                    tour.has_geo_data() && !in_geo_parts.contains(&tour.tour_id)
                }
            };
            if selected {
                result.push(tour.tour_id);
            }
        }

        ctx.check_deadline()?;
        Ok(result)
    }
}

struct MemoryConnection<'a> {
    store: &'a MemoryTourStore,
}

impl TourConnection for MemoryConnection<'_> {
    fn execute_query(&mut self, query: &TourQuery, ctx: &QueryContext) -> Result<Vec<TourId>> {
        self.store.run(query, ctx)
    }
}

impl Drop for MemoryConnection<'_> {
    fn drop(&mut self) {
        self.store.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TourStore for MemoryTourStore {
    fn connect(&self) -> Result<Box<dyn TourConnection + '_>> {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.open_connections.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryConnection { store: self }))
    }
}

impl<S: TourStore + ?Sized> TourStore for Arc<S> {
    fn connect(&self) -> Result<Box<dyn TourConnection + '_>> {
        (**self).connect()
    }
}
