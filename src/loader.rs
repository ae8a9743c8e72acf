//! Asynchronous geo filter loader.
//!
//! One background worker runs at most one store query at a time. Callers
//! submit bounding boxes and get a [`LoaderRequest`] handle back immediately;
//! submitting a new request cancels the caller's previous one.
//!
//! Cancellation is cooperative and checked twice: before the query runs and
//! after it returns. A store call that is already running is not interrupted,
//! only its result is discarded.
//!
//! # Callback contract
//!
//! [`LoadListener::on_result`] fires exactly once for every request that ends
//! `Completed` or `Failed`, on the worker thread. Canceled requests never reach
//! the listener.

use crate::catalog::GeoFilter;
use crate::combinator::combine;
use crate::config::{Config, QueuePolicy};
use crate::error::{GeoFilterError, Result};
use crate::grid::GeoBoundingBox;
use crate::indexer::{GeoPartCoverage, GeoPartIndexer};
use crate::request::{LoadOptions, LoadOutcome, LoaderRequest, RequestState};
use crate::store::{QueryContext, TourStore};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Receives finished requests on the worker thread.
pub trait LoadListener: Send + Sync {
    fn on_result(&self, request: &LoaderRequest);
}

impl<F> LoadListener for F
where
    F: Fn(&LoaderRequest) + Send + Sync,
{
    fn on_result(&self, request: &LoaderRequest) {
        self(request)
    }
}

/// Loader counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
}

struct WorkQueue {
    pending: VecDeque<LoaderRequest>,
    running: bool,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    available: Condvar,
    idle: Condvar,
    next_id: AtomicU64,
    options: RwLock<LoadOptions>,
    counters: Counters,
    store: Arc<dyn TourStore>,
    listener: Arc<dyn LoadListener>,
    indexer: GeoPartIndexer,
    policy: QueuePolicy,
    timeout: Option<Duration>,
}

/// Single-worker executor for geo filter queries.
pub struct GeoFilterLoader {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GeoFilterLoader {
    /// Start the loader and its worker thread.
    pub fn new(
        store: Arc<dyn TourStore>,
        listener: Arc<dyn LoadListener>,
        config: &Config,
    ) -> Result<Self> {
        config.validate().map_err(GeoFilterError::InvalidConfig)?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                pending: VecDeque::new(),
                running: false,
                shutdown: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            next_id: AtomicU64::new(0),
            options: RwLock::new(LoadOptions {
                include_geo_parts: config.include_geo_parts,
                attribute_filter: None,
            }),
            counters: Counters::default(),
            store,
            listener,
            indexer: GeoPartIndexer::from_config(config),
            policy: config.queue_policy,
            timeout: config.query_timeout(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || run_worker(worker_shared))?;

        log::debug!(
            "Started geo filter loader thread '{}' ({:?})",
            config.worker_thread_name,
            config.queue_policy
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Cancel `previous` (if any) and enqueue a request for `bbox`.
    ///
    /// Never blocks on the store. The returned handle is not populated yet.
    pub fn submit(
        &self,
        previous: Option<&LoaderRequest>,
        bbox: GeoBoundingBox,
        filter: Option<GeoFilter>,
    ) -> Result<LoaderRequest> {
        if let Some(previous) = previous {
            self.stop_loading(previous);
        }

        let executor_id = self.shared.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let options = self.shared.options.read().clone();
        let request = LoaderRequest::new(executor_id, bbox, filter, options);

        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(GeoFilterError::Closed);
        }

        if self.shared.policy == QueuePolicy::LatestOnly {
            // drained requests never reach the worker, count them here
            for stale in queue.pending.drain(..) {
                stale.cancel();
                self.shared.counters.canceled.fetch_add(1, Ordering::Relaxed);
            }
        }

        queue.pending.push_back(request.clone());
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();

        log::trace!("Queued geo filter request {}", executor_id);
        Ok(request)
    }

    /// Cancel a request without submitting a new one.
    pub fn stop_loading(&self, request: &LoaderRequest) -> bool {
        let canceled = request.cancel();
        if canceled {
            log::trace!("Canceled geo filter request {}", request.executor_id());
        }
        canceled
    }

    /// Options captured by requests submitted from now on.
    pub fn set_options(&self, options: LoadOptions) {
        *self.shared.options.write() = options;
    }

    pub fn options(&self) -> LoadOptions {
        self.shared.options.read().clone()
    }

    /// Requests waiting for the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    pub fn stats(&self) -> LoaderStats {
        let c = &self.shared.counters;
        LoaderStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            canceled: c.canceled.load(Ordering::Relaxed),
        }
    }

    /// Block until the queue is drained and the worker is idle.
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.shutdown && (queue.running || !queue.pending.is_empty()) {
            if self.shared.idle.wait_until(&mut queue, deadline).timed_out() {
                return !queue.running && queue.pending.is_empty();
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Stop the worker. Waiting requests are canceled; a query that is
    /// already running finishes first.
    pub fn close(&self) {
        self.shutdown();

        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            log::error!("Geo filter loader thread panicked");
        }
    }

    fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return;
        }
        queue.shutdown = true;
        for request in queue.pending.drain(..) {
            request.discard();
            self.shared.counters.canceled.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.available.notify_all();
        self.shared.idle.notify_all();
        log::debug!("Geo filter loader shutting down");
    }
}

impl Drop for GeoFilterLoader {
    /// Signals the worker but does not join it, so a slow store call cannot
    /// hold up process exit.
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    queue.running = false;
                    return;
                }
                if let Some(request) = queue.pending.pop_front() {
                    queue.running = true;
                    break request;
                }
                shared.idle.notify_all();
                shared.available.wait(&mut queue);
            }
        };

        shared.process(&request);

        let mut queue = shared.queue.lock();
        queue.running = false;
        if queue.pending.is_empty() {
            shared.idle.notify_all();
        }
    }
}

impl Shared {
    fn process(&self, request: &LoaderRequest) {
        if !request.start() {
            log::trace!("Skipping canceled request {}", request.executor_id());
            self.counters.canceled.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let options = request.options();
        let query = match self.indexer.select(request.bbox()) {
            Some(geo) => {
                request.set_coverage(geo.coverage().clone());
                combine(
                    geo,
                    options.attribute_filter.clone(),
                    options.include_geo_parts,
                )
            }
            None => {
                request.set_coverage(GeoPartCoverage::Parts(Vec::new()));
                let state = request.finish(LoadOutcome::NoGeoParts);
                self.deliver(request, state);
                return;
            }
        };

        let ctx = QueryContext::new(self.timeout);
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.store
                .connect()
                .and_then(|mut connection| connection.execute_query(&query, &ctx))
        }))
        .unwrap_or_else(|_| {
            log::error!("Store panicked on request {}", request.executor_id());
            Err(GeoFilterError::store("store panicked"))
        });
        let sql_running_time = started.elapsed();

        let outcome = match result {
            Ok(tour_ids) => {
                log::debug!(
                    "Request {}: {} tour(s) from {} geo part(s) in {:?}",
                    request.executor_id(),
                    tour_ids.len(),
                    query.geo().coverage().part_count(),
                    sql_running_time
                );
                LoadOutcome::Loaded {
                    tour_ids,
                    sql_running_time,
                }
            }
            Err(e) => {
                log::error!(
                    "Geo filter query {} failed: {}\n{}",
                    request.executor_id(),
                    e,
                    query.to_sql()
                );
                LoadOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        let state = request.finish(outcome);
        self.deliver(request, state);
    }

    fn deliver(&self, request: &LoaderRequest, state: RequestState) {
        match state {
            RequestState::Completed => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            RequestState::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                log::trace!(
                    "Discarding result of superseded request {}",
                    request.executor_id()
                );
                self.counters.canceled.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let listener = &self.listener;
        if catch_unwind(AssertUnwindSafe(|| listener.on_result(request))).is_err() {
            log::error!(
                "Load listener panicked for request {}",
                request.executor_id()
            );
        }
    }
}
