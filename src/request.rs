//! A submitted, cancelable geo filter evaluation.

use crate::catalog::GeoFilter;
use crate::grid::GeoBoundingBox;
use crate::indexer::GeoPartCoverage;
use crate::query::AttributeFilter;
use crate::store::TourId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle of a request: `Queued -> Running -> {Completed | Failed | Canceled}`.
///
/// A request canceled while still queued goes straight to `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Canceled
        )
    }
}

/// Result attached to a request by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded {
        tour_ids: Vec<TourId>,
        sql_running_time: Duration,
    },
    /// The box covers no geo part, nothing was queried.
    NoGeoParts,
    Failed {
        message: String,
    },
}

/// How the geo parts are combined when the request runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub include_geo_parts: bool,
    pub attribute_filter: Option<AttributeFilter>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            include_geo_parts: true,
            attribute_filter: None,
        }
    }
}

struct Progress {
    state: RequestState,
    coverage: Option<GeoPartCoverage>,
    outcome: Option<LoadOutcome>,
}

struct RequestInner {
    executor_id: u64,
    bbox: GeoBoundingBox,
    filter: Option<GeoFilter>,
    options: LoadOptions,
    submitted_at: Instant,
    canceled: AtomicBool,
    progress: Mutex<Progress>,
    finished: Condvar,
}

/// Shared handle to one request. Clones refer to the same request.
#[derive(Clone)]
pub struct LoaderRequest {
    inner: Arc<RequestInner>,
}

impl LoaderRequest {
    pub(crate) fn new(
        executor_id: u64,
        bbox: GeoBoundingBox,
        filter: Option<GeoFilter>,
        options: LoadOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                executor_id,
                bbox,
                filter,
                options,
                submitted_at: Instant::now(),
                canceled: AtomicBool::new(false),
                progress: Mutex::new(Progress {
                    state: RequestState::Queued,
                    coverage: None,
                    outcome: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Monotonically increasing per loader; a larger id is a newer request.
    pub fn executor_id(&self) -> u64 {
        self.inner.executor_id
    }

    pub fn bbox(&self) -> &GeoBoundingBox {
        &self.inner.bbox
    }

    pub fn filter(&self) -> Option<&GeoFilter> {
        self.inner.filter.as_ref()
    }

    pub fn options(&self) -> &LoadOptions {
        &self.inner.options
    }

    pub fn age(&self) -> Duration {
        self.inner.submitted_at.elapsed()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Mark the request as obsolete. Returns `false` if it had already
    /// finished or been canceled.
    ///
    /// A running store call is not interrupted, its result is discarded.
    pub fn cancel(&self) -> bool {
        let mut progress = self.inner.progress.lock();
        if progress.state.is_terminal() {
            return false;
        }
        self.inner.canceled.store(true, Ordering::Release);
        if progress.state == RequestState::Queued {
            progress.state = RequestState::Canceled;
            self.inner.finished.notify_all();
        }
        true
    }

    pub fn state(&self) -> RequestState {
        self.inner.progress.lock().state
    }

    /// Covered geo parts, available once the worker has indexed the box.
    pub fn coverage(&self) -> Option<GeoPartCoverage> {
        self.inner.progress.lock().coverage.clone()
    }

    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.inner.progress.lock().outcome.clone()
    }

    /// Loaded tour ids; empty until completed and for failed requests.
    pub fn tour_ids(&self) -> Vec<TourId> {
        match &self.inner.progress.lock().outcome {
            Some(LoadOutcome::Loaded { tour_ids, .. }) => tour_ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn sql_running_time(&self) -> Option<Duration> {
        match &self.inner.progress.lock().outcome {
            Some(LoadOutcome::Loaded {
                sql_running_time, ..
            }) => Some(*sql_running_time),
            _ => None,
        }
    }

    /// Short status line for the map overlay.
    pub fn display_text(&self) -> String {
        let progress = self.inner.progress.lock();
        match (&progress.state, &progress.outcome) {
            (RequestState::Canceled, _) => "canceled".to_string(),
            (_, Some(LoadOutcome::Loaded {
                tour_ids,
                sql_running_time,
            })) => format!(
                "{} tours · {} ms",
                tour_ids.len(),
                sql_running_time.as_millis()
            ),
            (_, Some(LoadOutcome::NoGeoParts)) => "0 tours".to_string(),
            (_, Some(LoadOutcome::Failed { message })) => format!("error: {}", message),
            _ => "loading…".to_string(),
        }
    }

    /// Block until the request reaches a terminal state or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> RequestState {
        let deadline = Instant::now() + timeout;
        let mut progress = self.inner.progress.lock();
        while !progress.state.is_terminal() {
            if self
                .inner
                .finished
                .wait_until(&mut progress, deadline)
                .timed_out()
            {
                break;
            }
        }
        progress.state
    }

    pub fn is_same(&self, other: &LoaderRequest) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queued -> Running. Returns `false` when the request was canceled.
    pub(crate) fn start(&self) -> bool {
        let mut progress = self.inner.progress.lock();
        if progress.state != RequestState::Queued || self.is_canceled() {
            return false;
        }
        progress.state = RequestState::Running;
        true
    }

    pub(crate) fn set_coverage(&self, coverage: GeoPartCoverage) {
        self.inner.progress.lock().coverage = Some(coverage);
    }

    /// Attach the outcome unless the request was canceled meanwhile.
    /// Returns the final state.
    pub(crate) fn finish(&self, outcome: LoadOutcome) -> RequestState {
        let mut progress = self.inner.progress.lock();
        let state = if self.is_canceled() {
            RequestState::Canceled
        } else if matches!(outcome, LoadOutcome::Failed { .. }) {
            progress.outcome = Some(outcome);
            RequestState::Failed
        } else {
            progress.outcome = Some(outcome);
            RequestState::Completed
        };
        progress.state = state;
        self.inner.finished.notify_all();
        state
    }

    /// Drop a request that never ran, e.g. when the loader shuts down.
    pub(crate) fn discard(&self) {
        let mut progress = self.inner.progress.lock();
        if !progress.state.is_terminal() {
            self.inner.canceled.store(true, Ordering::Release);
            progress.state = RequestState::Canceled;
            self.inner.finished.notify_all();
        }
    }
}

impl fmt::Debug for LoaderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRequest")
            .field("executor_id", &self.inner.executor_id)
            .field("bbox", &self.inner.bbox)
            .field("state", &self.state())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
