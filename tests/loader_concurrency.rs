use geo::Point;
use geopart_filter::{
    Config, GeoBoundingBox, GeoFilterError, GeoFilterLoader, LoadOutcome, LoaderRequest,
    MemoryTourStore, QueryContext, QueuePolicy, RequestState, Result, TourConnection, TourId,
    TourQuery, TourRecord, TourStore,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Holds every query until the gate is opened.
struct GatedStore {
    inner: MemoryTourStore,
    gate: Mutex<Gate>,
    changed: Condvar,
}

#[derive(Default)]
struct Gate {
    open: bool,
    entered: usize,
}

impl GatedStore {
    fn new(inner: MemoryTourStore) -> Self {
        Self {
            inner,
            gate: Mutex::new(Gate::default()),
            changed: Condvar::new(),
        }
    }

    fn open(&self) {
        self.gate.lock().open = true;
        self.changed.notify_all();
    }

    fn wait_entered(&self, count: usize) {
        let mut gate = self.gate.lock();
        while gate.entered < count {
            assert!(
                !self.changed.wait_for(&mut gate, WAIT).timed_out(),
                "worker never reached the store"
            );
        }
    }
}

struct GatedConnection<'a> {
    store: &'a GatedStore,
    inner: Box<dyn TourConnection + 'a>,
}

impl TourConnection for GatedConnection<'_> {
    fn execute_query(&mut self, query: &TourQuery, ctx: &QueryContext) -> Result<Vec<TourId>> {
        {
            let mut gate = self.store.gate.lock();
            gate.entered += 1;
            self.store.changed.notify_all();
            while !gate.open {
                self.store.changed.wait(&mut gate);
            }
        }
        self.inner.execute_query(query, ctx)
    }
}

impl TourStore for GatedStore {
    fn connect(&self) -> Result<Box<dyn TourConnection + '_>> {
        Ok(Box::new(GatedConnection {
            store: self,
            inner: self.inner.connect()?,
        }))
    }
}

/// Fails or sleeps instead of answering.
enum BrokenStore {
    Failing,
    Slow(Duration),
    Unreachable,
    Panicking,
}

struct BrokenConnection<'a>(&'a BrokenStore);

impl TourConnection for BrokenConnection<'_> {
    fn execute_query(&mut self, _query: &TourQuery, ctx: &QueryContext) -> Result<Vec<TourId>> {
        match self.0 {
            BrokenStore::Slow(delay) => {
                std::thread::sleep(*delay);
                ctx.check_deadline()?;
                Ok(Vec::new())
            }
            BrokenStore::Panicking => panic!("driver bug"),
            _ => Err(GeoFilterError::store("syntax error near GeoPart")),
        }
    }
}

impl TourStore for BrokenStore {
    fn connect(&self) -> Result<Box<dyn TourConnection + '_>> {
        match self {
            BrokenStore::Unreachable => Err(GeoFilterError::store("connection refused")),
            _ => Ok(Box::new(BrokenConnection(self))),
        }
    }
}

fn tours() -> MemoryTourStore {
    MemoryTourStore::with_tours(vec![
        TourRecord::from_track(1, &[Point::new(8.05, 47.45)]),
        TourRecord::from_track(2, &[Point::new(8.19, 47.40)]),
        TourRecord::from_track(3, &[Point::new(7.44, 46.95)]),
    ])
}

fn zurich() -> GeoBoundingBox {
    GeoBoundingBox::from_degrees(47.50, 8.00, 47.40, 8.20).unwrap()
}

type Delivered = Arc<Mutex<Vec<LoaderRequest>>>;

fn start(store: Arc<dyn TourStore>, config: &Config) -> (GeoFilterLoader, Delivered) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let loader = GeoFilterLoader::new(
        store,
        Arc::new(move |r: &LoaderRequest| sink.lock().push(r.clone())),
        config,
    )
    .unwrap();
    (loader, delivered)
}

#[test]
fn test_only_latest_request_is_delivered() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = Arc::new(GatedStore::new(tours()));
    let (loader, delivered) = start(store.clone(), &Config::default());

    let a = loader.submit(None, zurich(), None).unwrap();
    store.wait_entered(1);
    assert_eq!(a.state(), RequestState::Running);

    let b = loader.submit(Some(&a), zurich(), None).unwrap();
    assert!(a.is_canceled());
    assert_eq!(a.state(), RequestState::Running);

    let c = loader.submit(Some(&b), zurich(), None).unwrap();
    assert!(b.is_canceled());
    assert_eq!(b.state(), RequestState::Canceled);

    store.open();
    assert_eq!(c.wait_timeout(WAIT), RequestState::Completed);
    assert_eq!(a.wait_timeout(WAIT), RequestState::Canceled);
    assert!(loader.wait_idle(WAIT));

    assert!(a.outcome().is_none());
    assert_eq!(c.tour_ids(), vec![1, 2]);

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].is_same(&c));

    let stats = loader.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.canceled, 2);
}

#[test]
fn test_fifo_runs_every_live_request() {
    let store = Arc::new(GatedStore::new(tours()));
    let config = Config::default().with_queue_policy(QueuePolicy::Fifo);
    let (loader, delivered) = start(store.clone(), &config);

    let running = loader.submit(None, zurich(), None).unwrap();
    store.wait_entered(1);
    // independent consumers, nothing superseded
    let second = loader.submit(None, zurich(), None).unwrap();
    let third = loader.submit(None, zurich(), None).unwrap();
    assert_eq!(loader.pending(), 2);

    store.open();
    for request in [&running, &second, &third] {
        assert_eq!(request.wait_timeout(WAIT), RequestState::Completed);
    }
    assert!(loader.wait_idle(WAIT));

    let ids: Vec<u64> = delivered.lock().iter().map(|r| r.executor_id()).collect();
    assert_eq!(
        ids,
        vec![
            running.executor_id(),
            second.executor_id(),
            third.executor_id()
        ]
    );
}

#[test]
fn test_canceled_requests_never_reach_listener() {
    let store: Arc<dyn TourStore> = Arc::new(tours());
    let (loader, delivered) = start(store, &Config::default());

    let mut previous: Option<LoaderRequest> = None;
    let mut submitted = Vec::new();
    for i in 0..200 {
        let lon = 8.0 + (i % 20) as f64 * 0.01;
        let bbox = GeoBoundingBox::from_degrees(47.50, lon, 47.40, lon + 0.2).unwrap();
        let request = loader.submit(previous.as_ref(), bbox, None).unwrap();
        submitted.push(request.clone());
        previous = Some(request);
    }

    let last = previous.unwrap();
    assert_eq!(last.wait_timeout(WAIT), RequestState::Completed);
    assert!(loader.wait_idle(WAIT));

    let delivered = delivered.lock();
    assert!(delivered.iter().any(|r| r.is_same(&last)));
    for request in delivered.iter() {
        assert_eq!(request.state(), RequestState::Completed);
        assert!(request.outcome().is_some());
    }

    let mut ids: Vec<u64> = delivered.iter().map(|r| r.executor_id()).collect();
    ids.dedup();
    assert_eq!(ids.len(), delivered.len(), "request delivered twice");

    for request in &submitted {
        let was_delivered = delivered.iter().any(|r| r.is_same(request));
        assert_eq!(request.state() == RequestState::Canceled, !was_delivered);
    }

    let stats = loader.stats();
    assert_eq!(stats.submitted, 200);
    assert_eq!(stats.completed + stats.canceled, 200);
}

#[test]
fn test_store_failure_is_reported() {
    let (loader, delivered) = start(Arc::new(BrokenStore::Failing), &Config::default());

    let request = loader.submit(None, zurich(), None).unwrap();
    assert_eq!(request.wait_timeout(WAIT), RequestState::Failed);
    assert!(loader.wait_idle(WAIT));

    assert!(request.tour_ids().is_empty());
    assert_eq!(
        request.display_text(),
        "error: Store error: syntax error near GeoPart"
    );
    assert_eq!(delivered.lock().len(), 1);
    assert_eq!(loader.stats().failed, 1);

    // the worker survives and keeps serving
    let next = loader.submit(Some(&request), zurich(), None).unwrap();
    assert_eq!(next.wait_timeout(WAIT), RequestState::Failed);
}

#[test]
fn test_connection_failure_is_reported() {
    let (loader, _) = start(Arc::new(BrokenStore::Unreachable), &Config::default());
    let request = loader.submit(None, zurich(), None).unwrap();
    assert_eq!(request.wait_timeout(WAIT), RequestState::Failed);
    assert!(matches!(
        request.outcome(),
        Some(LoadOutcome::Failed { message }) if message.contains("connection refused")
    ));
}

#[test]
fn test_store_panic_fails_request_and_keeps_worker() {
    let (loader, delivered) = start(Arc::new(BrokenStore::Panicking), &Config::default());

    let first = loader.submit(None, zurich(), None).unwrap();
    assert_eq!(first.wait_timeout(WAIT), RequestState::Failed);
    assert!(first.display_text().contains("store panicked"));

    let second = loader.submit(Some(&first), zurich(), None).unwrap();
    assert_eq!(second.wait_timeout(WAIT), RequestState::Failed);
    assert!(loader.wait_idle(WAIT));

    assert_eq!(first.state(), RequestState::Failed);
    assert_eq!(delivered.lock().len(), 2);
    assert_eq!(loader.stats().failed, 2);
}

#[test]
fn test_query_deadline() {
    let config = Config::default().with_query_timeout(Some(Duration::from_millis(10)));
    let store = Arc::new(BrokenStore::Slow(Duration::from_millis(50)));
    let (loader, _) = start(store, &config);

    let request = loader.submit(None, zurich(), None).unwrap();
    assert_eq!(request.wait_timeout(WAIT), RequestState::Failed);
    assert!(request.display_text().contains("deadline"));
}

#[test]
fn test_close_cancels_waiting_requests() {
    let store = Arc::new(GatedStore::new(tours()));
    let config = Config::default().with_queue_policy(QueuePolicy::Fifo);
    let (loader, delivered) = start(store.clone(), &config);

    let running = loader.submit(None, zurich(), None).unwrap();
    store.wait_entered(1);
    let waiting = loader.submit(None, zurich(), None).unwrap();

    let closer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            store.open();
        })
    };
    loader.close();
    closer.join().unwrap();

    assert_eq!(waiting.state(), RequestState::Canceled);
    assert_eq!(running.state(), RequestState::Completed);
    assert_eq!(delivered.lock().len(), 1);
    assert!(matches!(
        loader.submit(None, zurich(), None),
        Err(GeoFilterError::Closed)
    ));
}
