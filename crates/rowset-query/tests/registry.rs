use pretty_assertions::assert_eq;
use rowset_query::{CancelError, Cancellable, QueryRegistry, QuerySpec, RowCounter};
use rowset_table::{RowCountMonitor, StreamingTableView, VecCursor, Value, ViewOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Handle {
    cancels: AtomicUsize,
    fail: bool,
}

impl Handle {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl Cancellable for Handle {
    fn cancel(&self) -> Result<(), CancelError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(CancelError::new("driver refused cancel"))
        } else {
            Ok(())
        }
    }
}

fn cancellable(handle: &Arc<Handle>) -> Arc<dyn Cancellable> {
    handle.clone()
}

#[test]
fn cancel_all_cancels_and_empties_registry() {
    let registry = QueryRegistry::new();
    let handle = Arc::new(Handle::default());
    let h = cancellable(&handle);

    assert!(registry.add_pending(&h));
    assert_eq!(registry.pending_count(), 1);
    assert_eq!(registry.last_cancelled(), None);

    let report = registry.cancel_all();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.cancelled, 1);
    assert!(registry.is_cancelled(&h));
    assert_eq!(registry.pending_count(), 0);
    assert_eq!(registry.last_cancelled(), Some(report.at));
    assert_eq!(handle.cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn one_failing_cancel_does_not_abort_the_batch() {
    let registry = QueryRegistry::new();
    let first = Arc::new(Handle::default());
    let second = Arc::new(Handle::failing());
    let third = Arc::new(Handle::default());
    let (h1, h2, h3) = (cancellable(&first), cancellable(&second), cancellable(&third));
    for h in [&h1, &h2, &h3] {
        registry.add_pending(h);
    }

    let report = registry.cancel_all();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.failures, vec![CancelError::new("driver refused cancel")]);

    assert!(registry.is_cancelled(&h1));
    assert!(!registry.is_cancelled(&h2));
    assert!(registry.is_cancelled(&h3));
    assert_eq!(first.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(third.cancels.load(Ordering::SeqCst), 1);
    // The failed handle stays registered so a later batch can retry it.
    assert!(registry.is_pending(&h2));
    assert_eq!(registry.pending_count(), 1);
}

#[test]
fn panicking_cancel_is_isolated() {
    struct Panics;
    impl Cancellable for Panics {
        fn cancel(&self) -> Result<(), CancelError> {
            panic!("bad driver");
        }
    }

    let registry = QueryRegistry::new();
    let bad: Arc<dyn Cancellable> = Arc::new(Panics);
    let good_inner = Arc::new(Handle::default());
    let good = cancellable(&good_inner);
    registry.add_pending(&bad);
    registry.add_pending(&good);

    let report = registry.cancel_all();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.cancelled, 1);
    assert!(registry.is_cancelled(&good));
}

#[test]
fn cancelled_handle_cannot_be_re_added_in_same_batch() {
    let registry = QueryRegistry::new();
    let handle = Arc::new(Handle::default());
    let h = cancellable(&handle);
    registry.add_pending(&h);
    registry.cancel_all();

    assert!(!registry.add_pending(&h));
    assert_eq!(registry.pending_count(), 0);

    // The next batch starts fresh.
    registry.cancel_all();
    assert!(!registry.is_cancelled(&h));
    assert!(registry.add_pending(&h));
    assert_eq!(registry.pending_count(), 1);
}

#[test]
fn registration_does_not_keep_handles_alive() {
    let registry = QueryRegistry::new();
    {
        let h: Arc<dyn Cancellable> = Arc::new(Handle::default());
        registry.add_pending(&h);
        assert_eq!(registry.pending_count(), 1);
    }
    assert_eq!(registry.pending_count(), 0);
    assert_eq!(registry.cancel_all().attempted, 0);
}

#[test]
fn remove_pending_deregisters() {
    let registry = QueryRegistry::new();
    let h: Arc<dyn Cancellable> = Arc::new(Handle::default());
    registry.add_pending(&h);
    assert!(registry.remove_pending(&h));
    assert!(!registry.remove_pending(&h));
    assert_eq!(registry.cancel_all().attempted, 0);
}

#[test]
fn slow_cancel_does_not_block_registration() {
    struct Slow(Arc<Barrier>);
    impl Cancellable for Slow {
        fn cancel(&self) -> Result<(), CancelError> {
            self.0.wait();
            thread::sleep(Duration::from_millis(20));
            Ok(())
        }
    }

    let registry = QueryRegistry::new();
    let barrier = Arc::new(Barrier::new(2));
    let slow: Arc<dyn Cancellable> = Arc::new(Slow(barrier.clone()));
    registry.add_pending(&slow);

    let batch = {
        let registry = registry.clone();
        thread::spawn(move || registry.cancel_all())
    };

    // Cancel is in progress; registering an unrelated handle must still go through.
    barrier.wait();
    let other: Arc<dyn Cancellable> = Arc::new(Handle::default());
    assert!(registry.add_pending(&other));

    let report = batch.join().unwrap();
    assert_eq!(report.cancelled, 1);
    assert!(registry.is_pending(&other));
}

#[test]
fn query_records_track_lifecycle_and_rows() {
    let registry = QueryRegistry::new();
    let handle: Arc<dyn Cancellable> = Arc::new(Handle::default());
    let rows = RowCounter::default();

    let guard = registry.start_query(
        QuerySpec::new("ann", "sales::region")
            .session("session-7")
            .handle(handle.clone())
            .rows(rows.clone()),
    );
    rows.rows_loaded(100);
    rows.rows_loaded(42);

    let records = registry.queries();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(&record.id, guard.id());
    assert_eq!(record.user, "ann");
    assert_eq!(record.asset, "sales::region");
    assert_eq!(record.session, "session-7");
    assert_eq!(record.rows, 142);
    assert!(record.cancellable);
    assert!(registry.is_pending(&handle));

    drop(guard);
    assert_eq!(registry.query_count(), 0);
    assert!(!registry.is_pending(&handle));
}

#[test]
fn cancel_query_targets_one_record() {
    let registry = QueryRegistry::new();
    let a_inner = Arc::new(Handle::default());
    let b_inner = Arc::new(Handle::default());
    let a = registry.start_query(QuerySpec::new("ann", "a").handle(cancellable(&a_inner)));
    let _b = registry.start_query(QuerySpec::new("bob", "b").handle(cancellable(&b_inner)));

    assert_eq!(registry.cancel_query(a.id()), Ok(true));
    assert_eq!(a_inner.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(b_inner.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(registry.pending_count(), 1);
    assert_eq!(registry.cancel_query(&"unknown".into()), Ok(false));
}

#[test]
fn cancel_all_cancels_streaming_views() {
    let registry = QueryRegistry::new();
    let rows: Vec<Vec<Value>> = (0..10).map(|i| vec![Value::from(i as f64)]).collect();
    let view = Arc::new(StreamingTableView::from_cursor(
        Box::new(VecCursor::new(vec!["n".to_string()], rows)),
        ViewOptions::default(),
    ));
    let handle: Arc<dyn Cancellable> = view.clone();
    registry.add_pending(&handle);

    registry.cancel_all();
    assert!(view.is_cancelled());
    assert!(view.table().is_complete());
}
