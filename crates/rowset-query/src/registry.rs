use crate::error::CancelError;
use chrono::{DateTime, Utc};
use rowset_table::{RowCountMonitor, StreamingTableView, ViewCancelHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Capability implemented by every operation that can be asked to stop.
pub trait Cancellable: Send + Sync {
    fn cancel(&self) -> Result<(), CancelError>;
}

impl Cancellable for ViewCancelHandle {
    fn cancel(&self) -> Result<(), CancelError> {
        ViewCancelHandle::cancel(self);
        Ok(())
    }
}

impl Cancellable for StreamingTableView {
    fn cancel(&self) -> Result<(), CancelError> {
        StreamingTableView::cancel(self);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(String);

impl QueryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Live row counter shared between a loading query and its record.
#[derive(Debug, Clone, Default)]
pub struct RowCounter(Arc<AtomicU64>);

impl RowCounter {
    pub fn add(&self, rows: u64) {
        self.0.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl RowCountMonitor for RowCounter {
    fn rows_loaded(&self, delta: usize) {
        self.add(delta as u64);
    }
}

/// Point-in-time snapshot of a running query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub id: QueryId,
    pub session: String,
    pub user: String,
    pub asset: String,
    pub started_at: DateTime<Utc>,
    pub rows: u64,
    pub cancellable: bool,
}

/// Description of a query about to start.
pub struct QuerySpec {
    user: String,
    asset: String,
    session: Option<String>,
    handle: Option<Arc<dyn Cancellable>>,
    rows: RowCounter,
}

impl QuerySpec {
    pub fn new(user: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            asset: asset.into(),
            session: None,
            handle: None,
            rows: RowCounter::default(),
        }
    }

    /// Session descriptor; defaults to the starting thread's name or id.
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn handle(mut self, handle: Arc<dyn Cancellable>) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn rows(mut self, rows: RowCounter) -> Self {
        self.rows = rows;
        self
    }
}

/// Outcome of [`QueryRegistry::cancel_all`].
#[derive(Debug, Clone)]
pub struct CancelReport {
    pub attempted: usize,
    pub cancelled: usize,
    pub failures: Vec<CancelError>,
    pub at: DateTime<Utc>,
}

type HandleKey = usize;

fn handle_key(handle: &Arc<dyn Cancellable>) -> HandleKey {
    Arc::as_ptr(handle) as *const () as usize
}

#[derive(Default)]
struct PendingSet {
    live: HashMap<HandleKey, Weak<dyn Cancellable>>,
    /// Handles cancelled in the current batch. A `Weak` pins the allocation, so an address match
    /// with a live strong count is the same handle.
    cancelled: HashMap<HandleKey, Weak<dyn Cancellable>>,
}

impl PendingSet {
    fn prune(&mut self) {
        self.live.retain(|_, handle| handle.strong_count() > 0);
        self.cancelled.retain(|_, handle| handle.strong_count() > 0);
    }

    fn was_cancelled(&self, key: HandleKey) -> bool {
        self.cancelled
            .get(&key)
            .is_some_and(|handle| handle.strong_count() > 0)
    }
}

struct LiveQuery {
    session: String,
    user: String,
    asset: String,
    started_at: DateTime<Utc>,
    rows: RowCounter,
    handle: Option<Weak<dyn Cancellable>>,
}

struct Inner {
    pending: Mutex<PendingSet>,
    queries: Mutex<HashMap<QueryId, LiveQuery>>,
    last_cancelled: Mutex<Option<DateTime<Utc>>>,
}

/// Registry of in-flight cancellable operations.
///
/// Handles are held weakly, so registration never keeps a finished operation alive; callers
/// still de-register on completion to keep the set small. `cancel_all` snapshots the set and
/// cancels outside the lock, so a slow cancel never blocks unrelated registrations.
///
/// A handle cancelled by the current batch cannot be re-registered until the next
/// `cancel_all`; pooled statements that get reused must not come back to life early.
#[derive(Clone)]
pub struct QueryRegistry {
    inner: Arc<Inner>,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(PendingSet::default()),
                queries: Mutex::new(HashMap::new()),
                last_cancelled: Mutex::new(None),
            }),
        }
    }

    /// Register a handle. Returns `false` if it was cancelled by the current batch.
    pub fn add_pending(&self, handle: &Arc<dyn Cancellable>) -> bool {
        let key = handle_key(handle);
        let mut pending = self.inner.pending.lock().expect("query registry mutex poisoned");
        if pending.was_cancelled(key) {
            log::debug!("refusing to re-register a handle cancelled in the current batch");
            return false;
        }
        pending.live.insert(key, Arc::downgrade(handle));
        true
    }

    /// De-register a handle after normal completion. Returns whether it was registered.
    pub fn remove_pending(&self, handle: &Arc<dyn Cancellable>) -> bool {
        self.remove_pending_key(handle_key(handle))
    }

    fn remove_pending_key(&self, key: HandleKey) -> bool {
        self.inner
            .pending
            .lock()
            .expect("query registry mutex poisoned")
            .live
            .remove(&key)
            .is_some()
    }

    /// Number of registered handles still alive.
    pub fn pending_count(&self) -> usize {
        let mut pending = self.inner.pending.lock().expect("query registry mutex poisoned");
        pending.prune();
        pending.live.len()
    }

    pub fn is_pending(&self, handle: &Arc<dyn Cancellable>) -> bool {
        self.inner
            .pending
            .lock()
            .expect("query registry mutex poisoned")
            .live
            .contains_key(&handle_key(handle))
    }

    /// Whether `handle` was cancelled by the current batch.
    pub fn is_cancelled(&self, handle: &Arc<dyn Cancellable>) -> bool {
        self.inner
            .pending
            .lock()
            .expect("query registry mutex poisoned")
            .was_cancelled(handle_key(handle))
    }

    /// Cancel every registered handle. Individual failures (errors or panics) are logged and
    /// reported without stopping the batch; failed handles stay registered.
    pub fn cancel_all(&self) -> CancelReport {
        let snapshot: Vec<(HandleKey, Weak<dyn Cancellable>)> = {
            let mut pending = self.inner.pending.lock().expect("query registry mutex poisoned");
            pending.prune();
            pending
                .live
                .iter()
                .map(|(key, handle)| (*key, handle.clone()))
                .collect()
        };

        let mut cancelled = Vec::new();
        let mut failures = Vec::new();
        let mut attempted = 0;
        for (key, weak) in snapshot {
            let Some(handle) = weak.upgrade() else {
                continue;
            };
            attempted += 1;
            match invoke_cancel(&*handle) {
                Ok(()) => cancelled.push((key, weak)),
                Err(err) => {
                    log::warn!("failed to cancel pending query: {err}");
                    failures.push(err);
                }
            }
        }

        let at = Utc::now();
        {
            let mut pending = self.inner.pending.lock().expect("query registry mutex poisoned");
            pending.cancelled.clear();
            for (key, weak) in &cancelled {
                pending.live.remove(key);
                pending.cancelled.insert(*key, weak.clone());
            }
        }
        *self
            .inner
            .last_cancelled
            .lock()
            .expect("query registry mutex poisoned") = Some(at);

        log::info!(
            "cancelled {} of {} pending queries ({} failed)",
            cancelled.len(),
            attempted,
            failures.len()
        );
        CancelReport {
            attempted,
            cancelled: cancelled.len(),
            failures,
            at,
        }
    }

    pub fn last_cancelled(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_cancelled
            .lock()
            .expect("query registry mutex poisoned")
    }

    /// Record a running query. The record (and its pending handle) go away when the guard drops.
    pub fn start_query(&self, spec: QuerySpec) -> QueryGuard {
        let id = QueryId::generate();
        let session = spec.session.unwrap_or_else(|| {
            let current = std::thread::current();
            current
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", current.id()))
        });

        let pending_key = spec.handle.as_ref().map(|handle| {
            if !self.add_pending(handle) {
                log::debug!("query {id} started with a handle cancelled in the current batch");
            }
            handle_key(handle)
        });

        let live = LiveQuery {
            session,
            user: spec.user,
            asset: spec.asset,
            started_at: Utc::now(),
            rows: spec.rows.clone(),
            handle: spec.handle.as_ref().map(Arc::downgrade),
        };
        self.inner
            .queries
            .lock()
            .expect("query registry mutex poisoned")
            .insert(id.clone(), live);

        QueryGuard {
            registry: self.clone(),
            id,
            rows: spec.rows,
            handle_key: pending_key,
        }
    }

    pub fn query_count(&self) -> usize {
        self.inner
            .queries
            .lock()
            .expect("query registry mutex poisoned")
            .len()
    }

    /// Snapshot of running queries, oldest first.
    pub fn queries(&self) -> Vec<QueryRecord> {
        let queries = self.inner.queries.lock().expect("query registry mutex poisoned");
        let mut records: Vec<QueryRecord> = queries
            .iter()
            .map(|(id, live)| QueryRecord {
                id: id.clone(),
                session: live.session.clone(),
                user: live.user.clone(),
                asset: live.asset.clone(),
                started_at: live.started_at,
                rows: live.rows.get(),
                cancellable: live
                    .handle
                    .as_ref()
                    .is_some_and(|handle| handle.strong_count() > 0),
            })
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Cancel one running query. Returns `Ok(false)` if it is unknown or not cancellable.
    pub fn cancel_query(&self, id: &QueryId) -> Result<bool, CancelError> {
        let handle = {
            let queries = self.inner.queries.lock().expect("query registry mutex poisoned");
            queries
                .get(id)
                .and_then(|live| live.handle.as_ref())
                .and_then(Weak::upgrade)
        };
        let Some(handle) = handle else {
            return Ok(false);
        };

        invoke_cancel(&*handle)?;
        let key = handle_key(&handle);
        let mut pending = self.inner.pending.lock().expect("query registry mutex poisoned");
        pending.live.remove(&key);
        pending.cancelled.insert(key, Arc::downgrade(&handle));
        Ok(true)
    }

    fn finish_query(&self, id: &QueryId, handle_key: Option<HandleKey>) {
        self.inner
            .queries
            .lock()
            .expect("query registry mutex poisoned")
            .remove(id);
        if let Some(key) = handle_key {
            self.remove_pending_key(key);
        }
    }
}

fn invoke_cancel(handle: &dyn Cancellable) -> Result<(), CancelError> {
    match catch_unwind(AssertUnwindSafe(|| handle.cancel())) {
        Ok(result) => result,
        Err(_) => Err(CancelError::new("cancel panicked")),
    }
}

/// Keeps a [`QueryRecord`] registered while the query runs.
pub struct QueryGuard {
    registry: QueryRegistry,
    id: QueryId,
    rows: RowCounter,
    handle_key: Option<HandleKey>,
}

impl QueryGuard {
    pub fn id(&self) -> &QueryId {
        &self.id
    }

    pub fn rows(&self) -> &RowCounter {
        &self.rows
    }
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.registry.finish_query(&self.id, self.handle_key);
    }
}
