use crate::cursor::{CursorCancel, RowCursor, TreeCursor, TreeNode};
use crate::error::TableError;
use crate::table::{SwapTable, SwapTableConfig};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewOptions {
    /// Load on a background thread; otherwise construction blocks until loading ends (default: true).
    pub background: bool,
    /// Maximum number of data rows to materialize.
    pub max_rows: Option<usize>,
    /// Rows between [`RowCountMonitor`] callbacks (default: 100).
    pub monitor_interval: usize,
    pub table: SwapTableConfig,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            background: true,
            max_rows: None,
            monitor_interval: 100,
            table: SwapTableConfig::default(),
        }
    }
}

/// Progress sink fed with batched row-count deltas during materialization.
pub trait RowCountMonitor: Send + Sync {
    fn rows_loaded(&self, delta: usize);
}

impl<F> RowCountMonitor for F
where
    F: Fn(usize) + Send + Sync,
{
    fn rows_loaded(&self, delta: usize) {
        self(delta)
    }
}

/// How a load ended. Only `Failed` corresponds to an error; it is delivered to readers through
/// [`SwapTable::more_rows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Finished,
    Capped,
    Cancelled,
    Failed,
}

struct ViewShared {
    cancelled: AtomicBool,
    applied_max_rows: OnceLock<usize>,
    cursor_cancel: Option<Arc<dyn CursorCancel>>,
}

/// Completes the table when the load scope ends, whichever way it ends.
struct LoadGuard {
    table: SwapTable,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.table
                .fail(TableError::producer("producer panicked while loading rows"));
        }
        self.table.complete();
    }
}

/// A [`SwapTable`] being filled from an upstream producer.
pub struct StreamingTableView {
    table: SwapTable,
    shared: Arc<ViewShared>,
    loader: Mutex<Option<JoinHandle<LoadOutcome>>>,
    outcome: Mutex<Option<LoadOutcome>>,
}

impl std::fmt::Debug for StreamingTableView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTableView")
            .field("table", &self.table)
            .field("cancelled", &self.is_cancelled())
            .field("applied_max_rows", &self.applied_max_rows())
            .finish()
    }
}

impl StreamingTableView {
    pub fn from_cursor(cursor: Box<dyn RowCursor>, options: ViewOptions) -> Self {
        Self::start(cursor, options, None)
    }

    pub fn from_cursor_with_monitor(
        cursor: Box<dyn RowCursor>,
        options: ViewOptions,
        monitor: Arc<dyn RowCountMonitor>,
    ) -> Self {
        Self::start(cursor, options, Some(monitor))
    }

    /// Build from a hierarchical result; see [`TreeCursor`] for the row/column mapping.
    pub fn from_tree(root: &TreeNode, options: ViewOptions) -> Self {
        Self::start(Box::new(TreeCursor::new(root)), options, None)
    }

    fn start(
        cursor: Box<dyn RowCursor>,
        options: ViewOptions,
        monitor: Option<Arc<dyn RowCountMonitor>>,
    ) -> Self {
        let header: Vec<String> = (0..cursor.column_count())
            .map(|i| cursor.column_name(i))
            .collect();
        let table = SwapTable::new(header, options.table.clone());
        let shared = Arc::new(ViewShared {
            cancelled: AtomicBool::new(false),
            applied_max_rows: OnceLock::new(),
            cursor_cancel: cursor.cancel_hook(),
        });

        let loader = Loader {
            cursor,
            table: table.clone(),
            shared: shared.clone(),
            max_rows: options.max_rows,
            monitor,
            monitor_interval: options.monitor_interval.max(1),
        };

        let mut view = Self {
            table,
            shared,
            loader: Mutex::new(None),
            outcome: Mutex::new(None),
        };

        if options.background {
            // Keep the cursor reachable if the spawn fails so we can fall back to loading inline.
            let slot = Arc::new(Mutex::new(Some(loader)));
            let thread_slot = slot.clone();
            let spawned = std::thread::Builder::new()
                .name("rowset-load".to_string())
                .spawn(move || {
                    let loader = thread_slot
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .take();
                    loader.map_or(LoadOutcome::Cancelled, Loader::run)
                });
            match spawned {
                Ok(handle) => {
                    *view.loader.get_mut().unwrap_or_else(|p| p.into_inner()) = Some(handle);
                    return view;
                }
                Err(err) => {
                    log::warn!("failed to spawn background loader, loading inline: {err}");
                    let loader = slot
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .take();
                    let outcome = loader.map_or(LoadOutcome::Cancelled, Loader::run_inline);
                    *view.outcome.get_mut().unwrap_or_else(|p| p.into_inner()) = Some(outcome);
                    return view;
                }
            }
        }

        let outcome = loader.run_inline();
        *view.outcome.get_mut().unwrap_or_else(|p| p.into_inner()) = Some(outcome);
        view
    }

    pub fn table(&self) -> &SwapTable {
        &self.table
    }

    /// The row cap actually enforced, if loading stopped because of one.
    pub fn applied_max_rows(&self) -> Option<usize> {
        self.shared.applied_max_rows.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Best-effort cancel; see [`ViewCancelHandle::cancel`].
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// A detached handle that can cancel this view from another thread.
    pub fn cancel_handle(&self) -> ViewCancelHandle {
        ViewCancelHandle {
            table: self.table.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Wait for the load to end and report how it ended.
    pub fn wait(&self) -> LoadOutcome {
        let mut loader = self
            .loader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = loader.take() {
            let joined = handle.join().unwrap_or(LoadOutcome::Failed);
            *self
                .outcome
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(joined);
        }
        drop(loader);

        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unwrap_or(LoadOutcome::Finished)
    }
}

/// Cloneable cancel capability for a [`StreamingTableView`].
#[derive(Clone)]
pub struct ViewCancelHandle {
    table: SwapTable,
    shared: Arc<ViewShared>,
}

impl ViewCancelHandle {
    /// Set the cancelled flag, ask the producer to stop if it can, and complete the table so
    /// blocked readers wake up. Never panics.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hook) = &self.shared.cursor_cancel {
            if catch_unwind(AssertUnwindSafe(|| hook.cancel())).is_err() {
                log::warn!("producer cancel hook panicked");
            }
        }
        self.table.complete();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

struct Loader {
    cursor: Box<dyn RowCursor>,
    table: SwapTable,
    shared: Arc<ViewShared>,
    max_rows: Option<usize>,
    monitor: Option<Arc<dyn RowCountMonitor>>,
    monitor_interval: usize,
}

impl Loader {
    /// Run on the caller's thread. A panicking producer fails the load instead of unwinding
    /// into the caller; the guard has already completed the table.
    fn run_inline(self) -> LoadOutcome {
        catch_unwind(AssertUnwindSafe(|| self.run())).unwrap_or_else(|_| {
            log::warn!("row producer panicked while loading inline");
            LoadOutcome::Failed
        })
    }

    fn run(mut self) -> LoadOutcome {
        let guard = LoadGuard {
            table: self.table.clone(),
        };
        let mut loaded = 0usize;
        let mut unreported = 0usize;

        let outcome = loop {
            if self.is_cancelled() {
                break LoadOutcome::Cancelled;
            }

            if let Some(cap) = self.max_rows {
                if loaded >= cap {
                    // Only count it as capped if the producer actually had more rows.
                    match self.cursor.advance() {
                        Ok(true) => {
                            let applied = self
                                .cursor
                                .applied_row_limit()
                                .map_or(cap, |limit| limit.min(cap));
                            let _ = self.shared.applied_max_rows.set(applied);
                            break LoadOutcome::Capped;
                        }
                        Ok(false) => break self.finished(loaded),
                        Err(err) => break self.failed(err),
                    }
                }
            }

            match self.cursor.advance() {
                Ok(true) => {
                    let row = (0..self.table.column_count())
                        .map(|i| self.cursor.value(i))
                        .collect();
                    if let Err(err) = self.table.append(row) {
                        break self.failed(err);
                    }
                    loaded += 1;
                    unreported += 1;
                    if unreported >= self.monitor_interval {
                        self.report(unreported);
                        unreported = 0;
                    }
                }
                Ok(false) => break self.finished(loaded),
                Err(err) => break self.failed(err),
            }
        };

        if unreported > 0 {
            self.report(unreported);
        }
        drop(guard);
        log::debug!("row load ended after {loaded} rows: {outcome:?}");
        outcome
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    fn finished(&self, loaded: usize) -> LoadOutcome {
        if let Some(limit) = self.cursor.applied_row_limit() {
            if loaded >= limit {
                let _ = self.shared.applied_max_rows.set(limit);
            }
        }
        LoadOutcome::Finished
    }

    fn failed(&self, err: TableError) -> LoadOutcome {
        // Errors caused by cancelling (including appends after the forced completion) are not
        // producer failures.
        if self.is_cancelled() {
            return LoadOutcome::Cancelled;
        }
        log::warn!("row producer failed: {err}");
        self.table.fail(err);
        LoadOutcome::Failed
    }

    fn report(&self, delta: usize) {
        if let Some(monitor) = &self.monitor {
            monitor.rows_loaded(delta);
        }
    }
}
