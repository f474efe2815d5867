use crate::error::{Result, TableError};
use crate::spill::SpillFile;
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapTableConfig {
    /// Data rows kept in memory before full pages are spilled to disk (default: 10 000).
    pub max_rows_in_memory: usize,
    /// Rows per spilled page (default: 1 000). Clamped to `max_rows_in_memory`.
    pub rows_per_page: usize,
    /// Directory for spill files. `None` uses the system temp dir.
    pub spill_dir: Option<PathBuf>,
    /// How long a blocked [`SwapTable::more_rows`] sleeps before re-checking (default: 250ms).
    #[serde(with = "millis")]
    pub wait_interval: Duration,
}

impl Default for SwapTableConfig {
    fn default() -> Self {
        Self {
            max_rows_in_memory: 10_000,
            rows_per_page: 1_000,
            spill_dir: None,
            wait_interval: Duration::from_millis(250),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Explicit load state: how many data rows are available and whether more may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadState {
    pub loaded_count: usize,
    pub complete: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapTableStats {
    pub rows_in_memory: usize,
    pub rows_spilled: usize,
    pub pages_spilled: usize,
    pub page_reads: u64,
}

struct Inner {
    header: Row,
    column_types: Vec<ColumnType>,
    /// Data rows not yet spilled; `memory[0]` is data row `memory_start`.
    memory: Vec<Row>,
    memory_start: usize,
    spill: Option<SpillFile>,
    /// Most recently decoded spilled page.
    page_cache: Option<(usize, Arc<Vec<Row>>)>,
    loaded: usize,
    complete: bool,
    failure: Option<TableError>,
    last_write: Instant,
    page_reads: u64,
}

struct Shared {
    config: SwapTableConfig,
    inner: Mutex<Inner>,
    rows_ready: Condvar,
}

/// Append-only row table with one writer and any number of readers.
///
/// Row 0 is the header. The producer appends data rows with [`SwapTable::append`] and finishes
/// with [`SwapTable::complete`]; readers block in [`SwapTable::more_rows`] until the row they
/// want exists or the table completes. Once `max_rows_in_memory` is exceeded, the oldest full
/// pages move to a temp file; reads of spilled rows page them back in transparently.
///
/// Cloning is cheap and yields another handle to the same table.
#[derive(Clone)]
pub struct SwapTable {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SwapTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SwapTable")
            .field("columns", &self.column_count())
            .field("loaded_count", &state.loaded_count)
            .field("complete", &state.complete)
            .finish()
    }
}

impl SwapTable {
    pub fn new<S: AsRef<str>>(header: impl IntoIterator<Item = S>, mut config: SwapTableConfig) -> Self {
        config.max_rows_in_memory = config.max_rows_in_memory.max(1);
        config.rows_per_page = config.rows_per_page.clamp(1, config.max_rows_in_memory);
        if config.wait_interval.is_zero() {
            config.wait_interval = SwapTableConfig::default().wait_interval;
        }

        let header: Row = header.into_iter().map(|name| Value::text(name)).collect();
        let inner = Inner {
            column_types: vec![ColumnType::Unknown; header.len()],
            header,
            memory: Vec::new(),
            memory_start: 0,
            spill: None,
            page_cache: None,
            loaded: 0,
            complete: false,
            failure: None,
            last_write: Instant::now(),
            page_reads: 0,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(inner),
                rows_ready: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is recovered: every mutation completes before the guard is released.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &SwapTableConfig {
        &self.shared.config
    }

    pub fn column_count(&self) -> usize {
        self.lock().header.len()
    }

    pub fn header(&self) -> Row {
        self.lock().header.clone()
    }

    /// Column index by name; exact match first, then ASCII case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let inner = self.lock();
        let names = || inner.header.iter().map(|v| v.as_str().unwrap_or_default());
        names()
            .position(|n| n == name)
            .or_else(|| names().position(|n| n.eq_ignore_ascii_case(name)))
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.lock().column_types.clone()
    }

    /// Append a data row. Fails once the table is complete or if the row width is wrong.
    pub fn append(&self, row: Row) -> Result<()> {
        let mut inner = self.lock();
        if inner.complete {
            return Err(TableError::Completed);
        }
        if row.len() != inner.header.len() {
            return Err(TableError::RowWidth {
                expected: inner.header.len(),
                actual: row.len(),
            });
        }

        let mut column_types = inner.column_types.clone();
        for (ty, value) in column_types.iter_mut().zip(&row) {
            match (*ty, value.column_type()) {
                (_, None) => {}
                (ColumnType::Unknown, Some(seen)) => *ty = seen,
                (current, Some(seen)) if current != seen => *ty = ColumnType::String,
                _ => {}
            }
        }

        // The row only counts as appended once any spill it triggers has succeeded.
        inner.memory.push(row);
        if let Err(err) = self.spill_if_needed_locked(&mut inner) {
            inner.memory.pop();
            return Err(err);
        }
        inner.column_types = column_types;
        inner.loaded += 1;
        inner.last_write = Instant::now();
        drop(inner);

        self.shared.rows_ready.notify_all();
        Ok(())
    }

    fn spill_if_needed_locked(&self, inner: &mut Inner) -> Result<()> {
        let config = &self.shared.config;
        while inner.memory.len() > config.max_rows_in_memory {
            if inner.spill.is_none() {
                inner.spill = Some(SpillFile::create(config.spill_dir.as_deref())?);
                log::debug!("swap table spilling to disk after {} rows", inner.loaded + 1);
            }
            if let Some(spill) = inner.spill.as_mut() {
                spill.write_page(&inner.memory[..config.rows_per_page])?;
            }
            inner.memory.drain(..config.rows_per_page);
            inner.memory_start += config.rows_per_page;
        }
        Ok(())
    }

    /// Mark the table complete and wake every waiter. Idempotent.
    pub fn complete(&self) {
        let mut inner = self.lock();
        if !inner.complete {
            inner.complete = true;
            inner.last_write = Instant::now();
        }
        drop(inner);
        self.shared.rows_ready.notify_all();
    }

    /// Record a producer failure. The next [`SwapTable::more_rows`] call returns it, once.
    pub fn fail(&self, err: TableError) {
        let mut inner = self.lock();
        inner.failure = Some(err);
        drop(inner);
        self.shared.rows_ready.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Number of data rows appended so far (header excluded).
    pub fn loaded_rows(&self) -> usize {
        self.lock().loaded
    }

    pub fn state(&self) -> LoadState {
        let inner = self.lock();
        LoadState {
            loaded_count: inner.loaded,
            complete: inner.complete,
        }
    }

    /// Encoded row count, header included.
    ///
    /// A complete table with `k` rows returns `k`; a table still loading with `k` rows so far
    /// returns `-k - 1`, so "5 rows, still running" and "exactly 5 rows" stay distinguishable.
    pub fn row_count(&self) -> i64 {
        let inner = self.lock();
        let rows = (inner.loaded + 1) as i64;
        if inner.complete {
            rows
        } else {
            -rows - 1
        }
    }

    pub fn last_write(&self) -> Instant {
        self.lock().last_write
    }

    /// Block until data row `n` (zero-based, header excluded) exists or the table completes.
    ///
    /// Returns whether the row exists. A recorded producer failure is returned instead, once.
    pub fn more_rows(&self, n: usize) -> Result<bool> {
        let mut inner = self.lock();
        loop {
            if let Some(ready) = Self::check_ready(&mut inner, n)? {
                return Ok(ready);
            }
            inner = self.wait_locked(inner, self.shared.config.wait_interval);
        }
    }

    /// Like [`SwapTable::more_rows`] but gives up after `timeout`, returning `Ok(None)`.
    pub fn more_rows_timeout(&self, n: usize, timeout: Duration) -> Result<Option<bool>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(ready) = Self::check_ready(&mut inner, n)? {
                return Ok(Some(ready));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.shared.config.wait_interval);
            inner = self.wait_locked(inner, wait);
        }
    }

    fn check_ready(inner: &mut Inner, n: usize) -> Result<Option<bool>> {
        if let Some(err) = inner.failure.take() {
            return Err(err);
        }
        if n < inner.loaded {
            return Ok(Some(true));
        }
        if inner.complete {
            return Ok(Some(false));
        }
        Ok(None)
    }

    fn wait_locked<'a>(&self, guard: MutexGuard<'a, Inner>, wait: Duration) -> MutexGuard<'a, Inner> {
        match self.shared.rows_ready.wait_timeout(guard, wait) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Read a row by table index (0 is the header). `None` if the row has not been appended.
    pub fn row(&self, index: usize) -> Result<Option<Row>> {
        let mut inner = self.lock();
        if index == 0 {
            return Ok(Some(inner.header.clone()));
        }
        let data = index - 1;
        if data >= inner.loaded {
            return Ok(None);
        }
        if data >= inner.memory_start {
            return Ok(inner.memory.get(data - inner.memory_start).cloned());
        }

        let rows_per_page = self.shared.config.rows_per_page;
        let page_idx = data / rows_per_page;
        let cached = match &inner.page_cache {
            Some((cached, page)) if *cached == page_idx => Some(page.clone()),
            _ => None,
        };
        let page = match cached {
            Some(page) => page,
            None => {
                let Some(spill) = inner.spill.as_mut() else {
                    return Ok(None);
                };
                let Some(rows) = spill.read_page(page_idx)? else {
                    return Ok(None);
                };
                let page = Arc::new(rows);
                inner.page_reads += 1;
                inner.page_cache = Some((page_idx, page.clone()));
                page
            }
        };
        Ok(page.get(data % rows_per_page).cloned())
    }

    /// Read a single cell by table index (0 is the header).
    pub fn get(&self, row: usize, col: usize) -> Result<Option<Value>> {
        Ok(self.row(row)?.and_then(|mut r| {
            if col < r.len() {
                Some(r.swap_remove(col))
            } else {
                None
            }
        }))
    }

    pub fn stats(&self) -> SwapTableStats {
        let inner = self.lock();
        SwapTableStats {
            rows_in_memory: inner.memory.len(),
            rows_spilled: inner.memory_start,
            pages_spilled: inner.spill.as_ref().map_or(0, SpillFile::page_count),
            page_reads: inner.page_reads,
        }
    }
}
