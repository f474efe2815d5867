use crate::cache::BrowseValueCache;
use crate::error::{QueryError, Result};
use crate::fingerprint::Fingerprint;
use crate::registry::{Cancellable, QueryRegistry, QuerySpec, RowCounter};
use crate::result::BrowseResult;
use rowset_table::{LoadOutcome, RowCursor, StreamingTableView, SwapTableConfig, ViewOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A request for the distinct values of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    pub source: String,
    pub column: String,
    pub user: String,
    pub variables: BTreeMap<String, String>,
}

impl BrowseRequest {
    pub fn new(source: impl Into<String>, column: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            column: column.into(),
            user: user.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::builder(&self.source, &self.column, &self.user)
            .variables(self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .build()
    }
}

/// Locates the physical query for a browse request and starts it.
///
/// The returned cursor yields the browsed value in column 0 and, optionally, a display label in
/// column 1.
pub trait CatalogResolver: Send + Sync {
    fn resolve(&self, request: &BrowseRequest) -> Result<Box<dyn RowCursor>>;
}

impl<R: CatalogResolver + ?Sized> CatalogResolver for Arc<R> {
    fn resolve(&self, request: &BrowseRequest) -> Result<Box<dyn RowCursor>> {
        (**self).resolve(request)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseServiceConfig {
    /// Maximum distinct-value rows read per request (default: 10 000).
    pub max_browse_rows: usize,
    /// Load upstream rows on a background thread (default: true).
    pub background: bool,
    pub table: SwapTableConfig,
}

impl Default for BrowseServiceConfig {
    fn default() -> Self {
        Self {
            max_browse_rows: 10_000,
            background: true,
            table: SwapTableConfig::default(),
        }
    }
}

/// Serves browse values: cache first, then the resolver, tracked in the registry while it runs.
pub struct BrowseService<R> {
    resolver: R,
    cache: Arc<BrowseValueCache>,
    registry: QueryRegistry,
    config: BrowseServiceConfig,
}

impl<R: CatalogResolver> BrowseService<R> {
    pub fn new(
        resolver: R,
        cache: Arc<BrowseValueCache>,
        registry: QueryRegistry,
        config: BrowseServiceConfig,
    ) -> Self {
        Self {
            resolver,
            cache,
            registry,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<BrowseValueCache> {
        &self.cache
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// Browse values for a picker. Failures are logged and yield an empty result.
    pub fn browse(&self, request: &BrowseRequest) -> Arc<BrowseResult> {
        match self.try_browse(request) {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    "browse {}::{} failed for {}: {err}",
                    request.source,
                    request.column,
                    request.user
                );
                Arc::new(BrowseResult::empty())
            }
        }
    }

    /// Like [`BrowseService::browse`] but propagates failures.
    pub fn try_browse(&self, request: &BrowseRequest) -> Result<Arc<BrowseResult>> {
        let fingerprint = request.fingerprint();
        if let Some(entry) = self.cache.lookup(&fingerprint) {
            return Ok(entry.result);
        }

        let result = Arc::new(self.materialize(request)?);
        self.cache.store(&fingerprint, result.clone());
        Ok(result)
    }

    fn materialize(&self, request: &BrowseRequest) -> Result<BrowseResult> {
        let cursor = self.resolver.resolve(request)?;
        let max_rows = self.config.max_browse_rows.max(1);
        let rows = RowCounter::default();
        let options = ViewOptions {
            background: self.config.background,
            // One extra row tells us whether the result was truncated.
            max_rows: Some(max_rows + 1),
            table: self.config.table.clone(),
            ..ViewOptions::default()
        };
        let view = Arc::new(StreamingTableView::from_cursor_with_monitor(
            cursor,
            options,
            Arc::new(rows.clone()),
        ));

        let handle: Arc<dyn Cancellable> = view.clone();
        let _query = self.registry.start_query(
            QuerySpec::new(&request.user, format!("{}::{}", request.source, request.column))
                .handle(handle)
                .rows(rows),
        );

        let table = view.table();
        if table.column_count() == 0 {
            view.cancel();
            return Err(QueryError::ColumnNotFound(request.column.clone()));
        }
        let label_col = (table.column_count() > 1).then_some(1);
        let mut pairs = Vec::new();
        let mut n = 0;
        while n < max_rows && table.more_rows(n)? {
            let Some(row) = table.row(n + 1)? else {
                break;
            };
            let value = row.first().cloned().unwrap_or_default();
            let label = label_col.and_then(|col| row.get(col).cloned());
            pairs.push((value, label));
            n += 1;
        }
        let truncated = table.more_rows(max_rows)?;

        if view.wait() == LoadOutcome::Cancelled || view.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        if label_col.is_some() {
            Ok(BrowseResult::from_pairs(
                pairs
                    .into_iter()
                    .map(|(value, label)| (value, label.unwrap_or_default())),
                truncated,
            ))
        } else {
            Ok(BrowseResult::from_values(
                pairs.into_iter().map(|(value, _)| value),
                truncated,
            ))
        }
    }
}
