//! Query lifecycle tracking and browse-value caching on top of `rowset-table`.
//!
//! - [`QueryRegistry`]: in-flight cancellable operations plus lightweight per-query records.
//! - [`BrowseValueCache`]: bounded, time-expiring cache of distinct column values keyed by a
//!   [`Fingerprint`], cleared wholesale when the source catalog refreshes.
//! - [`BrowseService`]: wires a [`CatalogResolver`], the registry and the cache together to
//!   serve picker values.

#![forbid(unsafe_code)]

mod browse;
mod cache;
mod error;
mod fingerprint;
mod registry;
mod result;

pub use crate::browse::{BrowseRequest, BrowseService, BrowseServiceConfig, CatalogResolver};
pub use crate::cache::{
    refresh_channel, BrowseCacheConfig, BrowseCacheStats, BrowseValueCache, CacheEntry,
    CatalogEvent,
};
pub use crate::error::{CancelError, QueryError, Result};
pub use crate::fingerprint::{is_system_variable, Fingerprint, FingerprintBuilder};
pub use crate::registry::{
    CancelReport, Cancellable, QueryGuard, QueryId, QueryRecord, QueryRegistry, QuerySpec,
    RowCounter,
};
pub use crate::result::BrowseResult;
