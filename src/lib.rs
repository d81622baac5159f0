//! Disk-backed icon cache with an in-memory overlay
//!
//! This crate maps an application or activity identity (component + user
//! profile) to a rendered icon bitmap, a label and a freshness
//! fingerprint. A single worker thread owns all mutable state; a two-pass
//! update handler reconciles the persistent store against live app
//! inventories without re-rendering icons whose fingerprints still match.

pub mod cache;
pub mod config;
pub mod error;
pub mod persistence;
pub mod strategy;
pub mod types;
pub mod updater;
pub mod worker;

pub use cache::IconCache;
pub use config::CacheConfig;
pub use error::{IconCacheError, Result};
pub use persistence::{IconStore, StoreRow, UpdateRow};
pub use strategy::{
    ActivityRecord, ActivityRecordStrategy, AppRecord, AppRecordStrategy, AppVersionInfo,
    CachedObject, CachedObjectStrategy, CachingStrategy, DefaultIconProvider, IconRenderer,
    SolidDefaultIconProvider,
};
pub use types::{
    CacheEntry, CacheStats, ComponentKey, ComponentName, IconBitmap, LookupFlags, UserHandle,
    BITMAP_FLAG_LOW_RES,
};
pub use updater::{CacheUpdateHandler, OnPackageIconsUpdated};
pub use worker::{WorkerHandle, WorkerThread};
