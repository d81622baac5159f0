//! Cache core: persistent store and in-memory overlay behind one worker
//!
//! `IconCache` is the single source of truth for icon lookups. The overlay
//! answers repeat lookups without touching the store; the store survives
//! process restarts; everything else falls back through a render, the
//! package-level entry and finally the synthesized per-user default icon.
//! All mutable state is owned by the designated worker thread; public
//! entry points marshal onto it. `lookup` blocks the caller until the
//! worker has produced the entry, so call it from a background context.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::persistence::{IconStore, StoreRow, UpdateRow};
use crate::strategy::{CachingStrategy, DefaultIconProvider};
use crate::types::{
    CacheEntry, CacheStats, ComponentKey, ComponentName, IconBitmap, LookupFlags, UserHandle,
};
use crate::updater::CacheUpdateHandler;
use crate::worker::{WorkerHandle, WorkerThread};

/// In-memory overlay over the persistent store. A no-op pass-through when
/// entry caching is disabled.
enum Overlay {
    Enabled(AHashMap<ComponentKey, CacheEntry>),
    Disabled,
}

impl Overlay {
    fn new(enabled: bool) -> Self {
        if enabled {
            Self::Enabled(AHashMap::new())
        } else {
            Self::Disabled
        }
    }

    fn get(&self, key: &ComponentKey) -> Option<&CacheEntry> {
        match self {
            Self::Enabled(map) => map.get(key),
            Self::Disabled => None,
        }
    }

    fn insert(&mut self, key: ComponentKey, entry: CacheEntry) {
        match self {
            Self::Enabled(map) => {
                // Never downgrade a cached high-res bitmap to a low-res one.
                if entry.bitmap.is_low_res()
                    && map.get(&key).is_some_and(|e| !e.bitmap.is_low_res())
                {
                    return;
                }
                map.insert(key, entry);
            }
            Self::Disabled => {}
        }
    }

    fn remove(&mut self, key: &ComponentKey) {
        if let Self::Enabled(map) = self {
            map.remove(key);
        }
    }

    fn remove_package(&mut self, package: &str, user: UserHandle) {
        if let Self::Enabled(map) = self {
            map.retain(|key, _| key.user != user || key.component.package != package);
        }
    }

    fn clear(&mut self) {
        if let Self::Enabled(map) = self {
            map.clear();
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Enabled(map) => map.len(),
            Self::Disabled => 0,
        }
    }
}

struct CoreState {
    store: IconStore,
    overlay: Overlay,
    /// One lazily synthesized default icon per user profile.
    default_icons: AHashMap<UserHandle, IconBitmap>,
    user_flags: AHashMap<UserHandle, u32>,
    stats: CacheStats,
    config: CacheConfig,
}

/// Worker-side cache state, shared between the public facade, scheduled
/// render tasks and update handlers.
pub(crate) struct CacheShared {
    state: Mutex<CoreState>,
    default_icon_provider: Arc<dyn DefaultIconProvider>,
    worker: WorkerHandle,
}

impl CacheShared {
    pub(crate) fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    pub(crate) fn lookup_on_worker<T>(
        &self,
        key: &ComponentKey,
        flags: LookupFlags,
        strategy: &dyn CachingStrategy<T>,
        provider: impl FnOnce() -> Option<T>,
    ) -> CacheEntry {
        self.worker.assert_worker_thread();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(entry) = state.overlay.get(key) {
            // A low-res entry never satisfies a high-res request.
            if flags.use_low_res() || !entry.bitmap.is_low_res() {
                let entry = entry.clone();
                state.stats.hits += 1;
                return entry;
            }
        }
        state.stats.misses += 1;

        let mut entry = match state.store.get(key, flags.use_low_res()) {
            Ok(Some(row)) => entry_from_row(&row, flags.use_low_res()),
            Ok(None) => None,
            Err(e) => {
                log::warn!("icon store read failed for {}: {}", key, e);
                None
            }
        };

        if entry.is_none() {
            // Only now materialize the live object; the store answer above
            // makes this the exception, not the rule.
            if let Some(obj) = provider() {
                state.stats.renders += 1;
                if let Some(bitmap) = strategy.render_icon(&obj) {
                    let title = strategy
                        .label(&obj)
                        .filter(|label| !label.is_empty())
                        .unwrap_or_else(|| key.component.package.clone());
                    let built = CacheEntry {
                        bitmap,
                        title: title.clone(),
                        content_description: title,
                    };
                    self.persist_entry(
                        state,
                        &key.component,
                        key.user,
                        &built,
                        strategy.freshness_fingerprint(&obj),
                    );
                    entry = Some(built);
                }
            }
        }

        if entry.is_none() && flags.use_package_icon() {
            entry = self.package_entry(state, key, flags);
        }

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let bitmap = self.default_icon_for(state, key.user);
                let title = key.component.package.clone();
                CacheEntry {
                    bitmap,
                    title: title.clone(),
                    content_description: title,
                }
            }
        };

        if !flags.skip_add_to_mem_cache() {
            state.overlay.insert(key.clone(), entry.clone());
        }
        entry
    }

    /// Render `obj` and write it through to overlay and store.
    pub(crate) fn add_icon<T>(
        &self,
        obj: &T,
        strategy: &dyn CachingStrategy<T>,
        user: UserHandle,
    ) {
        self.worker.assert_worker_thread();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let component = strategy.component(obj);
        state.stats.renders += 1;
        let Some(bitmap) = strategy.render_icon(obj) else {
            log::debug!("render failed for {}, cache entry left untouched", component);
            return;
        };
        let title = strategy
            .label(obj)
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| component.package.clone());
        let entry = CacheEntry {
            bitmap,
            title: title.clone(),
            content_description: title,
        };
        state
            .overlay
            .insert(ComponentKey::new(component.clone(), user), entry.clone());
        self.persist_entry(
            state,
            &component,
            user,
            &entry,
            strategy.freshness_fingerprint(obj),
        );
    }

    fn persist_entry(
        &self,
        state: &mut CoreState,
        component: &ComponentName,
        user: UserHandle,
        entry: &CacheEntry,
        freshness_id: Option<String>,
    ) {
        // Strategies without a fingerprint are overlay-only; placeholders
        // and default-equal bitmaps are not worth a row.
        let Some(freshness_id) = freshness_id else { return };
        if entry.bitmap.is_null_or_low_res() {
            return;
        }
        let default_icon = self.default_icon_for(state, user);
        if entry.bitmap.same_pixels(&default_icon) {
            return;
        }
        let row = StoreRow {
            component: component.clone(),
            user,
            label: Some(entry.title.clone()),
            color: entry.bitmap.color,
            flags: entry.bitmap.flags,
            icon: Some(entry.bitmap.data.as_ref().clone()),
            mono: entry.bitmap.mono.as_ref().map(|mono| mono.as_ref().clone()),
            freshness_id: Some(freshness_id),
        };
        if let Err(e) = state.store.insert_or_replace(&row) {
            log::warn!("icon store write failed for {}: {}", component, e);
        }
    }

    fn package_entry(
        &self,
        state: &mut CoreState,
        key: &ComponentKey,
        flags: LookupFlags,
    ) -> Option<CacheEntry> {
        let package_key = ComponentKey::new(
            ComponentName::package_key(key.component.package.clone()),
            key.user,
        );
        if let Some(entry) = state.overlay.get(&package_key) {
            return Some(entry.clone());
        }
        match state.store.get(&package_key, flags.use_low_res()) {
            Ok(Some(row)) => {
                let entry = entry_from_row(&row, flags.use_low_res())?;
                state.overlay.insert(package_key, entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("icon store read failed for {}: {}", package_key, e);
                None
            }
        }
    }

    fn default_icon_for(&self, state: &mut CoreState, user: UserHandle) -> IconBitmap {
        if let Some(icon) = state.default_icons.get(&user) {
            return icon.clone();
        }
        let flags = *state
            .user_flags
            .entry(user)
            .or_insert_with(|| self.default_icon_provider.user_flags(user));
        let icon = self.default_icon_provider.render_default(user, flags);
        state.default_icons.insert(user, icon.clone());
        icon
    }

    pub(crate) fn default_icon(&self, user: UserHandle) -> IconBitmap {
        self.worker.assert_worker_thread();
        let mut guard = self.state.lock();
        self.default_icon_for(&mut guard, user)
    }

    pub(crate) fn evict_overlay(&self, key: &ComponentKey) {
        self.worker.assert_worker_thread();
        self.state.lock().overlay.remove(key);
    }

    pub(crate) fn remove_package(&self, package: &str, user: UserHandle) {
        self.worker.assert_worker_thread();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.overlay.remove_package(package, user);
        if let Err(e) = state.store.delete_package(package, user) {
            log::warn!("icon store delete failed for {}: {}", package, e);
        }
    }

    pub(crate) fn rows_for_user(&self, user: UserHandle) -> Vec<UpdateRow> {
        self.worker.assert_worker_thread();
        match self.state.lock().store.update_rows_for_user(user) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("icon store scan failed for {}: {}", user, e);
                Vec::new()
            }
        }
    }

    pub(crate) fn delete_rows(&self, rowids: &[i64]) {
        self.worker.assert_worker_thread();
        match self.state.lock().store.delete_rowids(rowids) {
            Ok(deleted) => log::debug!("removed {} stale icon rows", deleted),
            Err(e) => log::warn!("icon store batch delete failed: {}", e),
        }
    }

    fn apply_icon_params(&self, dpi: u32, icon_pixel_size: u32) {
        self.worker.assert_worker_thread();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.config.dpi == dpi && state.config.icon_pixel_size == icon_pixel_size {
            return;
        }
        log::info!(
            "icon parameters changed ({} dpi, {}px), resetting cache",
            dpi,
            icon_pixel_size
        );
        state.config.dpi = dpi;
        state.config.icon_pixel_size = icon_pixel_size;
        state.overlay.clear();
        state.default_icons.clear();
        state.user_flags.clear();
        // Reopening at the new pixel size lands on a different schema
        // version, which drops the stale-resolution rows.
        match IconStore::open(&state.config) {
            Ok(store) => state.store = store,
            Err(e) => log::warn!("icon store reopen failed after parameter change: {}", e),
        }
    }

    fn stats_snapshot(&self) -> CacheStats {
        self.worker.assert_worker_thread();
        let guard = self.state.lock();
        let mut stats = guard.stats;
        stats.entries = guard.overlay.len();
        stats
    }
}

fn entry_from_row(row: &StoreRow, low_res: bool) -> Option<CacheEntry> {
    let title = row
        .label
        .clone()
        .unwrap_or_else(|| row.component.package.clone());
    let bitmap = if low_res {
        IconBitmap::low_res_with(row.color, row.flags)
    } else {
        // A missing or empty blob is a miss for this row, not an error.
        let data = row.icon.as_ref()?;
        if data.is_empty() {
            return None;
        }
        let mut bitmap = IconBitmap::new(data.clone(), row.color);
        bitmap.flags = row.flags;
        if let Some(mono) = &row.mono {
            bitmap = bitmap.with_mono(mono.clone());
        }
        bitmap
    };
    Some(CacheEntry {
        bitmap,
        title: title.clone(),
        content_description: title,
    })
}

/// Disk-backed icon cache with an in-memory overlay
pub struct IconCache {
    shared: Arc<CacheShared>,
    worker: WorkerThread,
}

impl IconCache {
    /// Create a cache and spawn its worker thread.
    pub fn new(
        config: CacheConfig,
        default_icon_provider: Arc<dyn DefaultIconProvider>,
    ) -> Result<Self> {
        let worker = WorkerThread::spawn("icon-cache-writer")?;
        let store = IconStore::open(&config)?;
        let overlay = Overlay::new(config.cache_entries_in_memory);
        let shared = Arc::new(CacheShared {
            state: Mutex::new(CoreState {
                store,
                overlay,
                default_icons: AHashMap::new(),
                user_flags: AHashMap::new(),
                stats: CacheStats::default(),
                config,
            }),
            default_icon_provider,
            worker: worker.handle().clone(),
        });
        Ok(Self { shared, worker })
    }

    /// Look up the entry for `key`, falling back through store, render,
    /// package entry and default icon.
    ///
    /// `provider` materializes the live domain object and is only invoked
    /// when the overlay and store cannot satisfy the request. This call
    /// blocks until the worker thread has produced the entry.
    pub fn lookup<T, S, F>(
        &self,
        key: ComponentKey,
        flags: LookupFlags,
        strategy: Arc<S>,
        provider: F,
    ) -> CacheEntry
    where
        T: Send + 'static,
        S: CachingStrategy<T> + 'static,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.worker.handle().run_blocking(move || {
            shared.lookup_on_worker(&key, flags, &*strategy, provider)
        })
    }

    /// The synthesized default icon for a user profile, rendered once and
    /// cached in-process.
    pub fn get_default_icon(&self, user: UserHandle) -> IconBitmap {
        let shared = Arc::clone(&self.shared);
        self.worker
            .handle()
            .run_blocking(move || shared.default_icon(user))
    }

    /// Purge the overlay entry for a component. Store rows are the update
    /// handler's responsibility.
    pub fn remove(&self, component: ComponentName, user: UserHandle) {
        let shared = Arc::clone(&self.shared);
        self.worker
            .handle()
            .post(move || shared.evict_overlay(&ComponentKey::new(component, user)));
    }

    /// Purge overlay entries and store rows for a whole package, scoped
    /// to one user.
    pub fn remove_icons_for_package(&self, package: String, user: UserHandle) {
        let shared = Arc::clone(&self.shared);
        self.worker
            .handle()
            .post(move || shared.remove_package(&package, user));
    }

    /// Destructive reset after an icon size or density change: cancels
    /// pending renders, clears the overlay and derived icon caches, and
    /// reopens the store at the new pixel-size-derived schema version.
    pub fn update_icon_params(&self, dpi: u32, icon_pixel_size: u32) {
        // Advance first so no stale render writes into the reset store.
        self.worker.handle().advance_generation();
        let shared = Arc::clone(&self.shared);
        self.worker
            .handle()
            .post(move || shared.apply_icon_params(dpi, icon_pixel_size));
    }

    /// Render `obj` via the strategy and write it through to overlay and
    /// store. Must be called on the worker thread.
    pub fn add_icon_to_db_and_mem_cache<T>(
        &self,
        obj: &T,
        strategy: &dyn CachingStrategy<T>,
        user_serial: UserHandle,
    ) {
        self.shared.add_icon(obj, strategy, user_serial);
    }

    /// Create a single-use reconciliation handler.
    pub fn new_update_handler(&self) -> CacheUpdateHandler {
        CacheUpdateHandler::new(Arc::clone(&self.shared))
    }

    /// Run `f` on the worker thread, fire-and-forget. Inventory
    /// collaborators use this to drive reconciliation.
    pub fn run_on_worker(&self, f: impl FnOnce() + Send + 'static) {
        self.worker.handle().post(f);
    }

    /// Run `f` on the worker thread and block for its result.
    pub fn run_blocking<R>(&self, f: impl FnOnce() -> R + Send + 'static) -> R
    where
        R: Send + 'static,
    {
        self.worker.handle().run_blocking(f)
    }

    /// Observational cache counters.
    pub fn stats(&self) -> CacheStats {
        let shared = Arc::clone(&self.shared);
        self.worker
            .handle()
            .run_blocking(move || shared.stats_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{
        ActivityRecord, ActivityRecordStrategy, AppRecord, AppRecordStrategy, AppVersionInfo,
        CachedObject, CachedObjectStrategy, IconRenderer, SolidDefaultIconProvider,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl CountingRenderer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IconRenderer for CountingRenderer {
        fn render(&self, component: &ComponentName, _user: UserHandle) -> Option<IconBitmap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(IconBitmap::new(
                component.flatten().into_bytes(),
                0x00ff0000,
            ))
        }
    }

    fn new_cache() -> IconCache {
        let _ = env_logger::try_init();
        IconCache::new(
            CacheConfig::default(),
            Arc::new(SolidDefaultIconProvider::default()),
        )
        .unwrap()
    }

    fn activity(package: &str, class: &str, user: i64, version: u64) -> ActivityRecord {
        ActivityRecord {
            component: ComponentName::new(package, class),
            user: UserHandle(user),
            label: Some(format!("{class} label")),
            version: Some(AppVersionInfo::new(version, 1_700_000_000)),
        }
    }

    fn stored_rows(cache: &IconCache, user: i64) -> Vec<UpdateRow> {
        let shared = Arc::clone(&cache.shared);
        cache.run_blocking(move || shared.rows_for_user(UserHandle(user)))
    }

    #[test]
    fn test_lookup_renders_once_then_hits_overlay() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let record = activity("com.a", "Main", 0, 1);
        let key = ComponentKey::new(record.component.clone(), record.user);

        let provider_record = record.clone();
        let first = cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT,
            strategy.clone(),
            move || Some(provider_record),
        );
        assert_eq!(renderer.calls(), 1);
        assert_eq!(first.title, "Main label");
        assert!(!first.bitmap.is_low_res());

        // Identical arguments, no intervening mutation: bit-identical
        // entry and no second render.
        let second = cache.lookup(key, LookupFlags::DEFAULT, strategy, move || Some(record));
        assert_eq!(renderer.calls(), 1);
        assert!(first.bitmap.same_pixels(&second.bitmap));
        assert_eq!(first.title, second.title);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lookup_falls_back_to_default_icon() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let key = ComponentKey::new(ComponentName::new("com.gone", "Main"), UserHandle(0));

        let entry = cache.lookup(key, LookupFlags::DEFAULT, strategy, || None);
        assert_eq!(renderer.calls(), 0);
        assert_eq!(entry.title, "com.gone");
        assert!(entry.bitmap.same_pixels(&cache.get_default_icon(UserHandle(0))));
    }

    #[test]
    fn test_lookup_falls_back_to_package_entry() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();

        // Cache the package-level entry first.
        let app_strategy = Arc::new(AppRecordStrategy::new(renderer.clone()));
        let app = AppRecord {
            package: "com.a".to_string(),
            user: UserHandle(0),
            label: Some("A".to_string()),
            version: Some(AppVersionInfo::new(1, 1)),
        };
        let package_key = ComponentKey::new(ComponentName::package_key("com.a"), UserHandle(0));
        let package_entry = cache.lookup(
            package_key,
            LookupFlags::DEFAULT,
            app_strategy,
            move || Some(app),
        );
        assert_eq!(renderer.calls(), 1);

        // An unresolvable activity in the same package borrows its icon.
        let activity_strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let key = ComponentKey::new(ComponentName::new("com.a", "Gone"), UserHandle(0));
        let entry = cache.lookup(
            key,
            LookupFlags::DEFAULT.with_use_package_icon(),
            activity_strategy,
            || None,
        );
        assert_eq!(renderer.calls(), 1);
        assert!(entry.bitmap.same_pixels(&package_entry.bitmap));
    }

    #[test]
    fn test_skip_add_to_mem_cache() {
        let cache = new_cache();
        let strategy = Arc::new(CachedObjectStrategy);
        let object = CachedObject {
            component: ComponentName::new("com.a", "Widget"),
            user: UserHandle(0),
            label: Some("Widget".to_string()),
            // No fingerprint: overlay-only object, so skipping the overlay
            // must leave no trace at all.
            fingerprint: None,
            bitmap: Some(IconBitmap::new(vec![7, 7, 7], 0)),
        };
        let key = ComponentKey::new(object.component.clone(), object.user);

        let first = cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT.with_skip_add_to_mem_cache(),
            strategy.clone(),
            move || Some(object),
        );
        assert!(!first.bitmap.is_low_res());
        assert_eq!(cache.stats().entries, 0);

        // Nothing was cached anywhere; without the object the lookup
        // degrades to the default icon.
        let second = cache.lookup(key, LookupFlags::DEFAULT, strategy, || None);
        assert!(second.bitmap.same_pixels(&cache.get_default_icon(UserHandle(0))));
    }

    #[test]
    fn test_high_res_request_not_satisfied_by_low_res_entry() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let record = activity("com.a", "Main", 0, 1);
        let key = ComponentKey::new(record.component.clone(), record.user);

        // Render once so the store holds the row, then evict the overlay.
        let provider_record = record.clone();
        cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT,
            strategy.clone(),
            move || Some(provider_record),
        );
        assert_eq!(renderer.calls(), 1);
        cache.remove(key.component.clone(), key.user);

        // Low-res read caches the placeholder entry.
        let low = cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT.with_use_low_res(),
            strategy.clone(),
            || None,
        );
        assert!(low.bitmap.is_low_res());
        assert_eq!(low.title, "Main label");

        // The high-res request must bypass the low-res overlay entry and
        // read the full row; still no re-render.
        let high = cache.lookup(key.clone(), LookupFlags::DEFAULT, strategy.clone(), || None);
        assert!(!high.bitmap.is_low_res());
        assert_eq!(renderer.calls(), 1);

        // And a later low-res request is happily served by the (better)
        // high-res entry.
        let served = cache.lookup(key, LookupFlags::DEFAULT.with_use_low_res(), strategy, || {
            None
        });
        assert!(!served.bitmap.is_low_res());
    }

    #[test]
    fn test_persist_skips_overlay_only_and_placeholder_bitmaps() {
        let cache = new_cache();
        let strategy = Arc::new(CachedObjectStrategy);

        // No fingerprint: overlay-only.
        let no_fingerprint = CachedObject {
            component: ComponentName::new("com.a", "One"),
            user: UserHandle(0),
            label: None,
            fingerprint: None,
            bitmap: Some(IconBitmap::new(vec![1], 0)),
        };
        // Placeholder bitmap: not worth a row.
        let placeholder = CachedObject {
            component: ComponentName::new("com.a", "Two"),
            user: UserHandle(0),
            label: None,
            fingerprint: Some("v1".to_string()),
            bitmap: Some(IconBitmap::low_res()),
        };
        // Default-equal bitmap: not worth a row either.
        let default_equal = CachedObject {
            component: ComponentName::new("com.a", "Three"),
            user: UserHandle(0),
            label: None,
            fingerprint: Some("v1".to_string()),
            bitmap: Some(cache.get_default_icon(UserHandle(0))),
        };
        // This one is persisted.
        let real = CachedObject {
            component: ComponentName::new("com.a", "Four"),
            user: UserHandle(0),
            label: None,
            fingerprint: Some("v1".to_string()),
            bitmap: Some(IconBitmap::new(vec![4, 4], 0)),
        };

        for object in [no_fingerprint, placeholder, default_equal, real] {
            let provider_object = object.clone();
            cache.lookup(
                ComponentKey::new(object.component.clone(), object.user),
                LookupFlags::DEFAULT,
                strategy.clone(),
                move || Some(provider_object),
            );
        }

        let rows = stored_rows(&cache, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].component, "com.a/Four");
    }

    #[test]
    fn test_update_icon_params_resets_everything() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let record = activity("com.a", "Main", 0, 1);
        let key = ComponentKey::new(record.component.clone(), record.user);

        let provider_record = record.clone();
        cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT,
            strategy.clone(),
            move || Some(provider_record),
        );
        assert_eq!(renderer.calls(), 1);
        assert_eq!(stored_rows(&cache, 0).len(), 1);

        cache.update_icon_params(320, 144);

        // The stats barrier runs after the posted reset.
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert!(stored_rows(&cache, 0).is_empty());

        // Everything has to be rendered afresh.
        cache.lookup(key, LookupFlags::DEFAULT, strategy, move || Some(record));
        assert_eq!(renderer.calls(), 2);
    }

    #[test]
    fn test_remove_icons_for_package() {
        let cache = new_cache();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));

        for (package, class) in [("com.a", "One"), ("com.a", "Two"), ("com.b", "One")] {
            let record = activity(package, class, 0, 1);
            let provider_record = record.clone();
            cache.lookup(
                ComponentKey::new(record.component.clone(), record.user),
                LookupFlags::DEFAULT,
                strategy.clone(),
                move || Some(provider_record),
            );
        }
        assert_eq!(stored_rows(&cache, 0).len(), 3);

        cache.remove_icons_for_package("com.a".to_string(), UserHandle(0));

        let rows = stored_rows(&cache, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].component, "com.b/One");
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_default_icon_cached_per_user() {
        let cache = new_cache();
        let first = cache.get_default_icon(UserHandle(0));
        let again = cache.get_default_icon(UserHandle(0));
        assert!(Arc::ptr_eq(&first.data, &again.data));
    }

    #[test]
    #[should_panic(expected = "off the worker thread")]
    fn test_add_icon_off_worker_panics() {
        let cache = new_cache();
        let strategy = CachedObjectStrategy;
        let object = CachedObject {
            component: ComponentName::new("com.a", "Main"),
            user: UserHandle(0),
            label: None,
            fingerprint: None,
            bitmap: None,
        };
        cache.add_icon_to_db_and_mem_cache(&object, &strategy, UserHandle(0));
    }

    #[test]
    fn test_overlay_never_downgrades_resolution() {
        let mut overlay = Overlay::new(true);
        let key = ComponentKey::new(ComponentName::new("com.a", "Main"), UserHandle(0));
        let high = CacheEntry {
            bitmap: IconBitmap::new(vec![1, 2], 0),
            title: "t".to_string(),
            content_description: "t".to_string(),
        };
        let low = CacheEntry {
            bitmap: IconBitmap::low_res(),
            title: "t".to_string(),
            content_description: "t".to_string(),
        };

        overlay.insert(key.clone(), high.clone());
        overlay.insert(key.clone(), low.clone());
        assert!(!overlay.get(&key).unwrap().bitmap.is_low_res());

        // The other direction is a straight upgrade.
        let other = ComponentKey::new(ComponentName::new("com.b", "Main"), UserHandle(0));
        overlay.insert(other.clone(), low);
        overlay.insert(other.clone(), high);
        assert!(!overlay.get(&other).unwrap().bitmap.is_low_res());
    }

    #[test]
    fn test_disabled_overlay_is_pass_through() {
        let cache = IconCache::new(
            CacheConfig::new().without_memory_cache(),
            Arc::new(SolidDefaultIconProvider::default()),
        )
        .unwrap();
        let renderer = CountingRenderer::new();
        let strategy = Arc::new(ActivityRecordStrategy::new(renderer.clone()));
        let record = activity("com.a", "Main", 0, 1);
        let key = ComponentKey::new(record.component.clone(), record.user);

        let provider_record = record.clone();
        cache.lookup(
            key.clone(),
            LookupFlags::DEFAULT,
            strategy.clone(),
            move || Some(provider_record),
        );
        assert_eq!(cache.stats().entries, 0);

        // Store still answers, so no re-render.
        let entry = cache.lookup(key, LookupFlags::DEFAULT, strategy, move || Some(record));
        assert_eq!(renderer.calls(), 1);
        assert!(!entry.bitmap.is_low_res());
    }
}
