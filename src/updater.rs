//! Two-pass reconciliation of the store against a live app inventory
//!
//! A `CacheUpdateHandler` is a single-use object fed the authoritative
//! live object set for one or more users. The first pass diffs the
//! persisted rows against the batch: rows with no live counterpart are
//! proposed for deletion (and evicted from the overlay right away), stale
//! rows and new objects are queued for rendering. A later call on the
//! same handler is the second pass and rescues proposed deletions that
//! turn out to exist after all; nothing is actually deleted until
//! `finish()`. Renders drain one item per worker step so the worker stays
//! responsive, and a callback reports each user's affected packages once
//! that user's queue is empty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;

use crate::cache::CacheShared;
use crate::persistence::UpdateRow;
use crate::strategy::CachingStrategy;
use crate::types::{ComponentKey, ComponentName, UserHandle};

/// Fired when a user's render queue drains; receives the packages whose
/// icons changed.
pub type OnPackageIconsUpdated = Arc<dyn Fn(&HashSet<String>, UserHandle) + Send + Sync>;

/// Delay between two scheduled renders, so each one is interleaved with
/// other worker-thread work instead of running as one long batch.
const RENDER_STEP_DELAY: Duration = Duration::from_millis(1);

struct PendingDelete {
    row: UpdateRow,
    /// `None` for rows whose component string failed to parse; those can
    /// never be rescued.
    component: Option<ComponentName>,
}

/// Single-use, two-pass reconciler between the store and a live inventory
pub struct CacheUpdateHandler {
    shared: Arc<CacheShared>,
    ignore_packages: AHashMap<UserHandle, HashSet<String>>,
    /// Proposed deletions, keyed by rowid. Committed in `finish()`.
    pending_delete: AHashMap<i64, PendingDelete>,
    /// Externally observed fingerprint per key, across all passes.
    freshness_seen: AHashMap<ComponentKey, String>,
    first_pass: bool,
}

impl CacheUpdateHandler {
    pub(crate) fn new(shared: Arc<CacheShared>) -> Self {
        Self {
            shared,
            ignore_packages: AHashMap::new(),
            pending_delete: AHashMap::new(),
            freshness_seen: AHashMap::new(),
            first_pass: true,
        }
    }

    /// Protect packages from deletion during this reconciliation, e.g.
    /// while they are mid-update and transiently absent from the live
    /// list.
    pub fn add_packages_to_ignore(
        &mut self,
        user: UserHandle,
        packages: impl IntoIterator<Item = String>,
    ) {
        self.ignore_packages.entry(user).or_default().extend(packages);
    }

    /// Reconcile the store against one live batch. The first call is the
    /// first pass; any later call on the same handler is the second pass.
    /// Must be called on the worker thread.
    pub fn update_icons<T, S>(
        &mut self,
        apps: Vec<T>,
        strategy: Arc<S>,
        on_updated: OnPackageIconsUpdated,
    ) where
        T: Send + 'static,
        S: CachingStrategy<T> + 'static,
    {
        let strategy: Arc<dyn CachingStrategy<T>> = strategy;
        self.shared.worker().assert_worker_thread();

        // Group the batch by user, keyed by component identity, and note
        // every observed fingerprint for the `finish()` re-validation.
        let mut by_user: AHashMap<UserHandle, AHashMap<ComponentName, T>> = AHashMap::new();
        for app in apps {
            let user = strategy.user(&app);
            let component = strategy.component(&app);
            if let Some(fresh) = strategy.freshness_fingerprint(&app) {
                self.freshness_seen
                    .insert(ComponentKey::new(component.clone(), user), fresh);
            }
            by_user.entry(user).or_default().insert(component, app);
        }

        if self.first_pass {
            self.first_pass = false;
            for (user, mut live) in by_user {
                let queue = self.first_pass_for_user(user, &mut live, strategy.as_ref());
                self.schedule_renders(user, queue, strategy.clone(), on_updated.clone());
            }
        } else {
            for (user, queue) in self.second_pass(by_user, strategy.as_ref()) {
                self.schedule_renders(user, queue, strategy.clone(), on_updated.clone());
            }
        }
    }

    /// Diff one user's persisted rows against the live map. Matched live
    /// objects are drained out of `live`; whatever remains is new and
    /// gets queued for an insert render.
    fn first_pass_for_user<T>(
        &mut self,
        user: UserHandle,
        live: &mut AHashMap<ComponentName, T>,
        strategy: &dyn CachingStrategy<T>,
    ) -> Vec<T> {
        let mut queue = Vec::new();
        let ignored = self.ignore_packages.get(&user);

        for row in self.shared.rows_for_user(user) {
            match ComponentName::unflatten(&row.component) {
                None => {
                    // Garbage from an older release; no rescue possible.
                    log::debug!("queueing malformed cache row '{}' for deletion", row.component);
                    self.pending_delete
                        .insert(row.rowid, PendingDelete { row, component: None });
                }
                Some(component) => match live.remove(&component) {
                    Some(obj) => {
                        if strategy.freshness_fingerprint(&obj) == row.freshness_id {
                            // Up to date; nothing to render.
                        } else {
                            queue.push(obj);
                        }
                    }
                    None => {
                        if ignored.is_some_and(|set| set.contains(&component.package)) {
                            continue;
                        }
                        // The package may be mid-uninstall or mid-update;
                        // propose the deletion now, confirm in finish().
                        self.shared
                            .evict_overlay(&ComponentKey::new(component.clone(), user));
                        self.pending_delete.insert(
                            row.rowid,
                            PendingDelete {
                                row,
                                component: Some(component),
                            },
                        );
                    }
                },
            }
        }

        queue.extend(live.drain().map(|(_, obj)| obj));
        queue
    }

    /// Rescue proposed deletions that match the new batch. A rescued row
    /// whose fingerprint no longer matches is re-queued as an update
    /// instead. Corrects first-pass false positives from incomplete
    /// initial inventories.
    fn second_pass<T>(
        &mut self,
        mut by_user: AHashMap<UserHandle, AHashMap<ComponentName, T>>,
        strategy: &dyn CachingStrategy<T>,
    ) -> AHashMap<UserHandle, Vec<T>> {
        let mut queues: AHashMap<UserHandle, Vec<T>> = AHashMap::new();
        self.pending_delete.retain(|_rowid, pending| {
            let Some(component) = &pending.component else {
                return true;
            };
            let user = pending.row.user;
            let Some(live) = by_user.get_mut(&user) else {
                return true;
            };
            let Some(obj) = live.remove(component) else {
                return true;
            };
            if strategy.freshness_fingerprint(&obj) != pending.row.freshness_id {
                queues.entry(user).or_default().push(obj);
            }
            false
        });
        queues
    }

    fn schedule_renders<T>(
        &self,
        user: UserHandle,
        queue: Vec<T>,
        strategy: Arc<dyn CachingStrategy<T>>,
        on_updated: OnPackageIconsUpdated,
    ) where
        T: Send + 'static,
    {
        if queue.is_empty() {
            return;
        }
        log::debug!("scheduling {} icon renders for {}", queue.len(), user);
        let task = IconUpdateTask {
            shared: Arc::clone(&self.shared),
            user,
            queue,
            strategy,
            on_updated,
            updated_packages: HashSet::new(),
            generation: self.shared.worker().current_generation(),
        };
        task.schedule();
    }

    /// Commit the surviving proposed deletions as one batched statement.
    /// A row is spared when the fingerprint observed for its key during
    /// `update_icons` matches what the store already holds. Must be
    /// called on the worker thread.
    pub fn finish(self) {
        self.shared.worker().assert_worker_thread();
        let mut doomed = Vec::new();
        for (rowid, pending) in &self.pending_delete {
            let spared = pending.component.as_ref().is_some_and(|component| {
                let key = ComponentKey::new(component.clone(), pending.row.user);
                match (self.freshness_seen.get(&key), &pending.row.freshness_id) {
                    (Some(seen), Some(stored)) => seen == stored,
                    _ => false,
                }
            });
            if !spared {
                doomed.push(*rowid);
            }
        }
        if !doomed.is_empty() {
            self.shared.delete_rows(&doomed);
        }
    }
}

/// Drains one user's render queue, one item per worker-thread step, in
/// LIFO order. Each step posts the next one with a minimal delay; the
/// task dies silently when a cache reset advances the generation.
struct IconUpdateTask<T> {
    shared: Arc<CacheShared>,
    user: UserHandle,
    queue: Vec<T>,
    strategy: Arc<dyn CachingStrategy<T>>,
    on_updated: OnPackageIconsUpdated,
    updated_packages: HashSet<String>,
    generation: u64,
}

impl<T: Send + 'static> IconUpdateTask<T> {
    fn schedule(self) {
        let worker = self.shared.worker().clone();
        worker.post_tagged(self.generation, RENDER_STEP_DELAY, move || self.step());
    }

    fn step(mut self) {
        if let Some(obj) = self.queue.pop() {
            self.shared.add_icon(&obj, self.strategy.as_ref(), self.user);
            self.updated_packages
                .insert(self.strategy.component(&obj).package);
        }
        if self.queue.is_empty() {
            if !self.updated_packages.is_empty() {
                (self.on_updated)(&self.updated_packages, self.user);
            }
        } else {
            self.schedule();
        }
    }
}
