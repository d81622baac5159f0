//! Per-object-kind caching strategies
//!
//! The cache core and the update reconciler never see concrete domain
//! types; they work through a [`CachingStrategy`], which knows how to pull
//! an identity, a label and a freshness fingerprint out of an object and
//! how to render it through the external icon renderer.

use std::sync::Arc;

use crate::types::{ComponentName, IconBitmap, UserHandle};

/// External collaborator that renders a component's icon.
pub trait IconRenderer: Send + Sync {
    /// Render the icon for a component, or `None` when the component can
    /// no longer be resolved.
    fn render(&self, component: &ComponentName, user: UserHandle) -> Option<IconBitmap>;
}

/// External collaborator that synthesizes per-user default icons.
pub trait DefaultIconProvider: Send + Sync {
    /// Badge-related flags for a user profile.
    fn user_flags(&self, user: UserHandle) -> u32 {
        let _ = user;
        0
    }

    /// Synthesize the default icon, adjusted for the user's flags.
    fn render_default(&self, user: UserHandle, user_flags: u32) -> IconBitmap;
}

/// Capability interface for one kind of cacheable object.
pub trait CachingStrategy<T>: Send + Sync {
    /// Component identity of the object.
    fn component(&self, obj: &T) -> ComponentName;

    /// User profile the object belongs to.
    fn user(&self, obj: &T) -> UserHandle;

    /// Display label. `None` falls back to the package name.
    fn label(&self, obj: &T) -> Option<String>;

    /// Freshness fingerprint summarizing the state that determines
    /// whether a cached icon is still valid. `None` means the object is
    /// never persisted, only kept in the overlay.
    fn freshness_fingerprint(&self, obj: &T) -> Option<String>;

    /// Render the object's icon. `None` makes the caller fall back to
    /// the package entry or the default icon.
    fn render_icon(&self, obj: &T) -> Option<IconBitmap>;
}

/// Version state of an installed application, used for freshness only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersionInfo {
    pub version_code: u64,
    pub last_updated_ms: u64,
}

impl AppVersionInfo {
    pub fn new(version_code: u64, last_updated_ms: u64) -> Self {
        Self {
            version_code,
            last_updated_ms,
        }
    }

    fn fingerprint(&self) -> String {
        format!("{}:{}", self.version_code, self.last_updated_ms)
    }
}

/// Coarse whole-application record.
#[derive(Debug, Clone)]
pub struct AppRecord {
    pub package: String,
    pub user: UserHandle,
    pub label: Option<String>,
    pub version: Option<AppVersionInfo>,
}

/// Fine-grained activity record.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub component: ComponentName,
    pub user: UserHandle,
    pub label: Option<String>,
    pub version: Option<AppVersionInfo>,
}

/// Caller-supplied object for the generic pass-through strategy. Carries
/// its own pre-rendered bitmap.
#[derive(Debug, Clone)]
pub struct CachedObject {
    pub component: ComponentName,
    pub user: UserHandle,
    pub label: Option<String>,
    pub fingerprint: Option<String>,
    pub bitmap: Option<IconBitmap>,
}

/// Strategy for whole-application identities; cached under the synthetic
/// package-level component.
pub struct AppRecordStrategy {
    renderer: Arc<dyn IconRenderer>,
}

impl AppRecordStrategy {
    pub fn new(renderer: Arc<dyn IconRenderer>) -> Self {
        Self { renderer }
    }
}

impl CachingStrategy<AppRecord> for AppRecordStrategy {
    fn component(&self, obj: &AppRecord) -> ComponentName {
        ComponentName::package_key(obj.package.clone())
    }

    fn user(&self, obj: &AppRecord) -> UserHandle {
        obj.user
    }

    fn label(&self, obj: &AppRecord) -> Option<String> {
        obj.label.clone()
    }

    fn freshness_fingerprint(&self, obj: &AppRecord) -> Option<String> {
        obj.version.as_ref().map(AppVersionInfo::fingerprint)
    }

    fn render_icon(&self, obj: &AppRecord) -> Option<IconBitmap> {
        self.renderer.render(&self.component(obj), obj.user)
    }
}

/// Strategy for activity identities.
pub struct ActivityRecordStrategy {
    renderer: Arc<dyn IconRenderer>,
}

impl ActivityRecordStrategy {
    pub fn new(renderer: Arc<dyn IconRenderer>) -> Self {
        Self { renderer }
    }
}

impl CachingStrategy<ActivityRecord> for ActivityRecordStrategy {
    fn component(&self, obj: &ActivityRecord) -> ComponentName {
        obj.component.clone()
    }

    fn user(&self, obj: &ActivityRecord) -> UserHandle {
        obj.user
    }

    fn label(&self, obj: &ActivityRecord) -> Option<String> {
        obj.label.clone()
    }

    fn freshness_fingerprint(&self, obj: &ActivityRecord) -> Option<String> {
        obj.version.as_ref().map(AppVersionInfo::fingerprint)
    }

    fn render_icon(&self, obj: &ActivityRecord) -> Option<IconBitmap> {
        self.renderer.render(&obj.component, obj.user)
    }
}

/// Pass-through strategy: the object already carries everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct CachedObjectStrategy;

impl CachingStrategy<CachedObject> for CachedObjectStrategy {
    fn component(&self, obj: &CachedObject) -> ComponentName {
        obj.component.clone()
    }

    fn user(&self, obj: &CachedObject) -> UserHandle {
        obj.user
    }

    fn label(&self, obj: &CachedObject) -> Option<String> {
        obj.label.clone()
    }

    fn freshness_fingerprint(&self, obj: &CachedObject) -> Option<String> {
        obj.fingerprint.clone()
    }

    fn render_icon(&self, obj: &CachedObject) -> Option<IconBitmap> {
        obj.bitmap.clone()
    }
}

/// Minimal default-icon source: a deterministic placeholder payload per
/// flag value. Real integrations supply their own provider.
#[derive(Debug, Clone, Copy)]
pub struct SolidDefaultIconProvider {
    color: u32,
}

impl SolidDefaultIconProvider {
    pub fn new(color: u32) -> Self {
        Self { color }
    }
}

impl Default for SolidDefaultIconProvider {
    fn default() -> Self {
        Self::new(0x80808080)
    }
}

impl DefaultIconProvider for SolidDefaultIconProvider {
    fn render_default(&self, _user: UserHandle, user_flags: u32) -> IconBitmap {
        let mut data = self.color.to_be_bytes().to_vec();
        // Badged profiles get a distinct payload.
        data.extend_from_slice(&user_flags.to_be_bytes());
        IconBitmap::new(data, self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRenderer;

    impl IconRenderer for NullRenderer {
        fn render(&self, _component: &ComponentName, _user: UserHandle) -> Option<IconBitmap> {
            None
        }
    }

    #[test]
    fn test_app_record_uses_package_key() {
        let strategy = AppRecordStrategy::new(Arc::new(NullRenderer));
        let record = AppRecord {
            package: "com.example".to_string(),
            user: UserHandle(0),
            label: None,
            version: Some(AppVersionInfo::new(3, 1700000000)),
        };
        assert_eq!(
            strategy.component(&record),
            ComponentName::package_key("com.example")
        );
        assert_eq!(
            strategy.freshness_fingerprint(&record).as_deref(),
            Some("3:1700000000")
        );
    }

    #[test]
    fn test_missing_version_means_memory_only() {
        let strategy = ActivityRecordStrategy::new(Arc::new(NullRenderer));
        let record = ActivityRecord {
            component: ComponentName::new("com.example", "Main"),
            user: UserHandle(0),
            label: Some("Example".to_string()),
            version: None,
        };
        assert!(strategy.freshness_fingerprint(&record).is_none());
    }

    #[test]
    fn test_cached_object_passthrough() {
        let strategy = CachedObjectStrategy;
        let object = CachedObject {
            component: ComponentName::new("com.example", "Widget"),
            user: UserHandle(10),
            label: Some("Widget".to_string()),
            fingerprint: Some("w1".to_string()),
            bitmap: Some(IconBitmap::new(vec![5], 0)),
        };
        assert_eq!(strategy.user(&object), UserHandle(10));
        assert!(strategy.render_icon(&object).is_some());
    }

    #[test]
    fn test_default_icons_differ_by_flags() {
        let provider = SolidDefaultIconProvider::default();
        let plain = provider.render_default(UserHandle(0), 0);
        let badged = provider.render_default(UserHandle(10), 1);
        assert!(!plain.same_pixels(&badged));
    }
}
