//! Core types for the icon cache

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a cacheable component: a package plus a class within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    /// Create a component name from a package and class pair
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Synthetic component used for package-level cache entries
    pub fn package_key(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: ".".to_string(),
        }
    }

    /// Serialized form stored in the `componentName` column
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }

    /// Parse the serialized form. Returns `None` for malformed strings,
    /// which the reconciler treats as garbage rows.
    pub fn unflatten(s: &str) -> Option<Self> {
        let (package, class) = s.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        Some(Self::new(package, class))
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

impl std::str::FromStr for ComponentName {
    type Err = crate::error::IconCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::unflatten(s)
            .ok_or_else(|| crate::error::IconCacheError::MalformedComponent(s.to_string()))
    }
}

/// A user profile, identified by its serial number
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct UserHandle(pub i64);

impl UserHandle {
    /// The profile serial number persisted in the `profileId` column
    pub fn serial(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Unique cache identity: component plus user profile.
///
/// Row identity in the store and map key in the overlay. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    pub component: ComponentName,
    pub user: UserHandle,
}

impl ComponentKey {
    pub fn new(component: ComponentName, user: UserHandle) -> Self {
        Self { component, user }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.component, self.user)
    }
}

/// Marks the low-resolution placeholder bitmap.
pub const BITMAP_FLAG_LOW_RES: u32 = 1 << 0;

/// An opaque rendered icon payload.
///
/// The cache never inspects the bytes; decoding and theming belong to the
/// external renderer. Cloning shares the payload.
#[derive(Debug, Clone)]
pub struct IconBitmap {
    /// The icon data (shared ownership for duplicates)
    pub data: Arc<Vec<u8>>,
    /// Optional monochrome variant
    pub mono: Option<Arc<Vec<u8>>>,
    /// Dominant-color summary
    pub color: u32,
    /// Flag bitset
    pub flags: u32,
}

impl IconBitmap {
    /// Create a new icon bitmap
    pub fn new(data: Vec<u8>, color: u32) -> Self {
        Self {
            data: Arc::new(data),
            mono: None,
            color,
            flags: 0,
        }
    }

    /// Attach a monochrome variant
    pub fn with_mono(mut self, mono: Vec<u8>) -> Self {
        self.mono = Some(Arc::new(mono));
        self
    }

    /// The low-resolution placeholder sentinel
    pub fn low_res() -> Self {
        Self::low_res_with(0, 0)
    }

    /// Low-resolution placeholder carrying a persisted color and flags
    pub fn low_res_with(color: u32, flags: u32) -> Self {
        Self {
            data: Arc::new(Vec::new()),
            mono: None,
            color,
            flags: flags | BITMAP_FLAG_LOW_RES,
        }
    }

    pub fn is_low_res(&self) -> bool {
        self.flags & BITMAP_FLAG_LOW_RES != 0
    }

    pub fn is_null_or_low_res(&self) -> bool {
        self.data.is_empty() || self.is_low_res()
    }

    /// Payload equality, with a cheap shared-ownership check first
    pub fn same_pixels(&self, other: &IconBitmap) -> bool {
        Arc::ptr_eq(&self.data, &other.data) || self.data == other.data
    }

    /// Size of the icon payload in bytes
    pub fn size(&self) -> usize {
        self.data.len() + self.mono.as_ref().map_or(0, |m| m.len())
    }
}

impl Default for IconBitmap {
    fn default() -> Self {
        Self::low_res()
    }
}

/// An in-memory cache entry: bitmap, title and accessibility text.
///
/// Replaced wholesale on update, never partially mutated across threads.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub bitmap: IconBitmap,
    pub title: String,
    pub content_description: String,
}

/// Flags controlling a single cache lookup.
///
/// Only eight combinations exist, so every combination is a pre-built
/// constant and the `with_*` methods hand back one of those interned
/// values instead of assembling new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupFlags(u8);

impl LookupFlags {
    const LOW_RES: u8 = 1 << 0;
    const PACKAGE_ICON: u8 = 1 << 1;
    const SKIP_MEM_CACHE: u8 = 1 << 2;

    /// High resolution, no package fallback, result cached in memory
    pub const DEFAULT: Self = Self(0);

    const INTERNED: [Self; 8] = [
        Self(0),
        Self(1),
        Self(2),
        Self(3),
        Self(4),
        Self(5),
        Self(6),
        Self(7),
    ];

    fn interned(bits: u8) -> Self {
        Self::INTERNED[(bits & 7) as usize]
    }

    /// Accept (and prefer) the low-resolution placeholder
    pub fn with_use_low_res(self) -> Self {
        Self::interned(self.0 | Self::LOW_RES)
    }

    /// Fall back to the package-level entry when the component misses
    pub fn with_use_package_icon(self) -> Self {
        Self::interned(self.0 | Self::PACKAGE_ICON)
    }

    /// Do not add the result to the in-memory overlay
    pub fn with_skip_add_to_mem_cache(self) -> Self {
        Self::interned(self.0 | Self::SKIP_MEM_CACHE)
    }

    pub fn use_low_res(self) -> bool {
        self.0 & Self::LOW_RES != 0
    }

    pub fn use_package_icon(self) -> bool {
        self.0 & Self::PACKAGE_ICON != 0
    }

    pub fn skip_add_to_mem_cache(self) -> bool {
        self.0 & Self::SKIP_MEM_CACHE != 0
    }
}

impl Default for LookupFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups satisfied by the overlay
    pub hits: u64,
    /// Lookups that went to the store or a render
    pub misses: u64,
    /// Strategy render invocations
    pub renders: u64,
    /// Current overlay entry count
    pub entries: usize,
}
