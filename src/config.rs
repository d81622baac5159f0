//! Configuration for the icon cache

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the icon cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    // Disk store settings
    /// Path of the store database. `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,

    // Icon parameters, folded into the store schema version
    /// Edge size of cached icon bitmaps, in pixels.
    pub icon_pixel_size: u32,
    /// Display density the icons are rendered for.
    pub dpi: u32,

    // Memory overlay settings
    /// Keep decoded entries in the in-memory overlay. When disabled the
    /// overlay becomes a pass-through and every lookup goes to the store.
    pub cache_entries_in_memory: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            icon_pixel_size: 96,
            dpi: 160,
            cache_entries_in_memory: true,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store database path
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    /// Set the icon pixel size
    pub fn with_icon_pixel_size(mut self, pixels: u32) -> Self {
        self.icon_pixel_size = pixels;
        self
    }

    /// Set the display density
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Disable the in-memory overlay (useful on low-memory devices)
    pub fn without_memory_cache(mut self) -> Self {
        self.cache_entries_in_memory = false;
        self
    }
}
