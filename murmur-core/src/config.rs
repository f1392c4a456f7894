//! Cache and store configuration.
//!
//! The store config file lives at `~/.config/murmur/murmur.toml`:
//!
//! ```toml
//! self_id = "80351110224678912"
//! late_delta_policy = "drop"
//! tombstone_capacity = 1024
//!
//! [cache]
//! capacity = 50
//! max_age_seconds = 43200
//!
//! [[channels]]
//! channel = "381870553235193857"
//! cache = { capacity = 0, max_age_seconds = 0 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::id::{ChannelId, UserId};

/// Messages kept per channel unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 50;
/// Twelve hours.
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 12 * 60 * 60;
/// Deleted message ids remembered by the store.
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 1024;

/// Capacity and age bounds for one channel cache.
///
/// Both bounds must be non-zero for anything to be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCacheConfig")]
pub struct CacheConfig {
    capacity: usize,
    max_age_seconds: u64,
}

#[derive(Deserialize)]
struct RawCacheConfig {
    capacity: i64,
    max_age_seconds: i64,
}

impl TryFrom<RawCacheConfig> for CacheConfig {
    type Error = CacheError;

    fn try_from(raw: RawCacheConfig) -> Result<Self> {
        Self::new(raw.capacity, raw.max_age_seconds)
    }
}

impl CacheConfig {
    /// Rejects negative bounds with [`CacheError::InvalidConfiguration`].
    pub fn new(capacity: i64, max_age_seconds: i64) -> Result<Self> {
        if capacity < 0 {
            return Err(CacheError::InvalidConfiguration(format!(
                "capacity must not be negative (got {capacity})"
            )));
        }
        if max_age_seconds < 0 {
            return Err(CacheError::InvalidConfiguration(format!(
                "max_age_seconds must not be negative (got {max_age_seconds})"
            )));
        }
        Ok(Self {
            capacity: capacity as usize,
            max_age_seconds: max_age_seconds as u64,
        })
    }

    pub const fn disabled() -> Self {
        Self {
            capacity: 0,
            max_age_seconds: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_age_seconds(&self) -> u64 {
        self.max_age_seconds
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_seconds.min(i64::MAX as u64 / 1000) as i64)
    }

    /// False when either bound is zero.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && self.max_age_seconds > 0
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
        }
    }
}

/// What happens to reaction deltas that arrive after a message was deleted.
///
/// Edits never touch a deleted message, and no edit or reaction listener
/// fires for one, whichever policy is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateDeltaPolicy {
    /// Ignore them.
    #[default]
    Drop,
    /// Fold them into the frozen reaction counters for historical accuracy.
    FoldFrozen,
}

/// Cache bounds for a single channel, overriding [`StoreConfig::cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel: ChannelId,
    pub cache: CacheConfig,
}

/// Configuration of a [`MessageStore`](crate::store::MessageStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The local account. Reactions by this user count as self reactions
    /// even when the delta does not say so.
    pub self_id: Option<UserId>,
    pub late_delta_policy: LateDeltaPolicy,
    /// How many deleted ids to remember. Zero disables tombstones.
    ///
    /// Memory is bounded at the cost of the deletion guarantee: once a
    /// deleted id has been pushed out of this window and its entry evicted,
    /// a late edit or reaction for it creates a live placeholder again.
    pub tombstone_capacity: usize,
    /// Bounds for channels without an override.
    pub cache: CacheConfig,
    pub channels: Vec<ChannelOverride>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            self_id: None,
            late_delta_policy: LateDeltaPolicy::default(),
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
            cache: CacheConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// `~/.config/murmur/murmur.toml`, or `./murmur/murmur.toml` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
            .join("murmur.toml")
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CacheError::InvalidConfiguration(e.to_string()))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no store config, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidConfiguration(format!("can't read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CacheError::InvalidConfiguration(e.to_string()))
    }

    /// Bounds for `channel`: its override if present, else the default.
    pub fn cache_config_for(&self, channel: ChannelId) -> CacheConfig {
        self.channels
            .iter()
            .rev()
            .find(|o| o.channel == channel)
            .map(|o| o.cache)
            .unwrap_or(self.cache)
    }
}
