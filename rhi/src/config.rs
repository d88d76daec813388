//! Runtime tuning for the resource layer.
//!
//! Every knob that decides how buffers are uploaded, how the streaming ring
//! grows and how aggressively textures are evicted lives here, so a single
//! [`RhiConfig`] value describes the whole policy of a context.
//!
//! # Example
//!
//! ```
//! use redlilium_rhi::RhiConfig;
//!
//! let config = RhiConfig::default()
//!     .with_max_upload_chunk(Some(64 * 1024))
//!     .with_eviction_frames_to_live(120)
//!     .with_evictions_per_frame(4);
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{RhiError, RhiResult};

/// Configuration for a [`RhiContext`](crate::RhiContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhiConfig {
    /// Route write locks through driver mapping instead of CPU shadow memory.
    pub prefer_buffer_map: bool,
    /// Largest single upload issued when flushing shadow memory. `None` uploads in one call.
    pub max_upload_chunk: Option<u64>,
    /// Multiplier applied to the largest ring request when sizing ring buffers.
    pub ring_growth_factor: u64,
    /// Alignment of ring sub-allocations. Must be a power of two.
    pub ring_alignment: u64,
    /// Create driver textures on first use instead of at creation time.
    pub defer_texture_creation: bool,
    /// Master switch for texture eviction.
    pub texture_eviction: bool,
    /// Frames a texture may go unused before the eviction tick considers it.
    pub eviction_frames_to_live: u64,
    /// Upper bound on evictions performed by a single tick.
    pub evictions_per_frame: usize,
    /// Number of LRU entries the tick always leaves resident.
    pub eviction_min_resident: usize,
    /// Capacity of the eviction LRU list.
    pub eviction_lru_capacity: usize,
    /// Smallest mips kept in CPU memory after a retaining restore. `None` keeps all.
    pub eviction_retain_mip_count: Option<u32>,
    /// Resident byte budget for evictable textures. `None` disables budget eviction.
    pub eviction_budget_bytes: Option<u64>,
    /// Log every eviction and restore at debug level.
    pub eviction_logging: bool,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            prefer_buffer_map: false,
            max_upload_chunk: None,
            ring_growth_factor: Self::DEFAULT_RING_GROWTH_FACTOR,
            ring_alignment: Self::DEFAULT_RING_ALIGNMENT,
            defer_texture_creation: false,
            texture_eviction: true,
            eviction_frames_to_live: Self::DEFAULT_FRAMES_TO_LIVE,
            evictions_per_frame: Self::DEFAULT_EVICTIONS_PER_FRAME,
            eviction_min_resident: 0,
            eviction_lru_capacity: Self::DEFAULT_LRU_CAPACITY,
            eviction_retain_mip_count: None,
            eviction_budget_bytes: None,
            eviction_logging: false,
        }
    }
}

impl RhiConfig {
    /// Default ring growth multiplier.
    pub const DEFAULT_RING_GROWTH_FACTOR: u64 = 4;
    /// Default ring alignment, the usual minimum uniform offset alignment.
    pub const DEFAULT_RING_ALIGNMENT: u64 = 256;
    /// Default number of idle frames before a texture is eligible for eviction.
    pub const DEFAULT_FRAMES_TO_LIVE: u64 = 500;
    /// Default eviction throughput per tick.
    pub const DEFAULT_EVICTIONS_PER_FRAME: usize = 10;
    /// Default LRU capacity.
    pub const DEFAULT_LRU_CAPACITY: usize = 8192;

    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether write locks map the driver buffer directly.
    pub fn with_prefer_buffer_map(mut self, prefer: bool) -> Self {
        self.prefer_buffer_map = prefer;
        self
    }

    /// Set the maximum size of a single upload.
    pub fn with_max_upload_chunk(mut self, chunk: Option<u64>) -> Self {
        self.max_upload_chunk = chunk;
        self
    }

    /// Set the ring growth multiplier.
    pub fn with_ring_growth_factor(mut self, factor: u64) -> Self {
        self.ring_growth_factor = factor;
        self
    }

    /// Set the ring sub-allocation alignment.
    pub fn with_ring_alignment(mut self, alignment: u64) -> Self {
        self.ring_alignment = alignment;
        self
    }

    /// Set whether texture creation is deferred to first use.
    pub fn with_defer_texture_creation(mut self, defer: bool) -> Self {
        self.defer_texture_creation = defer;
        self
    }

    /// Enable or disable texture eviction.
    pub fn with_texture_eviction(mut self, enabled: bool) -> Self {
        self.texture_eviction = enabled;
        self
    }

    /// Set the idle-frame threshold for eviction.
    pub fn with_eviction_frames_to_live(mut self, frames: u64) -> Self {
        self.eviction_frames_to_live = frames;
        self
    }

    /// Set the maximum number of evictions per tick.
    pub fn with_evictions_per_frame(mut self, count: usize) -> Self {
        self.evictions_per_frame = count;
        self
    }

    /// Set how many LRU entries always stay resident.
    pub fn with_eviction_min_resident(mut self, count: usize) -> Self {
        self.eviction_min_resident = count;
        self
    }

    /// Set the LRU list capacity.
    pub fn with_eviction_lru_capacity(mut self, capacity: usize) -> Self {
        self.eviction_lru_capacity = capacity;
        self
    }

    /// Set how many of the smallest mips survive a retaining restore.
    pub fn with_eviction_retain_mip_count(mut self, count: Option<u32>) -> Self {
        self.eviction_retain_mip_count = count;
        self
    }

    /// Set the resident byte budget for evictable textures.
    pub fn with_eviction_budget_bytes(mut self, budget: Option<u64>) -> Self {
        self.eviction_budget_bytes = budget;
        self
    }

    /// Enable per-texture eviction logging.
    pub fn with_eviction_logging(mut self, enabled: bool) -> Self {
        self.eviction_logging = enabled;
        self
    }

    /// Check the configuration for values the resource layer cannot work with.
    pub fn validate(&self) -> RhiResult<()> {
        if !self.ring_alignment.is_power_of_two() {
            return Err(RhiError::InvalidParameter(format!(
                "ring alignment must be a power of 2, got {}",
                self.ring_alignment
            )));
        }
        if self.ring_growth_factor == 0 {
            return Err(RhiError::InvalidParameter(
                "ring growth factor cannot be zero".to_string(),
            ));
        }
        if self.max_upload_chunk == Some(0) {
            return Err(RhiError::InvalidParameter(
                "upload chunk size cannot be zero".to_string(),
            ));
        }
        if self.eviction_lru_capacity == 0 {
            return Err(RhiError::InvalidParameter(
                "eviction LRU capacity cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RhiConfig::default();
        assert!(!config.prefer_buffer_map);
        assert_eq!(config.ring_alignment, 256);
        assert_eq!(config.ring_growth_factor, 4);
        assert_eq!(config.eviction_frames_to_live, 500);
        assert_eq!(config.evictions_per_frame, 10);
        assert!(config.texture_eviction);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = RhiConfig::new()
            .with_prefer_buffer_map(true)
            .with_eviction_budget_bytes(Some(1 << 20))
            .with_eviction_retain_mip_count(Some(2));

        assert!(config.prefer_buffer_map);
        assert_eq!(config.eviction_budget_bytes, Some(1 << 20));
        assert_eq!(config.eviction_retain_mip_count, Some(2));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RhiConfig::new().with_ring_alignment(100).validate().is_err());
        assert!(RhiConfig::new().with_ring_growth_factor(0).validate().is_err());
        assert!(RhiConfig::new().with_max_upload_chunk(Some(0)).validate().is_err());
        assert!(RhiConfig::new().with_eviction_lru_capacity(0).validate().is_err());
    }
}
