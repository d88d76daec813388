//! # RedLilium RHI
//!
//! GPU resource lifecycle and streaming layer for the RedLilium renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GenericBuffer`] - buffers locked either by mapping the driver buffer
//!   or through CPU shadow memory uploaded on unlock
//! - [`RingBufferAllocator`] - rotating buffers for per-frame streaming data
//! - [`TextureRegistry`] - textures that are created lazily, evicted to CPU
//!   memory when idle and restored transparently on access
//! - [`QueryRegistry`] and [`FenceRegistry`] - asynchronous queries and
//!   fences polled once per frame
//! - [`RhiContext`] - the single-threaded owner of all of the above, fed
//!   from other threads through a [`CommandSender`]
//!
//! Drivers plug in through the [`GpuBackend`] trait. An in-memory
//! [`DummyBackend`] is always available; a wgpu backend is available with
//! the `wgpu-backend` feature.
//!
//! ## Example
//!
//! ```
//! use redlilium_rhi::{RhiContext, TextureDescriptor, TextureFormat, TextureUsage};
//!
//! let mut ctx = RhiContext::dummy().unwrap();
//! let desc = TextureDescriptor::new_2d(
//!     4,
//!     4,
//!     TextureFormat::R8Unorm,
//!     TextureUsage::TEXTURE_BINDING | TextureUsage::STREAMABLE,
//! );
//! let texture = ctx.create_texture(&desc, &[&[1u8; 16]]).unwrap();
//!
//! assert!(ctx.try_evict(texture));
//! assert_eq!(ctx.read_texture_mip(texture, 0).unwrap(), vec![1u8; 16]);
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod eviction;
pub mod intrusive;
pub mod profiling;
pub mod resources;
pub mod stats;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::dummy::{DummyBackend, DummyProbe};
pub use backend::{BufferHandle, FenceHandle, GpuBackend, MapAccess, QueryHandle, TextureHandle};
pub use command::{Command, CommandSender};
pub use config::RhiConfig;
pub use context::{FrameSummary, RhiContext};
pub use device::RhiDevice;
pub use error::{RhiError, RhiResult};
pub use eviction::EvictionManager;
pub use resources::{
    EvictionRecord, GenericBuffer, LockPath, ResidencyState, RingBufferAllocator, StreamedRange,
    TextureKey, TextureRegistry, TextureResource, TextureView, ViewKey, ViewKind, ViewRegistry,
};
pub use stats::RhiStats;
pub use sync::{
    AsyncQuery, FenceCallback, FenceKey, FenceRegistry, FenceSignal, GpuFence, QueryKey,
    QueryRegistry, QueryState, QueryTarget,
};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, LockMode, QueryKind, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsage,
};

#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
