//! GPU resources and their lifecycle.
//!
//! - [`GenericBuffer`] - caller-owned buffer with direct-map and shadow-copy locking
//! - [`RingBufferAllocator`] - rotating buffers for per-frame streaming
//! - [`TextureRegistry`] - textures with lazy creation, eviction and restore
//! - [`ViewRegistry`] - views attached to textures through intrusive lists
//!
//! Buffers belong to whoever created them. Textures and views live in the
//! context and are addressed by [`TextureKey`] and [`ViewKey`].

mod buffer;
mod ring_buffer;
mod texture;
mod view;

pub use buffer::{GenericBuffer, LockPath};
pub use ring_buffer::{RingBufferAllocator, StreamedRange};
#[cfg(feature = "wgpu-backend")]
pub(crate) use ring_buffer::align_up;
pub use texture::{EvictionRecord, ResidencyState, TextureKey, TextureRegistry, TextureResource};
pub use view::{TextureView, ViewKey, ViewKind, ViewRegistry};
