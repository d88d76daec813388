//! Driver binding surface.
//!
//! Every call the resource layer makes into a graphics driver goes through
//! the [`GpuBackend`] trait. Backends hand out opaque `u64` handles; the
//! wrappers in [`resources`](crate::resources) and [`sync`](crate::sync)
//! own them and decide when they are created and released.
//!
//! # Available Backends
//!
//! - `dummy` (always built): in-memory backend with simulated GPU latency
//! - `wgpu-backend`: cross-platform backend using wgpu
//!
//! A backend is only ever called from the thread that owns the context, so
//! implementations need to be `Send` but not `Sync`.

pub mod dummy;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

use crate::error::RhiResult;
use crate::types::{BufferDescriptor, QueryKind, TextureDescriptor};

/// Handle to a driver buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a driver texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a driver query object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub(crate) u64);

/// Handle to a driver sync point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub(crate) u64);

macro_rules! impl_raw_handle {
    ($($handle:ident),+) => {
        $(
            impl $handle {
                /// Raw driver value of the handle.
                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )+
    };
}

impl_raw_handle!(BufferHandle, TextureHandle, QueryHandle, FenceHandle);

/// How a mapped buffer range will be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapAccess {
    /// Read the current contents; nothing is written back on unmap.
    Read,
    /// Read-modify-write of the range, ordered after pending GPU work.
    Write,
    /// Previous contents of the range are discarded.
    WriteInvalidate,
    /// Write without waiting for pending GPU work on the buffer.
    WriteUnsynchronized,
}

impl MapAccess {
    /// Returns true if unmapping writes the staging data back.
    pub fn writes_back(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Operations the resource layer needs from a graphics driver.
///
/// Mapping is modelled as a staging copy: [`map_buffer`](Self::map_buffer)
/// returns the bytes the caller may touch and [`unmap_buffer`](Self::unmap_buffer)
/// hands them back. A `None` mapping means the driver could not produce one.
pub trait GpuBackend: Send + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Create a buffer with undefined contents.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> RhiResult<BufferHandle>;

    /// Release a buffer.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Replace a buffer's backing store with a fresh allocation of the same size.
    fn orphan_buffer(&mut self, buffer: BufferHandle);

    /// Map a range of a buffer.
    fn map_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        access: MapAccess,
    ) -> Option<Vec<u8>>;

    /// Finish a mapping started by [`map_buffer`](Self::map_buffer).
    fn unmap_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8], access: MapAccess);

    /// Upload bytes into a buffer range.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Create a texture with undefined contents.
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> RhiResult<TextureHandle>;

    /// Release a texture.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Upload one tightly packed mip level.
    fn write_texture_mip(
        &mut self,
        texture: TextureHandle,
        descriptor: &TextureDescriptor,
        mip: u32,
        data: &[u8],
    );

    /// Read one mip level back, tightly packed.
    fn read_texture_mip(
        &mut self,
        texture: TextureHandle,
        descriptor: &TextureDescriptor,
        mip: u32,
    ) -> RhiResult<Vec<u8>>;

    /// Create a query object.
    fn create_query(&mut self, kind: QueryKind) -> RhiResult<QueryHandle>;

    /// Release a query object.
    fn destroy_query(&mut self, query: QueryHandle);

    /// Issue the begin command of a bracketed query.
    fn begin_query(&mut self, query: QueryHandle);

    /// Issue the end command of a query.
    fn end_query(&mut self, query: QueryHandle);

    /// Fetch a query result. With `wait` the call blocks until it is available.
    fn query_result(&mut self, query: QueryHandle, wait: bool) -> Option<u64>;

    /// Insert a sync point after all previously issued work.
    fn insert_fence(&mut self) -> RhiResult<FenceHandle>;

    /// Check a sync point. With `wait` the call blocks until it is signaled.
    fn fence_signaled(&mut self, fence: FenceHandle, wait: bool) -> bool;

    /// Release a sync point.
    fn destroy_fence(&mut self, fence: FenceHandle);
}
