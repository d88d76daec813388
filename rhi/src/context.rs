//! The rendering context.
//!
//! [`RhiContext`] owns the device, every texture, view, query and fence,
//! the eviction LRU and the command queue. It is created on, and stays
//! bound to, a single thread; other threads talk to it through a
//! [`CommandSender`]. Buffers and ring allocators are owned by callers and
//! borrow the device through [`RhiContext::device_mut`].
//!
//! # Example
//!
//! ```
//! use redlilium_rhi::{BufferDescriptor, BufferUsage, LockMode, RhiConfig, RhiContext};
//!
//! let mut ctx = RhiContext::with_dummy(RhiConfig::default()).unwrap();
//! let mut buffer = ctx.create_buffer(&BufferDescriptor::new(64, BufferUsage::VERTEX)).unwrap();
//!
//! buffer.update(ctx.device_mut(), &[7u8; 64], 0, true);
//! let bytes = buffer.lock(ctx.device_mut(), 0, 4, LockMode::ReadOnly, false);
//! assert_eq!(bytes, &[7u8; 4]);
//! buffer.unlock(ctx.device_mut());
//!
//! let summary = ctx.end_frame();
//! assert_eq!(summary.frame, 0);
//! ```

use std::sync::mpsc::{self, Receiver, Sender};

use crate::backend::dummy::DummyBackend;
use crate::backend::{GpuBackend, TextureHandle};
use crate::command::{Command, CommandSender};
use crate::config::RhiConfig;
use crate::device::RhiDevice;
use crate::error::RhiResult;
use crate::resources::{
    GenericBuffer, RingBufferAllocator, TextureKey, TextureRegistry, TextureResource, ViewKey,
    ViewKind,
};
use crate::stats::RhiStats;
use crate::sync::{FenceCallback, FenceKey, FenceRegistry, FenceSignal, QueryKey, QueryRegistry, QueryTarget};
use crate::types::{BufferDescriptor, BufferUsage, QueryKind, TextureDescriptor};

/// What the end-of-frame sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    /// Frame that just ended.
    pub frame: u64,
    /// Driver objects of dropped buffers released.
    pub released: usize,
    pub queries_resolved: usize,
    pub fences_signaled: usize,
    /// Textures evicted by the LRU tick.
    pub evicted: usize,
}

/// Single-threaded owner of the driver and every shared GPU object.
pub struct RhiContext {
    device: RhiDevice,
    textures: TextureRegistry,
    queries: QueryRegistry,
    fences: FenceRegistry,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
    frame: u64,
}

impl RhiContext {
    /// Create a context over a backend. The calling thread becomes the owner.
    pub fn new(backend: Box<dyn GpuBackend>, config: RhiConfig) -> RhiResult<Self> {
        let lru_capacity = config.eviction_lru_capacity;
        let device = RhiDevice::new(backend, config)?;
        let (command_tx, command_rx) = mpsc::channel();
        Ok(Self {
            device,
            textures: TextureRegistry::new(lru_capacity),
            queries: QueryRegistry::new(),
            fences: FenceRegistry::new(),
            command_tx,
            command_rx,
            frame: 0,
        })
    }

    /// Create a context over the in-memory backend.
    pub fn with_dummy(config: RhiConfig) -> RhiResult<Self> {
        Self::new(Box::new(DummyBackend::new()), config)
    }

    /// Create a context over the in-memory backend with default settings.
    pub fn dummy() -> RhiResult<Self> {
        Self::with_dummy(RhiConfig::default())
    }

    /// Create a context over the first available wgpu adapter.
    #[cfg(feature = "wgpu-backend")]
    pub fn new_wgpu(config: RhiConfig) -> RhiResult<Self> {
        let backend = crate::backend::wgpu_backend::WgpuBackend::new()?;
        Self::new(Box::new(backend), config)
    }

    pub fn device(&self) -> &RhiDevice {
        &self.device
    }

    /// Device access for caller-owned buffers and ring allocators.
    pub fn device_mut(&mut self) -> &mut RhiDevice {
        &mut self.device
    }

    pub fn config(&self) -> &RhiConfig {
        self.device.config()
    }

    pub fn stats(&self) -> &RhiStats {
        self.device.stats()
    }

    /// Index of the current frame.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Make the calling thread the owner after moving the context.
    pub fn bind_to_current_thread(&mut self) {
        self.device.bind_to_current_thread();
    }

    // Buffers

    pub fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> RhiResult<GenericBuffer> {
        GenericBuffer::new(&mut self.device, descriptor)
    }

    pub fn create_buffer_with_data(
        &mut self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> RhiResult<GenericBuffer> {
        GenericBuffer::with_data(&mut self.device, descriptor, data)
    }

    pub fn create_ring_buffer(
        &mut self,
        count: usize,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> RhiResult<RingBufferAllocator> {
        RingBufferAllocator::new(&mut self.device, count, size, usage, label)
    }

    // Textures

    /// All textures, views and the eviction LRU.
    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn texture(&self, key: TextureKey) -> Option<&TextureResource> {
        self.textures.get(key)
    }

    /// Register a texture with optional initial contents, one slice per mip.
    pub fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        initial_mips: &[&[u8]],
    ) -> RhiResult<TextureKey> {
        crate::profile_scope!("create_texture");
        self.textures
            .create(&mut self.device, descriptor, initial_mips, self.frame)
    }

    /// Create the driver object of a texture registered with deferred creation.
    pub fn realize_texture(&mut self, key: TextureKey) -> RhiResult<()> {
        self.textures.realize(&mut self.device, key, self.frame, false)
    }

    /// Driver handle for reading; restores evicted textures.
    pub fn resource(&mut self, key: TextureKey) -> RhiResult<TextureHandle> {
        self.textures.resource(&mut self.device, key, self.frame)
    }

    /// Driver handle for writing; restores evicted textures and drops their CPU copies.
    pub fn resource_ref(&mut self, key: TextureKey) -> RhiResult<TextureHandle> {
        self.textures.resource_ref(&mut self.device, key, self.frame)
    }

    pub fn try_evict(&mut self, key: TextureKey) -> bool {
        crate::profile_scope!("try_evict");
        self.textures.try_evict(&mut self.device, key)
    }

    /// Bring an evicted texture back, optionally keeping its CPU copies.
    pub fn restore_evicted(&mut self, key: TextureKey, retain: bool) -> RhiResult<()> {
        crate::profile_scope!("restore_evicted");
        self.textures.restore(&mut self.device, key, self.frame, retain)
    }

    pub fn write_texture_mip(&mut self, key: TextureKey, mip: u32, data: &[u8]) -> RhiResult<()> {
        self.textures
            .write_mip(&mut self.device, key, mip, data, self.frame)
    }

    pub fn read_texture_mip(&mut self, key: TextureKey, mip: u32) -> RhiResult<Vec<u8>> {
        self.textures.read_mip(&mut self.device, key, mip, self.frame)
    }

    pub fn create_aliased_texture(&mut self, origin: TextureKey) -> RhiResult<TextureKey> {
        self.textures.create_alias(&mut self.device, origin, self.frame)
    }

    /// Point an alias at another origin. Returns the number of views refreshed.
    pub fn realias_texture(&mut self, alias: TextureKey, origin: TextureKey) -> RhiResult<usize> {
        self.textures
            .realias(&mut self.device, alias, origin, self.frame)
    }

    pub fn destroy_texture(&mut self, key: TextureKey) -> RhiResult<()> {
        self.textures.destroy(&mut self.device, key)
    }

    pub fn create_view(
        &mut self,
        texture: TextureKey,
        kind: ViewKind,
        base_mip: u32,
        mip_count: u32,
    ) -> RhiResult<ViewKey> {
        self.textures
            .create_view(&mut self.device, texture, kind, base_mip, mip_count, self.frame)
    }

    pub fn destroy_view(&mut self, view: ViewKey) -> bool {
        self.textures.destroy_view(view)
    }

    pub fn invalidate_views(&mut self, texture: TextureKey) -> usize {
        self.textures.invalidate_views(texture)
    }

    /// Run the LRU eviction pass for the current frame.
    pub fn tick_eviction(&mut self) -> usize {
        crate::profile_scope!("tick_eviction");
        self.textures.tick(&mut self.device, self.frame)
    }

    // Queries

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    pub fn create_query(&mut self, kind: QueryKind) -> RhiResult<QueryKey> {
        self.queries.create(&mut self.device, kind)
    }

    pub fn begin_query(&mut self, query: QueryKey) -> RhiResult<()> {
        self.queries.begin(&mut self.device, query)
    }

    pub fn end_query(&mut self, query: QueryKey, target: Option<QueryTarget>) -> RhiResult<()> {
        self.queries.end(&mut self.device, query, target)
    }

    /// Poll one query, or every active one. Returns the number resolved.
    pub fn poll_query_results(&mut self, only: Option<QueryKey>) -> usize {
        self.queries.poll(&mut self.device, only)
    }

    pub fn query_result(&mut self, query: QueryKey, wait: bool) -> Option<u64> {
        self.queries.result(&mut self.device, query, wait)
    }

    pub fn abandon_query(&mut self, query: QueryKey) -> bool {
        self.queries.abandon(query)
    }

    pub fn destroy_query(&mut self, query: QueryKey) -> bool {
        self.queries.destroy(&mut self.device, query)
    }

    // Fences

    pub fn fences(&self) -> &FenceRegistry {
        &self.fences
    }

    pub fn insert_fence(&mut self) -> RhiResult<FenceKey> {
        self.fences.insert(&mut self.device)
    }

    pub fn fence_signaled(&mut self, fence: FenceKey, wait: bool) -> bool {
        self.fences.is_signaled(&mut self.device, fence, wait)
    }

    pub fn on_fence_signaled(&mut self, fence: FenceKey, callback: FenceCallback) -> bool {
        self.fences.on_signaled(fence, callback)
    }

    pub fn poll_fences(&mut self) -> usize {
        self.fences.poll(&mut self.device)
    }

    pub fn fence_signal(&self, fence: FenceKey) -> Option<FenceSignal> {
        self.fences.signal(fence)
    }

    pub fn destroy_fence(&mut self, fence: FenceKey) -> bool {
        self.fences.destroy(&mut self.device, fence)
    }

    // Commands and frames

    /// Producer handle for other threads.
    pub fn command_sender(&self) -> CommandSender {
        CommandSender::new(self.command_tx.clone())
    }

    /// Run every queued command in FIFO order. Returns the number executed.
    ///
    /// Commands enqueued while this runs are executed in the same call.
    pub fn execute_pending(&mut self) -> usize {
        crate::profile_scope!("execute_pending");
        self.device.verify_context_scope();
        let mut executed = 0;
        while let Ok(command) = self.command_rx.try_recv() {
            command(self);
            executed += 1;
        }
        self.device.stats_mut().commands_executed += executed as u64;
        executed
    }

    /// End-of-frame hook.
    ///
    /// Releases driver objects of dropped buffers, polls queries and fences,
    /// runs the eviction tick and advances the frame counter.
    pub fn end_frame(&mut self) -> FrameSummary {
        crate::profile_scope!("end_frame");
        let summary = FrameSummary {
            frame: self.frame,
            released: self.device.flush_releases(),
            queries_resolved: self.queries.poll(&mut self.device, None),
            fences_signaled: self.fences.poll(&mut self.device),
            evicted: self.textures.tick(&mut self.device, self.frame),
        };
        self.frame += 1;

        crate::profile_plot!("resident_texture_bytes", self.textures.eviction().resident_bytes());
        crate::profile_plot!("cached_mip_bytes", self.textures.cached_mip_bytes());
        crate::frame_mark!();
        if summary.evicted > 0 {
            log::debug!(
                "RhiContext: frame {} evicted {} textures",
                summary.frame,
                summary.evicted
            );
        }
        summary
    }

    /// Release every object the context owns.
    ///
    /// Commands still queued are dropped without running.
    pub fn shutdown(&mut self) {
        let dropped = self.command_rx.try_iter().count();
        if dropped > 0 {
            log::warn!("RhiContext: dropping {dropped} queued commands at shutdown");
        }
        self.device.flush_releases();
        self.queries.clear(&mut self.device);
        self.fences.clear(&mut self.device);
        self.textures.clear(&mut self.device);
        log::debug!("RhiContext: shut down after {} frames", self.frame);
    }
}

impl Drop for RhiContext {
    fn drop(&mut self) {
        if self.device.is_current_thread() {
            self.shutdown();
        } else {
            log::warn!("RhiContext dropped off its owning thread, driver objects leak");
        }
    }
}

impl std::fmt::Debug for RhiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhiContext")
            .field("device", &self.device)
            .field("frame", &self.frame)
            .field("textures", &self.textures.len())
            .field("queries", &self.queries.len())
            .field("fences", &self.fences.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(RhiContext: Send);
static_assertions::assert_impl_all!(CommandSender: Send, Sync);
