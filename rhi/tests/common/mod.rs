//! Common utilities for RHI integration tests.
//!
//! Tests are parameterized over [`Backend`]; backends that are not compiled
//! in or cannot create a device are skipped.

use redlilium_rhi::{
    BufferDescriptor, BufferUsage, GenericBuffer, RhiConfig, RhiContext, TextureDescriptor,
    TextureFormat, TextureUsage,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// In-memory backend (no actual GPU operations).
    Dummy,
    /// WebGPU backend (via wgpu).
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => true,
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => false,
        }
    }

    fn create_context(self, config: RhiConfig) -> Option<RhiContext> {
        match self {
            Backend::Dummy => RhiContext::with_dummy(config).ok(),
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => RhiContext::new_wgpu(config).ok(),
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => None,
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning an [`RhiContext`] on the test thread.
pub struct TestContext {
    /// The backend being tested.
    #[allow(dead_code)]
    pub backend: Backend,
    pub ctx: RhiContext,
}

impl TestContext {
    /// Create a context with default settings.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(backend, RhiConfig::default())
    }

    /// Create a context with custom settings.
    pub fn with_config(backend: Backend, config: RhiConfig) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !backend.is_available() {
            return None;
        }
        let ctx = backend.create_context(config)?;
        Some(Self { backend, ctx })
    }

    /// Create a buffer with the given size and usage flags.
    #[allow(dead_code)]
    pub fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> GenericBuffer {
        self.ctx
            .create_buffer(&BufferDescriptor::new(size, usage))
            .expect("Failed to create buffer")
    }
}

// ============================================================================
// Data Helpers
// ============================================================================

/// Generate a recognizable byte pattern.
#[allow(dead_code)]
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Descriptor of a sampled, streamable RGBA8 texture.
#[allow(dead_code)]
pub fn streamed_texture(size: u32, mips: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        size,
        size,
        TextureFormat::Rgba8Unorm,
        TextureUsage::TEXTURE_BINDING | TextureUsage::STREAMABLE | TextureUsage::COPY_DST,
    )
    .with_mip_levels(mips)
    .with_label("streamed")
}
