//! wgpu GPU backend.
//!
//! Maps the driver binding surface onto wgpu. wgpu has no persistent
//! mappings of device-local memory, so a buffer "map" is a readback into a
//! staging vector and the matching unmap is a queue write. Orphaning
//! replaces the wgpu buffer; wgpu keeps the old one alive until the GPU is
//! done with it.
//!
//! Occlusion and timestamp queries are not supported: creating one fails
//! with [`RhiError::FeatureNotSupported`].

use std::collections::HashMap;

use crate::error::{RhiError, RhiResult};
use crate::resources::align_up;
use crate::types::{
    BufferDescriptor, BufferUsage, QueryKind, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsage,
};

use super::{BufferHandle, FenceHandle, GpuBackend, MapAccess, QueryHandle, TextureHandle};

/// Row pitch alignment wgpu requires for texture-to-buffer copies.
const COPY_ROW_ALIGNMENT: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;
/// Offset and size alignment of buffer copies and queue writes.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

struct WgpuBufferEntry {
    buffer: wgpu::Buffer,
    descriptor: wgpu::BufferDescriptor<'static>,
    label: Option<String>,
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,
    buffers: HashMap<u64, WgpuBufferEntry>,
    textures: HashMap<u64, wgpu::Texture>,
    fences: HashMap<u64, wgpu::SubmissionIndex>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .finish()
    }
}

impl WgpuBackend {
    /// Create a backend on the first high-performance adapter.
    pub fn new() -> RhiResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RhiError::InitializationFailed(format!("No compatible GPU adapter: {e}")))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("RedLilium RHI Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| RhiError::InitializationFailed(format!("Device creation failed: {e}")))?;

        Ok(Self {
            adapter,
            device,
            queue,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            fences: HashMap::new(),
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn wait_for(&self, submission: wgpu::SubmissionIndex) {
        if let Err(err) = self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        }) {
            log::warn!("wgpu poll failed: {err}");
        }
    }

    /// Copy `size` bytes starting at `offset` of a GPU buffer into CPU memory.
    fn read_buffer_range(&self, source: &wgpu::Buffer, offset: u64, size: u64) -> Option<Vec<u8>> {
        let start = offset & !(COPY_ALIGNMENT - 1);
        let end = align_up(offset + size, COPY_ALIGNMENT).min(source.size());
        if start >= end {
            return Some(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("RHI Readback Staging"),
            size: end - start,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("RHI Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, start, &staging, 0, end - start);
        let submission = self.queue.submit(std::iter::once(encoder.finish()));
        self.wait_for(submission);

        let bytes = self.map_staging(&staging)?;
        let skip = (offset - start) as usize;
        Some(bytes[skip..skip + size as usize].to_vec())
    }

    fn map_staging(&self, staging: &wgpu::Buffer) -> Option<Vec<u8>> {
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!("wgpu staging map failed: {err}");
                return None;
            }
            Err(_) => return None,
        }
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Some(data)
    }

    /// Queue a write, widening unaligned ranges with the current contents.
    fn write_range(&self, target: &wgpu::Buffer, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let size = data.len() as u64;
        if offset % COPY_ALIGNMENT == 0 && size % COPY_ALIGNMENT == 0 {
            self.queue.write_buffer(target, offset, data);
            return;
        }

        let start = offset & !(COPY_ALIGNMENT - 1);
        let end = align_up(offset + size, COPY_ALIGNMENT).min(target.size());
        let Some(mut span) = self.read_buffer_range(target, start, end - start) else {
            log::warn!("unaligned buffer write dropped: readback failed");
            return;
        };
        let skip = (offset - start) as usize;
        span[skip..skip + data.len()].copy_from_slice(data);
        self.queue.write_buffer(target, start, &span);
    }
}

fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    if usage.contains(BufferUsage::VERTEX) {
        result |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= wgpu::BufferUsages::INDIRECT;
    }
    result
}

fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    // Eviction and restore copy in both directions.
    let mut result = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    result
}

fn convert_texture_dimension(dimension: TextureDimension) -> wgpu::TextureDimension {
    match dimension {
        TextureDimension::D1 => wgpu::TextureDimension::D1,
        TextureDimension::D2 | TextureDimension::D2Array => wgpu::TextureDimension::D2,
        TextureDimension::D3 => wgpu::TextureDimension::D3,
    }
}

fn mip_copy_extent(descriptor: &TextureDescriptor, mip: u32) -> wgpu::Extent3d {
    let extent = descriptor.mip_extent(mip);
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: extent.depth,
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> RhiResult<BufferHandle> {
        let wgpu_descriptor = wgpu::BufferDescriptor {
            label: None,
            size: align_up(descriptor.size, COPY_ALIGNMENT),
            usage: convert_buffer_usage(descriptor.usage),
            mapped_at_creation: false,
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            ..wgpu_descriptor.clone()
        });
        let id = self.alloc_id();
        self.buffers.insert(
            id,
            WgpuBufferEntry {
                buffer,
                descriptor: wgpu_descriptor,
                label: descriptor.label.clone(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer.0) {
            entry.buffer.destroy();
        }
    }

    fn orphan_buffer(&mut self, buffer: BufferHandle) {
        let Some(entry) = self.buffers.get_mut(&buffer.0) else {
            return;
        };
        entry.buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: entry.label.as_deref(),
            ..entry.descriptor.clone()
        });
    }

    fn map_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        access: MapAccess,
    ) -> Option<Vec<u8>> {
        let entry = self.buffers.get(&buffer.0)?;
        if offset.checked_add(size)? > entry.buffer.size() {
            return None;
        }
        match access {
            MapAccess::WriteInvalidate => Some(vec![0; size as usize]),
            MapAccess::Read | MapAccess::Write | MapAccess::WriteUnsynchronized => {
                self.read_buffer_range(&entry.buffer, offset, size)
            }
        }
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8], access: MapAccess) {
        if !access.writes_back() {
            return;
        }
        if let Some(entry) = self.buffers.get(&buffer.0) {
            self.write_range(&entry.buffer, offset, data);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(entry) = self.buffers.get(&buffer.0) {
            self.write_range(&entry.buffer, offset, data);
        }
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> RhiResult<TextureHandle> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers: descriptor.size.depth,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: descriptor.sample_count,
            dimension: convert_texture_dimension(descriptor.dimension),
            format: convert_texture_format(descriptor.format),
            usage: convert_texture_usage(descriptor.usage),
            view_formats: &[],
        });
        let id = self.alloc_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(&texture.0) {
            texture.destroy();
        }
    }

    fn write_texture_mip(
        &mut self,
        texture: TextureHandle,
        descriptor: &TextureDescriptor,
        mip: u32,
        data: &[u8],
    ) {
        let Some(target) = self.textures.get(&texture.0) else {
            return;
        };
        let extent = mip_copy_extent(descriptor, mip);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: target,
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(extent.width * descriptor.format.block_size()),
                rows_per_image: Some(extent.height),
            },
            extent,
        );
    }

    fn read_texture_mip(
        &mut self,
        texture: TextureHandle,
        descriptor: &TextureDescriptor,
        mip: u32,
    ) -> RhiResult<Vec<u8>> {
        let source = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| RhiError::Internal(format!("unknown texture {}", texture.0)))?;
        let extent = mip_copy_extent(descriptor, mip);
        let row_bytes = extent.width as u64 * descriptor.format.block_size() as u64;
        let padded_row = align_up(row_bytes, COPY_ROW_ALIGNMENT);
        let rows = extent.height as u64 * extent.depth_or_array_layers as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("RHI Texture Readback"),
            size: padded_row * rows,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("RHI Texture Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(extent.height),
                },
            },
            extent,
        );
        let submission = self.queue.submit(std::iter::once(encoder.finish()));
        self.wait_for(submission);

        let padded = self
            .map_staging(&staging)
            .ok_or_else(|| RhiError::Internal("texture readback map failed".to_string()))?;
        let mut data = Vec::with_capacity((row_bytes * rows) as usize);
        for row in padded.chunks_exact(padded_row as usize) {
            data.extend_from_slice(&row[..row_bytes as usize]);
        }
        Ok(data)
    }

    fn create_query(&mut self, kind: QueryKind) -> RhiResult<QueryHandle> {
        Err(RhiError::FeatureNotSupported(format!(
            "{kind:?} queries on the wgpu backend"
        )))
    }

    fn destroy_query(&mut self, _query: QueryHandle) {}

    fn begin_query(&mut self, _query: QueryHandle) {}

    fn end_query(&mut self, _query: QueryHandle) {}

    fn query_result(&mut self, _query: QueryHandle, _wait: bool) -> Option<u64> {
        None
    }

    fn insert_fence(&mut self) -> RhiResult<FenceHandle> {
        let submission = self.queue.submit(std::iter::empty());
        let id = self.alloc_id();
        self.fences.insert(id, submission);
        Ok(FenceHandle(id))
    }

    fn fence_signaled(&mut self, fence: FenceHandle, wait: bool) -> bool {
        let Some(submission) = self.fences.get(&fence.0) else {
            return true;
        };
        if wait {
            self.wait_for(submission.clone());
            return true;
        }
        match self.device.poll(wgpu::PollType::Poll) {
            Ok(status) => status.is_queue_empty(),
            Err(err) => {
                log::warn!("wgpu poll failed: {err}");
                false
            }
        }
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(&fence.0);
    }
}
