//! Dummy GPU backend for testing and development.
//!
//! This backend keeps every buffer and texture in host memory and simulates
//! GPU latency for queries and fences: a result becomes available only after
//! a configurable number of non-blocking polls, while a blocking poll
//! completes immediately. A [`DummyProbe`] shares call counters with tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDescriptor, QueryKind, TextureDescriptor};

use super::{BufferHandle, FenceHandle, GpuBackend, MapAccess, QueryHandle, TextureHandle};

/// Driver call counters recorded by the dummy backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyCounters {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub buffer_maps: u64,
    pub invalidating_maps: u64,
    pub unsynchronized_maps: u64,
    pub orphans: u64,
    pub buffer_writes: u64,
    pub bytes_written: u64,
    /// Uploads larger than the configured maximum write size.
    pub oversized_writes: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub mip_uploads: u64,
    pub mip_readbacks: u64,
    pub queries_ended: u64,
    pub fences_inserted: u64,
}

impl DummyCounters {
    /// Buffers created and not yet destroyed.
    pub fn live_buffers(&self) -> u64 {
        self.buffers_created - self.buffers_destroyed
    }

    /// Textures created and not yet destroyed.
    pub fn live_textures(&self) -> u64 {
        self.textures_created - self.textures_destroyed
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    counters: DummyCounters,
    fail_next_map: bool,
}

/// Shared view into a [`DummyBackend`] that stays usable after the backend
/// has been moved into a context.
#[derive(Debug, Clone, Default)]
pub struct DummyProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl DummyProbe {
    /// Snapshot of the call counters.
    pub fn counters(&self) -> DummyCounters {
        self.state.lock().counters.clone()
    }

    /// Make the next `map_buffer` call return no mapping.
    pub fn fail_next_map(&self) {
        self.state.lock().fail_next_map = true;
    }

    fn record(&self, f: impl FnOnce(&mut DummyCounters)) {
        f(&mut self.state.lock().counters);
    }

    fn take_map_failure(&self) -> bool {
        std::mem::take(&mut self.state.lock().fail_next_map)
    }
}

#[derive(Debug)]
struct DummyQuery {
    kind: QueryKind,
    pending: Option<(u64, u32)>,
    result: Option<u64>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, Vec<Vec<u8>>>,
    queries: HashMap<u64, DummyQuery>,
    fences: HashMap<u64, u32>,
    query_latency: u32,
    fence_latency: u32,
    occlusion_samples: u64,
    max_write_size: Option<u64>,
    clock: u64,
    probe: DummyProbe,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Nanoseconds the simulated GPU clock advances per timestamp.
    pub const TIMESTAMP_STEP: u64 = 1000;

    /// Create a new dummy backend with no simulated latency.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            queries: HashMap::new(),
            fences: HashMap::new(),
            query_latency: 0,
            fence_latency: 0,
            occlusion_samples: 0,
            max_write_size: None,
            clock: 0,
            probe: DummyProbe::default(),
        }
    }

    /// Number of non-blocking polls a query answers "not ready" before its result appears.
    pub fn with_query_latency(mut self, polls: u32) -> Self {
        self.query_latency = polls;
        self
    }

    /// Number of non-blocking polls a fence stays unsignaled.
    pub fn with_fence_latency(mut self, polls: u32) -> Self {
        self.fence_latency = polls;
        self
    }

    /// Sample count reported by occlusion queries.
    pub fn with_occlusion_samples(mut self, samples: u64) -> Self {
        self.occlusion_samples = samples;
        self
    }

    /// Flag uploads larger than `size` in [`DummyCounters::oversized_writes`].
    pub fn with_max_write_size(mut self, size: Option<u64>) -> Self {
        self.max_write_size = size;
        self
    }

    /// Shared probe for counters and failure injection.
    pub fn probe(&self) -> DummyProbe {
        self.probe.clone()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer_range(&mut self, buffer: BufferHandle, offset: u64, len: u64) -> Option<&mut [u8]> {
        let data = self.buffers.get_mut(&buffer.0)?;
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        data.get_mut(start..end)
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> RhiResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let size = usize::try_from(descriptor.size).map_err(|_| RhiError::OutOfMemory)?;
        let id = self.alloc_id();
        self.buffers.insert(id, vec![0; size]);
        self.probe.record(|c| c.buffers_created += 1);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("DummyBackend: destroying buffer {}", buffer.0);
        if self.buffers.remove(&buffer.0).is_some() {
            self.probe.record(|c| c.buffers_destroyed += 1);
        }
    }

    fn orphan_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("DummyBackend: orphaning buffer {}", buffer.0);
        if let Some(data) = self.buffers.get_mut(&buffer.0) {
            data.fill(0);
            self.probe.record(|c| c.orphans += 1);
        }
    }

    fn map_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        access: MapAccess,
    ) -> Option<Vec<u8>> {
        log::trace!(
            "DummyBackend: mapping buffer {} [{offset}..+{size}] {access:?}",
            buffer.0
        );
        if self.probe.take_map_failure() {
            return None;
        }
        let range = self.buffer_range(buffer, offset, size)?;
        let staging = match access {
            MapAccess::WriteInvalidate => vec![0; range.len()],
            MapAccess::Read | MapAccess::Write | MapAccess::WriteUnsynchronized => range.to_vec(),
        };
        self.probe.record(|c| {
            c.buffer_maps += 1;
            match access {
                MapAccess::WriteInvalidate => c.invalidating_maps += 1,
                MapAccess::WriteUnsynchronized => c.unsynchronized_maps += 1,
                MapAccess::Read | MapAccess::Write => {}
            }
        });
        Some(staging)
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8], access: MapAccess) {
        log::trace!("DummyBackend: unmapping buffer {}", buffer.0);
        if !access.writes_back() {
            return;
        }
        if let Some(range) = self.buffer_range(buffer, offset, data.len() as u64) {
            range.copy_from_slice(data);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        log::trace!(
            "DummyBackend: writing {} bytes to buffer {} at {offset}",
            data.len(),
            buffer.0
        );
        let oversized = self
            .max_write_size
            .is_some_and(|limit| data.len() as u64 > limit);
        if let Some(range) = self.buffer_range(buffer, offset, data.len() as u64) {
            range.copy_from_slice(data);
        }
        self.probe.record(|c| {
            c.buffer_writes += 1;
            c.bytes_written += data.len() as u64;
            if oversized {
                c.oversized_writes += 1;
            }
        });
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> RhiResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{}, {} mips)",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            descriptor.mip_level_count
        );
        let mips = (0..descriptor.mip_level_count)
            .map(|mip| usize::try_from(descriptor.mip_byte_size(mip)).map(|len| vec![0; len]))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RhiError::OutOfMemory)?;
        let id = self.alloc_id();
        self.textures.insert(id, mips);
        self.probe.record(|c| c.textures_created += 1);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("DummyBackend: destroying texture {}", texture.0);
        if self.textures.remove(&texture.0).is_some() {
            self.probe.record(|c| c.textures_destroyed += 1);
        }
    }

    fn write_texture_mip(
        &mut self,
        texture: TextureHandle,
        _descriptor: &TextureDescriptor,
        mip: u32,
        data: &[u8],
    ) {
        log::trace!("DummyBackend: uploading mip {mip} of texture {}", texture.0);
        if let Some(level) = self
            .textures
            .get_mut(&texture.0)
            .and_then(|mips| mips.get_mut(mip as usize))
            && level.len() == data.len()
        {
            level.copy_from_slice(data);
            self.probe.record(|c| c.mip_uploads += 1);
        }
    }

    fn read_texture_mip(
        &mut self,
        texture: TextureHandle,
        _descriptor: &TextureDescriptor,
        mip: u32,
    ) -> RhiResult<Vec<u8>> {
        log::trace!("DummyBackend: reading mip {mip} of texture {}", texture.0);
        let level = self
            .textures
            .get(&texture.0)
            .and_then(|mips| mips.get(mip as usize))
            .cloned()
            .ok_or_else(|| RhiError::Internal(format!("texture {} has no mip {mip}", texture.0)))?;
        self.probe.record(|c| c.mip_readbacks += 1);
        Ok(level)
    }

    fn create_query(&mut self, kind: QueryKind) -> RhiResult<QueryHandle> {
        let id = self.alloc_id();
        log::trace!("DummyBackend: creating {kind:?} query {id}");
        self.queries.insert(
            id,
            DummyQuery {
                kind,
                pending: None,
                result: None,
            },
        );
        Ok(QueryHandle(id))
    }

    fn destroy_query(&mut self, query: QueryHandle) {
        log::trace!("DummyBackend: destroying query {}", query.0);
        self.queries.remove(&query.0);
    }

    fn begin_query(&mut self, query: QueryHandle) {
        log::trace!("DummyBackend: begin query {}", query.0);
        if let Some(state) = self.queries.get_mut(&query.0) {
            state.pending = None;
            state.result = None;
        }
    }

    fn end_query(&mut self, query: QueryHandle) {
        log::trace!("DummyBackend: end query {}", query.0);
        let Some(state) = self.queries.get_mut(&query.0) else {
            return;
        };
        let value = match state.kind {
            QueryKind::Occlusion => self.occlusion_samples,
            QueryKind::Timestamp => {
                self.clock += Self::TIMESTAMP_STEP;
                self.clock
            }
        };
        state.pending = Some((value, self.query_latency));
        state.result = None;
        self.probe.record(|c| c.queries_ended += 1);
    }

    fn query_result(&mut self, query: QueryHandle, wait: bool) -> Option<u64> {
        let state = self.queries.get_mut(&query.0)?;
        if let Some(result) = state.result {
            return Some(result);
        }
        let (value, polls_left) = state.pending.as_mut()?;
        if wait || *polls_left == 0 {
            let value = *value;
            state.pending = None;
            state.result = Some(value);
            return Some(value);
        }
        *polls_left -= 1;
        None
    }

    fn insert_fence(&mut self) -> RhiResult<FenceHandle> {
        let id = self.alloc_id();
        log::trace!("DummyBackend: inserting fence {id}");
        self.fences.insert(id, self.fence_latency);
        self.probe.record(|c| c.fences_inserted += 1);
        Ok(FenceHandle(id))
    }

    fn fence_signaled(&mut self, fence: FenceHandle, wait: bool) -> bool {
        let Some(polls_left) = self.fences.get_mut(&fence.0) else {
            return true;
        };
        if wait || *polls_left == 0 {
            *polls_left = 0;
            return true;
        }
        *polls_left -= 1;
        false
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        log::trace!("DummyBackend: destroying fence {}", fence.0);
        self.fences.remove(&fence.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    #[test]
    fn test_buffer_map_write_back() {
        let mut backend = DummyBackend::new();
        let probe = backend.probe();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();

        let mut staging = backend.map_buffer(buffer, 4, 4, MapAccess::Write).unwrap();
        staging.copy_from_slice(&[1, 2, 3, 4]);
        backend.unmap_buffer(buffer, 4, &staging, MapAccess::Write);

        let read = backend.map_buffer(buffer, 0, 8, MapAccess::Read).unwrap();
        assert_eq!(read, vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(probe.counters().buffer_maps, 2);
    }

    #[test]
    fn test_map_out_of_range_fails() {
        let mut backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        assert!(backend.map_buffer(buffer, 12, 8, MapAccess::Read).is_none());
    }

    #[test]
    fn test_injected_map_failure() {
        let mut backend = DummyBackend::new();
        let probe = backend.probe();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();

        probe.fail_next_map();
        assert!(backend.map_buffer(buffer, 0, 16, MapAccess::Read).is_none());
        assert!(backend.map_buffer(buffer, 0, 16, MapAccess::Read).is_some());
    }

    #[test]
    fn test_query_latency() {
        let mut backend = DummyBackend::new()
            .with_query_latency(2)
            .with_occlusion_samples(77);
        let query = backend.create_query(QueryKind::Occlusion).unwrap();

        assert_eq!(backend.query_result(query, false), None);
        backend.begin_query(query);
        backend.end_query(query);
        assert_eq!(backend.query_result(query, false), None);
        assert_eq!(backend.query_result(query, false), None);
        assert_eq!(backend.query_result(query, false), Some(77));
        assert_eq!(backend.query_result(query, false), Some(77));
    }

    #[test]
    fn test_blocking_query_and_timestamps() {
        let mut backend = DummyBackend::new().with_query_latency(10);
        let first = backend.create_query(QueryKind::Timestamp).unwrap();
        let second = backend.create_query(QueryKind::Timestamp).unwrap();

        backend.end_query(first);
        backend.end_query(second);

        let a = backend.query_result(first, true).unwrap();
        let b = backend.query_result(second, true).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_fence_latency() {
        let mut backend = DummyBackend::new().with_fence_latency(1);
        let fence = backend.insert_fence().unwrap();
        assert!(!backend.fence_signaled(fence, false));
        assert!(backend.fence_signaled(fence, false));

        let fence = backend.insert_fence().unwrap();
        assert!(backend.fence_signaled(fence, true));
    }

    #[test]
    fn test_texture_mip_storage() {
        let mut backend = DummyBackend::new();
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            crate::types::TextureFormat::R8Unorm,
            crate::types::TextureUsage::TEXTURE_BINDING,
        )
        .with_mip_levels(2);
        let texture = backend.create_texture(&desc).unwrap();

        backend.write_texture_mip(texture, &desc, 1, &[9, 8, 7, 6]);
        assert_eq!(
            backend.read_texture_mip(texture, &desc, 1).unwrap(),
            vec![9, 8, 7, 6]
        );
        assert_eq!(backend.read_texture_mip(texture, &desc, 0).unwrap().len(), 16);
        assert!(backend.read_texture_mip(texture, &desc, 2).is_err());
    }
}
