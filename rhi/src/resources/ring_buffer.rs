//! Rotating buffers for per-frame streaming.
//!
//! A [`RingBufferAllocator`] owns N >= 2 [`GenericBuffer`]s and hands out
//! consecutive aligned ranges of the current one. When a request does not
//! fit, it rotates to the next buffer and locks it with `discard`, so the
//! GPU may still be reading the buffer it just left while the CPU fills the
//! next one. No fences are involved: the ring relies on the rotation period
//! being longer than the GPU latency.
//!
//! Buffers that turn out too small are grown on rotation. The allocator
//! remembers `K` times the largest aligned request it has seen (`K` being
//! [`RhiConfig::ring_growth_factor`](crate::RhiConfig)) and reallocates any
//! buffer it rotates into that is smaller than that.
//!
//! # Example
//!
//! ```ignore
//! let mut ring = RingBufferAllocator::new(ctx.device_mut(), 3, 1 << 20, BufferUsage::VERTEX, "particles")?;
//!
//! let (range, bytes) = ring.lock(ctx.device_mut(), vertices.len() as u64);
//! bytes.copy_from_slice(&vertices);
//! ring.unlock(ctx.device_mut());
//! // bind ring.buffer(range.buffer_index) at range.offset
//! ```

use crate::device::RhiDevice;
use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDescriptor, BufferUsage, LockMode};

use super::GenericBuffer;

/// One in-flight ring allocation.
///
/// Valid until the ring rotates back to `buffer_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamedRange {
    /// Index of the ring buffer holding the range.
    pub buffer_index: usize,
    /// Byte offset into that buffer.
    pub offset: u64,
    /// Requested size in bytes (before alignment).
    pub size: u64,
}

impl StreamedRange {
    /// End offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Rotating set of streaming buffers.
#[derive(Debug)]
pub struct RingBufferAllocator {
    buffers: Vec<GenericBuffer>,
    current: usize,
    cursor: u64,
    alignment: u64,
    growth_factor: u64,
    min_needed_size: u64,
    locked: Option<StreamedRange>,
    last_discard: bool,
    rotations: u64,
}

impl RingBufferAllocator {
    /// Create `count` buffers of `size` bytes each.
    ///
    /// Alignment and growth factor come from the device configuration.
    pub fn new(
        device: &mut RhiDevice,
        count: usize,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> RhiResult<Self> {
        if count < 2 {
            return Err(RhiError::InvalidParameter(format!(
                "ring needs at least 2 buffers, got {count}"
            )));
        }
        if size == 0 {
            return Err(RhiError::InvalidParameter(
                "ring buffer size cannot be zero".to_string(),
            ));
        }

        let alignment = device.config().ring_alignment;
        let growth_factor = device.config().ring_growth_factor;
        let size = align_up(size, alignment);

        let buffers = (0..count)
            .map(|index| {
                let descriptor = BufferDescriptor::new(size, usage | BufferUsage::DYNAMIC)
                    .with_label(format!("{label}_ring{index}"));
                GenericBuffer::new(device, &descriptor)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        Ok(Self {
            buffers,
            current: 0,
            cursor: 0,
            alignment,
            growth_factor,
            min_needed_size: 0,
            locked: None,
            last_discard: false,
            rotations: 0,
        })
    }

    /// Number of buffers in the ring.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Buffer at `index`, for binding a [`StreamedRange`].
    pub fn buffer(&self, index: usize) -> Option<&GenericBuffer> {
        self.buffers.get(index)
    }

    /// Index of the buffer currently being filled.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Write cursor in the current buffer.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Size below which a buffer is grown when rotated into.
    pub fn min_needed_size(&self) -> u64 {
        self.min_needed_size
    }

    /// Number of rotations since creation.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Whether the most recent lock discarded its buffer.
    pub fn last_lock_discarded(&self) -> bool {
        self.last_discard
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Reserve and lock `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if a ring allocation is already locked.
    pub fn lock(&mut self, device: &mut RhiDevice, size: u64) -> (StreamedRange, &mut [u8]) {
        if self.locked.is_some() {
            crate::fatal!("re-entrant lock of ring buffer");
        }

        let aligned = align_up(size.max(1), self.alignment);
        self.min_needed_size = self
            .min_needed_size
            .max(aligned.saturating_mul(self.growth_factor));

        let discard = self.cursor + aligned > self.buffers[self.current].size();
        if discard {
            self.rotate(device, aligned);
        }

        let range = StreamedRange {
            buffer_index: self.current,
            offset: self.cursor,
            size,
        };
        self.cursor += aligned;
        self.locked = Some(range);
        self.last_discard = discard;

        let bytes = self.buffers[self.current].lock(
            device,
            range.offset,
            size,
            LockMode::WriteOnlyUnsynchronized,
            discard,
        );
        (range, bytes)
    }

    /// Finish the outstanding ring lock.
    ///
    /// # Panics
    ///
    /// Panics if nothing is locked.
    pub fn unlock(&mut self, device: &mut RhiDevice) {
        let Some(range) = self.locked.take() else {
            crate::fatal!("unlock of ring buffer that is not locked");
        };
        self.buffers[range.buffer_index].unlock(device);
    }

    fn rotate(&mut self, device: &mut RhiDevice, aligned: u64) {
        self.current = (self.current + 1) % self.buffers.len();
        self.cursor = 0;
        self.rotations += 1;
        device.stats_mut().ring_rotations += 1;

        let buffer = &mut self.buffers[self.current];
        let wanted = self.min_needed_size.max(aligned);
        if buffer.size() < wanted {
            log::debug!(
                "RingBufferAllocator: growing {:?} from {} to {wanted} bytes",
                buffer.label(),
                buffer.size()
            );
            if let Err(err) = buffer.resize(device, wanted) {
                crate::fatal!("failed to grow ring buffer to {wanted} bytes: {err}");
            }
            device.stats_mut().ring_reallocations += 1;
        }
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
