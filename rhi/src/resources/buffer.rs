//! CPU-writable GPU buffers.
//!
//! A [`GenericBuffer`] owns one driver buffer and serves CPU access to it
//! through [`lock`](GenericBuffer::lock) / [`unlock`](GenericBuffer::unlock).
//! Each lock picks one of two strategies:
//!
//! - **Direct map**: the driver maps the range. Used for reads, and for
//!   writes when [`RhiConfig::prefer_buffer_map`](crate::RhiConfig) is set.
//! - **Shadow copy**: the caller writes into CPU scratch memory, which is
//!   uploaded on unlock, split into chunks of at most
//!   [`RhiConfig::max_upload_chunk`](crate::RhiConfig) bytes.
//!
//! Only one lock may be outstanding per buffer. Misuse (re-entrant locks,
//! out-of-range locks, unlocking an unlocked buffer) is a contract violation.
//!
//! # Example
//!
//! ```ignore
//! let mut buffer = GenericBuffer::new(ctx.device_mut(), &descriptor)?;
//! let bytes = buffer.lock(ctx.device_mut(), 0, 256, LockMode::WriteOnly, true);
//! bytes.copy_from_slice(&vertices);
//! buffer.unlock(ctx.device_mut());
//! ```

use crate::backend::{BufferHandle, MapAccess};
use crate::device::{ReleaseQueue, ReleasedResource, RhiDevice};
use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDescriptor, BufferUsage, LockMode};

/// Strategy serving a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockPath {
    /// The driver mapped the range.
    DirectMap,
    /// CPU scratch memory, uploaded on unlock.
    ShadowCopy,
}

#[derive(Debug)]
struct ActiveLock {
    path: LockPath,
    offset: u64,
    discard_all: bool,
    access: MapAccess,
    data: Vec<u8>,
}

/// A driver buffer with lockable CPU access.
#[derive(Debug)]
pub struct GenericBuffer {
    descriptor: BufferDescriptor,
    handle: Option<BufferHandle>,
    lock: Option<ActiveLock>,
    scratch: Option<Vec<u8>>,
    release: ReleaseQueue,
}

impl GenericBuffer {
    /// Create a buffer with undefined contents.
    pub fn new(device: &mut RhiDevice, descriptor: &BufferDescriptor) -> RhiResult<Self> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }
        let handle = device.backend().create_buffer(descriptor)?;
        log::debug!(
            "GenericBuffer: created {:?} ({} bytes, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );
        Ok(Self {
            descriptor: descriptor.clone(),
            handle: Some(handle),
            lock: None,
            scratch: None,
            release: device.release_queue(),
        })
    }

    /// Create a buffer and upload initial contents.
    pub fn with_data(
        device: &mut RhiDevice,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> RhiResult<Self> {
        if data.len() as u64 > descriptor.size {
            return Err(RhiError::InvalidParameter(format!(
                "{} bytes of initial data exceed buffer size {}",
                data.len(),
                descriptor.size
            )));
        }
        let mut buffer = Self::new(device, descriptor)?;
        buffer.update(device, data, 0, false);
        Ok(buffer)
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Driver handle, if the buffer still owns one.
    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Strategy of the outstanding lock.
    pub fn lock_path(&self) -> Option<LockPath> {
        self.lock.as_ref().map(|lock| lock.path)
    }

    /// Returns true if a scratch allocation is cached for the next shadow lock.
    pub fn has_cached_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Lock `size` bytes at `offset` for CPU access.
    ///
    /// With `discard` the previous contents of the range are not preserved;
    /// when the lock also covers the whole buffer, the backing store is
    /// orphaned so the GPU can keep reading the old one.
    ///
    /// # Panics
    ///
    /// Panics on a re-entrant lock, an out-of-range lock, a buffer without a
    /// driver handle, or when the driver cannot map the range.
    pub fn lock(
        &mut self,
        device: &mut RhiDevice,
        offset: u64,
        size: u64,
        mode: LockMode,
        discard: bool,
    ) -> &mut [u8] {
        let Some(handle) = self.handle else {
            crate::fatal!("lock of buffer {:?} that owns no driver buffer", self.label());
        };
        if self.lock.is_some() {
            crate::fatal!("re-entrant lock of buffer {:?}", self.label());
        }
        if offset.checked_add(size).is_none_or(|end| end > self.descriptor.size) {
            crate::fatal!(
                "lock of {size} bytes at {offset} exceeds buffer {:?} of {} bytes",
                self.label(),
                self.descriptor.size
            );
        }
        let Ok(len) = usize::try_from(size) else {
            crate::fatal!("lock of {size} bytes does not fit in host memory");
        };

        let discard = discard && mode.is_write();
        let discard_all = discard && offset == 0 && size == self.descriptor.size;
        let path = if mode == LockMode::ReadOnly || device.config().prefer_buffer_map {
            LockPath::DirectMap
        } else {
            LockPath::ShadowCopy
        };
        let access = match mode {
            LockMode::ReadOnly => MapAccess::Read,
            LockMode::WriteOnly if discard => MapAccess::WriteInvalidate,
            LockMode::WriteOnly => MapAccess::Write,
            LockMode::WriteOnlyUnsynchronized => MapAccess::WriteUnsynchronized,
        };

        let data = match path {
            LockPath::DirectMap => {
                if discard_all {
                    device.backend().orphan_buffer(handle);
                    device.stats_mut().orphaned_buffers += 1;
                }
                let Some(mapped) = device.backend().map_buffer(handle, offset, size, access)
                else {
                    crate::fatal!(
                        "driver returned no mapping for {size} bytes at {offset} of buffer {:?}",
                        self.label()
                    );
                };
                device.stats_mut().direct_map_locks += 1;
                mapped
            }
            LockPath::ShadowCopy => {
                let stats = device.stats_mut();
                stats.shadow_locks += 1;
                match self.scratch.take() {
                    Some(mut cached) if cached.capacity() >= len => {
                        stats.scratch_reuses += 1;
                        cached.clear();
                        cached.resize(len, 0);
                        cached
                    }
                    _ => vec![0; len],
                }
            }
        };
        device.stats_mut().buffer_locks += 1;

        let lock = self.lock.insert(ActiveLock {
            path,
            offset,
            discard_all,
            access,
            data,
        });
        &mut lock.data
    }

    /// Finish the outstanding lock.
    ///
    /// Direct-map locks are unmapped. Shadow-copy locks upload their bytes;
    /// the scratch memory is then cached for [`BufferUsage::VOLATILE`]
    /// buffers and freed otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not locked.
    pub fn unlock(&mut self, device: &mut RhiDevice) {
        let Some(lock) = self.lock.take() else {
            crate::fatal!("unlock of buffer {:?} that is not locked", self.label());
        };
        let Some(handle) = self.handle else {
            crate::fatal!("unlock of buffer {:?} that owns no driver buffer", self.label());
        };

        match lock.path {
            LockPath::DirectMap => {
                device
                    .backend()
                    .unmap_buffer(handle, lock.offset, &lock.data, lock.access);
            }
            LockPath::ShadowCopy => {
                if lock.discard_all {
                    device.backend().orphan_buffer(handle);
                    device.stats_mut().orphaned_buffers += 1;
                }
                upload_chunked(device, handle, lock.offset, &lock.data);
                if self.descriptor.usage.contains(BufferUsage::VOLATILE) {
                    self.scratch = Some(lock.data);
                }
            }
        }
    }

    /// Write bytes at `offset` without locking.
    ///
    /// # Panics
    ///
    /// Panics if a lock is outstanding or the write is out of range.
    pub fn update(&mut self, device: &mut RhiDevice, data: &[u8], offset: u64, discard: bool) {
        let Some(handle) = self.handle else {
            crate::fatal!("update of buffer {:?} that owns no driver buffer", self.label());
        };
        if self.lock.is_some() {
            crate::fatal!("update of buffer {:?} while it is locked", self.label());
        }
        let size = data.len() as u64;
        if offset.checked_add(size).is_none_or(|end| end > self.descriptor.size) {
            crate::fatal!(
                "update of {size} bytes at {offset} exceeds buffer {:?} of {} bytes",
                self.label(),
                self.descriptor.size
            );
        }
        if discard && offset == 0 && size == self.descriptor.size {
            device.backend().orphan_buffer(handle);
            device.stats_mut().orphaned_buffers += 1;
        }
        upload_chunked(device, handle, offset, data);
    }

    /// Write a slice of plain values at `offset`.
    pub fn update_pod<T: bytemuck::Pod>(
        &mut self,
        device: &mut RhiDevice,
        values: &[T],
        offset: u64,
        discard: bool,
    ) {
        self.update(device, bytemuck::cast_slice(values), offset, discard);
    }

    /// Adopt the driver buffer, descriptor and scratch cache of `donor`.
    ///
    /// The buffer's own driver buffer is released first. The donor is left
    /// without a handle.
    ///
    /// # Panics
    ///
    /// Panics if either buffer is locked.
    pub fn take_ownership(&mut self, device: &mut RhiDevice, donor: &mut GenericBuffer) {
        if donor.lock.is_some() {
            crate::fatal!("ownership taken from locked buffer {:?}", donor.label());
        }
        self.release_ownership(device);

        self.handle = donor.handle.take();
        self.descriptor = donor.descriptor.clone();
        self.scratch = donor.scratch.take();
    }

    /// Release the driver buffer and leave this wrapper empty.
    ///
    /// An outstanding direct-map lock is unmapped first.
    ///
    /// # Panics
    ///
    /// Panics if a shadow-copy lock is outstanding, since its bytes would be lost.
    pub fn release_ownership(&mut self, device: &mut RhiDevice) {
        if let Some(lock) = self.lock.as_ref() {
            if lock.path == LockPath::ShadowCopy {
                crate::fatal!(
                    "ownership of buffer {:?} released with an outstanding shadow-copy lock",
                    self.label()
                );
            }
            self.unlock(device);
        }
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_buffer(handle);
        }
        self.scratch = None;
    }

    /// Reallocate the buffer at `size` bytes. Contents are not preserved.
    pub fn resize(&mut self, device: &mut RhiDevice, size: u64) -> RhiResult<()> {
        let descriptor = self.descriptor.clone().with_size(size);
        let mut fresh = GenericBuffer::new(device, &descriptor)?;
        self.take_ownership(device, &mut fresh);
        Ok(())
    }
}

impl Drop for GenericBuffer {
    fn drop(&mut self) {
        if let Some(lock) = &self.lock
            && lock.path == LockPath::ShadowCopy
        {
            log::warn!(
                "buffer {:?} dropped while locked, {} pending bytes are lost",
                self.label(),
                lock.data.len()
            );
        }
        if let Some(handle) = self.handle.take() {
            self.release.release(ReleasedResource::Buffer(handle));
        }
    }
}

/// Upload `data` at `offset`, split by the configured chunk size.
fn upload_chunked(device: &mut RhiDevice, handle: BufferHandle, offset: u64, data: &[u8]) {
    let chunk = device
        .config()
        .max_upload_chunk
        .and_then(|chunk| usize::try_from(chunk).ok())
        .unwrap_or(usize::MAX)
        .max(1);

    let mut chunk_offset = offset;
    for piece in data.chunks(chunk) {
        device.backend().write_buffer(handle, chunk_offset, piece);
        device.stats_mut().upload_chunks += 1;
        chunk_offset += piece.len() as u64;
    }
}
