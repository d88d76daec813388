//! Driver access with thread ownership checks.
//!
//! [`RhiDevice`] wraps the active [`GpuBackend`] together with the identity
//! of the thread that owns the rendering context. Every driver call is
//! funnelled through [`RhiDevice::backend`], which verifies the caller is
//! that thread.
//!
//! Buffers are caller-owned and can be dropped anywhere, so their driver
//! handles are not destroyed on drop. They are sent to a release queue and
//! destroyed on the owning thread at the next [`RhiDevice::flush_releases`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, ThreadId};

use crate::backend::{BufferHandle, GpuBackend};
use crate::config::RhiConfig;
use crate::error::RhiResult;
use crate::stats::RhiStats;

/// A driver object whose wrapper was dropped and that awaits destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleasedResource {
    Buffer(BufferHandle),
}

/// Sending side of the release queue, held by caller-owned wrappers.
#[derive(Debug, Clone)]
pub(crate) struct ReleaseQueue {
    sender: Sender<ReleasedResource>,
}

impl ReleaseQueue {
    pub(crate) fn release(&self, resource: ReleasedResource) {
        if self.sender.send(resource).is_err() {
            log::debug!("device already gone, dropping release of {resource:?}");
        }
    }
}

/// The driver together with the thread allowed to call it.
pub struct RhiDevice {
    backend: Box<dyn GpuBackend>,
    owner: ThreadId,
    config: RhiConfig,
    stats: RhiStats,
    release_tx: Sender<ReleasedResource>,
    release_rx: Receiver<ReleasedResource>,
}

impl RhiDevice {
    /// Wrap a backend. The calling thread becomes the owner.
    pub fn new(backend: Box<dyn GpuBackend>, config: RhiConfig) -> RhiResult<Self> {
        config.validate()?;
        let (release_tx, release_rx) = mpsc::channel();
        log::info!("RhiDevice: using {}", backend.name());
        Ok(Self {
            backend,
            owner: thread::current().id(),
            config,
            stats: RhiStats::default(),
            release_tx,
            release_rx,
        })
    }

    /// Driver access for the owning thread.
    ///
    /// # Panics
    ///
    /// Panics when called from any other thread.
    pub fn backend(&mut self) -> &mut dyn GpuBackend {
        self.verify_context_scope();
        self.backend.as_mut()
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    pub fn stats(&self) -> &RhiStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut RhiStats {
        &mut self.stats
    }

    /// Thread that is allowed to call the driver.
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Returns true if the calling thread owns the device.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Abort if the calling thread does not own the device.
    pub fn verify_context_scope(&self) {
        if !self.is_current_thread() {
            crate::fatal!(
                "driver call from thread {:?}, but the context is owned by {:?}",
                thread::current().id(),
                self.owner
            );
        }
    }

    /// Make the calling thread the owner, after the context has been moved.
    pub fn bind_to_current_thread(&mut self) {
        let current = thread::current().id();
        if current != self.owner {
            log::debug!("RhiDevice: ownership moved from {:?} to {current:?}", self.owner);
            self.owner = current;
        }
    }

    pub(crate) fn release_queue(&self) -> ReleaseQueue {
        ReleaseQueue {
            sender: self.release_tx.clone(),
        }
    }

    /// Destroy every driver object queued by dropped wrappers.
    pub fn flush_releases(&mut self) -> usize {
        let mut released = 0;
        while let Ok(resource) = self.release_rx.try_recv() {
            match resource {
                ReleasedResource::Buffer(handle) => self.backend().destroy_buffer(handle),
            }
            released += 1;
        }
        self.stats.deferred_releases += released as u64;
        released
    }
}

impl std::fmt::Debug for RhiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhiDevice")
            .field("backend", &self.backend.name())
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish()
    }
}
