//! GPU fences with completion callbacks.
//!
//! A fence marks a point in the GPU command stream. The context polls the
//! driver for pending fences once per frame; when one completes, its
//! callbacks run on the context thread and its [`FenceSignal`] wakes any
//! thread blocked on it.
//!
//! # Example
//!
//! ```ignore
//! let fence = ctx.insert_fence()?;
//! let signal = ctx.fence_signal(fence).unwrap();
//! ctx.on_fence_signaled(fence, Box::new(|| log::info!("upload finished")));
//!
//! // On a worker thread:
//! signal.wait_timeout(Duration::from_millis(100));
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use slotmap::{SlotMap, new_key_type};

use crate::backend::FenceHandle;
use crate::device::RhiDevice;
use crate::error::RhiResult;
use crate::intrusive::{Link, ListHead, Linked};

new_key_type! {
    /// Key of a fence in a [`FenceRegistry`].
    pub struct FenceKey;
}

/// Work to run once a fence completes.
pub type FenceCallback = Box<dyn FnOnce() + Send>;

/// Thread-safe view of a fence's completion.
///
/// Clones share state. Other threads may check or wait on a signal without
/// touching the driver; it is set by the context thread when the fence is
/// observed as complete.
#[derive(Debug, Clone, Default)]
pub struct FenceSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl FenceSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check if the fence has completed (non-blocking).
    pub fn is_signaled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until the fence completes.
    ///
    /// Only returns if the context keeps polling the fence.
    pub fn wait(&self) {
        let (signaled, condvar) = &*self.inner;
        let mut guard = signaled.lock();
        while !*guard {
            condvar.wait(&mut guard);
        }
    }

    /// Wait with a timeout.
    ///
    /// Returns `true` if the fence completed, `false` if the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (signaled, condvar) = &*self.inner;
        let mut guard = signaled.lock();
        if !*guard {
            condvar.wait_while_for(&mut guard, |done| !*done, timeout);
        }
        *guard
    }

    pub(crate) fn signal(&self) {
        let (signaled, condvar) = &*self.inner;
        *signaled.lock() = true;
        condvar.notify_all();
    }
}

/// One driver fence and the work waiting on it.
pub struct GpuFence {
    handle: FenceHandle,
    signaled: bool,
    callbacks: Vec<FenceCallback>,
    signal: FenceSignal,
    link: Link<FenceKey>,
}

impl GpuFence {
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    /// Number of callbacks waiting for completion.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

impl Linked<FenceKey> for GpuFence {
    fn link(&self) -> &Link<FenceKey> {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link<FenceKey> {
        &mut self.link
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuFence")
            .field("handle", &self.handle)
            .field("signaled", &self.signaled)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// All fences of a context plus the list of those not yet signaled.
#[derive(Debug, Default)]
pub struct FenceRegistry {
    fences: SlotMap<FenceKey, GpuFence>,
    active: ListHead<FenceKey>,
}

impl FenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: FenceKey) -> Option<&GpuFence> {
        self.fences.get(key)
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Number of fences not yet observed as signaled.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Insert a sync point after all work submitted so far.
    pub fn insert(&mut self, device: &mut RhiDevice) -> RhiResult<FenceKey> {
        let handle = device.backend().insert_fence()?;
        let key = self.fences.insert(GpuFence {
            handle,
            signaled: false,
            callbacks: Vec::new(),
            signal: FenceSignal::new(),
            link: Link::default(),
        });
        self.active.push_back(&mut self.fences, key);
        Ok(key)
    }

    /// Check a fence, blocking until it completes with `wait`.
    ///
    /// A stale key reports true: there is nothing left to wait for.
    pub fn is_signaled(&mut self, device: &mut RhiDevice, key: FenceKey, wait: bool) -> bool {
        let Some(fence) = self.fences.get(key) else {
            return true;
        };
        if fence.signaled {
            return true;
        }
        if device.backend().fence_signaled(fence.handle, wait) {
            self.complete(device, key);
            return true;
        }
        false
    }

    /// Run `callback` once the fence completes.
    ///
    /// Runs it right away if the fence already completed. Returns false, and
    /// drops the callback, for a stale key.
    pub fn on_signaled(&mut self, key: FenceKey, callback: FenceCallback) -> bool {
        let Some(fence) = self.fences.get_mut(key) else {
            return false;
        };
        if fence.signaled {
            callback();
        } else {
            fence.callbacks.push(callback);
        }
        true
    }

    /// Poll every pending fence without blocking. Returns the number completed.
    pub fn poll(&mut self, device: &mut RhiDevice) -> usize {
        let mut completed = 0;
        for key in self.active.keys(&self.fences) {
            let Some(fence) = self.fences.get(key) else {
                continue;
            };
            if device.backend().fence_signaled(fence.handle, false) {
                self.complete(device, key);
                completed += 1;
            }
        }
        completed
    }

    /// Shared completion flag for other threads.
    pub fn signal(&self, key: FenceKey) -> Option<FenceSignal> {
        self.fences.get(key).map(|fence| fence.signal.clone())
    }

    /// Release a fence. Callbacks that never ran are dropped.
    pub fn destroy(&mut self, device: &mut RhiDevice, key: FenceKey) -> bool {
        self.active.unlink(&mut self.fences, key);
        let Some(fence) = self.fences.remove(key) else {
            return false;
        };
        if !fence.callbacks.is_empty() {
            log::warn!(
                "fence destroyed before signaling, dropping {} callbacks",
                fence.callbacks.len()
            );
        }
        device.backend().destroy_fence(fence.handle);
        true
    }

    /// Release every fence, at context shutdown.
    pub fn clear(&mut self, device: &mut RhiDevice) {
        for (_, fence) in self.fences.drain() {
            device.backend().destroy_fence(fence.handle);
        }
        self.active = ListHead::new();
    }

    fn complete(&mut self, device: &mut RhiDevice, key: FenceKey) {
        self.active.unlink(&mut self.fences, key);
        let Some(fence) = self.fences.get_mut(key) else {
            return;
        };
        fence.signaled = true;
        fence.signal.signal();
        let callbacks = std::mem::take(&mut fence.callbacks);
        device.stats_mut().fences_signaled += 1;
        for callback in callbacks {
            callback();
        }
    }
}
