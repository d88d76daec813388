//! Textures with lazy creation, eviction and restore.
//!
//! Every texture is in one of three residency states:
//!
//! ```text
//!            first access / realize
//!  Uncreated ──────────────────────► Live ◄──────┐
//!                                     │          │ access / restore
//!                        try_evict /  │          │
//!                        tick         ▼          │
//!                                  Evicted ──────┘
//! ```
//!
//! Evictable textures carry an [`EvictionRecord`] holding CPU copies of
//! their mips. Eviction reads back any mip not already cached and releases
//! the driver object; restore recreates it and uploads the cached mips
//! again. The texture's key, descriptor and views survive both.
//!
//! A texture is evictable when eviction is enabled and its descriptor is an
//! eviction candidate (see [`TextureDescriptor::is_eviction_candidate`]). It
//! stops being evictable when it is aliased, or when the LRU list has no
//! room for it.

use slotmap::{SlotMap, new_key_type};

use crate::backend::TextureHandle;
use crate::device::RhiDevice;
use crate::error::{RhiError, RhiResult};
use crate::eviction::EvictionManager;
use crate::intrusive::ListHead;
use crate::types::TextureDescriptor;

use super::view::{TextureView, ViewKey, ViewKind, ViewRegistry};

new_key_type! {
    /// Key of a texture in a [`TextureRegistry`].
    pub struct TextureKey;
}

/// Residency of a texture's driver object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidencyState {
    /// No driver object has been created yet.
    Uncreated,
    /// The driver object exists.
    Live,
    /// The driver object was released; the contents live in CPU memory.
    Evicted,
}

/// CPU-side state of an evictable texture.
#[derive(Debug, Clone)]
pub struct EvictionRecord {
    mips: Vec<Option<Vec<u8>>>,
    restored: bool,
    in_lru: bool,
    last_used_frame: u64,
    label: String,
}

impl EvictionRecord {
    fn new(mip_count: u32, label: String, frame: u64) -> Self {
        Self {
            mips: vec![None; mip_count as usize],
            restored: false,
            in_lru: false,
            last_used_frame: frame,
            label,
        }
    }

    /// Returns true if the CPU copy of `mip` is present.
    pub fn is_mip_cached(&self, mip: u32) -> bool {
        self.mips.get(mip as usize).is_some_and(Option::is_some)
    }

    /// Number of mips with a CPU copy.
    pub fn cached_mip_count(&self) -> usize {
        self.mips.iter().filter(|mip| mip.is_some()).count()
    }

    /// Bytes of CPU copies held.
    pub fn cached_bytes(&self) -> u64 {
        self.mips.iter().flatten().map(|mip| mip.len() as u64).sum()
    }

    /// True after a restore, until the next eviction.
    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn in_lru(&self) -> bool {
        self.in_lru
    }

    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Drop CPU copies, keeping the `keep` smallest mips. `None` keeps everything.
    fn release_mips(&mut self, keep: Option<u32>) {
        let Some(keep) = keep else {
            return;
        };
        let first_kept = self.mips.len().saturating_sub(keep as usize);
        for mip in &mut self.mips[..first_kept] {
            *mip = None;
        }
    }
}

/// A texture and its residency bookkeeping.
#[derive(Debug)]
pub struct TextureResource {
    descriptor: TextureDescriptor,
    state: ResidencyState,
    handle: Option<TextureHandle>,
    eviction: Option<EvictionRecord>,
    pending_upload: Vec<Option<Vec<u8>>>,
    views: ListHead<ViewKey>,
    alias_of: Option<TextureKey>,
    alias_count: u32,
}

impl TextureResource {
    fn new(descriptor: TextureDescriptor) -> Self {
        Self {
            descriptor,
            state: ResidencyState::Uncreated,
            handle: None,
            eviction: None,
            pending_upload: Vec::new(),
            views: ListHead::new(),
            alias_of: None,
            alias_count: 0,
        }
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ResidencyState {
        self.state
    }

    /// Driver handle without restoring; `None` unless live.
    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn is_evictable(&self) -> bool {
        self.eviction.is_some()
    }

    pub fn eviction_record(&self) -> Option<&EvictionRecord> {
        self.eviction.as_ref()
    }

    /// Texture whose driver object this alias shares.
    pub fn alias_of(&self) -> Option<TextureKey> {
        self.alias_of
    }

    pub fn is_alias(&self) -> bool {
        self.alias_of.is_some()
    }

    /// Number of aliases sharing this texture's driver object.
    pub fn alias_count(&self) -> u32 {
        self.alias_count
    }

    /// Number of views attached to the texture.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Driver memory of the full mip chain.
    pub fn memory_size(&self) -> u64 {
        self.descriptor.memory_size()
    }

    fn label(&self) -> &str {
        self.descriptor.label.as_deref().unwrap_or("unnamed")
    }
}

/// All textures and views of a context, plus the eviction LRU.
#[derive(Debug)]
pub struct TextureRegistry {
    textures: SlotMap<TextureKey, TextureResource>,
    views: ViewRegistry,
    eviction: EvictionManager,
}

impl TextureRegistry {
    pub fn new(lru_capacity: usize) -> Self {
        Self {
            textures: SlotMap::with_key(),
            views: ViewRegistry::new(),
            eviction: EvictionManager::new(lru_capacity),
        }
    }

    pub fn get(&self, key: TextureKey) -> Option<&TextureResource> {
        self.textures.get(key)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    pub fn eviction(&self) -> &EvictionManager {
        &self.eviction
    }

    /// CPU bytes held by all eviction records.
    pub fn cached_mip_bytes(&self) -> u64 {
        self.textures
            .values()
            .filter_map(|texture| texture.eviction.as_ref())
            .map(EvictionRecord::cached_bytes)
            .sum()
    }

    /// Register a texture with optional initial contents, one slice per mip.
    ///
    /// With deferred creation the driver is not touched; otherwise the
    /// texture is created and uploaded right away.
    pub fn create(
        &mut self,
        device: &mut RhiDevice,
        descriptor: &TextureDescriptor,
        initial_mips: &[&[u8]],
        frame: u64,
    ) -> RhiResult<TextureKey> {
        descriptor.validate().map_err(RhiError::InvalidParameter)?;
        if initial_mips.len() > descriptor.mip_level_count as usize {
            return Err(RhiError::InvalidParameter(format!(
                "{} initial mips for a texture with {} levels",
                initial_mips.len(),
                descriptor.mip_level_count
            )));
        }
        for (mip, data) in initial_mips.iter().enumerate() {
            let expected = descriptor.mip_byte_size(mip as u32);
            if data.len() as u64 != expected {
                return Err(RhiError::InvalidParameter(format!(
                    "mip {mip} has {} bytes, expected {expected}",
                    data.len()
                )));
            }
        }

        let config = device.config();
        let evictable = config.texture_eviction && descriptor.is_eviction_candidate();
        let deferred = config.defer_texture_creation;

        let mut texture = TextureResource::new(descriptor.clone());
        let mut mips: Vec<Option<Vec<u8>>> = vec![None; descriptor.mip_level_count as usize];
        for (slot, data) in mips.iter_mut().zip(initial_mips) {
            *slot = Some(data.to_vec());
        }
        if evictable {
            let mut record =
                EvictionRecord::new(descriptor.mip_level_count, texture.label().to_string(), frame);
            record.mips = mips;
            texture.eviction = Some(record);
        } else {
            texture.pending_upload = mips;
        }

        let key = self.textures.insert(texture);
        if !deferred && let Err(err) = self.realize(device, key, frame, false) {
            self.textures.remove(key);
            return Err(err);
        }
        Ok(key)
    }

    /// Create the driver object of an uncreated texture.
    ///
    /// For evictable textures `retain` keeps the initial data cached as if the
    /// texture had been restored; otherwise the CPU copies are dropped.
    pub fn realize(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        frame: u64,
        retain: bool,
    ) -> RhiResult<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if texture.state != ResidencyState::Uncreated {
            return Ok(());
        }

        let handle = device.backend().create_texture(&texture.descriptor)?;
        let pending = std::mem::take(&mut texture.pending_upload);
        let sources = match texture.eviction.as_ref() {
            Some(record) => &record.mips,
            None => &pending,
        };
        for (mip, data) in sources.iter().enumerate().rev() {
            if let Some(data) = data {
                device
                    .backend()
                    .write_texture_mip(handle, &texture.descriptor, mip as u32, data);
            }
        }

        texture.handle = Some(handle);
        texture.state = ResidencyState::Live;
        device.stats_mut().textures_created += 1;
        log::debug!("TextureRegistry: created {}", texture.label());

        if let Some(record) = texture.eviction.as_mut() {
            record.last_used_frame = frame;
            record.release_mips(if retain {
                device.config().eviction_retain_mip_count
            } else {
                Some(0)
            });
            let bytes = texture.descriptor.memory_size();
            self.register_lru(device, key, bytes);
        }
        Ok(())
    }

    /// Driver handle for reading, restoring or creating it as needed.
    pub fn resource(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        frame: u64,
    ) -> RhiResult<TextureHandle> {
        let state = self
            .textures
            .get(key)
            .ok_or(RhiError::InvalidHandle("texture"))?
            .state;
        match state {
            ResidencyState::Uncreated => self.realize(device, key, frame, true)?,
            ResidencyState::Evicted => self.restore(device, key, frame, true)?,
            ResidencyState::Live => {}
        }
        self.touch(key, frame);
        self.textures
            .get(key)
            .and_then(|texture| texture.handle)
            .ok_or_else(|| RhiError::Internal("live texture without a driver handle".to_string()))
    }

    /// Driver handle for writing.
    ///
    /// Like [`resource`](Self::resource), but the caller may change the
    /// contents through the handle, so cached CPU copies are dropped and will
    /// be read back on the next eviction.
    pub fn resource_ref(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        frame: u64,
    ) -> RhiResult<TextureHandle> {
        let handle = self.resource(device, key, frame)?;
        if let Some(record) = self
            .textures
            .get_mut(key)
            .and_then(|texture| texture.eviction.as_mut())
        {
            record.release_mips(Some(0));
        }
        Ok(handle)
    }

    /// Move a live texture to CPU memory. Returns false if it cannot be evicted
    /// right now: not live, not evictable, aliased, or still viewed.
    pub fn try_evict(&mut self, device: &mut RhiDevice, key: TextureKey) -> bool {
        let Some(texture) = self.textures.get_mut(key) else {
            return false;
        };
        if texture.state != ResidencyState::Live
            || !texture.views.is_empty()
            || texture.alias_of.is_some()
            || texture.alias_count > 0
        {
            return false;
        }
        let (Some(record), Some(handle)) = (texture.eviction.as_mut(), texture.handle) else {
            return false;
        };

        for mip in 0..texture.descriptor.mip_level_count {
            if record.mips[mip as usize].is_some() {
                continue;
            }
            match device
                .backend()
                .read_texture_mip(handle, &texture.descriptor, mip)
            {
                Ok(data) => record.mips[mip as usize] = Some(data),
                Err(err) => {
                    log::warn!("eviction of {} aborted, mip {mip} readback failed: {err}", record.label);
                    return false;
                }
            }
        }

        device.backend().destroy_texture(handle);
        texture.handle = None;
        texture.state = ResidencyState::Evicted;
        record.restored = false;
        record.in_lru = false;
        if device.config().eviction_logging {
            log::debug!(
                "evicted {} ({} bytes held in CPU memory)",
                record.label,
                record.cached_bytes()
            );
        }
        self.eviction.remove(key);
        device.stats_mut().texture_evictions += 1;
        true
    }

    /// Recreate the driver object of an evicted texture and upload its mips.
    ///
    /// Without `retain` every CPU copy is dropped afterwards. With `retain`
    /// the configured number of smallest mips stays cached.
    pub fn restore(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        frame: u64,
        retain: bool,
    ) -> RhiResult<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        match texture.state {
            ResidencyState::Live => return Ok(()),
            ResidencyState::Uncreated => return self.realize(device, key, frame, retain),
            ResidencyState::Evicted => {}
        }
        let Some(record) = texture.eviction.as_mut() else {
            return Err(RhiError::Internal(
                "evicted texture has no eviction record".to_string(),
            ));
        };

        let handle = device.backend().create_texture(&texture.descriptor)?;
        for (mip, data) in record.mips.iter().enumerate().rev() {
            if let Some(data) = data {
                device
                    .backend()
                    .write_texture_mip(handle, &texture.descriptor, mip as u32, data);
            }
        }

        texture.handle = Some(handle);
        texture.state = ResidencyState::Live;
        record.restored = true;
        record.last_used_frame = frame;
        record.release_mips(if retain {
            device.config().eviction_retain_mip_count
        } else {
            Some(0)
        });
        if device.config().eviction_logging {
            log::debug!("restored {} (retain: {retain})", record.label);
        }
        let stats = device.stats_mut();
        stats.textures_created += 1;
        stats.texture_restores += 1;

        let bytes = texture.descriptor.memory_size();
        self.register_lru(device, key, bytes);
        Ok(())
    }

    /// Replace the contents of one mip.
    ///
    /// Uncreated and evicted textures only update their CPU copy. Live
    /// textures are written through the driver and drop the stale CPU copy
    /// of that mip.
    ///
    /// # Panics
    ///
    /// Panics if the mip does not exist or `data` has the wrong length.
    pub fn write_mip(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        mip: u32,
        data: &[u8],
        frame: u64,
    ) -> RhiResult<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if mip >= texture.descriptor.mip_level_count {
            crate::fatal!(
                "write to mip {mip} of {} which has {} levels",
                texture.label(),
                texture.descriptor.mip_level_count
            );
        }
        let expected = texture.descriptor.mip_byte_size(mip);
        if data.len() as u64 != expected {
            crate::fatal!(
                "write of {} bytes to mip {mip} of {}, expected {expected}",
                data.len(),
                texture.label()
            );
        }

        match (texture.state, texture.eviction.as_mut(), texture.handle) {
            (ResidencyState::Live, record, Some(handle)) => {
                device
                    .backend()
                    .write_texture_mip(handle, &texture.descriptor, mip, data);
                if let Some(record) = record {
                    record.mips[mip as usize] = None;
                }
            }
            (ResidencyState::Uncreated | ResidencyState::Evicted, Some(record), _) => {
                record.mips[mip as usize] = Some(data.to_vec());
            }
            (ResidencyState::Uncreated, None, _) => {
                texture.pending_upload.resize(texture.descriptor.mip_level_count as usize, None);
                texture.pending_upload[mip as usize] = Some(data.to_vec());
            }
            (state, _, _) => {
                return Err(RhiError::Internal(format!(
                    "texture in state {state:?} has no storage for mip {mip}"
                )));
            }
        }
        self.touch(key, frame);
        Ok(())
    }

    /// Read one mip back from the driver, restoring the texture if needed.
    pub fn read_mip(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        mip: u32,
        frame: u64,
    ) -> RhiResult<Vec<u8>> {
        let handle = self.resource(device, key, frame)?;
        let texture = self
            .textures
            .get(key)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if mip >= texture.descriptor.mip_level_count {
            return Err(RhiError::InvalidParameter(format!(
                "mip {mip} out of range for {}",
                texture.label()
            )));
        }
        device
            .backend()
            .read_texture_mip(handle, &texture.descriptor, mip)
    }

    /// Create a texture sharing the driver object of `origin`.
    ///
    /// The origin is restored if evicted and becomes non-evictable. The alias
    /// never releases the shared driver object.
    pub fn create_alias(
        &mut self,
        device: &mut RhiDevice,
        origin: TextureKey,
        frame: u64,
    ) -> RhiResult<TextureKey> {
        let handle = self.pin_as_origin(device, origin, frame)?;
        let Some(source) = self.textures.get(origin) else {
            return Err(RhiError::InvalidHandle("texture"));
        };
        let mut alias = TextureResource::new(source.descriptor.clone());
        alias.state = ResidencyState::Live;
        alias.handle = Some(handle);
        alias.alias_of = Some(origin);
        Ok(self.textures.insert(alias))
    }

    /// Point an alias at a different origin and refresh its views.
    ///
    /// Returns the number of views revalidated.
    pub fn realias(
        &mut self,
        device: &mut RhiDevice,
        alias: TextureKey,
        new_origin: TextureKey,
        frame: u64,
    ) -> RhiResult<usize> {
        let old_origin = self
            .textures
            .get(alias)
            .ok_or(RhiError::InvalidHandle("texture"))?
            .alias_of
            .ok_or_else(|| RhiError::InvalidParameter("texture is not an alias".to_string()))?;
        if new_origin == alias {
            return Err(RhiError::InvalidParameter(
                "a texture cannot alias itself".to_string(),
            ));
        }

        let handle = self.pin_as_origin(device, new_origin, frame)?;
        let descriptor = self
            .textures
            .get(new_origin)
            .map(|texture| texture.descriptor.clone())
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if let Some(old) = self.textures.get_mut(old_origin) {
            old.alias_count -= 1;
        }

        let Some(texture) = self.textures.get_mut(alias) else {
            return Err(RhiError::InvalidHandle("texture"));
        };
        texture.alias_of = Some(new_origin);
        texture.handle = Some(handle);
        texture.descriptor = descriptor;

        let view_keys = texture.views.keys(self.views.arena());
        for &view in &view_keys {
            if let Some(view) = self.views.arena_mut().get_mut(view) {
                view.set_handle(Some(handle));
            }
        }
        Ok(view_keys.len())
    }

    /// Make `origin` live and non-evictable and count one more alias on it.
    fn pin_as_origin(
        &mut self,
        device: &mut RhiDevice,
        origin: TextureKey,
        frame: u64,
    ) -> RhiResult<TextureHandle> {
        let texture = self
            .textures
            .get(origin)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if texture.is_alias() {
            return Err(RhiError::InvalidParameter(
                "cannot alias a texture that is itself an alias".to_string(),
            ));
        }
        match texture.state {
            ResidencyState::Uncreated => self.realize(device, origin, frame, false)?,
            ResidencyState::Evicted => self.restore(device, origin, frame, false)?,
            ResidencyState::Live => {}
        }
        self.make_non_evictable(origin);

        let texture = self
            .textures
            .get_mut(origin)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        texture.alias_count += 1;
        texture
            .handle
            .ok_or_else(|| RhiError::Internal("live texture without a driver handle".to_string()))
    }

    /// Release a texture and its driver object.
    ///
    /// # Panics
    ///
    /// Panics if views are still attached or aliases still share it.
    pub fn destroy(&mut self, device: &mut RhiDevice, key: TextureKey) -> RhiResult<()> {
        let texture = self
            .textures
            .get(key)
            .ok_or(RhiError::InvalidHandle("texture"))?;
        if !texture.views.is_empty() {
            crate::fatal!(
                "texture {} destroyed with {} live views",
                texture.label(),
                texture.views.len()
            );
        }
        if texture.alias_count > 0 {
            crate::fatal!(
                "texture {} destroyed while {} aliases share it",
                texture.label(),
                texture.alias_count
            );
        }

        let Some(texture) = self.textures.remove(key) else {
            return Err(RhiError::InvalidHandle("texture"));
        };
        self.eviction.remove(key);
        match (texture.alias_of, texture.handle) {
            (Some(origin), _) => {
                if let Some(origin) = self.textures.get_mut(origin) {
                    origin.alias_count -= 1;
                }
            }
            (None, Some(handle)) => device.backend().destroy_texture(handle),
            (None, None) => {}
        }
        log::debug!("TextureRegistry: destroyed {}", texture.label());
        Ok(())
    }

    /// Attach a view over `mip_count` levels starting at `base_mip`.
    ///
    /// The texture is made live; while the view is attached it cannot be evicted.
    pub fn create_view(
        &mut self,
        device: &mut RhiDevice,
        key: TextureKey,
        kind: ViewKind,
        base_mip: u32,
        mip_count: u32,
        frame: u64,
    ) -> RhiResult<ViewKey> {
        let levels = self
            .textures
            .get(key)
            .ok_or(RhiError::InvalidHandle("texture"))?
            .descriptor
            .mip_level_count;
        if mip_count == 0 || base_mip.checked_add(mip_count).is_none_or(|end| end > levels) {
            return Err(RhiError::InvalidParameter(format!(
                "view of mips {base_mip}..+{mip_count} on a texture with {levels} levels"
            )));
        }

        let handle = self.resource(device, key, frame)?;
        let view = self
            .views
            .insert(TextureView::new(kind, key, base_mip, mip_count, handle));
        if let Some(texture) = self.textures.get_mut(key) {
            texture.views.push_back(self.views.arena_mut(), view);
        }
        Ok(view)
    }

    /// Detach and forget a view. Returns false for a stale key.
    pub fn destroy_view(&mut self, view: ViewKey) -> bool {
        let Some(target) = self.views.get(view).map(TextureView::texture) else {
            return false;
        };
        if let Some(texture) = self.textures.get_mut(target) {
            texture.views.unlink(self.views.arena_mut(), view);
        }
        self.views.remove(view).is_some()
    }

    /// Detach every view of a texture. The views stay valid keys but point
    /// at nothing. Returns the number of views detached.
    pub fn invalidate_views(&mut self, key: TextureKey) -> usize {
        let Some(texture) = self.textures.get_mut(key) else {
            return 0;
        };
        let mut detached = 0;
        while let Some(view) = texture.views.pop_front(self.views.arena_mut()) {
            if let Some(view) = self.views.arena_mut().get_mut(view) {
                view.set_handle(None);
            }
            detached += 1;
        }
        detached
    }

    /// Evict textures idle for too long, or while the resident budget is exceeded.
    ///
    /// Walks from the least-recently-used end, skipping textures with views.
    /// Stops after the configured number of evictions, when the LRU is down
    /// to its minimum resident count, or at the first texture that is neither
    /// expired nor needed for the budget.
    pub fn tick(&mut self, device: &mut RhiDevice, frame: u64) -> usize {
        let config = device.config();
        if !config.texture_eviction {
            return 0;
        }
        let frames_to_live = config.eviction_frames_to_live;
        let per_frame = config.evictions_per_frame;
        let min_resident = config.eviction_min_resident;
        let budget = config.eviction_budget_bytes;

        let mut evicted = 0;
        for key in self.eviction.lru_order() {
            if evicted >= per_frame || self.eviction.len() <= min_resident {
                break;
            }
            let Some(texture) = self.textures.get(key) else {
                self.eviction.remove(key);
                continue;
            };
            let last_used = texture
                .eviction
                .as_ref()
                .map_or(frame, |record| record.last_used_frame);
            let expired = frame.saturating_sub(last_used) >= frames_to_live;
            let over_budget = budget.is_some_and(|limit| self.eviction.resident_bytes() > limit);
            if !expired && !over_budget {
                break;
            }
            if !texture.views.is_empty() {
                continue;
            }
            if self.try_evict(device, key) {
                evicted += 1;
            }
        }
        evicted
    }

    /// Release every texture and forget every view, at context shutdown.
    pub fn clear(&mut self, device: &mut RhiDevice) {
        for (_, texture) in self.textures.drain() {
            if texture.alias_of.is_none()
                && let Some(handle) = texture.handle
            {
                device.backend().destroy_texture(handle);
            }
        }
        self.views = ViewRegistry::new();
        self.eviction.clear();
    }

    fn touch(&mut self, key: TextureKey, frame: u64) {
        if let Some(record) = self
            .textures
            .get_mut(key)
            .and_then(|texture| texture.eviction.as_mut())
            && record.in_lru
        {
            record.last_used_frame = frame;
            self.eviction.touch(key);
        }
    }

    /// Put a live evictable texture on the LRU, demoting it when the list is full.
    fn register_lru(&mut self, device: &mut RhiDevice, key: TextureKey, bytes: u64) {
        if self.eviction.insert(key, bytes) {
            if let Some(record) = self
                .textures
                .get_mut(key)
                .and_then(|texture| texture.eviction.as_mut())
            {
                record.in_lru = true;
            }
            return;
        }
        log::warn!(
            "eviction LRU full ({} entries), texture becomes non-evictable",
            self.eviction.capacity()
        );
        device.stats_mut().lru_overflows += 1;
        self.make_non_evictable(key);
    }

    fn make_non_evictable(&mut self, key: TextureKey) {
        self.eviction.remove(key);
        if let Some(texture) = self.textures.get_mut(key) {
            texture.eviction = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyProbe};
    use crate::config::RhiConfig;
    use crate::types::{TextureFormat, TextureUsage};

    fn setup(config: RhiConfig) -> (RhiDevice, DummyProbe, TextureRegistry) {
        let backend = DummyBackend::new();
        let probe = backend.probe();
        let capacity = config.eviction_lru_capacity;
        let device = RhiDevice::new(Box::new(backend), config).unwrap();
        (device, probe, TextureRegistry::new(capacity))
    }

    fn streamed(size: u32, mips: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(
            size,
            size,
            TextureFormat::R8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::STREAMABLE | TextureUsage::COPY_DST,
        )
        .with_mip_levels(mips)
        .with_label("streamed")
    }

    #[test]
    fn test_release_mips_keeps_smallest() {
        let mut record = EvictionRecord::new(4, "r".to_string(), 0);
        record.mips = vec![Some(vec![0; 64]), Some(vec![0; 16]), Some(vec![0; 4]), Some(vec![0; 1])];

        record.release_mips(None);
        assert_eq!(record.cached_mip_count(), 4);

        record.release_mips(Some(2));
        assert!(!record.is_mip_cached(0));
        assert!(!record.is_mip_cached(1));
        assert!(record.is_mip_cached(2));
        assert_eq!(record.cached_bytes(), 5);

        record.release_mips(Some(0));
        assert_eq!(record.cached_mip_count(), 0);
    }

    #[test]
    fn test_initial_mip_size_checked() {
        let (mut device, _, mut registry) = setup(RhiConfig::default());
        let result = registry.create(&mut device, &streamed(8, 1), &[&[0u8; 10]], 0);
        assert!(matches!(result, Err(RhiError::InvalidParameter(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_immediate_creation_drops_cpu_copies() {
        let (mut device, probe, mut registry) = setup(RhiConfig::default());
        let key = registry
            .create(&mut device, &streamed(8, 2), &[&[1u8; 64], &[2u8; 16]], 0)
            .unwrap();

        let texture = registry.get(key).unwrap();
        assert_eq!(texture.state(), ResidencyState::Live);
        assert!(texture.is_evictable());
        assert_eq!(texture.eviction_record().unwrap().cached_mip_count(), 0);
        assert!(registry.eviction().contains(key));
        assert_eq!(probe.counters().mip_uploads, 2);
    }

    #[test]
    fn test_deferred_creation_waits_for_access() {
        let (mut device, probe, mut registry) =
            setup(RhiConfig::default().with_defer_texture_creation(true));
        let key = registry
            .create(&mut device, &streamed(8, 1), &[&[3u8; 64]], 0)
            .unwrap();

        assert_eq!(registry.get(key).unwrap().state(), ResidencyState::Uncreated);
        assert_eq!(probe.counters().textures_created, 0);

        registry.resource(&mut device, key, 1).unwrap();
        assert_eq!(registry.get(key).unwrap().state(), ResidencyState::Live);
        assert_eq!(registry.read_mip(&mut device, key, 0, 1).unwrap(), vec![3u8; 64]);
    }

    #[test]
    fn test_full_lru_demotes_texture() {
        let (mut device, _, mut registry) =
            setup(RhiConfig::default().with_eviction_lru_capacity(1));
        let first = registry.create(&mut device, &streamed(8, 1), &[], 0).unwrap();
        let second = registry.create(&mut device, &streamed(8, 1), &[], 0).unwrap();

        assert!(registry.get(first).unwrap().is_evictable());
        assert!(!registry.get(second).unwrap().is_evictable());
        assert!(!registry.try_evict(&mut device, second));
        assert_eq!(device.stats().lru_overflows, 1);
    }

    #[test]
    fn test_resource_ref_drops_cached_mips() {
        let (mut device, _, mut registry) = setup(RhiConfig::default());
        let key = registry
            .create(&mut device, &streamed(8, 1), &[&[9u8; 64]], 0)
            .unwrap();
        assert!(registry.try_evict(&mut device, key));
        registry.resource(&mut device, key, 1).unwrap();
        assert_eq!(registry.get(key).unwrap().eviction_record().unwrap().cached_mip_count(), 1);

        registry.resource_ref(&mut device, key, 2).unwrap();
        assert_eq!(registry.get(key).unwrap().eviction_record().unwrap().cached_mip_count(), 0);
    }
}
