//! Views over textures.
//!
//! A view does not own its texture. It keeps a key back to it and a node in
//! the texture's intrusive view list, so the texture can tell in O(1) whether
//! anything still looks at it, and every view can be revalidated when the
//! texture's driver object changes.

use slotmap::{SlotMap, new_key_type};

use crate::backend::TextureHandle;
use crate::intrusive::{Link, Linked};

use super::TextureKey;

new_key_type! {
    /// Key of a view in a [`ViewRegistry`].
    pub struct ViewKey;
}

/// Access granted by a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Read-only access from shaders.
    ShaderResource,
    /// Read-write access from shaders.
    UnorderedAccess,
}

/// Typed projection of a mip range of a texture.
#[derive(Debug)]
pub struct TextureView {
    kind: ViewKind,
    texture: TextureKey,
    base_mip: u32,
    mip_count: u32,
    handle: Option<TextureHandle>,
    link: Link<ViewKey>,
}

impl TextureView {
    pub(crate) fn new(
        kind: ViewKind,
        texture: TextureKey,
        base_mip: u32,
        mip_count: u32,
        handle: TextureHandle,
    ) -> Self {
        Self {
            kind,
            texture,
            base_mip,
            mip_count,
            handle: Some(handle),
            link: Link::default(),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Texture the view was created over.
    pub fn texture(&self) -> TextureKey {
        self.texture
    }

    pub fn base_mip(&self) -> u32 {
        self.base_mip
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Driver texture the view currently points at. `None` once invalidated.
    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    /// Returns true while the view is on its texture's view list.
    pub fn is_attached(&self) -> bool {
        self.link.is_linked()
    }

    pub(crate) fn set_handle(&mut self, handle: Option<TextureHandle>) {
        self.handle = handle;
    }
}

impl Linked<ViewKey> for TextureView {
    fn link(&self) -> &Link<ViewKey> {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link<ViewKey> {
        &mut self.link
    }
}

/// Arena of all views of a context.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: SlotMap<ViewKey, TextureView>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ViewKey) -> Option<&TextureView> {
        self.views.get(key)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub(crate) fn insert(&mut self, view: TextureView) -> ViewKey {
        self.views.insert(view)
    }

    pub(crate) fn remove(&mut self, key: ViewKey) -> Option<TextureView> {
        self.views.remove(key)
    }

    pub(crate) fn arena(&self) -> &SlotMap<ViewKey, TextureView> {
        &self.views
    }

    pub(crate) fn arena_mut(&mut self) -> &mut SlotMap<ViewKey, TextureView> {
        &mut self.views
    }
}
