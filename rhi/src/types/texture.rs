//! Texture types and descriptors.

use super::Extent3d;
use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,
    /// 32-bit red channel, float.
    R32Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit depth, float.
    Depth32Float,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::R32Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    /// One-dimensional texture.
    D1,
    /// Two-dimensional texture.
    #[default]
    D2,
    /// Array of 2D layers; `size.depth` is the layer count.
    D2Array,
    /// Three-dimensional texture.
    D3,
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
        /// Texture content is streamed asset data and may be evicted from GPU memory.
        const STREAMABLE = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Dimensionality.
    pub dimension: TextureDimension,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Create a new 3D texture descriptor.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: None,
            size: Extent3d::new_3d(width, height, depth),
            dimension: TextureDimension::D3,
            mip_level_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Set the dimensionality.
    pub fn with_dimension(mut self, dimension: TextureDimension) -> Self {
        self.dimension = dimension;
        self
    }

    /// Extent of a mip level. Array layers do not shrink.
    pub fn mip_extent(&self, mip: u32) -> Extent3d {
        let mut extent = self.size.mip_level(mip);
        match self.dimension {
            TextureDimension::D3 => {}
            TextureDimension::D2Array => extent.depth = self.size.depth,
            TextureDimension::D1 | TextureDimension::D2 => extent.depth = 1,
        }
        extent
    }

    /// Bytes occupied by one mip level, tightly packed.
    pub fn mip_byte_size(&self, mip: u32) -> u64 {
        let extent = self.mip_extent(mip);
        extent.width as u64
            * extent.height as u64
            * extent.depth as u64
            * self.format.block_size() as u64
    }

    /// Bytes occupied by the whole mip chain.
    pub fn memory_size(&self) -> u64 {
        (0..self.mip_level_count)
            .map(|mip| self.mip_byte_size(mip))
            .sum()
    }

    /// Returns true if the descriptor describes a texture that may live in the
    /// eviction LRU: streamed shader input, plain 2D, single sample, never a
    /// GPU write target.
    pub fn is_eviction_candidate(&self) -> bool {
        self.usage
            .contains(TextureUsage::STREAMABLE | TextureUsage::TEXTURE_BINDING)
            && !self
                .usage
                .intersects(TextureUsage::RENDER_ATTACHMENT | TextureUsage::STORAGE_BINDING)
            && self.dimension == TextureDimension::D2
            && self.sample_count == 1
            && !self.format.is_depth_stencil()
    }

    /// Check the descriptor for values no driver accepts.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.size.width == 0 || self.size.height == 0 || self.size.depth == 0 {
            return Err(format!("texture extent {:?} has a zero axis", self.size));
        }
        if self.mip_level_count == 0 || self.mip_level_count > self.size.max_mip_levels() {
            return Err(format!(
                "mip level count {} out of range for {}x{}",
                self.mip_level_count, self.size.width, self.size.height
            ));
        }
        if self.sample_count == 0 {
            return Err("sample count cannot be zero".to_string());
        }
        Ok(())
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            sample_count: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamed(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::STREAMABLE | TextureUsage::COPY_DST,
        )
    }

    #[test]
    fn test_mip_byte_sizes() {
        let desc = streamed(64, 64).with_mip_levels(4);
        assert_eq!(desc.mip_byte_size(0), 64 * 64 * 4);
        assert_eq!(desc.mip_byte_size(1), 32 * 32 * 4);
        assert_eq!(desc.mip_byte_size(3), 8 * 8 * 4);
        assert_eq!(
            desc.memory_size(),
            (64 * 64 + 32 * 32 + 16 * 16 + 8 * 8) * 4
        );
    }

    #[test]
    fn test_array_layers_do_not_shrink() {
        let desc = TextureDescriptor::new_3d(16, 16, 6, TextureFormat::R8Unorm, TextureUsage::empty())
            .with_dimension(TextureDimension::D2Array)
            .with_mip_levels(2);
        assert_eq!(desc.mip_extent(1), Extent3d::new_3d(8, 8, 6));
    }

    #[test]
    fn test_eviction_candidate() {
        assert!(streamed(64, 64).is_eviction_candidate());

        let mut render_target = streamed(64, 64);
        render_target.usage |= TextureUsage::RENDER_ATTACHMENT;
        assert!(!render_target.is_eviction_candidate());

        let not_streamed = TextureDescriptor::new_2d(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        assert!(!not_streamed.is_eviction_candidate());

        assert!(!streamed(64, 64).with_sample_count(4).is_eviction_candidate());
        assert!(
            !streamed(64, 64)
                .with_dimension(TextureDimension::D3)
                .is_eviction_candidate()
        );
    }

    #[test]
    fn test_validate() {
        assert!(streamed(64, 64).with_mip_levels(7).validate().is_ok());
        assert!(streamed(64, 64).with_mip_levels(8).validate().is_err());
        assert!(streamed(0, 64).validate().is_err());
    }
}
