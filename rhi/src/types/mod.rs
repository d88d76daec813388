//! Descriptors, usage flags and small value types shared by every layer.

mod buffer;
mod common;
mod query;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, LockMode};
pub use common::Extent3d;
pub use query::QueryKind;
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};
