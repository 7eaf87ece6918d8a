//! Value types shared by every rendering crate.
//!
//! Nothing in here talks to a GPU. The types describe render passes, tile
//! identity, evaluated style layers and texture shapes so that the resource
//! pools, the atlas and the drawable containers agree on one vocabulary.

use std::fmt;

mod layer;
mod tile_id;

pub use layer::{LayerProperties, LayerType};
pub use tile_id::{CanonicalTileId, OverscaledTileId, UnwrappedTileId};

pub type TransformMatrix4x4 = [f32; 16];

/// Ordering value for drawables inside one pass. Lower draws first.
pub type DrawPriority = i64;

bitflags::bitflags! {
    /// Rendering phase membership.
    ///
    /// A layer may participate in several passes, a drawable is recorded for
    /// exactly one of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct RenderPass: u8 {
        const OPAQUE = 1 << 0;
        const TRANSLUCENT = 1 << 1;
        const PASS_3D = 1 << 2;
    }
}

impl Default for RenderPass {
    fn default() -> Self {
        RenderPass::empty()
    }
}

impl fmt::Display for RenderPass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(formatter, "none");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(formatter, "|")?;
            }
            write!(formatter, "{}", name.to_ascii_lowercase())?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TexturePixelType {
    Alpha,
    Luminance,
    Depth,
    Stencil,
    Rgba,
}

impl TexturePixelType {
    pub const fn channel_count(self) -> usize {
        match self {
            TexturePixelType::Alpha
            | TexturePixelType::Luminance
            | TexturePixelType::Depth
            | TexturePixelType::Stencil => 1,
            TexturePixelType::Rgba => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureChannelDataType {
    UnsignedByte,
    HalfFloat,
}

impl TextureChannelDataType {
    pub const fn byte_size(self) -> usize {
        match self {
            TextureChannelDataType::UnsignedByte => 1,
            TextureChannelDataType::HalfFloat => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_pass_display_lists_members() {
        assert_eq!(RenderPass::empty().to_string(), "none");
        assert_eq!(RenderPass::TRANSLUCENT.to_string(), "translucent");
        assert_eq!(
            (RenderPass::OPAQUE | RenderPass::PASS_3D).to_string(),
            "opaque|pass_3d"
        );
    }

    #[test]
    fn pixel_layout_sizes() {
        assert_eq!(TexturePixelType::Rgba.channel_count(), 4);
        assert_eq!(TexturePixelType::Alpha.channel_count(), 1);
        assert_eq!(TextureChannelDataType::HalfFloat.byte_size(), 2);
        assert_eq!(Size::new(16, 8).area(), 128);
        assert!(Size::new(0, 8).is_empty());
    }
}
