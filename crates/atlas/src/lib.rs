//! Texture atlases for glyphs, icons and patterns.
//!
//! Workers hand finished glyph and image batches to a shared
//! [`DynamicTextureAtlas`], which packs them into large [`DynamicTexture`]
//! pages and queues the pixels. The render thread flushes the queue once per
//! frame through an `UploadPass`.

mod dynamic_texture;
mod dynamic_texture_atlas;
mod glyph;
mod image;
mod style_image;

pub use dynamic_texture::{DynamicTexture, TextureHandle};
pub use dynamic_texture_atlas::{DynamicTextureAtlas, DynamicTextureAtlasConfig, GlyphAtlas, ImageAtlas};
pub use glyph::{FontStackHash, Glyph, GlyphId, GlyphMap, GlyphMetrics, GlyphPosition, GlyphPositions};
pub use image::{AlphaImage, Image, ImageCopyError, PremultipliedImage};
pub use style_image::{ImageMap, ImagePosition, ImagePositions, ImageVersionMap, StyleImage};

/// Texel rectangle inside an atlas page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl TextureRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub const fn right(&self) -> u32 {
        self.x + self.w
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn intersects(&self, other: &TextureRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Shrinks the rectangle by `inset` on every side.
    pub const fn inset(&self, inset: u32) -> Self {
        Self::new(
            self.x + inset,
            self.y + inset,
            self.w - 2 * inset,
            self.h - 2 * inset,
        )
    }
}
