use std::collections::BTreeMap;
use std::sync::Arc;

use crate::TextureRect;
use crate::image::AlphaImage;

pub type FontStackHash = u64;
pub type GlyphId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlyphMetrics {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub advance: u32,
}

/// Rasterized SDF glyph as produced by the glyph workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub id: GlyphId,
    pub bitmap: AlphaImage,
    pub metrics: GlyphMetrics,
}

/// Glyphs per font stack. `None` marks a glyph the font does not have.
pub type GlyphMap = BTreeMap<FontStackHash, BTreeMap<GlyphId, Option<Arc<Glyph>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphPosition {
    /// Glyph bitmap plus one pixel of padding on each side.
    pub rect: TextureRect,
    pub metrics: GlyphMetrics,
}

pub type GlyphPositions = BTreeMap<FontStackHash, BTreeMap<GlyphId, GlyphPosition>>;
