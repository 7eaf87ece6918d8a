use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use smol_str::SmolStr;

use crate::TextureRect;
use crate::image::PremultipliedImage;

/// Style image (icon or pattern) as registered by the style.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleImage {
    pub id: SmolStr,
    pub image: PremultipliedImage,
    pub pixel_ratio: f32,
    pub sdf: bool,
}

impl StyleImage {
    pub fn new(id: impl Into<SmolStr>, image: PremultipliedImage, pixel_ratio: f32) -> Self {
        Self {
            id: id.into(),
            image,
            pixel_ratio,
            sdf: false,
        }
    }

    pub fn with_sdf(mut self, sdf: bool) -> Self {
        self.sdf = sdf;
        self
    }
}

pub type ImageMap = BTreeMap<SmolStr, Arc<StyleImage>>;
/// Change counter per image id. Missing ids count as version 0.
pub type ImageVersionMap = HashMap<SmolStr, u32>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePosition {
    /// Image plus [`ImagePosition::PADDING`] on each side.
    pub padded_rect: TextureRect,
    pub pixel_ratio: f32,
    pub version: u32,
    pub sdf: bool,
}

impl ImagePosition {
    pub const PADDING: u32 = 1;

    /// Top-left texel of the image itself.
    pub fn tl(&self) -> [u32; 2] {
        [
            self.padded_rect.x + Self::PADDING,
            self.padded_rect.y + Self::PADDING,
        ]
    }

    pub fn br(&self) -> [u32; 2] {
        [
            self.padded_rect.x + self.padded_rect.w - Self::PADDING,
            self.padded_rect.y + self.padded_rect.h - Self::PADDING,
        ]
    }

    /// Size in display units.
    pub fn display_size(&self) -> [f32; 2] {
        [
            (self.padded_rect.w - Self::PADDING * 2) as f32 / self.pixel_ratio,
            (self.padded_rect.h - Self::PADDING * 2) as f32 / self.pixel_ratio,
        ]
    }
}

pub type ImagePositions = HashMap<SmolStr, ImagePosition>;
