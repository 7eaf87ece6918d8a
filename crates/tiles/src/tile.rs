//! What the renderer consumes from the tile and source layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use atlas::{DynamicTexture, GlyphAtlas, ImageAtlas, ImagePosition};
use render_protocol::{LayerProperties, OverscaledTileId};
use smol_str::SmolStr;

/// GPU-ready geometry built by a worker for one layer of one tile.
pub trait Bucket: fmt::Debug + Send + Sync {
    fn has_data(&self) -> bool;

    /// Buckets built for different paint properties report `false` and are
    /// skipped until the worker rebuilds them.
    fn supports_layer(&self, _layer: &LayerProperties) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct LayerRenderData {
    pub bucket: Arc<dyn Bucket>,
    pub layer_properties: Arc<LayerProperties>,
}

/// Render data snapshot of a tile, keyed by layer id.
#[derive(Debug, Clone, Default)]
pub struct TileRenderData {
    layers: HashMap<SmolStr, LayerRenderData>,
    glyph_atlas: Option<Arc<GlyphAtlas>>,
    image_atlas: Option<Arc<ImageAtlas>>,
}

impl TileRenderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_layer(&mut self, layer_properties: Arc<LayerProperties>, bucket: Arc<dyn Bucket>) {
        let id = SmolStr::new(layer_properties.id());
        self.layers.insert(
            id,
            LayerRenderData {
                bucket,
                layer_properties,
            },
        );
    }

    pub fn with_layer(mut self, layer_properties: Arc<LayerProperties>, bucket: Arc<dyn Bucket>) -> Self {
        self.insert_layer(layer_properties, bucket);
        self
    }

    pub fn with_glyph_atlas(mut self, glyph_atlas: Arc<GlyphAtlas>) -> Self {
        self.glyph_atlas = Some(glyph_atlas);
        self
    }

    pub fn with_image_atlas(mut self, image_atlas: Arc<ImageAtlas>) -> Self {
        self.image_atlas = Some(image_atlas);
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Data for `layer`, provided it was built for a layer of the same type.
    pub fn get_layer_render_data(&self, layer: &LayerProperties) -> Option<&LayerRenderData> {
        self.layers
            .get(layer.id())
            .filter(|data| data.layer_properties.layer_type() == layer.layer_type())
    }

    pub fn get_bucket(&self, layer: &LayerProperties) -> Option<&Arc<dyn Bucket>> {
        self.get_layer_render_data(layer)
            .map(|data| &data.bucket)
            .filter(|bucket| bucket.supports_layer(layer))
    }

    pub fn get_pattern(&self, pattern: &str) -> Option<&ImagePosition> {
        self.image_atlas.as_ref()?.pattern_positions.get(pattern)
    }

    pub fn get_icon(&self, icon: &str) -> Option<&ImagePosition> {
        self.image_atlas.as_ref()?.icon_positions.get(icon)
    }

    pub fn glyph_atlas(&self) -> Option<&Arc<GlyphAtlas>> {
        self.glyph_atlas.as_ref()
    }

    pub fn image_atlas(&self) -> Option<&Arc<ImageAtlas>> {
        self.image_atlas.as_ref()
    }

    pub fn glyph_atlas_texture(&self) -> Option<&Arc<DynamicTexture>> {
        self.glyph_atlas.as_ref()?.dynamic_texture.as_ref()
    }

    pub fn icon_atlas_texture(&self) -> Option<&Arc<DynamicTexture>> {
        self.image_atlas.as_ref()?.dynamic_texture.as_ref()
    }
}

/// A loaded or loading tile owned by a source.
pub trait Tile: Send + Sync {
    fn id(&self) -> OverscaledTileId;

    /// Snapshot of the tile's buckets. `None` while nothing is parsed yet.
    fn create_render_data(&self) -> Option<TileRenderData>;

    fn is_renderable(&self) -> bool;

    fn is_complete(&self) -> bool;

    fn modified(&self) -> Option<SystemTime>;

    fn expires(&self) -> Option<SystemTime>;
}
