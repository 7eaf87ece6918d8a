//! Frame-local wrapper around a visible tile.

use std::sync::Arc;

use atlas::{DynamicTexture, ImagePosition};
use glam::{DMat4, DVec2, DVec3};
use render_protocol::{LayerProperties, OverscaledTileId, TransformMatrix4x4, UnwrappedTileId};

use crate::debug_bucket::{DebugBucket, DebugTileState, MapDebugOptions};
use crate::tile::{Bucket, LayerRenderData, Tile, TileRenderData};
use crate::transform::{TransformParameters, TransformState};
use crate::{EXTENT, TILE_SIZE};

/// Frame of reference for a paint `*-translate` offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TranslateAnchor {
    #[default]
    Map,
    Viewport,
}

pub struct SourcePrepareParameters<'a> {
    pub transform: &'a TransformParameters,
    pub debug_options: MapDebugOptions,
}

/// Screen pixels to tile units for `tile` viewed at `zoom`.
pub fn pixels_to_tile_units(tile: UnwrappedTileId, pixels: f64, zoom: f64) -> f64 {
    pixels * (EXTENT / (TILE_SIZE * (zoom - f64::from(tile.canonical.z)).exp2()))
}

/// Applies a paint translation to a tile matrix.
///
/// Drawable tweakers and the legacy uniform path both go through here so the
/// two agree on every pixel.
pub fn translate_vtx_matrix(
    tile: UnwrappedTileId,
    tile_matrix: &DMat4,
    translation: [f32; 2],
    anchor: TranslateAnchor,
    state: &TransformState,
    in_viewport_pixel_units: bool,
) -> DMat4 {
    if translation == [0.0, 0.0] {
        return *tile_matrix;
    }

    let angle = match (in_viewport_pixel_units, anchor) {
        (true, TranslateAnchor::Map) => state.bearing(),
        (false, TranslateAnchor::Viewport) => -state.bearing(),
        _ => 0.0,
    };
    let translate = DVec2::from_angle(angle)
        .rotate(DVec2::new(f64::from(translation[0]), f64::from(translation[1])));

    let offset = if in_viewport_pixel_units {
        DVec3::new(translate.x, translate.y, 0.0)
    } else {
        DVec3::new(
            pixels_to_tile_units(tile, translate.x, state.zoom()),
            pixels_to_tile_units(tile, translate.y, state.zoom()),
            0.0,
        )
    };
    *tile_matrix * DMat4::from_translation(offset)
}

/// Column-major single precision copy for uniform buffers.
pub fn to_uniform_matrix(matrix: &DMat4) -> TransformMatrix4x4 {
    matrix.as_mat4().to_cols_array()
}

pub struct RenderTile {
    id: UnwrappedTileId,
    tile: Arc<dyn Tile>,
    render_data: Option<TileRenderData>,
    matrix: DMat4,
    near_clipped_matrix: DMat4,
    needs_rendering: bool,
    debug_bucket: Option<Arc<DebugBucket>>,
}

static_assertions::assert_impl_all!(RenderTile: Send, Sync);

impl RenderTile {
    pub fn new(id: UnwrappedTileId, tile: Arc<dyn Tile>) -> Self {
        Self {
            id,
            tile,
            render_data: None,
            matrix: DMat4::IDENTITY,
            near_clipped_matrix: DMat4::IDENTITY,
            needs_rendering: false,
            debug_bucket: None,
        }
    }

    pub fn id(&self) -> UnwrappedTileId {
        self.id
    }

    pub fn overscaled_tile_id(&self) -> OverscaledTileId {
        self.tile.id()
    }

    pub fn tile(&self) -> &Arc<dyn Tile> {
        &self.tile
    }

    pub fn matrix(&self) -> &DMat4 {
        &self.matrix
    }

    pub fn near_clipped_matrix(&self) -> &DMat4 {
        &self.near_clipped_matrix
    }

    pub fn needs_rendering(&self) -> bool {
        self.needs_rendering
    }

    pub fn set_needs_rendering(&mut self, value: bool) {
        self.needs_rendering = value;
    }

    pub fn debug_bucket(&self) -> Option<&Arc<DebugBucket>> {
        self.debug_bucket.as_ref()
    }

    pub fn render_data(&self) -> Option<&TileRenderData> {
        self.render_data.as_ref()
    }

    /// Refreshes render data, matrices and the debug overlay for this frame.
    pub fn prepare(&mut self, parameters: &SourcePrepareParameters<'_>) {
        self.render_data = self.tile.create_render_data();
        if self.render_data.is_none() {
            log::debug!("tile {} has no render data yet", self.tile.id());
        }

        if parameters.debug_options.is_empty() {
            self.debug_bucket = None;
        } else {
            let state = DebugTileState {
                renderable: self.tile.is_renderable(),
                complete: self.tile.is_complete(),
                modified: self.tile.modified(),
                expires: self.tile.expires(),
                debug_mode: parameters.debug_options,
            };
            let stale = self
                .debug_bucket
                .as_ref()
                .is_none_or(|bucket| *bucket.state() != state);
            if stale {
                self.debug_bucket = Some(Arc::new(DebugBucket::new(self.tile.id(), state)));
            }
        }

        let transform = parameters.transform;
        let tile_matrix = transform.state.matrix_for(self.id);
        self.matrix = transform.projection_matrix * tile_matrix;
        self.near_clipped_matrix = transform.near_clipped_projection_matrix * tile_matrix;
    }

    pub fn translated_matrix(
        &self,
        translation: [f32; 2],
        anchor: TranslateAnchor,
        state: &TransformState,
    ) -> DMat4 {
        translate_vtx_matrix(self.id, &self.matrix, translation, anchor, state, false)
    }

    pub fn translated_clip_matrix(
        &self,
        translation: [f32; 2],
        anchor: TranslateAnchor,
        state: &TransformState,
    ) -> DMat4 {
        translate_vtx_matrix(
            self.id,
            &self.near_clipped_matrix,
            translation,
            anchor,
            state,
            false,
        )
    }

    pub fn get_bucket(&self, layer: &LayerProperties) -> Option<&Arc<dyn Bucket>> {
        self.render_data.as_ref()?.get_bucket(layer)
    }

    pub fn get_layer_render_data(&self, layer: &LayerProperties) -> Option<&LayerRenderData> {
        self.render_data.as_ref()?.get_layer_render_data(layer)
    }

    pub fn get_pattern(&self, pattern: &str) -> Option<&ImagePosition> {
        self.render_data.as_ref()?.get_pattern(pattern)
    }

    pub fn glyph_atlas_texture(&self) -> Option<&Arc<DynamicTexture>> {
        self.render_data.as_ref()?.glyph_atlas_texture()
    }

    pub fn icon_atlas_texture(&self) -> Option<&Arc<DynamicTexture>> {
        self.render_data.as_ref()?.icon_atlas_texture()
    }
}
