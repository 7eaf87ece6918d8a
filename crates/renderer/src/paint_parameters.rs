use std::collections::HashMap;

use gpu_runtime::{ClippingMaskCommand, RenderPassEncoder};
use render_protocol::{OverscaledTileId, UnwrappedTileId};
use tiles::{MapDebugOptions, RenderTile, TransformParameters, to_uniform_matrix};

/// Frame-wide state handed to layer groups while rendering.
pub struct PaintParameters<'a> {
    pub transform: &'a TransformParameters,
    pub render_tiles: &'a [RenderTile],
    pub debug_options: MapDebugOptions,
    pub pixel_ratio: f32,
    pub frame_index: u64,
    clipping_masks: HashMap<UnwrappedTileId, u32>,
    masked_tiles: Vec<UnwrappedTileId>,
}

impl<'a> PaintParameters<'a> {
    pub fn new(transform: &'a TransformParameters, render_tiles: &'a [RenderTile]) -> Self {
        Self {
            transform,
            render_tiles,
            debug_options: MapDebugOptions::empty(),
            pixel_ratio: 1.0,
            frame_index: 0,
            clipping_masks: HashMap::new(),
            masked_tiles: Vec::new(),
        }
    }

    pub fn render_tile(&self, tile_id: OverscaledTileId) -> Option<&'a RenderTile> {
        self.render_tiles
            .iter()
            .find(|tile| tile.overscaled_tile_id() == tile_id)
    }

    /// Draws stencil masks for `tiles` unless the current masks already
    /// cover exactly that set. Mask ids start at 1 in tile order.
    pub fn render_tile_clipping_masks(
        &mut self,
        encoder: &mut dyn RenderPassEncoder,
        tiles: &[UnwrappedTileId],
    ) {
        if self.masked_tiles == tiles {
            return;
        }
        self.clipping_masks.clear();
        self.masked_tiles = tiles.to_vec();

        let transform = self.transform;
        encoder.push_debug_group("tile clipping masks");
        for (index, tile) in tiles.iter().enumerate() {
            let stencil_ref = index as u32 + 1;
            let matrix = transform.projection_matrix * transform.state.matrix_for(*tile);
            encoder.draw_clipping_mask(&ClippingMaskCommand {
                tile_matrix: to_uniform_matrix(&matrix),
                stencil_ref,
            });
            self.clipping_masks.insert(*tile, stencil_ref);
        }
        encoder.pop_debug_group();
        log::trace!("{} tile clipping masks", tiles.len());
    }

    pub fn clipping_mask_id(&self, tile: UnwrappedTileId) -> Option<u32> {
        self.clipping_masks.get(&tile).copied()
    }

    /// Stencil reference a drawable of `tile` tests against, if its tile
    /// was masked this pass.
    pub fn stencil_ref_for(&self, tile: Option<OverscaledTileId>) -> Option<u32> {
        self.clipping_mask_id(tile?.to_unwrapped())
    }

    pub fn clear_clipping_masks(&mut self) {
        self.clipping_masks.clear();
        self.masked_tiles.clear();
    }
}
