use tiles::{TranslateAnchor, to_uniform_matrix, translate_vtx_matrix};

use crate::layer_group::{LayerGroupBase, LayerTweaker};
use crate::paint_parameters::PaintParameters;
use crate::uniforms::{GLOBAL_PAINT_UNIFORM_SLOT, GlobalPaintUniform, TILE_UNIFORM_SLOT, TileUniform};

/// Writes each tiled drawable's matrix and the frame's paint block.
///
/// Drawables without a tile id, or whose tile is not in the frame's render
/// tiles, keep their previous matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileMatrixTweaker {
    pub translation: [f32; 2],
    pub anchor: TranslateAnchor,
    /// Use the near-clipped projection, as layers drawn in 3D do.
    pub near_clipped: bool,
}

impl TileMatrixTweaker {
    pub fn new(translation: [f32; 2], anchor: TranslateAnchor) -> Self {
        Self {
            translation,
            anchor,
            near_clipped: false,
        }
    }
}

impl LayerTweaker for TileMatrixTweaker {
    fn execute(&self, group: &mut dyn LayerGroupBase, parameters: &PaintParameters<'_>) {
        let state = &parameters.transform.state;
        group.uniform_buffers_mut().set(
            GLOBAL_PAINT_UNIFORM_SLOT,
            &GlobalPaintUniform {
                world_size: [state.world_size() as f32; 2],
                pixel_ratio: parameters.pixel_ratio,
                zoom: state.zoom() as f32,
            },
        );

        let mut missing = 0usize;
        group.observe_all_drawables(&mut |drawable| {
            let Some(tile_id) = drawable.tile_id() else {
                return;
            };
            let Some(render_tile) = parameters.render_tile(tile_id) else {
                missing += 1;
                return;
            };
            let tile_matrix = if self.near_clipped {
                render_tile.near_clipped_matrix()
            } else {
                render_tile.matrix()
            };
            let matrix = translate_vtx_matrix(
                render_tile.id(),
                tile_matrix,
                self.translation,
                self.anchor,
                state,
                false,
            );
            drawable.uniform_buffers_mut().set(
                TILE_UNIFORM_SLOT,
                &TileUniform {
                    matrix: to_uniform_matrix(&matrix),
                },
            );
        });
        if missing > 0 {
            log::trace!("{} drawables of {} have no render tile", missing, group.name());
        }
    }
}
