//! Per-frame tile state for the renderer.
//!
//! Sources hand loaded tiles to the renderer behind the [`Tile`] trait. Each
//! frame the renderer wraps the visible ones in a [`RenderTile`], which pulls
//! fresh [`TileRenderData`] and caches the tile's projection matrices for the
//! current [`TransformState`].

mod debug_bucket;
mod render_tile;
mod tile;
mod transform;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support;

pub use debug_bucket::{DebugBucket, DebugTileState, MapDebugOptions};
pub use render_tile::{
    RenderTile, SourcePrepareParameters, TranslateAnchor, pixels_to_tile_units, to_uniform_matrix,
    translate_vtx_matrix,
};
pub use tile::{Bucket, LayerRenderData, Tile, TileRenderData};
pub use transform::{LatLng, TransformError, TransformParameters, TransformState};

/// Tile coordinate space used by bucket geometry.
pub const EXTENT: f64 = 8192.0;

/// Tile edge length in screen pixels at its own zoom.
pub const TILE_SIZE: f64 = 512.0;

#[cfg(test)]
mod tests;
