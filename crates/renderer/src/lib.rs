//! Renderer crate root.
//!
//! Turns evaluated style layers into batches and the batches into layer
//! groups holding GPU drawables. Everything here talks to the backend through
//! the `gpu_runtime` traits only.
//!
//! Module overview:
//! - `layer_grouping`: contiguous `(layer type, render passes, variant)` batches.
//! - `drawable`: draw units and the builder cutting bucket geometry into them.
//! - `uniforms`: uniform blocks and per-slot GPU buffers.
//! - `layer_group`: the common group interface, tweakers, the non-tiled group.
//! - `tile_layer_group`: drawables keyed by `(pass, tile)`, drawn by priority.
//! - `paint_parameters`: frame state handed to groups while rendering.
//! - `tweakers`: per-frame uniform updates shared by tiled layers.
//! - `context_ext`: factories on every backend context.

mod context_ext;
mod drawable;
mod layer_group;
mod layer_grouping;
mod paint_parameters;
mod tile_layer_group;
mod tweakers;
mod uniforms;

pub use context_ext::ContextExt;
pub use drawable::{DrawSegment, Drawable, DrawableBuilder, DrawableId, TextureBinding};
pub use layer_group::{LayerGroup, LayerGroupBase, LayerGroupKind, LayerGroupState, LayerTweaker};
pub use layer_grouping::{LayerBatch, group_layers, group_layers_by};
pub use paint_parameters::PaintParameters;
pub use tile_layer_group::{TileLayerGroup, TileLayerGroupTileKey};
pub use tweakers::TileMatrixTweaker;
pub use uniforms::{
    GLOBAL_PAINT_UNIFORM_SLOT, GlobalPaintUniform, TILE_UNIFORM_SLOT, TileUniform,
    UniformBufferArray,
};
