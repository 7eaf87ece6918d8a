//! Drawables of a tiled layer, keyed by tile and render pass.
//!
//! Tile streaming adds and removes whole tiles at a time, while rendering
//! walks every drawable of the layer in priority order. The group keeps both
//! views: a key index from (pass, tile) to drawable slots, and a set ordered
//! by (priority, id). Every structural mutation leaves the two with the same
//! cardinality as the owning slot map.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use gpu_runtime::{Context, RenderPassEncoder, UploadError, UploadPass};
use render_protocol::{DrawPriority, OverscaledTileId, RenderPass, UnwrappedTileId};
use slotmap::SlotMap;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::drawable::{Drawable, DrawableId};
use crate::layer_group::{
    LayerGroupBase, LayerGroupKind, LayerGroupState, render_drawables, upload_all,
};
use crate::paint_parameters::PaintParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileLayerGroupTileKey {
    pub render_pass: RenderPass,
    pub tile_id: OverscaledTileId,
}

impl TileLayerGroupTileKey {
    pub fn new(render_pass: RenderPass, tile_id: OverscaledTileId) -> Self {
        Self {
            render_pass,
            tile_id,
        }
    }
}

slotmap::new_key_type! {
    struct DrawableSlot;
}

struct TileEntry {
    key: TileLayerGroupTileKey,
    drawable: Drawable,
}

type SortKey = (DrawPriority, DrawableId, DrawableSlot);

fn sort_key(slot: DrawableSlot, drawable: &Drawable) -> SortKey {
    (drawable.priority(), drawable.id(), slot)
}

pub struct TileLayerGroup {
    state: LayerGroupState,
    entries: SlotMap<DrawableSlot, TileEntry>,
    drawables_by_tile: HashMap<TileLayerGroupTileKey, SmallVec<[DrawableSlot; 4]>>,
    sorted_drawables: BTreeSet<SortKey>,
    stencil_tiles: Option<Arc<[UnwrappedTileId]>>,
}

impl TileLayerGroup {
    pub fn new(layer_index: i32, initial_capacity: usize, name: impl Into<SmolStr>) -> Self {
        Self {
            state: LayerGroupState::new(LayerGroupKind::TileLayerGroup, layer_index, name),
            entries: SlotMap::with_capacity_and_key(initial_capacity),
            drawables_by_tile: HashMap::with_capacity(initial_capacity),
            sorted_drawables: BTreeSet::new(),
            stencil_tiles: None,
        }
    }

    fn check_consistency(&self) {
        debug_assert_eq!(
            self.entries.len(),
            self.sorted_drawables.len(),
            "tile layer group {} sorted set out of sync",
            self.state.name
        );
        debug_assert_eq!(
            self.entries.len(),
            self.drawables_by_tile.values().map(SmallVec::len).sum::<usize>(),
            "tile layer group {} tile index out of sync",
            self.state.name
        );
        debug_assert!(
            self.drawables_by_tile.iter().all(|(key, slots)| {
                slots
                    .iter()
                    .all(|slot| self.entries.get(*slot).is_some_and(|entry| entry.key == *key))
            }),
            "tile layer group {} indexes a drawable under the wrong tile",
            self.state.name
        );
    }

    /// Takes ownership of `drawable` under `(pass, tile_id)`.
    pub fn add_drawable(&mut self, pass: RenderPass, tile_id: OverscaledTileId, drawable: Drawable) {
        let key = TileLayerGroupTileKey::new(pass, tile_id);
        let order = (drawable.priority(), drawable.id());
        let slot = self.entries.insert(TileEntry { key, drawable });
        self.drawables_by_tile.entry(key).or_default().push(slot);
        let inserted = self.sorted_drawables.insert((order.0, order.1, slot));
        debug_assert!(inserted, "drawable {:?} added twice", order.1);
        self.check_consistency();
    }

    /// Removes and returns every drawable under `(pass, tile_id)`. Unknown
    /// keys yield nothing.
    pub fn remove_drawables(&mut self, pass: RenderPass, tile_id: OverscaledTileId) -> Vec<Drawable> {
        let key = TileLayerGroupTileKey::new(pass, tile_id);
        let Some(slots) = self.drawables_by_tile.remove(&key) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(slots.len());
        for slot in slots {
            let Some(entry) = self.entries.remove(slot) else {
                continue;
            };
            self.sorted_drawables.remove(&sort_key(slot, &entry.drawable));
            removed.push(entry.drawable);
        }
        self.check_consistency();
        removed
    }

    /// Calls `observe` on each drawable under `(pass, tile_id)`.
    ///
    /// Priority changes made by the observer re-sort the drawable.
    pub fn observe_drawables(
        &mut self,
        pass: RenderPass,
        tile_id: OverscaledTileId,
        mut observe: impl FnMut(&mut Drawable),
    ) -> usize {
        let key = TileLayerGroupTileKey::new(pass, tile_id);
        let Some(slots) = self.drawables_by_tile.get(&key) else {
            return 0;
        };
        for &slot in slots {
            let Some(entry) = self.entries.get_mut(slot) else {
                continue;
            };
            let before = sort_key(slot, &entry.drawable);
            observe(&mut entry.drawable);
            let after = sort_key(slot, &entry.drawable);
            if before != after {
                self.sorted_drawables.remove(&before);
                self.sorted_drawables.insert(after);
            }
        }
        slots.len()
    }

    /// Read-only variant of [`TileLayerGroup::observe_drawables`].
    pub fn observe_drawables_ref(
        &self,
        pass: RenderPass,
        tile_id: OverscaledTileId,
        mut observe: impl FnMut(&Drawable),
    ) -> usize {
        let key = TileLayerGroupTileKey::new(pass, tile_id);
        let Some(slots) = self.drawables_by_tile.get(&key) else {
            return 0;
        };
        for &slot in slots {
            if let Some(entry) = self.entries.get(slot) {
                observe(&entry.drawable);
            }
        }
        slots.len()
    }

    /// Calls `observe` on every drawable of the group and removes those for
    /// which it returns `false`, releasing their GPU buffers. Returns the
    /// number removed.
    pub fn observe_drawables_remove(
        &mut self,
        context: &mut dyn Context,
        observe: impl FnMut(&mut Drawable) -> bool,
    ) -> usize {
        self.retain_drawables(observe, |mut drawable| drawable.release(context))
    }

    fn retain_drawables(
        &mut self,
        mut observe: impl FnMut(&mut Drawable) -> bool,
        mut removed: impl FnMut(Drawable),
    ) -> usize {
        let before_count = self.entries.len();
        let mut emptied = Vec::new();
        for (key, slots) in self.drawables_by_tile.iter_mut() {
            slots.retain(|slot| {
                let slot = *slot;
                let Some(entry) = self.entries.get_mut(slot) else {
                    return false;
                };
                let before = sort_key(slot, &entry.drawable);
                if observe(&mut entry.drawable) {
                    let after = sort_key(slot, &entry.drawable);
                    if before != after {
                        self.sorted_drawables.remove(&before);
                        self.sorted_drawables.insert(after);
                    }
                    return true;
                }
                self.sorted_drawables.remove(&before);
                if let Some(entry) = self.entries.remove(slot) {
                    removed(entry.drawable);
                }
                false
            });
            if slots.is_empty() {
                emptied.push(*key);
            }
        }
        for key in emptied {
            self.drawables_by_tile.remove(&key);
        }
        self.check_consistency();
        before_count - self.entries.len()
    }

    pub fn drawable_count_for(&self, pass: RenderPass, tile_id: OverscaledTileId) -> usize {
        self.drawables_by_tile
            .get(&TileLayerGroupTileKey::new(pass, tile_id))
            .map_or(0, SmallVec::len)
    }

    pub fn has_tile(&self, pass: RenderPass, tile_id: OverscaledTileId) -> bool {
        self.drawable_count_for(pass, tile_id) > 0
    }

    /// Tiles whose stencil masks clip this layer. `None` disables clipping.
    pub fn set_stencil_tiles(&mut self, tiles: Option<Arc<[UnwrappedTileId]>>) {
        self.stencil_tiles = tiles;
    }

    pub fn stencil_tiles(&self) -> Option<&Arc<[UnwrappedTileId]>> {
        self.stencil_tiles.as_ref()
    }

    fn sorted(&self) -> impl Iterator<Item = &Drawable> {
        self.sorted_drawables
            .iter()
            .filter_map(|(_, _, slot)| self.entries.get(*slot))
            .map(|entry| &entry.drawable)
    }
}

impl LayerGroupBase for TileLayerGroup {
    fn state(&self) -> &LayerGroupState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LayerGroupState {
        &mut self.state
    }

    fn drawable_count(&self) -> usize {
        self.check_consistency();
        self.entries.len()
    }

    fn clear_drawables(&mut self, context: &mut dyn Context) -> usize {
        let count = self.entries.len();
        for (_, mut entry) in self.entries.drain() {
            entry.drawable.release(context);
        }
        self.drawables_by_tile.clear();
        self.sorted_drawables.clear();
        count
    }

    fn visit_drawables(&self, visit: &mut dyn FnMut(&Drawable)) -> usize {
        self.check_consistency();
        for drawable in self.sorted() {
            visit(drawable);
        }
        self.sorted_drawables.len()
    }

    fn observe_all_drawables(&mut self, observe: &mut dyn FnMut(&mut Drawable)) -> usize {
        self.retain_drawables(
            |drawable| {
                observe(drawable);
                true
            },
            |_| {},
        );
        self.entries.len()
    }

    fn upload(&mut self, upload: &mut dyn UploadPass) -> Result<(), UploadError> {
        self.state.uniform_buffers.upload(upload)?;
        upload_all(self.entries.values_mut().map(|entry| &mut entry.drawable), upload)
    }

    fn render(
        &mut self,
        encoder: &mut dyn RenderPassEncoder,
        parameters: &mut PaintParameters<'_>,
    ) -> usize {
        if !self.is_enabled() || self.is_empty() {
            return 0;
        }
        match &self.stencil_tiles {
            Some(tiles) => parameters.render_tile_clipping_masks(encoder, tiles),
            None => parameters.clear_clipping_masks(),
        }
        render_drawables(&self.state, self.sorted(), encoder, parameters)
    }
}
