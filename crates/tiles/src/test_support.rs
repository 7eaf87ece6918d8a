//! In-memory tiles for tests of crates built on top of this one.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use render_protocol::{LayerProperties, OverscaledTileId};

use crate::tile::{Bucket, Tile, TileRenderData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticBucket {
    pub has_data: bool,
}

impl Bucket for StaticBucket {
    fn has_data(&self) -> bool {
        self.has_data
    }
}

#[derive(Debug, Clone, Default)]
struct StaticTileState {
    renderable: bool,
    complete: bool,
    modified: Option<SystemTime>,
    expires: Option<SystemTime>,
    layers: Vec<Arc<LayerProperties>>,
}

/// Tile whose state is set directly by the test.
#[derive(Debug)]
pub struct StaticTile {
    id: OverscaledTileId,
    state: Mutex<StaticTileState>,
}

impl StaticTile {
    pub fn new(id: OverscaledTileId) -> Self {
        Self {
            id,
            state: Mutex::new(StaticTileState::default()),
        }
    }

    /// A renderable, complete tile with one data bucket per layer.
    pub fn loaded(id: OverscaledTileId, layers: &[Arc<LayerProperties>]) -> Self {
        let tile = Self::new(id);
        tile.set_loaded(true, true);
        for layer in layers {
            tile.add_layer(Arc::clone(layer));
        }
        tile
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticTileState> {
        self.state.lock().expect("static tile lock poisoned")
    }

    pub fn set_loaded(&self, renderable: bool, complete: bool) {
        let mut state = self.lock();
        state.renderable = renderable;
        state.complete = complete;
    }

    pub fn set_timestamps(&self, modified: Option<SystemTime>, expires: Option<SystemTime>) {
        let mut state = self.lock();
        state.modified = modified;
        state.expires = expires;
    }

    pub fn add_layer(&self, layer: Arc<LayerProperties>) {
        self.lock().layers.push(layer);
    }
}

impl Tile for StaticTile {
    fn id(&self) -> OverscaledTileId {
        self.id
    }

    fn create_render_data(&self) -> Option<TileRenderData> {
        let state = self.lock();
        if !state.renderable {
            return None;
        }
        let mut data = TileRenderData::new();
        for layer in &state.layers {
            data.insert_layer(Arc::clone(layer), Arc::new(StaticBucket { has_data: true }));
        }
        Some(data)
    }

    fn is_renderable(&self) -> bool {
        self.lock().renderable
    }

    fn is_complete(&self) -> bool {
        self.lock().complete
    }

    fn modified(&self) -> Option<SystemTime> {
        self.lock().modified
    }

    fn expires(&self) -> Option<SystemTime> {
        self.lock().expires
    }
}
