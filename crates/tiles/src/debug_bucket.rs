use std::time::{SystemTime, UNIX_EPOCH};

use render_protocol::OverscaledTileId;

bitflags::bitflags! {
    /// Debug overlays drawn on top of the map.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MapDebugOptions: u8 {
        const TILE_BORDERS = 1 << 1;
        const PARSE_STATUS = 1 << 2;
        const TIMESTAMPS = 1 << 3;
        const COLLISION = 1 << 4;
        const OVERDRAW = 1 << 5;
        const STENCIL_CLIP = 1 << 6;
        const DEPTH_BUFFER = 1 << 7;
    }
}

/// Tile state a debug overlay was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugTileState {
    pub renderable: bool,
    pub complete: bool,
    pub modified: Option<SystemTime>,
    pub expires: Option<SystemTime>,
    pub debug_mode: MapDebugOptions,
}

/// Text overlay describing one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugBucket {
    state: DebugTileState,
    lines: Vec<String>,
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl DebugBucket {
    pub fn new(tile: OverscaledTileId, state: DebugTileState) -> Self {
        let mut title = tile.canonical.to_string();
        if tile.overscaled_z != tile.canonical.z {
            title.push_str(&format!(" => {}", tile.overscaled_z));
        }
        if state.debug_mode.contains(MapDebugOptions::PARSE_STATUS) {
            let status = match (state.renderable, state.complete) {
                (_, true) => "complete",
                (true, false) => "partial",
                (false, false) => "loading",
            };
            title.push_str(&format!(" ({status})"));
        }

        let mut lines = vec![title];
        if state.debug_mode.contains(MapDebugOptions::TIMESTAMPS) {
            if let (Some(modified), Some(expires)) = (state.modified, state.expires) {
                lines.push(format!("modified: {}", unix_seconds(modified)));
                lines.push(format!("expires: {}", unix_seconds(expires)));
            }
        }
        Self { state, lines }
    }

    pub fn state(&self) -> &DebugTileState {
        &self.state
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn label(&self) -> String {
        self.lines.join("\n")
    }
}
