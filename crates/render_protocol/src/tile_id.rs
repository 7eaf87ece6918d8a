use std::fmt;

/// Tile address inside the canonical world pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        assert!(z <= 32, "tile zoom {z} exceeds 32");
        let dimension = 1u64 << z;
        assert!(
            u64::from(x) < dimension && u64::from(y) < dimension,
            "tile coordinates {x}/{y} out of range for zoom {z}"
        );
        Self { z, x, y }
    }

    pub const fn tile_count(self) -> u64 {
        1u64 << self.z
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Canonical tile plus the world copy it is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnwrappedTileId {
    pub wrap: i16,
    pub canonical: CanonicalTileId,
}

impl UnwrappedTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self {
            wrap: 0,
            canonical: CanonicalTileId::new(z, x, y),
        }
    }

    pub const fn with_wrap(wrap: i16, canonical: CanonicalTileId) -> Self {
        Self { wrap, canonical }
    }

    /// Horizontal tile position across world copies.
    pub fn unwrapped_x(self) -> i64 {
        i64::from(self.canonical.x) + i64::from(self.wrap) * self.canonical.tile_count() as i64
    }
}

impl fmt::Display for UnwrappedTileId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}@{}", self.canonical, self.wrap)
    }
}

/// Tile identity including the zoom level it is displayed at.
///
/// Field order matters: ordering compares overscaled zoom, then wrap, then
/// the canonical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i16,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i16, canonical: CanonicalTileId) -> Self {
        assert!(
            overscaled_z >= canonical.z,
            "overscaled zoom {overscaled_z} below canonical zoom {}",
            canonical.z
        );
        Self {
            overscaled_z,
            wrap,
            canonical,
        }
    }

    /// Non-overscaled id for `z/x/y` in the primary world copy.
    pub fn from_zxy(z: u8, x: u32, y: u32) -> Self {
        Self::new(z, 0, CanonicalTileId::new(z, x, y))
    }

    pub fn overscale_factor(self) -> u32 {
        1u32 << (self.overscaled_z - self.canonical.z)
    }

    pub fn to_unwrapped(self) -> UnwrappedTileId {
        UnwrappedTileId::with_wrap(self.wrap, self.canonical)
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}=>{}@{}",
            self.canonical, self.overscaled_z, self.wrap
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overscale_factor_follows_zoom_difference() {
        let id = OverscaledTileId::new(7, 0, CanonicalTileId::new(5, 10, 10));
        assert_eq!(id.overscale_factor(), 4);
        assert_eq!(OverscaledTileId::from_zxy(5, 10, 10).overscale_factor(), 1);
    }

    #[test]
    fn ordering_compares_overscaled_zoom_first() {
        let low = OverscaledTileId::from_zxy(3, 7, 7);
        let high = OverscaledTileId::new(4, 0, CanonicalTileId::new(1, 0, 0));
        assert!(low < high);
    }

    #[test]
    fn unwrapped_x_spans_world_copies() {
        let id = UnwrappedTileId::with_wrap(-1, CanonicalTileId::new(2, 3, 1));
        assert_eq!(id.unwrapped_x(), -1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn canonical_rejects_out_of_range_coordinates() {
        let _ = CanonicalTileId::new(1, 2, 0);
    }
}
