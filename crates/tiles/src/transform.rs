//! Camera state and the projection matrices derived from it.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use glam::{DMat4, DVec3};
use render_protocol::{Size, UnwrappedTileId};

use crate::{EXTENT, TILE_SIZE};

const EARTH_RADIUS_M: f64 = 6_378_137.0;
const LATITUDE_MAX: f64 = 85.051_128_779_806_59;
const DEFAULT_FIELD_OF_VIEW: f64 = 0.643_501_108_793_284_4;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("viewport {0} has no area")]
    EmptyViewport(Size),
    #[error("{field} must be finite")]
    NonFinite { field: &'static str },
    #[error("zoom {zoom} outside {min}..={max}")]
    ZoomOutOfRange { zoom: f64, min: f64, max: f64 },
    #[error("pitch {pitch} rad outside 0..={max}")]
    PitchOutOfRange { pitch: f64, max: f64 },
    #[error("field of view {fov} rad outside (0, pi)")]
    FieldOfViewOutOfRange { fov: f64 },
    #[error("latitude {latitude} outside the Mercator range")]
    LatitudeOutOfRange { latitude: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

fn finite(value: f64, field: &'static str) -> Result<f64, TransformError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TransformError::NonFinite { field })
    }
}

/// Camera over a Web Mercator world of `512 * 2^zoom` pixels.
///
/// Angles are radians. Setters validate their input and leave the state
/// untouched on error.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    size: Size,
    zoom: f64,
    min_zoom: f64,
    max_zoom: f64,
    bearing: f64,
    pitch: f64,
    max_pitch: f64,
    field_of_view: f64,
    center: LatLng,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            size: Size::new(512, 512),
            zoom: 0.0,
            min_zoom: 0.0,
            max_zoom: 25.5,
            bearing: 0.0,
            pitch: 0.0,
            max_pitch: 60f64.to_radians(),
            field_of_view: DEFAULT_FIELD_OF_VIEW,
            center: LatLng::default(),
        }
    }
}

impl TransformState {
    pub fn new(size: Size) -> Result<Self, TransformError> {
        let mut state = Self::default();
        state.set_size(size)?;
        Ok(state)
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn set_size(&mut self, size: Size) -> Result<(), TransformError> {
        if size.is_empty() {
            return Err(TransformError::EmptyViewport(size));
        }
        self.size = size;
        Ok(())
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), TransformError> {
        let zoom = finite(zoom, "zoom")?;
        if zoom < self.min_zoom || zoom > self.max_zoom {
            return Err(TransformError::ZoomOutOfRange {
                zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        self.zoom = zoom;
        Ok(())
    }

    /// `2^zoom`.
    pub fn scale(&self) -> f64 {
        self.zoom.exp2()
    }

    pub fn world_size(&self) -> f64 {
        TILE_SIZE * self.scale()
    }

    pub fn bearing(&self) -> f64 {
        self.bearing
    }

    /// Stores the bearing wrapped into `(-pi, pi]`.
    pub fn set_bearing(&mut self, bearing: f64) -> Result<(), TransformError> {
        let bearing = finite(bearing, "bearing")?;
        let wrapped = (bearing + PI).rem_euclid(2.0 * PI) - PI;
        self.bearing = if wrapped == -PI { PI } else { wrapped };
        Ok(())
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f64) -> Result<(), TransformError> {
        let pitch = finite(pitch, "pitch")?;
        if !(0.0..=self.max_pitch).contains(&pitch) {
            return Err(TransformError::PitchOutOfRange {
                pitch,
                max: self.max_pitch,
            });
        }
        self.pitch = pitch;
        Ok(())
    }

    pub fn field_of_view(&self) -> f64 {
        self.field_of_view
    }

    pub fn set_field_of_view(&mut self, fov: f64) -> Result<(), TransformError> {
        let fov = finite(fov, "field of view")?;
        if fov <= 0.0 || fov >= PI {
            return Err(TransformError::FieldOfViewOutOfRange { fov });
        }
        self.field_of_view = fov;
        Ok(())
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    /// Longitude wraps into `[-180, 180)`, latitude must stay on the
    /// Mercator square.
    pub fn set_center(&mut self, center: LatLng) -> Result<(), TransformError> {
        let latitude = finite(center.latitude, "latitude")?;
        let longitude = finite(center.longitude, "longitude")?;
        if latitude.abs() > LATITUDE_MAX {
            return Err(TransformError::LatitudeOutOfRange { latitude });
        }
        self.center = LatLng::new(latitude, (longitude + 180.0).rem_euclid(360.0) - 180.0);
        Ok(())
    }

    /// Distance from the camera to the screen center, in pixels.
    pub fn camera_to_center_distance(&self) -> f64 {
        0.5 / (self.field_of_view / 2.0).tan() * f64::from(self.size.height)
    }

    /// Center of the viewport in world pixels.
    pub fn center_point(&self) -> (f64, f64) {
        project(self.center, self.world_size())
    }

    fn meters_per_pixel(&self) -> f64 {
        let latitude = self.center.latitude.clamp(-LATITUDE_MAX, LATITUDE_MAX);
        latitude.to_radians().cos() * 2.0 * PI * EARTH_RADIUS_M / self.world_size()
    }

    /// World pixels to clip space, with the near plane at `near_z` pixels
    /// from the camera.
    pub fn projection_matrix(&self, near_z: f64) -> DMat4 {
        let camera_to_center = self.camera_to_center_distance();
        let half_fov = self.field_of_view / 2.0;
        let ground_angle = FRAC_PI_2 + self.pitch;
        let top_half_surface_distance =
            half_fov.sin() * camera_to_center / (PI - ground_angle - half_fov).sin();
        let furthest_distance =
            (FRAC_PI_2 - self.pitch).cos() * top_half_surface_distance + camera_to_center;
        let far_z = furthest_distance * 1.01;

        let aspect = f64::from(self.size.width) / f64::from(self.size.height);
        let (x, y) = self.center_point();
        DMat4::perspective_rh_gl(self.field_of_view, aspect, near_z, far_z)
            * DMat4::from_scale(DVec3::new(1.0, -1.0, 1.0))
            * DMat4::from_translation(DVec3::new(0.0, 0.0, -camera_to_center))
            * DMat4::from_rotation_x(self.pitch)
            * DMat4::from_rotation_z(self.bearing)
            * DMat4::from_translation(DVec3::new(-x, -y, 0.0))
            * DMat4::from_scale(DVec3::new(1.0, 1.0, 1.0 / self.meters_per_pixel()))
    }

    /// Tile space of `tile` to world pixels.
    pub fn matrix_for(&self, tile: UnwrappedTileId) -> DMat4 {
        let tile_scale = tile.canonical.tile_count() as f64;
        let s = self.world_size() / tile_scale;
        DMat4::from_translation(DVec3::new(
            tile.unwrapped_x() as f64 * s,
            f64::from(tile.canonical.y) * s,
            0.0,
        )) * DMat4::from_scale(DVec3::new(s / EXTENT, s / EXTENT, 1.0))
    }
}

fn project(point: LatLng, world_size: f64) -> (f64, f64) {
    let latitude = point.latitude.clamp(-LATITUDE_MAX, LATITUDE_MAX);
    let x = (180.0 + point.longitude) / 360.0 * world_size;
    let y = (180.0 - (FRAC_PI_4 + latitude.to_radians() / 2.0).tan().ln().to_degrees()) / 360.0
        * world_size;
    (x, y)
}

/// Camera snapshot for one frame plus its two projection matrices.
#[derive(Debug, Clone)]
pub struct TransformParameters {
    pub state: TransformState,
    pub projection_matrix: DMat4,
    /// Near plane pulled out to a tenth of the camera distance, for layers
    /// that need depth precision close to the ground.
    pub near_clipped_projection_matrix: DMat4,
}

impl TransformParameters {
    pub fn new(state: TransformState) -> Self {
        let projection_matrix = state.projection_matrix(1.0);
        let near_clipped_projection_matrix =
            state.projection_matrix(0.1 * state.camera_to_center_distance());
        Self {
            state,
            projection_matrix,
            near_clipped_projection_matrix,
        }
    }
}
