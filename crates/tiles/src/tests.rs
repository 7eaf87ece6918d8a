use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use glam::{DMat4, DVec3};
use render_protocol::{LayerProperties, LayerType, OverscaledTileId, RenderPass, Size};

use super::*;
use crate::test_support::StaticTile;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera(zoom: f64, bearing: f64) -> TransformParameters {
    let mut state = TransformState::new(Size::new(1024, 768)).expect("valid viewport");
    state.set_zoom(zoom).expect("valid zoom");
    state.set_bearing(bearing).expect("valid bearing");
    TransformParameters::new(state)
}

fn water() -> Arc<LayerProperties> {
    LayerProperties::new("water", LayerType::Fill, RenderPass::TRANSLUCENT).into_shared()
}

fn wrap(tile: &Arc<StaticTile>) -> RenderTile {
    let tile_id = tile.id();
    RenderTile::new(tile_id.to_unwrapped(), Arc::clone(tile) as Arc<dyn Tile>)
}

fn prepare(render_tile: &mut RenderTile, transform: &TransformParameters, debug: MapDebugOptions) {
    render_tile.prepare(&SourcePrepareParameters {
        transform,
        debug_options: debug,
    });
}

fn assert_matrix_close(actual: &DMat4, expected: &DMat4) {
    assert!(
        actual.abs_diff_eq(*expected, 1e-9),
        "{actual:?} differs from {expected:?}"
    );
}

#[test]
fn prepare_combines_projection_and_tile_matrices() {
    init_logger();
    let tile = Arc::new(StaticTile::loaded(
        OverscaledTileId::from_zxy(5, 10, 10),
        &[water()],
    ));
    let mut render_tile = wrap(&tile);
    let transform = camera(5.5, 0.0);
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());

    let tile_matrix = transform.state.matrix_for(render_tile.id());
    assert_matrix_close(
        render_tile.matrix(),
        &(transform.projection_matrix * tile_matrix),
    );
    assert_matrix_close(
        render_tile.near_clipped_matrix(),
        &(transform.near_clipped_projection_matrix * tile_matrix),
    );
}

#[test]
fn bucket_lookups_need_render_data() {
    let tile = Arc::new(StaticTile::new(OverscaledTileId::from_zxy(3, 1, 2)));
    tile.add_layer(water());
    let mut render_tile = wrap(&tile);
    let transform = camera(3.0, 0.0);

    assert!(render_tile.get_bucket(&water()).is_none());
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());
    assert!(render_tile.get_bucket(&water()).is_none(), "tile still loading");

    tile.set_loaded(true, false);
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());
    let bucket = render_tile.get_bucket(&water()).expect("bucket after load");
    assert!(bucket.has_data());
    assert!(render_tile.get_layer_render_data(&water()).is_some());
    assert!(render_tile.get_pattern("stripes").is_none());
}

#[test]
fn zero_translation_keeps_the_matrix() {
    let tile = Arc::new(StaticTile::loaded(OverscaledTileId::from_zxy(2, 1, 1), &[]));
    let mut render_tile = wrap(&tile);
    let transform = camera(2.0, 0.7);
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());

    let translated =
        render_tile.translated_matrix([0.0, 0.0], TranslateAnchor::Viewport, &transform.state);
    assert_eq!(&translated, render_tile.matrix());
}

#[test]
fn map_anchored_translation_converts_pixels_to_tile_units() {
    let tile = Arc::new(StaticTile::loaded(OverscaledTileId::from_zxy(4, 3, 3), &[]));
    let mut render_tile = wrap(&tile);
    let transform = camera(4.0, 0.4);
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());

    // At the tile's own zoom one pixel is EXTENT / TILE_SIZE units.
    let translated =
        render_tile.translated_matrix([10.0, -5.0], TranslateAnchor::Map, &transform.state);
    let expected =
        *render_tile.matrix() * DMat4::from_translation(DVec3::new(160.0, -80.0, 0.0));
    assert_matrix_close(&translated, &expected);

    let clip = render_tile.translated_clip_matrix(
        [10.0, -5.0],
        TranslateAnchor::Map,
        &transform.state,
    );
    let expected_clip = *render_tile.near_clipped_matrix()
        * DMat4::from_translation(DVec3::new(160.0, -80.0, 0.0));
    assert_matrix_close(&clip, &expected_clip);
}

#[test]
fn viewport_anchored_translation_counter_rotates_by_bearing() {
    let tile = Arc::new(StaticTile::loaded(OverscaledTileId::from_zxy(4, 3, 3), &[]));
    let mut render_tile = wrap(&tile);
    let transform = camera(5.0, FRAC_PI_2);
    prepare(&mut render_tile, &transform, MapDebugOptions::empty());

    // One zoom above the tile, a pixel covers half the units.
    let translated =
        render_tile.translated_matrix([10.0, 0.0], TranslateAnchor::Viewport, &transform.state);
    let expected = *render_tile.matrix() * DMat4::from_translation(DVec3::new(0.0, -80.0, 0.0));
    assert!(translated.abs_diff_eq(expected, 1e-6));
}

#[test]
fn viewport_pixel_units_rotate_map_anchored_offsets() {
    let tile_id = OverscaledTileId::from_zxy(1, 0, 0).to_unwrapped();
    let transform = camera(1.0, FRAC_PI_2);
    let translated = translate_vtx_matrix(
        tile_id,
        &DMat4::IDENTITY,
        [4.0, 0.0],
        TranslateAnchor::Map,
        &transform.state,
        true,
    );
    let expected = DMat4::from_translation(DVec3::new(0.0, 4.0, 0.0));
    assert!(translated.abs_diff_eq(expected, 1e-6));

    let unrotated = translate_vtx_matrix(
        tile_id,
        &DMat4::IDENTITY,
        [4.0, 0.0],
        TranslateAnchor::Viewport,
        &transform.state,
        true,
    );
    assert_eq!(unrotated, DMat4::from_translation(DVec3::new(4.0, 0.0, 0.0)));
}

#[test]
fn debug_bucket_rebuilds_only_on_state_change() {
    let tile = Arc::new(StaticTile::loaded(OverscaledTileId::from_zxy(5, 10, 10), &[]));
    tile.set_timestamps(
        Some(UNIX_EPOCH + Duration::from_secs(10)),
        Some(UNIX_EPOCH + Duration::from_secs(20)),
    );
    let mut render_tile = wrap(&tile);
    let transform = camera(5.0, 0.0);

    prepare(&mut render_tile, &transform, MapDebugOptions::TILE_BORDERS);
    let first = Arc::clone(render_tile.debug_bucket().expect("debug bucket"));
    prepare(&mut render_tile, &transform, MapDebugOptions::TILE_BORDERS);
    assert!(Arc::ptr_eq(&first, render_tile.debug_bucket().unwrap()));

    tile.set_loaded(true, false);
    prepare(&mut render_tile, &transform, MapDebugOptions::TILE_BORDERS);
    let second = Arc::clone(render_tile.debug_bucket().unwrap());
    assert!(!Arc::ptr_eq(&first, &second));

    prepare(&mut render_tile, &transform, MapDebugOptions::TIMESTAMPS);
    let third = render_tile.debug_bucket().unwrap();
    assert!(!Arc::ptr_eq(&second, third));
    assert_eq!(third.lines().len(), 3);

    prepare(&mut render_tile, &transform, MapDebugOptions::empty());
    assert!(render_tile.debug_bucket().is_none());
}

#[test]
fn needs_rendering_is_caller_controlled() {
    let tile = Arc::new(StaticTile::new(OverscaledTileId::from_zxy(0, 0, 0)));
    let mut render_tile = wrap(&tile);
    assert!(!render_tile.needs_rendering());
    render_tile.set_needs_rendering(true);
    assert!(render_tile.needs_rendering());
}

#[test]
fn uniform_matrix_is_column_major() {
    let matrix = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
    let uniform = to_uniform_matrix(&matrix);
    assert_eq!(&uniform[12..15], &[1.0, 2.0, 3.0]);
}
