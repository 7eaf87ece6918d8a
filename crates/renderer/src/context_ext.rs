use gpu_runtime::{BufferId, BufferUsage, Context};
use smol_str::SmolStr;

use crate::drawable::DrawableBuilder;
use crate::layer_group::LayerGroup;
use crate::tile_layer_group::TileLayerGroup;

/// Renderer object factories available on every backend context.
pub trait ContextExt: Context {
    fn create_drawable_builder(&self, name: impl Into<SmolStr>) -> DrawableBuilder {
        let name = name.into();
        log::trace!("{:?} drawable builder {name}", self.backend_kind());
        DrawableBuilder::new(name)
    }

    fn create_tile_layer_group(
        &self,
        layer_index: i32,
        initial_capacity: usize,
        name: impl Into<SmolStr>,
    ) -> TileLayerGroup {
        let name = name.into();
        log::debug!(
            "{:?} tile layer group {name} at index {layer_index}",
            self.backend_kind()
        );
        TileLayerGroup::new(layer_index, initial_capacity, name)
    }

    fn create_layer_group(&self, layer_index: i32, name: impl Into<SmolStr>) -> LayerGroup {
        let name = name.into();
        log::debug!("{:?} layer group {name} at index {layer_index}", self.backend_kind());
        LayerGroup::new(layer_index, name)
    }

    /// Uploads `value` into a fresh uniform buffer.
    fn create_uniform_buffer<T: bytemuck::Pod>(&mut self, value: &T) -> Option<BufferId> {
        self.create_buffer(BufferUsage::Uniform, bytemuck::bytes_of(value))
    }
}

impl<C: Context + ?Sized> ContextExt for C {}

#[cfg(test)]
mod tests {
    use gpu_runtime::HeadlessContext;

    use super::*;
    use crate::layer_group::{LayerGroupBase, LayerGroupKind};
    use crate::uniforms::GlobalPaintUniform;

    #[test]
    fn factories_name_and_index_their_groups() {
        let context = HeadlessContext::default();
        let tiled = context.create_tile_layer_group(3, 16, "roads");
        assert_eq!(tiled.kind(), LayerGroupKind::TileLayerGroup);
        assert_eq!(tiled.layer_index(), 3);
        assert_eq!(tiled.name(), "roads");
        assert!(tiled.is_empty());

        let flat = context.create_layer_group(0, "background");
        assert_eq!(flat.kind(), LayerGroupKind::LayerGroup);
        assert_eq!(context.create_drawable_builder("fill").name(), "fill");
    }

    #[test]
    fn uniform_buffers_hold_the_value_bytes() {
        let mut context = HeadlessContext::default();
        let value = GlobalPaintUniform {
            world_size: [1024.0, 1024.0],
            pixel_ratio: 1.0,
            zoom: 1.0,
        };
        let buffer = context.create_uniform_buffer(&value).expect("uniform buffer");
        assert_eq!(context.buffer_data(buffer), Some(bytemuck::bytes_of(&value)));
        assert_eq!(context.buffer_usage(buffer), Some(BufferUsage::Uniform));
    }
}
