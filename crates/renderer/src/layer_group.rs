//! Drawable containers for one rendered style layer.
//!
//! A layer group is a layer-like group of drawables, not a group of layers.
//! [`TileLayerGroup`](crate::TileLayerGroup) keys its drawables by tile,
//! [`LayerGroup`] keeps a flat priority-ordered set for layers that are not
//! tiled (background, custom).

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use gpu_runtime::{Context, RenderPassEncoder, UploadError, UploadPass};
use render_protocol::{DrawPriority, RenderPass};
use smol_str::SmolStr;

use crate::drawable::{Drawable, DrawableId};
use crate::paint_parameters::PaintParameters;
use crate::uniforms::UniformBufferArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerGroupKind {
    LayerGroup,
    TileLayerGroup,
}

/// Per-frame hook owned by the render layer that updates a group's uniforms.
pub trait LayerTweaker: Send + Sync {
    fn execute(&self, group: &mut dyn LayerGroupBase, parameters: &PaintParameters<'_>);
}

/// State shared by every layer group kind.
pub struct LayerGroupState {
    kind: LayerGroupKind,
    pub(crate) enabled: bool,
    pub(crate) name: SmolStr,
    layer_index: i32,
    pub(crate) uniform_buffers: UniformBufferArray,
    layer_tweakers: Vec<Weak<dyn LayerTweaker>>,
}

impl LayerGroupState {
    pub fn new(kind: LayerGroupKind, layer_index: i32, name: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            enabled: true,
            name: name.into(),
            layer_index,
            uniform_buffers: UniformBufferArray::new(),
            layer_tweakers: Vec::new(),
        }
    }
}

pub trait LayerGroupBase {
    fn state(&self) -> &LayerGroupState;

    fn state_mut(&mut self) -> &mut LayerGroupState;

    fn drawable_count(&self) -> usize;

    /// Drops every drawable and releases its GPU buffers.
    fn clear_drawables(&mut self, context: &mut dyn Context) -> usize;

    /// Visits every drawable in draw order.
    fn visit_drawables(&self, visit: &mut dyn FnMut(&Drawable)) -> usize;

    /// Visits every drawable mutably. Priority changes take effect for the
    /// next traversal.
    fn observe_all_drawables(&mut self, observe: &mut dyn FnMut(&mut Drawable)) -> usize;

    /// Called during the upload pass.
    fn upload(&mut self, upload: &mut dyn UploadPass) -> Result<(), UploadError>;

    /// Called during each render pass. Returns the number of draw calls.
    fn render(
        &mut self,
        encoder: &mut dyn RenderPassEncoder,
        parameters: &mut PaintParameters<'_>,
    ) -> usize;

    /// Called before starting each frame.
    fn pre_render(&mut self, _parameters: &PaintParameters<'_>) {}

    /// Called at the end of each frame.
    fn post_render(&mut self, _parameters: &PaintParameters<'_>) {}

    fn kind(&self) -> LayerGroupKind {
        self.state().kind
    }

    fn is_empty(&self) -> bool {
        self.drawable_count() == 0
    }

    fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.state_mut().enabled = enabled;
    }

    fn name(&self) -> &str {
        &self.state().name
    }

    fn set_name(&mut self, name: &str) {
        self.state_mut().name = SmolStr::new(name);
    }

    fn layer_index(&self) -> i32 {
        self.state().layer_index
    }

    fn update_layer_index(&mut self, layer_index: i32) {
        self.state_mut().layer_index = layer_index;
    }

    fn uniform_buffers(&self) -> &UniformBufferArray {
        &self.state().uniform_buffers
    }

    fn uniform_buffers_mut(&mut self) -> &mut UniformBufferArray {
        &mut self.state_mut().uniform_buffers
    }

    /// The group only keeps a weak reference; the tweaker's owner controls
    /// its lifetime.
    fn add_layer_tweaker(&mut self, tweaker: &Arc<dyn LayerTweaker>) {
        self.state_mut().layer_tweakers.push(Arc::downgrade(tweaker));
    }

    fn layer_tweaker_count(&self) -> usize {
        self.state().layer_tweakers.len()
    }
}

impl dyn LayerGroupBase + '_ {
    /// Runs every live tweaker once and forgets the dropped ones.
    pub fn run_tweakers(&mut self, parameters: &PaintParameters<'_>) -> usize {
        let mut live = Vec::new();
        self.state_mut().layer_tweakers.retain(|weak| match weak.upgrade() {
            Some(tweaker) => {
                live.push(tweaker);
                true
            }
            None => false,
        });
        for tweaker in &live {
            tweaker.execute(self, parameters);
        }
        live.len()
    }
}

fn draw_all<'a>(
    drawables: impl Iterator<Item = &'a Drawable>,
    encoder: &mut dyn RenderPassEncoder,
    group_uniforms: &UniformBufferArray,
    parameters: &PaintParameters<'_>,
) -> usize {
    let pass = encoder.pass();
    drawables
        .filter(|drawable| drawable.has_render_pass(pass))
        .map(|drawable| drawable.draw(encoder, group_uniforms, parameters))
        .sum()
}

pub(crate) fn upload_all<'a>(
    drawables: impl Iterator<Item = &'a mut Drawable>,
    upload: &mut dyn UploadPass,
) -> Result<(), UploadError> {
    for drawable in drawables {
        if drawable.is_enabled() && drawable.needs_upload() {
            drawable.upload(upload)?;
        }
    }
    Ok(())
}

pub(crate) fn render_drawables<'a>(
    state: &LayerGroupState,
    drawables: impl Iterator<Item = &'a Drawable>,
    encoder: &mut dyn RenderPassEncoder,
    parameters: &PaintParameters<'_>,
) -> usize {
    if !state.enabled {
        return 0;
    }
    encoder.push_debug_group(&state.name);
    let draws = draw_all(drawables, encoder, &state.uniform_buffers, parameters);
    encoder.pop_debug_group();
    draws
}

/// Drawables of a non-tiled layer, ordered by priority.
pub struct LayerGroup {
    state: LayerGroupState,
    drawables: BTreeMap<(DrawPriority, DrawableId), Drawable>,
}

impl LayerGroup {
    pub fn new(layer_index: i32, name: impl Into<SmolStr>) -> Self {
        Self {
            state: LayerGroupState::new(LayerGroupKind::LayerGroup, layer_index, name),
            drawables: BTreeMap::new(),
        }
    }

    pub fn add_drawable(&mut self, drawable: Drawable) {
        let key = (drawable.priority(), drawable.id());
        let previous = self.drawables.insert(key, drawable);
        debug_assert!(previous.is_none(), "drawable {key:?} added twice");
    }

    pub fn drawable_count_for(&self, pass: RenderPass) -> usize {
        self.drawables
            .values()
            .filter(|drawable| drawable.has_render_pass(pass))
            .count()
    }

    /// Takes out every drawable that takes part in `pass`.
    pub fn remove_drawables(&mut self, pass: RenderPass) -> Vec<Drawable> {
        let (removed, kept) = std::mem::take(&mut self.drawables)
            .into_iter()
            .partition::<BTreeMap<_, _>, _>(|(_, drawable)| drawable.has_render_pass(pass));
        self.drawables = kept;
        removed.into_values().collect()
    }

    /// Calls `observe` on every drawable and drops those for which it
    /// returns `false`, releasing their GPU buffers. Returns the number
    /// dropped.
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
        let before = self.drawables.len();
        let mut kept = BTreeMap::new();
        for (_, mut drawable) in std::mem::take(&mut self.drawables) {
            if observe(&mut drawable) {
                kept.insert((drawable.priority(), drawable.id()), drawable);
            } else {
                removed(drawable);
            }
        }
        self.drawables = kept;
        before - self.drawables.len()
    }
}

impl LayerGroupBase for LayerGroup {
    fn state(&self) -> &LayerGroupState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LayerGroupState {
        &mut self.state
    }

    fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    fn clear_drawables(&mut self, context: &mut dyn Context) -> usize {
        let count = self.drawables.len();
        for (_, mut drawable) in std::mem::take(&mut self.drawables) {
            drawable.release(context);
        }
        count
    }

    fn visit_drawables(&self, visit: &mut dyn FnMut(&Drawable)) -> usize {
        for drawable in self.drawables.values() {
            visit(drawable);
        }
        self.drawables.len()
    }

    fn observe_all_drawables(&mut self, observe: &mut dyn FnMut(&mut Drawable)) -> usize {
        self.retain_drawables(
            |drawable| {
                observe(drawable);
                true
            },
            |_| {},
        );
        self.drawables.len()
    }

    fn upload(&mut self, upload: &mut dyn UploadPass) -> Result<(), UploadError> {
        self.state.uniform_buffers.upload(upload)?;
        upload_all(self.drawables.values_mut(), upload)
    }

    fn render(
        &mut self,
        encoder: &mut dyn RenderPassEncoder,
        parameters: &mut PaintParameters<'_>,
    ) -> usize {
        render_drawables(&self.state, self.drawables.values(), encoder, parameters)
    }
}
