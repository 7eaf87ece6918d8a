//! GPU draw units and the builder that assembles them from bucket geometry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use atlas::DynamicTexture;
use gpu_runtime::{
    BufferId, BufferUsage, Context, DrawCommand, ProgramHandle, RenderPassEncoder, TextureId,
    UploadError, UploadPass,
};
use render_protocol::{DrawPriority, OverscaledTileId, RenderPass};
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::paint_parameters::PaintParameters;
use crate::uniforms::UniformBufferArray;

/// Process-wide unique drawable identity. Breaks priority ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(u64);

impl DrawableId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Texture bound to a sampler slot.
#[derive(Debug, Clone)]
pub enum TextureBinding {
    Texture(TextureId),
    /// Atlas page, resolved when drawing since its texture appears on the
    /// first deferred upload.
    Atlas(Arc<DynamicTexture>),
}

impl TextureBinding {
    fn resolve(&self) -> Option<TextureId> {
        match self {
            TextureBinding::Texture(texture) => Some(*texture),
            TextureBinding::Atlas(page) => page.texture_id(),
        }
    }
}

/// Range of the index buffer drawn with one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawSegment {
    pub index_offset: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GpuBuffer {
    id: BufferId,
    capacity: usize,
}

pub struct Drawable {
    id: DrawableId,
    name: SmolStr,
    render_pass: RenderPass,
    priority: DrawPriority,
    enabled: bool,
    program: Option<ProgramHandle>,
    tile_id: Option<OverscaledTileId>,
    textures: SmallVec<[(u32, TextureBinding); 4]>,
    uniform_buffers: UniformBufferArray,
    vertex_stride: usize,
    vertices: Vec<u8>,
    indices: Vec<u16>,
    segments: SmallVec<[DrawSegment; 1]>,
    vertex_buffer: Option<GpuBuffer>,
    index_buffer: Option<GpuBuffer>,
    geometry_dirty: bool,
}

impl Drawable {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            id: DrawableId::next(),
            name: name.into(),
            render_pass: RenderPass::empty(),
            priority: 0,
            enabled: true,
            program: None,
            tile_id: None,
            textures: SmallVec::new(),
            uniform_buffers: UniformBufferArray::new(),
            vertex_stride: 0,
            vertices: Vec::new(),
            indices: Vec::new(),
            segments: SmallVec::new(),
            vertex_buffer: None,
            index_buffer: None,
            geometry_dirty: false,
        }
    }

    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<SmolStr>) {
        self.name = name.into();
    }

    pub fn render_pass(&self) -> RenderPass {
        self.render_pass
    }

    pub fn set_render_pass(&mut self, render_pass: RenderPass) {
        self.render_pass = render_pass;
    }

    pub fn has_render_pass(&self, pass: RenderPass) -> bool {
        self.render_pass.intersects(pass)
    }

    pub fn priority(&self) -> DrawPriority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: DrawPriority) {
        self.priority = priority;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn set_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
    }

    pub fn tile_id(&self) -> Option<OverscaledTileId> {
        self.tile_id
    }

    pub fn set_tile_id(&mut self, tile_id: OverscaledTileId) {
        self.tile_id = Some(tile_id);
    }

    pub fn texture(&self, slot: u32) -> Option<&TextureBinding> {
        self.textures
            .iter()
            .find(|(bound, _)| *bound == slot)
            .map(|(_, binding)| binding)
    }

    pub fn set_texture(&mut self, slot: u32, binding: TextureBinding) {
        match self.textures.iter_mut().find(|(bound, _)| *bound == slot) {
            Some((_, existing)) => *existing = binding,
            None => self.textures.push((slot, binding)),
        }
    }

    pub fn uniform_buffers(&self) -> &UniformBufferArray {
        &self.uniform_buffers
    }

    pub fn uniform_buffers_mut(&mut self) -> &mut UniformBufferArray {
        &mut self.uniform_buffers
    }

    pub fn vertex_stride(&self) -> usize {
        self.vertex_stride
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len().checked_div(self.vertex_stride).unwrap_or(0)
    }

    pub fn segments(&self) -> &[DrawSegment] {
        &self.segments
    }

    /// Replaces the vertex payload. `stride` is the byte size of one vertex.
    pub fn set_vertices(&mut self, vertices: Vec<u8>, stride: usize) {
        assert!(
            stride > 0 && vertices.len() % stride == 0,
            "vertex data of {} bytes does not hold whole {stride} byte vertices",
            vertices.len()
        );
        self.vertices = vertices;
        self.vertex_stride = stride;
        self.geometry_dirty = true;
    }

    pub fn set_index_data(&mut self, indices: Vec<u16>, segments: impl IntoIterator<Item = DrawSegment>) {
        self.indices = indices;
        self.segments = segments.into_iter().collect();
        debug_assert!(
            self.segments
                .iter()
                .all(|segment| (segment.index_offset + segment.index_count) as usize
                    <= self.indices.len()),
            "segment exceeds the index data of {}",
            self.name
        );
        self.geometry_dirty = true;
    }

    pub fn needs_upload(&self) -> bool {
        self.geometry_dirty || self.uniform_buffers.needs_upload()
    }

    pub fn is_uploaded(&self) -> bool {
        self.vertex_buffer.is_some() && self.index_buffer.is_some() && !self.geometry_dirty
    }

    /// Mirrors dirty geometry and uniforms into GPU buffers.
    pub fn upload(&mut self, upload: &mut dyn UploadPass) -> Result<(), UploadError> {
        if self.geometry_dirty {
            let vertices = upload_buffer(upload, self.vertex_buffer, BufferUsage::Vertex, &self.vertices)?;
            let indices = upload_buffer(
                upload,
                self.index_buffer,
                BufferUsage::Index,
                bytemuck::cast_slice(&self.indices),
            )?;
            self.vertex_buffer = vertices;
            self.index_buffer = indices;
            self.geometry_dirty = vertices.is_none() || indices.is_none();
        }
        self.uniform_buffers.upload(upload)
    }

    /// Issues one draw per segment. Group uniforms fill the slots the
    /// drawable does not set itself. Tiled drawables test against their
    /// tile's clipping mask when one was drawn this pass.
    pub fn draw(
        &self,
        encoder: &mut dyn RenderPassEncoder,
        group_uniforms: &UniformBufferArray,
        parameters: &PaintParameters<'_>,
    ) -> usize {
        if !self.enabled {
            return 0;
        }
        let (Some(program), Some(vertices), Some(indices)) =
            (self.program, self.vertex_buffer, self.index_buffer)
        else {
            log::debug!("skipping drawable {} without program or buffers", self.name);
            return 0;
        };

        let mut textures = SmallVec::<[(u32, TextureId); 4]>::new();
        for (slot, binding) in &self.textures {
            let Some(texture) = binding.resolve() else {
                log::debug!("skipping drawable {}, texture slot {slot} not uploaded", self.name);
                return 0;
            };
            textures.push((*slot, texture));
        }

        let mut uniforms = self.uniform_buffers.bindings();
        for (slot, buffer) in group_uniforms.bindings() {
            if !uniforms.iter().any(|(bound, _)| *bound == slot) {
                uniforms.push((slot, buffer));
            }
        }

        let stencil_ref = parameters.stencil_ref_for(self.tile_id);
        for segment in &self.segments {
            encoder.draw(&DrawCommand {
                label: &self.name,
                program,
                textures: &textures,
                uniform_buffers: &uniforms,
                vertex_buffer: vertices.id,
                index_buffer: indices.id,
                index_offset: segment.index_offset,
                index_count: segment.index_count,
                base_vertex: segment.base_vertex,
                stencil_ref,
            });
        }
        self.segments.len()
    }

    /// Destroys the GPU buffers owned by this drawable.
    pub fn release(&mut self, context: &mut dyn Context) {
        for buffer in [self.vertex_buffer.take(), self.index_buffer.take()]
            .into_iter()
            .flatten()
        {
            context.destroy_buffer(buffer.id);
        }
        self.uniform_buffers.release(context);
        self.geometry_dirty = !self.vertices.is_empty();
    }
}

fn upload_buffer(
    upload: &mut dyn UploadPass,
    current: Option<GpuBuffer>,
    usage: BufferUsage,
    data: &[u8],
) -> Result<Option<GpuBuffer>, UploadError> {
    if let Some(buffer) = current {
        if data.len() <= buffer.capacity {
            upload.update_buffer(buffer.id, data)?;
            return Ok(Some(buffer));
        }
        upload.destroy_buffer(buffer.id);
    }
    let Some(id) = upload.create_buffer(usage, data) else {
        log::warn!("no {usage:?} buffer for {} bytes", data.len());
        return Ok(None);
    };
    Ok(Some(GpuBuffer {
        id,
        capacity: data.len(),
    }))
}

impl fmt::Debug for Drawable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Drawable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("render_pass", &self.render_pass)
            .field("priority", &self.priority)
            .field("tile_id", &self.tile_id)
            .finish_non_exhaustive()
    }
}

/// Accumulates geometry and shared state, then cuts it into drawables.
#[derive(Debug)]
pub struct DrawableBuilder {
    name: SmolStr,
    program: Option<ProgramHandle>,
    render_pass: RenderPass,
    priority: DrawPriority,
    tile_id: Option<OverscaledTileId>,
    textures: SmallVec<[(u32, TextureBinding); 4]>,
    vertex_stride: usize,
    vertices: Vec<u8>,
    indices: Vec<u16>,
    segments: SmallVec<[DrawSegment; 1]>,
    drawables: Vec<Drawable>,
}

impl DrawableBuilder {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            program: None,
            render_pass: RenderPass::TRANSLUCENT,
            priority: 0,
            tile_id: None,
            textures: SmallVec::new(),
            vertex_stride: 0,
            vertices: Vec::new(),
            indices: Vec::new(),
            segments: SmallVec::new(),
            drawables: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_program(&mut self, program: ProgramHandle) -> &mut Self {
        self.program = Some(program);
        self
    }

    pub fn set_render_pass(&mut self, render_pass: RenderPass) -> &mut Self {
        self.render_pass = render_pass;
        self
    }

    pub fn set_draw_priority(&mut self, priority: DrawPriority) -> &mut Self {
        self.priority = priority;
        self
    }

    pub fn set_tile_id(&mut self, tile_id: OverscaledTileId) -> &mut Self {
        self.tile_id = Some(tile_id);
        self
    }

    pub fn set_texture(&mut self, slot: u32, binding: TextureBinding) -> &mut Self {
        self.textures.retain(|(bound, _)| *bound != slot);
        self.textures.push((slot, binding));
        self
    }

    /// Appends one segment of geometry. Indices are relative to the first
    /// vertex of this segment.
    pub fn add_segment<V: bytemuck::Pod>(&mut self, vertices: &[V], indices: &[u16]) -> &mut Self {
        let stride = std::mem::size_of::<V>();
        if self.vertex_stride == 0 {
            self.vertex_stride = stride;
        }
        assert_eq!(
            self.vertex_stride, stride,
            "drawable builder {} mixes vertex layouts",
            self.name
        );
        let base_vertex = self.vertices.len() / stride;
        self.segments.push(DrawSegment {
            index_offset: self.indices.len() as u32,
            index_count: indices.len() as u32,
            base_vertex: base_vertex as i32,
        });
        self.vertices.extend_from_slice(bytemuck::cast_slice(vertices));
        self.indices.extend_from_slice(indices);
        self
    }

    pub fn has_geometry(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Turns the accumulated geometry into a drawable. Returns `false` when
    /// there was nothing to flush.
    pub fn flush(&mut self) -> bool {
        if !self.has_geometry() {
            return false;
        }
        let mut drawable = Drawable::new(self.name.clone());
        drawable.render_pass = self.render_pass;
        drawable.priority = self.priority;
        drawable.program = self.program;
        drawable.tile_id = self.tile_id;
        drawable.textures = self.textures.clone();
        drawable.set_vertices(std::mem::take(&mut self.vertices), self.vertex_stride);
        drawable.set_index_data(
            std::mem::take(&mut self.indices),
            std::mem::take(&mut self.segments),
        );
        self.vertex_stride = 0;
        self.drawables.push(drawable);
        true
    }

    pub fn take_drawables(&mut self) -> Vec<Drawable> {
        std::mem::take(&mut self.drawables)
    }
}

#[cfg(test)]
mod tests {
    use gpu_runtime::{HeadlessContext, RecordedCommand};

    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct FillVertex {
        position: [i16; 2],
    }

    fn quad() -> [FillVertex; 4] {
        [[0, 0], [1, 0], [0, 1], [1, 1]].map(|position| FillVertex { position })
    }

    #[test]
    fn builder_records_segments_with_base_vertices() {
        let mut builder = DrawableBuilder::new("fill");
        builder
            .set_program(ProgramHandle::new(1))
            .set_draw_priority(5)
            .add_segment(&quad(), &[0, 1, 2, 1, 3, 2])
            .add_segment(&quad(), &[0, 1, 2]);
        assert!(builder.flush());
        assert!(!builder.flush());

        let drawables = builder.take_drawables();
        assert_eq!(drawables.len(), 1);
        let drawable = &drawables[0];
        assert_eq!(drawable.vertex_count(), 8);
        assert_eq!(drawable.priority(), 5);
        assert!(drawable.has_render_pass(RenderPass::TRANSLUCENT));
        assert_eq!(
            drawable.segments(),
            &[
                DrawSegment {
                    index_offset: 0,
                    index_count: 6,
                    base_vertex: 0
                },
                DrawSegment {
                    index_offset: 6,
                    index_count: 3,
                    base_vertex: 4
                },
            ]
        );
    }

    #[test]
    fn drawables_get_distinct_ids() {
        assert_ne!(Drawable::new("a").id(), Drawable::new("a").id());
    }

    #[test]
    fn draw_needs_an_upload_first() {
        let mut context = HeadlessContext::default();
        let mut builder = DrawableBuilder::new("line");
        builder
            .set_program(ProgramHandle::new(3))
            .set_texture(0, TextureBinding::Texture(TextureId::new(7)))
            .add_segment(&quad(), &[0, 1, 2]);
        builder.flush();
        let mut drawable = builder.take_drawables().remove(0);

        let transform = tiles::TransformParameters::new(tiles::TransformState::default());
        let parameters = PaintParameters::new(&transform, &[]);
        let group_uniforms = UniformBufferArray::new();
        {
            let mut pass = context.render_pass(RenderPass::TRANSLUCENT);
            assert_eq!(drawable.draw(pass.as_mut(), &group_uniforms, &parameters), 0);
        }

        drawable.upload(context.upload_pass().as_mut()).unwrap();
        assert!(drawable.is_uploaded());
        {
            let mut pass = context.render_pass(RenderPass::TRANSLUCENT);
            assert_eq!(drawable.draw(pass.as_mut(), &group_uniforms, &parameters), 1);
        }
        let draws: Vec<_> = context
            .recorded_commands()
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Draw {
                    label,
                    textures,
                    index_count,
                    ..
                } => Some((label.clone(), textures.clone(), *index_count)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, [("line".to_owned(), vec![(0, TextureId::new(7))], 3)]);

        drawable.release(&mut context);
        assert_eq!(context.rendering_stats().num_buffers, 0);
    }

    #[test]
    fn disabled_drawables_do_not_draw() {
        let mut context = HeadlessContext::default();
        let mut drawable = Drawable::new("hidden");
        drawable.set_program(ProgramHandle::new(1));
        drawable.set_vertices(vec![0; 8], 4);
        drawable.set_index_data(
            vec![0, 1],
            [DrawSegment {
                index_offset: 0,
                index_count: 2,
                base_vertex: 0,
            }],
        );
        drawable.upload(context.upload_pass().as_mut()).unwrap();
        drawable.set_enabled(false);

        let transform = tiles::TransformParameters::new(tiles::TransformState::default());
        let parameters = PaintParameters::new(&transform, &[]);
        let mut pass = context.render_pass(RenderPass::TRANSLUCENT);
        assert_eq!(drawable.draw(pass.as_mut(), &UniformBufferArray::new(), &parameters), 0);
    }
}
