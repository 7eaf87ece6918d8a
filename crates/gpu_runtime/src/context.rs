use render_protocol::{RenderPass, Size, TransformMatrix4x4};

use crate::config::GpuResourceConfig;
use crate::id::{BufferId, ProgramHandle, TextureId};
use crate::texture_pool::{Texture2DDesc, Texture2DPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Headless,
    Wgpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

/// Pixel rectangle inside a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn fits_in(&self, size: Size) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(size.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(size.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("texture {0:?} does not exist")]
    UnknownTexture(TextureId),
    #[error("region {region:?} exceeds texture size {size}")]
    RegionOutOfBounds { region: TextureRegion, size: Size },
    #[error("pixel data holds {actual} bytes, region needs {expected}")]
    PixelDataSize { expected: usize, actual: usize },
    #[error("buffer {0:?} does not exist")]
    UnknownBuffer(BufferId),
    #[error("buffer holds {capacity} bytes, update writes {actual}")]
    BufferOverflow { capacity: usize, actual: usize },
}

/// Per-frame counters reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderingStats {
    pub num_active_textures: usize,
    pub num_created_textures: u64,
    pub mem_textures: usize,
    pub num_buffers: usize,
    pub mem_buffers: usize,
    pub num_texture_updates: u64,
    pub num_buffer_updates: u64,
    pub num_draw_calls: u64,
}

/// One indexed draw as issued by a drawable segment.
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand<'a> {
    pub label: &'a str,
    pub program: ProgramHandle,
    pub textures: &'a [(u32, TextureId)],
    pub uniform_buffers: &'a [(u32, BufferId)],
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub index_offset: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    /// Draw only where the stencil buffer holds this value.
    pub stencil_ref: Option<u32>,
}

/// Writes `stencil_ref` into the stencil buffer over one tile's footprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingMaskCommand {
    pub tile_matrix: TransformMatrix4x4,
    pub stencil_ref: u32,
}

/// Backend entry point. Owned by the render thread.
///
/// Every 2D texture the backend hands out goes through its [`Texture2DPool`],
/// so releasing a texture only returns it to the pool. Storage is freed when
/// the pool evicts it or on [`Context::shrink_texture_pool`].
pub trait Context {
    fn backend_kind(&self) -> BackendKind;

    fn resource_config(&self) -> &GpuResourceConfig;

    fn create_texture_2d(&mut self, desc: Texture2DDesc) -> Option<TextureId>;

    fn release_texture_2d(&mut self, texture: TextureId);

    fn texture_pool(&self) -> &Texture2DPool;

    fn shrink_texture_pool(&mut self);

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId>;

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn rendering_stats(&self) -> RenderingStats;

    fn upload_pass(&mut self) -> Box<dyn UploadPass + '_>;

    fn render_pass(&mut self, pass: RenderPass) -> Box<dyn RenderPassEncoder + '_>;
}

/// Transfer scope for one frame. Writes become visible to later render passes.
pub trait UploadPass {
    fn create_texture_2d(&mut self, desc: Texture2DDesc) -> Option<TextureId>;

    fn write_texture_region(
        &mut self,
        texture: TextureId,
        region: TextureRegion,
        pixels: &[u8],
    ) -> Result<(), UploadError>;

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId>;

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError>;

    /// Frees a buffer that is being replaced by a larger one.
    fn destroy_buffer(&mut self, buffer: BufferId);
}

pub trait RenderPassEncoder {
    fn pass(&self) -> RenderPass;

    fn draw(&mut self, command: &DrawCommand<'_>);

    fn draw_clipping_mask(&mut self, mask: &ClippingMaskCommand);

    fn push_debug_group(&mut self, _label: &str) {}

    fn pop_debug_group(&mut self) {}
}

pub(crate) fn expected_region_bytes(desc: &Texture2DDesc, region: TextureRegion) -> usize {
    region.width as usize * region.height as usize * desc.bytes_per_pixel()
}
