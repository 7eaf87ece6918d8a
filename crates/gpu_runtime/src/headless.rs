//! In-memory backend.
//!
//! Textures and buffers are byte vectors, draws are recorded instead of
//! executed. Used for offscreen validation and as the test double for
//! everything built on [`Context`].

use std::collections::HashMap;

use render_protocol::RenderPass;

use crate::config::GpuResourceConfig;
use crate::context::{
    BackendKind, BufferUsage, ClippingMaskCommand, Context, DrawCommand, RenderPassEncoder,
    RenderingStats, TextureRegion, UploadError, UploadPass, expected_region_bytes,
};
use crate::id::{BufferId, ProgramHandle, TextureId};
use crate::id_pool::IdPool;
use crate::texture_pool::{Texture2DDesc, Texture2DPool, TextureAllocator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    TextureWrite {
        texture: TextureId,
        region: TextureRegion,
    },
    BufferCreate {
        buffer: BufferId,
        usage: BufferUsage,
        len: usize,
    },
    BufferUpdate {
        buffer: BufferId,
        len: usize,
    },
    Draw {
        pass: RenderPass,
        label: String,
        program: ProgramHandle,
        textures: Vec<(u32, TextureId)>,
        index_count: u32,
        stencil_ref: Option<u32>,
    },
    ClippingMask {
        pass: RenderPass,
        stencil_ref: u32,
    },
    DebugGroup(String),
}

struct HeadlessTexture {
    desc: Texture2DDesc,
    // Allocated on first write.
    pixels: Vec<u8>,
}

struct HeadlessTextures {
    ids: IdPool,
    textures: HashMap<TextureId, HeadlessTexture>,
    created: u64,
}

impl TextureAllocator for HeadlessTextures {
    fn allocate_texture(&mut self, desc: &Texture2DDesc) -> Option<TextureId> {
        let texture = TextureId::new(self.ids.create_id()?);
        self.textures.insert(
            texture,
            HeadlessTexture {
                desc: *desc,
                pixels: Vec::new(),
            },
        );
        self.created += 1;
        Some(texture)
    }

    fn free_texture(&mut self, texture: TextureId) {
        let removed = self.textures.remove(&texture);
        debug_assert!(removed.is_some(), "freed unknown texture {texture:?}");
        let released = self.ids.destroy_id(texture.raw());
        debug_assert!(released, "texture id {texture:?} was not allocated");
    }
}

struct HeadlessBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

pub struct HeadlessContext {
    config: GpuResourceConfig,
    pool: Texture2DPool,
    textures: HeadlessTextures,
    buffer_ids: IdPool,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    commands: Vec<RecordedCommand>,
    texture_updates: u64,
    buffer_updates: u64,
    draw_calls: u64,
}

impl HeadlessContext {
    pub fn new(config: GpuResourceConfig) -> Self {
        Self {
            config,
            pool: Texture2DPool::new(config.max_texture_pool_storage),
            textures: HeadlessTextures {
                ids: IdPool::new(config.max_resource_id),
                textures: HashMap::new(),
                created: 0,
            },
            buffer_ids: IdPool::new(config.max_resource_id),
            buffers: HashMap::new(),
            commands: Vec::new(),
            texture_updates: 0,
            buffer_updates: 0,
            draw_calls: 0,
        }
    }

    /// Contents of a texture, `None` when it was never written.
    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures
            .textures
            .get(&texture)
            .filter(|texture| !texture.pixels.is_empty())
            .map(|texture| texture.pixels.as_slice())
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|buffer| buffer.data.as_slice())
    }

    pub fn buffer_usage(&self, buffer: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&buffer).map(|buffer| buffer.usage)
    }

    pub fn recorded_commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_recorded_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Labels of recorded draws, in submission order.
    pub fn draw_labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Draw { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        region: TextureRegion,
        pixels: &[u8],
    ) -> Result<(), UploadError> {
        let target = self
            .textures
            .textures
            .get_mut(&texture)
            .ok_or(UploadError::UnknownTexture(texture))?;
        let desc = target.desc;
        if !region.fits_in(desc.size) {
            return Err(UploadError::RegionOutOfBounds {
                region,
                size: desc.size,
            });
        }
        let expected = expected_region_bytes(&desc, region);
        if pixels.len() != expected {
            return Err(UploadError::PixelDataSize {
                expected,
                actual: pixels.len(),
            });
        }

        if target.pixels.is_empty() {
            target.pixels = vec![0; desc.storage_size()];
        }
        let bytes_per_pixel = desc.bytes_per_pixel();
        let row_bytes = region.width as usize * bytes_per_pixel;
        let stride = desc.size.width as usize * bytes_per_pixel;
        if row_bytes > 0 {
            for (row, source) in pixels.chunks_exact(row_bytes).enumerate() {
                let start = (region.y as usize + row) * stride + region.x as usize * bytes_per_pixel;
                target.pixels[start..start + row_bytes].copy_from_slice(source);
            }
        }

        self.texture_updates += 1;
        self.commands
            .push(RecordedCommand::TextureWrite { texture, region });
        Ok(())
    }

    fn allocate_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId> {
        let Some(raw) = self.buffer_ids.create_id() else {
            log::warn!("headless backend out of buffer ids");
            return None;
        };
        let buffer = BufferId::new(raw);
        self.buffers.insert(
            buffer,
            HeadlessBuffer {
                usage,
                data: data.to_vec(),
            },
        );
        self.commands.push(RecordedCommand::BufferCreate {
            buffer,
            usage,
            len: data.len(),
        });
        Some(buffer)
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(UploadError::UnknownBuffer(buffer))?;
        if data.len() > target.data.len() {
            return Err(UploadError::BufferOverflow {
                capacity: target.data.len(),
                actual: data.len(),
            });
        }
        target.data[..data.len()].copy_from_slice(data);
        self.buffer_updates += 1;
        self.commands.push(RecordedCommand::BufferUpdate {
            buffer,
            len: data.len(),
        });
        Ok(())
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new(GpuResourceConfig::default())
    }
}

impl Context for HeadlessContext {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn resource_config(&self) -> &GpuResourceConfig {
        &self.config
    }

    fn create_texture_2d(&mut self, desc: Texture2DDesc) -> Option<TextureId> {
        self.pool.alloc(&mut self.textures, &desc)
    }

    fn release_texture_2d(&mut self, texture: TextureId) {
        self.pool.release(&mut self.textures, texture);
    }

    fn texture_pool(&self) -> &Texture2DPool {
        &self.pool
    }

    fn shrink_texture_pool(&mut self) {
        self.pool.shrink(&mut self.textures);
    }

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId> {
        self.allocate_buffer(usage, data)
    }

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError> {
        self.write_buffer(buffer, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            let released = self.buffer_ids.destroy_id(buffer.raw());
            debug_assert!(released, "buffer id {buffer:?} was not allocated");
        }
    }

    fn rendering_stats(&self) -> RenderingStats {
        RenderingStats {
            num_active_textures: self.pool.pooled_count(),
            num_created_textures: self.textures.created,
            mem_textures: self.pool.pool_storage(),
            num_buffers: self.buffers.len(),
            mem_buffers: self.buffers.values().map(|buffer| buffer.data.len()).sum(),
            num_texture_updates: self.texture_updates,
            num_buffer_updates: self.buffer_updates,
            num_draw_calls: self.draw_calls,
        }
    }

    fn upload_pass(&mut self) -> Box<dyn UploadPass + '_> {
        Box::new(HeadlessUploadPass { context: self })
    }

    fn render_pass(&mut self, pass: RenderPass) -> Box<dyn RenderPassEncoder + '_> {
        Box::new(HeadlessRenderPass {
            context: self,
            pass,
        })
    }
}

impl Drop for HeadlessContext {
    fn drop(&mut self) {
        self.pool.shrink(&mut self.textures);
    }
}

struct HeadlessUploadPass<'a> {
    context: &'a mut HeadlessContext,
}

impl UploadPass for HeadlessUploadPass<'_> {
    fn create_texture_2d(&mut self, desc: Texture2DDesc) -> Option<TextureId> {
        self.context.create_texture_2d(desc)
    }

    fn write_texture_region(
        &mut self,
        texture: TextureId,
        region: TextureRegion,
        pixels: &[u8],
    ) -> Result<(), UploadError> {
        self.context.write_texture(texture, region, pixels)
    }

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId> {
        self.context.allocate_buffer(usage, data)
    }

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError> {
        self.context.write_buffer(buffer, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        Context::destroy_buffer(&mut *self.context, buffer);
    }
}

struct HeadlessRenderPass<'a> {
    context: &'a mut HeadlessContext,
    pass: RenderPass,
}

impl RenderPassEncoder for HeadlessRenderPass<'_> {
    fn pass(&self) -> RenderPass {
        self.pass
    }

    fn draw(&mut self, command: &DrawCommand<'_>) {
        self.context.draw_calls += 1;
        self.context.commands.push(RecordedCommand::Draw {
            pass: self.pass,
            label: command.label.to_owned(),
            program: command.program,
            textures: command.textures.to_vec(),
            index_count: command.index_count,
            stencil_ref: command.stencil_ref,
        });
    }

    fn draw_clipping_mask(&mut self, mask: &ClippingMaskCommand) {
        self.context.draw_calls += 1;
        self.context.commands.push(RecordedCommand::ClippingMask {
            pass: self.pass,
            stencil_ref: mask.stencil_ref,
        });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.context
            .commands
            .push(RecordedCommand::DebugGroup(label.to_owned()));
    }
}
