//! `wgpu` implementation of the capability interface.
//!
//! Uploads go straight to the queue. Draws issued through a
//! [`RenderPassEncoder`] are recorded and replayed onto a real render pass by
//! [`WgpuContext::submit_frame`], since one `wgpu::RenderPass` cannot outlive
//! the borrow of its target view.
//!
//! Bind group 0 of every registered pipeline follows one layout: uniform
//! buffer slot `n` at binding `n`, texture slot `n` at
//! `TEXTURE_BINDING_BASE + n`, and a shared linear sampler at
//! `SAMPLER_BINDING`.
//!
//! Clipping masks draw a tile-extent quad of `sint16x2` positions with the
//! program set through [`WgpuContext::set_clipping_mask_program`]. Its
//! uniform slot 0 holds the tile matrix and its stencil state should replace
//! with the reference value.

use std::collections::HashMap;

use render_protocol::{RenderPass, TextureChannelDataType, TexturePixelType};
use wgpu::util::DeviceExt;

use crate::config::GpuResourceConfig;
use crate::context::{
    BackendKind, BufferUsage, ClippingMaskCommand, Context, DrawCommand, RenderPassEncoder,
    RenderingStats, TextureRegion, UploadError, UploadPass, expected_region_bytes,
};
use crate::id::{BufferId, ProgramHandle, TextureId};
use crate::id_pool::IdPool;
use crate::texture_pool::{Texture2DDesc, Texture2DPool, TextureAllocator};

pub const TEXTURE_BINDING_BASE: u32 = 8;
pub const SAMPLER_BINDING: u32 = 15;

const TILE_EXTENT: i16 = 8192;
const CLIPPING_MASK_INDICES: [u16; 6] = [0, 1, 2, 1, 3, 2];

#[derive(Debug, thiserror::Error)]
pub enum WgpuContextError {
    #[error("no suitable adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

fn texture_format(desc: &Texture2DDesc) -> wgpu::TextureFormat {
    use TextureChannelDataType::{HalfFloat, UnsignedByte};
    match (desc.pixel_format, desc.channel_type) {
        (TexturePixelType::Alpha | TexturePixelType::Luminance, UnsignedByte) => {
            wgpu::TextureFormat::R8Unorm
        }
        (TexturePixelType::Alpha | TexturePixelType::Luminance, HalfFloat) => {
            wgpu::TextureFormat::R16Float
        }
        (TexturePixelType::Rgba, UnsignedByte) => wgpu::TextureFormat::Rgba8Unorm,
        (TexturePixelType::Rgba, HalfFloat) => wgpu::TextureFormat::Rgba16Float,
        (TexturePixelType::Depth, _) => wgpu::TextureFormat::Depth16Unorm,
        (TexturePixelType::Stencil, _) => wgpu::TextureFormat::Stencil8,
    }
}

fn texture_usage(desc: &Texture2DDesc) -> wgpu::TextureUsages {
    match desc.pixel_format {
        TexturePixelType::Depth | TexturePixelType::Stencil => {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        }
        _ => {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT
        }
    }
}

fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let base = match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
        BufferUsage::Index => wgpu::BufferUsages::INDEX,
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
    };
    base | wgpu::BufferUsages::COPY_DST
}

struct WgpuTexture {
    desc: Texture2DDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct WgpuTextures {
    device: wgpu::Device,
    ids: IdPool,
    textures: HashMap<TextureId, WgpuTexture>,
    created: u64,
}

impl TextureAllocator for WgpuTextures {
    fn allocate_texture(&mut self, desc: &Texture2DDesc) -> Option<TextureId> {
        let id = TextureId::new(self.ids.create_id()?);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gpu_runtime.texture_2d"),
            size: wgpu::Extent3d {
                width: desc.size.width.max(1),
                height: desc.size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc),
            usage: texture_usage(desc),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(
            id,
            WgpuTexture {
                desc: *desc,
                texture,
                view,
            },
        );
        self.created += 1;
        Some(id)
    }

    fn free_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
        let released = self.ids.destroy_id(id.raw());
        debug_assert!(released, "texture id {id:?} was not allocated");
    }
}

struct WgpuBuffer {
    usage: BufferUsage,
    buffer: wgpu::Buffer,
    len: usize,
}

struct PendingDraw {
    pass: RenderPass,
    label: String,
    program: ProgramHandle,
    textures: Vec<(u32, TextureId)>,
    uniform_buffers: Vec<(u32, BufferId)>,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    index_offset: u32,
    index_count: u32,
    base_vertex: i32,
    stencil_ref: Option<u32>,
}

enum PendingCommand {
    Draw(PendingDraw),
    ClippingMask(ClippingMaskCommand),
}

struct ClippingMaskQuad {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

pub struct WgpuContext {
    config: GpuResourceConfig,
    pool: Texture2DPool,
    textures: WgpuTextures,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    buffer_ids: IdPool,
    buffers: HashMap<BufferId, WgpuBuffer>,
    programs: HashMap<ProgramHandle, wgpu::RenderPipeline>,
    next_program: u32,
    clipping_mask_program: Option<ProgramHandle>,
    clipping_mask_quad: Option<ClippingMaskQuad>,
    pending: Vec<PendingCommand>,
    texture_updates: u64,
    buffer_updates: u64,
    draw_calls: u64,
}

impl WgpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: GpuResourceConfig) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("gpu_runtime.sampler.linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            config,
            pool: Texture2DPool::new(config.max_texture_pool_storage),
            textures: WgpuTextures {
                device,
                ids: IdPool::new(config.max_resource_id),
                textures: HashMap::new(),
                created: 0,
            },
            queue,
            sampler,
            buffer_ids: IdPool::new(config.max_resource_id),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            next_program: 0,
            clipping_mask_program: None,
            clipping_mask_quad: None,
            pending: Vec::new(),
            texture_updates: 0,
            buffer_updates: 0,
            draw_calls: 0,
        }
    }

    /// Context on a device without a surface, for offscreen rendering.
    pub fn new_headless(config: GpuResourceConfig) -> Result<Self, WgpuContextError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("gpu_runtime.headless_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await?;
            Ok(Self::new(device, queue, config))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.textures.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Registers a pipeline whose bind group 0 follows the module layout.
    pub fn register_program(&mut self, pipeline: wgpu::RenderPipeline) -> ProgramHandle {
        let handle = ProgramHandle::new(self.next_program);
        self.next_program = self
            .next_program
            .checked_add(1)
            .expect("program handle overflow");
        self.programs.insert(handle, pipeline);
        handle
    }

    /// Program used to write tile clipping masks. Masks recorded while no
    /// program is set are skipped on submit.
    pub fn set_clipping_mask_program(&mut self, program: ProgramHandle) {
        self.clipping_mask_program = Some(program);
    }

    pub fn texture_view(&self, texture: TextureId) -> Option<&wgpu::TextureView> {
        self.textures.textures.get(&texture).map(|texture| &texture.view)
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
            .get(&texture)
            .ok_or(UploadError::UnknownTexture(texture))?;
        if !region.fits_in(target.desc.size) {
            return Err(UploadError::RegionOutOfBounds {
                region,
                size: target.desc.size,
            });
        }
        let expected = expected_region_bytes(&target.desc, region);
        if pixels.len() != expected {
            return Err(UploadError::PixelDataSize {
                expected,
                actual: pixels.len(),
            });
        }
        if expected == 0 {
            return Ok(());
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * target.desc.bytes_per_pixel() as u32),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.texture_updates += 1;
        Ok(())
    }

    fn allocate_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferId> {
        let Some(raw) = self.buffer_ids.create_id() else {
            log::warn!("wgpu backend out of buffer ids");
            return None;
        };
        let buffer = self
            .textures
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpu_runtime.buffer"),
                contents: data,
                usage: buffer_usage(usage),
            });
        let id = BufferId::new(raw);
        self.buffers.insert(
            id,
            WgpuBuffer {
                usage,
                buffer,
                len: data.len(),
            },
        );
        Some(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), UploadError> {
        let target = self
            .buffers
            .get(&buffer)
            .ok_or(UploadError::UnknownBuffer(buffer))?;
        if data.len() > target.len {
            return Err(UploadError::BufferOverflow {
                capacity: target.len,
                actual: data.len(),
            });
        }
        let alignment = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        if data.len() % alignment == 0 {
            self.queue.write_buffer(&target.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().next_multiple_of(alignment), 0);
            self.queue.write_buffer(&target.buffer, 0, &padded);
        }
        self.buffer_updates += 1;
        Ok(())
    }

    /// Replays the commands recorded since the last submit onto `target`.
    ///
    /// Commands run in recording order. `stencil` is cleared to zero before
    /// the first clipping mask writes into it; without it stencil references
    /// have no effect. A command naming an unknown program or resource is
    /// skipped with a warning.
    pub fn submit_frame(&mut self, target: &wgpu::TextureView, stencil: Option<&wgpu::TextureView>) {
        let commands = std::mem::take(&mut self.pending);
        if commands
            .iter()
            .any(|command| matches!(command, PendingCommand::ClippingMask(_)))
        {
            self.ensure_clipping_mask_quad();
        }

        let device = &self.textures.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("gpu_runtime.frame"),
        });

        let bind_groups: Vec<Option<wgpu::BindGroup>> = commands
            .iter()
            .map(|command| match command {
                PendingCommand::Draw(draw) => self.create_bind_group(draw),
                PendingCommand::ClippingMask(mask) => self.create_clipping_mask_bind_group(mask),
            })
            .collect();

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gpu_runtime.frame_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: stencil.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: None,
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(0),
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for (command, bind_group) in commands.iter().zip(&bind_groups) {
                let Some(bind_group) = bind_group else {
                    continue;
                };
                match command {
                    PendingCommand::Draw(draw) => {
                        let (Some(pipeline), Some(vertices), Some(indices)) = (
                            self.programs.get(&draw.program),
                            self.buffers.get(&draw.vertex_buffer),
                            self.buffers.get(&draw.index_buffer),
                        ) else {
                            log::warn!("skipping draw '{}': unknown program or buffer", draw.label);
                            continue;
                        };
                        render_pass.push_debug_group(&draw.label);
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_bind_group(0, bind_group, &[]);
                        render_pass.set_stencil_reference(draw.stencil_ref.unwrap_or(0));
                        render_pass.set_vertex_buffer(0, vertices.buffer.slice(..));
                        render_pass
                            .set_index_buffer(indices.buffer.slice(..), wgpu::IndexFormat::Uint16);
                        render_pass.draw_indexed(
                            draw.index_offset..draw.index_offset + draw.index_count,
                            draw.base_vertex,
                            0..1,
                        );
                        render_pass.pop_debug_group();
                        log::trace!("{} draw '{}'", draw.pass, draw.label);
                    }
                    PendingCommand::ClippingMask(mask) => {
                        let pipeline = self
                            .clipping_mask_program
                            .and_then(|program| self.programs.get(&program));
                        let (Some(pipeline), Some(quad)) = (pipeline, &self.clipping_mask_quad)
                        else {
                            continue;
                        };
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_bind_group(0, bind_group, &[]);
                        render_pass.set_stencil_reference(mask.stencil_ref);
                        render_pass.set_vertex_buffer(0, quad.vertices.slice(..));
                        render_pass.set_index_buffer(quad.indices.slice(..), wgpu::IndexFormat::Uint16);
                        render_pass.draw_indexed(0..CLIPPING_MASK_INDICES.len() as u32, 0, 0..1);
                    }
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
    }

    fn ensure_clipping_mask_quad(&mut self) {
        if self.clipping_mask_quad.is_some() {
            return;
        }
        let corners: [[i16; 2]; 4] = [
            [0, 0],
            [TILE_EXTENT, 0],
            [0, TILE_EXTENT],
            [TILE_EXTENT, TILE_EXTENT],
        ];
        let vertices: Vec<u8> = corners
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let indices: Vec<u8> = CLIPPING_MASK_INDICES
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let device = &self.textures.device;
        self.clipping_mask_quad = Some(ClippingMaskQuad {
            vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpu_runtime.clipping_mask.vertices"),
                contents: &vertices,
                usage: wgpu::BufferUsages::VERTEX,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpu_runtime.clipping_mask.indices"),
                contents: &indices,
                usage: wgpu::BufferUsages::INDEX,
            }),
        });
    }

    fn create_clipping_mask_bind_group(&self, mask: &ClippingMaskCommand) -> Option<wgpu::BindGroup> {
        let Some(pipeline) = self
            .clipping_mask_program
            .and_then(|program| self.programs.get(&program))
        else {
            log::warn!("skipping clipping mask {}: no mask program", mask.stencil_ref);
            return None;
        };
        let device = &self.textures.device;
        let matrix: Vec<u8> = mask
            .tile_matrix
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("gpu_runtime.clipping_mask.matrix"),
            contents: &matrix,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gpu_runtime.clipping_mask"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            }],
        }))
    }

    fn create_bind_group(&self, draw: &PendingDraw) -> Option<wgpu::BindGroup> {
        let Some(pipeline) = self.programs.get(&draw.program) else {
            log::warn!("skipping draw '{}': unknown program {:?}", draw.label, draw.program);
            return None;
        };
        let mut entries = Vec::with_capacity(draw.uniform_buffers.len() + draw.textures.len() + 1);
        for (slot, buffer) in &draw.uniform_buffers {
            let Some(buffer) = self.buffers.get(buffer) else {
                log::warn!("skipping draw '{}': unknown uniform buffer {buffer:?}", draw.label);
                return None;
            };
            debug_assert_eq!(buffer.usage, BufferUsage::Uniform);
            entries.push(wgpu::BindGroupEntry {
                binding: *slot,
                resource: buffer.buffer.as_entire_binding(),
            });
        }
        for (slot, texture) in &draw.textures {
            let Some(texture) = self.textures.textures.get(texture) else {
                log::warn!("skipping draw '{}': unknown texture {texture:?}", draw.label);
                return None;
            };
            entries.push(wgpu::BindGroupEntry {
                binding: TEXTURE_BINDING_BASE + slot,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
        }
        if !draw.textures.is_empty() {
            entries.push(wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        Some(
            self.textures
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(draw.label.as_str()),
                    layout: &pipeline.get_bind_group_layout(0),
                    entries: &entries,
                }),
        )
    }
}

impl Context for WgpuContext {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Wgpu
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
        if let Some(removed) = self.buffers.remove(&buffer) {
            removed.buffer.destroy();
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
            mem_buffers: self.buffers.values().map(|buffer| buffer.len).sum(),
            num_texture_updates: self.texture_updates,
            num_buffer_updates: self.buffer_updates,
            num_draw_calls: self.draw_calls,
        }
    }

    fn upload_pass(&mut self) -> Box<dyn UploadPass + '_> {
        Box::new(WgpuUploadPass { context: self })
    }

    fn render_pass(&mut self, pass: RenderPass) -> Box<dyn RenderPassEncoder + '_> {
        Box::new(WgpuRenderPass {
            context: self,
            pass,
        })
    }
}

impl Drop for WgpuContext {
    fn drop(&mut self) {
        self.pool.shrink(&mut self.textures);
    }
}

struct WgpuUploadPass<'a> {
    context: &'a mut WgpuContext,
}

impl UploadPass for WgpuUploadPass<'_> {
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

struct WgpuRenderPass<'a> {
    context: &'a mut WgpuContext,
    pass: RenderPass,
}

impl RenderPassEncoder for WgpuRenderPass<'_> {
    fn pass(&self) -> RenderPass {
        self.pass
    }

    fn draw(&mut self, command: &DrawCommand<'_>) {
        self.context.draw_calls += 1;
        self.context.pending.push(PendingCommand::Draw(PendingDraw {
            pass: self.pass,
            label: command.label.to_owned(),
            program: command.program,
            textures: command.textures.to_vec(),
            uniform_buffers: command.uniform_buffers.to_vec(),
            vertex_buffer: command.vertex_buffer,
            index_buffer: command.index_buffer,
            index_offset: command.index_offset,
            index_count: command.index_count,
            base_vertex: command.base_vertex,
            stencil_ref: command.stencil_ref,
        }));
    }

    fn draw_clipping_mask(&mut self, mask: &ClippingMaskCommand) {
        self.context.draw_calls += 1;
        self.context.pending.push(PendingCommand::ClippingMask(*mask));
    }
}
