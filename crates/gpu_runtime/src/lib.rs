//! GPU capability interface and resource pooling.
//!
//! Backends implement [`Context`], [`UploadPass`] and [`RenderPassEncoder`].
//! Everything above this crate talks to those traits only, so the pools and
//! drawable containers never see a concrete graphics API.
//!
//! Module overview:
//! - `id`: typed integer handles for textures, buffers and programs.
//! - `id_pool`: dense integer id allocator over sorted free ranges.
//! - `texture_pool`: shape-keyed texture reuse with global LRU eviction.
//! - `context`: the backend traits and rendering statistics.
//! - `headless`: in-memory backend that records every command.
//! - `wgpu_backend`: `wgpu` implementation (feature `wgpu-backend`).

mod config;
mod context;
mod headless;
mod id;
mod id_pool;
mod texture_pool;
#[cfg(feature = "wgpu-backend")]
mod wgpu_backend;

pub use config::GpuResourceConfig;
pub use context::{
    BackendKind, BufferUsage, ClippingMaskCommand, Context, DrawCommand, RenderPassEncoder,
    RenderingStats, TextureRegion, UploadError, UploadPass,
};
pub use headless::{HeadlessContext, RecordedCommand};
pub use id::{BufferId, Id, ProgramHandle, TextureId};
pub use id_pool::{IdPool, IdRange};
pub use texture_pool::{Texture2DDesc, Texture2DPool, TextureAllocator, TexturePoolCounters};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{WgpuContext, WgpuContextError};
