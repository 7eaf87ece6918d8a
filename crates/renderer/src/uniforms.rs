//! Uniform blocks and the per-drawable / per-group uniform buffer slots.

use gpu_runtime::{BufferId, BufferUsage, Context, UploadError, UploadPass};
use render_protocol::TransformMatrix4x4;
use smallvec::SmallVec;

/// Slot of the per-tile matrix block.
pub const TILE_UNIFORM_SLOT: u32 = 0;
/// Slot of the frame-wide paint block, set on layer groups.
pub const GLOBAL_PAINT_UNIFORM_SLOT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileUniform {
    pub matrix: TransformMatrix4x4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalPaintUniform {
    pub world_size: [f32; 2],
    pub pixel_ratio: f32,
    pub zoom: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformBuffer {
    data: Vec<u8>,
    buffer: Option<BufferId>,
    capacity: usize,
    dirty: bool,
}

/// Uniform blocks by binding slot, mirrored into GPU buffers on upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformBufferArray {
    slots: SmallVec<[Option<UniformBuffer>; 4]>,
}

impl UniformBufferArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: bytemuck::Pod>(&mut self, slot: u32, value: &T) {
        self.set_bytes(slot, bytemuck::bytes_of(value));
    }

    pub fn set_bytes(&mut self, slot: u32, bytes: &[u8]) {
        let index = slot as usize;
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        match &mut self.slots[index] {
            Some(uniform) if uniform.data == bytes => {}
            Some(uniform) => {
                uniform.data.clear();
                uniform.data.extend_from_slice(bytes);
                uniform.dirty = true;
            }
            empty => {
                *empty = Some(UniformBuffer {
                    data: bytes.to_vec(),
                    buffer: None,
                    capacity: 0,
                    dirty: true,
                });
            }
        }
    }

    pub fn get(&self, slot: u32) -> Option<&[u8]> {
        self.slots
            .get(slot as usize)?
            .as_ref()
            .map(|uniform| uniform.data.as_slice())
    }

    pub fn get_as<T: bytemuck::Pod>(&self, slot: u32) -> Option<T> {
        bytemuck::try_pod_read_unaligned(self.get(slot)?).ok()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn needs_upload(&self) -> bool {
        self.slots.iter().flatten().any(|uniform| uniform.dirty)
    }

    /// GPU buffers of every uploaded slot.
    pub fn bindings(&self) -> SmallVec<[(u32, BufferId); 4]> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, uniform)| Some((slot as u32, uniform.as_ref()?.buffer?)))
            .collect()
    }

    pub fn upload(&mut self, upload: &mut dyn UploadPass) -> Result<(), UploadError> {
        for (slot, uniform) in self.slots.iter_mut().enumerate() {
            let Some(uniform) = uniform.as_mut().filter(|uniform| uniform.dirty) else {
                continue;
            };
            match uniform.buffer {
                Some(buffer) if uniform.data.len() <= uniform.capacity => {
                    upload.update_buffer(buffer, &uniform.data)?;
                }
                previous => {
                    if let Some(buffer) = previous {
                        upload.destroy_buffer(buffer);
                    }
                    uniform.buffer = upload.create_buffer(BufferUsage::Uniform, &uniform.data);
                    if uniform.buffer.is_none() {
                        log::warn!("no uniform buffer for slot {slot}, retrying next frame");
                        continue;
                    }
                    uniform.capacity = uniform.data.len();
                }
            }
            uniform.dirty = false;
        }
        Ok(())
    }

    /// Destroys the GPU buffers. The CPU side stays and uploads again.
    pub fn release(&mut self, context: &mut dyn Context) {
        for uniform in self.slots.iter_mut().flatten() {
            if let Some(buffer) = uniform.buffer.take() {
                context.destroy_buffer(buffer);
                uniform.capacity = 0;
                uniform.dirty = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use gpu_runtime::HeadlessContext;

    use super::*;

    #[test]
    fn upload_creates_then_updates_in_place() {
        let mut context = HeadlessContext::default();
        let mut uniforms = UniformBufferArray::new();
        uniforms.set(
            TILE_UNIFORM_SLOT,
            &TileUniform {
                matrix: [1.0; 16],
            },
        );
        uniforms.upload(context.upload_pass().as_mut()).unwrap();
        let bindings = uniforms.bindings();
        assert_eq!(bindings.len(), 1);
        assert!(!uniforms.needs_upload());

        uniforms.set(
            TILE_UNIFORM_SLOT,
            &TileUniform {
                matrix: [2.0; 16],
            },
        );
        assert!(uniforms.needs_upload());
        uniforms.upload(context.upload_pass().as_mut()).unwrap();
        assert_eq!(uniforms.bindings(), bindings);

        let stored: TileUniform =
            bytemuck::pod_read_unaligned(context.buffer_data(bindings[0].1).unwrap());
        assert_eq!(stored.matrix, [2.0; 16]);
        uniforms.release(&mut context);
        assert_eq!(context.rendering_stats().num_buffers, 0);
    }

    #[test]
    fn growing_a_slot_replaces_its_buffer() {
        let mut context = HeadlessContext::default();
        let mut uniforms = UniformBufferArray::new();
        uniforms.set_bytes(2, &[1, 2, 3, 4]);
        uniforms.upload(context.upload_pass().as_mut()).unwrap();
        uniforms.set_bytes(2, &[0; 32]);
        uniforms.upload(context.upload_pass().as_mut()).unwrap();

        assert_eq!(context.rendering_stats().num_buffers, 1);
        let (slot, buffer) = uniforms.bindings()[0];
        assert_eq!(slot, 2);
        assert_eq!(context.buffer_data(buffer).map(<[u8]>::len), Some(32));
        assert_eq!(uniforms.get(0), None);
    }

    #[test]
    fn unchanged_values_do_not_dirty_the_slot() {
        let mut context = HeadlessContext::default();
        let mut uniforms = UniformBufferArray::new();
        let paint = GlobalPaintUniform {
            world_size: [512.0, 512.0],
            pixel_ratio: 2.0,
            zoom: 0.0,
        };
        uniforms.set(1, &paint);
        uniforms.upload(context.upload_pass().as_mut()).unwrap();
        uniforms.set(1, &paint);
        assert!(!uniforms.needs_upload());
        assert_eq!(uniforms.get_as::<GlobalPaintUniform>(1), Some(paint));
    }
}
