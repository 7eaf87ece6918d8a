//! One shared texture and the shelf packer that places sub-images in it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use etagere::{AllocId, AtlasAllocator, size2};
use gpu_runtime::{Texture2DDesc, TextureId, TextureRegion, UploadError, UploadPass};
use render_protocol::{Size, TextureChannelDataType, TexturePixelType};

use crate::TextureRect;

/// Placement of one sub-image inside a [`DynamicTexture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    key: u64,
    rect: TextureRect,
    needs_upload: bool,
}

impl TextureHandle {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn rect(&self) -> TextureRect {
        self.rect
    }

    /// Only the first reservation of a key uploads pixels.
    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }
}

struct Reservation {
    alloc_id: AllocId,
    rect: TextureRect,
    ref_count: u32,
}

struct DeferredUpload {
    key: u64,
    rect: TextureRect,
    pixels: Vec<u8>,
}

struct DynamicTextureState {
    allocator: AtlasAllocator,
    reservations: HashMap<u64, Reservation>,
    deferred: Vec<DeferredUpload>,
    texture: Option<TextureId>,
}

pub struct DynamicTexture {
    size: Size,
    pixel_format: TexturePixelType,
    state: Mutex<DynamicTextureState>,
}

impl DynamicTexture {
    pub fn new(size: Size, pixel_format: TexturePixelType) -> Self {
        Self {
            size,
            pixel_format,
            state: Mutex::new(DynamicTextureState {
                allocator: AtlasAllocator::new(size2(size.width as i32, size.height as i32)),
                reservations: HashMap::new(),
                deferred: Vec::new(),
                texture: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DynamicTextureState> {
        self.state.lock().expect("dynamic texture lock poisoned")
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixel_format(&self) -> TexturePixelType {
        self.pixel_format
    }

    pub fn desc(&self) -> Texture2DDesc {
        Texture2DDesc::new(
            self.size,
            self.pixel_format,
            TextureChannelDataType::UnsignedByte,
        )
    }

    /// GPU texture backing this atlas page, once the first upload created it.
    pub fn texture_id(&self) -> Option<TextureId> {
        self.lock().texture
    }

    pub fn is_empty(&self) -> bool {
        self.lock().reservations.is_empty()
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.lock().deferred.len()
    }

    /// Reserves a `size` bin for content identified by `key`.
    ///
    /// Reserving a key that is already placed returns the existing bin and
    /// bumps its reference count.
    pub fn reserve_size(&self, size: Size, key: u64) -> Option<TextureHandle> {
        reserve(&mut self.lock(), size, key)
    }

    /// Reserves every request or none of them.
    pub fn reserve_all(&self, requests: &[(Size, u64)]) -> Option<Vec<TextureHandle>> {
        let mut state = self.lock();
        let mut handles = Vec::with_capacity(requests.len());
        for &(size, key) in requests {
            match reserve(&mut state, size, key) {
                Some(handle) => handles.push(handle),
                None => {
                    for handle in &handles {
                        remove(&mut state, handle);
                    }
                    return None;
                }
            }
        }
        Some(handles)
    }

    /// Drops one reference to the handle's bin, freeing it with the last one.
    pub fn remove_texture(&self, handle: &TextureHandle) -> bool {
        remove(&mut self.lock(), handle)
    }

    /// Queues `pixels` for the handle's bin until the next
    /// [`DynamicTexture::upload_deferred_images`].
    pub fn upload_image(&self, pixels: Vec<u8>, handle: &TextureHandle) {
        let expected =
            handle.rect.w as usize * handle.rect.h as usize * self.desc().bytes_per_pixel();
        assert_eq!(
            pixels.len(),
            expected,
            "image for bin {:?} must hold {expected} bytes",
            handle.rect
        );
        self.lock().deferred.push(DeferredUpload {
            key: handle.key,
            rect: handle.rect,
            pixels,
        });
    }

    /// Writes every queued image, creating the GPU texture on first use.
    ///
    /// Returns the number of images written. When no texture can be created
    /// the queue is kept for the next frame. A failed write leaves it and
    /// every later image queued.
    pub fn upload_deferred_images(&self, upload: &mut dyn UploadPass) -> Result<usize, UploadError> {
        let mut state = self.lock();
        if state.deferred.is_empty() {
            return Ok(0);
        }
        let Some(texture) = self.texture_or_create(&mut state, upload) else {
            log::warn!(
                "no texture for {} {:?} atlas page, {} images deferred",
                self.size,
                self.pixel_format,
                state.deferred.len()
            );
            return Ok(0);
        };

        let mut written = 0;
        let mut outcome = Ok(());
        for image in &state.deferred {
            let region = TextureRegion::new(image.rect.x, image.rect.y, image.rect.w, image.rect.h);
            if let Err(error) = upload.write_texture_region(texture, region, &image.pixels) {
                outcome = Err(error);
                break;
            }
            written += 1;
        }
        state.deferred.drain(..written);
        outcome.map(|()| written)
    }

    /// Creates the GPU texture if the page has none yet, even with nothing queued.
    pub fn ensure_texture(&self, upload: &mut dyn UploadPass) -> Option<TextureId> {
        let mut state = self.lock();
        self.texture_or_create(&mut state, upload)
    }

    fn texture_or_create(
        &self,
        state: &mut DynamicTextureState,
        upload: &mut dyn UploadPass,
    ) -> Option<TextureId> {
        if state.texture.is_none() {
            state.texture = upload.create_texture_2d(self.desc());
        }
        state.texture
    }

    /// Detaches the GPU texture so the caller can release it.
    pub fn take_texture(&self) -> Option<TextureId> {
        self.lock().texture.take()
    }
}

fn reserve(state: &mut DynamicTextureState, size: Size, key: u64) -> Option<TextureHandle> {
    if let Some(existing) = state.reservations.get_mut(&key) {
        existing.ref_count += 1;
        return Some(TextureHandle {
            key,
            rect: existing.rect,
            needs_upload: false,
        });
    }
    if size.is_empty() {
        return None;
    }
    let width = i32::try_from(size.width).ok()?;
    let height = i32::try_from(size.height).ok()?;
    let allocation = state.allocator.allocate(size2(width, height))?;
    let min = allocation.rectangle.min;
    let rect = TextureRect::new(min.x as u32, min.y as u32, size.width, size.height);
    state.reservations.insert(
        key,
        Reservation {
            alloc_id: allocation.id,
            rect,
            ref_count: 1,
        },
    );
    Some(TextureHandle {
        key,
        rect,
        needs_upload: true,
    })
}

fn remove(state: &mut DynamicTextureState, handle: &TextureHandle) -> bool {
    let Some(reservation) = state.reservations.get_mut(&handle.key) else {
        return false;
    };
    reservation.ref_count -= 1;
    if reservation.ref_count > 0 {
        return true;
    }
    let alloc_id = reservation.alloc_id;
    state.reservations.remove(&handle.key);
    state.allocator.deallocate(alloc_id);
    state.deferred.retain(|image| image.key != handle.key);
    true
}

impl fmt::Debug for DynamicTexture {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DynamicTexture")
            .field("size", &self.size)
            .field("pixel_format", &self.pixel_format)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use gpu_runtime::{Context, HeadlessContext};

    use super::*;

    #[test]
    fn reservations_never_overlap() {
        let texture = DynamicTexture::new(Size::new(64, 64), TexturePixelType::Alpha);
        let handles: Vec<_> = (0..6)
            .map(|key| texture.reserve_size(Size::new(10 + key as u32, 9), key).unwrap())
            .collect();
        for (index, a) in handles.iter().enumerate() {
            assert!(a.rect().right() <= 64 && a.rect().bottom() <= 64);
            for b in &handles[index + 1..] {
                assert!(!a.rect().intersects(&b.rect()), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn same_key_shares_one_bin() {
        let texture = DynamicTexture::new(Size::new(32, 32), TexturePixelType::Rgba);
        let first = texture.reserve_size(Size::new(8, 8), 42).unwrap();
        let second = texture.reserve_size(Size::new(8, 8), 42).unwrap();
        assert_eq!(first.rect(), second.rect());
        assert!(first.needs_upload());
        assert!(!second.needs_upload());

        assert!(texture.remove_texture(&second));
        assert!(!texture.is_empty());
        assert!(texture.remove_texture(&first));
        assert!(texture.is_empty());
        assert!(!texture.remove_texture(&first));
    }

    #[test]
    fn failed_batch_leaves_the_page_untouched() {
        let texture = DynamicTexture::new(Size::new(64, 64), TexturePixelType::Alpha);
        let kept = texture.reserve_size(Size::new(8, 8), 1).unwrap();
        let batch = [(Size::new(8, 8), 2), (Size::new(128, 128), 3)];
        assert!(texture.reserve_all(&batch).is_none());
        assert_eq!(texture.reservation_count(), 1);

        let reused = texture.reserve_all(&[(Size::new(8, 8), 2)]).unwrap();
        assert!(!reused[0].rect().intersects(&kept.rect()));
        assert_eq!(texture.reservation_count(), 2);
    }

    /// Forwards to a real upload pass but rejects the write at `fail_at`.
    struct FailingWrites<'a> {
        inner: &'a mut dyn UploadPass,
        fail_at: Option<usize>,
        writes: usize,
    }

    impl UploadPass for FailingWrites<'_> {
        fn create_texture_2d(&mut self, desc: Texture2DDesc) -> Option<TextureId> {
            self.inner.create_texture_2d(desc)
        }

        fn write_texture_region(
            &mut self,
            texture: TextureId,
            region: TextureRegion,
            pixels: &[u8],
        ) -> Result<(), UploadError> {
            let index = self.writes;
            self.writes += 1;
            if self.fail_at == Some(index) {
                return Err(UploadError::UnknownTexture(texture));
            }
            self.inner.write_texture_region(texture, region, pixels)
        }

        fn create_buffer(
            &mut self,
            usage: gpu_runtime::BufferUsage,
            data: &[u8],
        ) -> Option<gpu_runtime::BufferId> {
            self.inner.create_buffer(usage, data)
        }

        fn update_buffer(
            &mut self,
            buffer: gpu_runtime::BufferId,
            data: &[u8],
        ) -> Result<(), UploadError> {
            self.inner.update_buffer(buffer, data)
        }

        fn destroy_buffer(&mut self, buffer: gpu_runtime::BufferId) {
            self.inner.destroy_buffer(buffer);
        }
    }

    #[test]
    fn failed_write_keeps_the_unwritten_images_queued() {
        let mut context = HeadlessContext::default();
        let texture = DynamicTexture::new(Size::new(8, 8), TexturePixelType::Alpha);
        let handles: Vec<_> = (0..3)
            .map(|key| texture.reserve_size(Size::new(2, 2), key).unwrap())
            .collect();
        for (value, handle) in handles.iter().enumerate() {
            texture.upload_image(vec![value as u8 + 1; 4], handle);
        }

        {
            let mut pass = context.upload_pass();
            let mut failing = FailingWrites {
                inner: pass.as_mut(),
                fail_at: Some(1),
                writes: 0,
            };
            assert!(texture.upload_deferred_images(&mut failing).is_err());
        }
        assert_eq!(texture.pending_upload_count(), 2);

        let written = texture
            .upload_deferred_images(context.upload_pass().as_mut())
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(texture.pending_upload_count(), 0);

        let pixels = context.texture_pixels(texture.texture_id().unwrap()).unwrap();
        for (value, handle) in handles.iter().enumerate() {
            let rect = handle.rect();
            assert_eq!(pixels[(rect.y * 8 + rect.x) as usize], value as u8 + 1);
        }

        context.release_texture_2d(texture.take_texture().unwrap());
    }

    #[test]
    fn texture_is_created_without_queued_images() {
        let mut context = HeadlessContext::default();
        let texture = DynamicTexture::new(Size::new(1, 1), TexturePixelType::Rgba);
        let id = texture.ensure_texture(context.upload_pass().as_mut()).unwrap();
        assert_eq!(texture.ensure_texture(context.upload_pass().as_mut()), Some(id));
        assert_eq!(context.rendering_stats().num_created_textures, 1);

        context.release_texture_2d(texture.take_texture().unwrap());
    }

    #[test]
    fn deferred_images_upload_on_flush() {
        let mut context = HeadlessContext::default();
        let texture = DynamicTexture::new(Size::new(4, 4), TexturePixelType::Alpha);
        let handle = texture.reserve_size(Size::new(2, 2), 7).unwrap();
        texture.upload_image(vec![9; 4], &handle);
        assert!(texture.texture_id().is_none());

        let written = texture
            .upload_deferred_images(context.upload_pass().as_mut())
            .unwrap();
        assert_eq!(written, 1);
        let id = texture.texture_id().unwrap();
        let pixels = context.texture_pixels(id).unwrap();
        let rect = handle.rect();
        assert_eq!(pixels[(rect.y * 4 + rect.x) as usize], 9);
        assert_eq!(texture.pending_upload_count(), 0);

        context.release_texture_2d(texture.take_texture().unwrap());
    }

    #[test]
    fn removing_a_bin_drops_its_pending_upload() {
        let texture = DynamicTexture::new(Size::new(4, 4), TexturePixelType::Alpha);
        let handle = texture.reserve_size(Size::new(2, 2), 7).unwrap();
        texture.upload_image(vec![1; 4], &handle);
        texture.remove_texture(&handle);
        assert_eq!(texture.pending_upload_count(), 0);
    }
}
