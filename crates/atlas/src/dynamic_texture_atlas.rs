//! Shared atlas pages for glyphs, icons and patterns.
//!
//! A batch is placed atomically: every image of one call lands on the same
//! page or the call fails over to the next page. Pages are tried in creation
//! order and a fresh page is created when none has room. All packing runs
//! under one lock so worker threads can upload concurrently.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use gpu_runtime::{Context, UploadError, UploadPass};
use render_protocol::{Size, TexturePixelType};

use crate::dynamic_texture::{DynamicTexture, TextureHandle};
use crate::glyph::{FontStackHash, Glyph, GlyphMap, GlyphPosition, GlyphPositions};
use crate::image::{AlphaImage, PremultipliedImage};
use crate::style_image::{ImageMap, ImagePosition, ImagePositions, ImageVersionMap, StyleImage};

/// Gap kept between neighbouring bins on top of [`ImagePosition::PADDING`],
/// so linear sampling never bleeds across images.
const EXTRA_PADDING: u32 = 1;
const PADDING: u32 = ImagePosition::PADDING + EXTRA_PADDING;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicTextureAtlasConfig {
    /// Size of newly created alpha (glyph) pages.
    pub glyph_texture_size: Size,
    /// Size of newly created RGBA (icon and pattern) pages.
    pub image_texture_size: Size,
}

impl DynamicTextureAtlasConfig {
    pub const fn with_page_side(side: u32) -> Self {
        Self {
            glyph_texture_size: Size::new(side, side),
            image_texture_size: Size::new(side, side),
        }
    }

    fn page_size(&self, format: TexturePixelType) -> Size {
        match format {
            TexturePixelType::Rgba => self.image_texture_size,
            _ => self.glyph_texture_size,
        }
    }
}

impl Default for DynamicTextureAtlasConfig {
    fn default() -> Self {
        Self {
            glyph_texture_size: Size::new(2048, 2048),
            image_texture_size: Size::new(1024, 1024),
        }
    }
}

/// Result of [`DynamicTextureAtlas::upload_glyphs`].
///
/// `dynamic_texture` is `None` when the batch could not be placed at all.
#[derive(Debug, Clone, Default)]
pub struct GlyphAtlas {
    pub dynamic_texture: Option<Arc<DynamicTexture>>,
    pub texture_handles: Vec<TextureHandle>,
    pub glyph_positions: GlyphPositions,
}

impl GlyphAtlas {
    pub fn is_populated(&self) -> bool {
        self.dynamic_texture.is_some()
    }
}

/// Result of [`DynamicTextureAtlas::upload_icons_and_patterns`].
#[derive(Debug, Clone, Default)]
pub struct ImageAtlas {
    pub dynamic_texture: Option<Arc<DynamicTexture>>,
    pub texture_handles: Vec<TextureHandle>,
    pub icon_positions: ImagePositions,
    pub pattern_positions: ImagePositions,
}

impl ImageAtlas {
    pub fn is_populated(&self) -> bool {
        self.dynamic_texture.is_some()
    }
}

#[derive(Default)]
struct AtlasState {
    pages: Vec<Arc<DynamicTexture>>,
    // Emptied pages whose GPU texture waits for release_retired_textures.
    retired: Vec<Arc<DynamicTexture>>,
    dummies: HashMap<TexturePixelType, Arc<DynamicTexture>>,
}

impl AtlasState {
    fn dummy(&mut self, format: TexturePixelType) -> Arc<DynamicTexture> {
        Arc::clone(
            self.dummies
                .entry(format)
                .or_insert_with(|| Arc::new(DynamicTexture::new(Size::new(1, 1), format))),
        )
    }
}

pub struct DynamicTextureAtlas {
    config: DynamicTextureAtlasConfig,
    state: Mutex<AtlasState>,
}

fn padded_size(size: Size) -> Size {
    Size::new(size.width + 2 * PADDING, size.height + 2 * PADDING)
}

fn content_key(value: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn glyph_key(font_stack: FontStackHash, glyph: &Glyph) -> u64 {
    content_key(("glyph", font_stack, glyph.id))
}

fn image_key(kind: &str, image: &StyleImage, version: u32) -> u64 {
    let size = image.image.size();
    content_key((kind, image.id.as_str(), version, size.width, size.height))
}

impl DynamicTextureAtlas {
    pub fn new(config: DynamicTextureAtlasConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AtlasState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AtlasState> {
        self.state.lock().expect("dynamic texture atlas lock poisoned")
    }

    pub fn config(&self) -> DynamicTextureAtlasConfig {
        self.config
    }

    pub fn page_count(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn pages(&self) -> Vec<Arc<DynamicTexture>> {
        self.lock().pages.clone()
    }

    pub fn retired_count(&self) -> usize {
        self.lock().retired.len()
    }

    /// Packs every glyph with a valid bitmap onto one alpha page.
    pub fn upload_glyphs(&self, glyphs: &GlyphMap) -> GlyphAtlas {
        let mut state = self.lock();

        let requests: Vec<(FontStackHash, &Arc<Glyph>)> = glyphs
            .iter()
            .flat_map(|(font_stack, glyphs)| {
                glyphs
                    .values()
                    .flatten()
                    .filter(|glyph| glyph.bitmap.is_valid())
                    .map(move |glyph| (*font_stack, glyph))
            })
            .collect();
        if requests.is_empty() {
            return GlyphAtlas {
                dynamic_texture: Some(state.dummy(TexturePixelType::Alpha)),
                ..GlyphAtlas::default()
            };
        }

        let sizes: Vec<(Size, u64)> = requests
            .iter()
            .map(|(font_stack, glyph)| {
                (
                    padded_size(glyph.bitmap.size()),
                    glyph_key(*font_stack, glyph),
                )
            })
            .collect();
        let Some((page, handles)) = self.place_batch(&mut state, TexturePixelType::Alpha, &sizes)
        else {
            return GlyphAtlas::default();
        };

        let mut atlas = GlyphAtlas {
            dynamic_texture: Some(Arc::clone(&page)),
            texture_handles: Vec::with_capacity(handles.len()),
            glyph_positions: GlyphPositions::new(),
        };
        for ((font_stack, glyph), handle) in requests.iter().zip(handles) {
            let rect = handle.rect();
            if handle.needs_upload() {
                let mut padded = AlphaImage::new(Size::new(rect.w, rect.h));
                AlphaImage::copy(
                    &glyph.bitmap,
                    &mut padded,
                    (0, 0),
                    (PADDING, PADDING),
                    glyph.bitmap.size(),
                )
                .expect("padded bin holds the glyph bitmap");
                page.upload_image(padded.into_data(), &handle);
            }
            atlas.texture_handles.push(handle);
            atlas.glyph_positions.entry(*font_stack).or_default().insert(
                glyph.id,
                GlyphPosition {
                    rect: rect.inset(EXTRA_PADDING),
                    metrics: glyph.metrics,
                },
            );
        }
        atlas
    }

    /// Packs icons and patterns together onto one RGBA page.
    ///
    /// Patterns get their opposite edges copied into the padding so that
    /// repeated sampling wraps seamlessly.
    pub fn upload_icons_and_patterns(
        &self,
        icons: &ImageMap,
        patterns: &ImageMap,
        versions: &ImageVersionMap,
    ) -> ImageAtlas {
        let mut state = self.lock();
        if icons.is_empty() && patterns.is_empty() {
            return ImageAtlas {
                dynamic_texture: Some(state.dummy(TexturePixelType::Rgba)),
                ..ImageAtlas::default()
            };
        }

        let sizes: Vec<(Size, u64)> = icons
            .values()
            .map(|icon| ("icon", icon))
            .chain(patterns.values().map(|pattern| ("pattern", pattern)))
            .map(|(kind, image)| {
                (
                    padded_size(image.image.size()),
                    image_key(kind, image, version_of(versions, image)),
                )
            })
            .collect();
        let Some((page, handles)) = self.place_batch(&mut state, TexturePixelType::Rgba, &sizes)
        else {
            return ImageAtlas::default();
        };

        let mut atlas = ImageAtlas {
            dynamic_texture: Some(Arc::clone(&page)),
            texture_handles: Vec::with_capacity(handles.len()),
            icon_positions: ImagePositions::with_capacity(icons.len()),
            pattern_positions: ImagePositions::with_capacity(patterns.len()),
        };
        let mut handles = handles.into_iter();
        for (icon, handle) in icons.values().zip(handles.by_ref()) {
            if handle.needs_upload() {
                page.upload_image(padded_image(icon, false), &handle);
            }
            atlas.icon_positions.insert(icon.id.clone(), image_position(&handle, icon, version_of(versions, icon)));
            atlas.texture_handles.push(handle);
        }
        for (pattern, handle) in patterns.values().zip(handles) {
            if handle.needs_upload() {
                page.upload_image(padded_image(pattern, true), &handle);
            }
            atlas.pattern_positions.insert(
                pattern.id.clone(),
                image_position(&handle, pattern, version_of(versions, pattern)),
            );
            atlas.texture_handles.push(handle);
        }
        atlas
    }

    fn place_batch(
        &self,
        state: &mut AtlasState,
        format: TexturePixelType,
        requests: &[(Size, u64)],
    ) -> Option<(Arc<DynamicTexture>, Vec<TextureHandle>)> {
        for page in state.pages.iter().filter(|page| page.pixel_format() == format) {
            if let Some(handles) = page.reserve_all(requests) {
                return Some((Arc::clone(page), handles));
            }
        }

        let page = Arc::new(DynamicTexture::new(self.config.page_size(format), format));
        let Some(handles) = page.reserve_all(requests) else {
            log::warn!(
                "batch of {} images does not fit an empty {} {:?} atlas page",
                requests.len(),
                page.size(),
                format
            );
            return None;
        };
        log::debug!(
            "created {} {:?} atlas page #{}",
            page.size(),
            format,
            state.pages.len()
        );
        state.pages.push(Arc::clone(&page));
        Some((page, handles))
    }

    /// Frees the bins of `handles` on `page`. A page left empty is retired.
    pub fn remove_textures(&self, handles: &[TextureHandle], page: &Arc<DynamicTexture>) {
        let mut state = self.lock();
        for handle in handles {
            page.remove_texture(handle);
        }
        if !page.is_empty() {
            return;
        }
        if let Some(index) = state.pages.iter().position(|p| Arc::ptr_eq(p, page)) {
            let retired = state.pages.remove(index);
            state.retired.push(retired);
        }
    }

    /// Flushes queued images of every live page and gives dummy pages a texture.
    pub fn upload_deferred_images(&self, upload: &mut dyn UploadPass) -> Result<usize, UploadError> {
        let state = self.lock();
        for dummy in state.dummies.values() {
            if dummy.ensure_texture(upload).is_none() {
                log::warn!("no texture for {:?} dummy atlas page", dummy.pixel_format());
            }
        }
        let mut written = 0;
        for page in &state.pages {
            written += page.upload_deferred_images(upload)?;
        }
        Ok(written)
    }

    /// Returns GPU textures of retired pages nobody references anymore.
    pub fn release_retired_textures(&self, context: &mut dyn Context) -> usize {
        let mut state = self.lock();
        let mut released = 0;
        state.retired.retain(|page| {
            if Arc::strong_count(page) > 1 {
                return true;
            }
            if let Some(texture) = page.take_texture() {
                context.release_texture_2d(texture);
                released += 1;
            }
            false
        });
        released
    }

    /// Drops every page and returns all GPU textures to `context`.
    pub fn shutdown(&self, context: &mut dyn Context) {
        let mut state = self.lock();
        let AtlasState {
            pages,
            retired,
            dummies,
        } = std::mem::take(&mut *state);
        for page in pages
            .into_iter()
            .chain(retired)
            .chain(dummies.into_values())
        {
            if let Some(texture) = page.take_texture() {
                context.release_texture_2d(texture);
            }
        }
    }
}

fn version_of(versions: &ImageVersionMap, image: &StyleImage) -> u32 {
    versions.get(&image.id).copied().unwrap_or(0)
}

fn image_position(handle: &TextureHandle, image: &StyleImage, version: u32) -> ImagePosition {
    ImagePosition {
        padded_rect: handle.rect().inset(EXTRA_PADDING),
        pixel_ratio: image.pixel_ratio,
        version,
        sdf: image.sdf,
    }
}

fn padded_image(image: &StyleImage, wrap_edges: bool) -> Vec<u8> {
    let source = &image.image;
    let size = source.size();
    let mut padded = PremultipliedImage::new(padded_size(size));
    let copy = |src: (u32, u32), dst: (u32, u32), block: Size, padded: &mut PremultipliedImage| {
        PremultipliedImage::copy(source, padded, src, dst, block)
            .expect("padded bin holds the image and its wrapped edges");
    };
    copy((0, 0), (PADDING, PADDING), size, &mut padded);

    if wrap_edges && !size.is_empty() {
        let (x, y, w, h) = (PADDING, PADDING, size.width, size.height);
        copy((0, h - 1), (x, y - 1), Size::new(w, 1), &mut padded);
        copy((0, 0), (x, y + h), Size::new(w, 1), &mut padded);
        copy((w - 1, 0), (x - 1, y), Size::new(1, h), &mut padded);
        copy((0, 0), (x + w, y), Size::new(1, h), &mut padded);
    }
    padded.into_data()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gpu_runtime::HeadlessContext;
    use smol_str::SmolStr;

    use super::*;
    use crate::glyph::GlyphMetrics;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn glyph(id: u32, width: u32, height: u32) -> Arc<Glyph> {
        let data = (0..width * height).map(|value| (value % 255) as u8 + 1).collect();
        Arc::new(Glyph {
            id,
            bitmap: AlphaImage::from_data(Size::new(width, height), data).unwrap(),
            metrics: GlyphMetrics {
                width,
                height,
                advance: width + 1,
                ..GlyphMetrics::default()
            },
        })
    }

    fn glyph_map(font_stack: FontStackHash, glyphs: &[Arc<Glyph>]) -> GlyphMap {
        let mut map = GlyphMap::new();
        let entries: BTreeMap<_, _> = glyphs
            .iter()
            .map(|glyph| (glyph.id, Some(Arc::clone(glyph))))
            .collect();
        map.insert(font_stack, entries);
        map
    }

    fn style_image(id: &str, width: u32, height: u32) -> Arc<StyleImage> {
        let data = (0..width * height)
            .flat_map(|index| {
                let (x, y) = ((index % width) as u8, (index / width) as u8);
                [x * 10 + y, 1, 2, 255]
            })
            .collect();
        Arc::new(StyleImage::new(
            id,
            PremultipliedImage::from_data(Size::new(width, height), data).unwrap(),
            1.0,
        ))
    }

    fn image_map(images: &[Arc<StyleImage>]) -> ImageMap {
        images
            .iter()
            .map(|image| (image.id.clone(), Arc::clone(image)))
            .collect()
    }

    #[test]
    fn empty_requests_share_a_dummy_page() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::default());
        let first = atlas.upload_glyphs(&GlyphMap::new());
        let second = atlas.upload_glyphs(&GlyphMap::new());
        let first_page = first.dynamic_texture.unwrap();
        assert!(Arc::ptr_eq(&first_page, &second.dynamic_texture.unwrap()));
        assert_eq!(first_page.size(), Size::new(1, 1));
        assert_eq!(first_page.pixel_format(), TexturePixelType::Alpha);

        let images = atlas.upload_icons_and_patterns(
            &ImageMap::new(),
            &ImageMap::new(),
            &ImageVersionMap::new(),
        );
        assert_eq!(
            images.dynamic_texture.unwrap().pixel_format(),
            TexturePixelType::Rgba
        );
        assert_eq!(atlas.page_count(), 0);
    }

    #[test]
    fn dummy_page_gets_a_texture_on_flush() {
        let mut context = HeadlessContext::default();
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::default());
        let result = atlas.upload_glyphs(&GlyphMap::new());
        let dummy = result.dynamic_texture.unwrap();
        assert!(dummy.texture_id().is_none());

        assert_eq!(atlas.upload_deferred_images(context.upload_pass().as_mut()).unwrap(), 0);
        let texture = dummy.texture_id().unwrap();
        atlas.upload_deferred_images(context.upload_pass().as_mut()).unwrap();
        assert_eq!(dummy.texture_id(), Some(texture));
        assert_eq!(context.rendering_stats().num_created_textures, 1);

        atlas.shutdown(&mut context);
        assert!(context.texture_pool().is_unused(texture));
    }

    #[test]
    fn new_pages_use_the_configured_sizes() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::default());
        let glyphs = atlas.upload_glyphs(&glyph_map(1, &[glyph(65, 4, 4)]));
        assert_eq!(glyphs.dynamic_texture.unwrap().size(), Size::new(2048, 2048));

        let images = atlas.upload_icons_and_patterns(
            &image_map(&[style_image("pin", 2, 2)]),
            &ImageMap::new(),
            &ImageVersionMap::new(),
        );
        assert_eq!(images.dynamic_texture.unwrap().size(), Size::new(1024, 1024));
        assert_eq!(atlas.page_count(), 2);
    }

    #[test]
    fn glyph_positions_exclude_extra_padding() {
        init_logging();
        let mut context = HeadlessContext::default();
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let a = glyph(65, 3, 2);
        let result = atlas.upload_glyphs(&glyph_map(9, &[a.clone()]));

        let handle = result.texture_handles[0];
        assert_eq!((handle.rect().w, handle.rect().h), (7, 6));
        let position = result.glyph_positions[&9][&65];
        assert_eq!(position.rect, handle.rect().inset(1));
        assert_eq!(position.metrics, a.metrics);

        assert_eq!(atlas.upload_deferred_images(context.upload_pass().as_mut()).unwrap(), 1);
        let page = result.dynamic_texture.as_ref().unwrap();
        let pixels = context.texture_pixels(page.texture_id().unwrap()).unwrap();
        let at = |x: u32, y: u32| pixels[(y * 64 + x) as usize];
        let rect = handle.rect();
        assert_eq!(at(rect.x + 2, rect.y + 2), 1);
        assert_eq!(at(rect.x + 4, rect.y + 3), 6);
        assert_eq!(at(rect.x + 1, rect.y + 2), 0);

        atlas.shutdown(&mut context);
    }

    #[test]
    fn identical_glyphs_share_a_bin() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let glyphs = glyph_map(3, &[glyph(70, 4, 4)]);
        let first = atlas.upload_glyphs(&glyphs);
        let second = atlas.upload_glyphs(&glyphs);

        assert_eq!(first.texture_handles[0].rect(), second.texture_handles[0].rect());
        assert!(!second.texture_handles[0].needs_upload());
        let page = first.dynamic_texture.unwrap();
        assert_eq!(page.pending_upload_count(), 1);
        assert_eq!(page.reservation_count(), 1);
    }

    #[test]
    fn batch_that_does_not_fit_moves_to_a_new_page_whole() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let first = atlas.upload_glyphs(&glyph_map(1, &[glyph(1, 40, 40)]));
        let first_page = first.dynamic_texture.unwrap();

        let second = atlas.upload_glyphs(&glyph_map(1, &[glyph(2, 4, 4), glyph(3, 40, 40)]));
        let second_page = second.dynamic_texture.unwrap();

        assert!(!Arc::ptr_eq(&first_page, &second_page));
        assert_eq!(first_page.reservation_count(), 1);
        assert_eq!(second_page.reservation_count(), 2);
        assert_eq!(atlas.page_count(), 2);
        assert_eq!(second.glyph_positions[&1].len(), 2);
    }

    #[test]
    fn batch_larger_than_a_page_is_unpopulated() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(32));
        let result = atlas.upload_glyphs(&glyph_map(1, &[glyph(1, 40, 8)]));
        assert!(!result.is_populated());
        assert!(result.glyph_positions.is_empty());
        assert_eq!(atlas.page_count(), 0);
    }

    #[test]
    fn missing_and_empty_glyphs_are_skipped() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let mut glyphs = glyph_map(5, &[glyph(1, 2, 2)]);
        let entries = glyphs.get_mut(&5).unwrap();
        entries.insert(2, None);
        entries.insert(
            3,
            Some(Arc::new(Glyph {
                id: 3,
                bitmap: AlphaImage::default(),
                metrics: GlyphMetrics::default(),
            })),
        );
        let result = atlas.upload_glyphs(&glyphs);
        assert_eq!(result.texture_handles.len(), 1);
        assert!(result.glyph_positions[&5].contains_key(&1));
        assert!(!result.glyph_positions[&5].contains_key(&2));
    }

    #[test]
    fn patterns_wrap_their_edges_into_the_padding() {
        let mut context = HeadlessContext::default();
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(32));
        let icon = style_image("icon", 2, 2);
        let pattern = style_image("stripes", 3, 2);
        let mut versions = ImageVersionMap::new();
        versions.insert(SmolStr::new("stripes"), 4);

        let result = atlas.upload_icons_and_patterns(
            &image_map(&[icon]),
            &image_map(&[pattern]),
            &versions,
        );
        assert_eq!(result.icon_positions["icon"].version, 0);
        let position = result.pattern_positions["stripes"];
        assert_eq!(position.version, 4);
        assert_eq!(position.display_size(), [3.0, 2.0]);

        atlas
            .upload_deferred_images(context.upload_pass().as_mut())
            .unwrap();
        let page = result.dynamic_texture.as_ref().unwrap();
        let pixels = context.texture_pixels(page.texture_id().unwrap()).unwrap();
        let red = |x: u32, y: u32| pixels[((y * 32 + x) * 4) as usize];
        let [left, top] = position.tl();
        // Image texel (x, y) has red = x * 10 + y.
        assert_eq!(red(left + 1, top), 10);
        assert_eq!(red(left + 1, top - 1), 11);
        assert_eq!(red(left + 1, top + 2), 10);
        assert_eq!(red(left - 1, top + 1), 21);
        assert_eq!(red(left + 3, top + 1), 1);

        let icon_position = result.icon_positions["icon"];
        let [icon_left, icon_top] = icon_position.tl();
        assert_eq!(pixels[(((icon_top - 1) * 32 + icon_left) * 4 + 3) as usize], 0);

        atlas.shutdown(&mut context);
    }

    #[test]
    fn new_version_gets_its_own_bin() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let icons = image_map(&[style_image("pin", 2, 2)]);
        let mut versions = ImageVersionMap::new();
        let first = atlas.upload_icons_and_patterns(&icons, &ImageMap::new(), &versions);
        versions.insert(SmolStr::new("pin"), 1);
        let second = atlas.upload_icons_and_patterns(&icons, &ImageMap::new(), &versions);
        assert_ne!(first.texture_handles[0].rect(), second.texture_handles[0].rect());
        assert!(second.texture_handles[0].needs_upload());
    }

    #[test]
    fn emptied_page_is_retired_and_released_when_unreferenced() {
        let mut context = HeadlessContext::default();
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(64));
        let result = atlas.upload_glyphs(&glyph_map(1, &[glyph(1, 4, 4), glyph(2, 4, 4)]));
        atlas
            .upload_deferred_images(context.upload_pass().as_mut())
            .unwrap();
        let page = result.dynamic_texture.clone().unwrap();
        let texture = page.texture_id().unwrap();

        atlas.remove_textures(&result.texture_handles[..1], &page);
        assert_eq!(atlas.page_count(), 1);
        atlas.remove_textures(&result.texture_handles[1..], &page);
        assert_eq!(atlas.page_count(), 0);
        assert_eq!(atlas.retired_count(), 1);

        assert_eq!(atlas.release_retired_textures(&mut context), 0);
        drop(page);
        drop(result);
        assert_eq!(atlas.release_retired_textures(&mut context), 1);
        assert_eq!(atlas.retired_count(), 0);
        assert!(context.texture_pool().is_unused(texture));
    }

    #[test]
    fn concurrent_batches_never_overlap() {
        let atlas = DynamicTextureAtlas::new(DynamicTextureAtlasConfig::with_page_side(256));
        let results: Vec<GlyphAtlas> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4u64)
                .map(|font_stack| {
                    let atlas = &atlas;
                    scope.spawn(move || {
                        let glyphs: Vec<_> = (0..8).map(|id| glyph(id, 6, 7)).collect();
                        atlas.upload_glyphs(&glyph_map(font_stack, &glyphs))
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect()
        });

        let page = results[0].dynamic_texture.clone().unwrap();
        let rects: Vec<_> = results
            .iter()
            .inspect(|result| {
                assert!(Arc::ptr_eq(result.dynamic_texture.as_ref().unwrap(), &page));
            })
            .flat_map(|result| result.texture_handles.iter().map(TextureHandle::rect))
            .collect();
        assert_eq!(rects.len(), 32);
        for (index, a) in rects.iter().enumerate() {
            for b in &rects[index + 1..] {
                assert!(!a.intersects(b));
            }
        }
    }
}
