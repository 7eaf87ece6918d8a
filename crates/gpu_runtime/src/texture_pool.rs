//! Shape-keyed texture reuse.
//!
//! Textures are bucketed by their exact [`Texture2DDesc`]. A released texture
//! stays allocated in its bucket's free set and in a single LRU shared by all
//! buckets. Whenever pooled storage exceeds the budget the least recently
//! released texture is freed, regardless of bucket. Textures in use are never
//! evicted, so live usage alone may exceed the budget.
//!
//! The pool is render-thread only and has no internal locking.

use std::collections::{BTreeSet, HashMap};

use lru::LruCache;
use render_protocol::{Size, TextureChannelDataType, TexturePixelType};

use crate::id::TextureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture2DDesc {
    pub size: Size,
    pub pixel_format: TexturePixelType,
    pub channel_type: TextureChannelDataType,
}

impl Texture2DDesc {
    pub const fn new(
        size: Size,
        pixel_format: TexturePixelType,
        channel_type: TextureChannelDataType,
    ) -> Self {
        Self {
            size,
            pixel_format,
            channel_type,
        }
    }

    pub const fn rgba8(size: Size) -> Self {
        Self::new(
            size,
            TexturePixelType::Rgba,
            TextureChannelDataType::UnsignedByte,
        )
    }

    pub const fn alpha8(size: Size) -> Self {
        Self::new(
            size,
            TexturePixelType::Alpha,
            TextureChannelDataType::UnsignedByte,
        )
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        self.pixel_format.channel_count() * self.channel_type.byte_size()
    }

    /// Backing storage in bytes.
    pub const fn storage_size(&self) -> usize {
        self.size.width as usize * self.size.height as usize * self.bytes_per_pixel()
    }
}

/// Device side of the pool: creates and destroys backing storage.
pub trait TextureAllocator {
    fn allocate_texture(&mut self, desc: &Texture2DDesc) -> Option<TextureId>;

    fn free_texture(&mut self, texture: TextureId);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TexturePoolCounters {
    /// Allocations that created new storage.
    pub alloc_count: u64,
    pub reuse_count: u64,
    pub release_count: u64,
    /// Textures whose storage was freed by eviction or shrink.
    pub freed_count: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    used: BTreeSet<TextureId>,
    free: BTreeSet<TextureId>,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.used.is_empty() && self.free.is_empty()
    }
}

pub struct Texture2DPool {
    max_pool_storage: usize,
    buckets: HashMap<Texture2DDesc, Bucket>,
    descriptions: HashMap<TextureId, Texture2DDesc>,
    lru: LruCache<TextureId, ()>,
    used_storage: usize,
    unused_storage: usize,
    counters: TexturePoolCounters,
}

impl Texture2DPool {
    pub fn new(max_pool_storage: usize) -> Self {
        Self {
            max_pool_storage,
            buckets: HashMap::new(),
            descriptions: HashMap::new(),
            lru: LruCache::unbounded(),
            used_storage: 0,
            unused_storage: 0,
            counters: TexturePoolCounters::default(),
        }
    }

    /// Hands out a free texture of exactly `desc`, or creates one.
    ///
    /// Returns `None` only when the allocator cannot create new storage.
    pub fn alloc(
        &mut self,
        allocator: &mut dyn TextureAllocator,
        desc: &Texture2DDesc,
    ) -> Option<TextureId> {
        let storage = desc.storage_size();
        let bucket = self.buckets.entry(*desc).or_default();

        if let Some(texture) = bucket.free.pop_first() {
            bucket.used.insert(texture);
            self.lru.pop(&texture);
            self.unused_storage -= storage;
            self.used_storage += storage;
            self.counters.reuse_count += 1;
            return Some(texture);
        }

        let Some(texture) = allocator.allocate_texture(desc) else {
            let bucket_is_empty = bucket.is_empty();
            if bucket_is_empty {
                self.buckets.remove(desc);
            }
            log::warn!(
                "texture allocation failed for {} {:?}/{:?}",
                desc.size,
                desc.pixel_format,
                desc.channel_type
            );
            return None;
        };

        assert!(
            bucket.used.insert(texture),
            "allocator returned texture {texture:?} that is already in use"
        );
        let previous = self.descriptions.insert(texture, *desc);
        assert!(
            previous.is_none(),
            "allocator returned texture {texture:?} that is already pooled"
        );
        self.used_storage += storage;
        self.counters.alloc_count += 1;

        self.evict(allocator);
        Some(texture)
    }

    /// Returns a texture handed out by [`Texture2DPool::alloc`] to its bucket.
    pub fn release(&mut self, allocator: &mut dyn TextureAllocator, texture: TextureId) {
        let desc = *self
            .descriptions
            .get(&texture)
            .unwrap_or_else(|| panic!("released texture {texture:?} is not pooled"));
        let bucket = self
            .buckets
            .get_mut(&desc)
            .expect("pooled texture must have a bucket");
        assert!(
            bucket.used.remove(&texture),
            "released texture {texture:?} is not in use"
        );
        bucket.free.insert(texture);
        self.lru.put(texture, ());

        let storage = desc.storage_size();
        self.used_storage -= storage;
        self.unused_storage += storage;
        self.counters.release_count += 1;

        self.evict(allocator);
    }

    /// Frees every released texture.
    pub fn shrink(&mut self, allocator: &mut dyn TextureAllocator) {
        while let Some((texture, ())) = self.lru.pop_lru() {
            self.free_unused(allocator, texture);
        }
    }

    pub fn set_max_pool_storage(
        &mut self,
        allocator: &mut dyn TextureAllocator,
        max_pool_storage: usize,
    ) {
        self.max_pool_storage = max_pool_storage;
        self.evict(allocator);
    }

    fn evict(&mut self, allocator: &mut dyn TextureAllocator) {
        while self.pool_storage() > self.max_pool_storage {
            let Some((texture, ())) = self.lru.pop_lru() else {
                break;
            };
            self.free_unused(allocator, texture);
        }
    }

    fn free_unused(&mut self, allocator: &mut dyn TextureAllocator, texture: TextureId) {
        let desc = self
            .descriptions
            .remove(&texture)
            .expect("evicted texture must be pooled");
        let bucket = self
            .buckets
            .get_mut(&desc)
            .expect("pooled texture must have a bucket");
        let removed = bucket.free.remove(&texture);
        debug_assert!(removed, "evicted texture {texture:?} was not free");
        if bucket.is_empty() {
            self.buckets.remove(&desc);
        }
        self.unused_storage -= desc.storage_size();
        self.counters.freed_count += 1;
        allocator.free_texture(texture);
    }

    pub fn is_pooled(&self, texture: TextureId) -> bool {
        self.descriptions.contains_key(&texture)
    }

    pub fn is_used(&self, texture: TextureId) -> bool {
        self.bucket_of(texture)
            .is_some_and(|bucket| bucket.used.contains(&texture))
    }

    pub fn is_unused(&self, texture: TextureId) -> bool {
        self.bucket_of(texture)
            .is_some_and(|bucket| bucket.free.contains(&texture))
    }

    pub fn desc(&self, texture: TextureId) -> Option<Texture2DDesc> {
        self.descriptions.get(&texture).copied()
    }

    pub fn storage(&self, texture: TextureId) -> Option<usize> {
        self.desc(texture).map(|desc| desc.storage_size())
    }

    fn bucket_of(&self, texture: TextureId) -> Option<&Bucket> {
        self.descriptions
            .get(&texture)
            .and_then(|desc| self.buckets.get(desc))
    }

    pub fn used_storage(&self) -> usize {
        self.used_storage
    }

    pub fn unused_storage(&self) -> usize {
        self.unused_storage
    }

    pub fn pool_storage(&self) -> usize {
        self.used_storage + self.unused_storage
    }

    pub fn max_pool_storage(&self) -> usize {
        self.max_pool_storage
    }

    pub fn pooled_count(&self) -> usize {
        self.descriptions.len()
    }

    pub fn unused_count(&self) -> usize {
        self.lru.len()
    }

    pub fn counters(&self) -> TexturePoolCounters {
        self.counters
    }
}

impl Drop for Texture2DPool {
    fn drop(&mut self) {
        let TexturePoolCounters {
            alloc_count,
            reuse_count,
            release_count,
            freed_count,
        } = self.counters;
        log::debug!(
            "texture pool: {alloc_count} allocated, {reuse_count} reused, {release_count} released, {freed_count} freed"
        );
        if std::thread::panicking() {
            return;
        }
        assert!(
            self.used_storage == 0 && self.unused_storage == 0,
            "texture pool dropped with {} bytes in use and {} bytes unused",
            self.used_storage,
            self.unused_storage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_pool::IdPool;

    #[derive(Default)]
    struct CountingAllocator {
        ids: Option<IdPool>,
        allocated: Vec<TextureId>,
        freed: Vec<TextureId>,
    }

    impl CountingAllocator {
        fn with_capacity(count: u32) -> Self {
            Self {
                ids: Some(IdPool::new(count - 1)),
                ..Self::default()
            }
        }
    }

    impl TextureAllocator for CountingAllocator {
        fn allocate_texture(&mut self, _desc: &Texture2DDesc) -> Option<TextureId> {
            let raw = match &mut self.ids {
                Some(ids) => ids.create_id()?,
                None => self.allocated.len() as u32,
            };
            let texture = TextureId::new(raw);
            self.allocated.push(texture);
            Some(texture)
        }

        fn free_texture(&mut self, texture: TextureId) {
            if let Some(ids) = &mut self.ids {
                assert!(ids.destroy_id(texture.raw()));
            }
            self.freed.push(texture);
        }
    }

    fn desc(side: u32) -> Texture2DDesc {
        Texture2DDesc::rgba8(Size::new(side, side))
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn storage_size_counts_channels_and_channel_bytes() {
        assert_eq!(desc(4).storage_size(), 64);
        assert_eq!(Texture2DDesc::alpha8(Size::new(4, 4)).storage_size(), 16);
        let half = Texture2DDesc::new(
            Size::new(2, 2),
            TexturePixelType::Rgba,
            TextureChannelDataType::HalfFloat,
        );
        assert_eq!(half.storage_size(), 32);
    }

    #[test]
    fn released_texture_is_reused_for_same_desc() {
        init_logger();
        let mut allocator = CountingAllocator::default();
        let mut pool = Texture2DPool::new(1 << 20);

        let first = pool.alloc(&mut allocator, &desc(8)).unwrap();
        pool.release(&mut allocator, first);
        assert!(pool.is_unused(first));

        let second = pool.alloc(&mut allocator, &desc(8)).unwrap();
        assert_eq!(first, second);
        assert!(pool.is_used(second));
        assert_eq!(pool.counters().reuse_count, 1);
        assert_eq!(pool.counters().alloc_count, 1);
        assert_eq!(allocator.allocated.len(), 1);

        pool.release(&mut allocator, second);
        pool.shrink(&mut allocator);
    }

    #[test]
    fn different_desc_never_shares_a_texture() {
        let mut allocator = CountingAllocator::default();
        let mut pool = Texture2DPool::new(1 << 20);

        let small = pool.alloc(&mut allocator, &desc(4)).unwrap();
        pool.release(&mut allocator, small);
        let large = pool.alloc(&mut allocator, &desc(8)).unwrap();
        assert_ne!(small, large);
        assert_eq!(pool.desc(large), Some(desc(8)));
        assert_eq!(pool.storage(large), Some(256));

        pool.release(&mut allocator, large);
        pool.shrink(&mut allocator);
        assert_eq!(allocator.freed.len(), 2);
    }

    #[test]
    fn eviction_keeps_pooled_storage_within_budget() {
        init_logger();
        let mut allocator = CountingAllocator::default();
        let budget = desc(8).storage_size() * 2;
        let mut pool = Texture2DPool::new(budget);

        let textures: Vec<_> = (0..4)
            .map(|_| pool.alloc(&mut allocator, &desc(8)).unwrap())
            .collect();
        assert_eq!(pool.used_storage(), budget * 2);

        for texture in &textures {
            pool.release(&mut allocator, *texture);
            assert!(pool.pool_storage() <= budget.max(pool.used_storage()));
        }
        assert!(pool.pool_storage() <= budget);
        assert_eq!(pool.unused_count(), 2);
        // Least recently released go first.
        assert_eq!(allocator.freed, vec![textures[0], textures[1]]);
        assert!(!pool.is_pooled(textures[0]));

        pool.shrink(&mut allocator);
        assert_eq!(pool.pool_storage(), 0);
        assert_eq!(pool.counters().freed_count, 4);
    }

    #[test]
    fn eviction_crosses_buckets_by_release_order() {
        let mut allocator = CountingAllocator::default();
        let mut pool = Texture2DPool::new(desc(8).storage_size() + desc(4).storage_size());

        let large = pool.alloc(&mut allocator, &desc(8)).unwrap();
        let small = pool.alloc(&mut allocator, &desc(4)).unwrap();
        let small_2 = pool.alloc(&mut allocator, &desc(4)).unwrap();
        pool.release(&mut allocator, small);
        pool.release(&mut allocator, large);
        pool.release(&mut allocator, small_2);

        assert_eq!(allocator.freed, vec![small]);
        assert!(pool.is_unused(large) && pool.is_unused(small_2));
        pool.shrink(&mut allocator);
    }

    #[test]
    fn live_textures_exceed_budget_without_reuse() {
        let mut allocator = CountingAllocator::default();
        let d = desc(16);
        let mut pool = Texture2DPool::new(d.storage_size() * 2);

        let a = pool.alloc(&mut allocator, &d).unwrap();
        let b = pool.alloc(&mut allocator, &d).unwrap();
        let c = pool.alloc(&mut allocator, &d).unwrap();

        assert_eq!(pool.counters().alloc_count, 3);
        assert_eq!(pool.counters().reuse_count, 0);
        assert_eq!(pool.used_storage(), d.storage_size() * 3);
        assert!(allocator.freed.is_empty());

        for texture in [a, b, c] {
            pool.release(&mut allocator, texture);
        }
        assert_eq!(pool.pool_storage(), d.storage_size() * 2);
        pool.shrink(&mut allocator);
    }

    #[test]
    fn failed_allocation_leaves_no_bucket() {
        let mut allocator = CountingAllocator::with_capacity(1);
        let mut pool = Texture2DPool::new(1 << 20);

        let only = pool.alloc(&mut allocator, &desc(2)).unwrap();
        assert!(pool.alloc(&mut allocator, &desc(4)).is_none());
        assert_eq!(pool.pooled_count(), 1);

        pool.release(&mut allocator, only);
        pool.shrink(&mut allocator);
    }

    #[test]
    fn lowering_the_budget_evicts_immediately() {
        let mut allocator = CountingAllocator::default();
        let mut pool = Texture2DPool::new(1 << 20);
        let texture = pool.alloc(&mut allocator, &desc(8)).unwrap();
        pool.release(&mut allocator, texture);

        pool.set_max_pool_storage(&mut allocator, 0);
        assert_eq!(allocator.freed, vec![texture]);
        assert_eq!(pool.pool_storage(), 0);
    }

    #[test]
    #[should_panic(expected = "is not in use")]
    fn double_release_is_fatal() {
        let mut allocator = CountingAllocator::default();
        let mut pool = Texture2DPool::new(1 << 20);
        let texture = pool.alloc(&mut allocator, &desc(8)).unwrap();
        pool.release(&mut allocator, texture);
        pool.release(&mut allocator, texture);
    }
}
