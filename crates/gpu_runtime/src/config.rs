/// Budgets applied by a backend to its resource pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuResourceConfig {
    /// Pooled texture storage in bytes above which released textures are
    /// evicted. Live textures are never evicted, so usage may exceed it.
    pub max_texture_pool_storage: usize,
    /// Highest texture/buffer id a backend hands out.
    pub max_resource_id: u32,
}

impl GpuResourceConfig {
    pub const DEFAULT_MAX_TEXTURE_POOL_STORAGE: usize = 128 * 1024 * 1024;
    pub const DEFAULT_MAX_RESOURCE_ID: u32 = u16::MAX as u32;

    pub fn with_pool_budget(max_texture_pool_storage: usize) -> Self {
        Self {
            max_texture_pool_storage,
            ..Self::default()
        }
    }
}

impl Default for GpuResourceConfig {
    fn default() -> Self {
        Self {
            max_texture_pool_storage: Self::DEFAULT_MAX_TEXTURE_POOL_STORAGE,
            max_resource_id: Self::DEFAULT_MAX_RESOURCE_ID,
        }
    }
}
