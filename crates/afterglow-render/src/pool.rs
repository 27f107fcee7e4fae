//! Temporary image pool.
//!
//! Stages never create images directly: they acquire temporaries through a
//! [`BufferPool`] and hold them in a [`TemporaryImage`] guard that hands the
//! image back when dropped. Every exit path of a stage, including `?` on a
//! failed pass, therefore releases everything it acquired exactly once.
//!
//! Backends keep released images in a [`FreeList`] bucketed by size and
//! format instead of destroying them, so a pipeline that runs every frame
//! reaches a steady state with no new allocations.

use std::ops::Deref;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::image::{Extent, Image, ImageDesc, PixelFormat};

/// Errors from acquiring a temporary image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The request would push allocated memory past the pool's budget.
    #[error(
        "out of image memory: {requested} bytes requested, {allocated} of {budget} bytes allocated"
    )]
    OutOfMemory {
        requested: u64,
        allocated: u64,
        budget: u64,
    },

    /// Width or height is zero.
    #[error("image dimensions must be non-zero, got {extent}")]
    ZeroSized { extent: Extent },

    /// The underlying device refused the allocation.
    #[error("device allocation failed: {0}")]
    Device(String),
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful `acquire` calls.
    pub acquired: u64,
    /// `release` calls.
    pub released: u64,
    /// Acquires that had to allocate new storage.
    pub allocations: u64,
    /// Bytes of storage currently allocated (in use + pooled).
    pub allocated_bytes: u64,
    /// Released images waiting for reuse.
    pub pooled: usize,
}

impl PoolStats {
    /// Temporaries acquired and not yet released.
    pub fn live(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Source of temporary images.
pub trait BufferPool: Send + Sync {
    /// Acquire an image of exactly `desc`'s size and format, with `desc`'s
    /// filter mode. Contents are undefined until a pass writes them.
    fn acquire(&self, desc: ImageDesc) -> Result<Image, PoolError>;

    /// Return an image obtained from [`acquire`](Self::acquire).
    fn release(&self, image: Image);

    /// Drop every pooled (released) image, freeing its storage.
    fn trim(&self);

    /// Current counters.
    fn stats(&self) -> PoolStats;
}

/// Acquire a temporary that is released when the guard drops.
pub fn acquire_temporary<P: BufferPool + ?Sized>(
    pool: &P,
    desc: ImageDesc,
) -> Result<TemporaryImage<'_, P>, PoolError> {
    let image = pool.acquire(desc)?;
    log::trace!("acquired {} ({})", image.id(), desc.extent);
    Ok(TemporaryImage {
        pool,
        image: Some(image),
    })
}

/// A pool-owned image scoped to one pipeline invocation.
pub struct TemporaryImage<'p, P: BufferPool + ?Sized> {
    pool: &'p P,
    image: Option<Image>,
}

impl<P: BufferPool + ?Sized> TemporaryImage<'_, P> {
    /// The guarded image.
    pub fn image(&self) -> &Image {
        self.image
            .as_ref()
            .expect("temporary image used after release")
    }
}

impl<P: BufferPool + ?Sized> Deref for TemporaryImage<'_, P> {
    type Target = Image;

    fn deref(&self) -> &Image {
        self.image()
    }
}

impl<P: BufferPool + ?Sized> Drop for TemporaryImage<'_, P> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            log::trace!("released {}", image.id());
            self.pool.release(image);
        }
    }
}

/// Bucket key for reusable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    pub extent: Extent,
    pub format: PixelFormat,
}

impl PoolKey {
    /// Storage size of an image in this bucket.
    pub fn byte_size(&self) -> u64 {
        self.extent.area() * self.format.bytes_per_pixel()
    }
}

impl From<&ImageDesc> for PoolKey {
    fn from(desc: &ImageDesc) -> Self {
        Self {
            extent: desc.extent,
            format: desc.format,
        }
    }
}

/// Released storage bucketed by size and format.
struct FreeList<T> {
    buckets: FxHashMap<PoolKey, Vec<T>>,
    len: usize,
}

impl<T> FreeList<T> {
    pub fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
            len: 0,
        }
    }

    /// Take a pooled item matching `key`, if any.
    pub fn take(&mut self, key: PoolKey) -> Option<T> {
        let item = self.buckets.get_mut(&key)?.pop()?;
        self.len -= 1;
        Some(item)
    }

    pub fn put(&mut self, key: PoolKey, item: T) {
        self.buckets.entry(key).or_default().push(item);
        self.len += 1;
    }

    /// Remove every pooled item.
    pub fn drain(&mut self) -> Vec<(PoolKey, T)> {
        self.len = 0;
        self.buckets
            .drain()
            .flat_map(|(key, items)| items.into_iter().map(move |item| (key, item)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// Lock-free counters shared by backend pools.
#[derive(Default)]
struct PoolCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    allocations: AtomicU64,
    allocated_bytes: AtomicU64,
}

impl PoolCounters {
    /// Account for `bytes` of new storage, failing if that would exceed
    /// `budget`.
    pub fn reserve(&self, bytes: u64, budget: Option<u64>) -> Result<(), PoolError> {
        let Some(budget) = budget else {
            self.allocated_bytes.fetch_add(bytes, Ordering::Relaxed);
            return Ok(());
        };
        self.allocated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |allocated| {
                allocated
                    .checked_add(bytes)
                    .filter(|&total| total <= budget)
            })
            .map(|_| ())
            .map_err(|allocated| PoolError::OutOfMemory {
                requested: bytes,
                allocated,
                budget,
            })
    }

    /// Give back storage previously reserved.
    pub fn unreserve(&self, bytes: u64) {
        self.allocated_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pooled: usize) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Acquire),
            pooled,
        }
    }
}

/// Budgeted, bucketed storage shared by the backend pools.
///
/// `T` is whatever backs an image on the backend: a texel vector, a
/// texture. Storage handed out by [`obtain`](Self::obtain) counts against
/// the budget until it is trimmed or passed to [`forget`](Self::forget).
pub(crate) struct StoragePool<T> {
    free: Mutex<FreeList<T>>,
    counters: PoolCounters,
    budget: Option<u64>,
}

impl<T> StoragePool<T> {
    pub fn new(budget: Option<u64>) -> Self {
        Self {
            free: Mutex::new(FreeList::new()),
            counters: PoolCounters::default(),
            budget,
        }
    }

    fn free_list(&self) -> std::sync::MutexGuard<'_, FreeList<T>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pooled storage for `desc`, or new storage from `allocate`.
    ///
    /// When the budget has no room, every pooled item is evicted and the
    /// reservation retried once before giving up.
    pub fn obtain(
        &self,
        desc: &ImageDesc,
        allocate: impl FnOnce() -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(PoolError::ZeroSized {
                extent: desc.extent,
            });
        }

        let key = PoolKey::from(desc);
        let mut free = self.free_list();
        if let Some(storage) = free.take(key) {
            drop(free);
            self.counters.record_acquire();
            return Ok(storage);
        }

        let bytes = key.byte_size();
        if let Err(err) = self.counters.reserve(bytes, self.budget) {
            let evicted = free.drain();
            if evicted.is_empty() {
                return Err(err);
            }
            for (key, _) in &evicted {
                self.counters.unreserve(key.byte_size());
            }
            log::debug!(
                "evicted {} pooled images to fit {bytes} more bytes",
                evicted.len()
            );
            self.counters.reserve(bytes, self.budget)?;
        }
        drop(free);

        match allocate() {
            Ok(storage) => {
                self.counters.record_allocation();
                self.counters.record_acquire();
                Ok(storage)
            }
            Err(err) => {
                self.counters.unreserve(bytes);
                Err(err)
            }
        }
    }

    /// Take back storage from a released image for reuse.
    pub fn recycle(&self, desc: &ImageDesc, storage: T) {
        self.counters.record_release();
        self.free_list().put(PoolKey::from(desc), storage);
    }

    /// Account for a released image whose storage could not be kept.
    pub fn forget(&self, desc: &ImageDesc) {
        self.counters.record_release();
        self.counters.unreserve(desc.byte_size());
    }

    /// Drop all pooled storage. Returns how many items were freed.
    pub fn trim(&self) -> usize {
        let pooled = self.free_list().drain();
        for (key, _) in &pooled {
            self.counters.unreserve(key.byte_size());
        }
        pooled.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.free_list().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    fn desc(width: u32, height: u32) -> ImageDesc {
        ImageDesc::new(width, height, PixelFormat::Rgba8Unorm)
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let backend = CpuBackend::new();
        {
            let temp = acquire_temporary(&backend, desc(8, 8)).unwrap();
            assert_eq!(temp.extent(), Extent::new(8, 8));
            assert_eq!(backend.stats().live(), 1);
        }
        let stats = backend.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn fails_midway(backend: &CpuBackend) -> Result<(), PoolError> {
            let _a = acquire_temporary(backend, desc(4, 4))?;
            let _b = acquire_temporary(backend, desc(0, 4))?;
            Ok(())
        }

        let backend = CpuBackend::new();
        assert!(matches!(
            fails_midway(&backend),
            Err(PoolError::ZeroSized { .. })
        ));
        assert_eq!(backend.stats().live(), 0);
    }

    #[test]
    fn test_pool_reuses_released_images() {
        let backend = CpuBackend::new();
        drop(acquire_temporary(&backend, desc(16, 16)).unwrap());
        let after_first = backend.stats();
        assert_eq!(after_first.pooled, 1);

        drop(acquire_temporary(&backend, desc(16, 16)).unwrap());
        let after_second = backend.stats();
        assert_eq!(after_second.allocations, 1, "pool should reuse, not allocate");
        assert_eq!(after_first.allocated_bytes, after_second.allocated_bytes);
    }

    #[test]
    fn test_different_sizes_dont_mix() {
        let backend = CpuBackend::new();
        drop(acquire_temporary(&backend, desc(16, 16)).unwrap());
        drop(acquire_temporary(&backend, desc(8, 8)).unwrap());
        assert_eq!(backend.stats().allocations, 2);
        assert_eq!(backend.stats().pooled, 2);
    }

    #[test]
    fn test_budget_rejects_oversized_request() {
        let backend = CpuBackend::with_memory_budget(desc(8, 8).byte_size());
        let first = acquire_temporary(&backend, desc(8, 8)).unwrap();
        let err = acquire_temporary(&backend, desc(8, 8)).err().unwrap();
        assert!(matches!(err, PoolError::OutOfMemory { .. }));
        drop(first);
        assert_eq!(backend.stats().live(), 0);
    }

    #[test]
    fn test_budget_evicts_pooled_images_before_failing() {
        let backend = CpuBackend::with_memory_budget(desc(8, 8).byte_size());
        drop(acquire_temporary(&backend, desc(8, 8)).unwrap());
        // The pooled 8x8 is the wrong size; it must be evicted to fit 4x16.
        let temp = acquire_temporary(&backend, desc(4, 16)).unwrap();
        assert_eq!(backend.stats().pooled, 0);
        drop(temp);
    }

    #[test]
    fn test_trim_frees_pooled_storage() {
        let backend = CpuBackend::new();
        drop(acquire_temporary(&backend, desc(32, 32)).unwrap());
        assert!(backend.stats().allocated_bytes > 0);
        backend.trim();
        let stats = backend.stats();
        assert_eq!(stats.pooled, 0);
        assert_eq!(stats.allocated_bytes, 0);
    }

    #[test]
    fn test_counters_reserve_respects_budget() {
        let counters = PoolCounters::default();
        counters.reserve(60, Some(100)).unwrap();
        let err = counters.reserve(50, Some(100)).unwrap_err();
        assert_eq!(
            err,
            PoolError::OutOfMemory {
                requested: 50,
                allocated: 60,
                budget: 100
            }
        );
        counters.unreserve(60);
        counters.reserve(100, Some(100)).unwrap();
    }

    #[test]
    fn test_storage_pool_returns_reservation_on_failed_allocation() {
        let pool: StoragePool<()> = StoragePool::new(None);
        let err = pool
            .obtain(&desc(4, 4), || Err(PoolError::Device("lost".into())))
            .unwrap_err();
        assert_eq!(err, PoolError::Device("lost".into()));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_free_list_buckets() {
        let mut list = FreeList::new();
        let small = PoolKey::from(&desc(2, 2));
        let large = PoolKey::from(&desc(4, 4));
        list.put(small, 1);
        list.put(small, 2);
        list.put(large, 3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.take(large), Some(3));
        assert_eq!(list.take(large), None);
        assert_eq!(list.drain().len(), 2);
        assert_eq!(list.len(), 0);
    }
}
