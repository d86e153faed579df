//! Buffer and path pools
//!
//! Each pool guards its free list with a single mutex. Claimed buffers are
//! owned by the caller until they are handed back with `release`, which
//! clears them (without zeroing) before they can be claimed again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use navgraph_common::{Error, Result};

use crate::path::{Path, PathHandle, PathShared};

/// Number of recently released lists inspected when a capacity is requested
const MAX_CAPACITY_SEARCH_LENGTH: usize = 8;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pool of growable lists
#[derive(Debug)]
pub struct ListPool<T> {
    pool: Mutex<Vec<Vec<T>>>,
}

impl<T> Default for ListPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListPool<T> {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
        }
    }

    /// An empty list, reused if one is available
    pub fn claim(&self) -> Vec<T> {
        lock(&self.pool).pop().unwrap_or_default()
    }

    /// An empty list with room for at least `capacity` items.
    ///
    /// Prefers a recently released list that is already large enough.
    pub fn claim_with_capacity(&self, capacity: usize) -> Vec<T> {
        let mut pool = lock(&self.pool);
        let n = pool.len();
        for i in (n.saturating_sub(MAX_CAPACITY_SEARCH_LENGTH)..n).rev() {
            if pool[i].capacity() >= capacity {
                return pool.swap_remove(i);
            }
        }
        let mut list = pool.pop().unwrap_or_default();
        list.reserve(capacity);
        list
    }

    /// Clears the list and returns it to the pool
    pub fn release(&self, mut list: Vec<T>) -> Result<()> {
        list.clear();
        let mut pool = lock(&self.pool);
        #[cfg(debug_assertions)]
        if list.capacity() > 0 && pool.iter().any(|l| std::ptr::eq(l.as_ptr(), list.as_ptr())) {
            return Err(Error::Pool(
                "the list has already been released. Are you releasing it twice?".to_string(),
            ));
        }
        pool.push(list);
        Ok(())
    }

    pub fn pooled_count(&self) -> usize {
        lock(&self.pool).len()
    }
}

/// Pool of fixed size arrays bucketed by power of two length
#[derive(Debug)]
pub struct ArrayPool<T> {
    buckets: Mutex<Vec<Vec<Box<[T]>>>>,
}

impl<T> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArrayPool<T> {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
        }
    }

    /// Returns the array to its bucket. The contents are left as they are.
    pub fn release(&self, array: Box<[T]>) -> Result<()> {
        let len = array.len();
        if !len.is_power_of_two() {
            return Err(Error::Pool(format!(
                "array length {len} is not a power of two, it was not claimed from this pool"
            )));
        }
        let bucket = len.trailing_zeros() as usize;
        let mut buckets = lock(&self.buckets);
        if buckets.len() <= bucket {
            buckets.resize_with(bucket + 1, Vec::new);
        }
        #[cfg(debug_assertions)]
        if buckets[bucket].iter().any(|a| std::ptr::eq(a.as_ptr(), array.as_ptr())) {
            return Err(Error::Pool(
                "the array has already been released. Are you releasing it twice?".to_string(),
            ));
        }
        buckets[bucket].push(array);
        Ok(())
    }

    pub fn pooled_count(&self) -> usize {
        lock(&self.buckets).iter().map(Vec::len).sum()
    }
}

impl<T: Default + Clone> ArrayPool<T> {
    /// An array of at least `min_len` elements, its length rounded up to a
    /// power of two. Reused arrays keep their previous contents.
    pub fn claim(&self, min_len: usize) -> Box<[T]> {
        let len = min_len.max(1).next_power_of_two();
        let bucket = len.trailing_zeros() as usize;
        let reused = lock(&self.buckets).get_mut(bucket).and_then(Vec::pop);
        reused.unwrap_or_else(|| vec![T::default(); len].into_boxed_slice())
    }
}

fn no_reset<T>(_: &mut T) {}

/// Pool of reusable objects
#[derive(Debug)]
pub struct ObjectPool<T> {
    pool: Mutex<Vec<T>>,
    reset: fn(&mut T),
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::with_reset(no_reset::<T>)
    }
}

impl<T> ObjectPool<T> {
    /// A pool that calls `reset` on every released object
    pub fn with_reset(reset: fn(&mut T)) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            reset,
        }
    }

    pub fn release(&self, mut object: T) {
        (self.reset)(&mut object);
        lock(&self.pool).push(object);
    }

    pub fn pooled_count(&self) -> usize {
        lock(&self.pool).len()
    }
}

impl<T: Default> ObjectPool<T> {
    pub fn claim(&self) -> T {
        lock(&self.pool).pop().unwrap_or_default()
    }
}

#[derive(Debug)]
pub(crate) struct PathPoolInner<P> {
    pooled: Mutex<Vec<Arc<PathShared<P>>>>,
    total_created: AtomicUsize,
}

impl<P: Path + Default> PathPoolInner<P> {
    pub(crate) fn put(&self, path: Arc<PathShared<P>>) {
        lock(&self.pooled).push(path);
    }
}

/// Recycles path objects.
///
/// A path goes back to the pool once every claim on its handle has been
/// released and at least one of those releases was not silent. It is only
/// handed out again after every handle to it has been dropped.
#[derive(Debug)]
pub struct PathPool<P> {
    inner: Arc<PathPoolInner<P>>,
}

impl<P> Clone for PathPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Path + Default> Default for PathPool<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Path + Default> PathPool<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PathPoolInner {
                pooled: Mutex::new(Vec::new()),
                total_created: AtomicUsize::new(0),
            }),
        }
    }

    /// A reset path, recycled if a pooled one is no longer referenced
    pub fn get(&self) -> PathHandle<P> {
        let recycled = {
            let mut pooled = lock(&self.inner.pooled);
            pooled
                .iter()
                .position(|shared| Arc::strong_count(shared) == 1)
                .map(|i| pooled.swap_remove(i))
        };
        match recycled {
            Some(shared) => {
                shared.recycle();
                PathHandle::from_shared(shared)
            }
            None => {
                self.inner.total_created.fetch_add(1, Ordering::Relaxed);
                PathHandle::pooled(P::default(), Arc::downgrade(&self.inner))
            }
        }
    }

    /// Number of path objects this pool has allocated
    pub fn total_created(&self) -> usize {
        self.inner.total_created.load(Ordering::Relaxed)
    }

    /// Number of released paths waiting for reuse
    pub fn pooled_count(&self) -> usize {
        lock(&self.inner.pooled).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ab_path::ABPath;
    use crate::path::ClaimKey;
    use glam::Vec3;

    #[test]
    fn test_list_pool_reuses_cleared_lists() -> Result<()> {
        let pool = ListPool::<u32>::new();
        let mut list = pool.claim();
        list.extend([1, 2, 3]);
        let capacity = list.capacity();
        pool.release(list)?;
        assert_eq!(pool.pooled_count(), 1);

        let list = pool.claim_with_capacity(2);
        assert!(list.is_empty());
        assert_eq!(list.capacity(), capacity);
        assert_eq!(pool.pooled_count(), 0);

        let big = pool.claim_with_capacity(1000);
        assert!(big.capacity() >= 1000);
        Ok(())
    }

    #[test]
    fn test_array_pool_buckets() -> Result<()> {
        let pool = ArrayPool::<u32>::new();
        let mut array = pool.claim(5);
        assert_eq!(array.len(), 8);
        array[0] = 42;
        pool.release(array)?;

        // Released arrays are not zeroed
        let array = pool.claim(7);
        assert_eq!(array.len(), 8);
        assert_eq!(array[0], 42);

        assert_eq!(pool.claim(0).len(), 1);
        assert!(pool.release(vec![0u32; 3].into_boxed_slice()).is_err());
        Ok(())
    }

    #[test]
    fn test_claimed_buffers_are_distinct() {
        let pool = ListPool::<u8>::new();
        let a = pool.claim_with_capacity(16);
        let b = pool.claim_with_capacity(16);
        assert!(!std::ptr::eq(a.as_ptr(), b.as_ptr()));
    }

    #[test]
    fn test_object_pool_resets() {
        let pool = ObjectPool::<Vec<i32>>::with_reset(|v| v.clear());
        let mut v = pool.claim();
        v.push(1);
        pool.release(v);
        assert_eq!(pool.pooled_count(), 1);
        assert!(pool.claim().is_empty());
    }

    #[test]
    fn test_path_pool_recycles_after_release() -> Result<()> {
        let pool = PathPool::<ABPath>::new();
        let handle = pool.get();
        handle.lock().setup(Vec3::ZERO, Vec3::ONE);
        let first_id = handle.lock().base().path_id();
        let key = ClaimKey::unique();
        handle.claim(key)?;
        handle.release(key)?;

        assert!(handle.is_pooled());
        assert!(handle.claim(key).is_err());
        assert_eq!(pool.pooled_count(), 1);

        // A live handle keeps the pooled path from being handed out
        let other = pool.get();
        assert_eq!(pool.total_created(), 2);
        drop(other);

        drop(handle);
        let again = pool.get();
        assert_eq!(pool.total_created(), 2);
        assert!(!again.is_pooled());
        assert_ne!(again.lock().base().path_id(), first_id);
        assert!(again.claim(key).is_ok());
        Ok(())
    }

    #[test]
    fn test_silent_release_does_not_recycle() -> Result<()> {
        let pool = PathPool::<ABPath>::new();
        let handle = pool.get();
        let key = ClaimKey::unique();
        handle.claim(key)?;
        handle.release_silent(key)?;
        assert!(!handle.is_pooled());
        assert_eq!(pool.pooled_count(), 0);
        Ok(())
    }
}
