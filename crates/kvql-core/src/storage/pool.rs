//! Store handle pooling.
//!
//! Handles are created lazily by a factory, reused when returned, and capped
//! at [`PoolConfig::max_handles`] checked out at once.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{PoolConfig, SledStore, StoreError, StructureStore};

/// Opens a new store handle.
pub type HandleFactory<S> = Box<dyn Fn() -> Result<S, StoreError> + Send + Sync>;

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles waiting in the pool.
    pub idle: usize,
    /// Handles currently handed out.
    pub checked_out: usize,
    /// Maximum handles handed out at once.
    pub max_handles: usize,
}

struct PoolState<S> {
    idle: Vec<S>,
    checked_out: usize,
}

struct PoolInner<S> {
    config: PoolConfig,
    factory: HandleFactory<S>,
    state: Mutex<PoolState<S>>,
    available: Condvar,
}

impl<S> PoolInner<S> {
    fn release(&self, handle: S) {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        state.idle.push(handle);
        drop(state);
        self.available.notify_one();
    }

    fn forfeit(&self) {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

/// A pool of store handles shared by concurrent operations.
pub struct StorePool<S: StructureStore> {
    inner: Arc<PoolInner<S>>,
}

impl<S: StructureStore> Clone for StorePool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: StructureStore> StorePool<S> {
    /// Create a pool that opens handles with `factory`.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Result<S, StoreError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    checked_out: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Take a handle, waiting up to the acquire timeout for one to free up.
    pub fn acquire(&self) -> Result<PooledHandle<S>, StoreError> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        loop {
            if let Some(handle) = state.idle.pop() {
                state.checked_out += 1;
                return Ok(PooledHandle::new(handle, self.inner.clone()));
            }

            if state.checked_out < self.inner.config.max_handles {
                state.checked_out += 1;
                drop(state);

                return match (self.inner.factory)() {
                    Ok(handle) => {
                        debug!("Opened new store handle");
                        Ok(PooledHandle::new(handle, self.inner.clone()))
                    }
                    Err(e) => {
                        self.inner.forfeit();
                        Err(e)
                    }
                };
            }

            if self.inner.available.wait_until(&mut state, deadline).timed_out() {
                return Err(StoreError::AcquireTimeout(timeout));
            }
        }
    }

    /// Drop all idle handles. Returns how many were dropped.
    pub fn clear_idle(&self) -> usize {
        let idle = std::mem::take(&mut self.inner.state.lock().idle);
        idle.len()
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            max_handles: self.inner.config.max_handles,
        }
    }
}

impl StorePool<SledStore> {
    /// Pool handles onto one open sled store.
    pub fn for_sled(store: SledStore, config: PoolConfig) -> Self {
        Self::new(config, move || Ok(store.clone()))
    }
}

/// A handle that returns itself to the pool when dropped.
pub struct PooledHandle<S> {
    handle: Option<S>,
    pool: Arc<PoolInner<S>>,
}

impl<S> PooledHandle<S> {
    fn new(handle: S, pool: Arc<PoolInner<S>>) -> Self {
        Self {
            handle: Some(handle),
            pool,
        }
    }
}

impl<S> Deref for PooledHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle is only taken on drop"),
        }
    }
}

impl<S> Drop for PooledHandle<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::storage::StoreConfig;

    fn counting_pool(max: usize) -> (StorePool<SledStore>, Arc<AtomicUsize>) {
        let store = SledStore::open(StoreConfig::temporary()).unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let config = PoolConfig::new(max).with_acquire_timeout(Duration::from_millis(50));
        let pool = StorePool::new(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(store.clone())
        });
        (pool, opened)
    }

    #[test]
    fn test_handles_are_reused() {
        let (pool, opened) = counting_pool(2);

        {
            let _a = pool.acquire().unwrap();
            assert_eq!(pool.stats().checked_out, 1);
        }
        assert_eq!(pool.stats().idle, 1);

        let _b = pool.acquire().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = counting_pool(1);
        let _held = pool.acquire().unwrap();

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, StoreError::AcquireTimeout(_)));
    }

    #[test]
    fn test_waiter_gets_released_handle() {
        let (pool, opened) = counting_pool(1);
        let held = pool.acquire().unwrap();

        let other = pool.clone();
        let waiter = std::thread::spawn(move || other.acquire().map(|_| ()));
        std::thread::sleep(Duration::from_millis(5));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_failure_frees_slot() {
        let pool: StorePool<SledStore> = StorePool::new(PoolConfig::new(1), || {
            Err(StoreError::Unavailable("offline".to_string()))
        });

        assert!(matches!(pool.acquire().err().unwrap(), StoreError::Unavailable(_)));
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[test]
    fn test_clear_idle() {
        let (pool, _) = counting_pool(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.clear_idle(), 2);
        assert_eq!(pool.stats().idle, 0);
    }
}
