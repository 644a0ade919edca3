//! Reference-counted buffers drawn from grow-on-demand pools.
//!
//! A [`Block`] is a `{base, length}` slice into memory owned by a [`Pool`];
//! copying a block bumps the pool slot's refcount, dropping the last copy
//! returns the slot to the pool. `Block::sub` slices further without
//! touching the pool at all.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Trailing bytes allocated past the last block in a pool so that SSE
/// dechannelizers downstream may overread without segfaulting. Must survive
/// any reimplementation; do not remove.
const TRAILING_PAD: usize = 16;

/// A contiguous, fixed-size slab of `n_blocks` slots of `block_size` bytes
/// plus [`TRAILING_PAD`] bytes, with a parallel array of atomic
/// zero/one counters.
struct Pool {
    storage: Box<[u8]>,
    block_size: usize,
    n_blocks: usize,
    counters: Vec<AtomicU32>,
    next_alloc: AtomicUsize,
}

// The slab is shared across threads: producers fill a slot, a chain hands
// the resulting Block to consumer threads. Aliasing across live Blocks is
// the caller's responsibility, enforced by the chain's ownership-passing
// discipline (queues move blocks between steps, they don't share them).
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    fn new(block_size: usize, n_blocks: usize) -> Self {
        let total = block_size * n_blocks + TRAILING_PAD;
        Pool {
            storage: vec![0u8; total].into_boxed_slice(),
            block_size,
            n_blocks,
            counters: (0..n_blocks).map(|_| AtomicU32::new(0)).collect(),
            next_alloc: AtomicUsize::new(0),
        }
    }

    /// Round-robin scan for a zero-to-one transition. Returns `None` after
    /// one full lap with no free slot.
    fn try_get(self: &Arc<Self>) -> Option<Block> {
        let start = self.next_alloc.fetch_add(1, Ordering::Relaxed) % self.n_blocks;
        for i in 0..self.n_blocks {
            let idx = (start + i) % self.n_blocks;
            if self.counters[idx]
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let inner = Arc::new(BlockInner {
                    pool: self.clone(),
                    slot_index: idx,
                });
                return Some(Block {
                    inner: Some(inner),
                    base: 0,
                    len: self.block_size,
                });
            }
        }
        None
    }

    fn slot_ptr(&self, slot_index: usize) -> *mut u8 {
        let offset = slot_index * self.block_size;
        // SAFETY: offset is always < storage.len() - TRAILING_PAD by construction.
        unsafe { self.storage.as_ptr().add(offset) as *mut u8 }
    }

    fn release(&self, slot_index: usize) {
        self.counters[slot_index].store(0, Ordering::Release);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Poll for up to ~1 second for all refcounts to drain before the
        // backing storage is freed, matching blockpool_type's destructor.
        let deadline = Instant::now() + Duration::from_millis(1000);
        loop {
            let outstanding = self
                .counters
                .iter()
                .filter(|c| c.load(Ordering::Acquire) != 0)
                .count();
            if outstanding == 0 {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "pool dropped with {outstanding} slot(s) still referenced after 1s poll"
                );
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

struct BlockInner {
    pool: Arc<Pool>,
    slot_index: usize,
}

impl Drop for BlockInner {
    fn drop(&mut self) {
        self.pool.release(self.slot_index);
    }
}

/// Error returned by [`Block::sub`] when the requested range does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockError {
    pub offset: usize,
    pub length: usize,
    pub available: usize,
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sub({}, {}) exceeds block length {}",
            self.offset, self.length, self.available
        )
    }
}

impl std::error::Error for BlockError {}

/// A ref-counted slice into pool-owned storage, or an empty block.
///
/// Cloning a `Block` bumps the underlying pool slot's refcount (the clone
/// is free of copies: it shares the same `Arc<BlockInner>`). When the last
/// clone referring to a slot drops, the slot is returned to its pool.
#[derive(Clone)]
pub struct Block {
    inner: Option<Arc<BlockInner>>,
    base: usize,
    len: usize,
}

impl Block {
    /// A block with base=nil, length=0, pointing at no storage.
    pub fn empty() -> Self {
        Block {
            inner: None,
            base: 0,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none() || self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of outstanding references to this block's backing slot (1 if
    /// this block is empty or the sole owner).
    pub fn refcount(&self) -> usize {
        match &self.inner {
            Some(inner) => Arc::strong_count(inner),
            None => 1,
        }
    }

    /// Produces a new block aliasing `self[offset..offset+length]`.
    pub fn sub(&self, offset: usize, length: usize) -> Result<Block, BlockError> {
        if offset + length > self.len {
            return Err(BlockError {
                offset,
                length,
                available: self.len,
            });
        }
        Ok(Block {
            inner: self.inner.clone(),
            base: self.base + offset,
            len: length,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.inner {
            None => &[],
            Some(inner) => {
                let ptr = inner.pool.slot_ptr(inner.slot_index);
                // SAFETY: base+len was bounds-checked at block_size allocation
                // time (get()) or at sub() time (checked against self.len).
                unsafe { std::slice::from_raw_parts(ptr.add(self.base), self.len) }
            }
        }
    }

    /// Exclusive access to this block's bytes. Requires that no other live
    /// `Block` is concurrently writing the same byte range — guaranteed by
    /// the chain's hand-off discipline (a block is owned by exactly one
    /// step at a time, aside from deliberate fan-out via `sub`/duplicator,
    /// which only reads).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &self.inner {
            None => &mut [],
            Some(inner) => {
                let ptr = inner.pool.slot_ptr(inner.slot_index);
                unsafe { std::slice::from_raw_parts_mut(ptr.add(self.base), self.len) }
            }
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// A list of [`Pool`]s that grows on demand.
pub struct BlockPool {
    block_size: usize,
    n_blocks_per_pool: usize,
    pools: std::sync::Mutex<Vec<Arc<Pool>>>,
    curpool: AtomicUsize,
}

impl BlockPool {
    pub fn new(block_size: usize, n_blocks_per_pool: usize) -> Self {
        let first = Arc::new(Pool::new(block_size, n_blocks_per_pool));
        BlockPool {
            block_size,
            n_blocks_per_pool,
            pools: std::sync::Mutex::new(vec![first]),
            curpool: AtomicUsize::new(0),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Tries each pool in rotation starting at `curpool`; on complete
    /// failure, allocates a new pool and retries there.
    pub fn get(&self) -> Block {
        let pools = self.pools.lock().unwrap();
        let n = pools.len();
        let start = self.curpool.load(Ordering::Relaxed) % n;
        for i in 0..n {
            let idx = (start + i) % n;
            if let Some(block) = pools[idx].try_get() {
                self.curpool.store(idx, Ordering::Relaxed);
                return block;
            }
        }
        drop(pools);
        let mut pools = self.pools.lock().unwrap();
        let new_pool = Arc::new(Pool::new(self.block_size, self.n_blocks_per_pool));
        let block = new_pool
            .try_get()
            .expect("a freshly created pool always has a free slot");
        let new_idx = pools.len();
        pools.push(new_pool);
        self.curpool.store(new_idx, Ordering::Relaxed);
        block
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_has_zero_length_and_refcount_one() {
        let b = Block::empty();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);
        assert_eq!(b.refcount(), 1);
    }

    #[test]
    fn get_returns_distinct_non_overlapping_blocks() {
        let pool = BlockPool::new(64, 4);
        let mut a = pool.get();
        let mut b = pool.get();
        a.as_mut_slice().fill(0xAA);
        b.as_mut_slice().fill(0xBB);
        assert!(a.as_slice().iter().all(|&x| x == 0xAA));
        assert!(b.as_slice().iter().all(|&x| x == 0xBB));
    }

    #[test]
    fn pool_exhaustion_grows_a_new_pool() {
        let pool = BlockPool::new(16, 2);
        let _a = pool.get();
        let _b = pool.get();
        assert_eq!(pool.pool_count(), 1);
        let _c = pool.get();
        assert_eq!(pool.pool_count(), 2);
    }

    #[test]
    fn dropping_a_block_frees_its_slot_for_reuse() {
        let pool = BlockPool::new(16, 1);
        {
            let _a = pool.get();
        }
        let _b = pool.get();
        assert_eq!(pool.pool_count(), 1);
    }

    #[test]
    fn sub_bumps_refcount_and_aliases_storage() {
        let pool = BlockPool::new(64, 1);
        let mut a = pool.get();
        a.as_mut_slice()[0..4].copy_from_slice(&[1, 2, 3, 4]);
        let sub = a.sub(0, 4).unwrap();
        assert_eq!(sub.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(a.refcount(), 2);
        drop(sub);
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn sub_out_of_range_fails() {
        let pool = BlockPool::new(16, 1);
        let a = pool.get();
        let err = a.sub(10, 10).unwrap_err();
        assert_eq!(err.available, 16);
    }

    #[test]
    fn refcount_sum_matches_live_references() {
        let pool = BlockPool::new(32, 1);
        let a = pool.get();
        let b = a.clone();
        let c = a.sub(0, 16).unwrap();
        assert_eq!(a.refcount(), 3);
        drop(b);
        assert_eq!(a.refcount(), 2);
        drop(c);
        assert_eq!(a.refcount(), 1);
    }
}
