//! Fill-pattern generator for `fill2net`/`spill2net`-style transfer modes:
//! a producer that needs no real data source, filling blocks with a
//! repeating 64-bit pattern that increments by a configurable step each
//! word — standing in for the recorder when no hardware is attached.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use std::sync::Arc;

/// jive5ab's documented default fill pattern start value.
pub const DEFAULT_FILL_START: u64 = 0x1122_3344_1122_3344;
pub const DEFAULT_FILL_INCREMENT: u64 = 0;

pub struct FillPattern {
    pub start: u64,
    pub increment: u64,
}

impl Default for FillPattern {
    fn default() -> Self {
        FillPattern {
            start: DEFAULT_FILL_START,
            increment: DEFAULT_FILL_INCREMENT,
        }
    }
}

/// Producer emitting `n_blocks` blocks (or forever if `n_blocks` is
/// `None`) filled with the fill pattern, each 8-byte word one increment
/// further along than the last.
pub fn faker(
    pool: Arc<BlockPool>,
    block_size: usize,
    pattern: FillPattern,
    n_blocks: Option<u64>,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let mut word = pattern.start;
        let mut emitted = 0u64;
        loop {
            if ctl.is_cancelled() {
                break;
            }
            if let Some(limit) = n_blocks {
                if emitted >= limit {
                    break;
                }
            }
            let mut block = pool.get();
            let n = block_size.min(block.len());
            {
                let slice = block.as_mut_slice();
                let mut i = 0;
                while i + 8 <= n {
                    slice[i..i + 8].copy_from_slice(&word.to_be_bytes());
                    word = word.wrapping_add(pattern.increment);
                    i += 8;
                }
                if i < n {
                    let tail = word.to_be_bytes();
                    slice[i..n].copy_from_slice(&tail[..n - i]);
                }
            }
            if let Ok(sized) = block.sub(0, n) {
                if out.push(sized).is_err() {
                    break;
                }
            }
            emitted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::Mutex;

    #[test]
    fn faker_emits_exactly_n_blocks_filled_with_the_pattern() {
        let pool = Arc::new(BlockPool::new(16, 4));
        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(
            4,
            faker(pool, 16, FillPattern::default(), Some(3)),
        );
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().push(b.as_slice().to_vec());
            }
        });
        chain.run();
        chain.wait();

        let blocks = received.lock().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(&blocks[0][0..8], &DEFAULT_FILL_START.to_be_bytes());
    }

    #[test]
    fn increment_advances_each_word() {
        let pool = Arc::new(BlockPool::new(16, 4));
        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(
            4,
            faker(
                pool,
                16,
                FillPattern {
                    start: 0,
                    increment: 1,
                },
                Some(1),
            ),
        );
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().push(b.as_slice().to_vec());
            }
        });
        chain.run();
        chain.wait();

        let blocks = received.lock().unwrap();
        let first_word = u64::from_be_bytes(blocks[0][0..8].try_into().unwrap());
        let second_word = u64::from_be_bytes(blocks[0][8..16].try_into().unwrap());
        assert_eq!(first_word, 0);
        assert_eq!(second_word, 1);
    }
}
