//! Channel splitter: an opaque function-object boundary. Building a real
//! splitter (parsing a trackmask, JIT-compiling an extractor kernel) is
//! out of scope (§9); the core only needs somewhere to plug one in.

use crate::block::{Block, BlockPool};
use crate::chain::{BlockQueue, StepControl};
use std::sync::Arc;

/// `(block_in, n_outputs) -> Vec<Block>`: splits one input block into
/// `n_outputs` channel-extracted blocks. Implementations are supplied
/// externally; this crate only calls through the trait.
pub trait ChannelSplitter: Send {
    fn split(&self, input: &Block, pool: &BlockPool) -> Vec<Block>;
    fn n_outputs(&self) -> usize;
}

/// A splitter that performs no extraction: every output channel gets an
/// identical copy of the input. Useful as a default/test double for
/// transfer modes that route through a splitter stage without actually
/// dropping channels.
pub struct IdentitySplitter {
    n: usize,
}

impl IdentitySplitter {
    pub fn new(n: usize) -> Self {
        IdentitySplitter { n: n.max(1) }
    }
}

impl ChannelSplitter for IdentitySplitter {
    fn split(&self, input: &Block, pool: &BlockPool) -> Vec<Block> {
        (0..self.n)
            .map(|_| {
                let mut out = pool.get();
                let n = input.len().min(out.len());
                out.as_mut_slice()[..n].copy_from_slice(&input.as_slice()[..n]);
                out.sub(0, n).unwrap_or(out)
            })
            .collect()
    }

    fn n_outputs(&self) -> usize {
        self.n
    }
}

/// Filter step wrapping any `ChannelSplitter`. Each output block is pushed
/// downstream in split order; a downstream consumer distinguishes streams
/// by arrival order or by a prior tagger step.
pub fn splitter_filter(
    splitter: Arc<dyn ChannelSplitter>,
    pool: Arc<BlockPool>,
) -> impl FnOnce(BlockQueue, BlockQueue, StepControl) + Send {
    move |inq, outq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            for out in splitter.split(&block, &pool) {
                if outq.push(out).is_err() {
                    return;
                }
            }
        }
    }
}
