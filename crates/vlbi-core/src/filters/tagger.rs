//! Stream-id tagger: prefixes each block with a 4-byte big-endian stream
//! tag so a downstream consumer fed by several tagged sources (multifd,
//! tagged udps) can route by origin without a side channel.

use crate::block::{Block, BlockPool};
use crate::chain::{BlockQueue, StepControl};
use std::sync::Arc;

pub const TAG_BYTES: usize = 4;

/// Prepends `tag` to every block passing through.
pub fn tagger(tag: u32, pool: Arc<BlockPool>) -> impl FnOnce(BlockQueue, BlockQueue, StepControl) + Send {
    move |inq, outq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let mut out = pool.get();
            let total = TAG_BYTES + block.len();
            if total > out.len() {
                log::warn!("tagger: pool block too small for tag + payload");
                continue;
            }
            out.as_mut_slice()[..TAG_BYTES].copy_from_slice(&tag.to_be_bytes());
            out.as_mut_slice()[TAG_BYTES..total].copy_from_slice(block.as_slice());
            if let Ok(sized) = out.sub(0, total) {
                if outq.push(sized).is_err() {
                    break;
                }
            }
        }
    }
}

/// Splits a tagged block back into `(tag, payload)`.
pub fn read_tag(block: &Block) -> Option<(u32, &[u8])> {
    let data = block.as_slice();
    if data.len() < TAG_BYTES {
        return None;
    }
    let tag = u32::from_be_bytes(data[..TAG_BYTES].try_into().unwrap());
    Some((tag, &data[TAG_BYTES..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::Mutex;

    #[test]
    fn tagger_prefixes_then_read_tag_recovers_it() {
        let pool = Arc::new(BlockPool::new(64, 4));
        let received = Arc::new(Mutex::new(Vec::<Block>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(2, |out, _ctl| {
            let pool = BlockPool::new(64, 2);
            let mut b = pool.get();
            b.as_mut_slice()[..4].copy_from_slice(&[9, 9, 9, 9]);
            let _ = out.push(b.sub(0, 4).unwrap());
        });
        chain.add_filter(2, tagger(42, pool));
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().push(b);
            }
        });
        chain.run();
        chain.wait();

        let blocks = received.lock().unwrap();
        let (tag, payload) = read_tag(&blocks[0]).unwrap();
        assert_eq!(tag, 42);
        assert_eq!(payload, &[9, 9, 9, 9]);
    }
}
