//! DEFLATE compressor/decompressor filter steps. Each incoming block is
//! compressed/decompressed independently (no cross-block dictionary),
//! matching the per-read_size-chunk framing the constraint solver assumes
//! when it sizes `read_size`/`write_size` around a compression ratio.

use crate::block::BlockPool;
use crate::chain::BlockQueue;
use crate::chain::StepControl;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::sync::Arc;

/// Compresses each block down to at most `write_size` bytes, padding with
/// zeros if the compressed form is shorter (the solver's `write_size` is a
/// fixed datagram payload, not a variable length).
pub fn compressor(
    pool: Arc<BlockPool>,
    write_size: usize,
    level: Compression,
) -> impl FnOnce(BlockQueue, BlockQueue, StepControl) + Send {
    move |inq, outq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let mut encoder = DeflateEncoder::new(Vec::new(), level);
            if let Err(e) = encoder.write_all(block.as_slice()) {
                log::warn!("compressor: write error: {e}");
                continue;
            }
            let compressed = match encoder.finish() {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("compressor: finish error: {e}");
                    continue;
                }
            };
            if compressed.len() > write_size {
                log::warn!(
                    "compressor: compressed size {} exceeds write_size {write_size}, truncating",
                    compressed.len()
                );
            }
            let mut out = pool.get();
            let n = compressed.len().min(write_size).min(out.len());
            out.as_mut_slice()[..n].copy_from_slice(&compressed[..n]);
            if n < out.len() {
                out.as_mut_slice()[n..].fill(0);
            }
            if let Ok(sized) = out.sub(0, write_size.min(out.len())) {
                if outq.push(sized).is_err() {
                    break;
                }
            }
        }
    }
}

/// Decompresses each incoming (fixed `write_size`) block back to
/// `read_size` bytes.
pub fn decompressor(
    pool: Arc<BlockPool>,
    read_size: usize,
) -> impl FnOnce(BlockQueue, BlockQueue, StepControl) + Send {
    move |inq, outq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let mut decoder = DeflateDecoder::new(block.as_slice());
            let mut decompressed = Vec::with_capacity(read_size);
            if let Err(e) = decoder.read_to_end(&mut decompressed) {
                log::warn!("decompressor: read error: {e}");
                continue;
            }
            let mut out = pool.get();
            let n = decompressed.len().min(read_size).min(out.len());
            out.as_mut_slice()[..n].copy_from_slice(&decompressed[..n]);
            if n < out.len() {
                out.as_mut_slice()[n..].fill(0);
            }
            if let Ok(sized) = out.sub(0, read_size.min(out.len())) {
                if outq.push(sized).is_err() {
                    break;
                }
            }
        }
    }
}
