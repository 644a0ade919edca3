//! TCP (and UNIX domain stream) reader/writer producer/consumer steps.
//!
//! `rtcp` is plain TCP with client/server roles swapped at connection-setup
//! time; once a `TcpStream` exists there's no behavioural difference, so
//! `rtcp` has no separate reader/writer here — only `net::dial`/`net::bind`
//! (outside this module) need to know which side initiates.

use crate::block::{Block, BlockPool};
use crate::chain::{BlockQueue, StepControl};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Poll interval used while waiting on a socket so `StepControl::is_cancelled`
/// can be observed promptly without a real SIGUSR1/EINTR mechanism (see
/// §9's "the mechanism is local" allowance).
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Reads `write_size` bytes per iteration with the `MSG_WAITALL` discipline
/// (here: a `read_exact`-style full-buffer read). When `read_size >
/// write_size` (the decompression case on the receiver), zero-fills the
/// tail of each block so the decompressor sees blanked bit positions.
pub fn tcp_reader(
    mut stream: TcpStream,
    pool: Arc<BlockPool>,
    write_size: usize,
    read_size: usize,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let _ = stream.set_read_timeout(Some(CANCEL_POLL));
        loop {
            if ctl.is_cancelled() {
                break;
            }
            let mut block = pool.get();
            if block.len() < read_size {
                log::error!("tcp_reader: pool block size smaller than read_size, aborting");
                break;
            }
            match read_full(&mut stream, &mut block.as_mut_slice()[..write_size]) {
                Ok(true) => {
                    if read_size > write_size {
                        block.as_mut_slice()[write_size..read_size].fill(0);
                    }
                    if let Ok(sized) = block.sub(0, read_size) {
                        if out.push(sized).is_err() {
                            break;
                        }
                    }
                }
                Ok(false) => {
                    log::info!("tcp_reader: EOF from peer");
                    break;
                }
                Err(e) if would_retry(&e) => continue,
                Err(e) => {
                    log::warn!("tcp_reader: read error: {e}");
                    break;
                }
            }
        }
        let _ = stream.shutdown(std::net::Shutdown::Read);
    }
}

/// Writes each incoming block's first `write_size` bytes to the stream.
pub fn tcp_writer(
    mut stream: TcpStream,
    write_size: usize,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |inq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let n = write_size.min(block.len());
            if let Err(e) = stream.write_all(&block.as_slice()[..n]) {
                log::warn!("tcp_writer: write error: {e}");
                break;
            }
        }
        let _ = stream.shutdown(std::net::Shutdown::Write);
    }
}

/// A cancel_fn suitable for `Chain::register_cancel`: shuts the stream down
/// so a thread blocked in `read`/`write` wakes with an error.
pub fn shutdown_cancel(stream: TcpStream) -> impl Fn() + Send + Sync {
    move || {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}

fn would_retry(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Reads exactly `buf.len()` bytes, or returns `Ok(false)` on a clean EOF
/// with zero bytes consumed so far (mirrors checking for a 0-byte `read()`
/// return before looping).
fn read_full(stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-block",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if would_retry(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
