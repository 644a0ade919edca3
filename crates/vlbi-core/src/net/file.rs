//! File reader/writer: straightforward blocking read/write loops over a
//! regular file, with a `close_filedescriptor`-style cancel_fn.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::Mutex;

/// Reads `read_size` chunks from `file` until EOF or cancellation.
pub fn file_reader(
    file: File,
    pool: Arc<BlockPool>,
    read_size: usize,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let mut file = file;
        loop {
            if ctl.is_cancelled() {
                break;
            }
            let mut block = pool.get();
            let buf = &mut block.as_mut_slice()[..read_size.min(block.len())];
            match read_up_to(&mut file, buf) {
                Ok(0) => {
                    log::info!("file_reader: EOF");
                    break;
                }
                Ok(n) => {
                    if let Ok(sized) = block.sub(0, n) {
                        if out.push(sized).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("file_reader: read error: {e}");
                    break;
                }
            }
        }
    }
}

/// Writes every incoming block to `file` in full.
pub fn file_writer(file: File) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |inq, ctl| {
        let mut file = file;
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            if let Err(e) = file.write_all(block.as_slice()) {
                log::warn!("file_writer: write error: {e}");
                break;
            }
        }
        let _ = file.sync_data();
    }
}

/// A cancel_fn closing the shared file handle, waking a thread blocked in
/// `read`/`write` the same way `close_filedescriptor` does in the original
/// design. Requires the reader/writer closures above to hold their own
/// `File`, not this one — share via `try_clone` before building the step.
pub fn close_filedescriptor(file: Arc<Mutex<Option<File>>>) -> impl Fn() + Send + Sync {
    move || {
        *file.lock().unwrap() = None;
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
