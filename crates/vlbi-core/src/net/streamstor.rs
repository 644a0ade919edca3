//! StreamStor reader: issues `XLRRead`-equivalent calls over a
//! `[start, end)` play-pointer range. The vendor SDK itself is out of
//! scope (§1); `StreamStorHandle` is the opaque boundary the core calls
//! through, and every call on a handle is serialized by a process-global
//! lock the way `do_xlr_lock`/`do_xlr_unlock` serialize real `XLR*` calls
//! against one PCI card.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum StreamStorError {
    NotReady,
    Device(String),
}

impl std::fmt::Display for StreamStorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStorError::NotReady => write!(f, "StreamStor device not ready"),
            StreamStorError::Device(msg) => write!(f, "StreamStor error: {msg}"),
        }
    }
}
impl std::error::Error for StreamStorError {}

/// Opaque vendor SDK boundary. A real implementation wraps the Conduant
/// `XLR*` C API; tests use an in-memory stand-in.
pub trait StreamStorHandle: Send {
    /// Reads up to `buf.len()` bytes starting at play-pointer `offset`.
    /// Returns the number of bytes actually read (0 at end of range).
    fn xlr_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StreamStorError>;

    fn xlr_write(&mut self, buf: &[u8]) -> Result<usize, StreamStorError>;
}

/// Every call into a `StreamStorHandle` goes through this lock: at most
/// one active transfer per runtime, and the vendor card itself has no
/// internal concurrency story of its own.
pub struct XlrLock<H: StreamStorHandle> {
    handle: Mutex<H>,
}

impl<H: StreamStorHandle> XlrLock<H> {
    pub fn new(handle: H) -> Self {
        XlrLock {
            handle: Mutex::new(handle),
        }
    }

    pub fn with_handle<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let mut guard = self.handle.lock().unwrap();
        f(&mut guard)
    }
}

/// Streams `[start, end)` through the chain, `read_size` bytes per block.
pub fn streamstor_reader<H: StreamStorHandle + 'static>(
    device: Arc<XlrLock<H>>,
    pool: Arc<BlockPool>,
    read_size: usize,
    start: u64,
    end: u64,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let mut pos = start;
        while pos < end {
            if ctl.is_cancelled() {
                break;
            }
            let mut block = pool.get();
            let want = read_size.min(block.len()).min((end - pos) as usize);
            let result = device.with_handle(|h| h.xlr_read(pos, &mut block.as_mut_slice()[..want]));
            match result {
                Ok(0) => break,
                Ok(n) => {
                    pos += n as u64;
                    if let Ok(sized) = block.sub(0, n) {
                        if out.push(sized).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::error!("streamstor_reader: {e}");
                    break;
                }
            }
        }
    }
}

pub fn streamstor_writer<H: StreamStorHandle + 'static>(
    device: Arc<XlrLock<H>>,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |inq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let result = device.with_handle(|h| h.xlr_write(block.as_slice()));
            if let Err(e) = result {
                log::error!("streamstor_writer: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::Mutex as StdMutex;

    struct MemoryHandle {
        data: Vec<u8>,
    }
    impl StreamStorHandle for MemoryHandle {
        fn xlr_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StreamStorError> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }
        fn xlr_write(&mut self, buf: &[u8]) -> Result<usize, StreamStorError> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn reader_streams_the_requested_play_pointer_range() {
        let device = Arc::new(XlrLock::new(MemoryHandle {
            data: (0u8..16).collect(),
        }));
        let pool = Arc::new(BlockPool::new(64, 4));
        let received = Arc::new(StdMutex::new(Vec::<u8>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(4, streamstor_reader(device, pool, 4, 2, 10));
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().extend_from_slice(b.as_slice());
            }
        });
        chain.run();
        chain.wait();

        assert_eq!(*received.lock().unwrap(), (2u8..10).collect::<Vec<u8>>());
    }

    #[test]
    fn writer_serializes_every_block_through_the_lock() {
        let device = Arc::new(XlrLock::new(MemoryHandle { data: Vec::new() }));
        let mut chain = Chain::new();
        chain.add_producer(4, |out, _ctl| {
            let pool = BlockPool::new(4, 2);
            let mut b = pool.get();
            b.as_mut_slice().copy_from_slice(&[9, 9, 9, 9]);
            let _ = out.push(b);
        });
        let d = device.clone();
        chain.add_consumer(streamstor_writer(d));
        chain.run();
        chain.wait();

        device.with_handle(|h| assert_eq!(h.data, vec![9, 9, 9, 9]));
    }
}
