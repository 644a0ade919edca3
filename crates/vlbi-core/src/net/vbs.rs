//! `vbs` reader (FlexBuff/Mark6): a scan is a recording split into chunk
//! files scattered across mount points, named
//! `<mountpoint>/<recording>/<recording>.<chunk>`. `VbsScan` discovers and
//! orders the chunks and exposes `read`/`lseek`-style access across the
//! whole logical byte stream, the way the libvbs file descriptor does;
//! the chain-level reader built from it is just a normal streaming
//! producer on top.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ScanChunk {
    pub path: PathBuf,
    pub index: u64,
    pub size: u64,
}

#[derive(Debug)]
pub enum VbsError {
    NoChunksFound(String),
    Io(std::io::Error),
}

impl std::fmt::Display for VbsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VbsError::NoChunksFound(name) => write!(f, "no chunks found for scan '{name}'"),
            VbsError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}
impl std::error::Error for VbsError {}
impl From<std::io::Error> for VbsError {
    fn from(e: std::io::Error) -> Self {
        VbsError::Io(e)
    }
}

/// A scan discovered across one or more mount points: an ordered list of
/// chunk files and their cumulative byte offsets.
pub struct VbsScan {
    chunks: Vec<ScanChunk>,
    cumulative: Vec<u64>,
    total_len: u64,
}

impl VbsScan {
    /// Scans `mountpoints` for files named `<recording>.<N>` inside a
    /// `<recording>/` subdirectory, merges duplicates across mount points
    /// (Mark6/FlexBuff scatter the same scan's chunks across disks), and
    /// orders them by chunk index.
    pub fn open(mountpoints: &[String], recording: &str) -> Result<Self, VbsError> {
        let mut chunks = Vec::new();
        for mp in mountpoints {
            let dir = PathBuf::from(mp).join(recording);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let prefix = format!("{recording}.");
                if let Some(suffix) = name.strip_prefix(&prefix) {
                    if let Ok(index) = suffix.parse::<u64>() {
                        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                        chunks.push(ScanChunk { path, index, size });
                    }
                }
            }
        }
        if chunks.is_empty() {
            return Err(VbsError::NoChunksFound(recording.to_string()));
        }
        chunks.sort_by_key(|c| c.index);

        let mut cumulative = Vec::with_capacity(chunks.len() + 1);
        let mut acc = 0u64;
        cumulative.push(0);
        for c in &chunks {
            acc += c.size;
            cumulative.push(acc);
        }
        let total_len = acc;

        Ok(VbsScan {
            chunks,
            cumulative,
            total_len,
        })
    }

    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Reads up to `buf.len()` bytes starting at logical offset `pos`,
    /// crossing chunk boundaries transparently; returns the number of
    /// bytes actually read (0 at end of scan).
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize, VbsError> {
        if pos >= self.total_len {
            return Ok(0);
        }
        let chunk_idx = match self.cumulative.binary_search(&pos) {
            Ok(i) => i.min(self.chunks.len() - 1),
            Err(i) => i - 1,
        };
        let chunk = &self.chunks[chunk_idx];
        let offset_in_chunk = pos - self.cumulative[chunk_idx];

        let mut file = File::open(&chunk.path)?;
        file.seek(SeekFrom::Start(offset_in_chunk))?;
        let remaining_in_chunk = chunk.size - offset_in_chunk;
        let want = (buf.len() as u64).min(remaining_in_chunk) as usize;
        let n = file.read(&mut buf[..want])?;
        Ok(n)
    }
}

/// Streams an entire scan through the chain, `read_size` bytes at a time,
/// starting at `start_offset` (the `[start, end)` play-pointer range a
/// recall command selects).
pub fn vbs_reader(
    scan: Arc<VbsScan>,
    pool: Arc<BlockPool>,
    read_size: usize,
    start_offset: u64,
    end_offset: Option<u64>,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let end = end_offset.unwrap_or_else(|| scan.len());
        let mut pos = start_offset;
        while pos < end {
            if ctl.is_cancelled() {
                break;
            }
            let mut block = pool.get();
            let want = read_size.min(block.len()).min((end - pos) as usize);
            match scan.read_at(pos, &mut block.as_mut_slice()[..want]) {
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
                    log::warn!("vbs_reader: read error: {e}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn make_scan(dir: &TempDir, recording: &str, chunks: &[&[u8]]) {
        let recdir = dir.path().join(recording);
        std::fs::create_dir_all(&recdir).unwrap();
        for (i, data) in chunks.iter().enumerate() {
            let mut f = File::create(recdir.join(format!("{recording}.{i}"))).unwrap();
            f.write_all(data).unwrap();
        }
    }

    #[test]
    fn scan_discovers_and_orders_chunks_across_mountpoints() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();
        let recdir1 = dir1.path().join("rec001");
        std::fs::create_dir_all(&recdir1).unwrap();
        File::create(recdir1.join("rec001.1"))
            .unwrap()
            .write_all(&[2u8; 4])
            .unwrap();
        let recdir2 = dir2.path().join("rec001");
        std::fs::create_dir_all(&recdir2).unwrap();
        File::create(recdir2.join("rec001.0"))
            .unwrap()
            .write_all(&[1u8; 4])
            .unwrap();

        let mountpoints = vec![
            dir1.path().to_string_lossy().to_string(),
            dir2.path().to_string_lossy().to_string(),
        ];
        let scan = VbsScan::open(&mountpoints, "rec001").unwrap();
        assert_eq!(scan.chunk_count(), 2);
        assert_eq!(scan.len(), 8);

        let mut buf = [0u8; 8];
        let n = scan.read_at(0, &mut buf[..4]).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[1u8; 4]);
    }

    #[test]
    fn missing_recording_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mountpoints = vec![dir.path().to_string_lossy().to_string()];
        assert!(VbsScan::open(&mountpoints, "nope").is_err());
    }

    #[test]
    fn reader_streams_the_whole_scan_through_a_chain() {
        let dir = TempDir::new().unwrap();
        make_scan(&dir, "rec002", &[&[1u8; 8], &[2u8; 8]]);
        let mountpoints = vec![dir.path().to_string_lossy().to_string()];
        let scan = Arc::new(VbsScan::open(&mountpoints, "rec002").unwrap());
        let pool = Arc::new(BlockPool::new(64, 4));
        let received = Arc::new(Mutex::new(Vec::<u8>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(4, vbs_reader(scan, pool, 4, 0, None));
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().extend_from_slice(b.as_slice());
            }
        });
        chain.run();
        chain.wait();

        assert_eq!(*received.lock().unwrap(), [[1u8; 8], [2u8; 8]].concat());
    }
}
