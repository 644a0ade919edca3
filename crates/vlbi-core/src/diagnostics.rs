//! Session diagnostics: a serializable point-in-time snapshot of a
//! runtime's transfer statistics, writable to disk. Supplements the
//! specified core with an operator-facing artifact in the same spirit as
//! a `status?` reply, but structured for machine consumption instead of
//! VSI/S line formatting.

use crate::runtime::Runtime;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct PerSenderSnapshot {
    pub sender: String,
    pub pktcnt: u64,
    pub loscnt: u64,
    pub ooocnt: u64,
    pub ooosum: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionReport {
    pub runtime_id: u64,
    pub transfermode: String,
    pub pending_errors: usize,
    pub senders: Vec<PerSenderSnapshot>,
    pub protect_count: u32,
}

impl SessionReport {
    pub fn capture(runtime: &Runtime) -> Self {
        let senders = runtime
            .per_sender
            .senders()
            .into_iter()
            .filter_map(|addr| {
                runtime.per_sender.snapshot(&addr).map(|ps| PerSenderSnapshot {
                    sender: addr.to_string(),
                    pktcnt: ps.pktcnt,
                    loscnt: ps.loscnt(),
                    ooocnt: ps.ooocnt,
                    ooosum: ps.ooosum,
                })
            })
            .collect();

        SessionReport {
            runtime_id: runtime.id,
            transfermode: runtime.transfermode().to_string(),
            pending_errors: runtime.errors.len(),
            senders,
            protect_count: runtime.protect_count.load(std::sync::atomic::Ordering::SeqCst),
        }
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())
    }
}
