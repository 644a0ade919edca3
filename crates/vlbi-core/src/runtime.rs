//! The per-session `Runtime` container (§4.2): everything a single VSI/S
//! client connection's transfer state lives in. One `Runtime` per
//! connection; commands lock it to read or mutate state, matching §5's
//! "cross-connection commands are serialized by the runtime mutex
//! wherever they mutate runtime state".

use crate::chain::Chain;
use crate::command::commands::TrackmaskState;
use crate::constraints::Sizes;
use crate::error_queue::ErrorQueue;
use crate::net::interchain::InterchainRegistry;
use crate::net::per_sender::PerSenderTable;
use crate::netparms::NetParms;
use crate::per_runtime::PerRuntimeCache;
use crate::transfermode::{TransferMode, TransferSubmode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Unique id assigned to each `Runtime` at construction, used to key
/// per-runtime caches the way the original keys them by runtime pointer.
pub type RuntimeId = u64;

fn next_runtime_id() -> RuntimeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Per-tag eVLBI statistics snapshot (bytes/packets seen for one stream
/// id), keyed in the runtime's `evlbi_stats` map.
#[derive(Debug, Clone, Default)]
pub struct EvlbiStats {
    pub bytes: u64,
    pub packets: u64,
}

/// Bitmask of which disks in a pack are currently available, mirroring
/// the original `disk_state_mask`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStateMask(pub u32);

impl DiskStateMask {
    pub fn is_available(&self, disk: u32) -> bool {
        disk < 32 && (self.0 & (1 << disk)) != 0
    }
}

const TRACKMASK_CACHE_KEY: &str = "trackmask";

/// Per-session state: netparms, transfer mode/submode, the installed
/// chain, statistics, device handles (opaque to this crate), interchain
/// queue pointer, eVLBI stats, disk-state-mask, protect-count, and the
/// per-runtime generic cache (which is where the trackmask solver's
/// pending/complete handle lives — see [`Runtime::trackmask`]).
pub struct Runtime {
    pub id: RuntimeId,
    pub netparms: Mutex<NetParms>,
    transfermode: Mutex<TransferMode>,
    pub transfer_submode: Mutex<TransferSubmode>,
    pub chain: Mutex<Option<Chain>>,
    pub sizes: Mutex<Option<Sizes>>,
    pub per_sender: Arc<PerSenderTable>,
    pub errors: Arc<ErrorQueue>,
    pub interchain: Arc<InterchainRegistry>,
    pub evlbi_stats: Mutex<HashMap<u32, EvlbiStats>>,
    pub disk_state_mask: Mutex<DiskStateMask>,
    pub protect_count: AtomicU32,
    pub cache: PerRuntimeCache,
}

impl Runtime {
    pub fn new() -> Self {
        let cache = PerRuntimeCache::new();
        cache.insert(
            TRACKMASK_CACHE_KEY,
            Arc::new(Mutex::new(TrackmaskState::default())),
        );
        Runtime {
            id: next_runtime_id(),
            netparms: Mutex::new(NetParms::default()),
            transfermode: Mutex::new(TransferMode::NoTransfer),
            transfer_submode: Mutex::new(TransferSubmode::new()),
            chain: Mutex::new(None),
            sizes: Mutex::new(None),
            per_sender: Arc::new(PerSenderTable::new()),
            errors: Arc::new(ErrorQueue::new()),
            interchain: Arc::new(InterchainRegistry::new()),
            evlbi_stats: Mutex::new(HashMap::new()),
            disk_state_mask: Mutex::new(DiskStateMask::default()),
            protect_count: AtomicU32::new(0),
            cache,
        }
    }

    pub fn transfermode(&self) -> TransferMode {
        *self.transfermode.lock().unwrap()
    }

    /// The trackmask solver's shared pending/complete handle, pulled out
    /// of the per-runtime cache. Always present — inserted at construction.
    pub fn trackmask(&self) -> Arc<Mutex<TrackmaskState>> {
        self.cache
            .get::<Arc<Mutex<TrackmaskState>>, _>(TRACKMASK_CACHE_KEY, |h| h.clone())
            .expect("trackmask handle inserted in Runtime::new")
    }

    /// Installs `chain` and atomically sets the transfer mode, per §4.8's
    /// "no_transfer -> X: a start command installs a chain and atomically
    /// sets transfermode=X" transition. Both fields share one lock
    /// acquisition order (transfermode after chain) to avoid races with
    /// `stop_transfer`.
    pub fn start_transfer(&self, mode: TransferMode, chain: Chain) {
        let mut chain_slot = self.chain.lock().unwrap();
        let mut tm = self.transfermode.lock().unwrap();
        *chain_slot = Some(chain);
        *tm = mode;
    }

    /// §4.8's "X -> no_transfer: a stop/close command invokes
    /// chain.stop() ... and then sets transfermode=no_transfer". Runs
    /// `chain.stop()` (or `delayed_disable` if `drain` is set) before
    /// releasing the transfermode lock, so a concurrent query never
    /// observes `no_transfer` while the chain is still tearing down.
    pub fn stop_transfer(&self, drain: bool) {
        let mut chain_slot = self.chain.lock().unwrap();
        if let Some(mut chain) = chain_slot.take() {
            if drain {
                chain.delayed_disable();
            } else {
                chain.stop();
            }
        }
        *self.transfermode.lock().unwrap() = TransferMode::NoTransfer;
    }

    pub fn protect(&self) {
        self.protect_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unprotect(&self) -> u32 {
        self.protect_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn is_protected(&self) -> bool {
        self.protect_count.load(Ordering::SeqCst) > 0
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;

    #[test]
    fn start_transfer_installs_chain_and_sets_mode_together() {
        let rt = Runtime::new();
        assert_eq!(rt.transfermode(), TransferMode::NoTransfer);
        let mut chain = Chain::new();
        chain.add_producer(1, |_out, _ctl| {});
        chain.add_consumer(|inq, _ctl| while inq.pop().is_some() {});
        rt.start_transfer(TransferMode::In2Net, chain);
        assert_eq!(rt.transfermode(), TransferMode::In2Net);
        assert!(rt.chain.lock().unwrap().is_some());
    }

    #[test]
    fn stop_transfer_tears_down_the_chain_and_resets_mode() {
        let rt = Runtime::new();
        let mut chain = Chain::new();
        chain.add_producer(1, |_out, ctl| while !ctl.is_cancelled() {});
        chain.add_consumer(|inq, _ctl| while inq.pop().is_some() {});
        chain.run();
        rt.start_transfer(TransferMode::In2Net, chain);
        rt.stop_transfer(false);
        assert_eq!(rt.transfermode(), TransferMode::NoTransfer);
        assert!(rt.chain.lock().unwrap().is_none());
    }

    #[test]
    fn protect_count_tracks_nested_protect_unprotect_calls() {
        let rt = Runtime::new();
        assert!(!rt.is_protected());
        rt.protect();
        rt.protect();
        assert!(rt.is_protected());
        rt.unprotect();
        assert!(rt.is_protected());
        rt.unprotect();
        assert!(!rt.is_protected());
    }

    #[test]
    fn each_runtime_gets_a_distinct_id() {
        let a = Runtime::new();
        let b = Runtime::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn trackmask_handle_is_stable_across_repeated_lookups() {
        let rt = Runtime::new();
        let a = rt.trackmask();
        let b = rt.trackmask();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
