//! `udt` protocol: approximates UDT's ack-based congestion control over a
//! plain `UdpSocket`, since no maintained UDT binding exists in this
//! ecosystem (see DESIGN.md's Open Question resolution). The reader side
//! reuses the same sequence-numbered-datagram and `PerSenderTable`
//! machinery as `udps`; the writer side is the interesting half — it
//! reacts to each incoming ACK token by nudging its inter-packet delay,
//! the same idea as `libudt11::IPDBasedCC::onACK`.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use crate::net::per_sender::PerSenderTable;
use crate::net::udps::udps_reader;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Running totals harvested from the equivalent of periodic `UDT::perfmon`
/// polling: total packets received and the loss count derived from the
/// same per-sender accounting `udps` uses.
#[derive(Default)]
pub struct UdtPerfmon {
    pub pkt_recv_total: std::sync::atomic::AtomicU64,
    pub pkt_rcv_loss: std::sync::atomic::AtomicU64,
}

impl UdtPerfmon {
    pub fn sample(&self, table: &PerSenderTable, sender: &SocketAddr) {
        if let Some(snap) = table.snapshot(sender) {
            self.pkt_recv_total
                .store(snap.pktcnt, Ordering::Relaxed);
            self.pkt_rcv_loss
                .store(snap.loscnt(), Ordering::Relaxed);
        }
    }
}

/// Reader is identical in structure to `udps_reader`: UDT's sequencing and
/// selective-ack machinery collapses, for our purposes, onto the same
/// PSN/ACK bookkeeping already implemented for `udps`.
pub fn udt_reader(
    socket: UdpSocket,
    pool: Arc<BlockPool>,
    payload_size: usize,
    window: usize,
    ack_period: Arc<AtomicU32>,
    stats: Arc<PerSenderTable>,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    udps_reader(socket, pool, payload_size, window, ack_period, stats, None)
}

/// Minimum and maximum inter-packet delay the controller will settle on,
/// mirroring `IPDBasedCC`'s clamping of its adjustment step.
const MIN_IPD_NS: i64 = 0;
const MAX_IPD_NS: i64 = 10_000_000;
const IPD_STEP_NS: i64 = 1_000;

/// Shared, atomically-updated inter-packet delay a writer consults before
/// each send. Exposed separately so an ACK-listening thread and the
/// sending thread can run independently, matching UDT's split between its
/// CC callback and its sender loop.
#[derive(Clone)]
pub struct CongestionState {
    ipd_ns: Arc<AtomicI64>,
    last_token_index: Arc<std::sync::atomic::AtomicUsize>,
}

impl CongestionState {
    pub fn new(initial_ipd_ns: i64) -> Self {
        CongestionState {
            ipd_ns: Arc::new(AtomicI64::new(initial_ipd_ns.clamp(MIN_IPD_NS, MAX_IPD_NS))),
            last_token_index: Arc::new(std::sync::atomic::AtomicUsize::new(usize::MAX)),
        }
    }

    pub fn ipd(&self) -> Duration {
        Duration::from_nanos(self.ipd_ns.load(Ordering::Relaxed).max(0) as u64)
    }

    /// `onACK` equivalent: a rotating token distinct from the last one
    /// seen means the sender got through and can speed up slightly; the
    /// same token repeating means the receiver's own read loop is
    /// stalled, and we back off.
    pub fn on_ack(&self, token_index: usize) {
        let prev = self.last_token_index.swap(token_index, Ordering::Relaxed);
        if prev == token_index {
            let cur = self.ipd_ns.load(Ordering::Relaxed);
            self.ipd_ns
                .store((cur + IPD_STEP_NS).min(MAX_IPD_NS), Ordering::Relaxed);
        } else {
            let cur = self.ipd_ns.load(Ordering::Relaxed);
            self.ipd_ns
                .store((cur - IPD_STEP_NS).max(MIN_IPD_NS), Ordering::Relaxed);
        }
    }
}

/// Writer: sends sequence-numbered datagrams at the rate set by
/// `congestion`, which an ACK-listener thread updates concurrently by
/// watching for the rotating tokens the receiver's `PerSenderTable` emits.
pub fn udt_writer(
    socket: UdpSocket,
    destination: SocketAddr,
    payload_size: usize,
    congestion: CongestionState,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |inq, ctl| {
        let mut seqnr: u64 = 0;
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            let mut datagram = Vec::with_capacity(8 + payload_size);
            datagram.extend_from_slice(&seqnr.to_be_bytes());
            let n = payload_size.min(block.len());
            datagram.extend_from_slice(&block.as_slice()[..n]);
            if let Err(e) = socket.send_to(&datagram, destination) {
                log::warn!("udt_writer: send error: {e}");
                break;
            }
            seqnr += 1;
            let ipd = congestion.ipd();
            if !ipd.is_zero() {
                std::thread::sleep(ipd);
            }
        }
    }
}

/// Listens for ACK tokens arriving on `socket` and feeds them to
/// `congestion`. Runs on its own thread, independent of the send loop,
/// matching UDT's separation of the CC callback from data transmission.
/// Known ACK tokens are looked up by index into the shared rotation table
/// so `on_ack` can detect repeats without string comparison cost per call.
pub fn ack_listener(
    socket: UdpSocket,
    congestion: CongestionState,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
) {
    use crate::net::per_sender::ACK_TOKENS;
    let _ = socket.set_read_timeout(Some(Duration::from_millis(200)));
    let mut buf = [0u8; 64];
    loop {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        match socket.recv(&mut buf) {
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                if let Some(idx) = ACK_TOKENS.iter().position(|t| *t == text) {
                    congestion.on_ack(idx);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_ack_token_increases_inter_packet_delay() {
        let cc = CongestionState::new(0);
        cc.on_ack(0);
        let after_first = cc.ipd_ns.load(Ordering::Relaxed);
        cc.on_ack(0);
        let after_repeat = cc.ipd_ns.load(Ordering::Relaxed);
        assert!(after_repeat >= after_first);
    }

    #[test]
    fn fresh_ack_token_decreases_inter_packet_delay() {
        let cc = CongestionState::new(5_000);
        cc.on_ack(0);
        cc.on_ack(0);
        let backed_off = cc.ipd_ns.load(Ordering::Relaxed);
        cc.on_ack(1);
        let sped_up = cc.ipd_ns.load(Ordering::Relaxed);
        assert!(sped_up < backed_off);
    }

    #[test]
    fn ipd_never_escapes_its_clamp_range() {
        let cc = CongestionState::new(MAX_IPD_NS);
        for _ in 0..10 {
            cc.on_ack(0);
        }
        assert!(cc.ipd_ns.load(Ordering::Relaxed) <= MAX_IPD_NS);

        let cc = CongestionState::new(MIN_IPD_NS);
        for i in 0..10 {
            cc.on_ack(i);
        }
        assert!(cc.ipd_ns.load(Ordering::Relaxed) >= MIN_IPD_NS);
    }
}
