//! Per-sender packet statistics and the rotating-ACK back-channel for the
//! `udps` protocol.
//!
//! Keyed by `(source IPv4, source port)`. Every datagram updates loss and
//! reordering counters; every `ackPeriod`-th packet triggers a token sent
//! back to the sender over the same socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;

/// Rotating list of fixed ASCII tokens sent back to a sender so it can
/// tell "fresh ACK" from "stuck ACK". Content is arbitrary and opaque;
/// only the sender and receiver built from this same table need to agree
/// on anything, which they do by construction.
pub(crate) const ACK_TOKENS: &[&str] = &[
    "xhg",
    "xybbgmnx",
    "xyreryvwre",
    "tbqireqbzzr",
    "obxxryhy",
    "rvxryovwgre",
    "qebrsgbrgre",
];

/// Number of recent sequence numbers kept to estimate RFC 4737 reordering
/// extent.
const PSN_WINDOW: usize = 16;

/// Per-sender packet accounting and ACK countdown state.
#[derive(Debug, Clone)]
pub struct PerSender {
    pub sender: SocketAddr,
    ack_index: usize,
    lastack: i64,
    oldack: i64,
    pub expectseqnr: u64,
    pub maxseq: u64,
    pub minseq: u64,
    pub pktcnt: u64,
    pub ooocnt: u64,
    pub ooosum: u64,
    psn: VecDeque<u64>,
}

impl PerSender {
    pub fn new(sender: SocketAddr, first_seqnr: u64) -> Self {
        PerSender {
            sender,
            ack_index: 0,
            lastack: 0,
            oldack: 0,
            expectseqnr: first_seqnr,
            maxseq: first_seqnr,
            minseq: first_seqnr,
            pktcnt: 0,
            ooocnt: 0,
            ooosum: 0,
            psn: VecDeque::with_capacity(PSN_WINDOW),
        }
    }

    /// `(maxseq - minseq + 1) - pktcnt`.
    pub fn loscnt(&self) -> u64 {
        (self.maxseq - self.minseq + 1) - self.pktcnt
    }

    fn push_psn(&mut self, seqnr: u64) {
        if self.psn.len() == PSN_WINDOW {
            self.psn.pop_front();
        }
        self.psn.push_back(seqnr);
    }

    /// Updates counters for one received datagram and, every `ackperiod`
    /// packets, calls `send_ack` with the next rotating token. Re-reads
    /// `ackperiod` every call: a change takes effect immediately and
    /// resets the countdown (matches the source's hot-reload behaviour).
    pub fn handle_seqnr(&mut self, seqnr: u64, ackperiod: u32, mut send_ack: impl FnMut(&str)) {
        self.pktcnt += 1;
        if seqnr > self.maxseq {
            self.maxseq = seqnr;
        } else if seqnr < self.minseq {
            self.minseq = seqnr;
        }

        if self.maxseq != self.minseq {
            self.push_psn(seqnr);
            if seqnr >= self.expectseqnr {
                self.expectseqnr = seqnr + 1;
            } else {
                self.ooocnt += 1;
                let npsn = self.psn.len();
                let mut j = 0;
                while j < npsn && self.psn[j] < seqnr {
                    j += 1;
                }
                self.ooosum += (npsn - j) as u64;
            }
        }

        let ackperiod = ackperiod as i64;
        if ackperiod != self.oldack {
            self.lastack = 0;
            self.oldack = ackperiod;
        }
        self.lastack -= 1;
        if self.lastack > 0 {
            return;
        }

        if self.ack_index >= ACK_TOKENS.len() {
            self.ack_index = 0;
        }
        send_ack(ACK_TOKENS[self.ack_index]);
        self.lastack = self.oldack;
        self.ack_index += 1;
    }
}

/// A table of [`PerSender`] entries keyed by sender address, shared between
/// the bottom-half of the `udps` reader and anything querying live stats.
#[derive(Default)]
pub struct PerSenderTable {
    senders: Mutex<HashMap<SocketAddr, PerSender>>,
}

impl PerSenderTable {
    pub fn new() -> Self {
        PerSenderTable {
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle_seqnr(
        &self,
        sender: SocketAddr,
        seqnr: u64,
        ackperiod: u32,
        send_ack: impl FnMut(&str),
    ) {
        let mut senders = self.senders.lock().unwrap();
        let entry = senders
            .entry(sender)
            .or_insert_with(|| PerSender::new(sender, seqnr));
        entry.handle_seqnr(seqnr, ackperiod, send_ack);
    }

    pub fn snapshot(&self, sender: &SocketAddr) -> Option<PerSender> {
        self.senders.lock().unwrap().get(sender).cloned()
    }

    pub fn senders(&self) -> Vec<SocketAddr> {
        self.senders.lock().unwrap().keys().copied().collect()
    }
}
