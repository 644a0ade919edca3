//! Wire-protocol reader/writer chain steps and the statistics/ACK
//! back-channel they share, one module per protocol.

pub mod file;
pub mod interchain;
pub mod multifd;
pub mod per_sender;
pub mod streamstor;
pub mod tcp;
pub mod udp;
pub mod udps;
pub mod udt;
pub mod vbs;

pub use per_sender::{PerSender, PerSenderTable};
