//! Plain UDP reader/writer: datagram-at-a-time, no sequence numbers, no
//! ordering guarantees. Used for the `udp`/`pudp` protocols.

use crate::block::BlockPool;
use crate::chain::{BlockQueue, StepControl};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Bytes received so far; exposed so a `status?`/diagnostics query can
/// report throughput without the reader itself owning any reply-formatting
/// logic.
#[derive(Default)]
pub struct UdpStats {
    pub bytes_received: AtomicU64,
    pub datagrams_received: AtomicU64,
}

pub fn udp_reader(
    socket: UdpSocket,
    pool: Arc<BlockPool>,
    slot_size: usize,
    stats: Arc<UdpStats>,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |out, ctl| {
        let _ = socket.set_read_timeout(Some(CANCEL_POLL));
        let mut scratch = vec![0u8; slot_size];
        loop {
            if ctl.is_cancelled() {
                break;
            }
            match socket.recv_from(&mut scratch) {
                Ok((n, _from)) => {
                    let mut block = pool.get();
                    let take = n.min(block.len());
                    block.as_mut_slice()[..take].copy_from_slice(&scratch[..take]);
                    stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    stats
                        .datagrams_received
                        .fetch_add(1, Ordering::Relaxed);
                    if let Ok(sized) = block.sub(0, take) {
                        if out.push(sized).is_err() {
                            break;
                        }
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
                Err(e) => {
                    log::warn!("udp_reader: recv error: {e}");
                    break;
                }
            }
        }
    }
}

pub fn udp_writer(
    socket: UdpSocket,
    destination: std::net::SocketAddr,
) -> impl FnOnce(BlockQueue, StepControl) + Send {
    move |inq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            if let Err(e) = socket.send_to(block.as_slice(), destination) {
                log::warn!("udp_writer: send error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::Mutex;

    #[test]
    fn loopback_datagram_round_trips_through_the_chain() {
        let reader_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let reader_addr = reader_socket.local_addr().unwrap();
        let sender_socket = UdpSocket::bind("127.0.0.1:0").unwrap();

        let pool = Arc::new(BlockPool::new(2048, 4));
        let stats = Arc::new(UdpStats::default());
        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let recv2 = received.clone();

        let mut chain = Chain::new();
        chain.add_producer(4, udp_reader(reader_socket, pool, 1500, stats.clone()));
        chain.add_consumer(move |inq, _ctl| {
            while let Some(b) = inq.pop() {
                recv2.lock().unwrap().push(b.as_slice().to_vec());
            }
        });
        chain.run();

        sender_socket.send_to(&[1, 2, 3, 4], reader_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        chain.stop();

        assert_eq!(received.lock().unwrap()[0], vec![1, 2, 3, 4]);
        assert_eq!(stats.datagrams_received.load(Ordering::Relaxed), 1);
    }
}
