//! End-to-end loopback scenarios exercising a complete [`Chain`] built out
//! of real reader/filter/writer steps rather than unit-level stand-ins.

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vlbi_core::block::BlockPool;
use vlbi_core::chain::Chain;
use vlbi_core::command::dispatch::tokenize_line;
use vlbi_core::command::reply::{ReplyCode, RequestKind};
use vlbi_core::command::{commands, CommandTable};
use vlbi_core::filters::compression::{compressor, decompressor};
use vlbi_core::filters::faker::{faker, FillPattern};
use vlbi_core::net::file::{file_reader, file_writer};
use vlbi_core::net::per_sender::PerSenderTable;
use vlbi_core::net::udps::udps_reader;
use vlbi_core::runtime::Runtime;
use vlbi_core::transfermode::TransferMode;

/// A fill-pattern producer feeding a file writer, then a file reader
/// feeding a consumer that collects everything it sees — the `fill2file`
/// shape described for scenario-style smoke tests.
#[test]
fn faker_to_file_round_trips_the_fill_pattern() {
    let block_size = 256usize;
    let n_blocks = 8u64;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fill.dat");

    let pool = Arc::new(BlockPool::new(block_size, 4));
    let file = std::fs::File::create(&path).unwrap();

    let mut chain = Chain::new();
    chain.add_producer(
        4,
        faker(pool.clone(), block_size, FillPattern::default(), Some(n_blocks)),
    );
    chain.add_consumer(file_writer(file));
    chain.run();
    chain.wait();
    chain.stop();

    let mut contents = Vec::new();
    std::fs::File::open(&path)
        .unwrap()
        .read_to_end(&mut contents)
        .unwrap();
    assert_eq!(contents.len(), block_size * n_blocks as usize);

    // First 8 bytes must be the documented default fill-pattern start.
    let first_word = u64::from_be_bytes(contents[0..8].try_into().unwrap());
    assert_eq!(first_word, 0x1122_3344_1122_3344);
}

/// `disk2net`-shaped pipeline: a file reader feeds a compressor, whose
/// output is decompressed again by a second stage — verifying multi-filter
/// chains compose and that data survives the round trip.
#[test]
fn file_through_compression_round_trip_preserves_bytes() {
    let block_size = 512usize;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.dat");

    {
        let mut f = std::fs::File::create(&path).unwrap();
        let pattern: Vec<u8> = (0..block_size * 3).map(|i| (i % 16) as u8).collect();
        f.write_all(&pattern).unwrap();
    }

    let pool = Arc::new(BlockPool::new(block_size, 8));
    let source = std::fs::File::open(&path).unwrap();

    let mut chain = Chain::new();
    chain.add_producer(4, file_reader(source, pool.clone(), block_size));
    chain.add_filter(4, compressor(pool.clone(), block_size, flate2::Compression::default()));
    chain.add_filter(4, decompressor(pool.clone(), block_size));

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();
    chain.add_consumer(move |inq, _ctl| {
        while let Some(block) = inq.pop() {
            received_clone.lock().unwrap().extend_from_slice(block.as_slice());
        }
    });
    chain.run();
    chain.wait();
    chain.stop();

    let mut expected = Vec::new();
    std::fs::File::open(&path).unwrap().read_to_end(&mut expected).unwrap();
    // Pad expected out to whole block_size chunks, matching the fixed
    // write_size/read_size framing the filters enforce.
    let mut padded = expected.clone();
    while padded.len() % block_size != 0 {
        padded.push(0);
    }
    assert_eq!(*received.lock().unwrap(), padded);
}

/// `net2net`-shaped loopback over real UDP sockets using the `udps`
/// sequence-numbered protocol, including a deliberately reordered
/// datagram that the reorder window must still deliver in order.
#[test]
#[ignore] // binds real UDP sockets; run with: cargo test -- --ignored
fn udps_loopback_reorders_and_delivers_in_sequence() {
    let payload_size = 64usize;
    let recv_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    recv_socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    let recv_addr = recv_socket.local_addr().unwrap();

    let send_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    send_socket.connect(recv_addr).unwrap();

    let pool = Arc::new(BlockPool::new(payload_size, 8));
    let stats = Arc::new(PerSenderTable::new());
    let ack_period = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let window_capacity = 4usize;

    let mut chain = Chain::new();
    chain.add_producer(
        8,
        udps_reader(
            recv_socket,
            pool.clone(),
            payload_size,
            window_capacity,
            ack_period,
            stats,
            None,
        ),
    );

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();
    chain.add_consumer(move |inq, _ctl| {
        while let Some(block) = inq.pop() {
            received_clone.lock().unwrap().push(block.as_slice().to_vec());
        }
    });
    chain.run();

    // Send seqnr 0, 2, 1 — out-of-order by one slot, within the window.
    for seqnr in [0u64, 2, 1] {
        let mut datagram = seqnr.to_be_bytes().to_vec();
        datagram.extend(std::iter::repeat(seqnr as u8).take(payload_size));
        send_socket.send(&datagram).unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));
    chain.stop();

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 3);
    assert_eq!(got[0][0], 0);
    assert_eq!(got[1][0], 1);
    assert_eq!(got[2][0], 2);
}

/// Drives a [`CommandTable`] through a realistic VSI/S session: set
/// netparms while idle, start a transfer (gated), observe it rejects a
/// netparms change while active, then `reset=abort` and confirm the mode
/// returns to idle.
#[test]
fn command_table_session_enforces_gating_across_a_transfer_lifecycle() {
    let runtime = Arc::new(Runtime::new());
    let mut table = CommandTable::new();

    commands::register_netparms_commands(
        &mut table,
        Arc::new(std::sync::Mutex::new(vlbi_core::netparms::NetParms::default())),
    );
    commands::register_mode_query(&mut table);

    let started = Arc::new(AtomicBool::new(false));
    let started_clone = started.clone();
    let rt = runtime.clone();
    commands::register_in2net_command(
        &mut table,
        move |_sub, _args| {
            let mut chain = vlbi_core::chain::Chain::new();
            chain.add_producer(1, |_out, ctl| {
                while !ctl.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(10));
                }
            });
            chain.add_consumer(|inq, _ctl| while inq.pop().is_some() {});
            chain.run();
            rt.start_transfer(TransferMode::In2Net, chain);
            started_clone.store(true, Ordering::SeqCst);
            Ok(())
        },
        || {},
    );
    let rt2 = runtime.clone();
    commands::register_reset_command(&mut table, move || rt2.stop_transfer(false));

    for parsed in tokenize_line("net_port=3000;") {
        let req = parsed.unwrap();
        let reply = table.dispatch(&req, runtime.transfermode());
        assert_eq!(reply.to_string(), "!net_port= 0 ;");
    }

    for parsed in tokenize_line("in2net=connect;") {
        let req = parsed.unwrap();
        let reply = table.dispatch(&req, runtime.transfermode());
        assert!(reply.to_string().contains(": 1"));
    }
    assert!(started.load(Ordering::SeqCst));
    assert_eq!(runtime.transfermode(), TransferMode::In2Net);

    for parsed in tokenize_line("net_port=4000;") {
        let req = parsed.unwrap();
        let reply = table.dispatch(&req, runtime.transfermode());
        assert!(reply.to_string().contains(&format!(": {}", ReplyCode::IllegalInCurrentMode.code())));
    }

    for parsed in tokenize_line("reset=abort;") {
        let req = parsed.unwrap();
        let reply = table.dispatch(&req, runtime.transfermode());
        assert_eq!(reply.to_string(), "!reset= 0 ;");
    }
    assert_eq!(runtime.transfermode(), TransferMode::NoTransfer);

    for parsed in tokenize_line("mode?;") {
        let req = parsed.unwrap();
        let reply = table.dispatch(&req, runtime.transfermode());
        assert!(matches!(req.kind, RequestKind::Query));
        assert!(reply.to_string().contains("no_transfer"));
    }
}
