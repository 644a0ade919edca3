//! vlbi5d — VSI/S command daemon. Binds the control port, accepts one
//! connection per client, dispatches commands into a per-connection
//! `Runtime`.

use clap::Parser;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use vlbi_core::command::CommandTable;
use vlbi_core::runtime::Runtime;

#[derive(Parser)]
#[command(name = "vlbi5d")]
#[command(about = "VSI/S command daemon for the VLBI data transport engine")]
#[command(version)]
struct Cli {
    /// TCP port to bind the control listener on
    #[arg(long, default_value = "2630")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let listener = match TcpListener::bind((cli.host.as_str(), cli.port)) {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind {}:{}: {e}", cli.host, cli.port);
            std::process::exit(1);
        }
    };
    log::info!("vlbi5d listening on {}:{}", cli.host, cli.port);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            log::warn!("failed to install signal handler: {e}");
        }
    }

    let _ = listener.set_nonblocking(true);
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("accepted connection from {addr}");
                thread::spawn(move || handle_connection(stream));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => {
                log::error!("accept error: {e}");
                break;
            }
        }
    }
    log::info!("vlbi5d exiting");
}

/// Each client connection owns one `Runtime` and a command table built
/// from it; a connection's commands are processed strictly in line order.
fn handle_connection(stream: TcpStream) {
    let runtime = Arc::new(Runtime::new());
    let table = build_command_table(&runtime);

    let peer = stream.peer_addr().ok();
    let reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
    let mut writer = stream;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("read error from {peer:?}: {e}");
                break;
            }
        };
        let mut out = String::new();
        for parsed in vlbi_core::command::dispatch::tokenize_line(&line) {
            let rendered = match parsed {
                Ok(request) => table.dispatch(&request, runtime.transfermode()).to_string(),
                Err(e) => format!("!error= 8 : {e} ;"),
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        if writer.write_all(out.as_bytes()).is_err() {
            break;
        }
    }
    log::info!("connection from {peer:?} closed");
}

fn build_command_table(runtime: &Arc<Runtime>) -> CommandTable {
    use vlbi_core::command::commands::*;
    use std::sync::Mutex;

    let mut table = CommandTable::new();
    register_netparms_commands(
        &mut table,
        Arc::new(Mutex::new(vlbi_core::netparms::NetParms::default())),
    );
    register_mode_query(&mut table);
    register_status_query(&mut table, runtime.errors.clone());
    register_error_query(&mut table, runtime.errors.clone());
    register_evlbi_commands(&mut table, runtime.per_sender.clone());
    register_trackmask_commands(&mut table, runtime.trackmask());

    let rt = runtime.clone();
    register_reset_command(&mut table, move || {
        rt.stop_transfer(false);
    });

    // in2net/disk2net/net2disk/net2file need a concrete chain builder
    // (device handles, destination addresses) that a bare command table
    // cannot construct on its own; they report Failed until a transfer
    // is wired up by a higher-level session manager.
    let unwired = |keyword: &'static str| {
        move |_sub: &str, _args: &[String]| {
            Err(format!("{keyword} not wired to a device in this build"))
        }
    };
    register_in2net_command(&mut table, unwired("in2net"), || {});
    register_disk2net_command(&mut table, unwired("disk2net"), || {});
    register_net2disk_command(&mut table, unwired("net2disk"), || {});
    register_net2file_command(&mut table, unwired("net2file"), || {});

    table
}
