//! vlbi5ctl — sends VSI/S commands/queries to a running `vlbi5d` and
//! prints the replies.

use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

#[derive(Parser)]
#[command(name = "vlbi5ctl")]
#[command(about = "VSI/S operator client for the VLBI data transport daemon")]
#[command(version)]
struct Cli {
    /// Daemon host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon control port
    #[arg(long, default_value = "2630")]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single raw VSI/S request, e.g. "net_port=3000" or "mode?"
    Send {
        /// The request, without the trailing semicolon
        request: String,
    },
    /// Read requests from stdin, one per line, printing each reply
    Shell,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let stream = match TcpStream::connect((cli.host.as_str(), cli.port)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to connect to {}:{}: {e}", cli.host, cli.port);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Send { request } => {
            if let Err(e) = send_and_print(&stream, &request) {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Shell => {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        eprintln!("stdin error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = send_and_print(&stream, &line) {
                    eprintln!("error: {e}");
                    break;
                }
            }
        }
    }
}

fn send_and_print(stream: &TcpStream, request: &str) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut line = request.trim().to_string();
    if !line.ends_with(';') {
        line.push(';');
    }
    line.push('\n');
    writer.write_all(line.as_bytes())?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut reply = String::new();
    reader.read_line(&mut reply)?;
    print!("{reply}");
    Ok(())
}
