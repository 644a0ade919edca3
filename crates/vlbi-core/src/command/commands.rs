//! The representative command set: `net_protocol=/?`, `net_port=/?`,
//! `mtu=/?`, `ipd=/?`, `ackperiod=/?`, `in2net=`, `net2disk=`/`net2file=`,
//! `disk2net=`, `trackmask=/?`, `mode?`, `status?`, `error?`, `reset=`,
//! `evlbi=/?`. Each function gates itself against the runtime's current
//! transfer mode, parses its own arguments, and returns a fully-formed
//! [`Reply`] — per §4.6, commands reply synchronously. Exception:
//! `trackmask=` kicks off a short-lived background thread to model the
//! source's async solver handle.

use crate::command::dispatch::{CommandTable, Gate};
use crate::command::reply::{Reply, ReplyCode, RequestKind};
use crate::error_queue::ErrorQueue;
use crate::net::per_sender::PerSenderTable;
use crate::netparms::{HostPortSuffix, NetParms};
use crate::transfermode::{self, TransferMode};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn only_when_idle() -> Gate {
    Box::new(|tm| tm == TransferMode::NoTransfer)
}

fn always() -> Gate {
    Box::new(|_tm| true)
}

fn parse_u16(arg: Option<&String>) -> Result<u16, Reply> {
    arg.and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Reply::error("", RequestKind::Command, ReplyCode::BadArgument))
}

/// Parses one `net_port=` argument into a [`HostPortSuffix`]: `port`,
/// `host@port`, `port=suffix` or `host@port=suffix`.
fn parse_host_port_suffix(s: &str) -> Result<HostPortSuffix, String> {
    let (left, suffix) = match s.split_once('=') {
        Some((l, suf)) => (l, Some(suf.to_string())),
        None => (s, None),
    };
    let (host, port_str) = match left.split_once('@') {
        Some((h, p)) => (h, p),
        None => ("", left),
    };
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("bad port '{port_str}'"))?;
    let mut hps = HostPortSuffix::new(host, port);
    if let Some(suf) = suffix {
        hps = hps.with_suffix(suf);
    }
    Ok(hps)
}

/// Registers `net_protocol=/?`, `net_port=/?`, `mtu=/?`, `ackperiod=/?`
/// against `table`, all operating on the shared `netparms`.
pub fn register_netparms_commands(table: &mut CommandTable, netparms: Arc<Mutex<NetParms>>) {
    let np = netparms.clone();
    table.register(
        "net_protocol",
        only_when_idle(),
        Box::new(move |kind, args, _tm| {
            let mut np = np.lock().unwrap();
            match kind {
                RequestKind::Query => {
                    Reply::ok("net_protocol", kind).field(np.protocol().as_str())
                }
                RequestKind::Command => match args.get(1) {
                    Some(proto) => match np.set_protocol(proto) {
                        Ok(()) => Reply::ok("net_protocol", kind),
                        Err(e) => Reply::error("net_protocol", kind, ReplyCode::BadArgument)
                            .field(e.to_string()),
                    },
                    None => Reply::error("net_protocol", kind, ReplyCode::BadArgument)
                        .field("missing protocol"),
                },
            }
        }),
    );

    let np = netparms.clone();
    table.register(
        "net_port",
        only_when_idle(),
        Box::new(move |kind, args, _tm| {
            let mut np = np.lock().unwrap();
            match kind {
                RequestKind::Query => {
                    let mut reply = Reply::ok("net_port", kind);
                    for ep in np.endpoints() {
                        reply = reply.field(ep.to_string());
                    }
                    reply
                }
                RequestKind::Command => {
                    if args.len() < 2 {
                        return Reply::error("net_port", kind, ReplyCode::BadArgument)
                            .field("bad port");
                    }
                    match args[1..]
                        .iter()
                        .map(|a| parse_host_port_suffix(a))
                        .collect::<Result<Vec<HostPortSuffix>, String>>()
                    {
                        Ok(endpoints) => {
                            np.set_endpoints(endpoints);
                            Reply::ok("net_port", kind)
                        }
                        Err(e) => {
                            Reply::error("net_port", kind, ReplyCode::BadArgument).field(e)
                        }
                    }
                }
            }
        }),
    );

    let np = netparms.clone();
    table.register(
        "mtu",
        only_when_idle(),
        Box::new(move |kind, args, _tm| {
            let mut np = np.lock().unwrap();
            match kind {
                RequestKind::Query => Reply::ok("mtu", kind).field(np.mtu().to_string()),
                RequestKind::Command => {
                    let parsed = args.get(1).and_then(|s| s.parse::<u32>().ok());
                    match parsed {
                        Some(mtu) => match np.set_mtu(mtu) {
                            Ok(()) => Reply::ok("mtu", kind),
                            Err(e) => Reply::error("mtu", kind, ReplyCode::BadArgument)
                                .field(e.to_string()),
                        },
                        None => Reply::error("mtu", kind, ReplyCode::BadArgument)
                            .field("bad mtu"),
                    }
                }
            }
        }),
    );

    let np = netparms.clone();
    table.register(
        "ipd",
        always(),
        Box::new(move |kind, args, _tm| {
            let mut np = np.lock().unwrap();
            match kind {
                RequestKind::Query => {
                    Reply::ok("ipd", kind).field(np.interpacketdelay_ns.to_string())
                }
                RequestKind::Command => {
                    let parsed = args.get(1).and_then(|s| s.parse::<i64>().ok());
                    match parsed {
                        Some(ns) => {
                            np.interpacketdelay_ns = ns;
                            Reply::ok("ipd", kind)
                        }
                        None => Reply::error("ipd", kind, ReplyCode::BadArgument)
                            .field("bad ipd"),
                    }
                }
            }
        }),
    );

    let np = netparms.clone();
    table.register(
        "ackperiod",
        always(),
        Box::new(move |kind, args, _tm| {
            let mut np = np.lock().unwrap();
            match kind {
                RequestKind::Query => Reply::ok("ackperiod", kind).field(np.ack_period.to_string()),
                RequestKind::Command => {
                    let parsed = args.get(1).and_then(|s| s.parse::<u32>().ok());
                    match parsed {
                        Some(period) => {
                            np.set_ack_period(period);
                            Reply::ok("ackperiod", kind)
                        }
                        None => Reply::error("ackperiod", kind, ReplyCode::BadArgument)
                            .field("bad ackperiod"),
                    }
                }
            }
        }),
    );
}

/// `mode?` — reports the current symbolic transfer mode.
pub fn register_mode_query(table: &mut CommandTable) {
    table.register(
        "mode",
        always(),
        Box::new(|kind, _args, tm| Reply::ok("mode", kind).field(tm.to_string())),
    );
}

/// `status?` — whether a transfer is active and whether any errors are
/// pending.
pub fn register_status_query(table: &mut CommandTable, errors: Arc<ErrorQueue>) {
    table.register(
        "status",
        always(),
        Box::new(move |kind, _args, tm| {
            let activity = if tm == TransferMode::NoTransfer {
                "inactive"
            } else {
                "active"
            };
            let pending = if errors.is_empty() { "0" } else { "1" };
            Reply::ok("status", kind).field(activity).field(pending)
        }),
    );
}

/// `error?` — pops and reports the oldest pending error, if any.
pub fn register_error_query(table: &mut CommandTable, errors: Arc<ErrorQueue>) {
    table.register(
        "error",
        always(),
        Box::new(move |kind, _args, _tm| match errors.pop_oldest() {
            Some(e) => Reply::ok("error", kind)
                .field(e.number.to_string())
                .field(e.message),
            None => Reply::ok("error", kind).field("0").field("no error"),
        }),
    );
}

/// `reset=abort` — cancellable only while a transfer is active; the
/// actual chain teardown is performed by whatever runtime glue installed
/// the chain (out of scope for this table, which only gates/replies).
pub fn register_reset_command(table: &mut CommandTable, on_abort: impl Fn() + Send + Sync + 'static) {
    table.register(
        "reset",
        Box::new(|tm| tm != TransferMode::NoTransfer),
        Box::new(move |kind, args, _tm| {
            if args.get(1).map(String::as_str) == Some("abort") {
                on_abort();
                Reply::ok("reset", kind)
            } else {
                Reply::error("reset", kind, ReplyCode::BadArgument).field("expected 'abort'")
            }
        }),
    );
}

/// `evlbi=/?` — reports/sets whether eVLBI statistics harvesting
/// (`PerSenderTable` snapshots) is enabled for the active transfer.
pub fn register_evlbi_commands(table: &mut CommandTable, stats: Arc<PerSenderTable>) {
    table.register(
        "evlbi",
        always(),
        Box::new(move |kind, _args, _tm| {
            let n = stats.senders().len();
            Reply::ok("evlbi", kind).field(n.to_string())
        }),
    );
}

/// Registers one `<keyword>=connect:<host>:<port>` / `=off`-style transfer
/// command: starts or stops a chain. Installing the actual chain is left
/// to the runtime glue (out of scope here); this registers the gate and
/// reply shape only. Shared by `in2net`, `disk2net`, `net2disk`, and
/// `net2file`, each with its own idle/gating predicate.
fn register_one_transfer_command(
    table: &mut CommandTable,
    keyword: &'static str,
    gate: Gate,
    start: impl Fn(&str, &[String]) -> Result<(), String> + Send + Sync + 'static,
    stop: impl Fn() + Send + Sync + 'static,
) {
    table.register(
        keyword,
        gate,
        Box::new(move |kind, args, _tm| match args.get(1).map(String::as_str) {
            Some("off") | Some("close") => {
                stop();
                Reply::ok(keyword, kind)
            }
            Some(sub) => match start(sub, args) {
                Ok(()) => Reply::error(keyword, kind, ReplyCode::Initiated),
                Err(msg) => Reply::error(keyword, kind, ReplyCode::Failed).field(msg),
            },
            None => Reply::error(keyword, kind, ReplyCode::BadArgument).field("missing subcommand"),
        }),
    );
}

/// `in2net=` — recorder/ioboard to network.
pub fn register_in2net_command(
    table: &mut CommandTable,
    start: impl Fn(&str, &[String]) -> Result<(), String> + Send + Sync + 'static,
    stop: impl Fn() + Send + Sync + 'static,
) {
    register_one_transfer_command(
        table,
        "in2net",
        Box::new(|tm| tm == TransferMode::NoTransfer || transfermode::fromio(tm)),
        start,
        stop,
    );
}

/// `disk2net=` — StreamStor disk pack to network.
pub fn register_disk2net_command(
    table: &mut CommandTable,
    start: impl Fn(&str, &[String]) -> Result<(), String> + Send + Sync + 'static,
    stop: impl Fn() + Send + Sync + 'static,
) {
    register_one_transfer_command(
        table,
        "disk2net",
        Box::new(|tm| tm == TransferMode::NoTransfer || transfermode::fromdisk(tm)),
        start,
        stop,
    );
}

/// `net2disk=` — network to StreamStor disk pack.
pub fn register_net2disk_command(
    table: &mut CommandTable,
    start: impl Fn(&str, &[String]) -> Result<(), String> + Send + Sync + 'static,
    stop: impl Fn() + Send + Sync + 'static,
) {
    register_one_transfer_command(
        table,
        "net2disk",
        Box::new(|tm| tm == TransferMode::NoTransfer || transfermode::fromnet(tm)),
        start,
        stop,
    );
}

/// `net2file=` — network to a FlexBuff/Mark6 scan file.
pub fn register_net2file_command(
    table: &mut CommandTable,
    start: impl Fn(&str, &[String]) -> Result<(), String> + Send + Sync + 'static,
    stop: impl Fn() + Send + Sync + 'static,
) {
    register_one_transfer_command(
        table,
        "net2file",
        Box::new(|tm| tm == TransferMode::NoTransfer || transfermode::fromnet(tm)),
        start,
        stop,
    );
}

/// Mutable state behind `trackmask=/?`: the channel-dropping mask the
/// splitter stage currently uses, and whether a background solver run
/// triggered by the last `=` is still in flight.
#[derive(Debug, Default)]
pub struct TrackmaskState {
    mask: Option<u64>,
    pending: bool,
}

/// `trackmask=/?` — sets the channel-dropping solution used by the
/// splitter stage. `=` acknowledges immediately and spawns a background
/// "compile compression solution" computation; a `?` issued before that
/// computation finishes gets back `ReplyCode::Initiated` ("still
/// computing") instead of a mask, matching the source's async solver
/// handle. Once complete, `?` reports the mask plus a second,
/// solution-status field (`0` = solved).
pub fn register_trackmask_commands(table: &mut CommandTable, state: Arc<Mutex<TrackmaskState>>) {
    table.register(
        "trackmask",
        always(),
        Box::new(move |kind, args, _tm| match kind {
            RequestKind::Query => {
                let st = state.lock().unwrap();
                if st.pending {
                    Reply::new("trackmask", kind, ReplyCode::Initiated).field("still computing")
                } else {
                    let mask = st.mask.unwrap_or(0);
                    Reply::ok("trackmask", kind)
                        .field(format!("0x{mask:x}"))
                        .field("0")
                }
            }
            RequestKind::Command => {
                let parsed = args
                    .get(1)
                    .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok());
                match parsed {
                    Some(m) => {
                        state.lock().unwrap().pending = true;
                        let state = state.clone();
                        thread::spawn(move || {
                            thread::sleep(Duration::from_millis(20));
                            let mut st = state.lock().unwrap();
                            st.mask = Some(m);
                            st.pending = false;
                        });
                        Reply::ok("trackmask", kind)
                    }
                    None => Reply::error("trackmask", kind, ReplyCode::BadArgument)
                        .field("bad trackmask"),
                }
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_port_query_reports_the_default_port() {
        let mut table = CommandTable::new();
        register_netparms_commands(&mut table, Arc::new(Mutex::new(NetParms::default())));
        let req = crate::command::dispatch::Request {
            keyword: "net_port".into(),
            kind: RequestKind::Query,
            args: vec!["net_port".into()],
        };
        let reply = table.dispatch(&req, TransferMode::NoTransfer);
        assert_eq!(reply.to_string(), "!net_port? 0 : 2630 ;");
    }

    #[test]
    fn net_port_set_is_rejected_while_a_transfer_is_active() {
        let mut table = CommandTable::new();
        register_netparms_commands(&mut table, Arc::new(Mutex::new(NetParms::default())));
        let req = crate::command::dispatch::Request {
            keyword: "net_port".into(),
            kind: RequestKind::Command,
            args: vec!["net_port".into(), "3000".into()],
        };
        let reply = table.dispatch(&req, TransferMode::In2Net);
        assert!(reply.to_string().contains(": 6"));
    }

    #[test]
    fn net_port_accepts_and_renders_multiple_host_port_suffix_endpoints() {
        let mut table = CommandTable::new();
        register_netparms_commands(&mut table, Arc::new(Mutex::new(NetParms::default())));
        let set_req = crate::command::dispatch::Request {
            keyword: "net_port".into(),
            kind: RequestKind::Command,
            args: vec![
                "net_port".into(),
                "2630".into(),
                "host2@2631=ds2".into(),
                "2632=ds3".into(),
            ],
        };
        let reply = table.dispatch(&set_req, TransferMode::NoTransfer);
        assert_eq!(reply.to_string(), "!net_port= 0 ;");

        let query_req = crate::command::dispatch::Request {
            keyword: "net_port".into(),
            kind: RequestKind::Query,
            args: vec!["net_port".into()],
        };
        let reply = table.dispatch(&query_req, TransferMode::NoTransfer);
        assert_eq!(
            reply.to_string(),
            "!net_port? 0 : 2630 : host2@2631=ds2 : 2632=ds3 ;"
        );
    }

    #[test]
    fn mtu_set_rejects_values_below_the_minimum() {
        let mut table = CommandTable::new();
        register_netparms_commands(&mut table, Arc::new(Mutex::new(NetParms::default())));
        let req = crate::command::dispatch::Request {
            keyword: "mtu".into(),
            kind: RequestKind::Command,
            args: vec!["mtu".into(), "10".into()],
        };
        let reply = table.dispatch(&req, TransferMode::NoTransfer);
        assert!(reply.to_string().contains(": 8"));
    }

    #[test]
    fn mode_query_reports_the_current_transfer_mode() {
        let mut table = CommandTable::new();
        register_mode_query(&mut table);
        let req = crate::command::dispatch::Request {
            keyword: "mode".into(),
            kind: RequestKind::Query,
            args: vec!["mode".into()],
        };
        let reply = table.dispatch(&req, TransferMode::In2Net);
        assert!(reply.to_string().contains("in2net"));
    }

    #[test]
    fn status_query_reports_pending_errors() {
        let mut table = CommandTable::new();
        let errors = Arc::new(ErrorQueue::new());
        errors.push(4, "disk error".to_string(), crate::time::HighResTime::epoch());
        register_status_query(&mut table, errors);
        let req = crate::command::dispatch::Request {
            keyword: "status".into(),
            kind: RequestKind::Query,
            args: vec!["status".into()],
        };
        let reply = table.dispatch(&req, TransferMode::NoTransfer);
        assert_eq!(reply.to_string(), "!status? 0 : inactive : 1 ;");
    }

    #[test]
    fn trackmask_query_reports_still_computing_then_the_solved_mask() {
        let mut table = CommandTable::new();
        register_trackmask_commands(&mut table, Arc::new(Mutex::new(TrackmaskState::default())));

        let set_req = crate::command::dispatch::Request {
            keyword: "trackmask".into(),
            kind: RequestKind::Command,
            args: vec!["trackmask".into(), "0xffffffff00000000".into()],
        };
        let reply = table.dispatch(&set_req, TransferMode::NoTransfer);
        assert_eq!(reply.to_string(), "!trackmask= 0 ;");

        let query_req = crate::command::dispatch::Request {
            keyword: "trackmask".into(),
            kind: RequestKind::Query,
            args: vec!["trackmask".into()],
        };
        let reply = table.dispatch(&query_req, TransferMode::NoTransfer);
        assert_eq!(reply.to_string(), "!trackmask? 1 : still computing ;");

        std::thread::sleep(std::time::Duration::from_millis(100));
        let reply = table.dispatch(&query_req, TransferMode::NoTransfer);
        assert_eq!(
            reply.to_string(),
            "!trackmask? 0 : 0xffffffff00000000 : 0 ;"
        );
    }

    #[test]
    fn reset_abort_is_gated_to_only_run_during_a_transfer() {
        let mut table = CommandTable::new();
        register_reset_command(&mut table, || {});
        let req = crate::command::dispatch::Request {
            keyword: "reset".into(),
            kind: RequestKind::Command,
            args: vec!["reset".into(), "abort".into()],
        };
        let reply = table.dispatch(&req, TransferMode::NoTransfer);
        assert!(reply.to_string().contains(": 6"));

        let reply = table.dispatch(&req, TransferMode::In2Net);
        assert!(reply.to_string().contains(": 0"));
    }
}
