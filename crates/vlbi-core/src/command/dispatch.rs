//! VSI/S line tokenizer and per-hardware dispatch table.

use crate::command::reply::{Reply, ReplyCode, RequestKind};
use crate::transfermode::TransferMode;
use std::collections::HashMap;

/// Hardware platform selected at startup; selects which command map is
/// active (mk5a/mk5b-dim/mk5b-dom/mk5c commands are out of scope per §1,
/// `Generic` carries the commands this crate actually implements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hardware {
    Mk5a,
    Mk5bDim,
    Mk5bDom,
    Mk5c,
    Generic,
}

/// One parsed VSI/S request: `KEYWORD(=|?)[arg[:arg]*]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub keyword: String,
    pub kind: RequestKind,
    pub args: Vec<String>,
}

#[derive(Debug)]
pub enum ParseError {
    Empty,
    MissingOperator(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty request"),
            ParseError::MissingOperator(s) => write!(f, "missing '=' or '?' in '{s}'"),
        }
    }
}
impl std::error::Error for ParseError {}

/// Splits a full line on `;` and parses each `KEYWORD(=|?)arg:arg` chunk.
/// Whitespace is stripped per §6.
pub fn tokenize_line(line: &str) -> Vec<Result<Request, ParseError>> {
    line.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(parse_request)
        .collect()
}

fn parse_request(chunk: &str) -> Result<Request, ParseError> {
    let chunk: String = chunk.chars().filter(|c| !c.is_whitespace()).collect();
    if chunk.is_empty() {
        return Err(ParseError::Empty);
    }
    let op_pos = chunk
        .find(['=', '?'])
        .ok_or_else(|| ParseError::MissingOperator(chunk.clone()))?;
    let keyword = chunk[..op_pos].to_string();
    let kind = if chunk.as_bytes()[op_pos] == b'=' {
        RequestKind::Command
    } else {
        RequestKind::Query
    };
    let rest = &chunk[op_pos + 1..];
    let args: Vec<String> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(':').map(|s| s.to_string()).collect()
    };
    // argv[0] conventionally holds the keyword itself, matching the
    // original command-function signature `(is_query, argv, runtime&)`.
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(keyword.clone());
    argv.extend(args);
    Ok(Request {
        keyword,
        kind,
        args: argv,
    })
}

pub type CommandFn = Box<dyn Fn(RequestKind, &[String], TransferMode) -> Reply + Send + Sync>;

/// `INPROGRESS`-equivalent gate: given the current transfer mode, may this
/// command run? Implementations close over whatever predicate
/// (`fromio`/`todisk`/...) the command needs.
pub type Gate = Box<dyn Fn(TransferMode) -> bool + Send + Sync>;

struct Entry {
    gate: Gate,
    func: CommandFn,
}

/// The per-hardware command map: keyword -> (gate, function). Dispatch
/// checks the gate first and returns `ReplyCode::IllegalInCurrentMode`
/// without calling the function if it fails.
#[derive(Default)]
pub struct CommandTable {
    entries: HashMap<String, Entry>,
}

impl CommandTable {
    pub fn new() -> Self {
        CommandTable {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, keyword: &str, gate: Gate, func: CommandFn) {
        self.entries
            .insert(keyword.to_string(), Entry { gate, func });
    }

    pub fn dispatch(&self, request: &Request, current_mode: TransferMode) -> Reply {
        let Some(entry) = self.entries.get(&request.keyword) else {
            return Reply::error(&request.keyword, request.kind, ReplyCode::BadArgument)
                .field("unknown keyword");
        };
        if !(entry.gate)(current_mode) {
            return Reply::error(&request.keyword, request.kind, ReplyCode::IllegalInCurrentMode)
                .field(format!("not allowed while {current_mode}"));
        }
        (entry.func)(request.kind, &request.args, current_mode)
    }
}
