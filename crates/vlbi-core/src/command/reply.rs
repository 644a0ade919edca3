//! VSI/S reply formatting: `!KEYWORD(=|?) code[: field[: field]*];`.

use std::fmt;

/// Numeric status codes a command function returns, per §4.6/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Ok = 0,
    Initiated = 1,
    Failed = 4,
    Busy = 5,
    IllegalInCurrentMode = 6,
    BadArgument = 8,
}

impl ReplyCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Whether the originating request was a command (`=`) or a query (`?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Query,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Command => write!(f, "="),
            RequestKind::Query => write!(f, "?"),
        }
    }
}

/// A fully-formed VSI/S reply, built incrementally and rendered with
/// `Display`/`to_string()`.
pub struct Reply {
    keyword: String,
    kind: RequestKind,
    code: ReplyCode,
    fields: Vec<String>,
}

impl Reply {
    pub fn new(keyword: impl Into<String>, kind: RequestKind, code: ReplyCode) -> Self {
        Reply {
            keyword: keyword.into(),
            kind,
            code,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, value: impl Into<String>) -> Self {
        self.fields.push(value.into());
        self
    }

    pub fn ok(keyword: impl Into<String>, kind: RequestKind) -> Self {
        Reply::new(keyword, kind, ReplyCode::Ok)
    }

    pub fn error(keyword: impl Into<String>, kind: RequestKind, code: ReplyCode) -> Self {
        Reply::new(keyword, kind, code)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}{} {}", self.keyword, self.kind, self.code.code())?;
        for field in &self.fields {
            write!(f, " : {field}")?;
        }
        write!(f, " ;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_with_no_fields_renders_minimal_form() {
        let reply = Reply::ok("mode", RequestKind::Query);
        assert_eq!(reply.to_string(), "!mode? 0 ;");
    }

    #[test]
    fn error_reply_with_fields_renders_each_one() {
        let reply = Reply::error("net_port", RequestKind::Command, ReplyCode::IllegalInCurrentMode)
            .field("transfer active");
        assert_eq!(reply.to_string(), "!net_port= 6 : transfer active ;");
    }

    #[test]
    fn status_query_can_carry_multiple_fields() {
        let reply = Reply::ok("status", RequestKind::Query)
            .field("inactive")
            .field("0");
        assert_eq!(reply.to_string(), "!status? 0 : inactive : 0 ;");
    }
}
