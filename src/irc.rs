//! RFC 1459 line protocol: parsing and lossless re-serialization.
//!
//! Only the wire shape is modeled here — prefix, command, middle params,
//! trailing param. No command-specific semantics live in this module; the
//! engine's dispatch table interprets `command`/`params`/`trailing`.

use std::fmt;

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IRCMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl IRCMessage {
    /// Parse a single line (without the trailing CR/LF).
    ///
    /// Returns `None` for a line that carries no command at all (empty after
    /// trimming, or a prefix with nothing following it) — the caller treats
    /// that as an IRC decode error.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line;

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, remainder) = match stripped.split_once(' ') {
                Some((p, r)) => (p, r),
                None => return None,
            };
            rest = remainder.trim_start_matches(' ');
            Some(prefix.to_owned())
        } else {
            None
        };

        if rest.is_empty() {
            return None;
        }

        let (before_trailing, trailing) = match rest.split_once(" :") {
            Some((b, t)) => (b, Some(t.to_owned())),
            None => {
                if let Some(t) = rest.strip_prefix(':') {
                    ("", Some(t.to_owned()))
                } else {
                    (rest, None)
                }
            }
        };

        let mut tokens = before_trailing.split(' ').filter(|s| !s.is_empty());
        let command = tokens.next()?.to_owned();
        let params: Vec<String> = tokens.map(str::to_owned).collect();

        Some(Self {
            prefix,
            command,
            params,
            trailing,
        })
    }

    /// Re-serialize to a single CRLF-terminated line.
    pub fn to_line(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        if let Some(trailing) = &self.trailing {
            out.push_str(" :");
            out.push_str(trailing);
        }
        out.push_str("\r\n");
        out
    }

    /// Build a `PONG <prefix> :<trailing>`-shaped reply, used for local
    /// keep-alive ping/pong (spec: the bridge answers the client's PING
    /// itself, without round-tripping through the cluster). Echoes both the
    /// middle params and the trailing token of the client's `PING`, since the
    /// common `PING :token` form carries its token as trailing text.
    pub fn pong_reply(server_prefix: &str, params: Vec<String>, trailing: Option<String>) -> Self {
        Self {
            prefix: Some(server_prefix.to_owned()),
            command: "PONG".to_owned(),
            params,
            trailing,
        }
    }

    /// Build a synthetic `PING` line sent by the bridge to the client.
    pub fn ping(server_prefix: &str, token: &str) -> Self {
        Self {
            prefix: Some(server_prefix.to_owned()),
            command: "PING".to_owned(),
            params: vec![],
            trailing: Some(token.to_owned()),
        }
    }

    /// Build the `ERROR :<message>` line sent before closing on a fatal
    /// session-creation failure.
    pub fn error(message: &str) -> Self {
        Self {
            prefix: None,
            command: "ERROR".to_owned(),
            params: vec![],
            trailing: Some(message.to_owned()),
        }
    }
}

impl fmt::Display for IRCMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line().trim_end_matches(['\r', '\n']))
    }
}
