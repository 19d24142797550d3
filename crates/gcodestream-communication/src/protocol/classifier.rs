//! Device response classification
//!
//! Matching is case-insensitive on the trimmed line. Checks run in order:
//! `ok`, resend, error, busy/echo, readiness, everything else.

use std::fmt;

/// What a received line means to the streamer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `ok`: the oldest outstanding line was accepted
    Ack,
    /// `start` banner or a line mentioning `ready`
    Ready(String),
    /// `error...` or `!!...`
    Error(String),
    /// `Resend: N` / `rs N`; `None` when no number could be read
    ResendRequest(Option<u64>),
    /// Anything else, including `echo:` and `busy:` chatter
    Info(String),
}

impl Response {
    /// Whether this response frees a slot in the flow-control window
    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => write!(f, "ok"),
            Response::Ready(text) => write!(f, "ready: {}", text),
            Response::Error(text) => write!(f, "error: {}", text),
            Response::ResendRequest(Some(n)) => write!(f, "resend {}", n),
            Response::ResendRequest(None) => write!(f, "resend"),
            Response::Info(text) => write!(f, "{}", text),
        }
    }
}

/// Classify one received line
pub fn classify(line: &str) -> Response {
    let text = line.trim();
    let lower = text.to_ascii_lowercase();

    if lower.starts_with("ok") {
        return Response::Ack;
    }
    if let Some(rest) = lower
        .strip_prefix("resend")
        .or_else(|| lower.strip_prefix("rs"))
    {
        return Response::ResendRequest(parse_line_number(rest));
    }
    if lower.starts_with("error") || lower.starts_with("!!") {
        return Response::Error(text.to_string());
    }
    if lower.starts_with("echo:") || lower.starts_with("busy:") {
        return Response::Info(text.to_string());
    }
    if lower.starts_with("start") || lower.contains("ready") {
        return Response::Ready(text.to_string());
    }
    Response::Info(text.to_string())
}

/// First number after the keyword, accepting `: 4`, `N4` and `4`
fn parse_line_number(rest: &str) -> Option<u64> {
    let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let rest = rest.strip_prefix('n').unwrap_or(rest);
    let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
