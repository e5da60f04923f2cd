use std::fmt::Write as _;

use crate::request::Protocol;

// ---------------------------------------------------------------------------
// ReplyData
// ---------------------------------------------------------------------------

/// One fired symbol in the reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolLine {
    pub name: String,
    pub weight: f64,
    pub options: Vec<String>,
}

/// Everything the worker needs rendered back to the client after a scan.
#[derive(Debug, Clone)]
pub struct ReplyData {
    pub protocol: Protocol,
    pub metric: String,
    pub spam: bool,
    pub score: f64,
    pub required_score: f64,
    pub action: String,
    pub symbols: Vec<SymbolLine>,
    /// Extra headers filters asked to add, rendered as reply headers.
    pub add_headers: Vec<(String, String)>,
    pub messages: Vec<String>,
}

const NATIVE_BANNER: &str = "RSPAMD";
const SPAMC_BANNER: &str = "SPAMD";

fn banner_line(protocol: Protocol, code: u16, text: &str) -> String {
    match protocol {
        Protocol::Native { major, minor } => {
            format!("{NATIVE_BANNER}/{major}.{minor} {code} {text}\r\n")
        }
        Protocol::Spamc { major, minor } => {
            format!("{SPAMC_BANNER}/{major}.{minor} {code} {text}\r\n")
        }
    }
}

/// Render a scan reply. `with_symbols` enables the per-symbol lines
/// (SYMBOLS / REPORT / PROCESS); CHECK stays metric-only.
pub fn render_reply(data: &ReplyData, with_symbols: bool) -> String {
    let mut out = banner_line(data.protocol, 0, "EX_OK");

    if data.protocol.is_spamc() {
        let _ = write!(
            out,
            "Spam: {} ; {:.1} / {:.1}\r\n",
            if data.spam { "True" } else { "False" },
            data.score,
            data.required_score,
        );
    } else {
        let _ = write!(
            out,
            "Metric: {}; {}; {:.2} / {:.2}\r\n",
            data.metric,
            if data.spam { "True" } else { "False" },
            data.score,
            data.required_score,
        );
        let _ = write!(out, "Action: {}\r\n", data.action);
    }

    if with_symbols {
        for sym in &data.symbols {
            let _ = write!(out, "Symbol: {}({:.2})", sym.name, sym.weight);
            if !sym.options.is_empty() {
                let _ = write!(out, "; {}", sym.options.join(","));
            }
            out.push_str("\r\n");
        }
    }
    for (name, value) in &data.add_headers {
        let _ = write!(out, "Header: {name}: {value}\r\n");
    }
    for message in &data.messages {
        let _ = write!(out, "Message: {message}\r\n");
    }

    out.push_str("\r\n");
    out
}

/// Non-2xx reply with a stable error kind and a human message.
pub fn render_error(protocol: Protocol, code: u16, kind: &str, message: &str) -> String {
    let mut out = banner_line(protocol, code, "EX_ERROR");
    let _ = write!(out, "Error: {kind}: {message}\r\n\r\n");
    out
}

/// Success reply carrying only a message line (learn, fuzzy updates).
pub fn render_message(protocol: Protocol, message: &str) -> String {
    let mut out = banner_line(protocol, 0, "EX_OK");
    let _ = write!(out, "Message: {message}\r\n\r\n");
    out
}

/// Success reply whose body is a JSON document (controller commands).
pub fn render_json(protocol: Protocol, body: &serde_json::Value) -> String {
    let mut out = banner_line(protocol, 0, "EX_OK");
    let _ = write!(out, "{body}\r\n\r\n");
    out
}

/// `PING` answer.
pub fn render_ping(protocol: Protocol) -> String {
    let mut out = banner_line(protocol, 0, "EX_OK");
    out.push_str("Pong\r\n\r\n");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ReplyData {
        ReplyData {
            protocol: Protocol::Native { major: 1, minor: 3 },
            metric: "default".to_string(),
            spam: true,
            score: 16.0,
            required_score: 15.0,
            action: "reject".to_string(),
            symbols: vec![
                SymbolLine {
                    name: "TEST_A".to_string(),
                    weight: 5.0,
                    options: vec![],
                },
                SymbolLine {
                    name: "TEST_B".to_string(),
                    weight: 11.0,
                    options: vec!["x".to_string(), "y".to_string()],
                },
            ],
            add_headers: vec![],
            messages: vec![],
        }
    }

    #[test]
    fn native_reply_shape() {
        let out = render_reply(&data(), true);
        assert!(out.starts_with("RSPAMD/1.3 0 EX_OK\r\n"), "{out}");
        assert!(out.contains("Metric: default; True; 16.00 / 15.00\r\n"));
        assert!(out.contains("Action: reject\r\n"));
        assert!(out.contains("Symbol: TEST_A(5.00)\r\n"));
        assert!(out.contains("Symbol: TEST_B(11.00); x,y\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn check_reply_omits_symbols() {
        let out = render_reply(&data(), false);
        assert!(!out.contains("Symbol:"));
        assert!(out.contains("Metric:"));
    }

    #[test]
    fn spamc_reply_shape() {
        let mut d = data();
        d.protocol = Protocol::Spamc { major: 1, minor: 5 };
        let out = render_reply(&d, false);
        assert!(out.starts_with("SPAMD/1.5 0 EX_OK\r\n"), "{out}");
        assert!(out.contains("Spam: True ; 16.0 / 15.0\r\n"));
        assert!(!out.contains("Metric:"));
    }

    #[test]
    fn messages_and_headers_rendered() {
        let mut d = data();
        d.add_headers.push(("X-Spam".to_string(), "yes".to_string()));
        d.messages.push("greylisted".to_string());
        let out = render_reply(&d, false);
        assert!(out.contains("Header: X-Spam: yes\r\n"));
        assert!(out.contains("Message: greylisted\r\n"));
    }

    #[test]
    fn error_reply_carries_kind_and_message() {
        let out = render_error(
            Protocol::Native { major: 1, minor: 3 },
            413,
            "protocol",
            "message too large",
        );
        assert!(out.starts_with("RSPAMD/1.3 413 EX_ERROR\r\n"));
        assert!(out.contains("Error: protocol: message too large\r\n"));
    }

    #[test]
    fn ping_pong() {
        let out = render_ping(Protocol::Native { major: 1, minor: 3 });
        assert!(out.contains("Pong\r\n"));
    }
}
