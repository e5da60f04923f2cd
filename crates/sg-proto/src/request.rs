use winnow::ascii::digit1;
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::token::{take_till, take_while};

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Commands of the scan protocol, both native and spamc-compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Check,
    Symbols,
    Report,
    ReportIfspam,
    Skip,
    Ping,
    Process,
    Learn,
    FuzzyAdd,
    FuzzyDel,
    Counters,
    Stat,
    StatReset,
    Uptime,
    AddSymbol,
    AddAction,
    /// Custom command dispatched through the registry.
    Other(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "CHECK" => Self::Check,
            "SYMBOLS" => Self::Symbols,
            "REPORT" => Self::Report,
            "REPORT_IFSPAM" => Self::ReportIfspam,
            "SKIP" => Self::Skip,
            "PING" => Self::Ping,
            "PROCESS" => Self::Process,
            "LEARN" => Self::Learn,
            "FUZZY_ADD" => Self::FuzzyAdd,
            "FUZZY_DEL" => Self::FuzzyDel,
            "COUNTERS" => Self::Counters,
            "STAT" => Self::Stat,
            "STAT_RESET" => Self::StatReset,
            "UPTIME" => Self::Uptime,
            "ADD_SYMBOL" => Self::AddSymbol,
            "ADD_ACTION" => Self::AddAction,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the command carries a message body.
    pub fn has_body(&self) -> bool {
        !matches!(
            self,
            Self::Ping
                | Self::Counters
                | Self::Stat
                | Self::StatReset
                | Self::Uptime
                | Self::AddSymbol
                | Self::AddAction
        )
    }

    /// Whether the reply should list fired symbols.
    pub fn wants_symbols(&self) -> bool {
        matches!(
            self,
            Self::Symbols | Self::Report | Self::ReportIfspam | Self::Process
        )
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Which banner the client spoke; the reply mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `CMD RSPAMC/major.minor`
    Native { major: u8, minor: u8 },
    /// `CMD SPAMC/major.minor` (spamc compatibility)
    Spamc { major: u8, minor: u8 },
}

impl Protocol {
    pub fn is_spamc(&self) -> bool {
        matches!(self, Self::Spamc { .. })
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Optional envelope-style request headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub ip: Option<String>,
    pub from: Option<String>,
    pub rcpt: Vec<String>,
    pub user: Option<String>,
    pub helo: Option<String>,
    pub hostname: Option<String>,
    pub deliver_to: Option<String>,
    pub pass_all: bool,
    pub subject: Option<String>,
    pub queue_id: Option<String>,
    /// Per-task settings JSON from the `Settings` header.
    pub settings: Option<serde_json::Value>,
    /// Learn / fuzzy variants.
    pub classifier: Option<String>,
    pub value: Option<i32>,
    pub flag: Option<i32>,
    /// Controller variants (`ADD_SYMBOL`, `ADD_ACTION`).
    pub symbol: Option<String>,
    pub action: Option<String>,
    pub score: Option<f64>,
}

// ---------------------------------------------------------------------------
// ScanRequest
// ---------------------------------------------------------------------------

/// A parsed request head: first line plus envelope headers. The body (of
/// `content_length` bytes) follows the blank line.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub cmd: Command,
    pub protocol: Protocol,
    pub content_length: Option<usize>,
    pub envelope: Envelope,
}

impl ScanRequest {
    /// Parse the request head: `<CMD> RSPAMC/<maj.min>` (or `SPAMC/…`)
    /// followed by header lines until the empty line.
    pub fn parse_head(head: &str) -> anyhow::Result<Self> {
        let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
        let first = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty request"))?;
        let (cmd, protocol) = request_line
            .parse(first)
            .map_err(|e| anyhow::anyhow!("bad request line {first:?}: {e}"))?;

        let mut request = Self {
            cmd,
            protocol,
            content_length: None,
            envelope: Envelope::default(),
        };
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("bad header line {line:?}"))?;
            request.apply_header(name.trim(), value.trim())?;
        }
        Ok(request)
    }

    fn apply_header(&mut self, name: &str, value: &str) -> anyhow::Result<()> {
        match name.to_ascii_lowercase().as_str() {
            "content-length" => {
                let n: usize = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("bad Content-Length {value:?}"))?;
                self.content_length = Some(n);
            }
            "ip" => self.envelope.ip = Some(value.to_string()),
            "from" => self.envelope.from = Some(value.to_string()),
            "rcpt" => self.envelope.rcpt.push(value.to_string()),
            "user" => self.envelope.user = Some(value.to_string()),
            "helo" => self.envelope.helo = Some(value.to_string()),
            "hostname" => self.envelope.hostname = Some(value.to_string()),
            "deliver-to" => self.envelope.deliver_to = Some(value.to_string()),
            "pass" => self.envelope.pass_all = value.eq_ignore_ascii_case("all"),
            "subject" => self.envelope.subject = Some(value.to_string()),
            "queue-id" => self.envelope.queue_id = Some(value.to_string()),
            "settings" => {
                let parsed: serde_json::Value = serde_json::from_str(value)
                    .map_err(|e| anyhow::anyhow!("bad Settings header: {e}"))?;
                self.envelope.settings = Some(parsed);
            }
            "classifier" => self.envelope.classifier = Some(value.to_string()),
            "value" => {
                self.envelope.value = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow::anyhow!("bad Value header {value:?}"))?,
                );
            }
            "flag" => {
                self.envelope.flag = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow::anyhow!("bad Flag header {value:?}"))?,
                );
            }
            "symbol" => self.envelope.symbol = Some(value.to_string()),
            "action" => self.envelope.action = Some(value.to_string()),
            "score" => {
                self.envelope.score = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow::anyhow!("bad Score header {value:?}"))?,
                );
            }
            // Unknown headers are tolerated for forward compatibility.
            other => {
                let _ = other;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn request_line(input: &mut &str) -> ModalResult<(Command, Protocol)> {
    let name = take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_')
        .parse_next(input)?;
    let cmd = Command::from_name(name);
    ' '.parse_next(input)?;
    let banner = alt(("RSPAMC", "SPAMC")).parse_next(input)?;
    '/'.parse_next(input)?;
    let major = version_number.parse_next(input)?;
    let minor = opt(preceded('.', version_number))
        .parse_next(input)?
        .unwrap_or(0);
    // Trailing junk on the request line is an error.
    let rest = take_till(0.., |_| false).parse_next(input)?;
    if !rest.is_empty() {
        return Err(winnow::error::ErrMode::Cut(
            winnow::error::ContextError::new(),
        ));
    }
    let protocol = if banner == "SPAMC" {
        Protocol::Spamc { major, minor }
    } else {
        Protocol::Native { major, minor }
    };
    Ok((cmd, protocol))
}

fn version_number(input: &mut &str) -> ModalResult<u8> {
    digit1
        .try_map(str::parse::<u8>)
        .parse_next(input)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_native_check() {
        let head = "CHECK RSPAMC/1.3\r\nContent-Length: 42\r\nIp: 192.0.2.1\r\n\
From: a@example.org\r\nRcpt: b@example.net\r\nRcpt: c@example.net\r\n\
Queue-Id: XYZ123\r\nPass: all\r\n";
        let req = ScanRequest::parse_head(head).unwrap();
        assert_eq!(req.cmd, Command::Check);
        assert_eq!(req.protocol, Protocol::Native { major: 1, minor: 3 });
        assert_eq!(req.content_length, Some(42));
        assert_eq!(req.envelope.ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(req.envelope.rcpt.len(), 2);
        assert!(req.envelope.pass_all);
        assert_eq!(req.envelope.queue_id.as_deref(), Some("XYZ123"));
    }

    #[test]
    fn parse_spamc_banner() {
        let req = ScanRequest::parse_head("SYMBOLS SPAMC/1.5\r\nContent-Length: 7\r\n").unwrap();
        assert!(req.protocol.is_spamc());
        assert_eq!(req.cmd, Command::Symbols);
    }

    #[test]
    fn parse_learn_with_classifier() {
        let head = "LEARN RSPAMC/1.3\r\nContent-Length: 10\r\nClassifier: bayes\r\nValue: 1\r\n";
        let req = ScanRequest::parse_head(head).unwrap();
        assert_eq!(req.cmd, Command::Learn);
        assert_eq!(req.envelope.classifier.as_deref(), Some("bayes"));
        assert_eq!(req.envelope.value, Some(1));
    }

    #[test]
    fn parse_fuzzy_add_flag() {
        let head = "FUZZY_ADD RSPAMC/1.3\r\nContent-Length: 5\r\nFlag: 7\r\nValue: 3\r\n";
        let req = ScanRequest::parse_head(head).unwrap();
        assert_eq!(req.cmd, Command::FuzzyAdd);
        assert_eq!(req.envelope.flag, Some(7));
        assert_eq!(req.envelope.value, Some(3));
    }

    #[test]
    fn parse_settings_header() {
        let head =
            "CHECK RSPAMC/1.3\r\nSettings: {\"symbols\": {\"X\": 9.0}}\r\nContent-Length: 1\r\n";
        let req = ScanRequest::parse_head(head).unwrap();
        let settings = req.envelope.settings.unwrap();
        assert_eq!(settings["symbols"]["X"], 9.0);
    }

    #[test]
    fn unknown_command_is_custom() {
        let req = ScanRequest::parse_head("FROBNICATE RSPAMC/1.0\r\n").unwrap();
        assert_eq!(req.cmd, Command::Other("FROBNICATE".to_string()));
    }

    #[test]
    fn malformed_heads_rejected() {
        assert!(ScanRequest::parse_head("").is_err());
        assert!(ScanRequest::parse_head("CHECK\r\n").is_err());
        assert!(ScanRequest::parse_head("CHECK HTTP/1.1\r\n").is_err());
        assert!(ScanRequest::parse_head("CHECK RSPAMC/x.y\r\n").is_err());
        assert!(ScanRequest::parse_head("CHECK RSPAMC/1.3 junk\r\n").is_err());
        assert!(ScanRequest::parse_head("CHECK RSPAMC/1.3\r\nno colon here\r\n").is_err());
        assert!(
            ScanRequest::parse_head("CHECK RSPAMC/1.3\r\nContent-Length: NaN\r\n").is_err()
        );
    }

    #[test]
    fn body_and_symbol_expectations() {
        assert!(Command::Check.has_body());
        assert!(!Command::Ping.has_body());
        assert!(!Command::Counters.has_body());
        assert!(Command::Symbols.wants_symbols());
        assert!(!Command::Check.wants_symbols());
    }
}
