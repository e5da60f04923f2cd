use mail_parser::MessageParser;
use orion_error::StructError;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// TextPartView
// ---------------------------------------------------------------------------

/// One decoded text part of the message. `words` is the lowercased word
/// list used by tokenizers and body rules; computed once at parse.
#[derive(Debug, Clone)]
pub struct TextPartView {
    pub raw: String,
    pub words: Vec<String>,
}

impl TextPartView {
    fn new(raw: String) -> Self {
        let words = normalize_words(&raw);
        Self { raw, words }
    }
}

/// Split on non-alphanumeric boundaries, lowercase, drop one-character
/// fragments.
pub fn normalize_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// MessageView
// ---------------------------------------------------------------------------

/// The parsed-once, immutable view of a message a task carries: headers,
/// addresses, URLs, text parts and the content digest. Everything here is
/// extracted at [`MessageView::parse`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub raw_len: usize,
    /// Unfolded `(name, value)` pairs in on-wire order.
    pub headers: Vec<(String, String)>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub rcpt: Vec<String>,
    pub received: Vec<String>,
    pub urls: Vec<String>,
    pub text_parts: Vec<TextPartView>,
    /// SHA-256 over the full raw message; fuzzy and learn-cache keys
    /// derive from it.
    pub digest: [u8; 32],
}

impl MessageView {
    pub fn parse(raw: &[u8]) -> CoreResult<Self> {
        let parsed = MessageParser::default().parse(raw).ok_or_else(|| {
            StructError::from(CoreReason::Message).with_detail("not an RFC 5322 message")
        })?;

        let subject = parsed.subject().map(str::to_string);
        let from = parsed.from().and_then(first_address);
        let rcpt = parsed.to().map(all_addresses).unwrap_or_default();

        let mut text_parts = Vec::new();
        let mut idx = 0usize;
        while let Some(text) = parsed.body_text(idx) {
            text_parts.push(TextPartView::new(text.into_owned()));
            idx += 1;
            if idx >= 64 {
                break;
            }
        }

        let headers = parse_raw_headers(raw);
        let received = headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("received"))
            .map(|(_, v)| v.clone())
            .collect();

        let urls = extract_urls(&text_parts);

        let mut hasher = Sha256::new();
        hasher.update(raw);
        let digest: [u8; 32] = hasher.finalize().into();

        Ok(Self {
            raw_len: raw.len(),
            headers,
            subject,
            from,
            rcpt,
            received,
            urls,
            text_parts,
            digest,
        })
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, case-insensitive.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Normalized word stream across every text part plus the subject,
    /// in part order.
    pub fn all_words(&self) -> Vec<&str> {
        let mut words: Vec<&str> = Vec::new();
        for part in &self.text_parts {
            words.extend(part.words.iter().map(String::as_str));
        }
        words
    }

    /// 64-byte fuzzy digest: SHA-256 of the concatenated normalized words,
    /// doubled to fill the fuzzy wire digest width.
    pub fn fuzzy_digest(&self) -> [u8; 64] {
        let mut hasher = Sha256::new();
        for part in &self.text_parts {
            for w in &part.words {
                hasher.update(w.as_bytes());
                hasher.update(b"\0");
            }
        }
        let half: [u8; 32] = hasher.finalize().into();
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&half);
        out[32..].copy_from_slice(&half);
        out
    }
}

fn first_address(address: &mail_parser::Address<'_>) -> Option<String> {
    match address {
        mail_parser::Address::List(list) => list.first(),
        mail_parser::Address::Group(groups) => {
            groups.first().and_then(|g| g.addresses.first())
        }
    }
    .and_then(|a| a.address.as_ref())
    .map(|s| s.to_string())
}

fn all_addresses(address: &mail_parser::Address<'_>) -> Vec<String> {
    let addrs: Vec<&mail_parser::Addr<'_>> = match address {
        mail_parser::Address::List(list) => list.iter().collect(),
        mail_parser::Address::Group(groups) => {
            groups.iter().flat_map(|g| g.addresses.iter()).collect()
        }
    };
    addrs
        .into_iter()
        .filter_map(|a| a.address.as_ref())
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Raw header scan
// ---------------------------------------------------------------------------

/// Unfold raw top-level headers without decoding: the header block ends at
/// the first empty line; continuation lines start with SP/HT.
fn parse_raw_headers(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if (line.starts_with(' ') || line.starts_with('\t'))
            && let Some((_, value)) = headers.last_mut()
        {
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

fn extract_urls(parts: &[TextPartView]) -> Vec<String> {
    // Scheme-anchored scan; good enough for rule matching, not a validator.
    let re = Regex::new(r#"(?i)\bhttps?://[^\s<>"']+"#).expect("url regex");
    let mut urls = Vec::new();
    for part in parts {
        for m in re.find_iter(&part.raw) {
            let url = m.as_str().trim_end_matches(['.', ',', ')', ';']);
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
