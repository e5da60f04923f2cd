use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use sg_core::MessageView;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// One token of a task: the window hash plus a per-statfile count slot
/// filled by the backend pre-fetch. Lives only for the task.
#[derive(Debug, Clone)]
pub struct Token {
    pub hash: u64,
    /// Indexed by statfile slot within the running classifier.
    pub counts: Vec<u64>,
}

impl Token {
    fn new(hash: u64) -> Self {
        Self {
            hash,
            counts: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// OSB tokenizer
// ---------------------------------------------------------------------------

/// Orthogonal sparse bigrams: a sliding window over the word list pairs
/// each word with up to `WINDOW - 1` successors; the pair index salts the
/// hash so `(a, b, distance 1)` and `(a, b, distance 2)` differ.
/// Deterministic across runs.
pub struct OsbTokenizer;

const WINDOW: usize = 5;

impl OsbTokenizer {
    /// Tokenize one word stream into the output vector.
    pub fn tokenize_words<'a, I>(words: I, out: &mut Vec<Token>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let words: Vec<&str> = words.into_iter().collect();
        for i in 0..words.len() {
            // Unigram
            out.push(Token::new(xxh3_64(words[i].as_bytes())));
            // Sparse bigrams within the window
            for j in 1..WINDOW {
                let Some(&next) = words.get(i + j) else { break };
                let mut buf = Vec::with_capacity(words[i].len() + next.len() + 2);
                buf.extend_from_slice(words[i].as_bytes());
                buf.push(0);
                buf.push(j as u8);
                buf.extend_from_slice(next.as_bytes());
                out.push(Token::new(xxh3_64(&buf)));
            }
        }
    }

    /// Tokenize the message's text parts and Subject. Strict mode feeds
    /// the normalized word list; compat mode splits the raw text on
    /// whitespace as the oldest tokenizer did.
    pub fn tokenize_message(message: &MessageView, strict: bool, out: &mut Vec<Token>) {
        for part in &message.text_parts {
            if strict {
                Self::tokenize_words(part.words.iter().map(String::as_str), out);
            } else {
                Self::tokenize_words(part.raw.split_whitespace(), out);
            }
        }
        if let Some(subject) = &message.subject {
            let words = sg_core::message::normalize_words(subject);
            Self::tokenize_words(words.iter().map(String::as_str), out);
        }
    }
}

// ---------------------------------------------------------------------------
// TokenizerRuntime
// ---------------------------------------------------------------------------

/// Per-task token container for one tokenizer key. Classifiers sharing a
/// tokenizer share the runtime, so the message is tokenized once.
#[derive(Debug)]
pub struct TokenizerRuntime {
    pub key: String,
    pub tokens: Vec<Token>,
}

/// tokenizer key → runtime, deduplicated per task.
#[derive(Debug, Default)]
pub struct TokenizerSet {
    runtimes: HashMap<String, TokenizerRuntime>,
}

impl TokenizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or build the runtime for `key`, tokenizing `message` on first
    /// use.
    pub fn get_or_create(
        &mut self,
        key: &str,
        message: &MessageView,
        strict: bool,
    ) -> &mut TokenizerRuntime {
        self.runtimes.entry(key.to_string()).or_insert_with(|| {
            let mut tokens = Vec::new();
            OsbTokenizer::tokenize_message(message, strict, &mut tokens);
            tracing::debug!(tokenizer = key, tokens = tokens.len(), "tokenized message");
            TokenizerRuntime {
                key: key.to_string(),
                tokens,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
