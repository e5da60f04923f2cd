use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::wire::SHINGLE_COUNT;

// ---------------------------------------------------------------------------
// Shingle generation
// ---------------------------------------------------------------------------

/// Words per rolling window. Messages shorter than this carry no
/// shingles; the digest alone still identifies them.
pub const WINDOW: usize = 3;

/// Compute the 32 content shingles of a word stream.
///
/// Min-hash construction: every 3-word window is hashed under 32
/// independent seeds, and shingle `i` keeps the minimum of row `i`.
/// Changing a small part of the text disturbs only the rows whose minima
/// lived in the changed windows, so near-duplicates agree on most rows.
pub fn generate<'a, I>(words: I) -> Option<[u64; SHINGLE_COUNT]>
where
    I: IntoIterator<Item = &'a str>,
{
    let words: Vec<&str> = words.into_iter().collect();
    if words.len() < WINDOW {
        return None;
    }
    let mut shingles = [u64::MAX; SHINGLE_COUNT];
    let mut buf = Vec::new();
    for window in words.windows(WINDOW) {
        buf.clear();
        for w in window {
            buf.extend_from_slice(w.as_bytes());
            buf.push(0);
        }
        for (row, shingle) in shingles.iter_mut().enumerate() {
            let h = xxh3_64_with_seed(&buf, row as u64);
            if h < *shingle {
                *shingle = h;
            }
        }
    }
    Some(shingles)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<&str> {
        text.split_whitespace().collect()
    }

    #[test]
    fn short_input_has_no_shingles() {
        assert!(generate(words("one two")).is_none());
        assert!(generate(words("one two three")).is_some());
    }

    #[test]
    fn deterministic() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        assert_eq!(generate(words(text)), generate(words(text)));
    }

    #[test]
    fn near_duplicates_share_most_rows() {
        let base = "buy cheap pills now best offer guaranteed winner claim \
your prize today and tomorrow and forever with free shipping worldwide";
        let tweaked = base.replace("today", "tonight");
        let a = generate(words(base)).unwrap();
        let b = generate(words(&tweaked)).unwrap();
        let same = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
        assert!(same > SHINGLE_COUNT / 2, "only {same} rows agree");
    }

    #[test]
    fn unrelated_texts_share_few_rows() {
        let a = generate(words(
            "buy cheap pills now best offer guaranteed winner claim your prize",
        ))
        .unwrap();
        let b = generate(words(
            "meeting notes from the quarterly review are attached for thursday",
        ))
        .unwrap();
        let same = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
        assert!(same < SHINGLE_COUNT / 2, "{same} rows agree unexpectedly");
    }
}
