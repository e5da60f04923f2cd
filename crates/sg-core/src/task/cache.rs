use std::collections::HashMap;

// ---------------------------------------------------------------------------
// CacheSlots — per-task string-keyed memo
// ---------------------------------------------------------------------------

/// Result of a cache probe: never ran, ran with no value, or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Miss,
    NoValue,
    Value(i64),
}

/// Small string-keyed memo for "have we already run this check on this
/// task". The regexp rules use it to avoid rescanning the same pattern
/// against the same part.
#[derive(Debug, Default)]
pub struct CacheSlots {
    map: HashMap<String, Option<i64>>,
}

impl CacheSlots {
    pub fn check(&self, key: &str) -> CacheResult {
        match self.map.get(key) {
            None => CacheResult::Miss,
            Some(None) => CacheResult::NoValue,
            Some(Some(v)) => CacheResult::Value(*v),
        }
    }

    pub fn set(&mut self, key: &str, value: Option<i64>) {
        self.map.insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_value_then_no_value() {
        let mut slots = CacheSlots::default();
        assert_eq!(slots.check("re:subject"), CacheResult::Miss);
        slots.set("re:subject", Some(1));
        assert_eq!(slots.check("re:subject"), CacheResult::Value(1));
        slots.set("re:subject", None);
        assert_eq!(slots.check("re:subject"), CacheResult::NoValue);
    }
}
