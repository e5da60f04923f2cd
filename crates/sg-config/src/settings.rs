use serde_json::Value;

// ---------------------------------------------------------------------------
// Dynamic settings lookups
// ---------------------------------------------------------------------------
//
// Per-task settings arrive as free-form JSON (the `Settings` request
// header). Lookups always take a dotted path and a default; callers never
// cast raw values.

/// Walk a dotted path (`"actions.reject"`) through nested objects.
/// Array indices are accepted as numeric segments.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        match cur {
            Value::Object(map) => cur = map.get(seg)?,
            Value::Array(items) => {
                let idx: usize = seg.parse().ok()?;
                cur = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(cur)
}

/// Numeric lookup with a default; accepts integers and floats.
pub fn path_f64(root: &Value, path: &str, default: f64) -> f64 {
    lookup_path(root, path)
        .and_then(Value::as_f64)
        .unwrap_or(default)
}

/// String lookup with a default.
pub fn path_str<'a>(root: &'a Value, path: &str, default: &'a str) -> &'a str {
    lookup_path(root, path)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

/// Boolean lookup with a default.
pub fn path_bool(root: &Value, path: &str, default: bool) -> bool {
    lookup_path(root, path)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_object_lookup() {
        let v = json!({"actions": {"reject": 20.0}, "symbols": {"TEST": 1.5}});
        assert_eq!(path_f64(&v, "actions.reject", 15.0), 20.0);
        assert_eq!(path_f64(&v, "actions.greylist", 4.0), 4.0);
        assert_eq!(path_f64(&v, "symbols.TEST", 0.0), 1.5);
    }

    #[test]
    fn array_index_segment() {
        let v = json!({"rcpt": ["a@x", "b@x"]});
        assert_eq!(path_str(&v, "rcpt.1", "-"), "b@x");
        assert_eq!(path_str(&v, "rcpt.5", "-"), "-");
    }

    #[test]
    fn type_mismatch_falls_back() {
        let v = json!({"flag": "yes"});
        assert!(!path_bool(&v, "flag", false));
        assert_eq!(path_str(&v, "flag", "-"), "yes");
    }

    #[test]
    fn scalar_root_has_no_children() {
        let v = json!(42);
        assert!(lookup_path(&v, "anything").is_none());
    }
}
