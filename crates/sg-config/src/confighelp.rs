use serde::Serialize;
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Option documentation registry
// ---------------------------------------------------------------------------
//
// Each worker registers its options here at startup; the `confighelp` CLI
// command renders the registry as JSON or searches it by keyword.

/// Documentation for one configuration option.
#[derive(Debug, Clone, Serialize)]
pub struct OptionDoc {
    pub key: &'static str,
    /// Value shape, e.g. `"string"`, `"duration"`, `"float"`, `"table"`.
    pub kind: &'static str,
    pub default: &'static str,
    pub doc: &'static str,
}

/// section path (e.g. `"scan.metric"`) → documented options.
#[derive(Debug, Default)]
pub struct ConfigDocs {
    sections: Vec<(String, Vec<OptionDoc>)>,
}

impl ConfigDocs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section's options; duplicate section paths are merged.
    pub fn register(&mut self, section: &str, options: Vec<OptionDoc>) {
        if let Some((_, existing)) = self.sections.iter_mut().find(|(s, _)| s == section) {
            existing.extend(options);
        } else {
            self.sections.push((section.to_string(), options));
        }
    }

    /// Render the whole registry, or only the named sections, as JSON.
    pub fn render(&self, keys: &[String], compact: bool) -> String {
        let mut root = Map::new();
        for (section, options) in &self.sections {
            if !keys.is_empty() && !keys.iter().any(|k| section.starts_with(k.as_str())) {
                continue;
            }
            let opts: Vec<Value> = options.iter().map(|o| json!(o)).collect();
            root.insert(section.clone(), Value::Array(opts));
        }
        let value = Value::Object(root);
        if compact {
            value.to_string()
        } else {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        }
    }

    /// Case-insensitive keyword search over keys and doc strings.
    pub fn search(&self, keyword: &str) -> Vec<(String, OptionDoc)> {
        let needle = keyword.to_ascii_lowercase();
        let mut hits = Vec::new();
        for (section, options) in &self.sections {
            for opt in options {
                if opt.key.to_ascii_lowercase().contains(&needle)
                    || opt.doc.to_ascii_lowercase().contains(&needle)
                    || section.to_ascii_lowercase().contains(&needle)
                {
                    hits.push((section.clone(), opt.clone()));
                }
            }
        }
        hits
    }
}

/// The built-in documentation for every section the daemon ships with.
pub fn default_docs() -> ConfigDocs {
    let mut docs = ConfigDocs::new();
    docs.register(
        "worker",
        vec![
            OptionDoc {
                key: "listen",
                kind: "string",
                default: "tcp://127.0.0.1:11333",
                doc: "Listen address for the scan protocol",
            },
            OptionDoc {
                key: "max_message_size",
                kind: "bytesize",
                default: "50MB",
                doc: "Largest accepted message body; bigger requests get a 413 reply",
            },
            OptionDoc {
                key: "task_timeout",
                kind: "duration",
                default: "8s",
                doc: "Per-task deadline; pending lookups are cancelled when it fires",
            },
            OptionDoc {
                key: "max_shots",
                kind: "integer",
                default: "100",
                doc: "Default cap on repeated insertions of one symbol",
            },
            OptionDoc {
                key: "history_rows",
                kind: "integer",
                default: "200",
                doc: "Rows kept in the roll history ring shown by COUNTERS",
            },
        ],
    );
    docs.register(
        "scan.metric",
        vec![
            OptionDoc {
                key: "name",
                kind: "string",
                default: "default",
                doc: "Metric name reported in replies",
            },
            OptionDoc {
                key: "grow_factor",
                kind: "float",
                default: "1.0",
                doc: "Multiplier compounded onto successive positive insertions",
            },
            OptionDoc {
                key: "actions",
                kind: "table",
                default: "{}",
                doc: "Score thresholds per action: reject, rewrite_subject, add_header, greylist",
            },
        ],
    );
    docs.register(
        "scan",
        vec![
            OptionDoc {
                key: "symbols",
                kind: "table",
                default: "{}",
                doc: "Static score, group and shot limits per symbol",
            },
            OptionDoc {
                key: "groups",
                kind: "table",
                default: "{}",
                doc: "Symbol groups with max_score caps",
            },
            OptionDoc {
                key: "composites",
                kind: "table",
                default: "{}",
                doc: "Boolean expressions over symbols that emit synthetic symbols",
            },
            OptionDoc {
                key: "rules",
                kind: "array",
                default: "[]",
                doc: "Declarative regexp rules over headers or body text",
            },
        ],
    );
    docs.register(
        "fuzzy",
        vec![
            OptionDoc {
                key: "listen",
                kind: "string",
                default: "udp://127.0.0.1:11335",
                doc: "UDP listen address of the fuzzy hash server",
            },
            OptionDoc {
                key: "expire",
                kind: "duration",
                default: "2d",
                doc: "Lifetime of stored hashes",
            },
            OptionDoc {
                key: "sync_timeout",
                kind: "duration",
                default: "1m",
                doc: "Base interval of the jittered periodic backend sync",
            },
            OptionDoc {
                key: "update_ips",
                kind: "array",
                default: "[]",
                doc: "CIDR networks allowed to write to or delete from fuzzy storage",
            },
            OptionDoc {
                key: "backend",
                kind: "table",
                default: "{ kind = \"memory\" }",
                doc: "Storage backend: memory, or redis with servers/db/password/prefix",
            },
        ],
    );
    docs.register(
        "stat",
        vec![
            OptionDoc {
                key: "classifiers",
                kind: "array",
                default: "[]",
                doc: "Bayes classifiers with their statfiles and backends",
            },
            OptionDoc {
                key: "strict_tokens",
                kind: "boolean",
                default: "false",
                doc: "Tokenize normalized words instead of raw text",
            },
        ],
    );
    docs.register(
        "logging",
        vec![
            OptionDoc {
                key: "level",
                kind: "string",
                default: "info",
                doc: "Global log level; SPAMGATE_LOG_LEVEL and RUST_LOG override",
            },
            OptionDoc {
                key: "format",
                kind: "string",
                default: "plain",
                doc: "Log output format: plain or json",
            },
            OptionDoc {
                key: "file",
                kind: "string",
                default: "",
                doc: "Optional log file, reopened on SIGHUP",
            },
        ],
    );
    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_all_sections() {
        let docs = default_docs();
        let out = docs.render(&[], false);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v.get("worker").is_some());
        assert!(v.get("fuzzy").is_some());
        assert!(v.get("logging").is_some());
    }

    #[test]
    fn render_filtered_by_key() {
        let docs = default_docs();
        let out = docs.render(&["fuzzy".to_string()], true);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v.get("fuzzy").is_some());
        assert!(v.get("worker").is_none());
    }

    #[test]
    fn keyword_search_hits_docs() {
        let docs = default_docs();
        let hits = docs.search("SIGHUP");
        assert!(hits.iter().any(|(s, o)| s == "logging" && o.key == "file"));
        assert!(docs.search("no-such-keyword-xyz").is_empty());
    }

    #[test]
    fn register_merges_sections() {
        let mut docs = ConfigDocs::new();
        docs.register(
            "x",
            vec![OptionDoc {
                key: "a",
                kind: "string",
                default: "",
                doc: "",
            }],
        );
        docs.register(
            "x",
            vec![OptionDoc {
                key: "b",
                kind: "string",
                default: "",
                doc: "",
            }],
        );
        assert_eq!(docs.search("").len(), 2);
    }
}
