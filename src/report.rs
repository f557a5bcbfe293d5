//! Final run summary on stdout: a counters table or one JSON object.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;

use crate::error::Result;

/// Start time and tool name of one invocation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    tool: &'static str,
    start: DateTime<Local>,
}

impl RunSummary {
    pub fn begin(tool: &'static str) -> Self {
        Self {
            tool,
            start: Local::now(),
        }
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    /// `{start, tool, <counts…>, end, error?}`; nested values stay nested.
    pub fn to_json<T: Serialize>(&self, counts: Option<&T>, error: Option<&str>) -> Result<Value> {
        let mut object = Map::new();
        object.insert("start".into(), Value::String(self.start.to_rfc3339()));
        object.insert("tool".into(), Value::String(self.tool.to_string()));
        if let Some(counts) = counts {
            match serde_json::to_value(counts)? {
                Value::Object(fields) => object.extend(fields),
                other => {
                    object.insert("counts".into(), other);
                }
            }
        }
        object.insert("end".into(), Value::String(Local::now().to_rfc3339()));
        if let Some(error) = error {
            object.insert("error".into(), Value::String(error.to_string()));
        }
        Ok(Value::Object(object))
    }

    /// One `key  value` line per top-level counter.
    pub fn to_text<T: Serialize>(&self, counts: Option<&T>, error: Option<&str>) -> Result<String> {
        let mut out = format!("{} started {}\n", self.tool, self.start.format("%Y-%m-%d %H:%M:%S"));
        if let Some(counts) = counts {
            if let Value::Object(fields) = serde_json::to_value(counts)? {
                let width = fields.keys().map(String::len).max().unwrap_or(0);
                for (key, value) in fields {
                    out.push_str(&format!("  {:<width$}  {}\n", key, render_value(&key, &value), width = width));
                }
            }
        }
        if let Some(error) = error {
            out.push_str(&format!("  error: {}\n", error));
        }
        out.push_str(&format!("finished {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
        Ok(out)
    }

    /// Print the summary to stdout.
    pub fn print<T: Serialize>(&self, json: bool, counts: Option<&T>, error: Option<&str>) -> Result<()> {
        let rendered = if json {
            format!("{}\n", serde_json::to_string(&self.to_json(counts, error)?)?)
        } else {
            self.to_text(counts, error)?
        };
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

fn render_value(key: &str, value: &Value) -> String {
    match value {
        Value::Number(n) if key.ends_with("size_seen") || key == "bytes" => {
            n.as_u64().map(format_size).unwrap_or_else(|| n.to_string())
        }
        Value::Object(map) if map.is_empty() => "-".to_string(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" "),
        Value::Array(items) => items.len().to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.1} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Counts {
        checked: u64,
        errors: u64,
        max_blob_size_seen: u64,
        error_kinds: BTreeMap<String, u64>,
    }

    fn counts() -> Counts {
        Counts {
            checked: 3,
            errors: 1,
            max_blob_size_seen: 2048,
            error_kinds: [("decode".to_string(), 1)].into_iter().collect(),
        }
    }

    #[test]
    fn test_json_shape() {
        let summary = RunSummary::begin("ingest");
        let value = summary.to_json(Some(&counts()), None).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["start", "tool", "checked", "errors", "max_blob_size_seen", "error_kinds", "end"]
        );
        assert_eq!(value["tool"], "ingest");
        assert_eq!(value["checked"], 3);
        assert_eq!(value["error_kinds"]["decode"], 1);
    }

    #[test]
    fn test_json_error_field() {
        let summary = RunSummary::begin("hash");
        let value = summary.to_json::<Counts>(None, Some("database gone")).unwrap();
        assert_eq!(value["error"], "database gone");
        assert!(value.get("checked").is_none());
    }

    #[test]
    fn test_text_table() {
        let text = RunSummary::begin("ingest").to_text(Some(&counts()), None).unwrap();
        assert!(text.starts_with("ingest started"));
        assert!(text.contains("checked"));
        assert!(text.contains("2.0 KB"));
        assert!(text.contains("decode=1"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(500 * 1024 * 1024), "500.0 MB");
    }
}
