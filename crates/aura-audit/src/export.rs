//! Compliance export formats.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entry::AuditEntry;
use crate::error::AuditError;

/// Output format for [`export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// RFC 4180 CSV with a header row. Metadata is one JSON-encoded column.
    Csv,
    /// One JSON object per line.
    JsonLines,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" | "json_lines" | "jsonlines" => Ok(Self::JsonLines),
            other => Err(format!("unknown export format {other:?} (expected csv or jsonl)")),
        }
    }
}

const CSV_HEADER: [&str; 12] = [
    "sequence",
    "timestamp",
    "category",
    "action",
    "outcome",
    "severity",
    "actor",
    "target",
    "message",
    "metadata",
    "previous_hash",
    "hash",
];

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Render `entries` in `format`.
///
/// # Errors
///
/// [`AuditError::Serialization`] if an entry cannot be encoded.
pub fn export(entries: &[AuditEntry], format: ExportFormat) -> Result<String, AuditError> {
    let mut out = String::new();
    match format {
        ExportFormat::JsonLines => {
            for entry in entries {
                out.push_str(&serde_json::to_string(entry)?);
                out.push('\n');
            }
        }
        ExportFormat::Csv => {
            out.push_str(&CSV_HEADER.join(","));
            out.push_str("\r\n");
            for e in entries {
                let metadata = serde_json::to_string(&e.metadata)?;
                let row = [
                    e.sequence.to_string(),
                    e.timestamp.to_iso8601(),
                    e.category.to_string(),
                    e.action.clone(),
                    e.outcome.to_string(),
                    e.severity.to_string(),
                    e.actor.clone().unwrap_or_default(),
                    e.target.clone().unwrap_or_default(),
                    e.message.clone(),
                    metadata,
                    e.previous_hash.clone(),
                    e.hash.clone(),
                ];
                let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
                out.push_str(&fields.join(","));
                out.push_str("\r\n");
            }
        }
    }
    Ok(out)
}
