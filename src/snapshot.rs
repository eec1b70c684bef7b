use crate::error::CollectError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::{System, SystemExt};

/// Per-process record keyed by service identifier in process-mode output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command_pidstat: String,
    pub command_full: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Fields(BTreeMap<String, f64>),
    Processes(BTreeMap<String, ProcessRecord>),
    Warning {
        warning: String,
        process_expression: String,
    },
    Error {
        error: String,
    },
    Raw(serde_json::Value),
}

impl Payload {
    pub fn error(err: &CollectError) -> Self {
        Payload::Error {
            error: err.to_payload_message(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub metric_type: String,
    pub data: Payload,
}

#[derive(Serialize)]
struct Document<'a> {
    timestamp: String,
    servers: BTreeMap<String, BTreeMap<&'a str, &'a Payload>>,
}

impl MetricSnapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        hostname: impl Into<String>,
        metric_type: impl Into<String>,
        data: Payload,
    ) -> Self {
        Self {
            timestamp,
            hostname: hostname.into(),
            metric_type: metric_type.into(),
            data,
        }
    }

    /// Key under `servers`: the hostname with dots replaced by dashes.
    pub fn server_key(&self) -> String {
        self.hostname.replace('.', "-")
    }

    #[cfg(test)]
    pub(crate) fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.document()).expect("snapshot serializes")
    }

    pub fn to_pretty_string(&self) -> Result<String, CollectError> {
        let mut text = serde_json::to_string_pretty(&self.document())?;
        text.push('\n');
        Ok(text)
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", file_stamp(&self.timestamp))
    }

    pub fn output_path(&self, metrics_dir: &Path) -> PathBuf {
        metrics_dir
            .join(&self.metric_type)
            .join(&self.hostname)
            .join(self.file_name())
    }

    /// Writes the snapshot under `metrics_dir`, creating directories as needed.
    pub fn write_to(&self, metrics_dir: &Path) -> Result<PathBuf, CollectError> {
        let path = self.output_path(metrics_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CollectError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = self.to_pretty_string()?;
        fs::write(&path, text).map_err(|source| CollectError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn document(&self) -> Document<'_> {
        let mut metrics = BTreeMap::new();
        metrics.insert(self.metric_type.as_str(), &self.data);
        let mut servers = BTreeMap::new();
        servers.insert(self.server_key(), metrics);
        Document {
            timestamp: iso8601(&self.timestamp),
            servers,
        }
    }
}

pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn file_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn local_hostname() -> String {
    System::new()
        .host_name()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
