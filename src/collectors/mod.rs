pub mod processes;
pub mod system;
pub mod vmware;

use crate::command::CommandRunner;
use crate::config::{MetricType, SystemConfig};
use crate::error::CollectError;
use crate::snapshot::{MetricSnapshot, Payload};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::error;

/// Result of one collection cycle, before it is turned into an output document.
#[derive(Debug)]
pub struct Cycle {
    /// Set once the sampling tool has finished; `None` if we failed before that.
    pub timestamp: Option<DateTime<Utc>>,
    pub result: Result<Payload, CollectError>,
}

impl Cycle {
    pub fn completed(timestamp: DateTime<Utc>, result: Result<Payload, CollectError>) -> Self {
        Self {
            timestamp: Some(timestamp),
            result,
        }
    }

    pub fn failed(err: CollectError) -> Self {
        Self {
            timestamp: None,
            result: Err(err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    pub fn into_snapshot(self, hostname: &str, metric_type: &str) -> MetricSnapshot {
        let data = match self.result {
            Ok(payload) => payload,
            Err(err) => {
                error!(kind = err.kind(), error = %err, metric_type, "collection failed");
                Payload::error(&err)
            }
        };
        MetricSnapshot::new(
            self.timestamp.unwrap_or_else(Utc::now),
            hostname,
            metric_type,
            data,
        )
    }
}

pub struct SystemCollector<R> {
    runner: R,
    config: SystemConfig,
}

impl<R: CommandRunner> SystemCollector<R> {
    pub fn new(runner: R, config: SystemConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub async fn collect(&self) -> Cycle {
        match self.config.metric_type {
            MetricType::SystemCpu | MetricType::SystemMemory => {
                system::collect(&self.runner, &self.config).await
            }
            MetricType::SystemProcesses => processes::collect(&self.runner, &self.config).await,
        }
    }
}

/// Optional sign, digits, optional fraction.
pub(crate) fn is_numeric(token: &str) -> bool {
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    NUMERIC
        .get_or_init(|| Regex::new(r"^[-+]?\d+(\.\d+)?$").expect("numeric pattern is valid"))
        .is_match(token)
}
