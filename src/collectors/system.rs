use super::{is_numeric, Cycle};
use crate::command::{CommandLine, CommandRunner};
use crate::config::{MetricType, SystemConfig};
use crate::error::CollectError;
use crate::snapshot::Payload;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Header column present only in `sar -u` reports.
pub const CPU_MARKER: &str = "CPU";
/// Header column present only in `sar -r` reports.
pub const MEMORY_MARKER: &str = "kbmemfree";
pub const AVERAGE_MARKER: &str = "Average:";

pub fn sar_command(cfg: &SystemConfig) -> CommandLine {
    let mut cmd = CommandLine::new("sar").env("LC_ALL", "C");
    if cfg.metric_type == MetricType::SystemMemory {
        cmd = cmd.arg("-r");
    }
    cmd.args([
        cfg.polling_interval.to_string(),
        cfg.times_to_poll().to_string(),
    ])
}

pub(super) async fn collect<R: CommandRunner>(runner: &R, cfg: &SystemConfig) -> Cycle {
    let cmd = sar_command(cfg);
    info!(
        command = %cmd,
        metric_type = %cfg.metric_type,
        samples = cfg.times_to_poll(),
        "polling system statistics"
    );

    let raw = match runner.run(&cmd).await {
        Ok(raw) => raw,
        Err(err) => return Cycle::failed(err),
    };
    // Stamped at completion, not at start.
    let timestamp = Utc::now();

    Cycle::completed(timestamp, parse_sar_output(&raw).map(Payload::Fields))
}

/// Pairs the report header with the `Average:` row.
///
/// Columns are aligned from the right because the two rows differ only in their
/// leading label columns (time and AM/PM against `Average:`). Values that are not
/// numeric, such as the `all` CPU label, are dropped.
pub fn parse_sar_output(raw: &str) -> Result<BTreeMap<String, f64>, CollectError> {
    let rows: Vec<Vec<&str>> = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect();

    let header = rows
        .iter()
        .find(|tokens| {
            tokens
                .iter()
                .any(|t| *t == CPU_MARKER || *t == MEMORY_MARKER)
        })
        .ok_or_else(|| CollectError::MissingMarker {
            marker: format!("{CPU_MARKER} or {MEMORY_MARKER} header"),
            raw: raw.to_string(),
        })?;

    let average = rows
        .iter()
        .find(|tokens| tokens.contains(&AVERAGE_MARKER))
        .ok_or_else(|| CollectError::MissingMarker {
            marker: AVERAGE_MARKER.to_string(),
            raw: raw.to_string(),
        })?;

    let fields: BTreeMap<String, f64> = header
        .iter()
        .rev()
        .zip(average.iter().rev())
        .filter(|(_, value)| is_numeric(value))
        .filter_map(|(name, value)| value.parse::<f64>().ok().map(|v| (name.to_string(), v)))
        .collect();

    debug!(fields = fields.len(), "parsed sar averages");
    Ok(fields)
}
