use crate::command::{require_tool, CommandLine, CommandRunner};
use crate::error::CollectError;
use crate::snapshot::{local_hostname, MetricSnapshot, Payload};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

pub const TOOLBOX: &str = "vmware-toolbox-cmd";
pub const METRIC_TYPE: &str = "vmware";

/// Categories reported once per device instance (virtual disk, virtual NIC).
const MULTI_INSTANCE_CATEGORIES: [&str; 2] = ["vscsi", "vnet"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum CategoryStats {
    Single(Value),
    Instances(BTreeMap<String, Value>),
}

pub struct VmwareCollector<R> {
    runner: R,
    hostname: String,
}

impl<R: CommandRunner> VmwareCollector<R> {
    /// Fails with `MissingTool` when the guest tools are not installed.
    pub async fn new(runner: R) -> Result<Self, CollectError> {
        require_tool(&runner, TOOLBOX).await?;
        Ok(Self::with_hostname(runner, local_hostname()))
    }

    pub fn with_hostname(runner: R, hostname: impl Into<String>) -> Self {
        Self {
            runner,
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Always returns a complete document; gather failures become an error payload.
    pub async fn collect(&self) -> MetricSnapshot {
        let data = match self.gather().await {
            Ok(stats) => Payload::Raw(stats),
            Err(err) => {
                error!(kind = err.kind(), error = %err, "vmware stat collection failed");
                Payload::error(&err)
            }
        };
        MetricSnapshot::new(Utc::now(), &self.hostname, METRIC_TYPE, data)
    }

    async fn gather(&self) -> Result<Value, CollectError> {
        let listing = self.runner.run(&toolbox(["stat", "raw"])).await?;
        let categories = parse_categories(&listing);
        info!(entries = categories.len(), "fetching vmware stat categories");

        let mut stats: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for (category, instance) in categories {
            match instance {
                Some(instance) if MULTI_INSTANCE_CATEGORIES.iter().any(|c| *c == category) => {
                    let value = self.fetch(category, Some(instance)).await?;
                    let entry = stats
                        .entry(category.to_string())
                        .or_insert_with(|| CategoryStats::Instances(BTreeMap::new()));
                    if let CategoryStats::Single(_) = entry {
                        warn!(category, "replacing category-wide stats with per-instance stats");
                        *entry = CategoryStats::Instances(BTreeMap::new());
                    }
                    if let CategoryStats::Instances(instances) = entry {
                        instances.insert(instance.to_string(), value);
                    }
                }
                _ => {
                    if stats.contains_key(category) {
                        continue;
                    }
                    let value = self.fetch(category, None).await?;
                    stats.insert(category.to_string(), CategoryStats::Single(value));
                }
            }
        }

        Ok(serde_json::to_value(stats)?)
    }

    async fn fetch(&self, category: &str, instance: Option<&str>) -> Result<Value, CollectError> {
        let mut cmd = toolbox(["stat", "raw", "json", category]);
        if let Some(instance) = instance {
            cmd = cmd.arg(instance);
        }
        debug!(category, instance = ?instance, "fetching vmware stat");
        let text = self.runner.run(&cmd).await?;
        serde_json::from_str(&text).map_err(|source| CollectError::InvalidJson {
            command: cmd.to_string(),
            source,
        })
    }
}

fn toolbox<const N: usize>(args: [&str; N]) -> CommandLine {
    CommandLine::new(TOOLBOX).args(args)
}

/// One `category [instance]` pair per non-empty line.
fn parse_categories(listing: &str) -> Vec<(&str, Option<&str>)> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((category, instance)) => (category, Some(instance.trim())),
            None => (line, None),
        })
        .collect()
}
