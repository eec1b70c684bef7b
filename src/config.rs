use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MetricType {
    SystemCpu,
    SystemMemory,
    SystemProcesses,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::SystemCpu => "system_cpu",
            MetricType::SystemMemory => "system_memory",
            MetricType::SystemProcesses => "system_processes",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one run of the system/process collector.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub polling_interval: u64,
    pub file_interval: u64,
    pub metric_type: MetricType,
    /// Compiled once at load time; `as_str()` gives the configured text back.
    pub process_expression: Regex,
    pub metrics_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmwareConfig {
    pub timeout: Duration,
    pub output_dir: Option<PathBuf>,
}

/// Any subset of the settings; used for both the YAML file and CLI overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub polling_interval: Option<u64>,
    pub file_interval: Option<u64>,
    pub metric_type: Option<MetricType>,
    pub process_expression: Option<String>,
    pub metrics_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl PartialConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    /// Values set in `overrides` win over values set in `self`.
    pub fn merge(self, overrides: PartialConfig) -> PartialConfig {
        PartialConfig {
            polling_interval: overrides.polling_interval.or(self.polling_interval),
            file_interval: overrides.file_interval.or(self.file_interval),
            metric_type: overrides.metric_type.or(self.metric_type),
            process_expression: overrides.process_expression.or(self.process_expression),
            metrics_dir: overrides.metrics_dir.or(self.metrics_dir),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            output_dir: overrides.output_dir.or(self.output_dir),
        }
    }

    pub fn into_system(self) -> Result<SystemConfig, ConfigError> {
        let cfg = SystemConfig {
            polling_interval: self.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL),
            file_interval: self.file_interval.unwrap_or(DEFAULT_FILE_INTERVAL),
            metric_type: self.metric_type.unwrap_or(MetricType::SystemCpu),
            process_expression: compile_expression(
                self.process_expression
                    .as_deref()
                    .unwrap_or(DEFAULT_PROCESS_EXPRESSION),
            )?,
            metrics_dir: self
                .metrics_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_DIR)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn into_vmware(self) -> Result<VmwareConfig, ConfigError> {
        let cfg = VmwareConfig {
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_VMWARE_TIMEOUT_SECS)),
            output_dir: self.output_dir,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval < 1 {
            return Err(ConfigError::Validation(
                "polling_interval must be >= 1".to_string(),
            ));
        }
        if self.file_interval < 1 {
            return Err(ConfigError::Validation(
                "file_interval must be >= 1".to_string(),
            ));
        }
        if self.file_interval > MAX_FILE_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "file_interval must be <= {MAX_FILE_INTERVAL}"
            )));
        }
        if self.polling_interval >= self.file_interval {
            return Err(ConfigError::Validation(format!(
                "polling_interval ({}) must be less than file_interval ({})",
                self.polling_interval, self.file_interval
            )));
        }
        if self.metrics_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "metrics_dir must not be empty".to_string(),
            ));
        }
        if self.process_expression.as_str().trim().is_empty() {
            return Err(ConfigError::Validation(
                "process_expression must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of samples the OS tool takes to cover one file interval.
    pub fn times_to_poll(&self) -> u64 {
        (self.file_interval as f64 / self.polling_interval as f64).round() as u64
    }

    /// Upper bound on a single tool call: the sampling window plus slack.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.polling_interval * self.times_to_poll() + COMMAND_TIMEOUT_SLACK_SECS)
    }
}

fn compile_expression(expression: &str) -> Result<Regex, ConfigError> {
    if expression.trim().is_empty() {
        return Err(ConfigError::Validation(
            "process_expression must not be empty".to_string(),
        ));
    }
    Regex::new(expression).map_err(|err| {
        ConfigError::Validation(format!(
            "process_expression is not a valid regular expression: {err}"
        ))
    })
}

impl VmwareConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Validation("timeout must be >= 1s".to_string()));
        }
        if let Some(dir) = &self.output_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "output_dir must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

pub fn example_yaml() -> &'static str {
    include_str!("../config.yaml.example")
}

pub const DEFAULT_POLLING_INTERVAL: u64 = 1;
pub const DEFAULT_FILE_INTERVAL: u64 = 300;
/// One day; keeps the sampling window and command timeout arithmetic in range.
pub const MAX_FILE_INTERVAL: u64 = 86_400;
pub const DEFAULT_PROCESS_EXPRESSION: &str = "puppet|pxp|postgres|nginx|java|puma";
pub const DEFAULT_METRICS_DIR: &str = "/var/lib/hoststats";
pub const DEFAULT_VMWARE_TIMEOUT_SECS: u64 = 10;
const COMMAND_TIMEOUT_SLACK_SECS: u64 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SystemConfig {
        PartialConfig::default().into_system().expect("defaults are valid")
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = valid_config();
        assert_eq!(cfg.polling_interval, 1);
        assert_eq!(cfg.file_interval, 300);
        assert_eq!(cfg.metric_type, MetricType::SystemCpu);
        assert_eq!(cfg.metrics_dir, PathBuf::from("/var/lib/hoststats"));

        let vmware = PartialConfig::default().into_vmware().unwrap();
        assert_eq!(vmware.timeout, Duration::from_secs(10));
        assert!(vmware.output_dir.is_none());
    }

    #[test]
    fn times_to_poll_rounds_the_ratio() {
        let mut cfg = valid_config();
        assert_eq!(cfg.times_to_poll(), 300);

        cfg.polling_interval = 7;
        cfg.file_interval = 60;
        assert_eq!(cfg.times_to_poll(), 9);

        cfg.polling_interval = 8;
        assert_eq!(cfg.times_to_poll(), 8);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(64 + 60));
    }

    #[test]
    fn polling_interval_must_be_below_file_interval() {
        let mut cfg = valid_config();
        cfg.polling_interval = 300;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must be less than file_interval"));

        cfg.polling_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_interval_is_capped_at_one_day() {
        let huge = PartialConfig {
            polling_interval: Some(1),
            file_interval: Some(u64::MAX),
            ..PartialConfig::default()
        };
        let err = huge.into_system().unwrap_err();
        assert!(err.to_string().contains("file_interval must be <= 86400"));

        let day = PartialConfig {
            polling_interval: Some(1),
            file_interval: Some(MAX_FILE_INTERVAL),
            ..PartialConfig::default()
        }
        .into_system()
        .unwrap();
        assert_eq!(day.times_to_poll(), 86_400);
        assert_eq!(day.command_timeout(), Duration::from_secs(86_400 + 60));
    }

    #[test]
    fn process_expression_must_compile() {
        let cfg = PartialConfig {
            process_expression: Some("java|(".to_string()),
            ..PartialConfig::default()
        };
        assert!(matches!(cfg.into_system(), Err(ConfigError::Validation(_))));

        let blank = PartialConfig {
            process_expression: Some("  ".to_string()),
            ..PartialConfig::default()
        };
        assert!(blank.into_system().is_err());

        assert_eq!(valid_config().process_expression.as_str(), DEFAULT_PROCESS_EXPRESSION);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let file: PartialConfig = serde_yaml::from_str(
            "polling_interval: 5\nfile_interval: 60\nmetric_type: system_memory\n",
        )
        .unwrap();
        let cli = PartialConfig {
            file_interval: Some(120),
            ..PartialConfig::default()
        };
        let cfg = file.merge(cli).into_system().unwrap();
        assert_eq!(cfg.polling_interval, 5);
        assert_eq!(cfg.file_interval, 120);
        assert_eq!(cfg.metric_type, MetricType::SystemMemory);
    }

    #[test]
    fn unknown_metric_type_in_yaml_is_rejected() {
        let parsed: Result<PartialConfig, _> = serde_yaml::from_str("metric_type: system_disk\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn bundled_example_parses() {
        let parsed: PartialConfig = serde_yaml::from_str(example_yaml()).unwrap();
        parsed.into_system().unwrap();
    }

    #[test]
    fn zero_vmware_timeout_is_rejected() {
        let cfg = PartialConfig {
            timeout_secs: Some(0),
            ..PartialConfig::default()
        };
        assert!(cfg.into_vmware().is_err());
    }
}
