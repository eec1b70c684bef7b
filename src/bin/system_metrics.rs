use clap::Parser;
use hoststats::collectors::SystemCollector;
use hoststats::command::ProcessRunner;
use hoststats::config::{self, ConfigError, MetricType, PartialConfig, SystemConfig};
use hoststats::logging::init_tracing;
use hoststats::snapshot::local_hostname;
use std::path::PathBuf;
use tracing::{error, info};

/// Polls sar or pidstat for one file interval and writes a JSON snapshot.
#[derive(Parser, Debug)]
#[command(name = "system-metrics")]
#[command(version)]
struct Cli {
    /// Optional YAML file with defaults for the flags below.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Seconds between samples.
    #[arg(long = "polling_interval")]
    polling_interval: Option<u64>,
    /// Seconds covered by one output file.
    #[arg(long = "file_interval")]
    file_interval: Option<u64>,
    #[arg(long = "metric_type", value_enum)]
    metric_type: Option<MetricType>,
    /// Regular expression selecting processes in system_processes mode.
    #[arg(long = "process_expression")]
    process_expression: Option<String>,
    #[arg(long = "metrics_dir")]
    metrics_dir: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            polling_interval: self.polling_interval,
            file_interval: self.file_interval,
            metric_type: self.metric_type,
            process_expression: self.process_expression.clone(),
            metrics_dir: self.metrics_dir.clone(),
            ..PartialConfig::default()
        }
    }

    fn load_config(&self) -> Result<SystemConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => PartialConfig::load_from_file(path)?,
            None => PartialConfig::default(),
        };
        base.merge(self.overrides()).into_system()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.print_default_config {
        println!("{}", config::example_yaml());
        return;
    }

    let cfg = match cli.load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let hostname = local_hostname();
    info!(
        metric_type = %cfg.metric_type,
        polling_interval = cfg.polling_interval,
        file_interval = cfg.file_interval,
        hostname = %hostname,
        "starting collection cycle"
    );

    let runner = ProcessRunner::new(cfg.command_timeout());
    let collector = SystemCollector::new(runner, cfg);
    let cycle = collector.collect().await;
    let failed = cycle.is_error();

    let cfg = collector.config();
    let snapshot = cycle.into_snapshot(&hostname, cfg.metric_type.as_str());
    match snapshot.write_to(&cfg.metrics_dir) {
        Ok(path) => info!(path = %path.display(), "wrote metrics file"),
        Err(err) => {
            error!(error = %err, "failed to write metrics file");
            std::process::exit(1);
        }
    }

    if failed {
        std::process::exit(1);
    }
}
