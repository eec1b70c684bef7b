use clap::Parser;
use hoststats::collectors::vmware::VmwareCollector;
use hoststats::command::ProcessRunner;
use hoststats::config::{ConfigError, PartialConfig, VmwareConfig};
use hoststats::logging::init_tracing;
use std::path::PathBuf;
use tracing::{error, info};

/// Gathers vmware-toolbox-cmd guest statistics into one JSON document.
#[derive(Parser, Debug)]
#[command(name = "vmware-metrics")]
#[command(version)]
struct Cli {
    /// Optional YAML file providing `timeout_secs` and `output_dir`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Per-command timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Write under this directory instead of printing to stdout.
    #[arg(long = "output_dir")]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn load_config(&self) -> Result<VmwareConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => PartialConfig::load_from_file(path)?,
            None => PartialConfig::default(),
        };
        base.merge(PartialConfig {
            timeout_secs: self.timeout,
            output_dir: self.output_dir.clone(),
            ..PartialConfig::default()
        })
        .into_vmware()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let cfg = match cli.load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let collector = match VmwareCollector::new(ProcessRunner::new(cfg.timeout)).await {
        Ok(collector) => collector,
        Err(err) => {
            error!(error = %err, "cannot collect vmware statistics");
            std::process::exit(1);
        }
    };
    info!(hostname = %collector.hostname(), timeout = ?cfg.timeout, "collecting vmware statistics");

    let snapshot = collector.collect().await;

    match &cfg.output_dir {
        Some(dir) => match snapshot.write_to(dir) {
            Ok(path) => info!(path = %path.display(), "wrote metrics file"),
            Err(err) => {
                error!(error = %err, "failed to write metrics file");
                std::process::exit(1);
            }
        },
        None => match snapshot.to_pretty_string() {
            Ok(text) => print!("{text}"),
            Err(err) => {
                error!(error = %err, "failed to render metrics");
                std::process::exit(1);
            }
        },
    }

    if snapshot.data.is_error() {
        std::process::exit(1);
    }
}
