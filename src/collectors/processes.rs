use super::{is_numeric, Cycle};
use crate::command::{CommandLine, CommandRunner};
use crate::config::SystemConfig;
use crate::error::CollectError;
use crate::snapshot::{Payload, ProcessRecord};
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const UNKNOWN_SERVICE: &str = "unknown";
/// Installed name of the system collector binary.
pub const COLLECTOR_PROGRAM: &str = "system-metrics";
pub const NO_PROCESSES_WARNING: &str = "no processes found";

const PS_ARGS: [&str; 2] = ["-eo", "pid=,args="];

/// Maps a pidstat command name, optionally narrowed by a substring of the full
/// command line, to a service identifier. First match wins.
struct Signature {
    command: &'static str,
    full_contains: Option<&'static str>,
    service: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature {
        command: "java",
        full_contains: Some("puppetserver"),
        service: "puppetserver",
    },
    Signature {
        command: "java",
        full_contains: Some("puppetdb"),
        service: "puppetdb",
    },
    Signature {
        command: "java",
        full_contains: Some("console-services"),
        service: "console-services",
    },
    Signature {
        command: "java",
        full_contains: Some("orchestration-services"),
        service: "orchestration-services",
    },
    Signature {
        command: "puma",
        full_contains: Some("ace-server"),
        service: "ace-server",
    },
    Signature {
        command: "puma",
        full_contains: Some("bolt-server"),
        service: "bolt-server",
    },
    Signature {
        command: "nginx",
        full_contains: None,
        service: "nginx",
    },
    Signature {
        command: "postgres",
        full_contains: None,
        service: "postgres",
    },
    Signature {
        command: "pxp-agent",
        full_contains: None,
        service: "pxp-agent",
    },
    Signature {
        command: "puppet",
        full_contains: None,
        service: "puppet",
    },
];

pub fn service_name(command_pidstat: &str, command_full: &str) -> &'static str {
    SIGNATURES
        .iter()
        .find(|sig| {
            command_pidstat.starts_with(sig.command)
                && sig
                    .full_contains
                    .map_or(true, |needle| command_full.contains(needle))
        })
        .map(|sig| sig.service)
        .unwrap_or(UNKNOWN_SERVICE)
}

/// Fields pidstat reported for one PID, merged across its stacked tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidstatRecord {
    pub command_pidstat: String,
    pub fields: BTreeMap<String, f64>,
}

pub fn ps_command() -> CommandLine {
    CommandLine::new("ps").args(PS_ARGS).env("LC_ALL", "C")
}

pub fn pidstat_command<'a>(pids: impl IntoIterator<Item = &'a u32>, cfg: &SystemConfig) -> CommandLine {
    let pid_list = pids
        .into_iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    CommandLine::new("pidstat")
        .env("LC_ALL", "C")
        .args(["-u", "-r", "-d", "-p"])
        .arg(pid_list)
        .args([
            cfg.polling_interval.to_string(),
            cfg.times_to_poll().to_string(),
        ])
}

/// Program names whose processes belong to the collector itself.
pub fn own_programs() -> Vec<String> {
    let mut programs = vec![COLLECTOR_PROGRAM.to_string()];
    let current = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().and_then(|n| n.to_str()).map(str::to_string));
    if let Some(name) = current {
        if !programs.contains(&name) {
            programs.push(name);
        }
    }
    programs
}

/// PID to full command line for every `ps` line matching `expression`.
///
/// Our own process, the `ps` invocation itself, and any line running one of
/// `own_programs` (sibling collector runs, the shell cron starts them from)
/// are never reported.
pub fn parse_process_list(
    raw: &str,
    expression: &Regex,
    own_pid: u32,
    own_programs: &[String],
) -> BTreeMap<u32, String> {
    let listing_self = format!("ps {}", PS_ARGS.join(" "));
    raw.lines()
        .filter_map(|line| {
            let (pid, args) = line.trim().split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok()?;
            Some((pid, args.trim()))
        })
        .filter(|(pid, args)| *pid != own_pid && !args.starts_with(&listing_self))
        .filter(|(_, args)| !runs_any(args, own_programs))
        .filter(|(_, args)| expression.is_match(args))
        .map(|(pid, args)| (pid, args.to_string()))
        .collect()
}

fn runs_any(args: &str, programs: &[String]) -> bool {
    args.split_whitespace().any(|token| {
        let token = token.trim_matches(|c| c == '\'' || c == '"');
        let name = Path::new(token)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(token);
        programs.iter().any(|p| p == name)
    })
}

/// Reads the `Average:` section of pidstat output.
///
/// Each statistic category arrives as its own table: a `Average: UID PID ...`
/// header followed by one `Average: <uid> <pid> ...` row per process. Rows are
/// read against the most recent header, and fields from every table are merged
/// into the record for that PID. The final header column is the command name.
pub fn parse_pidstat_output(raw: &str) -> Result<BTreeMap<u32, PidstatRecord>, CollectError> {
    let mut columns: Option<Vec<&str>> = None;
    let mut records: BTreeMap<u32, PidstatRecord> = BTreeMap::new();

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"Average:") || tokens.len() < 4 {
            continue;
        }

        if tokens[1] == "UID" && tokens[2] == "PID" {
            columns = Some(tokens[3..].to_vec());
            continue;
        }

        let Some(current) = columns.as_ref() else {
            continue;
        };
        if !tokens[1].bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(pid) = tokens[2].parse::<u32>() else {
            continue;
        };

        let command_column = current.len() - 1;
        let record = records.entry(pid).or_default();
        for (idx, (name, value)) in current.iter().zip(&tokens[3..]).enumerate() {
            if idx == command_column {
                record.command_pidstat = value.to_string();
            } else if is_numeric(value) {
                if let Ok(v) = value.parse::<f64>() {
                    record.fields.insert(name.to_string(), v);
                }
            }
        }
    }

    if columns.is_none() {
        return Err(CollectError::MissingMarker {
            marker: "Average: UID PID".to_string(),
            raw: raw.to_string(),
        });
    }

    debug!(processes = records.len(), "parsed pidstat averages");
    Ok(records)
}

/// Re-keys parsed records by service identifier.
///
/// Repeated identifiers get a numeric suffix in PID order: `unknown`,
/// `unknown_1`, `unknown_2`.
pub fn key_by_service(
    parsed: BTreeMap<u32, PidstatRecord>,
    command_lines: &BTreeMap<u32, String>,
) -> BTreeMap<String, ProcessRecord> {
    let mut seen: HashMap<&'static str, usize> = HashMap::new();
    parsed
        .into_iter()
        .map(|(pid, record)| {
            let command_full = command_lines.get(&pid).cloned().unwrap_or_default();
            let service = service_name(&record.command_pidstat, &command_full);
            let count = seen.entry(service).or_insert(0);
            let key = match *count {
                0 => service.to_string(),
                n => format!("{service}_{n}"),
            };
            *count += 1;
            (
                key,
                ProcessRecord {
                    pid,
                    command_pidstat: record.command_pidstat,
                    command_full,
                    fields: record.fields,
                },
            )
        })
        .collect()
}

pub(super) async fn collect<R: CommandRunner>(runner: &R, cfg: &SystemConfig) -> Cycle {
    let expression = &cfg.process_expression;
    let listing = match runner.run(&ps_command()).await {
        Ok(listing) => listing,
        Err(err) => return Cycle::failed(err),
    };
    let command_lines = parse_process_list(&listing, expression, std::process::id(), &own_programs());
    let times_to_poll = cfg.times_to_poll();

    if command_lines.is_empty() {
        warn!(
            process_expression = %expression,
            "no processes matched, waiting out the interval"
        );
        // Keep the file cadence the same as a real pidstat run.
        tokio::time::sleep(Duration::from_secs(cfg.polling_interval * times_to_poll)).await;
        return Cycle::completed(
            Utc::now(),
            Ok(Payload::Warning {
                warning: NO_PROCESSES_WARNING.to_string(),
                process_expression: expression.as_str().to_string(),
            }),
        );
    }

    let cmd = pidstat_command(command_lines.keys(), cfg);
    info!(
        command = %cmd,
        processes = command_lines.len(),
        samples = times_to_poll,
        "polling process statistics"
    );
    let raw = match runner.run(&cmd).await {
        Ok(raw) => raw,
        Err(err) => return Cycle::failed(err),
    };
    let timestamp = Utc::now();

    let result = parse_pidstat_output(&raw)
        .map(|parsed| Payload::Processes(key_by_service(parsed, &command_lines)));
    Cycle::completed(timestamp, result)
}
