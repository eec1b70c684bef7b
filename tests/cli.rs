//! End-to-end runs of both binaries with stand-in tools on PATH.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SAR_CPU: &str = "\
Linux 5.15.0-91-generic (web01) \t10/19/2026 \t_x86_64_\t(4 CPU)

08:00:01 AM     CPU     %user     %nice   %system   %iowait    %steal     %idle
08:00:02 AM     all      0.58      0.00      0.08      0.00      0.00     99.33
Average:        all      0.58      0.00      0.08      0.00      0.00     99.33
";

fn system_metrics(args: &[&str], path_prefix: Option<&Path>) -> Output {
    let exe = env!("CARGO_BIN_EXE_system-metrics");
    let mut cmd = Command::new(exe);
    cmd.args(args).env_remove("RUST_LOG");
    if let Some(dir) = path_prefix {
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{path}", dir.display()));
    }
    cmd.output().expect("run system-metrics")
}

fn json_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(json_files(&path));
            } else if path.extension().is_some_and(|e| e == "json") {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(unix)]
fn fake_tool(dir: &Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write fake tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
}

#[test]
fn print_default_config_outputs_yaml() {
    let out = system_metrics(&["--print-default-config"], None);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("metric_type: system_cpu"));
}

#[test]
fn interval_ordering_is_rejected_before_collection() {
    let dir = tempfile::tempdir().unwrap();
    let metrics_dir = dir.path().to_str().unwrap();
    let out = system_metrics(
        &[
            "--polling_interval",
            "60",
            "--file_interval",
            "30",
            "--metrics_dir",
            metrics_dir,
        ],
        None,
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(json_files(dir.path()).is_empty());
}

#[test]
fn unknown_metric_type_is_rejected_by_the_parser() {
    let out = system_metrics(&["--metric_type", "system_disk"], None);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("system_disk"));
}

#[cfg(unix)]
#[test]
fn cpu_cycle_writes_one_snapshot_and_failures_write_an_error_file() {
    let tools = tempfile::tempdir().unwrap();
    let metrics = tempfile::tempdir().unwrap();
    let metrics_dir = metrics.path().to_str().unwrap();
    let args = [
        "--polling_interval",
        "1",
        "--file_interval",
        "2",
        "--metrics_dir",
        metrics_dir,
    ];

    fake_tool(tools.path(), "sar", &format!("cat <<'EOF'\n{SAR_CPU}EOF"));
    let out = system_metrics(&args, Some(tools.path()));
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let files = json_files(&metrics.path().join("system_cpu"));
    assert_eq!(files.len(), 1);
    let name = files[0].file_stem().unwrap().to_str().unwrap();
    assert_eq!(name.len(), "20261019T080509Z".len());
    assert!(name.ends_with('Z'));

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
    let servers = doc["servers"].as_object().unwrap();
    assert_eq!(servers.len(), 1);
    let payload = &servers.values().next().unwrap()["system_cpu"];
    assert_eq!(payload["%idle"], 99.33);
    assert_eq!(payload["%user"], 0.58);

    fs::remove_file(&files[0]).unwrap();
    fake_tool(tools.path(), "sar", "echo 'sar: cannot open /var/log/sa' >&2; exit 2");
    let out = system_metrics(&args, Some(tools.path()));
    assert_eq!(out.status.code(), Some(1));

    let files = json_files(&metrics.path().join("system_cpu"));
    assert_eq!(files.len(), 1);
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
    let payload = &doc["servers"].as_object().unwrap().values().next().unwrap()["system_cpu"];
    let message = payload["error"].as_str().unwrap();
    assert!(message.starts_with("CommandFailed: "));
    assert!(message.contains("cannot open /var/log/sa"));
}

#[cfg(unix)]
#[test]
fn vmware_metrics_requires_the_toolbox() {
    let empty = tempfile::tempdir().unwrap();
    let exe = env!("CARGO_BIN_EXE_vmware-metrics");
    let out = Command::new(exe)
        .env("PATH", empty.path())
        .output()
        .expect("run vmware-metrics");
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}
