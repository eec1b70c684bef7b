use crate::error::CollectError;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program, arguments and extra environment for one external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the command and returns its output whatever the exit status.
    async fn run_with_status(&self, command: &CommandLine) -> Result<CommandOutput, CollectError>;

    /// Runs the command and returns stdout, failing on a non-zero exit.
    async fn run(&self, command: &CommandLine) -> Result<String, CollectError> {
        let output = self.run_with_status(command).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(CollectError::Failed {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Spawns real child processes, killing any that outlive `timeout`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run_with_status(&self, command: &CommandLine) -> Result<CommandOutput, CollectError> {
        let rendered = command.to_string();
        debug!(command = %rendered, timeout = ?self.timeout, "running command");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CollectError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        // Both pipes are drained while we wait so a chatty child cannot block on a full buffer.
        let mut stdout = spawn_reader(child.stdout.take());
        let mut stderr = spawn_reader(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(err) = child.start_kill() {
                        warn!(command = %rendered, error = %err, "failed to kill timed out command");
                    }
                    stdout.abort();
                    stderr.abort();
                    return Err(CollectError::Timeout {
                        command: rendered,
                        timeout: self.timeout,
                    });
                }
                Ok(None) => sleep(POLL_INTERVAL).await,
                Err(source) => {
                    stdout.abort();
                    stderr.abort();
                    return Err(CollectError::Spawn {
                        command: rendered,
                        source,
                    });
                }
            }
        };

        // A background grandchild can keep the pipes open after the child exits.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let drained = timeout(remaining, async {
            (join_reader(&mut stdout).await, join_reader(&mut stderr).await)
        })
        .await;
        let Ok((stdout_text, stderr_text)) = drained else {
            warn!(command = %rendered, "output pipes still open at deadline");
            stdout.abort();
            stderr.abort();
            return Err(CollectError::Timeout {
                command: rendered,
                timeout: self.timeout,
            });
        };

        let output = CommandOutput {
            stdout: stdout_text,
            stderr: stderr_text,
            code: status.code(),
        };
        debug!(command = %rendered, code = ?output.code, stdout_bytes = output.stdout.len(), "command finished");
        Ok(output)
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = pipe {
            if let Err(err) = BufReader::new(pipe).read_to_end(&mut buf).await {
                debug!(error = %err, "pipe read interrupted");
            }
        }
        buf
    })
}

async fn join_reader(handle: &mut JoinHandle<Vec<u8>>) -> String {
    match handle.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Fails with `MissingTool` unless `tool` resolves on the search path.
pub async fn require_tool<R: CommandRunner>(runner: &R, tool: &str) -> Result<(), CollectError> {
    let probe = CommandLine::new("which").arg(tool);
    let found = match runner.run_with_status(&probe).await {
        Ok(output) => output.success(),
        Err(CollectError::Spawn { .. }) => false,
        Err(err) => return Err(err),
    };
    if found {
        Ok(())
    } else {
        Err(CollectError::MissingTool {
            tool: tool.to_string(),
        })
    }
}
