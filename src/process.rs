//! Launching the external miner binary.
//!
//! One [`ProcessSpec`] describes both ways the plugin starts the miner:
//! interactive for real mining (inherited console, no capture) and captured
//! for benchmarks (stdout and stderr merged into a line stream).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Instant,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::errors::{PluginError, PluginResult};

/// Windows `CREATE_NO_WINDOW` process creation flag.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How the miner's console is wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Inherit the parent's console; nothing is captured.
    Interactive,
    /// No window; stdout and stderr are captured.
    Captured,
}

/// Launch description for the miner binary.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Executable to run.
    pub binary_path:  PathBuf,
    /// Working directory of the child.
    pub working_dir:  PathBuf,
    /// Command-line arguments as a single string.
    pub command_line: String,
    /// Variables set on top of the inherited environment.
    pub environment:  BTreeMap<String, String>,
    /// Console wiring.
    pub mode:         ProcessMode,
}

impl ProcessSpec {
    /// Spec for a mining run.
    pub fn interactive(
        binary_path: impl Into<PathBuf>, working_dir: impl Into<PathBuf>,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            binary_path:  binary_path.into(),
            working_dir:  working_dir.into(),
            command_line: command_line.into(),
            environment:  BTreeMap::new(),
            mode:         ProcessMode::Interactive,
        }
    }

    /// Spec for a benchmark run.
    pub fn captured(
        binary_path: impl Into<PathBuf>, working_dir: impl Into<PathBuf>,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            mode: ProcessMode::Captured,
            ..Self::interactive(binary_path, working_dir, command_line)
        }
    }

    /// Set one environment variable for the child.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Set several environment variables for the child.
    pub fn with_environment<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.environment.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the tokio command for this spec.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .args(split_command_line(&self.command_line))
            .current_dir(&self.working_dir)
            .envs(&self.environment);

        match self.mode {
            ProcessMode::Interactive => {
                command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            ProcessMode::Captured => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);
                #[cfg(windows)]
                command.creation_flags(CREATE_NO_WINDOW);
            }
        }

        command
    }

    /// Start the process.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::ProcessLaunch` if the binary cannot be started.
    pub fn spawn(&self) -> PluginResult<SupervisedProcess> {
        let mut child = self.command().spawn().map_err(|source| {
            warn!(binary = %self.binary_path.display(), error = %source, "miner failed to launch");
            PluginError::ProcessLaunch { binary: self.binary_path.clone(), source }
        })?;

        let output = match self.mode {
            ProcessMode::Interactive => None,
            ProcessMode::Captured => Some(CapturedOutput::attach(&mut child)),
        };

        let process = SupervisedProcess {
            pid: child.id(),
            child,
            output,
            binary: self.binary_path.clone(),
            started_at: Instant::now(),
        };
        debug!(
            binary = %process.binary.display(),
            pid = ?process.pid,
            mode = ?self.mode,
            args = %self.command_line,
            "miner process started"
        );
        Ok(process)
    }
}

/// A running miner process.
#[derive(Debug)]
pub struct SupervisedProcess {
    child:      Child,
    pid:        Option<u32>,
    output:     Option<CapturedOutput>,
    binary:     PathBuf,
    started_at: Instant,
}

impl SupervisedProcess {
    /// OS process id, if the process was running when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the process was started.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Binary this process runs.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Take the captured output stream. `None` in interactive mode or when
    /// already taken.
    pub fn take_output(&mut self) -> Option<CapturedOutput> {
        self.output.take()
    }

    /// Exit status if the process has already exited.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::ProcessIo` if the status cannot be queried.
    pub fn try_exited(&mut self) -> PluginResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to exit. The status is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::ProcessIo` if waiting fails.
    pub async fn wait(&mut self) -> PluginResult<ExitStatus> {
        let status = self.child.wait().await?;
        debug!(binary = %self.binary.display(), pid = ?self.pid, %status, "miner process exited");
        Ok(status)
    }

    /// Kill the process and reap it.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::ProcessIo` if the process cannot be killed.
    pub async fn kill(&mut self) -> PluginResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        debug!(binary = %self.binary.display(), pid = ?self.pid, "miner process killed");
        Ok(())
    }
}

/// Lines buffered per captured process before the readers wait.
const OUTPUT_BUFFER: usize = 256;

/// Merged stdout/stderr lines of a captured process.
#[derive(Debug)]
pub struct CapturedOutput {
    lines: mpsc::Receiver<String>,
}

impl CapturedOutput {
    fn attach(child: &mut Child) -> Self {
        let (tx, lines) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }
        Self { lines }
    }

    /// Next line from either stream. `None` once both streams are closed.
    ///
    /// Bytes that are not valid UTF-8 are replaced with `U+FFFD`.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "stopped reading miner output");
                break;
            }
        }
    }
}

/// Split a command-line string into arguments.
///
/// Arguments are separated by whitespace; double quotes group text
/// containing whitespace and are removed.
#[must_use]
pub fn split_command_line(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in command_line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }

    args
}
