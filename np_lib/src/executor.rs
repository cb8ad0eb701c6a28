//! Running external commands to completion.

use crate::command::CommandLine;
use crate::errors::PipelineError;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// How many bytes of captured output to keep in a [`StageResult`].
const OUTPUT_TAIL_BYTES: u64 = 4096;

/// The outcome of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// `None` when the process did not exit normally.
    pub exit_code: Option<i32>,
    /// The terminating signal, if any.
    pub signal: Option<i32>,
    /// The rendered command, for diagnostics.
    pub command: String,
    /// Where the command's output was captured.
    pub log: PathBuf,
    /// The last few KB of captured output.
    pub output_tail: String,
}

impl StageResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Something that can run a [`CommandLine`] and report how it ended.
///
/// A runner only reports; turning a bad status into an error is done by
/// [`execute`].
pub trait StageRunner: Sync {
    fn run(&self, command: &CommandLine) -> Result<StageResult, PipelineError>;
}

/// Run `command` with `runner`, mapping a non-zero status to
/// [`PipelineError::StageFailure`] and a missing output to
/// [`PipelineError::MissingArtifact`].
pub fn execute<R: StageRunner + ?Sized>(
    runner: &R,
    command: &CommandLine,
) -> Result<StageResult, PipelineError> {
    debug!("running {}: {command}", command.label());
    let result = runner.run(command)?;
    if !result.success() {
        return Err(PipelineError::StageFailure {
            stage: command.step,
            unit: command.unit.as_ref().map(|u| u.id().to_string()),
            exit_code: result.exit_code,
            signal: result.signal,
            command: result.command,
            log: result.log,
            output_tail: result.output_tail,
        });
    }
    if let Some(missing) = command.outputs.iter().find(|p| !p.exists()) {
        return Err(PipelineError::MissingArtifact {
            stage: command.step,
            unit: command.unit.as_ref().map(|u| u.id().to_string()),
            path: missing.clone(),
        });
    }
    Ok(result)
}

/// Spawns real processes, piping each member of the pipeline into the next.
///
/// Standard error of every member, and standard output when it is not
/// redirected, are appended to `<log_dir>/<label>.log`. No timeout is
/// applied; children stay in our process group so an interrupt from the
/// terminal reaches them too.
pub struct ProcessRunner {
    log_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        ProcessRunner {
            log_dir: log_dir.into(),
        }
    }

    fn spawn_all(&self, command: &CommandLine, log: &File) -> Result<Vec<Child>, PipelineError> {
        let log_handle = || {
            log.try_clone()
                .map_err(|e| PipelineError::environment("duplicating log handle", e))
        };
        let last = command.pipeline.len().saturating_sub(1);
        let mut children: Vec<Child> = Vec::with_capacity(command.pipeline.len());
        for (i, inv) in command.pipeline.iter().enumerate() {
            let mut cmd = Command::new(&inv.program);
            cmd.args(&inv.args).stderr(log_handle()?);

            if let Some(prev) = children.last_mut().and_then(|c| c.stdout.take()) {
                cmd.stdin(Stdio::from(prev));
            } else {
                cmd.stdin(Stdio::null());
            }

            if i < last {
                cmd.stdout(Stdio::piped());
            } else if let Some(path) = &command.stdout {
                let out = File::create(path).map_err(|e| {
                    PipelineError::environment(format!("creating {}", path.display()), e)
                })?;
                cmd.stdout(out);
            } else {
                cmd.stdout(log_handle()?);
            }

            match cmd.spawn() {
                Ok(child) => children.push(child),
                Err(e) => {
                    // Reap what is already running before reporting.
                    for mut child in children {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    return Err(PipelineError::environment(
                        format!("launching {} for {}", inv.program, command.label()),
                        e,
                    ));
                }
            }
        }
        Ok(children)
    }
}

impl StageRunner for ProcessRunner {
    fn run(&self, command: &CommandLine) -> Result<StageResult, PipelineError> {
        fs::create_dir_all(&self.log_dir).map_err(|e| {
            PipelineError::environment(format!("creating {}", self.log_dir.display()), e)
        })?;
        let log_path = self.log_dir.join(format!("{}.log", command.label()));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&log_path)
            .map_err(|e| {
                PipelineError::environment(format!("opening {}", log_path.display()), e)
            })?;

        let children = self.spawn_all(command, &log)?;

        // pipefail: the rightmost member that did not succeed decides the
        // status, so an upstream SIGPIPE never masks the real failure
        let mut status: Option<ExitStatus> = None;
        for mut child in children {
            let s = child.wait().map_err(|e| {
                PipelineError::environment(format!("waiting for {}", command.label()), e)
            })?;
            if status.is_none() || !s.success() {
                status = Some(s);
            }
        }
        let status = status.ok_or_else(|| {
            PipelineError::environment(
                format!("{} has an empty pipeline", command.label()),
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            )
        })?;

        Ok(StageResult {
            exit_code: status.code(),
            signal: exit_signal(&status),
            command: command.to_string(),
            output_tail: read_tail(&log_path).unwrap_or_default(),
            log: log_path,
        })
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn read_tail(path: &Path) -> std::io::Result<String> {
    let mut f = File::open(path)?;
    let len = f.metadata()?.len();
    f.seek(SeekFrom::Start(len.saturating_sub(OUTPUT_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
