//! External command execution.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CommandSpec, ExitState};
use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit state plus captured output of one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitState,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: ExitState::Code(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn not_launched(reason: impl Into<String>) -> Self {
        Self {
            status: ExitState::NotLaunched,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }
}

/// Blocks until the command finishes. Launch problems are reported through the
/// returned status, never as a panic or error.
pub trait CommandRunner {
    fn run(&mut self, command: &CommandSpec) -> CommandOutput;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn run(&mut self, command: &CommandSpec) -> CommandOutput {
        (**self).run(command)
    }
}

/// Runs commands as child processes, killing them on cancellation or deadline.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner {
    cancel: Option<CancelToken>,
    deadline: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Per-command wall clock limit.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn wait(&self, child: &mut Child) -> ExitState {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return exit_state(status),
                Ok(None) => {}
                Err(e) => {
                    log::error!("lost track of child {}: {}", child.id(), e);
                    stop(child);
                    return ExitState::NotLaunched;
                }
            }
            if self.cancelled() {
                stop(child);
                return ExitState::Interrupted;
            }
            if self.deadline.is_some_and(|limit| started.elapsed() >= limit) {
                stop(child);
                return ExitState::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, command: &CommandSpec) -> CommandOutput {
        if self.cancelled() {
            return CommandOutput {
                status: ExitState::Interrupted,
                stdout: String::new(),
                stderr: "cancelled before launch".to_string(),
            };
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a wrapper script and everything it starts die together.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput::not_launched(format!(
                    "failed to launch {}: {}",
                    command.program, e
                ))
            }
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child);

        CommandOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        }
    }
}

fn exit_state(status: ExitStatus) -> ExitState {
    match status.code() {
        Some(code) => ExitState::Code(code),
        None => ExitState::Signalled,
    }
}

/// Kill the child's process group (the child alone off unix) and reap the child.
fn stop(child: &mut Child) {
    if !kill_group(child) {
        if let Err(e) = child.kill() {
            log::warn!("failed to kill child {}: {}", child.id(), e);
        }
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return true;
    }
    log::warn!(
        "failed to kill process group {}: {}",
        pgid,
        std::io::Error::last_os_error()
    );
    false
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> bool {
    false
}

/// Read a pipe to completion on a helper thread so the child never blocks on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            log::debug!("pipe read ended early: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
