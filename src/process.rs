//! Child process launching with captured output and bounded waits.
//!
//! Recorded scripts and the recorder itself both run as isolated child
//! processes. [`ProcessRunner`] is the seam the orchestrator and the recorder
//! use, so tests can substitute scripted fakes for real programs.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::CommandLine;

/// How often a waiting caller polls the child for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time a child gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Time background processes left by an exited child get to close its pipes
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A command to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Start from a configured command line (program plus leading args)
    pub fn from_command_line(line: &CommandLine) -> Self {
        Self::new(line.program.clone()).args(line.args.iter().cloned())
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human readable form for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything captured from a finished (or terminated) child
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the child was killed by a signal
    pub exit_code: Option<i32>,
    /// The wait limit expired and the child was terminated
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Handle to a launched child
pub trait RunningProcess: Send {
    /// OS process id
    fn id(&self) -> u32;

    /// Block until the child exits, or until `timeout` expires, in which case
    /// the child is terminated and the output is flagged `timed_out`.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<ProcessOutput>;

    /// Ask the child to stop, killing it if it does not exit promptly
    fn terminate(&mut self);
}

/// Launches child processes
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, command: &CommandSpec) -> io::Result<Box<dyn RunningProcess>>;

    /// Launch and wait in one step
    fn run(&self, command: &CommandSpec, timeout: Option<Duration>) -> io::Result<ProcessOutput> {
        let mut child = self.spawn(command)?;
        child.wait(timeout)
    }
}

/// [`ProcessRunner`] backed by `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn spawn(&self, command: &CommandSpec) -> io::Result<Box<dyn RunningProcess>> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so grandchildren holding the pipes are signalled too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        tracing::debug!(pid = child.id(), "Spawned `{}`", command.display());

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        Ok(Box::new(SystemChild {
            child,
            stdout,
            stderr,
            finished: false,
        }))
    }
}

struct SystemChild {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    finished: bool,
}

impl RunningProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<ProcessOutput> {
        let start = Instant::now();
        let mut timed_out = false;

        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    tracing::warn!(pid = self.child.id(), "Process exceeded {:?}, terminating", limit);
                    timed_out = true;
                    self.terminate();
                    break self.child.wait()?;
                }
            }
            thread::sleep(POLL_INTERVAL);
        };
        self.finished = true;
        self.release_pipes(timeout.map(|limit| start + limit));

        Ok(ProcessOutput {
            stdout: join_reader(self.stdout.take()),
            stderr: join_reader(self.stderr.take()),
            exit_code: status.code(),
            timed_out,
        })
    }

    fn terminate(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        signal_group(self.child.id(), Termination::Graceful);
        let start = Instant::now();
        while start.elapsed() < TERMINATE_GRACE {
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }

        signal_group(self.child.id(), Termination::Forced);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl SystemChild {
    /// Kill whatever is left in the process group once the child has exited
    /// but descendants still hold its output pipes open.
    fn release_pipes(&self, deadline: Option<Instant>) {
        let grace_end = Instant::now() + DRAIN_GRACE;
        let until = deadline.map_or(grace_end, |d| d.min(grace_end));
        while !self.readers_done() && Instant::now() < until {
            thread::sleep(POLL_INTERVAL);
        }
        if !self.readers_done() {
            tracing::warn!(
                pid = self.child.id(),
                "Process left descendants holding its output, killing process group"
            );
            signal_group(self.child.id(), Termination::Forced);
        }
    }

    fn readers_done(&self) -> bool {
        [&self.stdout, &self.stderr]
            .into_iter()
            .all(|reader| reader.as_ref().is_none_or(JoinHandle::is_finished))
    }
}

impl Drop for SystemChild {
    fn drop(&mut self) {
        if !self.finished {
            signal_group(self.child.id(), Termination::Forced);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forced,
}

#[cfg(unix)]
fn signal_group(pid: u32, how: Termination) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let signal = match how {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::debug!(pid, "{:?} to process group failed: {}", signal, e);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _how: Termination) {}

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_captures_stdout_stderr_and_exit_code() {
        let output = SystemProcessRunner
            .run(&sh("echo out; echo err >&2; exit 3"), None)
            .unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn test_success() {
        let output = SystemProcessRunner.run(&sh("true"), None).unwrap();
        assert!(output.success());
    }

    #[test]
    fn test_env_is_passed() {
        let output = SystemProcessRunner
            .run(&sh("printf %s \"$REPLAY_TEST_VAR\"").env("REPLAY_TEST_VAR", "hello"), None)
            .unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn test_timeout_terminates_child() {
        let start = Instant::now();
        let output = SystemProcessRunner
            .run(&sh("sleep 30"), Some(Duration::from_millis(200)))
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_descendants_do_not_hold_wait() {
        for timeout in [Some(Duration::from_secs(10)), None] {
            let start = Instant::now();
            let output = SystemProcessRunner
                .run(&sh("sleep 30 & echo done; exit 0"), timeout)
                .unwrap();
            assert!(start.elapsed() < Duration::from_secs(5), "{:?}", start.elapsed());
            assert_eq!(output.stdout, "done\n");
            assert!(output.success());
            assert!(!output.timed_out);
        }
    }

    #[test]
    fn test_timeout_bounds_background_descendants() {
        let start = Instant::now();
        let output = SystemProcessRunner
            .run(&sh("sleep 30 & sleep 30"), Some(Duration::from_millis(300)))
            .unwrap();
        assert!(output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let result = SystemProcessRunner.spawn(&CommandSpec::new("/nonexistent/web-replay-binary"));
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        let cmd = CommandSpec::new("python3").arg("a.py");
        assert_eq!(cmd.display(), "python3 a.py");
    }
}
