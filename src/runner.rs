//! Subprocess launcher with structured options, streamed stdout, and
//! line-logged stderr.
//!
//! A [`CommandRunner`] is configured once per external program (here: `git`
//! and `diff`) and invoked many times. Stdout is either streamed through a
//! [`RecordStream`] to a caller-side handler or copied into a writer; stderr
//! is drained on its own thread and logged line-by-line under a banner.
//!
//! Timeouts fail the invocation but deliberately do NOT kill the child: the
//! drain threads stay attached until the child exits on its own, so a slow
//! `git push` keeps running after the caller has given up waiting on it.

pub mod options;

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use thiserror::Error;
use tracing::{debug, error};

pub use options::{OptStyle, Options};

use crate::stream::{Encoding, RecordStream, Separator, StopToken};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {desc}: {source}")]
    SpawningFailure {
        desc: String,
        #[source]
        source: io::Error,
    },
    #[error("{desc} exited with code {exit_code}")]
    ChildProcessFailure { desc: String, exit_code: i32 },
    #[error("{desc} timed out after {timeout:?} (argv {argv:?}, env from {env_source})")]
    Timeout {
        desc: String,
        argv: Vec<String>,
        env_source: &'static str,
        timeout: Duration,
    },
    #[error("stdout consumer failed for {desc}: {source}")]
    BadOutputStream {
        desc: String,
        #[source]
        source: io::Error,
    },
    #[error("option name {name:?} may not contain '='")]
    BadOptionsKey { name: String },
}

/// Observation points around a spawn. Implementations must not block.
pub trait Tracer: Send + Sync {
    /// Called just before the child is spawned.
    fn execute(&self, _program: &str, _argv: &[String]) {}
    /// Called synchronously after a successful spawn.
    fn executing(&self, _program: &str, _argv: &[String], _pid: u32) {}
}

/// Where the runner takes its `PATH` from when one is configured.
#[derive(Clone)]
pub enum PathSpec {
    Fixed(String),
    /// Resolved at each invocation.
    Thunk(Arc<dyn Fn() -> String + Send + Sync>),
}

impl PathSpec {
    fn resolve(&self) -> String {
        match self {
            PathSpec::Fixed(path) => path.clone(),
            PathSpec::Thunk(thunk) => thunk(),
        }
    }
}

impl std::fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSpec::Fixed(path) => f.debug_tuple("Fixed").field(path).finish(),
            PathSpec::Thunk(_) => f.debug_tuple("Thunk").finish(),
        }
    }
}

/// Per-program configuration for a [`CommandRunner`].
#[derive(Clone)]
pub struct RunnerOptions {
    pub program: String,
    /// Used in logs and error messages; defaults to the program name.
    pub description: Option<String>,
    /// Overrides `PATH` for the child; wins over any env-provided `PATH`.
    pub path: Option<PathSpec>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Whether invocations name a subcommand (`git ls-tree ...`).
    pub uses_subcommands: bool,
    pub opt_style: OptStyle,
    pub timeout: Option<Duration>,
    pub output_encoding: Encoding,
    pub tracer: Option<Arc<dyn Tracer>>,
}

impl RunnerOptions {
    pub fn new(program: impl Into<String>) -> Self {
        RunnerOptions {
            program: program.into(),
            description: None,
            path: None,
            cwd: None,
            env: HashMap::new(),
            uses_subcommands: false,
            opt_style: OptStyle::GnuOpt,
            timeout: None,
            output_encoding: Encoding::Utf8,
            tracer: None,
        }
    }
}

type StdinFeed = Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>;
type RecordHandler<'a> = Box<dyn FnMut(&str, &StopToken) + 'a>;

/// Where captured stdout goes. Record handlers run on the invoking thread,
/// so they may freely borrow caller state; writer sinks run on a drain
/// thread and must be `Send + 'static`.
pub enum StdoutSink<'a> {
    Records {
        separator: Separator,
        handler: RecordHandler<'a>,
    },
    Writer(Box<dyn Write + Send + 'static>),
}

/// One subprocess invocation, built up then passed to [`CommandRunner::run`].
pub struct Invocation<'a> {
    subcommand: Option<String>,
    options: Options,
    args: Vec<String>,
    stdout: Option<StdoutSink<'a>>,
    stdin: Option<StdinFeed>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl<'a> Invocation<'a> {
    pub fn new() -> Self {
        Invocation {
            subcommand: None,
            options: Options::new(),
            args: Vec::new(),
            stdout: None,
            stdin: None,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        self.subcommand = Some(name.into());
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator>(mut self, args: I) -> Self
    where
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Stream stdout as records split by `separator`; the handler runs on
    /// the invoking thread and may stop the stream early.
    pub fn stdout_records(
        mut self,
        separator: Separator,
        handler: impl FnMut(&str, &StopToken) + 'a,
    ) -> Self {
        self.stdout = Some(StdoutSink::Records {
            separator,
            handler: Box::new(handler),
        });
        self
    }

    /// Copy stdout bytes into a writer.
    pub fn stdout_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.stdout = Some(StdoutSink::Writer(Box::new(writer)));
        self
    }

    /// Feed the child's stdin, exactly once, then close it.
    pub fn feed_stdin(
        mut self,
        feed: impl FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    ) -> Self {
        self.stdin = Some(Box::new(feed));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl Default for Invocation<'_> {
    fn default() -> Self {
        Invocation::new()
    }
}

/// A reusable launcher for one external program.
pub struct CommandRunner {
    opts: RunnerOptions,
}

impl CommandRunner {
    pub fn new(opts: RunnerOptions) -> Self {
        CommandRunner { opts }
    }

    pub fn program(&self) -> &str {
        &self.opts.program
    }

    fn base_description(&self) -> &str {
        self.opts.description.as_deref().unwrap_or(&self.opts.program)
    }

    /// Run the invocation; non-zero exit is a [`RunError::ChildProcessFailure`].
    pub fn run(&self, invocation: Invocation<'_>) -> Result<(), RunError> {
        let desc = self.describe(&invocation);
        self.run_with_exit(invocation, |exit_code| {
            if exit_code == 0 {
                Ok(())
            } else {
                Err(RunError::ChildProcessFailure { desc, exit_code })
            }
        })
    }

    fn describe(&self, invocation: &Invocation<'_>) -> String {
        match &invocation.subcommand {
            Some(sub) => format!("{} {sub}", self.base_description()),
            None => self.base_description().to_owned(),
        }
    }

    /// Run the invocation and map the exit code through `exit`, which is
    /// called for every exit code including non-zero ones.
    pub fn run_with_exit<T>(
        &self,
        invocation: Invocation<'_>,
        exit: impl FnOnce(i32) -> Result<T, RunError>,
    ) -> Result<T, RunError> {
        let desc = self.describe(&invocation);
        let deadline = self.opts.timeout.map(|t| Instant::now() + t);

        let mut argv = Vec::new();
        if self.opts.uses_subcommands
            && let Some(sub) = &invocation.subcommand
        {
            argv.push(sub.clone());
        }
        argv.extend(invocation.options.render(self.opts.opt_style)?);
        argv.extend(invocation.args.iter().cloned());

        let env_source = if !invocation.env.is_empty() {
            "invocation"
        } else if !self.opts.env.is_empty() {
            "runner"
        } else {
            "process"
        };

        let mut cmd = Command::new(&self.opts.program);
        cmd.args(&argv);
        cmd.envs(&self.opts.env);
        cmd.envs(&invocation.env);
        if let Some(path) = &self.opts.path {
            cmd.env("PATH", path.resolve());
        }
        match (&self.opts.cwd, &invocation.cwd) {
            (Some(base), Some(sub)) => {
                cmd.current_dir(base.join(sub));
            }
            (Some(base), None) => {
                cmd.current_dir(base);
            }
            (None, Some(sub)) => {
                cmd.current_dir(sub);
            }
            (None, None) => {}
        }
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(if invocation.stdout.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(Stdio::piped());

        if let Some(tracer) = &self.opts.tracer {
            tracer.execute(&self.opts.program, &argv);
        }
        let mut child = cmd.spawn().map_err(|source| RunError::SpawningFailure {
            desc: desc.clone(),
            source,
        })?;
        if let Some(tracer) = &self.opts.tracer {
            tracer.executing(&self.opts.program, &argv, child.id());
        }

        let stderr = child.stderr.take().expect("stderr was requested piped");
        let stderr_thread = drain_stderr(desc.clone(), stderr);

        if let Some(feed) = invocation.stdin {
            let mut sink = child.stdin.take().expect("stdin was requested piped");
            let stdin_desc = desc.clone();
            thread::Builder::new()
                .name(format!("{desc} stdin"))
                .spawn(move || {
                    if let Err(err) = feed(&mut sink) {
                        // Broken pipes are routine when the child exits early.
                        debug!("stdin feed for {stdin_desc} ended: {err}");
                    }
                })
                .expect("spawn stdin thread");
        }

        let stdout_handle = invocation
            .stdout
            .as_ref()
            .map(|_| child.stdout.take().expect("stdout was requested piped"));
        // Reap the child in the background before consuming stdout, so a
        // timed-out invocation never leaves a zombie behind.
        let exit_rx = wait_in_background(child);

        // The invocation resolves only once the process has exited AND, when
        // stdout is captured, its consumer has fully closed.
        match invocation.stdout {
            None => {}
            Some(StdoutSink::Records { separator, handler }) => {
                let chunks = read_chunks(stdout_handle.expect("stdout handle present"));
                let mut stream = RecordStream::new(separator, self.opts.output_encoding, handler);
                loop {
                    match recv_until(&chunks, deadline) {
                        Ok(Some(chunk)) => stream.push(&chunk),
                        Ok(None) => break,
                        Err(()) => return Err(self.timeout_error(desc, argv, env_source)),
                    }
                }
                stream.flush();
            }
            Some(StdoutSink::Writer(mut writer)) => {
                let stdout = stdout_handle.expect("stdout handle present");
                let (done_tx, done_rx) = channel::bounded(1);
                thread::Builder::new()
                    .name(format!("{desc} stdout"))
                    .spawn(move || {
                        let mut reader = stdout;
                        let result = io::copy(&mut reader, &mut writer).map(drop);
                        let _ = done_tx.send(result);
                    })
                    .expect("spawn stdout thread");
                match recv_until(&done_rx, deadline) {
                    Ok(Some(Ok(()))) | Ok(None) => {}
                    Ok(Some(Err(source))) => {
                        return Err(RunError::BadOutputStream { desc, source });
                    }
                    Err(()) => return Err(self.timeout_error(desc, argv, env_source)),
                }
            }
        }

        let status = match recv_until(&exit_rx, deadline) {
            Ok(Some(Ok(status))) => status,
            Ok(Some(Err(source))) => return Err(RunError::SpawningFailure { desc, source }),
            Ok(None) => {
                return Err(RunError::SpawningFailure {
                    desc,
                    source: io::Error::other("child wait channel closed unexpectedly"),
                });
            }
            Err(()) => return Err(self.timeout_error(desc, argv, env_source)),
        };
        // Stderr hits EOF once the child is gone; join so its lines are
        // logged before the caller observes the result.
        let _ = stderr_thread.join();

        exit(status.code().unwrap_or(-1))
    }

    fn timeout_error(&self, desc: String, argv: Vec<String>, env_source: &'static str) -> RunError {
        RunError::Timeout {
            desc,
            argv,
            env_source,
            timeout: self.opts.timeout.unwrap_or_default(),
        }
    }
}

/// Receive from `rx` honoring an optional deadline. `Ok(None)` means the
/// sender is gone (EOF); `Err(())` means the deadline passed.
fn recv_until<T>(rx: &Receiver<T>, deadline: Option<Instant>) -> Result<Option<T>, ()> {
    match deadline {
        None => Ok(rx.recv().ok()),
        Some(deadline) => match rx.recv_deadline(deadline) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(()),
        },
    }
}

/// Ship stdout bytes to the invoking thread in raw chunks.
fn read_chunks(stdout: impl Read + Send + 'static) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new()
        .name("stdout chunks".to_owned())
        .spawn(move || {
            let mut reader = stdout;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .expect("spawn stdout chunk thread");
    rx
}

/// Reap the child on a background thread so waits can be given a deadline.
fn wait_in_background(mut child: Child) -> Receiver<io::Result<std::process::ExitStatus>> {
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new()
        .name("child wait".to_owned())
        .spawn(move || {
            let _ = tx.send(child.wait());
        })
        .expect("spawn wait thread");
    rx
}

/// Drain stderr line-by-line into the error log, under a banner naming the
/// program. Lines keep their text but lose the terminating newline.
fn drain_stderr(desc: String, stderr: impl Read + Send + 'static) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("{desc} stderr"))
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            let mut bannered = false;
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if !bannered {
                            error!("----- {desc} -----");
                            bannered = true;
                        }
                        error!("    {}", line.trim_end_matches(['\r', '\n']));
                    }
                }
            }
        })
        .expect("spawn stderr thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sh(timeout: Option<Duration>) -> CommandRunner {
        let mut opts = RunnerOptions::new("sh");
        opts.timeout = timeout;
        CommandRunner::new(opts)
    }

    #[test]
    fn captures_stdout_records() {
        let mut lines = Vec::new();
        let runner = sh(None);
        runner
            .run(
                Invocation::new()
                    .arg("-c")
                    .arg("printf 'one\\ntwo\\nthree'")
                    .stdout_records(Separator::newline(), |record, _stop| {
                        lines.push(record.to_owned());
                    }),
            )
            .unwrap();
        assert_eq!(lines, ["one", "two", "three"]);
    }

    #[test]
    fn nonzero_exit_fails_without_exit_handler() {
        let runner = sh(None);
        let err = runner
            .run(Invocation::new().arg("-c").arg("exit 3"))
            .unwrap_err();
        assert!(matches!(err, RunError::ChildProcessFailure { exit_code: 3, .. }));
    }

    #[test]
    fn exit_handler_sees_every_code() {
        let runner = sh(None);
        let code = runner
            .run_with_exit(Invocation::new().arg("-c").arg("exit 3"), Ok)
            .unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn stdin_feed_reaches_child() {
        let mut out = Vec::new();
        let runner = sh(None);
        runner
            .run(
                Invocation::new()
                    .arg("-c")
                    .arg("cat")
                    .feed_stdin(|sink| sink.write_all(b"fed through stdin"))
                    .stdout_records(Separator::newline(), |record, _stop| {
                        out.push(record.to_owned());
                    }),
            )
            .unwrap();
        assert_eq!(out, ["fed through stdin"]);
    }

    #[test]
    fn spawn_failure_reports_program() {
        let runner = CommandRunner::new(RunnerOptions::new("definitely-not-a-real-binary"));
        let err = runner.run(Invocation::new()).unwrap_err();
        assert!(matches!(err, RunError::SpawningFailure { .. }));
    }

    #[test]
    fn timeout_fails_but_does_not_wait_for_child() {
        let runner = sh(Some(Duration::from_millis(80)));
        let started = Instant::now();
        let err = runner
            .run(Invocation::new().arg("-c").arg("sleep 5"))
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn stop_token_halts_record_delivery() {
        let mut seen = Vec::new();
        let runner = sh(None);
        runner
            .run(
                Invocation::new()
                    .arg("-c")
                    .arg("printf 'a\\nb\\nc\\n'")
                    .stdout_records(Separator::newline(), |record, stop| {
                        seen.push(record.to_owned());
                        stop.stop();
                    }),
            )
            .unwrap();
        assert_eq!(seen, ["a"]);
    }

    #[test]
    fn env_precedence_invocation_over_runner() {
        let mut opts = RunnerOptions::new("sh");
        opts.env.insert("CASE_A".into(), "runner".into());
        opts.env.insert("CASE_B".into(), "runner".into());
        let runner = CommandRunner::new(opts);
        let mut lines = Vec::new();
        runner
            .run(
                Invocation::new()
                    .arg("-c")
                    .arg("printf '%s %s' \"$CASE_A\" \"$CASE_B\"")
                    .env("CASE_B", "invocation")
                    .stdout_records(Separator::newline(), |record, _stop| {
                        lines.push(record.to_owned());
                    }),
            )
            .unwrap();
        assert_eq!(lines, ["runner invocation"]);
    }

    #[test]
    fn writer_sink_collects_bytes() {
        use std::sync::Arc;

        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = Shared::default();
        let runner = sh(None);
        runner
            .run(
                Invocation::new()
                    .arg("-c")
                    .arg("printf 'raw bytes'")
                    .stdout_writer(sink.clone()),
            )
            .unwrap();
        assert_eq!(&*sink.0.lock().unwrap(), b"raw bytes");
    }
}
