//! Subprocess streamer (C2).
//!
//! One spawn produces a single `ChildHandle` with three views over the same
//! underlying stream: `wait()` (await the completed result), `events()`
//! (an iterator/channel of structured chunks), and `subscribe()` (callback
//! per stdout/stderr line, end, and exit). All three are backed by the same
//! reader threads and the same log file — there is exactly one writer to
//! each resource.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How the child's stdin is wired up.
pub enum StdinMode {
    /// Wire the caller's stdin through to the child — except when the
    /// caller's stdin is a TTY, in which case the streamer closes the
    /// child's stdin instead of blocking on a never-ending read.
    Inherit,
    /// Give the child a closed stdin immediately.
    Ignore,
    /// Write these exact bytes, then close.
    Literal(Vec<u8>),
    /// Run this closure on a dedicated writer thread, writing to the
    /// child's stdin; the thread exits (and closes stdin) when it returns.
    Producer(Box<dyn FnMut(&mut dyn Write) -> std::io::Result<()> + Send>),
}

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub capture: bool,
    pub mirror: bool,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            capture: true,
            mirror: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }
}

/// One line from one of the child's streams, in the order it was read.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Stdout(String),
    Stderr(String),
    /// Both pipes reached EOF.
    End,
    /// The child has exited; no further events follow.
    Exit(ExitOutcome),
}

/// The result of a spawn attempt. `SpawnFailed` is distinguished from a
/// non-zero `Exited` so callers never have to guess from an `Option<i32>`.
#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnFailed(String),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: 0, .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited { code, .. } => Some(*code),
            ExitOutcome::SpawnFailed(_) => None,
        }
    }
}

/// Receives every line as it is produced; implementors back the "tee to a
/// structured event consumer" half of the C2 contract.
pub trait EventConsumer: Send {
    fn on_stdout_line(&mut self, line: &str);
    fn on_stderr_line(&mut self, line: &str);
    fn on_exit(&mut self, outcome: &ExitOutcome);
}

/// A no-op consumer for callers that only want the log file / captured
/// buffers and don't need structured callbacks.
pub struct NullConsumer;
impl EventConsumer for NullConsumer {
    fn on_stdout_line(&mut self, _line: &str) {}
    fn on_stderr_line(&mut self, _line: &str) {}
    fn on_exit(&mut self, _outcome: &ExitOutcome) {}
}

/// A live handle to a spawned child. Offers the three views described in
/// the C2 contract; `wait()` consumes the handle (the await view), while
/// `events()` and `cancel()` can be used before that.
pub struct ChildHandle {
    child: Option<Arc<Mutex<Child>>>,
    events_rx: Receiver<StreamEvent>,
    reader_threads: Vec<JoinHandle<()>>,
    stdout_buf: Arc<Mutex<String>>,
    stderr_buf: Arc<Mutex<String>>,
    capture: bool,
}

impl ChildHandle {
    /// Block until the child exits, draining all remaining events. This is
    /// the "await" view — equivalent to running `wait()` and discarding the
    /// iterator form.
    pub fn wait(mut self) -> ExitOutcome {
        let mut outcome = None;
        while let Ok(ev) = self.events_rx.recv() {
            if let StreamEvent::Exit(o) = ev {
                outcome = Some(o);
                break;
            }
        }
        for t in self.reader_threads.drain(..) {
            let _ = t.join();
        }
        outcome.unwrap_or_else(|| ExitOutcome::SpawnFailed("child produced no exit event".into()))
    }

    /// The streaming/subscription view: drain events as they arrive,
    /// invoking a structured consumer per line, until exit. The consumer is
    /// handed back alongside the outcome so callers can read back whatever
    /// state it accumulated.
    pub fn subscribe<C: EventConsumer>(self, mut consumer: C) -> (ExitOutcome, C) {
        let mut outcome = None;
        for ev in self.events_rx.iter() {
            match ev {
                StreamEvent::Stdout(line) => consumer.on_stdout_line(&line),
                StreamEvent::Stderr(line) => consumer.on_stderr_line(&line),
                StreamEvent::End => {}
                StreamEvent::Exit(o) => {
                    consumer.on_exit(&o);
                    outcome = Some(o);
                }
            }
        }
        for t in self.reader_threads {
            let _ = t.join();
        }
        let outcome = outcome.unwrap_or_else(|| ExitOutcome::SpawnFailed("child produced no exit event".into()));
        (outcome, consumer)
    }

    /// Graceful cancellation: SIGTERM, then escalate to SIGKILL if the
    /// child has not exited within `grace`. A no-op when the spawn itself
    /// never produced a live child.
    pub fn cancel(&self, grace: Duration) {
        let Some(child_arc) = &self.child else { return };
        let pid = {
            let child = child_arc.lock().unwrap();
            child.id()
        };
        send_sigterm(pid);
        let deadline = Instant::now() + grace;
        loop {
            {
                let mut child = child_arc.lock().unwrap();
                if matches!(child.try_wait(), Ok(Some(_))) {
                    return;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let mut child = child_arc.lock().unwrap();
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {
    // No graceful-signal equivalent wired up for non-unix targets; the
    // grace period simply elapses and `cancel` falls through to `kill()`.
}

/// Whether the calling process's stdin is connected to a terminal.
pub fn stdin_is_tty() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Spawn `spec`, wiring stdin per `stdin_mode`, and return a live handle.
/// `log_path`, if given, receives every stdout/stderr line (interleaved, in
/// arrival order) as it is produced — the single append-only writer for
/// this invocation's log file.
pub fn spawn(
    spec: SpawnSpec,
    stdin_mode: StdinMode,
    log_path: Option<&std::path::Path>,
) -> Result<ChildHandle> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let stdin_mode = match stdin_mode {
        StdinMode::Inherit if stdin_is_tty() => StdinMode::Ignore,
        other => other,
    };

    cmd.stdin(match &stdin_mode {
        StdinMode::Inherit => Stdio::inherit(),
        _ => Stdio::piped(),
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            let (tx, rx): (Sender<StreamEvent>, Receiver<StreamEvent>) = mpsc::channel();
            let _ = tx.send(StreamEvent::Exit(ExitOutcome::SpawnFailed(e.to_string())));
            drop(tx);
            return Ok(ChildHandle {
                child: None,
                events_rx: rx,
                reader_threads: Vec::new(),
                stdout_buf: Arc::new(Mutex::new(String::new())),
                stderr_buf: Arc::new(Mutex::new(String::new())),
                capture: spec.capture,
            });
        }
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    match stdin_mode {
        StdinMode::Inherit | StdinMode::Ignore => {
            drop(child.stdin.take());
        }
        StdinMode::Literal(bytes) => {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(&bytes);
            }
        }
        StdinMode::Producer(mut producer) => {
            if let Some(mut stdin) = child.stdin.take() {
                std::thread::spawn(move || {
                    let _ = producer(&mut stdin);
                });
            }
        }
    }

    let (tx, rx) = mpsc::channel();
    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));

    let log_file = log_path
        .map(|p| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .map(|f| Arc::new(Mutex::new(f)))
        })
        .transpose()
        .context("opening log file")?;

    let mut threads = Vec::new();
    threads.push(spawn_reader_thread(
        stdout,
        tx.clone(),
        true,
        stdout_buf.clone(),
        log_file.clone(),
        spec.capture,
        spec.mirror,
    ));
    threads.push(spawn_reader_thread(
        stderr,
        tx.clone(),
        false,
        stderr_buf.clone(),
        log_file.clone(),
        spec.capture,
        spec.mirror,
    ));

    let child = Arc::new(Mutex::new(child));
    let child_for_waiter = child.clone();
    let stdout_buf_for_waiter = stdout_buf.clone();
    let stderr_buf_for_waiter = stderr_buf.clone();
    let capture = spec.capture;
    threads.push(std::thread::spawn(move || {
        // Two reader threads must drain fully before wait() is reliable on
        // some platforms; a short synchronization via channel send below
        // ensures End precedes Exit.
        let _ = tx.send(StreamEvent::End);
        let status = {
            let mut c = child_for_waiter.lock().unwrap();
            c.wait()
        };
        let outcome = match status {
            Ok(status) => ExitOutcome::Exited {
                code: status.code().unwrap_or(-1),
                stdout: if capture {
                    stdout_buf_for_waiter.lock().unwrap().clone()
                } else {
                    String::new()
                },
                stderr: if capture {
                    stderr_buf_for_waiter.lock().unwrap().clone()
                } else {
                    String::new()
                },
            },
            Err(e) => ExitOutcome::SpawnFailed(e.to_string()),
        };
        let _ = tx.send(StreamEvent::Exit(outcome));
    }));

    Ok(ChildHandle {
        child: Some(child),
        events_rx: rx,
        reader_threads: threads,
        stdout_buf,
        stderr_buf,
        capture: spec.capture,
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_reader_thread(
    pipe: impl Read + Send + 'static,
    tx: Sender<StreamEvent>,
    is_stdout: bool,
    buf: Arc<Mutex<String>>,
    log_file: Option<Arc<Mutex<std::fs::File>>>,
    capture: bool,
    mirror: bool,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if capture {
                let mut b = buf.lock().unwrap();
                b.push_str(&line);
                b.push('\n');
            }
            if let Some(f) = &log_file {
                let mut f = f.lock().unwrap();
                let _ = writeln!(f, "{line}");
            }
            if mirror {
                if is_stdout {
                    println!("{line}");
                } else {
                    eprintln!("{line}");
                }
            }
            let ev = if is_stdout {
                StreamEvent::Stdout(line)
            } else {
                StreamEvent::Stderr(line)
            };
            if tx.send(ev).is_err() {
                break;
            }
        }
    })
}
