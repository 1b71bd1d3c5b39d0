//! Injected logger context.
//!
//! Replaces a global mutable `logFile`/`verboseMode` pair with a small value
//! passed to each component. Progress lines go to stdout, warnings to
//! stderr; `--verbose` gates extra detail. Tests construct a `Logger` with
//! `capturing()` and assert against the captured lines instead of stdout.

use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Logger {
    verbose: bool,
    sink: Option<Arc<Mutex<Vec<String>>>>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose, sink: None }
    }

    /// A logger that records lines in memory instead of printing them.
    pub fn capturing(verbose: bool) -> (Self, Arc<Mutex<Vec<String>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                verbose,
                sink: Some(buf.clone()),
            },
            buf,
        )
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    fn emit(&self, line: String) {
        if let Some(sink) = &self.sink {
            sink.lock().unwrap().push(line);
        } else {
            println!("{line}");
        }
    }

    fn emit_err(&self, line: String) {
        if let Some(sink) = &self.sink {
            sink.lock().unwrap().push(line);
        } else {
            eprintln!("{line}");
        }
    }

    /// Always-on progress line.
    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit(msg.as_ref().to_string());
    }

    /// Only printed under `--verbose`.
    pub fn debug(&self, msg: impl AsRef<str>) {
        if self.verbose {
            self.emit(format!("[debug] {}", msg.as_ref()));
        }
    }

    /// Non-fatal warning.
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit_err(format!("warning: {}", msg.as_ref()));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}
