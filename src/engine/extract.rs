//! Data extraction from captured response bodies: regexes and external commands.

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use regex::bytes::Regex;
use std::io::{ErrorKind, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::tools::{join_command, split_command};
use crate::error::PipelineError;
use crate::utils::config::Defaults;

const EXIT_POLL: Duration = Duration::from_millis(5);

/// Compile every pattern; the first failure names the offending pattern.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PipelineError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| PipelineError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// What one body yielded. `errors` carries one note per failed command.
#[derive(Debug, Default, PartialEq)]
pub struct Extraction {
    pub values: Vec<String>,
    pub errors: Vec<String>,
}

/// Compiled extraction configuration, shared read-only by the workers.
#[derive(Clone, Debug, Default)]
pub struct Extractor {
    regexes: Vec<Regex>,
    commands: Vec<Vec<String>>,
    timeout: Option<Duration>,
}

impl Extractor {
    pub fn compile(patterns: &[String], commands: &[String]) -> Result<Self, PipelineError> {
        Ok(Self {
            regexes: compile_patterns(patterns)?,
            commands: commands
                .iter()
                .map(|c| split_command(c))
                .collect::<Result<_, _>>()?,
            timeout: None,
        })
    }

    /// Kill a command still running after `timeout`. Defaults to the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty() && self.commands.is_empty()
    }

    /// Every match of every regex (in pattern order), then one slot per command.
    pub fn run(&self, body: &[u8]) -> Extraction {
        let mut out = Extraction::default();
        for re in &self.regexes {
            out.values.extend(
                re.find_iter(body)
                    .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()),
            );
        }
        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(Defaults::REQUEST_TIMEOUT_SECS));
        for argv in &self.commands {
            match run_command(argv, body, timeout) {
                Ok(s) => out.values.push(s),
                Err(note) => {
                    out.values.push(String::new());
                    out.errors.push(note);
                }
            }
        }
        out
    }
}

/// Feed `body` to `argv` on stdin and return its trimmed stdout.
///
/// The body is written and stdout is read from helper threads, so a command that prints
/// before reading all of its input cannot deadlock against us. A command still running at
/// the deadline is killed. A non-zero exit, a spawn failure, a timeout or a broken pipe on
/// stdin all come back as a note for the record.
fn run_command(argv: &[String], body: &[u8], timeout: Duration) -> Result<String, String> {
    let display = join_command(argv);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| format!("empty extract command {display:?}"))?;
    // `None` when the timeout is too large to represent: wait without a deadline.
    let deadline = Instant::now().checked_add(timeout);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("run `{display}`: {e}"))?;

    // Helper threads report through channels so every wait below has the same deadline.
    // A helper still blocked when we give up is left to finish on its own.
    let (write_tx, write_rx) = bounded(1);
    if let Some(mut stdin) = child.stdin.take() {
        let body = body.to_vec();
        thread::spawn(move || {
            let _ = write_tx.send(stdin.write_all(&body));
        });
    }
    let (read_tx, read_rx) = bounded(1);
    if let Some(mut stdout) = child.stdout.take() {
        thread::spawn(move || {
            let mut out = Vec::new();
            let _ = read_tx.send(stdout.read_to_end(&mut out).map(|_| out));
        });
    }

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("`{display}` timed out after {timeout:?}"));
            }
            Ok(None) => thread::sleep(EXIT_POLL),
            Err(e) => return Err(format!("wait for `{display}`: {e}")),
        }
    };

    match recv_until(&write_rx, deadline) {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
            return Err(format!("`{display}` closed stdin early (broken pipe)"));
        }
        Ok(Err(e)) => return Err(format!("write body to `{display}`: {e}")),
        Err(RecvTimeoutError::Timeout) => {
            return Err(format!("`{display}` timed out after {timeout:?}"));
        }
        // No stdin handle, or the writer thread died.
        Err(RecvTimeoutError::Disconnected) => {
            return Err(format!("stdin writer for `{display}` panicked"));
        }
    }

    if !status.success() {
        return Err(format!("`{display}` failed: {status}"));
    }
    match recv_until(&read_rx, deadline) {
        Ok(Ok(out)) => Ok(String::from_utf8_lossy(&out).trim().to_string()),
        Ok(Err(e)) => Err(format!("read output of `{display}`: {e}")),
        Err(RecvTimeoutError::Timeout) => Err(format!("`{display}` timed out after {timeout:?}")),
        Err(RecvTimeoutError::Disconnected) => {
            Err(format!("stdout reader for `{display}` panicked"))
        }
    }
}

fn recv_until<T>(rx: &Receiver<T>, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
    match deadline {
        Some(d) => rx.recv_deadline(d),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}
