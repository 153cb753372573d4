//! Pipeline context: cancellation, first-error slot, count side-channel and stage threads.
//!
//! Every blocking channel operation in the pipeline goes through [`send_or_cancel`],
//! [`recv_or_cancel`] or [`sleep_or_cancel`], which race the operation against the run's
//! [`CancelToken`] with `crossbeam_channel::select!`.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shared cancellation signal for one run.
///
/// Cancelling drops the only sender of an internal channel, so every `recv` on
/// [`CancelToken::signal`] becomes ready at once, which is what lets it sit in a `select!`.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                signal: rx,
            }),
        }
    }

    /// Raise the signal. Idempotent; safe from any thread, including a signal handler thread.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            let sender = match self.inner.trigger.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            drop(sender);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Becomes ready (with `Err`) once cancelled. For use inside `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a send that raced cancellation.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Every receiver is gone.
    Closed,
    Cancelled,
}

pub fn send_or_cancel<T>(tx: &Sender<T>, msg: T, cancel: &CancelToken) -> Delivery {
    if cancel.is_cancelled() {
        return Delivery::Cancelled;
    }
    select! {
        send(tx, msg) -> res => match res {
            Ok(()) => Delivery::Sent,
            // A receiver dropped because of cancellation is reported as cancellation.
            Err(_) if cancel.is_cancelled() => Delivery::Cancelled,
            Err(_) => Delivery::Closed,
        },
        recv(cancel.signal()) -> _ => Delivery::Cancelled,
    }
}

/// `None` once the channel is closed and drained, or the run is cancelled.
pub fn recv_or_cancel<T>(rx: &Receiver<T>, cancel: &CancelToken) -> Option<T> {
    if cancel.is_cancelled() {
        return None;
    }
    select! {
        recv(rx) -> msg => msg.ok(),
        recv(cancel.signal()) -> _ => None,
    }
}

/// Sleep until `deadline`. Returns false if cancelled first.
pub fn sleep_or_cancel(deadline: Instant, cancel: &CancelToken) -> bool {
    let wait = deadline.saturating_duration_since(Instant::now());
    if wait.is_zero() {
        return !cancel.is_cancelled();
    }
    select! {
        recv(crossbeam_channel::after(wait)) -> _ => !cancel.is_cancelled(),
        recv(cancel.signal()) -> _ => false,
    }
}

/// First fatal error of the run. Later errors are logged at debug and dropped.
#[derive(Clone, Default)]
pub struct FirstError {
    slot: Arc<Mutex<Option<anyhow::Error>>>,
}

impl FirstError {
    pub fn record(&self, stage: &str, err: anyhow::Error) {
        let mut guard = match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            error!("{} stage failed: {:#}", stage, err);
            *guard = Some(err);
        } else {
            debug!("{} stage failed after the first error: {:#}", stage, err);
        }
    }

    pub fn take(&self) -> Option<anyhow::Error> {
        match self.slot.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Sender side of a count channel that coalesces.
///
/// Counts are cumulative, so only the latest one matters: [`CountSender::update`] never
/// blocks and keeps whatever did not fit; [`CountSender::finish`] delivers that last value.
pub struct CountSender {
    tx: Sender<usize>,
    pending: Option<usize>,
    last_sent: Option<usize>,
}

impl CountSender {
    pub fn new(tx: Sender<usize>) -> Self {
        Self {
            tx,
            pending: None,
            last_sent: None,
        }
    }

    pub fn update(&mut self, count: usize) {
        match self.tx.try_send(count) {
            Ok(()) => {
                self.pending = None;
                self.last_sent = Some(count);
            }
            Err(TrySendError::Full(n)) => self.pending = Some(n),
            Err(TrySendError::Disconnected(_)) => self.pending = None,
        }
    }

    /// Block (racing cancellation) until the latest count is delivered, then close.
    pub fn finish(mut self, cancel: &CancelToken) {
        if let Some(n) = self.pending.take()
            && self.last_sent != Some(n)
        {
            let _ = send_or_cancel(&self.tx, n, cancel);
        }
    }
}

/// A spawned stage thread.
pub struct StageHandle {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
    /// Blocked in I/O that cancellation cannot interrupt (reading stdin). Not joined
    /// after cancellation if it has not finished on its own.
    pub uninterruptible: bool,
}

/// Spawn a named stage thread. An `Err` from `f` goes to `first_error` (kept if it is the
/// first) and cancels the run before the thread exits.
pub fn spawn_stage<F>(
    name: &'static str,
    cancel: &CancelToken,
    first_error: &FirstError,
    f: F,
) -> Result<StageHandle>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let cancel = cancel.clone();
    let first_error = first_error.clone();
    let handle = thread::Builder::new()
        .name(format!("{}-{}", env!("CARGO_PKG_NAME"), name))
        .spawn(move || {
            debug!("{} stage started", name);
            if let Err(e) = f() {
                first_error.record(name, e);
                cancel.cancel();
            }
            debug!("{} stage closed", name);
        })?;
    Ok(StageHandle {
        name,
        handle,
        uninterruptible: false,
    })
}

/// How long a stage blocked in uninterruptible I/O gets after cancellation before it is left behind.
pub const DETACH_GRACE: Duration = Duration::from_millis(200);
