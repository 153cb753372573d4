//! Position filters over the value stream: Skip drops a prefix, Limit caps the rest.
//!
//! Each filter is one thread that selects over the value and the count stream, so values
//! stay in order and the count it forwards is always the total the reporter should expect.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, never, select};
use log::debug;

use super::context::{CancelToken, CountSender, Delivery, send_or_cancel};

/// What to do with the next value.
#[derive(Debug, PartialEq, Eq)]
pub enum Admit {
    Drop,
    Forward,
    /// Forward it, then close: nothing after this one passes.
    ForwardLast,
}

pub trait Position: Send {
    fn name(&self) -> &'static str;
    fn admit(&mut self) -> Admit;
    /// Effective total for an upstream total of `upstream`.
    fn effective(&self, upstream: usize) -> usize;
}

/// Drop the first `n` values. `n == 0` forwards everything.
#[derive(Debug)]
pub struct Skip {
    n: usize,
    skipped: usize,
}

impl Skip {
    pub fn new(n: usize) -> Self {
        Self { n, skipped: 0 }
    }
}

impl Position for Skip {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn admit(&mut self) -> Admit {
        if self.skipped < self.n {
            self.skipped += 1;
            Admit::Drop
        } else {
            Admit::Forward
        }
    }

    fn effective(&self, upstream: usize) -> usize {
        upstream.saturating_sub(self.n)
    }
}

/// Forward at most `max` values. `max == 0` is unlimited.
#[derive(Debug)]
pub struct Limit {
    max: usize,
    forwarded: usize,
}

impl Limit {
    pub fn new(max: usize) -> Self {
        Self { max, forwarded: 0 }
    }
}

impl Position for Limit {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn admit(&mut self) -> Admit {
        if self.max == 0 {
            return Admit::Forward;
        }
        self.forwarded += 1;
        if self.forwarded >= self.max {
            Admit::ForwardLast
        } else {
            Admit::Forward
        }
    }

    fn effective(&self, upstream: usize) -> usize {
        if self.max == 0 {
            upstream
        } else {
            upstream.min(self.max)
        }
    }
}

/// Run `pos` between upstream and downstream until upstream is exhausted, the filter is
/// done (Limit reached), downstream is gone, or the run is cancelled.
///
/// Returning drops both upstream receivers, which is how an early stop reaches the producer:
/// its next send fails with a closed channel and it winds down.
pub fn run_position_filter<P: Position>(
    mut pos: P,
    values_in: Receiver<String>,
    counts_in: Receiver<usize>,
    values_out: Sender<String>,
    mut counts_out: CountSender,
    cancel: &CancelToken,
) -> Result<()> {
    let closed_values = never();
    let closed_counts = never();
    let (mut values_open, mut counts_open) = (true, true);

    while values_open || counts_open {
        let vrx = if values_open { &values_in } else { &closed_values };
        let crx = if counts_open { &counts_in } else { &closed_counts };
        select! {
            recv(vrx) -> msg => match msg {
                Ok(value) => {
                    let admit = pos.admit();
                    if admit == Admit::Drop {
                        continue;
                    }
                    if send_or_cancel(&values_out, value, cancel) != Delivery::Sent {
                        debug!("{}: downstream stopped", pos.name());
                        break;
                    }
                    if admit == Admit::ForwardLast {
                        debug!("{}: reached, closing upstream", pos.name());
                        // Nothing more passes, whatever upstream still announces.
                        counts_out.update(pos.effective(usize::MAX));
                        break;
                    }
                }
                Err(_) => values_open = false,
            },
            recv(crx) -> msg => match msg {
                Ok(count) => counts_out.update(pos.effective(count)),
                Err(_) => counts_open = false,
            },
            recv(cancel.signal()) -> _ => break,
        }
    }
    counts_out.finish(cancel);
    Ok(())
}
