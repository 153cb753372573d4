//! Pacing stage between the position filters and the worker pool.
//!
//! Pacing is kept apart from the workers: the limiter only decides *when* a value may leave,
//! the workers only execute what they receive.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use std::time::{Duration, Instant};

use super::context::{CancelToken, Delivery, recv_or_cancel, send_or_cancel, sleep_or_cancel};

/// Releases at most `per_second` values per second, evenly spaced. No bursts.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    interval: Duration,
}

impl RateLimiter {
    /// `None` when `per_second` is not a positive rate; the pipeline then runs unpaced.
    pub fn new(per_second: f64) -> Option<Self> {
        if !per_second.is_finite() || per_second <= 0.0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs_f64(1.0 / per_second),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forward every value from `input` to `output`. The first value leaves immediately,
    /// each later one no earlier than one interval after the previous release.
    pub fn run(
        self,
        input: Receiver<String>,
        output: Sender<String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut last_release: Option<Instant> = None;
        let mut released = 0_usize;
        while let Some(value) = recv_or_cancel(&input, cancel) {
            if let Some(prev) = last_release
                && !sleep_or_cancel(prev + self.interval, cancel)
            {
                break;
            }
            last_release = Some(Instant::now());
            if send_or_cancel(&output, value, cancel) != Delivery::Sent {
                break;
            }
            released += 1;
        }
        debug!("rate: released {} values", released);
        Ok(())
    }
}
