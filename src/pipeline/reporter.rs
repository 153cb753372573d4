//! Terminal stage: counts, renders and ends the run when the response stream closes.

use crossbeam_channel::{Receiver, never, select};
use log::debug;

use crate::Response;

use super::context::CancelToken;

/// Running totals of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportStats {
    /// Latest effective total announced on the count stream.
    pub total: usize,
    pub processed: usize,
    pub shown: usize,
    pub hidden: usize,
    /// Records carrying a transport error (shown or hidden).
    pub errors: usize,
}

/// Where the reporter renders. The terminal implementation lives in `engine::progress`.
pub trait ReportSink {
    /// A shown record.
    fn record(&mut self, response: &Response, stats: &ReportStats);
    /// Totals changed.
    fn progress(&mut self, stats: &ReportStats);
    /// Response stream closed (or the run was cancelled).
    fn finish(&mut self, stats: &ReportStats);
}

/// Sink that keeps shown records in memory. For library callers and tests.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub shown: Vec<Response>,
    pub last: ReportStats,
    pub finished: bool,
}

impl ReportSink for CollectSink {
    fn record(&mut self, response: &Response, _stats: &ReportStats) {
        self.shown.push(response.clone());
    }

    fn progress(&mut self, stats: &ReportStats) {
        self.last = *stats;
    }

    fn finish(&mut self, stats: &ReportStats) {
        self.last = *stats;
        self.finished = true;
    }
}

pub struct Reporter<'a> {
    sink: &'a mut dyn ReportSink,
    stats: ReportStats,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a mut dyn ReportSink) -> Self {
        Self {
            sink,
            stats: ReportStats::default(),
        }
    }

    fn on_response(&mut self, response: Response) {
        self.stats.processed += 1;
        if response.error.is_some() {
            self.stats.errors += 1;
        }
        if response.hidden {
            self.stats.hidden += 1;
        } else {
            self.stats.shown += 1;
            self.sink.record(&response, &self.stats);
        }
        // A total below what already arrived means the count lagged; never show less.
        self.stats.total = self.stats.total.max(self.stats.processed);
        self.sink.progress(&self.stats);
    }

    /// Consume until the response stream closes or the run is cancelled. The count stream
    /// may close earlier or later; it never holds the reporter open.
    pub fn display(
        mut self,
        responses: Receiver<Response>,
        counts: Receiver<usize>,
        cancel: &CancelToken,
    ) -> ReportStats {
        let closed_counts = never();
        let mut counts_open = true;
        self.sink.progress(&self.stats);
        loop {
            let crx = if counts_open { &counts } else { &closed_counts };
            select! {
                recv(responses) -> msg => match msg {
                    Ok(response) => self.on_response(response),
                    Err(_) => break,
                },
                recv(crx) -> msg => match msg {
                    Ok(total) => {
                        self.stats.total = total.max(self.stats.processed);
                        self.sink.progress(&self.stats);
                    }
                    Err(_) => counts_open = false,
                },
                recv(cancel.signal()) -> _ => {
                    debug!("reporter: cancelled");
                    break;
                }
            }
        }
        // Pick up a total that raced the end of the response stream.
        if !cancel.is_cancelled()
            && let Ok(total) = counts.try_recv()
        {
            self.stats.total = total.max(self.stats.processed);
        }
        self.sink.finish(&self.stats);
        self.stats
    }
}
