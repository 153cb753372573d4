//! Terminal rendering for a run: shown records above a kdam bar, copied to the text log.

use kdam::{Animation, Bar, BarExt};
use std::time::Instant;

use crate::Response;
use crate::pipeline::reporter::{ReportSink, ReportStats};
use crate::utils::logfile::TextLog;

const COLUMNS: &str = "   status    header      body   value            extract";

/// Create the run's bar. The total grows as counts arrive.
pub fn create_bar(desc: &'static str) -> Bar {
    kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " req"
    )
}

/// One line per shown record.
pub fn format_record(r: &Response) -> String {
    let status = if r.error.is_some() && r.status == 0 {
        "error".to_string()
    } else {
        r.status.to_string()
    };
    let mut line = format!(
        "{:>9} {:>9} {:>9}   {:<16}",
        status, r.header_bytes, r.body_bytes, r.value
    );
    if let Some(err) = &r.error {
        line.push_str(&format!(" {err}"));
    }
    if !r.extract.is_empty() {
        line.push_str(&format!(" {:?}", r.extract));
    }
    for note in &r.extract_errors {
        line.push_str(&format!(" [extract: {note}]"));
    }
    line
}

pub fn format_summary(stats: &ReportStats, elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.processed as f64 / secs
    } else {
        0.0
    };
    format!(
        "processed {} of {} requests in {:.2?} ({:.1} req/s): {} shown, {} hidden, {} errors",
        stats.processed, stats.total, elapsed, rate, stats.shown, stats.hidden, stats.errors
    )
}

pub struct TerminalSink {
    bar: Bar,
    log: Option<TextLog>,
    header_printed: bool,
    started: Instant,
}

impl TerminalSink {
    pub fn new(log: Option<TextLog>) -> Self {
        Self {
            bar: create_bar("fuzz"),
            log,
            header_printed: false,
            started: Instant::now(),
        }
    }

    /// Print above the bar and copy to the text log.
    pub fn print_line(&mut self, line: &str) {
        let _ = self.bar.write(line);
        if let Some(log) = self.log.as_mut() {
            log.line(line);
        }
    }
}

impl ReportSink for TerminalSink {
    fn record(&mut self, response: &Response, _stats: &ReportStats) {
        if !self.header_printed {
            self.header_printed = true;
            self.print_line(COLUMNS);
        }
        self.print_line(&format_record(response));
    }

    fn progress(&mut self, stats: &ReportStats) {
        self.bar.total = stats.total;
        let secs = self.started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            stats.processed as f64 / secs
        } else {
            0.0
        };
        self.bar.set_postfix(format!(
            "shown={}, hidden={}, errors={}, {:.1} req/s",
            stats.shown, stats.hidden, stats.errors, rate
        ));
        let _ = self.bar.update_to(stats.processed);
    }

    fn finish(&mut self, stats: &ReportStats) {
        self.progress(stats);
        let _ = self.bar.refresh();
        eprintln!();
        let summary = format_summary(stats, self.started.elapsed());
        if let Some(log) = self.log.as_mut() {
            log.line(&summary);
            log.flush();
        }
    }
}
