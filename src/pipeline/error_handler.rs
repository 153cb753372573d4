use anyhow::Result;
use log::debug;
use std::thread;
use std::time::Instant;

use crate::error::PipelineError;

use super::context::{CancelToken, DETACH_GRACE, FirstError, StageHandle};
use super::reporter::ReportStats;

/// Join every stage thread. A panicked stage is recorded as a stage error.
///
/// Stages blocked in uninterruptible reads (stdin) that have not finished within
/// [`DETACH_GRACE`] are left behind; they hold no output channel the run still reads.
pub fn join_stages(handles: Vec<StageHandle>, first_error: &FirstError) {
    for stage in handles {
        if stage.uninterruptible && !stage.handle.is_finished() {
            let deadline = Instant::now() + DETACH_GRACE;
            while !stage.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(DETACH_GRACE / 20);
            }
            if !stage.handle.is_finished() {
                debug!("{} stage still blocked in a read, detaching", stage.name);
                continue;
            }
        }
        if stage.handle.join().is_err() {
            first_error.record(stage.name, PipelineError::StagePanicked(stage.name).into());
        }
    }
}

/// Outcome of a run once every stage is down: the first stage error, else cancellation,
/// else the reporter's totals.
pub fn finish_run(
    stats: ReportStats,
    cancel: &CancelToken,
    first_error: &FirstError,
) -> Result<ReportStats> {
    if let Some(e) = first_error.take() {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled.into());
    }
    Ok(stats)
}
