//! Value producers: an integer range or newline-delimited lines.
//!
//! A producer owns the value sender and the count sender of the run; both close when
//! `run` returns, whichever way it returns.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::ValueSource;
use crate::engine::tools::RangeFormat;
use crate::error::PipelineError;

use super::context::{CancelToken, CountSender, Delivery, send_or_cancel};

pub trait Producer: Send {
    /// Emit every value into `values` (blocking while it is full) and the running total
    /// into `counts`, until exhausted, cancelled, or nobody is listening anymore.
    fn run(
        self: Box<Self>,
        values: Sender<String>,
        counts: CountSender,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// True when `run` can block in a read that cancellation does not interrupt.
    fn uninterruptible(&self) -> bool {
        false
    }
}

/// `first..=last`, each number rendered through a [`RangeFormat`].
pub struct RangeProducer {
    first: i64,
    last: i64,
    format: RangeFormat,
}

impl RangeProducer {
    pub fn new(first: i64, last: i64, format: &str) -> Result<Self, PipelineError> {
        if first > last {
            return Err(PipelineError::InvalidRange { first, last });
        }
        Ok(Self {
            first,
            last,
            format: RangeFormat::parse(format)?,
        })
    }

    pub fn total(&self) -> usize {
        let span = i128::from(self.last) - i128::from(self.first) + 1;
        usize::try_from(span).unwrap_or(usize::MAX)
    }
}

impl Producer for RangeProducer {
    fn run(
        self: Box<Self>,
        values: Sender<String>,
        mut counts: CountSender,
        cancel: &CancelToken,
    ) -> Result<()> {
        // The total is known up front; announcing it early gives the reporter a real bar.
        let total = self.total();
        counts.update(total);
        for n in self.first..=self.last {
            match send_or_cancel(&values, self.format.format(n), cancel) {
                Delivery::Sent => {}
                Delivery::Closed => {
                    debug!("range: downstream closed at {}", n);
                    break;
                }
                Delivery::Cancelled => {
                    debug!("range: cancelled at {}", n);
                    break;
                }
            }
        }
        counts.finish(cancel);
        Ok(())
    }
}

/// One value per line. `\n` and `\r\n` are stripped; a last line without newline counts.
pub struct LineProducer<R> {
    reader: R,
    uninterruptible: bool,
}

impl<R: BufRead + Send> LineProducer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            uninterruptible: false,
        }
    }
}

impl<R: BufRead + Send> Producer for LineProducer<R> {
    fn run(
        self: Box<Self>,
        values: Sender<String>,
        mut counts: CountSender,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut reader = self.reader;
        let mut buf = Vec::new();
        let mut count = 0_usize;
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .context("read values")?;
            if n == 0 {
                break;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let value = String::from_utf8_lossy(&buf).into_owned();
            match send_or_cancel(&values, value, cancel) {
                Delivery::Sent => {
                    count += 1;
                    counts.update(count);
                }
                Delivery::Closed | Delivery::Cancelled => {
                    debug!("lines: stopped after {} values", count);
                    break;
                }
            }
        }
        counts.finish(cancel);
        Ok(())
    }

    fn uninterruptible(&self) -> bool {
        self.uninterruptible
    }
}

/// Open the configured source. Failures here are configuration errors: nothing has run yet.
pub fn open_source(source: &ValueSource) -> Result<Box<dyn Producer>> {
    match source {
        ValueSource::Range {
            first,
            last,
            format,
        } => Ok(Box::new(RangeProducer::new(*first, *last, format)?)),
        ValueSource::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("open value source {}", path.display()))?;
            Ok(Box::new(LineProducer::new(BufReader::new(file))))
        }
        ValueSource::Stdin => Ok(Box::new(LineProducer {
            reader: BufReader::new(std::io::stdin()),
            uninterruptible: true,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::Cursor;

    fn collect(p: Box<dyn Producer>) -> (Vec<String>, Vec<usize>) {
        let cancel = CancelToken::new();
        let (vtx, vrx) = bounded(1024);
        let (ctx, crx) = bounded(1024);
        p.run(vtx, CountSender::new(ctx), &cancel).unwrap();
        (vrx.iter().collect(), crx.iter().collect())
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(matches!(
            RangeProducer::new(5, 4, "%d"),
            Err(PipelineError::InvalidRange { first: 5, last: 4 })
        ));
    }

    #[test]
    fn lines_keep_empty_values_and_partial_tail() {
        let p = LineProducer::new(Cursor::new(b"a\r\n\nb\nc".to_vec()));
        let (values, counts) = collect(Box::new(p));
        assert_eq!(values, vec!["a", "", "b", "c"]);
        assert_eq!(counts.last(), Some(&4));
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_input_closes_without_values() {
        let (values, counts) = collect(Box::new(LineProducer::new(Cursor::new(Vec::new()))));
        assert!(values.is_empty());
        assert!(counts.is_empty());
    }
}
