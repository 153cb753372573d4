//! Durable record store: one JSON object per line, appended and synced per record.
//!
//! Layout: a `run` entry (template and extraction settings), one `response` entry per
//! record, and a closing `summary` entry. A store without summary is from a run that did
//! not shut down cleanly; [`read_log`] still accepts it.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, never, select};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Response;
use crate::engine::request::RequestTemplate;
use crate::error::PipelineError;

use super::context::{CancelToken, CountSender, Delivery, send_or_cancel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: String,
    pub started: String,
    pub template: RequestTemplate,
    pub extract: Vec<String>,
    pub extract_pipe: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub value: String,
    pub status: u16,
    pub header_bytes: usize,
    pub body_bytes: usize,
    pub duration_ms: u64,
    pub extract: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hidden: bool,
}

impl From<&Response> for ResponseEntry {
    fn from(r: &Response) -> Self {
        Self {
            value: r.value.clone(),
            status: r.status,
            header_bytes: r.header_bytes,
            body_bytes: r.body_bytes,
            duration_ms: u64::try_from(r.duration.as_millis()).unwrap_or(u64::MAX),
            extract: r.extract.clone(),
            extract_errors: r.extract_errors.clone(),
            error: r.error.clone(),
            hidden: r.hidden,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub ended: String,
    pub records: usize,
    pub hidden: usize,
    pub cancelled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Run(RunMeta),
    Response(ResponseEntry),
    Summary(Summary),
}

/// A store read back from disk.
#[derive(Debug)]
pub struct RecordLog {
    pub meta: RunMeta,
    pub responses: Vec<ResponseEntry>,
    pub summary: Option<Summary>,
}

/// Owns the store file. Nothing else writes to it.
pub struct Recorder {
    file: File,
    path: PathBuf,
    records: usize,
    hidden: usize,
}

impl Recorder {
    /// Create (truncate) the store and write the run entry.
    pub fn create(
        path: &Path,
        template: &RequestTemplate,
        extract: &[String],
        extract_pipe: &[String],
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("open record store {}", path.display()))?;
        let mut rec = Self {
            file,
            path: path.to_path_buf(),
            records: 0,
            hidden: 0,
        };
        rec.write_entry(&LogEntry::Run(RunMeta {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started: chrono::Local::now().to_rfc3339(),
            template: template.clone(),
            extract: extract.to_vec(),
            extract_pipe: extract_pipe.to_vec(),
        }))?;
        Ok(rec)
    }

    /// One complete line per entry, synced before returning.
    fn write_entry(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry).context("encode record")?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .with_context(|| format!("write record store {}", self.path.display()))
    }

    pub fn append(&mut self, response: &Response) -> Result<()> {
        self.write_entry(&LogEntry::Response(response.into()))?;
        self.records += 1;
        if response.hidden {
            self.hidden += 1;
        }
        Ok(())
    }

    pub fn close(mut self, cancelled: bool) -> Result<()> {
        let summary = Summary {
            ended: chrono::Local::now().to_rfc3339(),
            records: self.records,
            hidden: self.hidden,
            cancelled,
        };
        self.write_entry(&LogEntry::Summary(summary))?;
        debug!(
            "recorder: {} records written to {}",
            self.records,
            self.path.display()
        );
        Ok(())
    }

    /// Relay stage: persist then forward every record, and mirror the count stream.
    pub fn run(
        mut self,
        responses_in: Receiver<Response>,
        responses_out: Sender<Response>,
        counts_in: Receiver<usize>,
        mut counts_out: CountSender,
        cancel: &CancelToken,
    ) -> Result<()> {
        let closed_counts = never();
        let mut counts_open = true;
        let mut drained = false;

        loop {
            let crx = if counts_open { &counts_in } else { &closed_counts };
            select! {
                recv(responses_in) -> msg => match msg {
                    Ok(response) => {
                        self.append(&response)?;
                        match send_or_cancel(&responses_out, response, cancel) {
                            Delivery::Sent => {}
                            Delivery::Cancelled => break,
                            Delivery::Closed => {
                                return Err(PipelineError::Disconnected("recorder").into());
                            }
                        }
                    }
                    Err(_) => {
                        drained = true;
                        break;
                    }
                },
                recv(crx) -> msg => match msg {
                    Ok(count) => counts_out.update(count),
                    Err(_) => counts_open = false,
                },
                recv(cancel.signal()) -> _ => break,
            }
        }
        // Upstream finishes its counts before closing values, so the last count is queued.
        if drained && counts_open {
            for count in counts_in.try_iter() {
                counts_out.update(count);
            }
        }
        counts_out.finish(cancel);
        self.close(cancel.is_cancelled())
    }
}

/// Parse a store back. A truncated last line (crash mid-append) is ignored.
pub fn read_log(path: &Path) -> Result<RecordLog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read record store {}", path.display()))?;
    let complete = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();

    let mut meta = None;
    let mut responses = Vec::new();
    let mut summary = None;
    for (i, line) in lines.iter().enumerate() {
        let entry: LogEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) if i + 1 == lines.len() && !complete => {
                debug!("read_log: ignoring truncated last line");
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("{}: line {}", path.display(), i + 1));
            }
        };
        match entry {
            LogEntry::Run(m) if meta.is_none() => meta = Some(m),
            LogEntry::Run(_) => bail!("{}: duplicate run entry", path.display()),
            LogEntry::Response(r) => responses.push(r),
            LogEntry::Summary(s) => summary = Some(s),
        }
    }
    let Some(meta) = meta else {
        bail!("{}: no run entry", path.display());
    };
    Ok(RecordLog {
        meta,
        responses,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn store_without_summary_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut rec =
            Recorder::create(&path, &RequestTemplate::new("http://h/FUZZ"), &[], &[]).unwrap();
        rec.append(&Response {
            value: "7".into(),
            status: 404,
            ..Response::default()
        })
        .unwrap();
        drop(rec);
        // Simulate a crash in the middle of the next append.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"type\":\"response\",\"val").unwrap();

        let log = read_log(&path).unwrap();
        assert_eq!(log.meta.template.url, "http://h/FUZZ");
        assert_eq!(log.responses.len(), 1);
        assert_eq!(log.responses[0].status, 404);
        assert!(log.summary.is_none());
    }

    #[test]
    fn final_count_survives_closed_responses() {
        use crossbeam_channel::bounded;

        let dir = tempfile::tempdir().unwrap();
        for i in 0..100 {
            let path = dir.path().join(format!("run{i}.json"));
            let rec =
                Recorder::create(&path, &RequestTemplate::new("http://h/FUZZ"), &[], &[]).unwrap();
            let (itx, irx) = bounded(4);
            let (otx, orx) = bounded(4);
            let (ctx, crx) = bounded(4);
            let (octx, ocrx) = bounded(4);
            itx.send(Response {
                value: "1".into(),
                ..Response::default()
            })
            .unwrap();
            ctx.send(1).unwrap();
            drop((itx, ctx));

            rec.run(irx, otx, crx, CountSender::new(octx), &CancelToken::new())
                .unwrap();
            assert_eq!(orx.iter().count(), 1);
            assert_eq!(ocrx.iter().collect::<Vec<_>>(), vec![1], "run {i}");
        }
    }

    #[test]
    fn missing_run_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"type\":\"summary\",\"ended\":\"x\",\"records\":0,\"hidden\":0,\"cancelled\":false}\n").unwrap();
        assert!(read_log(&path).is_err());
    }
}
