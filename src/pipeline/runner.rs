//! Worker pool: substitute, execute, capture, extract.
//!
//! Workers share one value receiver (work-stealing) and one clone each of the response
//! sender. The caller drops its own sender after spawning, so the response channel closes
//! exactly when the last worker exits.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use reqwest::Method;
use reqwest::blocking::{Client, Response as HttpResponse};
use std::any::Any;
use std::io::{ErrorKind, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::Response;
use crate::engine::extract::Extractor;
use crate::engine::request::{ConcreteRequest, RequestTemplate};
use crate::error::PipelineError;

use super::context::{
    CancelToken, Delivery, FirstError, StageHandle, recv_or_cancel, send_or_cancel, spawn_stage,
};

const READ_CHUNK: usize = 16 * 1024;

/// Everything one request needs, shared read-only by all workers.
pub struct Runner {
    client: Client,
    template: RequestTemplate,
    method: Method,
    extractor: Extractor,
    body_buffer_size: usize,
}

impl Runner {
    pub fn new(
        client: Client,
        template: RequestTemplate,
        extractor: Extractor,
        body_buffer_size: usize,
    ) -> Result<Self, PipelineError> {
        let method = Method::from_bytes(template.method.as_bytes())
            .map_err(|_| PipelineError::InvalidMethod(template.method.clone()))?;
        Ok(Self {
            client,
            template,
            method,
            extractor,
            body_buffer_size,
        })
    }

    /// Execute the request for `value`. Never fails: transport errors end up in `error`.
    pub fn execute(&self, value: &str) -> Response {
        let started = Instant::now();
        let request = self.template.render(value);
        match self.send(request) {
            Ok(http) => self.capture(value, http, started),
            Err(e) => Response::failed(value.to_string(), format!("{e:#}"), started.elapsed()),
        }
    }

    /// [`Runner::execute`], with a panic turned into a failed record for that one value.
    pub fn execute_guarded(&self, value: String) -> Response {
        guarded(value, |v| self.execute(v))
    }

    fn send(&self, request: ConcreteRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(self.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder.send()?)
    }

    fn capture(&self, value: &str, mut http: HttpResponse, started: Instant) -> Response {
        let raw_header = header_block(&http);
        let status = http.status().as_u16();
        let body = read_body(&mut http, self.body_buffer_size);

        let mut response = Response {
            value: value.to_string(),
            status,
            header_bytes: raw_header.len(),
            body_bytes: body.total,
            error: body.error.map(|e| format!("read body: {e}")),
            raw_header,
            body: body.kept,
            ..Response::default()
        };
        if !self.extractor.is_empty() {
            let extraction = self.extractor.run(&response.body);
            response.extract = extraction.values;
            response.extract_errors = extraction.errors;
        }
        response.duration = started.elapsed();
        response
    }
}

/// Status line plus every header, CRLF-terminated, as the filters and size rules see it.
fn header_block(http: &HttpResponse) -> String {
    let mut block = format!("{:?} {}\r\n", http.version(), http.status());
    for (name, value) in http.headers() {
        block.push_str(name.as_str());
        block.push_str(": ");
        block.push_str(&String::from_utf8_lossy(value.as_bytes()));
        block.push_str("\r\n");
    }
    block.push_str("\r\n");
    block
}

#[derive(Debug)]
pub struct CapturedBody {
    pub kept: Vec<u8>,
    /// Full transferred length, including what did not fit in `kept`.
    pub total: usize,
    pub error: Option<std::io::Error>,
}

/// Read `reader` to the end, keeping at most `keep` bytes.
pub fn read_body<R: Read>(reader: &mut R, keep: usize) -> CapturedBody {
    let mut kept = Vec::new();
    let mut total = 0_usize;
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                let room = keep.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return CapturedBody {
                    kept,
                    total,
                    error: Some(e),
                };
            }
        }
    }
    CapturedBody {
        kept,
        total,
        error: None,
    }
}

/// Run `f` for `value`; a panic becomes a failed record carrying `value`.
fn guarded(value: String, f: impl FnOnce(&str) -> Response) -> Response {
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| f(&value))) {
        Ok(response) => response,
        Err(payload) => {
            let msg = format!("worker panicked: {}", panic_message(payload.as_ref()));
            debug!("{} (value {:?})", msg, value);
            Response::failed(value, msg, started.elapsed())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Single worker: take values until the input closes or the run is cancelled.
///
/// A request already in flight is finished (bounded by the request timeout) before
/// cancellation is observed.
fn worker_loop(
    runner: Arc<Runner>,
    values: Receiver<String>,
    responses: Sender<Response>,
    cancel: CancelToken,
) -> Result<()> {
    let mut done = 0_usize;
    while let Some(value) = recv_or_cancel(&values, &cancel) {
        let response = runner.execute_guarded(value);
        match send_or_cancel(&responses, response, &cancel) {
            Delivery::Sent => done += 1,
            Delivery::Cancelled => break,
            Delivery::Closed => return Err(PipelineError::Disconnected("worker").into()),
        }
    }
    debug!("worker: {} requests", done);
    Ok(())
}

/// Spawn `threads` workers. The caller must drop its `responses` sender afterwards.
pub fn spawn_workers(
    runner: Arc<Runner>,
    threads: usize,
    values: &Receiver<String>,
    responses: &Sender<Response>,
    cancel: &CancelToken,
    first_error: &FirstError,
) -> Result<Vec<StageHandle>> {
    (0..threads.max(1))
        .map(|_| {
            let runner = Arc::clone(&runner);
            let values = values.clone();
            let responses = responses.clone();
            let token = cancel.clone();
            spawn_stage("worker", cancel, first_error, move || {
                worker_loop(runner, values, responses, token)
            })
        })
        .collect()
}
