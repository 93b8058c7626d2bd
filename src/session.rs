//! One streaming request, from connection open to a single resolution.
//!
//! A [`StreamSession`] feeds each inbound chunk through the line buffer, the
//! event parser and the accumulator before the next chunk is read, so caller
//! callbacks observe cumulative text strictly in arrival order. The session
//! resolves exactly once; data that arrives afterwards is ignored.

use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::accumulator::{Accumulator, Progress};
use crate::client::{BoxError, ClientError};
use crate::http::check_status;
use crate::model::CompletionResult;
use crate::providers::{ProviderKind, StreamFormat};
use crate::sse::{parse_event, LineBuffer};

type OpenHook<'a> = Box<dyn FnMut(&Response) -> Result<(), BoxError> + Send + 'a>;
type UpdateHook<'a> = Box<dyn FnMut(&str) -> Result<(), BoxError> + Send + 'a>;
type CompleteHook<'a> = Box<dyn FnOnce(&str) + Send + 'a>;

/// Caller hooks for one session.
///
/// # Example
/// ```
/// use chatstream::session::StreamCallbacks;
///
/// let mut latest = String::new();
/// let callbacks = StreamCallbacks::new()
///     .on_update(|text| {
///         latest = text.to_string();
///         Ok(())
///     })
///     .on_complete(|text| println!("done: {text}"));
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct StreamCallbacks<'a> {
    on_open: Option<OpenHook<'a>>,
    on_update: Option<UpdateHook<'a>>,
    on_complete: Option<CompleteHook<'a>>,
    cancellation: Option<CancellationToken>,
}

impl<'a> StreamCallbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once with the response head, before the body is read.
    /// An error rejects the session.
    pub fn on_open(
        mut self,
        f: impl FnMut(&Response) -> Result<(), BoxError> + Send + 'a,
    ) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    /// Called with the cumulative text every time it grows.
    /// An error rejects the session and stops processing.
    pub fn on_update(mut self, f: impl FnMut(&str) -> Result<(), BoxError> + Send + 'a) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Called once with the final text on success.
    pub fn on_complete(mut self, f: impl FnOnce(&str) + Send + 'a) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Abort the session when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl fmt::Debug for StreamCallbacks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

/// Live state of one in-flight request.
pub struct StreamSession<'a> {
    provider: ProviderKind,
    format: StreamFormat,
    lines: LineBuffer,
    accumulator: Accumulator,
    callbacks: StreamCallbacks<'a>,
    resolved: bool,
}

impl<'a> StreamSession<'a> {
    pub fn new(provider: ProviderKind, callbacks: StreamCallbacks<'a>) -> Self {
        let format = provider.stream_format();
        Self {
            provider,
            format,
            lines: LineBuffer::new(),
            accumulator: Accumulator::new(format.sentinel()),
            callbacks,
            resolved: false,
        }
    }

    /// Cumulative text received so far.
    pub fn text(&self) -> &str {
        self.accumulator.text()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Send `request` and stream its response to completion.
    pub async fn start(mut self, request: RequestBuilder) -> Result<CompletionResult, ClientError> {
        debug!(provider = %self.provider, "opening completion stream");
        let outcome = self.drive(request).await;
        self.resolved = true;

        match &outcome {
            Ok(result) => {
                debug!(provider = %self.provider, stop_reason = ?result.stop_reason, "completion stream resolved")
            }
            Err(e) if e.is_cancelled() => debug!(provider = %self.provider, "completion stream cancelled"),
            Err(e) => error!(provider = %self.provider, error = %e, "completion stream failed"),
        }
        outcome
    }

    async fn drive(&mut self, request: RequestBuilder) -> Result<CompletionResult, ClientError> {
        let cancellation = self.callbacks.cancellation.clone();

        let response = or_cancelled(&cancellation, request.send()).await??;
        let response = check_status(self.provider, response)?;

        if let Some(on_open) = self.callbacks.on_open.as_mut() {
            on_open(&response).map_err(ClientError::Callback)?;
        }

        // Dropping the body on return detaches it from the connection.
        let mut body = Box::pin(response.bytes_stream());
        loop {
            match or_cancelled(&cancellation, body.next()).await? {
                Some(chunk) => {
                    if let Some(result) = self.feed(&chunk?)? {
                        return Ok(result);
                    }
                }
                None => return self.finish()?.ok_or(ClientError::StreamEnded),
            }
        }
    }

    /// Process one inbound chunk.
    ///
    /// Returns `Ok(Some(_))` when the chunk completed the stream. Once the
    /// session has resolved, either way, further chunks are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<CompletionResult>, ClientError> {
        if self.resolved {
            trace!(len = chunk.len(), "ignoring data after resolution");
            return Ok(None);
        }

        self.lines.push(chunk);
        let outcome = self.drain();
        self.settle(outcome)
    }

    /// Process whatever is still buffered once the connection has closed.
    ///
    /// A stream that ends without a terminal event resolves successfully only
    /// if a stop reason was seen; otherwise it fails with
    /// [`ClientError::StreamEnded`].
    pub fn finish(&mut self) -> Result<Option<CompletionResult>, ClientError> {
        if self.resolved {
            return Ok(None);
        }

        self.lines.close();
        let outcome = loop {
            match self.drain() {
                Ok(None) if self.lines.has_line() => continue,
                Ok(None) if self.accumulator.stop_reason().is_some() => break Ok(Some(self.complete())),
                Ok(None) => break Err(ClientError::StreamEnded),
                other => break other,
            }
        };
        self.settle(outcome)
    }

    fn settle(
        &mut self,
        outcome: Result<Option<CompletionResult>, ClientError>,
    ) -> Result<Option<CompletionResult>, ClientError> {
        if !matches!(outcome, Ok(None)) {
            self.resolved = true;
        }
        outcome
    }

    /// Run buffered lines through the parser and accumulator until the
    /// buffer is exhausted, the stream finishes, or the accumulator halts.
    fn drain(&mut self) -> Result<Option<CompletionResult>, ClientError> {
        let format = self.format;

        while let Some(line) = self.lines.next_line() {
            trace!(line = %line, "sse line");
            let Some(event) = parse_event(&line, |payload| format.decode(payload)) else {
                continue;
            };

            match self.accumulator.ingest(event)? {
                Progress::Ignored => {}
                Progress::Updated => self.report_update()?,
                Progress::Finished { updated } => {
                    if updated {
                        self.report_update()?;
                    }
                    return Ok(Some(self.complete()));
                }
                Progress::Halted => break,
            }
        }
        Ok(None)
    }

    fn report_update(&mut self) -> Result<(), ClientError> {
        if let Some(on_update) = self.callbacks.on_update.as_mut() {
            on_update(self.accumulator.text()).map_err(ClientError::Callback)?;
        }
        Ok(())
    }

    fn complete(&mut self) -> CompletionResult {
        let result = self.accumulator.result();
        if let Some(on_complete) = self.callbacks.on_complete.take() {
            on_complete(&result.text);
        }
        result
    }
}

impl fmt::Debug for StreamSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("provider", &self.provider)
            .field("accumulator", &self.accumulator)
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

/// Await `fut`, giving up with [`ClientError::StreamCancelled`] if `token` fires first.
async fn or_cancelled<F: Future>(
    token: &Option<CancellationToken>,
    fut: F,
) -> Result<F::Output, ClientError> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(ClientError::StreamCancelled),
            output = fut => Ok(output),
        },
        None => Ok(fut.await),
    }
}
