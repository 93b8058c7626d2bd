//! Folding of decoded stream events into a running cumulative message.
//!
//! Backends disagree on what an event carries: the legacy completion API
//! resends the whole text generated so far, the message-style APIs send only
//! the newest fragment. Provider adapters normalize both into a [`Delta`]
//! whose [`TextUpdate`] says which one it is, and the [`Accumulator`] keeps the
//! cumulative text the caller sees.

use tracing::{debug, warn};

use crate::client::ClientError;
use crate::model::{CompletionResult, StopReason};
use crate::sse::StreamEvent;

/// Text carried by one decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TextUpdate {
    /// The full text generated so far.
    Cumulative(String),
    /// Only the newest fragment.
    Fragment(String),
    #[default]
    None,
}

/// Provider-neutral view of one decoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    pub text: TextUpdate,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    /// The payload itself ends the stream.
    pub finished: bool,
    pub request_id: Option<String>,
    /// Error reported by the backend inside the stream.
    pub error: Option<String>,
}

impl Delta {
    pub fn cumulative(text: impl Into<String>) -> Self {
        Self {
            text: TextUpdate::Cumulative(text.into()),
            ..Self::default()
        }
    }

    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: TextUpdate::Fragment(text.into()),
            ..Self::default()
        }
    }

    /// Mark this payload as the terminal one.
    pub fn finish(mut self, stop_reason: Option<StopReason>) -> Self {
        self.stop_reason = stop_reason.or(self.stop_reason);
        self.finished = true;
        self
    }
}

/// How a `[DONE]` sentinel is treated by a backend family.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SentinelPolicy {
    /// The sentinel ends the stream.
    Terminal,
    /// Only a stop reason inside a payload ends the stream; a sentinel seen
    /// before one is an anomaly.
    Premature,
}

/// Result of ingesting one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Nothing for the caller to see.
    Ignored,
    /// The cumulative text changed and should be reported.
    Updated,
    /// Terminal state reached.
    Finished { updated: bool },
    /// Stop processing the current chunk; the stream is not resolved.
    Halted,
}

/// Running cumulative text and terminal state for one session.
#[derive(Debug)]
pub struct Accumulator {
    sentinel: SentinelPolicy,
    text: String,
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
    request_id: Option<String>,
    finished: bool,
}

impl Accumulator {
    pub fn new(sentinel: SentinelPolicy) -> Self {
        Self {
            sentinel,
            text: String::new(),
            stop_reason: None,
            stop_sequence: None,
            request_id: None,
            finished: false,
        }
    }

    /// Cumulative text so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fold one event into the running state.
    ///
    /// Fails only when the backend reported an error inside the stream.
    pub fn ingest(&mut self, event: StreamEvent<Delta>) -> Result<Progress, ClientError> {
        if self.finished {
            return Ok(Progress::Ignored);
        }

        match event {
            StreamEvent::Malformed(_) => Ok(Progress::Ignored),
            StreamEvent::Done => match self.sentinel {
                SentinelPolicy::Terminal => {
                    self.finished = true;
                    Ok(Progress::Finished { updated: false })
                }
                SentinelPolicy::Premature => {
                    warn!("unexpected done message before stop_reason has been issued");
                    Ok(Progress::Halted)
                }
            },
            StreamEvent::Delta(delta) => self.apply(delta),
        }
    }

    fn apply(&mut self, delta: Delta) -> Result<Progress, ClientError> {
        if let Some(message) = delta.error {
            return Err(ClientError::ProviderError(message));
        }

        let updated = match delta.text {
            TextUpdate::Cumulative(text) if !text.starts_with(self.text.as_str()) => {
                warn!(
                    previous = self.text.len(),
                    received = text.len(),
                    "ignoring cumulative text that does not extend what was already reported"
                );
                false
            }
            TextUpdate::Cumulative(text) => {
                let updated = !text.is_empty();
                self.text = text;
                updated
            }
            TextUpdate::Fragment(fragment) => {
                self.text.push_str(&fragment);
                !fragment.is_empty()
            }
            TextUpdate::None => false,
        };

        if delta.request_id.is_some() {
            self.request_id = delta.request_id;
        }
        if delta.stop_sequence.is_some() {
            self.stop_sequence = delta.stop_sequence;
        }
        if delta.stop_reason.is_some() {
            self.stop_reason = delta.stop_reason;
        }

        if delta.finished {
            debug!(stop_reason = ?self.stop_reason, len = self.text.len(), "stream reached terminal state");
            self.finished = true;
            return Ok(Progress::Finished { updated });
        }

        Ok(if updated {
            Progress::Updated
        } else {
            Progress::Ignored
        })
    }

    /// Snapshot of the current state as a completion result.
    pub fn result(&self) -> CompletionResult {
        CompletionResult {
            text: self.text.clone(),
            stop_reason: self.stop_reason,
            stop_sequence: self.stop_sequence.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(d: Delta) -> StreamEvent<Delta> {
        StreamEvent::Delta(d)
    }

    #[test]
    fn test_cumulative_text_replaces() {
        let mut acc = Accumulator::new(SentinelPolicy::Premature);
        assert_eq!(acc.ingest(delta(Delta::cumulative("Hi"))).unwrap(), Progress::Updated);
        assert_eq!(acc.ingest(delta(Delta::cumulative("Hi there"))).unwrap(), Progress::Updated);
        assert_eq!(acc.text(), "Hi there");
    }

    #[test]
    fn test_fragments_append() {
        let mut acc = Accumulator::new(SentinelPolicy::Terminal);
        acc.ingest(delta(Delta::fragment("foo"))).unwrap();
        acc.ingest(delta(Delta::fragment("bar"))).unwrap();
        assert_eq!(acc.text(), "foobar");
    }

    #[test]
    fn test_empty_text_is_not_reported() {
        let mut acc = Accumulator::new(SentinelPolicy::Terminal);
        assert_eq!(acc.ingest(delta(Delta::fragment(""))).unwrap(), Progress::Ignored);
        assert_eq!(acc.ingest(delta(Delta::cumulative(""))).unwrap(), Progress::Ignored);
        assert_eq!(acc.ingest(delta(Delta::default())).unwrap(), Progress::Ignored);
    }

    #[test]
    fn test_shorter_cumulative_text_is_not_retracted() {
        let mut acc = Accumulator::new(SentinelPolicy::Premature);
        acc.ingest(delta(Delta::cumulative("Hello"))).unwrap();
        assert_eq!(acc.ingest(delta(Delta::cumulative("Hel"))).unwrap(), Progress::Ignored);
        assert_eq!(acc.text(), "Hello");
    }

    #[test]
    fn test_diverging_cumulative_text_is_not_reported() {
        let mut acc = Accumulator::new(SentinelPolicy::Premature);
        acc.ingest(delta(Delta::cumulative("Hello"))).unwrap();
        assert_eq!(acc.ingest(delta(Delta::cumulative("Jelly"))).unwrap(), Progress::Ignored);
        assert_eq!(acc.ingest(delta(Delta::cumulative("Help me"))).unwrap(), Progress::Ignored);
        assert_eq!(acc.text(), "Hello");

        assert_eq!(acc.ingest(delta(Delta::cumulative("Hello!"))).unwrap(), Progress::Updated);
        assert_eq!(acc.text(), "Hello!");
    }

    #[test]
    fn test_stop_reason_in_payload_finishes() {
        let mut acc = Accumulator::new(SentinelPolicy::Premature);
        let last = Delta {
            stop_sequence: Some("\n\nHuman:".to_string()),
            request_id: Some("log-1".to_string()),
            ..Delta::cumulative("done")
        }
        .finish(Some(StopReason::StopSequence));

        assert_eq!(acc.ingest(delta(last)).unwrap(), Progress::Finished { updated: true });
        let result = acc.result();
        assert_eq!(result.text, "done");
        assert_eq!(result.stop_reason, Some(StopReason::StopSequence));
        assert_eq!(result.stop_sequence.as_deref(), Some("\n\nHuman:"));
        assert_eq!(result.request_id.as_deref(), Some("log-1"));
    }

    #[test]
    fn test_premature_sentinel_halts_without_finishing() {
        let mut acc = Accumulator::new(SentinelPolicy::Premature);
        acc.ingest(delta(Delta::cumulative("partial"))).unwrap();
        assert_eq!(acc.ingest(StreamEvent::Done).unwrap(), Progress::Halted);
        assert!(!acc.is_finished());
    }

    #[test]
    fn test_terminal_sentinel_finishes() {
        let mut acc = Accumulator::new(SentinelPolicy::Terminal);
        acc.ingest(delta(Delta::fragment("x"))).unwrap();
        assert_eq!(acc.ingest(StreamEvent::Done).unwrap(), Progress::Finished { updated: false });
        assert!(acc.is_finished());
        assert_eq!(acc.ingest(delta(Delta::fragment("late"))).unwrap(), Progress::Ignored);
        assert_eq!(acc.text(), "x");
    }

    #[test]
    fn test_malformed_is_ignored() {
        let mut acc = Accumulator::new(SentinelPolicy::Terminal);
        assert_eq!(
            acc.ingest(StreamEvent::Malformed("{".to_string())).unwrap(),
            Progress::Ignored
        );
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn test_in_stream_error_fails() {
        let mut acc = Accumulator::new(SentinelPolicy::Terminal);
        let event = Delta {
            error: Some("overloaded_error: Overloaded".to_string()),
            ..Delta::default()
        };
        let err = acc.ingest(delta(event)).unwrap_err();
        assert!(matches!(err, ClientError::ProviderError(m) if m.contains("Overloaded")));
    }
}
