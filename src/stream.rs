//! Server-sent event decoding for streaming vendor responses.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use tokio::time::{Instant, Sleep, sleep_until};

use crate::error::AdapterError;
use crate::http::HttpBodyStream;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// `data:` payload, multi-line payloads joined with `\n`.
    Data(String),
    /// The `[DONE]` sentinel; nothing is decoded after it.
    Done,
}

/// Turns raw body bytes into events.
///
/// Only `data:` fields matter; `event:`, `id:` and comments are dropped because
/// every supported vendor repeats the event type inside the JSON payload.
#[derive(Debug, Default)]
struct EventAssembler {
    line: Vec<u8>,
    data: Vec<String>,
}

impl EventAssembler {
    fn push(&mut self, bytes: &[u8], events: &mut Vec<Result<StreamEvent, String>>) {
        for &byte in bytes {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
            let line = std::mem::take(&mut self.line);
            if line.is_empty() {
                self.dispatch(events);
            } else {
                self.field(line, events);
            }
        }
    }

    /// Flushes whatever is left once the body has ended.
    fn finish(&mut self, events: &mut Vec<Result<StreamEvent, String>>) {
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            self.field(line, events);
        }
        self.dispatch(events);
    }

    fn field(&mut self, line: Vec<u8>, events: &mut Vec<Result<StreamEvent, String>>) {
        let Some(value) = line.strip_prefix(b"data:") else {
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        match std::str::from_utf8(value) {
            Ok(text) => self.data.push(text.to_string()),
            Err(err) => events.push(Err(format!("invalid UTF-8 in stream chunk: {err}"))),
        }
    }

    fn dispatch(&mut self, events: &mut Vec<Result<StreamEvent, String>>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload.trim() == "[DONE]" {
            events.push(Ok(StreamEvent::Done));
        } else if !payload.is_empty() {
            events.push(Ok(StreamEvent::Data(payload)));
        }
    }
}

/// Decodes a streaming body into [`StreamEvent`]s.
///
/// An idle timeout bounds the wait for each body chunk and an optional deadline
/// bounds the whole read. When either expires the decoder yields one
/// non-retriable `Timeout` error and ends. The stream also ends after `[DONE]`,
/// after a body error, or when the body closes.
pub struct StreamDecoder {
    body: HttpBodyStream,
    provider: String,
    assembler: EventAssembler,
    pending: VecDeque<Result<StreamEvent, AdapterError>>,
    idle_timeout: Option<Duration>,
    deadline: Option<Instant>,
    timer: Option<Pin<Box<Sleep>>>,
    timer_is_deadline: bool,
    body_closed: bool,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(body: HttpBodyStream, provider: impl Into<String>) -> Self {
        Self {
            body,
            provider: provider.into(),
            assembler: EventAssembler::default(),
            pending: VecDeque::new(),
            idle_timeout: None,
            deadline: None,
            timer: None,
            timer_is_deadline: false,
            body_closed: false,
            finished: false,
        }
    }

    /// Longest wait allowed between two body chunks.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Point in time after which reading stops.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Restarts the timer from now; called whenever the body makes progress.
    fn rearm(&mut self) {
        let idle = self.idle_timeout.map(|idle| Instant::now() + idle);
        let (wake, is_deadline) = match (idle, self.deadline) {
            (Some(idle), Some(deadline)) if deadline <= idle => (deadline, true),
            (Some(idle), _) => (idle, false),
            (None, Some(deadline)) => (deadline, true),
            (None, None) => return,
        };
        self.timer_is_deadline = is_deadline;
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().reset(wake),
            None => self.timer = Some(Box::pin(sleep_until(wake))),
        }
    }

    fn expired(&self) -> AdapterError {
        let message = match (self.timer_is_deadline, self.idle_timeout) {
            (false, Some(idle)) => format!("stream idle for {}s", idle.as_secs_f32()),
            _ => "deadline exceeded".to_string(),
        };
        AdapterError::timeout(&self.provider, message).exhausted()
    }

    fn absorb(&mut self, events: Vec<Result<StreamEvent, String>>) {
        for event in events {
            if self.finished {
                break;
            }
            match event {
                Ok(StreamEvent::Done) => {
                    self.pending.push_back(Ok(StreamEvent::Done));
                    self.finished = true;
                }
                Ok(event) => self.pending.push_back(Ok(event)),
                Err(message) => self
                    .pending
                    .push_back(Err(AdapterError::vendor(&self.provider, message))),
            }
        }
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, AdapterError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.timer.is_none() && !this.finished {
            this.rearm();
        }

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            if this.body_closed {
                let mut events = Vec::new();
                this.assembler.finish(&mut events);
                this.absorb(events);
                this.finished = true;
                continue;
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let mut events = Vec::new();
                    this.assembler.push(&bytes, &mut events);
                    this.absorb(events);
                    this.rearm();
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err.into_adapter_error(&this.provider))));
                }
                Poll::Ready(None) => this.body_closed = true,
                Poll::Pending => {
                    let fired = match this.timer.as_mut() {
                        Some(timer) => timer.as_mut().poll(cx).is_ready(),
                        None => false,
                    };
                    if fired {
                        this.finished = true;
                        return Poll::Ready(Some(Err(this.expired())));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
