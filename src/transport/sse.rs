//! Receive-only transport over Server-Sent Events.
//!
//! The server pushes every topic unconditionally, so control frames are
//! no-ops. Each event's `data` is decoded as the regular inbound envelope
//! and handed to the same dispatcher the WebSocket transport uses.
//!
//! Reconnection follows `EventSource`: wait the server-provided `retry:`
//! delay (3 s by default) and resume with `Last-Event-ID`.

use std::fmt;
use std::time::Duration;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ConnectionState, Lifecycle, LifecycleEvent, MessageSource, SourceKind};
use crate::error::StreamError;
use crate::subscription::dispatch::{Dispatcher, SharedRegistry};

/// Reconnect delay used until the server sends `retry:`.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default "message" type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// `id:` field in effect when the event was dispatched.
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether an `EventSource.onmessage` handler would see this event.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Output of the line parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A complete event.
    Event(SseEvent),
    /// The server changed the reconnect delay.
    Retry(Duration),
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `id:` seen, for `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed a chunk of the body; returns the frames it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.finish_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    return Some(SseFrame::Retry(Duration::from_millis(ms)));
                }
            }
            _ => {}
        }
        None
    }

    fn finish_event(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame::Event(SseEvent {
            event,
            data,
            id: self.last_id.clone(),
        }))
    }
}

enum Slot {
    Idle(Box<SseTask>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Receive-only transport over a `text/event-stream` endpoint.
pub struct SseSource {
    url: String,
    lifecycle: Lifecycle,
    shutdown: watch::Sender<bool>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for SseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseSource")
            .field("url", &self.url)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl SseSource {
    /// Prepare a source for `url`.
    ///
    /// Fails when the URL is not http(s) or the HTTP client cannot be built;
    /// callers fall back to the WebSocket transport in that case.
    pub fn new(url: impl Into<String>, registry: SharedRegistry) -> Result<Self, StreamError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|e| StreamError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StreamError::InvalidUrl {
                url,
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let client = reqwest::Client::builder().build()?;
        let lifecycle = Lifecycle::new();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = SseTask {
            url: url.clone(),
            client,
            dispatcher: Dispatcher::new(registry, "sse"),
            lifecycle: lifecycle.clone(),
            shutdown: shutdown_rx,
            retry: DEFAULT_RETRY,
            last_event_id: None,
        };

        Ok(Self {
            url,
            lifecycle,
            shutdown,
            slot: Mutex::new(Slot::Idle(Box::new(task))),
        })
    }

    /// Endpoint this source reads from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MessageSource for SseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sse
    }

    fn start(&self) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Stopped) {
            Slot::Idle(task) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    info!(url = %self.url, "Starting SSE transport");
                    *slot = Slot::Running(handle.spawn(task.run()));
                }
                Err(_) => {
                    error!("SSE transport must be started inside a tokio runtime");
                    *slot = Slot::Idle(task);
                }
            },
            Slot::Running(task) => *slot = Slot::Running(task),
            Slot::Stopped => debug!("SSE transport was stopped; not restarting"),
        }
    }

    fn stop(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Stopped) {
            return;
        }
        *slot = Slot::Stopped;
        self.shutdown.send_replace(true);
        self.lifecycle.set_state(ConnectionState::Disconnected);
        self.lifecycle.emit(LifecycleEvent::Stopped);
        info!(url = %self.url, "SSE transport stopped");
    }

    fn send_control(&self, topic: &str, subscribing: bool) {
        debug!(channel = %topic, subscribing = subscribing, "SSE transport ignores control frames");
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.watch()
    }

    fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

impl Drop for SseSource {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct SseTask {
    url: String,
    client: reqwest::Client,
    dispatcher: Dispatcher,
    lifecycle: Lifecycle,
    shutdown: watch::Receiver<bool>,
    retry: Duration,
    last_event_id: Option<String>,
}

impl SseTask {
    async fn run(mut self: Box<Self>) {
        let mut attempt = 1;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.lifecycle.set_state(ConnectionState::Connecting);
            self.lifecycle.emit(LifecycleEvent::Connecting { attempt });
            info!(url = %self.url, attempt = attempt, "Opening event stream");

            let mut shutdown = self.shutdown.clone();
            let outcome = tokio::select! {
                outcome = self.stream_once() => outcome,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };

            let reason = match outcome {
                Ok(()) => {
                    attempt = 1;
                    "stream ended".to_string()
                }
                Err(e) => {
                    attempt += 1;
                    e.to_string()
                }
            };

            warn!(
                url = %self.url,
                reason = %reason,
                retry_ms = self.retry.as_millis() as u64,
                "Event stream disconnected"
            );
            self.lifecycle.set_state(ConnectionState::Disconnected);
            self.lifecycle.emit(LifecycleEvent::Disconnected { reason });
            self.lifecycle.emit(LifecycleEvent::ReconnectScheduled {
                attempt,
                delay: self.retry,
            });

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.retry) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        self.lifecycle.set_state(ConnectionState::Disconnected);
        debug!(url = %self.url, "SSE task exited");
    }

    /// Read one response to the end.
    async fn stream_once(&mut self) -> Result<(), StreamError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header("Last-Event-ID", id.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::BadStatus {
                status: status.as_u16(),
            });
        }

        self.lifecycle.set_state(ConnectionState::Connected);
        self.lifecycle.emit(LifecycleEvent::Connected);
        info!(url = %self.url, "Event stream connected");

        let frames = frame_stream(response);
        futures::pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            match frame? {
                SseFrame::Retry(delay) => {
                    debug!(retry_ms = delay.as_millis() as u64, "Server changed retry delay");
                    self.retry = delay;
                }
                SseFrame::Event(event) => {
                    if event.id.is_some() {
                        self.last_event_id = event.id.clone();
                    }
                    if event.is_message() {
                        self.dispatcher.dispatch_text(&event.data);
                    } else {
                        debug!(event = ?event.event, "Ignoring named event");
                    }
                }
            }
        }

        Ok(())
    }
}

/// Frames of a streaming response body.
fn frame_stream(response: reqwest::Response) -> impl Stream<Item = Result<SseFrame, StreamError>> {
    try_stream! {
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StreamError::from)?;
            for frame in parser.feed(&chunk) {
                yield frame;
            }
        }
    }
}
