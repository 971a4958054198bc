// crates/server/src/jobs/log.rs
//! Per-job log channel: append-only line storage plus live fan-out to any
//! number of stream observers.
//!
//! Observers must see every line exactly once, in producer order, across
//! the replay/live boundary. `subscribe` therefore returns the snapshot and
//! the receiver under a single lock hold: lines appended after the snapshot
//! are guaranteed to arrive on the receiver, and none arrive twice. Each
//! subscriber gets its own unbounded channel, so a slow observer never
//! affects the producer or its peers.

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// One item on a job's log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(String),
    /// No more lines will arrive. Delivered to every subscriber exactly once.
    Eof,
}

#[derive(Debug, Default)]
struct LogInner {
    lines: Vec<String>,
    subscribers: Vec<mpsc::UnboundedSender<LogEvent>>,
    closed: bool,
}

/// The log channel for a single job.
#[derive(Debug, Default)]
pub struct JobLog {
    inner: Mutex<LogInner>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel that was closed before this process observed any output:
    /// used for jobs loaded from durable storage, which can only be replayed.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                lines,
                subscribers: Vec::new(),
                closed: true,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line and fan it out to live subscribers.
    ///
    /// Appends after close still extend the stored log (a cancelled job's
    /// handler may keep emitting until it notices) but are not fanned out;
    /// observers were already released by the sentinel.
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        let mut inner = self.lock();
        inner.lines.push(line.clone());
        if !inner.closed {
            inner
                .subscribers
                .retain(|tx| tx.send(LogEvent::Line(line.clone())).is_ok());
        }
    }

    /// Deliver the end-of-stream sentinel to every subscriber and refuse
    /// further fan-out. Returns false if the channel was already closed,
    /// so the sentinel is delivered exactly once.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        for tx in inner.subscribers.drain(..) {
            let _ = tx.send(LogEvent::Eof);
        }
        true
    }

    /// Atomically snapshot the lines produced so far and register a live
    /// receiver for everything after them. On a closed channel the receiver
    /// yields `Eof` immediately.
    pub fn subscribe(&self) -> (Vec<String>, mpsc::UnboundedReceiver<LogEvent>) {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        if inner.closed {
            let _ = tx.send(LogEvent::Eof);
        } else {
            inner.subscribers.push(tx);
        }
        (inner.lines.clone(), rx)
    }

    /// Copy of all lines produced so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
