//! Cooperative waiting primitives for the streaming tool loop.
//!
//! The loop runs on the request task and farms model generation and
//! tool handlers out to helper tasks. While a helper runs, the loop
//! wakes every 250 ms to give the event sink a chance to emit
//! keep-alive and progress lines and to notice client disconnects.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::tools::{ToolCall, ToolResult};

/// Wire-agnostic sink for loop progress. Implementations return `false`
/// once the client is unreachable; the loop then stops emitting but
/// lets the in-flight step finish.
#[async_trait]
pub trait StreamEvents: Send {
    /// An executed tool call, before its handler runs.
    async fn tool_call(&mut self, index: usize, call: &ToolCall) -> bool {
        let _ = (index, call);
        true
    }

    /// The result of an executed call, immediately after the handler.
    async fn tool_result(&mut self, result: &ToolResult) -> bool {
        let _ = result;
        true
    }

    /// Periodic wakeup while a helper task runs; implementations emit
    /// keep-alive/progress comments on their own cadence.
    async fn tick(&mut self) -> bool {
        true
    }
}

/// Sink for the non-streaming paths.
pub struct NullEvents;

#[async_trait]
impl StreamEvents for NullEvents {}

pub enum AwaitOutcome<T> {
    Done(T),
    TimedOut,
    Failed,
}

/// Await a helper task with periodic `tick` wakeups and a deadline.
/// The task is aborted on timeout.
pub async fn await_task<T: Send + 'static>(
    events: &mut dyn StreamEvents,
    mut handle: JoinHandle<T>,
    timeout: Duration,
) -> AwaitOutcome<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut poll = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_millis(250),
        Duration::from_millis(250),
    );
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            joined = &mut handle => {
                return match joined {
                    Ok(v) => AwaitOutcome::Done(v),
                    Err(_) => AwaitOutcome::Failed,
                };
            }
            _ = poll.tick() => {
                let _ = events.tick().await;
                if tokio::time::Instant::now() >= deadline {
                    handle.abort();
                    return AwaitOutcome::TimedOut;
                }
            }
        }
    }
}

/// A writer over the SSE channel. A failed send means the client hung
/// up; the writer latches closed and every later send is a no-op.
pub struct SseWriter {
    tx: mpsc::Sender<String>,
    closed: bool,
}

impl SseWriter {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx, closed: false }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send(&mut self, frame: String) -> bool {
        if self.closed {
            return false;
        }
        if self.tx.send(frame).await.is_err() {
            tracing::debug!("sse client hung up");
            self.closed = true;
            return false;
        }
        true
    }
}
