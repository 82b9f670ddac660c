// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ForwarderConfig;
use crate::delivery::BatchTransport;
use crate::record::{LogBatch, LogRecord};

/// Buffers captured records and decides when to flush: immediately at
/// `batch_size`, or when the single pending flush timer expires.
///
/// Cheap to clone; clones share the buffer and timer. Delivery is
/// fire-and-forget from the caller's perspective: a flush hands the
/// drained buffer to the transport on a spawned task and returns
/// without waiting for retries to play out.
#[derive(Clone)]
pub struct BatchScheduler {
    config: Arc<RwLock<ForwarderConfig>>,
    transport: Arc<dyn BatchTransport>,
    state: Arc<Mutex<SchedulerState>>,
}

#[derive(Default)]
struct SchedulerState {
    buffer: Vec<LogRecord>,
    /// At most one flush timer is pending at any time.
    timer: Option<JoinHandle<()>>,
}

impl BatchScheduler {
    pub fn new(
        config: Arc<RwLock<ForwarderConfig>>,
        transport: Arc<dyn BatchTransport>,
    ) -> Self {
        BatchScheduler {
            config,
            transport,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Appends a record to the buffer. Must be called from within a
    /// tokio runtime: flushes and timers run on spawned tasks.
    pub fn enqueue(&self, record: LogRecord) {
        let (batch_size, batch_timeout) = {
            #[allow(clippy::expect_used)]
            let config = self.config.read().expect("lock poisoned");
            (config.batch_size, config.batch_timeout)
        };

        let flush_now = {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("lock poisoned");
            state.buffer.push(record);
            if state.buffer.len() >= batch_size {
                // Size-triggered flush supersedes the pending timer.
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                true
            } else {
                if state.timer.is_none() {
                    let scheduler = self.clone();
                    state.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(batch_timeout).await;
                        scheduler.flush();
                    }));
                }
                false
            }
        };

        if flush_now {
            self.flush();
        }
    }

    /// Swaps an empty buffer in for the current one and ships the
    /// drained records as a single batch. No-op when the buffer is
    /// empty. Cancelling an already-consumed timer is a no-op too.
    pub fn flush(&self) {
        let drained = self.drain();
        if drained.is_empty() {
            return;
        }

        let batch = LogBatch::new(drained);
        debug!(
            "Flushing batch {} with {} records",
            batch.batch_id,
            batch.messages.len()
        );
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.send(batch).await;
        });
    }

    /// Uninstall path: cancels the pending timer and delivers the tail
    /// of the buffer before returning. Best-effort only.
    pub async fn shutdown(&self) {
        let drained = self.drain();
        if drained.is_empty() {
            return;
        }
        let batch = LogBatch::new(drained);
        debug!(
            "Final flush of batch {} with {} records",
            batch.batch_id,
            batch.messages.len()
        );
        self.transport.send(batch).await;
    }

    /// Atomically takes the buffer contents and cancels the timer; a
    /// concurrent enqueue lands either in the drained batch or in the
    /// fresh buffer, never both and never neither.
    fn drain(&self) -> Vec<LogRecord> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut state.buffer)
    }

    pub fn pending(&self) -> usize {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock poisoned");
        state.buffer.len()
    }

    #[cfg(test)]
    fn has_pending_timer(&self) -> bool {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock poisoned");
        state.timer.is_some()
    }
}
