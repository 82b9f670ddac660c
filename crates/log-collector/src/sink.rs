// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::error;

use crate::validate::ValidRecord;

const SINK_CHANNEL_BUFFER_SIZE: usize = 256;

/// Append-only file persistence behind a single writer task.
///
/// Handlers enqueue formatted lines on a channel; one task owns the
/// append-mode file handle and drains the channel, so concurrent
/// requests can never interleave partial lines or overwrite each
/// other. Write failures are logged and never surfaced to the HTTP
/// caller: persistence is best-effort, not transactional with the
/// acknowledgment.
pub struct FileSink {
    tx: Sender<String>,
}

impl FileSink {
    /// Spawns the writer task. Must be called from within a tokio
    /// runtime.
    pub fn start(path: PathBuf) -> (FileSink, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(SINK_CHANNEL_BUFFER_SIZE);
        let handle = tokio::spawn(run_writer(path, rx));
        (FileSink { tx }, handle)
    }

    /// Queues one line for appending.
    pub async fn append(&self, line: String) {
        if self.tx.send(line).await.is_err() {
            error!("Log file writer task is gone, line dropped");
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: Receiver<String>) {
    let mut file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open log file {}: {e}", path.display());
            // keep draining so senders never block on a dead sink
            while rx.recv().await.is_some() {}
            return;
        }
    };

    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = file.write_all(line.as_bytes()).await {
            error!("Failed to append to log file {}: {e}", path.display());
        }
    }
    if let Err(e) = file.flush().await {
        error!("Failed to flush log file {}: {e}", path.display());
    }
}

/// Human-readable formatted line:
/// `<timestamp> <LEVEL padded> [source] (url) message`, with batch
/// entries additionally prefixed by their batch id.
pub fn format_line(record: &ValidRecord, batch_id: Option<&str>) -> String {
    let mut line = String::new();
    if let Some(id) = batch_id {
        line.push('[');
        line.push_str(id);
        line.push_str("] ");
    }
    line.push_str(&record.timestamp);
    line.push(' ');
    line.push_str(&format!("{:<5}", record.level.to_uppercase()));
    if let Some(source) = &record.source {
        line.push_str(&format!(" [{source}]"));
    }
    if let Some(url) = &record.url {
        line.push_str(&format!(" ({url})"));
    }
    line.push(' ');
    line.push_str(&record.message);
    line
}
