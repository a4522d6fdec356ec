//! Append-only JSONL record of every generate request.
//!
//! Producers enqueue and return immediately. One background task owns the
//! file, writes records in enqueue order and flushes after each line.

use std::{io, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{
        Mutex,
        mpsc::{self, UnboundedReceiver, UnboundedSender},
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    presets::PresetName,
    types::{Provenance, Usage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub response: String,
    pub usage: Usage,
    /// Server-side time only; excludes the log write and response transmit.
    pub processing_time_ms: f64,
    pub ip_address: Option<String>,
    pub stream: bool,
    pub preset_used: Option<PresetName>,
    pub model_name: Option<String>,
    pub temperature_used: Option<f64>,
    pub top_p_used: Option<f64>,
    pub max_tokens_used: Option<u32>,
    pub system_prompt: Option<String>,
    pub provenance: Provenance,
    pub fallback_used: bool,
}

enum Command {
    Write(Box<LogRecord>),
    Shutdown,
}

pub struct AsyncLogSink {
    sender: UnboundedSender<Command>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl AsyncLogSink {
    /// Opens (creating parent directories as needed) and spawns the writer.
    pub async fn start(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_records(file, receiver, path.clone()));
        info!(path = %path.display(), "interaction log started");

        Ok(Self {
            sender,
            writer: Mutex::new(Some(writer)),
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Enqueues `record`. Never waits on I/O.
    pub fn log(&self, record: LogRecord) {
        if self.sender.send(Command::Write(Box::new(record))).is_err() {
            warn!("interaction log is stopped, dropping record");
        }
    }

    /// Waits until every record enqueued before this call is on disk, then
    /// retires the writer. Concurrent callers wait for the same drain; calls
    /// after it has finished return immediately.
    pub async fn stop(&self) {
        let mut writer = self.writer.lock().await;
        let Some(handle) = writer.take() else {
            return;
        };
        // The writer only exits after the sentinel, so this cannot fail.
        let _ = self.sender.send(Command::Shutdown);
        if let Err(err) = handle.await {
            error!(error = %err, "interaction log writer panicked");
        }
    }
}

async fn write_records(mut file: File, mut receiver: UnboundedReceiver<Command>, path: PathBuf) {
    while let Some(command) = receiver.recv().await {
        let record = match command {
            Command::Write(record) => record,
            Command::Shutdown => break,
        };

        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "could not encode interaction log record");
                continue;
            }
        };
        line.push(b'\n');

        // Write failures drop the record; the writer keeps serving.
        if let Err(err) = write_line(&mut file, &line).await {
            error!(path = %path.display(), error = %err, "failed to persist interaction log record");
        }
    }
    debug!("interaction log writer stopped");
}

async fn write_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}
