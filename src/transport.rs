//! Message transport between the producer and consumer stages.
//!
//! `SpoolTransport` is a directory-backed queue: one `{message_id}.json` file
//! per message, written atomically so a consumer never sees a partial body.
//! Message ids are UUID v7, so name order is send order. Bodies that do not
//! decode are moved to `rejected/` and never block the messages behind them.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::record::Record;
use crate::streaming::write_atomic;

const MESSAGE_EXTENSION: &str = "json";
const REJECTED_DIR: &str = "rejected";

/// A received message and its decoded record array.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub records: Vec<Record>,
}

/// A queue of JSON record-array messages.
pub trait Transport {
    /// Enqueues one body and returns its message id.
    fn send(&self, body: &[u8]) -> Result<String, PipelineError>;

    /// Up to `max` pending messages, oldest first. Messages stay pending
    /// until acknowledged. Undecodable messages are set aside and skipped.
    fn receive(&self, max: usize) -> Result<Vec<Message>, PipelineError>;

    /// Removes a processed message.
    fn ack(&self, message_id: &str) -> Result<(), PipelineError>;
}

/// Directory-backed queue.
#[derive(Debug, Clone)]
pub struct SpoolTransport {
    dir: PathBuf,
    ceiling: usize,
}

impl SpoolTransport {
    /// Opens (creating if needed) a spool directory.
    pub fn open(dir: impl AsRef<Path>, ceiling: usize) -> Result<Self, PipelineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Transport(format!("Failed to create spool {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir, ceiling })
    }

    fn message_path(&self, message_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", message_id, MESSAGE_EXTENSION))
    }

    /// Location of set-aside messages.
    pub fn rejected_dir(&self) -> PathBuf {
        self.dir.join(REJECTED_DIR)
    }

    /// Pending message ids in name order.
    fn pending(&self) -> Result<Vec<String>, PipelineError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::Transport(format!("Failed to list spool {}: {}", self.dir.display(), e))
        })?;

        let mut pending = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::Transport(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXTENSION)
            {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            pending.push(id.to_string());
        }
        pending.sort();
        Ok(pending)
    }

    /// Moves an undecodable message out of the pending set.
    fn reject(&self, message_id: &str) -> Result<(), PipelineError> {
        let rejected = self.rejected_dir();
        fs::create_dir_all(&rejected).map_err(|e| {
            PipelineError::Transport(format!("Failed to create {}: {}", rejected.display(), e))
        })?;
        let target = rejected.join(format!("{}.{}", message_id, MESSAGE_EXTENSION));
        fs::rename(self.message_path(message_id), &target).map_err(|e| {
            PipelineError::Transport(format!("Failed to set aside message {}: {}", message_id, e))
        })
    }
}

impl Transport for SpoolTransport {
    fn send(&self, body: &[u8]) -> Result<String, PipelineError> {
        if body.len() > self.ceiling {
            return Err(PipelineError::MessageTooLarge {
                size: body.len(),
                ceiling: self.ceiling,
            });
        }

        let message_id = Uuid::now_v7().to_string();
        write_atomic(&self.message_path(&message_id), body)
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        debug!(message_id = %message_id, bytes = body.len(), "[SPOOL] Enqueued");
        Ok(message_id)
    }

    fn receive(&self, max: usize) -> Result<Vec<Message>, PipelineError> {
        let mut messages = Vec::new();
        for id in self.pending()? {
            if messages.len() == max {
                break;
            }
            let path = self.message_path(&id);
            let body = fs::read(&path).map_err(|e| {
                PipelineError::Transport(format!("Failed to read message {}: {}", id, e))
            })?;
            match serde_json::from_slice::<Vec<Record>>(&body) {
                Ok(records) => messages.push(Message { id, records }),
                Err(e) => {
                    warn!(
                        message_id = %id,
                        error = %e,
                        "[SPOOL] Message is not a record array, setting it aside"
                    );
                    self.reject(&id)?;
                }
            }
        }
        if !messages.is_empty() {
            info!(count = messages.len(), "[SPOOL] Received messages");
        }
        Ok(messages)
    }

    fn ack(&self, message_id: &str) -> Result<(), PipelineError> {
        fs::remove_file(self.message_path(message_id)).map_err(|e| {
            PipelineError::Transport(format!("Failed to ack message {}: {}", message_id, e))
        })?;
        debug!(message_id = %message_id, "[SPOOL] Acknowledged");
        Ok(())
    }
}
