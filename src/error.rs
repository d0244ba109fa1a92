use thiserror::Error;

/// Patterns (lowercase) that indicate credential material not safe for logs.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "auth-token",
    "auth-id",
    "key=",
    "bearer ",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for logging.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Pipeline-wide error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Source / Reader ───────────────────────────────────────────────────────
    #[error("Failed to read source: {0}")]
    SourceRead(String),

    #[error("Invalid delimited data: {0}")]
    CsvInvalid(String),

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Row {row} has no value for id field '{field}'")]
    MissingSourceId { row: u64, field: String },

    #[error("Duplicate source id '{id}' at row {row}")]
    DuplicateSourceId { row: u64, id: String },

    // ── Batching ──────────────────────────────────────────────────────────────
    #[error("Empty chunk {index} encountered")]
    EmptyChunk { index: usize },

    #[error("Invalid batch_mode '{0}'. Valid values: chunk_size|max_size")]
    InvalidBatchMode(String),

    #[error("Record '{source_id}' serializes to {size} bytes, ceiling is {ceiling}")]
    RecordTooLarge {
        source_id: String,
        size: usize,
        ceiling: usize,
    },

    #[error("Chunk {index} serializes to {size} bytes, ceiling is {ceiling}")]
    ChunkTooLarge {
        index: usize,
        size: usize,
        ceiling: usize,
    },

    #[error("Message of {size} bytes exceeds the transport ceiling of {ceiling}")]
    MessageTooLarge { size: usize, ceiling: usize },

    #[error("Sub-batch of {len} records exceeds the hard cap of {cap}")]
    SubBatchOverCap { len: usize, cap: usize },

    // ── Validation services ───────────────────────────────────────────────────
    #[error("Validation service error: {0}")]
    ValidationApi(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Output / Transport ────────────────────────────────────────────────────
    #[error("Sink write failed: {0}")]
    Sink(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns true for failures scoped to a single batch.
    ///
    /// The pipeline logs these, skips the batch, and moves on. Everything
    /// else unwinds to the invocation boundary.
    pub fn is_batch_local(&self) -> bool {
        matches!(
            self,
            PipelineError::ValidationApi(_)
                | PipelineError::RateLimited { .. }
                | PipelineError::ConnectionFailed(_)
        )
    }

    /// Process exit status for a run terminated by this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::InvalidBatchMode(_) => 3,
            PipelineError::EmptyChunk { .. }
            | PipelineError::RecordTooLarge { .. }
            | PipelineError::ChunkTooLarge { .. }
            | PipelineError::MessageTooLarge { .. }
            | PipelineError::SubBatchOverCap { .. }
            | PipelineError::SourceRead(_)
            | PipelineError::CsvInvalid(_)
            | PipelineError::UnsupportedEncoding(_)
            | PipelineError::MissingSourceId { .. }
            | PipelineError::DuplicateSourceId { .. } => 2,
            _ => 1,
        }
    }

    /// Error text that is safe to log. Never leaks credentials that may have
    /// been echoed back in URLs or service error bodies.
    pub fn redacted_message(&self) -> String {
        match self {
            PipelineError::ValidationApi(msg) => format!(
                "Validation service error: {}",
                sanitize_message(msg, "request rejected (details redacted)")
            ),
            PipelineError::ConnectionFailed(msg) => format!(
                "Connection failed: {}",
                sanitize_message(msg, "details redacted")
            ),
            PipelineError::Config(msg) => format!(
                "Configuration error: {}",
                sanitize_message(msg, "details redacted")
            ),
            PipelineError::Internal(msg) => format!(
                "Internal error: {}",
                sanitize_message(msg, "details redacted")
            ),
            PipelineError::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => format!("Rate limited, retry after {} seconds", secs),
                None => "Rate limited".to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            PipelineError::SourceRead(err.to_string())
        } else {
            PipelineError::CsvInvalid(err.to_string())
        }
    }
}
