//! Per-frame and per-run outcome reporting.

use crate::error::SinkError;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// The sinks a frame fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sink {
    MetadataLog,
    Queue,
    ImageArchive,
    Database,
}

impl Sink {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sink::MetadataLog => "metadata_log",
            Sink::Queue => "queue",
            Sink::ImageArchive => "image_archive",
            Sink::Database => "database",
        }
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one sink attempt for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SinkOutcome {
    Written,
    Skipped { reason: String },
    Failed { error: SinkError },
}

impl SinkOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SinkOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, SinkOutcome::Written)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SinkOutcome::Failed { .. })
    }

    /// Count the outcome under the `capture.sink.*` metrics.
    pub fn record(&self, sink: Sink) {
        let name = match self {
            SinkOutcome::Written => "capture.sink.written",
            SinkOutcome::Skipped { .. } => "capture.sink.skipped",
            SinkOutcome::Failed { .. } => "capture.sink.failed",
        };
        metrics::counter!(name, "sink" => sink.as_str()).increment(1);
    }
}

impl From<Result<(), SinkError>> for SinkOutcome {
    fn from(result: Result<(), SinkError>) -> Self {
        match result {
            Ok(()) => SinkOutcome::Written,
            Err(error) => SinkOutcome::Failed { error },
        }
    }
}

/// Everything that happened to one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub file_name: String,
    pub metadata_log: SinkOutcome,
    pub queue: SinkOutcome,
    pub image_archive: SinkOutcome,
    pub database: SinkOutcome,
}

impl FrameReport {
    pub fn outcome(&self, sink: Sink) -> &SinkOutcome {
        match sink {
            Sink::MetadataLog => &self.metadata_log,
            Sink::Queue => &self.queue,
            Sink::ImageArchive => &self.image_archive,
            Sink::Database => &self.database,
        }
    }

    /// True when every sink wrote the frame.
    pub fn fully_persisted(&self) -> bool {
        [
            &self.metadata_log,
            &self.queue,
            &self.image_archive,
            &self.database,
        ]
        .iter()
        .all(|o| o.is_written())
    }
}

/// Why the grab loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// The source delivered every frame it was asked for
    Exhausted,
    /// A retrieve waited out its timeout
    TimedOut,
    /// A grab result reported failure
    GrabFailed { message: String },
    /// The loop never ran or was cut short by a malfunction
    Aborted,
}

/// Structured outcome of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub frames: Vec<FrameReport>,
    pub termination: Termination,
    /// Set when the run failed as a whole; frames already persisted stay
    pub failure: Option<String>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            frames: Vec::new(),
            termination: Termination::Aborted,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames `sink` wrote.
    pub fn written(&self, sink: Sink) -> usize {
        self.frames
            .iter()
            .filter(|f| f.outcome(sink).is_written())
            .count()
    }

    /// Number of frames `sink` failed on.
    pub fn failed(&self, sink: Sink) -> usize {
        self.frames
            .iter()
            .filter(|f| f.outcome(sink).is_failed())
            .count()
    }
}
