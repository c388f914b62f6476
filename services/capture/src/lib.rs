//! Capture Service
//!
//! Camera frame acquisition pipeline. Frames are grabbed one at a time from a
//! camera (or the file-backed emulator), tagged with a per-run sequence
//! number, and fanned out to four independent sinks. A failing sink never
//! stops the others or the next frame.
//!
//! ## Sinks
//!
//! - **Metadata log**: one JSON line per frame
//! - **Queue**: frame metadata published per frame, best effort
//! - **Image archive**: full-resolution and 0.6x scaled PNG copies
//! - **Database**: one row per frame, keyed by sequence, PNG embedded
//!
//! ## Architecture
//!
//! ```text
//! Staging dir              Orchestrator                     Sinks
//! ┌──────────────┐        ┌──────────────┐        ┌────────────────────┐
//! │ 0.png        │        │ Frame        │───────▶│ JSON metadata log  │
//! │ 1.png        │───────▶│ Source       │   │    └────────────────────┘
//! │ ...          │        └──────────────┘   │    ┌────────────────────┐
//! └──────────────┘               │           ├───▶│ Queue (Kafka)      │
//!                                ▼           │    └────────────────────┘
//!                         ┌──────────────┐   │    ┌────────────────────┐
//!                         │ Transform +  │───┼───▶│ PNG archive        │
//!                         │ Metadata     │   │    └────────────────────┘
//!                         └──────────────┘   │    ┌────────────────────┐
//!                                            └───▶│ PostgreSQL         │
//!                                                 │ camera_src         │
//!                                                 └────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod file_archive;
pub mod frame;
pub mod frame_source;
pub mod metadata;
pub mod pipeline;
pub mod queue_sink;
pub mod relational;
pub mod report;
pub mod staging;
pub mod transform;

pub use config::Config;
pub use error::{PipelineError, SinkError, SinkErrorKind, SourceError};
pub use file_archive::FileArchiveSink;
pub use frame::{Frame, PixelFormat};
pub use frame_source::{EmulatedCamera, FrameSource, Grab, SourceOptions};
pub use metadata::{FrameRecord, MetadataGenerator};
pub use pipeline::PipelineOrchestrator;
pub use queue_sink::{KafkaTransport, QueueSink, QueueTransport};
pub use relational::{FrameRow, FrameTable, PostgresFrameTable, RelationalSink, SchemaStatus};
pub use report::{FrameReport, RunReport, Sink, SinkOutcome, Termination};
pub use transform::ImageTransformer;
