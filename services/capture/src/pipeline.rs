//! Per-run orchestration: set up the sinks, drive the frame source, fan each
//! frame out, tear everything down.
//!
//! ```text
//! INIT -> SCHEMA_READY -> GRABBING -> (per frame) -> DRAINED -> CLOSED
//! ```

use crate::config::Config;
use crate::error::{PipelineError, SourceError};
use crate::file_archive::FileArchiveSink;
use crate::frame::Frame;
use crate::frame_source::{FrameSource, Grab, SourceOptions};
use crate::metadata::{file_name_for, MetadataGenerator};
use crate::queue_sink::QueueSink;
use crate::relational::{DbSession, FrameTable, RelationalSink};
use crate::report::{FrameReport, RunReport, Sink, SinkOutcome, Termination};
use crate::staging;
use crate::transform::ImageTransformer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Drives one acquisition run over a frame source and the four sinks.
pub struct PipelineOrchestrator<T: FrameTable, S: FrameSource> {
    config: Config,
    source: S,
    database: RelationalSink<T>,
    queue: QueueSink,
    archive: FileArchiveSink,
    transformer: ImageTransformer,
    metadata: MetadataGenerator,
    source_open: bool,
}

impl<T: FrameTable, S: FrameSource> PipelineOrchestrator<T, S> {
    pub fn new(config: Config, source: S, table: T, queue: QueueSink) -> Self {
        let archive = FileArchiveSink::new(&config.archive);
        let metadata = MetadataGenerator::new(archive.archive_dir());
        let transformer = ImageTransformer::new(config.processing.scale_factor);
        let database = RelationalSink::from_config(table, &config.database);

        Self {
            config,
            source,
            database,
            queue,
            archive,
            transformer,
            metadata,
            source_open: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &RelationalSink<T> {
        &self.database
    }

    pub fn archive(&self) -> &FileArchiveSink {
        &self.archive
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the pipeline once.
    ///
    /// Only a database session that cannot be opened fails the call. Anything
    /// later, including a source malfunction, is recorded in the returned
    /// report; frames persisted before it stay persisted.
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("capture_run", run_id = %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        info!("Capture run starting");

        // INIT
        let session = self.database.open_session().await.map_err(|e| {
            error!(error = %e, "Failed to open database session");
            PipelineError::Database(e)
        })?;

        if self.config.camera.generate_test_pattern {
            let camera = &self.config.camera;
            if let Err(e) = staging::generate_test_pattern(
                camera.staging_dir(),
                camera.test_pattern_count,
                camera.test_pattern_width,
                camera.test_pattern_height,
            )
            .await
            {
                warn!(error = %e, "Test pattern generation failed");
            }
        }

        // SCHEMA_READY
        if let Err(e) = self.database.ensure_schema(&session).await {
            warn!(error = %e, "Schema setup failed, continuing");
        }
        // Failure is already logged; writes report it per frame.
        let _ = self.archive.prepare().await;

        // GRABBING
        let mut report = RunReport::new(run_id);
        match self.acquire(&session, &mut report.frames).await {
            Ok(termination) => report.termination = termination,
            Err(e) => {
                let e = PipelineError::from(e);
                error!(error = %e, frames = report.frames.len(), "Run aborted");
                report.failure = Some(e.to_string());
            }
        }

        // DRAINED
        self.drain().await;

        // CLOSED
        self.database.close_session(session).await;

        info!(
            frames = report.frame_count(),
            termination = ?report.termination,
            database_written = report.written(Sink::Database),
            queue_failed = report.failed(Sink::Queue),
            "Capture run finished"
        );
        Ok(report)
    }

    async fn acquire(
        &mut self,
        session: &DbSession<T::Connection>,
        frames: &mut Vec<FrameReport>,
    ) -> Result<Termination, SourceError> {
        let staging_dir = self.config.camera.staging_dir();
        let count = staging::count_frames(staging_dir)
            .await
            .map_err(|e| SourceError::Staging(format!("{}: {}", staging_dir.display(), e)))?;

        self.source.open().await?;
        self.source_open = true;
        self.source
            .configure(&SourceOptions::file_emulation(
                self.config.camera.pixel_format,
            ))
            .await?;
        self.source.start_grab(count).await?;

        let timeout = self.config.camera.retrieve_timeout();
        let mut sequence: u64 = 0;

        while self.source.is_grabbing() {
            match self.source.retrieve(timeout).await? {
                Grab::Frame(frame) => {
                    frames.push(self.process(session, Some(&frame), sequence).await);
                    sequence += 1;
                }
                Grab::Empty => {
                    warn!(sequence = sequence, "Grab carried no image");
                    frames.push(self.process(session, None, sequence).await);
                    sequence += 1;
                }
                Grab::TimedOut => {
                    info!(frames = sequence, "No further frames within timeout");
                    return Ok(Termination::TimedOut);
                }
                Grab::Failed { reason } => {
                    warn!(sequence = sequence, reason = %reason, "Grab failed, stopping");
                    return Ok(Termination::GrabFailed { message: reason });
                }
            }
        }

        Ok(Termination::Exhausted)
    }

    async fn process(
        &self,
        session: &DbSession<T::Connection>,
        frame: Option<&Frame>,
        sequence: u64,
    ) -> FrameReport {
        let report = match frame {
            Some(frame) => self.fan_out(session, frame, sequence).await,
            None => None,
        };

        let report = report.unwrap_or_else(|| {
            info!(sequence = sequence, "No metadata for frame, sinks skipped");
            let skipped = SinkOutcome::skipped("no metadata");
            FrameReport {
                sequence,
                file_name: file_name_for(sequence),
                metadata_log: skipped.clone(),
                queue: skipped.clone(),
                image_archive: skipped.clone(),
                database: skipped,
            }
        });

        for sink in [Sink::MetadataLog, Sink::Queue, Sink::ImageArchive, Sink::Database] {
            report.outcome(sink).record(sink);
        }
        metrics::counter!("capture.frames.processed").increment(1);

        report
    }

    async fn fan_out(
        &self,
        session: &DbSession<T::Connection>,
        frame: &Frame,
        sequence: u64,
    ) -> Option<FrameReport> {
        let scaled = self.transformer.scale_blocking(frame).await;
        let record = self.metadata.generate(Some(frame), sequence)?;

        let (metadata_log, queue) = tokio::join!(
            self.archive.append_metadata(&record),
            self.queue.publish(Some(&record)),
        );
        let image_archive = self
            .archive
            .store_images(frame, &scaled, &record.file_name)
            .await;
        let database = self.database.insert(session, frame, &record).await;

        Some(FrameReport {
            sequence,
            file_name: record.file_name,
            metadata_log,
            queue,
            image_archive,
            database,
        })
    }

    async fn drain(&mut self) {
        if !self.source_open {
            debug!("Frame source never opened, nothing to drain");
            return;
        }
        self.source_open = false;

        if let Err(e) = self.source.stop().await {
            warn!(error = %e, "Failed to stop frame source");
        }
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close frame source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ArchiveConfig, BrokerConfig, CameraConfig, DatabaseConfig, ProcessingConfig,
        ServiceConfig,
    };
    use crate::error::{SinkError, SinkErrorKind};
    use crate::frame::PixelFormat;
    use crate::relational::{FrameRow, SchemaStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Ledger {
        ids: Vec<i64>,
        closed: bool,
        stall_connect: bool,
    }

    /// Table that records inserted ids and whether the session was closed.
    #[derive(Clone, Default)]
    struct LedgerTable(Arc<Mutex<Ledger>>);

    #[async_trait]
    impl FrameTable for LedgerTable {
        type Connection = ();

        async fn connect(&self) -> Result<(), SinkError> {
            let stall = self.0.lock().unwrap().stall_connect;
            if stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        }

        async fn ensure_schema(&self, _conn: &mut ()) -> Result<SchemaStatus, SinkError> {
            Ok(SchemaStatus::Created)
        }

        async fn insert(&self, _conn: &mut (), row: &FrameRow) -> Result<(), SinkError> {
            self.0.lock().unwrap().ids.push(row.id);
            Ok(())
        }

        async fn close(&self, _conn: ()) -> Result<(), SinkError> {
            self.0.lock().unwrap().closed = true;
            Ok(())
        }
    }

    /// Source replaying a fixed list of retrieve results.
    struct ScriptedSource {
        script: VecDeque<Result<Grab, SourceError>>,
        grabbing: bool,
        closed: Arc<Mutex<bool>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Grab, SourceError>>) -> Self {
            Self {
                script: script.into(),
                grabbing: false,
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        async fn configure(&mut self, _options: &SourceOptions) -> Result<(), SourceError> {
            Ok(())
        }

        async fn start_grab(&mut self, _max_count: u64) -> Result<(), SourceError> {
            self.grabbing = !self.script.is_empty();
            Ok(())
        }

        fn is_grabbing(&self) -> bool {
            self.grabbing
        }

        async fn retrieve(&mut self, _timeout: Duration) -> Result<Grab, SourceError> {
            let next = self.script.pop_front().unwrap_or(Ok(Grab::TimedOut));
            self.grabbing = !self.script.is_empty();
            next
        }

        async fn stop(&mut self) -> Result<(), SourceError> {
            self.grabbing = false;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SourceError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn test_config(root: &Path) -> Config {
        std::fs::create_dir_all(root.join("staging")).unwrap();
        Config {
            service: ServiceConfig::default(),
            broker: BrokerConfig {
                enabled: false,
                ..BrokerConfig::default()
            },
            database: DatabaseConfig {
                user: "capture".to_string(),
                password: "capture".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                name: "capture".to_string(),
                connect_timeout_secs: 1,
                statement_timeout_secs: 1,
            },
            archive: ArchiveConfig {
                archive_dir: root.join("logger"),
                log_dir: root.join("json"),
                metadata_log_file: "logger.json".to_string(),
            },
            processing: ProcessingConfig::default(),
            camera: CameraConfig {
                staging_dir: root.join("staging"),
                generate_test_pattern: false,
                ..CameraConfig::default()
            },
        }
    }

    fn frame() -> Frame {
        Frame::new(10, 5, PixelFormat::Mono8, vec![7u8; 50]).unwrap()
    }

    #[tokio::test]
    async fn test_empty_grab_consumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let table = LedgerTable::default();
        let source = ScriptedSource::new(vec![
            Ok(Grab::Frame(frame())),
            Ok(Grab::Empty),
            Ok(Grab::Frame(frame())),
        ]);

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            table.clone(),
            QueueSink::disabled(),
        );
        let report = pipeline.run().await.unwrap();

        let sequences: Vec<u64> = report.frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(report.frames[1].database, SinkOutcome::skipped("no metadata"));
        assert_eq!(report.frames[1].file_name, "IMG_1.png");
        assert_eq!(table.0.lock().unwrap().ids, vec![0, 2]);
        assert_eq!(report.termination, Termination::Exhausted);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failed_grab_ends_loop_normally() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Ok(Grab::Frame(frame())),
            Ok(Grab::Failed {
                reason: "sensor fault".to_string(),
            }),
            Ok(Grab::Frame(frame())),
        ]);

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            LedgerTable::default(),
            QueueSink::disabled(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.frame_count(), 1);
        assert_eq!(
            report.termination,
            Termination::GrabFailed {
                message: "sensor fault".to_string()
            }
        );
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_malfunction_is_recorded_and_everything_closed() {
        let dir = tempfile::tempdir().unwrap();
        let table = LedgerTable::default();
        let source = ScriptedSource::new(vec![
            Ok(Grab::Frame(frame())),
            Err(SourceError::Malfunction("usb reset".to_string())),
        ]);
        let source_closed = source.closed.clone();

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            table.clone(),
            QueueSink::disabled(),
        );
        let report = pipeline.run().await.unwrap();

        assert!(!report.is_success());
        assert!(report.failure.as_deref().unwrap().contains("usb reset"));
        assert_eq!(report.termination, Termination::Aborted);
        assert_eq!(table.0.lock().unwrap().ids, vec![0]);
        assert!(table.0.lock().unwrap().closed);
        assert!(*source_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_queue_disabled_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![Ok(Grab::Frame(frame()))]);

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            LedgerTable::default(),
            QueueSink::disabled(),
        );
        let report = pipeline.run().await.unwrap();

        let only = &report.frames[0];
        assert!(matches!(only.queue, SinkOutcome::Skipped { .. }));
        assert!(only.metadata_log.is_written());
        assert!(only.image_archive.is_written());
        assert!(only.database.is_written());
    }

    #[tokio::test]
    async fn test_retrieve_timeout_ends_run_normally() {
        let dir = tempfile::tempdir().unwrap();
        let table = LedgerTable::default();
        let source = ScriptedSource::new(vec![
            Ok(Grab::Frame(frame())),
            Ok(Grab::TimedOut),
            Ok(Grab::Frame(frame())),
        ]);
        let source_closed = source.closed.clone();

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            table.clone(),
            QueueSink::disabled(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.frame_count(), 1);
        assert_eq!(report.termination, Termination::TimedOut);
        assert!(report.is_success());
        assert_eq!(table.0.lock().unwrap().ids, vec![0]);
        assert!(table.0.lock().unwrap().closed);
        assert!(*source_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_stalled_connect_fails_run_with_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let table = LedgerTable::default();
        table.0.lock().unwrap().stall_connect = true;
        let source = ScriptedSource::new(vec![Ok(Grab::Frame(frame()))]);
        let source_closed = source.closed.clone();

        let mut pipeline = PipelineOrchestrator::new(
            test_config(dir.path()),
            source,
            table.clone(),
            QueueSink::disabled(),
        );

        match pipeline.run().await {
            Err(PipelineError::Database(e)) => assert_eq!(e.kind, SinkErrorKind::Timeout),
            other => panic!("expected database timeout, got {other:?}"),
        }
        assert!(table.0.lock().unwrap().ids.is_empty());
        assert!(!*source_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_unopened_source_is_not_drained() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::remove_dir(config.camera.staging_dir()).unwrap();
        let table = LedgerTable::default();
        let source = ScriptedSource::new(vec![Ok(Grab::Frame(frame()))]);
        let source_closed = source.closed.clone();

        let mut pipeline =
            PipelineOrchestrator::new(config, source, table.clone(), QueueSink::disabled());
        let report = pipeline.run().await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.frame_count(), 0);
        assert!(!*source_closed.lock().unwrap());
        assert!(table.0.lock().unwrap().closed);
    }
}
