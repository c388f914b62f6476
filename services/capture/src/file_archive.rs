use crate::config::ArchiveConfig;
use crate::error::SinkError;
use crate::frame::Frame;
use crate::metadata::FrameRecord;
use crate::report::SinkOutcome;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const SCALED_PREFIX: &str = "scaled_";

/// Local archive of every frame: full-resolution and scaled PNG files plus an
/// append-only JSON-lines metadata log.
#[derive(Debug, Clone)]
pub struct FileArchiveSink {
    archive_dir: PathBuf,
    log_dir: PathBuf,
    metadata_log: PathBuf,
}

impl FileArchiveSink {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            archive_dir: config.archive_dir.clone(),
            log_dir: config.log_dir.clone(),
            metadata_log: config.metadata_log_path(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn metadata_log_path(&self) -> &Path {
        &self.metadata_log
    }

    /// Path of the scaled copy for `file_name`.
    pub fn scaled_path(&self, file_name: &str) -> PathBuf {
        self.archive_dir.join(format!("{SCALED_PREFIX}{file_name}"))
    }

    /// Create the archive and log directories.
    ///
    /// Failure only leaves later writes to fail per frame, so it is logged
    /// and reported rather than raised.
    pub async fn prepare(&self) -> Result<(), SinkError> {
        for dir in [&self.archive_dir, &self.log_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to create archive directory");
                return Err(e.into());
            }
        }
        info!(
            archive_dir = %self.archive_dir.display(),
            metadata_log = %self.metadata_log.display(),
            "File archive ready"
        );
        Ok(())
    }

    /// Append `record` as one JSON line to the metadata log.
    #[instrument(skip(self, record), fields(sequence = record.sequence))]
    pub async fn append_metadata(&self, record: &FrameRecord) -> SinkOutcome {
        let result = self.try_append(record).await;
        match &result {
            Ok(()) => debug!(file_name = %record.file_name, "Metadata appended"),
            Err(e) => warn!(
                file_name = %record.file_name,
                path = %self.metadata_log.display(),
                error = %e,
                "Metadata logging failed"
            ),
        }
        result.into()
    }

    async fn try_append(&self, record: &FrameRecord) -> Result<(), SinkError> {
        let mut line = record.to_json()?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.metadata_log)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Write the full-resolution frame as `file_name` and the scaled frame as
    /// `scaled_<file_name>` in the archive directory.
    #[instrument(skip(self, frame, scaled), fields(file_name = %file_name))]
    pub async fn store_images(&self, frame: &Frame, scaled: &Frame, file_name: &str) -> SinkOutcome {
        let full = self
            .write_png(frame, self.archive_dir.join(file_name))
            .await;
        let small = self.write_png(scaled, self.scaled_path(file_name)).await;

        // Both writes are attempted; the first failure is reported.
        let result = full.and(small);
        match &result {
            Ok(()) => debug!("Images archived"),
            Err(e) => warn!(error = %e, "Image archiving failed"),
        }
        result.into()
    }

    async fn write_png(&self, frame: &Frame, path: PathBuf) -> Result<(), SinkError> {
        let png = frame.encode_png_blocking().await?;
        tokio::fs::write(&path, png)
            .await
            .map_err(|e| SinkError::io(format!("{}: {}", path.display(), e)))
    }
}
