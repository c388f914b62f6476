//! Per-frame metadata derivation.

use crate::frame::Frame;
use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "IMG_";
const FILE_EXTENSION: &str = ".png";

/// Timestamp layout used in the metadata log, the queue payload and the
/// database.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Metadata describing one captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Correlation key shared by every sink
    pub sequence: u64,
    /// Local capture time, whole seconds
    #[serde(with = "timestamp_serde")]
    pub captured_at: NaiveDateTime,
    /// `IMG_<sequence>.png`
    pub file_name: String,
    /// `<width>:<height>`
    pub dimensions: String,
    /// Directory receiving the full-resolution copy
    pub archive_path: PathBuf,
}

impl FrameRecord {
    /// Capture timestamp in the `DD/MM/YYYY HH:MM:SS` form.
    pub fn time_code(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Serialize the record as a single JSON document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod timestamp_serde {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// File name assigned to the frame with the given sequence.
pub fn file_name_for(sequence: u64) -> String {
    format!("{FILE_PREFIX}{sequence}{FILE_EXTENSION}")
}

/// Recover the sequence embedded in a frame file name.
///
/// Accepts any number of digits; returns `None` for names not produced by
/// [`file_name_for`].
pub fn parse_sequence(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Derives a [`FrameRecord`] from a grabbed frame.
#[derive(Debug, Clone)]
pub struct MetadataGenerator {
    archive_path: PathBuf,
}

impl MetadataGenerator {
    pub fn new(archive_path: impl AsRef<Path>) -> Self {
        Self {
            archive_path: archive_path.as_ref().to_path_buf(),
        }
    }

    /// Describe `frame`, stamping it with the current local time.
    ///
    /// Returns `None` when there is no frame; callers treat that as the
    /// "no metadata" case.
    pub fn generate(&self, frame: Option<&Frame>, sequence: u64) -> Option<FrameRecord> {
        let captured_at = Local::now().naive_local();
        self.generate_at(frame, sequence, captured_at)
    }

    /// Same as [`generate`](Self::generate) with an explicit capture time.
    pub fn generate_at(
        &self,
        frame: Option<&Frame>,
        sequence: u64,
        captured_at: NaiveDateTime,
    ) -> Option<FrameRecord> {
        let frame = frame?;

        Some(FrameRecord {
            sequence,
            captured_at: captured_at.with_nanosecond(0).unwrap_or(captured_at),
            file_name: file_name_for(sequence),
            dimensions: frame.dimensions(),
            archive_path: self.archive_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use chrono::NaiveDate;

    fn test_frame(width: u32, height: u32) -> Frame {
        Frame::new(
            width,
            height,
            PixelFormat::Mono8,
            vec![7u8; (width * height) as usize],
        )
        .unwrap()
    }

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_milli_opt(10, 30, 45, 789)
            .unwrap()
    }

    #[test]
    fn test_file_name_has_no_padding() {
        assert_eq!(file_name_for(0), "IMG_0.png");
        assert_eq!(file_name_for(7), "IMG_7.png");
        assert_eq!(file_name_for(12345), "IMG_12345.png");
    }

    #[test]
    fn test_parse_sequence_recovers_any_width() {
        for sequence in [0u64, 9, 10, 99, 100, 123_456_789, u64::MAX] {
            assert_eq!(parse_sequence(&file_name_for(sequence)), Some(sequence));
        }
    }

    #[test]
    fn test_parse_sequence_rejects_foreign_names() {
        assert_eq!(parse_sequence("scaled_IMG_3.png"), None);
        assert_eq!(parse_sequence("IMG_.png"), None);
        assert_eq!(parse_sequence("IMG_3.jpg"), None);
        assert_eq!(parse_sequence("IMG_-3.png"), None);
        assert_eq!(parse_sequence("IMG_+3.png"), None);
    }

    #[test]
    fn test_generate_without_frame_is_none() {
        let generator = MetadataGenerator::new("./logger");
        assert!(generator.generate(None, 0).is_none());
    }

    #[test]
    fn test_generate_records_dimensions() {
        let generator = MetadataGenerator::new("./logger");
        let frame = test_frame(640, 480);

        let record = generator.generate(Some(&frame), 4).unwrap();
        assert_eq!(record.dimensions, "640:480");
        assert_eq!(record.file_name, "IMG_4.png");
        assert_eq!(record.sequence, 4);
        assert_eq!(record.archive_path, PathBuf::from("./logger"));
    }

    #[test]
    fn test_timestamp_truncated_to_seconds() {
        let generator = MetadataGenerator::new("./logger");
        let frame = test_frame(2, 2);

        let record = generator.generate_at(Some(&frame), 0, fixed_time()).unwrap();
        assert_eq!(record.captured_at.nanosecond(), 0);
        assert_eq!(record.time_code(), "15/01/2024 10:30:45");
    }

    #[test]
    fn test_json_shape() {
        let generator = MetadataGenerator::new("./logger");
        let frame = test_frame(3, 2);
        let record = generator.generate_at(Some(&frame), 1, fixed_time()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["sequence"], 1);
        assert_eq!(value["captured_at"], "15/01/2024 10:30:45");
        assert_eq!(value["file_name"], "IMG_1.png");
        assert_eq!(value["dimensions"], "3:2");

        let parsed: FrameRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
