//! Local staging area the emulated camera grabs from.

use crate::frame::{Frame, PixelFormat};
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Staged frame files in grab order.
///
/// Files named by a number (`0.png`, `1.png`, ..., `10.png`) sort
/// numerically; any other names sort after them lexically.
pub async fn list_frames(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| compare_staged(a, b));
    Ok(files)
}

/// Number of frames available for one grab.
pub async fn count_frames(dir: &Path) -> io::Result<u64> {
    Ok(list_frames(dir).await?.len() as u64)
}

fn compare_staged(a: &Path, b: &Path) -> Ordering {
    let index = |p: &Path| {
        p.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
    };

    match (index(a), index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.file_name().cmp(&b.file_name()),
    }
}

/// One frame of the horizontal test pattern: every column holds
/// `column % 256`, shifted right by `shift` columns with wrap-around.
pub fn test_pattern(width: u32, height: u32, shift: u32) -> Frame {
    let channels = PixelFormat::Rgb8.channels();
    let mut row = Vec::with_capacity(width as usize * channels);
    for x in 0..width {
        let source_col = (x + width - shift % width) % width;
        let value = (source_col % 256) as u8;
        row.extend(std::iter::repeat(value).take(channels));
    }

    let data = row.repeat(height as usize);
    Frame::from_raw_parts(width, height, PixelFormat::Rgb8, data)
}

/// Fill `dir` with `count` test-pattern frames named `0.png` .. `<count-1>.png`.
pub async fn generate_test_pattern(
    dir: &Path,
    count: u32,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    for i in 0..count {
        let png = test_pattern(width, height, i).encode_png()?;
        let path = dir.join(format!("{i}.png"));
        tokio::fs::write(&path, png).await?;
        debug!(path = %path.display(), "Staged test pattern frame");
    }

    info!(
        dir = %dir.display(),
        count = count,
        width = width,
        height = height,
        "Test pattern generation finished"
    );

    Ok(())
}
