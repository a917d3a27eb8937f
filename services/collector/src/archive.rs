//! Export archive extraction.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{ArchiveExtractor, ExtractionError};
use tracing::{debug, info};
use zip::ZipArchive;

/// Unpacks the single `.CSV` member of a zip export.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

fn is_feed_entry(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Blocking extraction; `extract` runs this on the blocking pool.
    pub fn unpack(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ExtractionError> {
        let display = archive.display().to_string();
        let corrupt = |e: zip::result::ZipError| ExtractionError::Corrupt {
            path: display.clone(),
            reason: e.to_string(),
        };

        let file = File::open(archive)?;
        let mut zip = ZipArchive::new(file).map_err(corrupt)?;

        let mut feed_entries = Vec::new();
        for i in 0..zip.len() {
            let entry = zip.by_index(i).map_err(corrupt)?;
            let Some(enclosed) = entry.enclosed_name() else {
                return Err(ExtractionError::UnsafeEntry {
                    name: entry.name().to_string(),
                });
            };
            debug!(entry = %entry.name(), size = entry.size(), "archive entry");
            if entry.is_file() && is_feed_entry(entry.name()) {
                feed_entries.push((i, enclosed));
            }
        }

        let (index, enclosed) = match feed_entries.len() {
            0 => {
                return Err(ExtractionError::NoFeedEntry {
                    path: display.clone(),
                })
            }
            1 => feed_entries.remove(0),
            count => {
                return Err(ExtractionError::AmbiguousEntries {
                    path: display.clone(),
                    count,
                })
            }
        };

        let file_name = enclosed
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ExtractionError::UnsafeEntry {
                name: enclosed.display().to_string(),
            })?;

        std::fs::create_dir_all(dest)?;
        let out_path = dest.join(file_name);
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        let mut out = File::create(&out_path)?;
        let written = io::copy(&mut entry, &mut out).map_err(|e| {
            // A bad deflate stream or CRC surfaces as an I/O error while copying.
            ExtractionError::Corrupt {
                path: display.clone(),
                reason: e.to_string(),
            }
        })?;

        info!(path = %out_path.display(), bytes = written, "Feed file extracted");
        Ok(out_path)
    }
}

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ExtractionError> {
        let this = *self;
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || this.unpack(&archive, &dest))
            .await
            .map_err(|e| ExtractionError::Io(io::Error::from(e)))?
    }
}
