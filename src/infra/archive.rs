//! Zip archive assembly for bulk exports.

use std::io::{Cursor, Write};

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::application::error::AppError;
use crate::application::export::{ArchiveEntry, ArchiveWriter};

#[derive(Debug, Clone, Copy)]
pub struct ZipArchiveWriter {
    compression: CompressionMethod,
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ZipArchiveWriter {
    pub fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write(&self, entries: &[ArchiveEntry]) -> Result<Bytes, AppError> {
        let options = SimpleFileOptions::default().compression_method(self.compression);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in entries {
            writer
                .start_file(entry.path.as_str(), options)
                .map_err(|err| AppError::archive(format!("{}: {err}", entry.path)))?;
            writer
                .write_all(&entry.content)
                .map_err(|err| AppError::archive(format!("{}: {err}", entry.path)))?;
        }

        let cursor = writer
            .finish()
            .map_err(|err| AppError::archive(err.to_string()))?;
        Ok(Bytes::from(cursor.into_inner()))
    }
}
