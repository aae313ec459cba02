//! Zip packaging of rendered files.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::Result;
use crate::models::{GeneratedArchive, GeneratedFile};

pub const ARCHIVE_FILENAME: &str = "generated-code.zip";
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Pack files in order, one entry per `path`. Entry timestamps are pinned so
/// the same files always produce the same bytes.
pub fn package(files: &[GeneratedFile]) -> Result<GeneratedArchive> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in files {
        writer.start_file(file.path.as_str(), options)?;
        writer.write_all(file.content.as_bytes())?;
    }
    let bytes = writer.finish()?.into_inner();

    Ok(GeneratedArchive {
        bytes,
        filename: ARCHIVE_FILENAME.to_string(),
        content_type: ARCHIVE_CONTENT_TYPE.to_string(),
    })
}
