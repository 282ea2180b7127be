//! Bundle archive decode/encode.
//!
//! The pipeline works on in-memory ZIP archives: the input bundle is decoded
//! into a flat set of entries for staging, and the signed tree is re-encoded
//! into a fresh archive. Entry names are normalized to forward-slash
//! relative paths with no leading slash; entries whose name sanitizes to
//! empty are skipped.
//!
//! # Examples
//!
//! ```no_run
//! use zsign_host::archive::unpack;
//!
//! # let archive_bytes: Vec<u8> = Vec::new();
//! let entries = unpack(&archive_bytes)?;
//! # Ok::<(), zsign_host::Error>(())
//! ```

use crate::workspace::normalize_relative_path;
use crate::Result;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// ZIP compression level for the output archive.
///
/// Controls the trade-off between encoding speed and output size. The
/// pipeline defaults to [`CompressionLevel::MAX`]; use
/// [`CompressionLevel::new`] for custom levels.
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0). Entries are stored verbatim.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Balanced compression (level 6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum compression (level 9). Smallest output, slowest encode.
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::MAX
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Payload of one decoded archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    Directory,
    File(Vec<u8>),
}

/// One entry of a decoded bundle archive.
///
/// `path` is already normalized: forward slashes, no leading slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub payload: EntryPayload,
}

/// Decodes a ZIP archive into its entries.
///
/// Directory entries are kept as [`EntryPayload::Directory`] markers so the
/// staging step can reproduce empty directories. Zero-length files decode as
/// zero-length [`EntryPayload::File`] payloads. Entries whose normalized
/// name is empty (a bare separator, for instance) are dropped.
///
/// # Errors
///
/// Returns [`Error::Zip`](crate::Error::Zip) when the bytes are not a valid
/// archive, and [`Error::Io`](crate::Error::Io) when an entry cannot be
/// read out.
pub fn unpack(archive_bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let path = normalize_relative_path(file.name());
        if path.is_empty() {
            continue;
        }

        let payload = if file.is_dir() {
            EntryPayload::Directory
        } else {
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            EntryPayload::File(bytes)
        };
        entries.push(ArchiveEntry { path, payload });
    }

    Ok(entries)
}

/// Encodes `(relative_path, bytes)` pairs into a fresh ZIP archive.
///
/// Parent directories are implied by entry paths; only regular files are
/// written, matching what the post-signing workspace walk produces.
pub fn pack<I>(files: I, compression_level: CompressionLevel) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let options = if compression_level.level() == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level.level() as i64))
    };

    for (path, bytes) in files {
        zip.start_file(&path, options)?;
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory("Payload/", options).unwrap();
        zip.add_directory("Payload/Test.app/", options).unwrap();
        zip.start_file("Payload/Test.app/Info.plist", options).unwrap();
        zip.write_all(b"<plist/>").unwrap();
        zip.start_file("Payload/Test.app/empty.txt", options).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn unpack_normalizes_and_keeps_markers() {
        let entries = unpack(&sample_archive()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "Payload",
                "Payload/Test.app",
                "Payload/Test.app/Info.plist",
                "Payload/Test.app/empty.txt",
            ]
        );
        assert_eq!(entries[0].payload, EntryPayload::Directory);
        assert_eq!(
            entries[2].payload,
            EntryPayload::File(b"<plist/>".to_vec())
        );
    }

    #[test]
    fn unpack_preserves_zero_length_files() {
        let entries = unpack(&sample_archive()).unwrap();
        let empty = entries
            .iter()
            .find(|e| e.path == "Payload/Test.app/empty.txt")
            .unwrap();
        assert_eq!(empty.payload, EntryPayload::File(Vec::new()));
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(unpack(b"not a zip file").is_err());
    }

    #[test]
    fn pack_then_unpack_is_identity_on_files() {
        let files = vec![
            ("a/b/one.bin".to_string(), vec![1u8, 2, 3]),
            ("a/empty.txt".to_string(), Vec::new()),
            ("top.txt".to_string(), b"hello".to_vec()),
        ];
        let packed = pack(files.clone(), CompressionLevel::MAX).unwrap();
        let entries = unpack(&packed).unwrap();

        let mut roundtripped: Vec<_> = entries
            .into_iter()
            .filter_map(|e| match e.payload {
                EntryPayload::File(bytes) => Some((e.path, bytes)),
                EntryPayload::Directory => None,
            })
            .collect();
        roundtripped.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(roundtripped, expected);
    }

    #[test]
    fn pack_stored_when_level_zero() {
        let packed = pack(
            vec![("f.txt".to_string(), b"data".to_vec())],
            CompressionLevel::NONE,
        )
        .unwrap();
        let mut archive = ZipArchive::new(Cursor::new(&packed[..])).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn compression_level_clamps() {
        assert_eq!(CompressionLevel::new(15).level(), 9);
        assert_eq!(CompressionLevel::from(5).level(), 5);
        assert_eq!(CompressionLevel::default().level(), 9);
    }
}
