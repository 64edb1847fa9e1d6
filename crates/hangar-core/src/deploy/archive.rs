//! Archive validation and sandboxed extraction.
//!
//! Extraction runs in two passes over the in-memory artifact:
//! 1. every entry header is checked (path confinement, entry type, total
//!    unpacked size) without touching disk
//! 2. only if the whole archive passed, entries are unpacked under the destination
//!
//! So a single escaping entry, or a gzip bomb, rejects the upload with nothing written.

use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::domain::errors::ValidationError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;

/// Recognised archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the file name and verify it against the content.
    pub fn detect(filename: &str, bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::new("empty_artifact", "uploaded artifact is empty"));
        }
        let lower = filename.to_ascii_lowercase();
        let format = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if lower.ends_with(".tar") {
            ArchiveFormat::Tar
        } else {
            return Err(ValidationError::new(
                "unsupported_archive",
                format!("{filename:?} is not a .tar, .tar.gz or .tgz archive"),
            ));
        };

        let content_ok = match format {
            ArchiveFormat::TarGz => bytes.starts_with(&GZIP_MAGIC),
            ArchiveFormat::Tar => bytes
                .get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len())
                .is_some_and(|magic| magic == USTAR_MAGIC),
        };
        if !content_ok {
            return Err(ValidationError::new(
                "corrupt_archive",
                format!("{filename:?} content does not match its extension"),
            ));
        }
        Ok(format)
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    fn open(self, bytes: &[u8]) -> Archive<Box<dyn Read + '_>> {
        let reader: Box<dyn Read + '_> = match self {
            ArchiveFormat::Tar => Box::new(bytes),
            ArchiveFormat::TarGz => Box::new(GzDecoder::new(bytes)),
        };
        Archive::new(reader)
    }
}

/// Strip a known archive suffix from an upload name.
pub fn file_stem(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let lower = base.to_ascii_lowercase();
    for suffix in [".tar.gz", ".tgz", ".tar"] {
        if lower.ends_with(suffix) {
            return &base[..base.len() - suffix.len()];
        }
    }
    base
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    /// Sum of the declared sizes of unpacked entries.
    pub bytes: u64,
}

fn corrupt(e: impl std::fmt::Display) -> ValidationError {
    ValidationError::new("corrupt_archive", format!("cannot read archive: {e}"))
}

/// Path stays inside the destination: only normal components (and `.`).
pub(crate) fn is_confined(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

enum EntryAction {
    Unpack,
    Skip,
}

fn classify(entry_type: EntryType, path: &Path) -> Result<EntryAction, ValidationError> {
    match entry_type {
        EntryType::XHeader | EntryType::XGlobalHeader | EntryType::GNULongName => {
            return Ok(EntryAction::Skip);
        }
        EntryType::Regular | EntryType::Continuous | EntryType::Directory => {}
        other => {
            return Err(ValidationError::new(
                "unsupported_entry",
                format!("entry {} has unsupported type {other:?}", path.display()),
            ));
        }
    }
    if path.as_os_str().is_empty() {
        return Ok(EntryAction::Skip);
    }
    if !is_confined(path) {
        return Err(ValidationError::new(
            "path_traversal",
            format!("entry {} escapes the destination directory", path.display()),
        ));
    }
    Ok(EntryAction::Unpack)
}

/// Check every entry without writing anything.
///
/// `max_unpacked_bytes` bounds the sum of entry sizes, whatever the compressed size.
pub fn validate(
    bytes: &[u8],
    format: ArchiveFormat,
    max_unpacked_bytes: u64,
) -> Result<ExtractSummary, ValidationError> {
    let mut archive = format.open(bytes);
    let mut summary = ExtractSummary::default();
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        let entry_type = entry.header().entry_type();
        if let EntryAction::Unpack = classify(entry_type, &path)? {
            if entry_type.is_dir() {
                summary.dirs += 1;
            } else {
                summary.files += 1;
                summary.bytes = summary.bytes.saturating_add(entry.size());
            }
            if summary.bytes > max_unpacked_bytes {
                return Err(ValidationError::new(
                    "artifact_too_large",
                    format!("archive unpacks to more than {max_unpacked_bytes} bytes"),
                ));
            }
        }
    }
    if summary.files == 0 {
        return Err(ValidationError::new("empty_archive", "archive contains no files"));
    }
    Ok(summary)
}

/// Validate, then unpack into `dest` (created if missing).
pub fn extract(
    bytes: &[u8],
    format: ArchiveFormat,
    dest: &Path,
    max_unpacked_bytes: u64,
) -> Result<ExtractSummary, ValidationError> {
    let summary = validate(bytes, format, max_unpacked_bytes)?;

    std::fs::create_dir_all(dest).map_err(|e| {
        ValidationError::new("extract_failed", format!("cannot create {}: {e}", dest.display()))
    })?;

    let mut archive = format.open(bytes);
    archive.set_preserve_permissions(false);
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        if let EntryAction::Skip = classify(entry.header().entry_type(), &path)? {
            continue;
        }
        let unpacked = entry.unpack_in(dest).map_err(|e| {
            ValidationError::new("extract_failed", format!("{}: {e}", path.display()))
        })?;
        if !unpacked {
            return Err(ValidationError::new(
                "path_traversal",
                format!("entry {} escapes the destination directory", path.display()),
            ));
        }
    }
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Archive builders shared by tests.

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn header(path: &str, len: usize) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_size(len as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        // write the raw name so `..` survives (set_path refuses it)
        let name = &mut header.as_old_mut().name;
        name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_cksum();
        header
    }

    pub fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, body) in files {
            let header = header(path, body.len());
            builder.append(&header, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub fn tar_gz_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes(files)).unwrap();
        encoder.finish().unwrap()
    }
}
