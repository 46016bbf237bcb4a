/// Archive reader: extracts an uploaded backup into a scratch directory
///
/// Entries are streamed one at a time out of the gzip/tar stream. Only the
/// known layout is materialized; anything else is logged and skipped so
/// archives from older format versions with extra entries still restore.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::BackupResult;
use super::manifest::Manifest;
use crate::utils::{IMAGES_DIR, LOGOS_DIR, MANIFEST_FILE, MAPS_DIR, README_FILE};

/// Result of an extraction pass
#[derive(Debug, Default, Clone)]
pub struct ExtractReport {
    pub files: usize,
    pub directories: usize,
    /// Entries left out, with the reason
    pub skipped: Vec<String>,
}

/// How an archive entry fits the expected layout
#[derive(Debug, PartialEq)]
enum EntryKind {
    Directory,
    File,
    Unexpected(&'static str),
}

fn classify_entry(relative: &Path, entry_type: tar::EntryType) -> EntryKind {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(p) => match p.to_str() {
                Some(s) => parts.push(s),
                None => return EntryKind::Unexpected("non UTF-8 path"),
            },
            Component::CurDir => {}
            _ => return EntryKind::Unexpected("path escapes the archive root"),
        }
    }
    let joined = parts.join("/");

    if entry_type.is_dir() {
        return if joined == IMAGES_DIR || joined == LOGOS_DIR || joined == MAPS_DIR {
            EntryKind::Directory
        } else {
            EntryKind::Unexpected("unknown directory")
        };
    }

    if !entry_type.is_file() {
        return EntryKind::Unexpected("not a regular file");
    }

    if joined == MANIFEST_FILE || joined == README_FILE {
        return EntryKind::File;
    }

    let in_asset_dir = [LOGOS_DIR, MAPS_DIR].iter().any(|dir| {
        joined
            .strip_prefix(dir)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|name| !name.is_empty() && !name.contains('/'))
            .unwrap_or(false)
    });

    if in_asset_dir {
        EntryKind::File
    } else {
        EntryKind::Unexpected("unknown file")
    }
}

pub struct ArchiveReader;

impl ArchiveReader {
    /// Extract `archive` into `dest` (which must exist) without blocking the runtime
    pub async fn extract(archive: &Path, dest: &Path) -> BackupResult<ExtractReport> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();

        let report = tokio::task::spawn_blocking(move || Self::extract_blocking(&archive, &dest)).await??;
        Ok(report)
    }

    /// Streaming extraction. Only failing to open the archive file is an
    /// error; damaged entries are skipped, a damaged stream ends the pass.
    pub fn extract_blocking(archive: &Path, dest: &Path) -> BackupResult<ExtractReport> {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        tar.set_preserve_permissions(false);
        tar.set_overwrite(true);

        let mut report = ExtractReport::default();

        let entries = match tar.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Archive stream unreadable");
                report.skipped.push(format!("archive stream: {}", e));
                return Ok(report);
            }
        };

        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The stream position is lost; nothing after this is trustworthy
                    warn!(error = %e, "Archive stream damaged, stopping extraction");
                    report.skipped.push(format!("archive stream: {}", e));
                    break;
                }
            };

            let relative: PathBuf = match entry.path() {
                Ok(p) => p.into_owned(),
                Err(e) => {
                    warn!(error = %e, "Skipping entry with unreadable path");
                    report.skipped.push(format!("<unreadable path>: {}", e));
                    continue;
                }
            };

            match classify_entry(&relative, entry.header().entry_type()) {
                EntryKind::Unexpected(reason) => {
                    warn!(entry = %relative.display(), reason, "Skipping unexpected archive entry");
                    report.skipped.push(format!("{}: {}", relative.display(), reason));
                    continue;
                }
                EntryKind::Directory => {
                    if let Err(e) = std::fs::create_dir_all(dest.join(&relative)) {
                        warn!(entry = %relative.display(), error = %e, "Failed to create directory");
                        report.skipped.push(format!("{}: {}", relative.display(), e));
                    } else {
                        report.directories += 1;
                    }
                    continue;
                }
                EntryKind::File => {}
            }

            // Parents first, whether or not the archive listed them
            if let Some(parent) = relative.parent() {
                if let Err(e) = std::fs::create_dir_all(dest.join(parent)) {
                    warn!(entry = %relative.display(), error = %e, "Failed to create parent directory");
                    report.skipped.push(format!("{}: {}", relative.display(), e));
                    continue;
                }
            }

            match entry.unpack_in(dest) {
                Ok(true) => {
                    debug!(entry = %relative.display(), "Extracted");
                    report.files += 1;
                }
                Ok(false) => {
                    warn!(entry = %relative.display(), "Entry would escape scratch dir, skipped");
                    report.skipped.push(format!("{}: outside destination", relative.display()));
                }
                Err(e) => {
                    warn!(entry = %relative.display(), error = %e, "Failed to extract entry");
                    report.skipped.push(format!("{}: {}", relative.display(), e));
                }
            }
        }

        info!(
            files = report.files,
            skipped = report.skipped.len(),
            "Archive extracted"
        );
        Ok(report)
    }

    /// Parse the extracted manifest; absent or malformed is `CorruptArchive`
    pub async fn parse_manifest(dir: &Path) -> BackupResult<Manifest> {
        Manifest::load_from_dir(dir).await
    }

    /// One error per indexed image that is not actually in the archive
    pub async fn missing_assets(dir: &Path, manifest: &Manifest) -> Vec<String> {
        let mut errors = Vec::new();

        for (slot, shop_id, path) in manifest.images.entries() {
            let expected_prefix = format!("{}/", slot.archive_dir());
            let well_formed = path.starts_with(&expected_prefix)
                && Path::new(path)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));

            let present = well_formed
                && tokio::fs::metadata(dir.join(path))
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);

            if !present {
                errors.push(format!(
                    "Missing {} for shop {}: {} not found in archive",
                    slot, shop_id, path
                ));
            }
        }

        errors
    }
}
