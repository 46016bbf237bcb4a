/// Archive builder: streams a gzip-compressed tar into an async sink
///
/// Layout:
///   images/
///   images/logos/<id>.<ext>
///   images/maps/<id>.<ext>
///   backup-data.json
///   README.md
///
/// Entries go into a tar writer wrapped in a gzip encoder whose output
/// buffer is drained to the sink after every entry, so at most one entry's
/// worth of compressed bytes sits in memory.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::assets::FetchedAsset;
use super::error::{BackupError, BackupResult};
use super::manifest::{AssetSlot, BackupKind, ImageIndex, Manifest, Shop};
use crate::utils::{
    ARCHIVE_COMPRESSION_LEVEL, FORMAT_VERSION, IMAGES_DIR, LOGOS_DIR, MANIFEST_FILE, MAPS_DIR,
    README_FILE,
};

/// What ended up in a finished archive
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub manifest: Manifest,
    pub bytes_written: u64,
}

pub struct ArchiveBuilder<W> {
    tar: tar::Builder<GzEncoder<Vec<u8>>>,
    sink: W,
    index: ImageIndex,
    /// Lowercased archive paths already written, so sanitized ids that
    /// collide (also on case-insensitive filesystems) get distinct files
    used_paths: HashSet<String>,
    bytes_written: u64,
    mtime: u64,
}

impl<W: AsyncWrite + Unpin> ArchiveBuilder<W> {
    /// Start an archive: writes the directory entries right away
    pub async fn start(sink: W) -> BackupResult<Self> {
        let encoder = GzEncoder::new(Vec::new(), Compression::new(ARCHIVE_COMPRESSION_LEVEL));
        let mut builder = Self {
            tar: tar::Builder::new(encoder),
            sink,
            index: ImageIndex::default(),
            used_paths: HashSet::new(),
            bytes_written: 0,
            mtime: chrono::Utc::now().timestamp().max(0) as u64,
        };

        for dir in [IMAGES_DIR, LOGOS_DIR, MAPS_DIR] {
            builder.append_dir(dir)?;
        }
        builder.drain().await?;

        Ok(builder)
    }

    /// Add one image and record it in the index. Returns the archive path,
    /// or `None` when the shop already has an image in this slot.
    pub async fn append_asset(
        &mut self,
        slot: AssetSlot,
        shop_id: &str,
        asset: &FetchedAsset,
    ) -> BackupResult<Option<String>> {
        if self.index.slot(slot).contains_key(shop_id) {
            warn!(shop_id, %slot, "Duplicate shop id, keeping the first image only");
            return Ok(None);
        }

        let path = self.unique_path(slot, shop_id, &asset.extension);
        self.append_file(&path, &asset.bytes)?;
        self.drain().await?;

        debug!(path = %path, size = asset.bytes.len(), "Archived image");
        self.index.insert(slot, shop_id.to_string(), path.clone());

        Ok(Some(path))
    }

    /// Images archived so far
    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    /// Write manifest and README, close the gzip stream and flush the sink
    pub async fn finish(mut self, shops: Vec<Shop>) -> BackupResult<(BuiltArchive, W)> {
        let index = std::mem::take(&mut self.index);
        let manifest = Manifest::new(shops, index, BackupKind::Full);

        let manifest_json = manifest.to_pretty_json()?;
        self.append_file(MANIFEST_FILE, &manifest_json)?;
        self.append_file(README_FILE, readme_text(&manifest).as_bytes())?;
        self.drain().await?;

        let encoder = self.tar.into_inner()?;
        let tail = encoder.finish()?;
        self.sink.write_all(&tail).await.map_err(BackupError::Sink)?;
        self.sink.flush().await.map_err(BackupError::Sink)?;
        self.bytes_written += tail.len() as u64;

        Ok((
            BuiltArchive {
                manifest,
                bytes_written: self.bytes_written,
            },
            self.sink,
        ))
    }

    /// `images/<slot>/<id>.<ext>`, or `<id>-N.<ext>` when that name is taken
    fn unique_path(&mut self, slot: AssetSlot, shop_id: &str, extension: &str) -> String {
        let mut path = slot.archive_path(shop_id, extension);
        let mut n = 2;
        while !self.used_paths.insert(path.to_lowercase()) {
            path = slot.archive_path(&format!("{}-{}", shop_id, n), extension);
            n += 1;
        }
        path
    }

    fn append_dir(&mut self, path: &str) -> io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(self.mtime);
        self.tar.append_data(&mut header, format!("{}/", path), io::empty())
    }

    fn append_file(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.tar.append_data(&mut header, path, data)
    }

    /// Move whatever the encoder has produced so far into the sink
    async fn drain(&mut self) -> BackupResult<()> {
        let chunk = std::mem::take(self.tar.get_mut().get_mut());
        if chunk.is_empty() {
            return Ok(());
        }

        self.sink.write_all(&chunk).await.map_err(BackupError::Sink)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }
}

fn readme_text(manifest: &Manifest) -> String {
    format!(
        "# Shop Directory Backup\n\
         \n\
         Created: {timestamp}\n\
         Format version: {version}\n\
         Shops: {shops}\n\
         Logos: {logos}\n\
         Maps: {maps}\n\
         \n\
         ## Contents\n\
         \n\
         - `{manifest_file}`: every shop record plus the image index\n\
         - `{logos_dir}/`: shop logos, named `<shop id>.<ext>`\n\
         - `{maps_dir}/`: shop map images, named `<shop id>.<ext>`\n\
         \n\
         ## Restoring\n\
         \n\
         Upload this archive unchanged on the admin backup page, or run\n\
         `shopdir-backup backup restore <archive>`.\n\
         \n\
         Images are uploaded again and shops are recreated with new ids.\n\
         Existing shops are left untouched, so restoring twice creates duplicates.\n",
        timestamp = manifest.metadata.timestamp.to_rfc3339(),
        version = FORMAT_VERSION,
        shops = manifest.metadata.total_shops,
        logos = manifest.images.logos.len(),
        maps = manifest.images.maps.len(),
        manifest_file = MANIFEST_FILE,
        logos_dir = LOGOS_DIR,
        maps_dir = MAPS_DIR,
    )
}
