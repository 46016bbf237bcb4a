/// Asset publisher: re-uploads extracted images to the object store
///
/// Works from what is actually on disk under `images/logos` and
/// `images/maps`. Each upload is independent; failures are collected and
/// the batch always runs to the end.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::StoreError;
use super::manifest::AssetSlot;
use super::objects::ObjectStore;

/// Merged result of a publish run
#[derive(Debug, Default, Clone)]
pub struct PublishOutcome {
    /// archive-relative path -> new stable reference
    pub mapping: HashMap<String, String>,
    pub logos_uploaded: usize,
    pub maps_uploaded: usize,
    pub errors: Vec<String>,
}

impl PublishOutcome {
    /// Fold one finished upload into the outcome
    fn record(&mut self, upload: AssetUpload) {
        match upload.result {
            Ok(object_ref) => {
                match upload.slot {
                    AssetSlot::Logo => self.logos_uploaded += 1,
                    AssetSlot::Map => self.maps_uploaded += 1,
                }
                self.mapping.insert(upload.archive_path, object_ref);
            }
            Err(e) => {
                warn!(path = %upload.archive_path, error = %e, "Image upload failed");
                self.errors.push(format!(
                    "Failed to upload {} {}: {}",
                    upload.slot, upload.archive_path, e
                ));
            }
        }
    }

    pub fn uploaded(&self) -> usize {
        self.logos_uploaded + self.maps_uploaded
    }
}

/// One file waiting to be uploaded
#[derive(Debug, Clone)]
struct PendingAsset {
    slot: AssetSlot,
    archive_path: String,
    file: PathBuf,
}

/// One finished upload
struct AssetUpload {
    slot: AssetSlot,
    archive_path: String,
    result: Result<String, StoreError>,
}

pub struct AssetPublisher {
    objects: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl AssetPublisher {
    pub fn new(objects: Arc<dyn ObjectStore>, concurrency: usize) -> Self {
        Self {
            objects,
            concurrency: concurrency.max(1),
        }
    }

    /// Upload every image found in the extracted archive
    pub async fn publish(&self, scratch: &Path) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        let mut pending = Vec::new();

        for slot in AssetSlot::ALL {
            match list_slot_files(scratch, slot).await {
                Ok(files) => pending.extend(files),
                Err(e) => outcome
                    .errors
                    .push(format!("Failed to read {} directory: {}", slot.archive_dir(), e)),
            }
        }

        info!(count = pending.len(), "Publishing archived images");

        let mut uploads = stream::iter(pending)
            .map(|asset| self.upload_one(asset))
            .buffer_unordered(self.concurrency);

        while let Some(upload) = uploads.next().await {
            outcome.record(upload);
        }

        outcome
    }

    async fn upload_one(&self, asset: PendingAsset) -> AssetUpload {
        let content_type = mime_guess::from_path(&asset.file).first_or_octet_stream();

        let result = async {
            let target = self.objects.request_upload_target().await?;
            self.objects
                .upload(&target, &asset.file, content_type.as_ref())
                .await?;
            Ok::<_, StoreError>(target.object_ref)
        }
        .await;

        if let Ok(object_ref) = &result {
            debug!(path = %asset.archive_path, object_ref = %object_ref, "Image uploaded");
        }

        AssetUpload {
            slot: asset.slot,
            archive_path: asset.archive_path,
            result,
        }
    }
}

/// Regular files directly inside a slot directory. A missing directory is empty.
async fn list_slot_files(scratch: &Path, slot: AssetSlot) -> std::io::Result<Vec<PendingAsset>> {
    let dir = scratch.join(slot.archive_dir());
    let mut read_dir = match tokio::fs::read_dir(&dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "Skipping image with non UTF-8 name");
            continue;
        };

        files.push(PendingAsset {
            slot,
            archive_path: format!("{}/{}", slot.archive_dir(), name),
            file: entry.path(),
        });
    }

    // Stable order keeps logs readable; completion order still varies
    files.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::objects::{LocalObjectStore, MockObjectStore, UploadTarget};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_with_images(logos: &[&str], maps: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (slot_dir, names) in [("images/logos", logos), ("images/maps", maps)] {
            std::fs::create_dir_all(dir.path().join(slot_dir)).unwrap();
            for name in names {
                std::fs::write(dir.path().join(slot_dir).join(name), name.as_bytes()).unwrap();
            }
        }
        dir
    }

    #[tokio::test]
    async fn test_publish_maps_every_file() {
        let scratch = scratch_with_images(&["s1.png", "s2.jpg"], &["s1.gif"]);
        let store_dir = tempfile::tempdir().unwrap();
        let publisher = AssetPublisher::new(Arc::new(LocalObjectStore::new(store_dir.path())), 2);

        let outcome = publisher.publish(scratch.path()).await;

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.logos_uploaded, 2);
        assert_eq!(outcome.maps_uploaded, 1);
        assert_eq!(outcome.mapping.len(), 3);
        assert!(outcome.mapping["images/logos/s1.png"].starts_with("/objects/uploads/"));
        assert!(outcome.mapping.contains_key("images/maps/s1.gif"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let scratch = scratch_with_images(&["a.png", "b.png", "c.png"], &[]);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut objects = MockObjectStore::new();
        let issued = counter.clone();
        objects.expect_request_upload_target().returning(move || {
            let n = issued.fetch_add(1, Ordering::SeqCst);
            Ok(UploadTarget {
                upload_url: format!("https://storage.example/put/{}", n),
                object_ref: format!("/objects/uploads/{}", n),
            })
        });
        objects.expect_upload().returning(|_, source, _| {
            if source.ends_with("b.png") {
                Err(StoreError::Status {
                    status: 403,
                    url: "https://storage.example/put".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let publisher = AssetPublisher::new(Arc::new(objects), 4);
        let outcome = publisher.publish(scratch.path()).await;

        assert_eq!(outcome.logos_uploaded, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("images/logos/b.png"));
        assert!(!outcome.mapping.contains_key("images/logos/b.png"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_target_request_failure_is_per_asset() {
        let scratch = scratch_with_images(&[], &["m.png"]);
        let mut objects = MockObjectStore::new();
        objects
            .expect_request_upload_target()
            .returning(|| Err(StoreError::Rejected("quota exceeded".to_string())));
        objects.expect_upload().never();

        let publisher = AssetPublisher::new(Arc::new(objects), 1);
        let outcome = publisher.publish(scratch.path()).await;

        assert_eq!(outcome.uploaded(), 0);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_missing_image_dirs_publish_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        let publisher = AssetPublisher::new(Arc::new(MockObjectStore::new()), 1);

        let outcome = publisher.publish(scratch.path()).await;
        assert_eq!(outcome.uploaded(), 0);
        assert!(outcome.errors.is_empty());
    }
}
