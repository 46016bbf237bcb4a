/// Restore coordinator
///
/// archive -> scratch dir -> manifest -> re-uploaded images -> new shops.
/// Only a missing or unparseable manifest aborts a restore; every other
/// problem is collected and the run carries on.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::archive_reader::ArchiveReader;
use super::error::BackupResult;
use super::manifest::{AssetSlot, ImageIndex, Manifest, Shop};
use super::objects::ObjectStore;
use super::publisher::AssetPublisher;
use super::records::RecordStore;
use super::scratch::{create_scratch_dir, CleanupGuard};

/// Counts and non-fatal errors of a restore run
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub shops_restored: usize,
    pub logos_restored: usize,
    pub maps_restored: usize,
    pub errors: Vec<String>,
}

/// What the caller gets back: fatal failures flip `success` and carry
/// the cause in `errors`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: RestoreOutcome,
}

impl RestoreReport {
    fn failed(cause: String) -> Self {
        Self {
            success: false,
            outcome: RestoreOutcome {
                errors: vec![cause],
                ..Default::default()
            },
        }
    }
}

pub struct RestoreCoordinator {
    records: Arc<dyn RecordStore>,
    publisher: AssetPublisher,
    scratch_root: PathBuf,
}

impl RestoreCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        scratch_root: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            records,
            publisher: AssetPublisher::new(objects, concurrency),
            scratch_root: scratch_root.into(),
        }
    }

    /// Restore from an uploaded archive file. The file is consumed: it and
    /// the scratch dir are removed when this returns, whatever happened.
    pub async fn restore_archive(&self, archive: &Path) -> RestoreReport {
        let mut guard = CleanupGuard::new();
        guard.track(archive);

        let report = match self.run(archive, &mut guard).await {
            Ok(outcome) => {
                info!(
                    shops = outcome.shops_restored,
                    logos = outcome.logos_restored,
                    maps = outcome.maps_restored,
                    errors = outcome.errors.len(),
                    "Restore finished"
                );
                RestoreReport {
                    success: true,
                    outcome,
                }
            }
            Err(e) => {
                error!(error = %e, "Restore aborted");
                RestoreReport::failed(e.to_string())
            }
        };

        guard.cleanup();
        report
    }

    async fn run(&self, archive: &Path, guard: &mut CleanupGuard) -> BackupResult<RestoreOutcome> {
        let scratch_root = self.scratch_root.clone();
        let scratch = tokio::task::spawn_blocking(move || create_scratch_dir(&scratch_root, "restore")).await??;
        guard.track(&scratch);

        let report = ArchiveReader::extract(archive, &scratch).await?;
        if !report.skipped.is_empty() {
            warn!(skipped = ?report.skipped, "Some archive entries were not extracted");
        }

        let manifest = ArchiveReader::parse_manifest(&scratch).await?;
        info!(
            shops = manifest.shops.len(),
            version = %manifest.metadata.version,
            backup_type = ?manifest.metadata.backup_type,
            "Manifest loaded"
        );

        let mut errors = ArchiveReader::missing_assets(&scratch, &manifest).await;

        let published = self.publisher.publish(&scratch).await;
        errors.extend(published.errors);

        let mut outcome = self.restore(&manifest, &published.mapping).await;
        outcome.logos_restored = published.logos_uploaded;
        outcome.maps_restored = published.maps_uploaded;

        errors.append(&mut outcome.errors);
        outcome.errors = errors;

        Ok(outcome)
    }

    /// Rewrite image references through `mapping`, then insert every shop
    /// as a new entity. Insert failures are per shop.
    pub async fn restore(&self, manifest: &Manifest, mapping: &HashMap<String, String>) -> RestoreOutcome {
        let mut outcome = RestoreOutcome::default();

        for shop in rewrite_image_refs(&manifest.shops, &manifest.images, mapping) {
            let label = shop.label();
            let mut fresh = shop;
            fresh.id = None;

            match self.records.insert(fresh).await {
                Ok(_) => outcome.shops_restored += 1,
                Err(e) => {
                    warn!(shop = %label, error = %e, "Failed to restore shop");
                    outcome.errors.push(format!("Failed to restore shop {}: {}", label, e));
                }
            }
        }

        outcome
    }
}

/// Point each shop at its re-uploaded images. A shop whose image did not
/// make it keeps its original reference.
pub fn rewrite_image_refs(
    shops: &[Shop],
    index: &ImageIndex,
    mapping: &HashMap<String, String>,
) -> Vec<Shop> {
    shops
        .iter()
        .cloned()
        .map(|mut shop| {
            if let Some(id) = shop.id.clone() {
                for slot in AssetSlot::ALL {
                    let new_ref = index
                        .slot(slot)
                        .get(&id)
                        .and_then(|path| mapping.get(path));

                    if let Some(new_ref) = new_ref {
                        shop.set_image(slot, new_ref.clone());
                    }
                }
            }
            shop
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ArchiveBuilder;
    use crate::core::assets::FetchedAsset;
    use crate::core::error::StoreError;
    use crate::core::manifest::BackupKind;
    use crate::core::records::MockRecordStore;
    use crate::core::testing::{MemoryObjectStore, MemoryRecordStore};
    use bytes::Bytes;

    fn shop(id: &str, logo: Option<&str>, map: Option<&str>) -> Shop {
        let mut shop = Shop {
            id: Some(id.to_string()),
            logo: logo.map(str::to_string),
            map_image: map.map(str::to_string),
            ..Default::default()
        };
        shop.fields.insert("name".into(), serde_json::json!(format!("Shop {}", id)));
        shop
    }

    #[test]
    fn test_rewrite_uses_mapping_and_keeps_dangling_refs() {
        let shops = vec![
            shop("a", Some("/objects/old-a"), Some("/objects/old-a-map")),
            shop("b", Some("fa-store"), None),
        ];
        let mut index = ImageIndex::default();
        index.insert(AssetSlot::Logo, "a".into(), "images/logos/a.png".into());
        index.insert(AssetSlot::Map, "a".into(), "images/maps/a.png".into());

        // Only the logo made it back up
        let mapping: HashMap<String, String> =
            [("images/logos/a.png".to_string(), "/objects/uploads/new-a".to_string())]
                .into_iter()
                .collect();

        let rewritten = rewrite_image_refs(&shops, &index, &mapping);
        assert_eq!(rewritten[0].logo.as_deref(), Some("/objects/uploads/new-a"));
        assert_eq!(rewritten[0].map_image.as_deref(), Some("/objects/old-a-map"));
        assert_eq!(rewritten[1], shops[1]);
    }

    #[tokio::test]
    async fn test_restore_strips_ids_and_collects_insert_failures() {
        let mut records = MockRecordStore::new();
        records.expect_insert().times(3).returning(|shop| {
            assert!(shop.id.is_none());
            if shop.label() == "Shop b" {
                Err(StoreError::Rejected("validation failed".to_string()))
            } else {
                Ok(Shop {
                    id: Some("new".to_string()),
                    ..shop
                })
            }
        });

        let coordinator = RestoreCoordinator::new(
            Arc::new(records),
            Arc::new(MemoryObjectStore::default()),
            std::env::temp_dir(),
            2,
        );
        let manifest = Manifest::new(
            vec![shop("a", None, None), shop("b", None, None), shop("c", None, None)],
            ImageIndex::default(),
            BackupKind::DataOnly,
        );

        let outcome = coordinator.restore(&manifest, &HashMap::new()).await;
        assert_eq!(outcome.shops_restored, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Shop b"));
    }

    async fn build_archive(dir: &Path, shops: Vec<Shop>, images: &[(AssetSlot, &str)]) -> PathBuf {
        let mut builder = ArchiveBuilder::start(Vec::new()).await.unwrap();
        for (slot, id) in images {
            let asset = FetchedAsset {
                bytes: Bytes::from(format!("{}-{}", slot, id)),
                extension: "png".to_string(),
            };
            builder.append_asset(*slot, id, &asset).await.unwrap();
        }
        let (_, bytes) = builder.finish(shops).await.unwrap();

        let path = dir.join("upload.tar.gz");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|rd| rd.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_restore_archive_end_to_end() {
        let work = tempfile::tempdir().unwrap();
        let scratch_root = work.path().join("scratch");
        let archive = build_archive(
            work.path(),
            vec![
                shop("a", Some("/objects/uploads/a"), Some("/maps/a.png")),
                shop("b", Some("fa-store"), None),
            ],
            &[(AssetSlot::Logo, "a"), (AssetSlot::Map, "a")],
        )
        .await;

        let records = Arc::new(MemoryRecordStore::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let coordinator = RestoreCoordinator::new(records.clone(), objects.clone(), &scratch_root, 4);

        let report = coordinator.restore_archive(&archive).await;

        assert!(report.success, "{:?}", report.outcome.errors);
        assert_eq!(report.outcome.shops_restored, 2);
        assert_eq!(report.outcome.logos_restored, 1);
        assert_eq!(report.outcome.maps_restored, 1);
        assert!(report.outcome.errors.is_empty());

        let stored = records.shops().await;
        let a = stored.iter().find(|s| s.label() == "Shop a").unwrap();
        let new_logo = a.logo.clone().unwrap();
        assert_ne!(new_logo, "/objects/uploads/a");
        assert_eq!(objects.get(&new_logo).await.unwrap(), Bytes::from("logo-a"));
        assert_ne!(a.id.as_deref(), Some("a"));

        let b = stored.iter().find(|s| s.label() == "Shop b").unwrap();
        assert_eq!(b.logo.as_deref(), Some("fa-store"));

        assert!(!archive.exists());
        assert_eq!(scratch_entries(&scratch_root), 0);
    }

    #[tokio::test]
    async fn test_single_upload_failure_keeps_the_shop() {
        let work = tempfile::tempdir().unwrap();
        let archive = build_archive(
            work.path(),
            vec![
                shop("a", Some("/objects/uploads/a"), None),
                shop("b", Some("/objects/uploads/b"), None),
            ],
            &[(AssetSlot::Logo, "a"), (AssetSlot::Logo, "b")],
        )
        .await;

        let records = Arc::new(MemoryRecordStore::default());
        let objects = Arc::new(MemoryObjectStore::default().failing_uploads_of("b.png"));
        let coordinator =
            RestoreCoordinator::new(records.clone(), objects, work.path().join("scratch"), 2);

        let report = coordinator.restore_archive(&archive).await;

        assert!(report.success);
        assert_eq!(report.outcome.shops_restored, 2);
        assert_eq!(report.outcome.logos_restored, 1);
        assert_eq!(report.outcome.errors.len(), 1);
        assert!(report.outcome.errors[0].contains("images/logos/b.png"));

        let stored = records.shops().await;
        let b = stored.iter().find(|s| s.label() == "Shop b").unwrap();
        assert_eq!(b.logo.as_deref(), Some("/objects/uploads/b"));
    }

    #[tokio::test]
    async fn test_archive_without_manifest_is_fatal_and_leaves_nothing() {
        let work = tempfile::tempdir().unwrap();
        let scratch_root = work.path().join("scratch");

        // A valid tar.gz that only holds an image
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "images/logos/a.png", &b"png"[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        let archive = work.path().join("no-manifest.tar.gz");
        std::fs::write(&archive, bytes).unwrap();

        let records = Arc::new(MemoryRecordStore::default());
        let coordinator = RestoreCoordinator::new(
            records.clone(),
            Arc::new(MemoryObjectStore::default()),
            &scratch_root,
            2,
        );

        let report = coordinator.restore_archive(&archive).await;

        assert!(!report.success);
        assert_eq!(report.outcome.errors.len(), 1);
        assert!(report.outcome.errors[0].contains("corrupt archive"));
        assert!(records.shops().await.is_empty());
        assert!(!archive.exists());
        assert_eq!(scratch_entries(&scratch_root), 0);
    }

    #[test]
    fn test_report_wire_shape() {
        let report = RestoreReport {
            success: true,
            outcome: RestoreOutcome {
                shops_restored: 3,
                logos_restored: 2,
                maps_restored: 1,
                errors: vec![],
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["shopsRestored"], 3);
        assert_eq!(value["logosRestored"], 2);
        assert_eq!(value["mapsRestored"], 1);
    }
}
