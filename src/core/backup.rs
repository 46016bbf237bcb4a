/// Backup management
///
/// Full backups stream a tar.gz of every shop plus its images; data-only
/// backups are just the manifest. Image fetches run concurrently but are
/// written to the archive one at a time as they complete.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use super::archive::ArchiveBuilder;
use super::assets::{AssetFetcher, AssetKind, AssetRef};
use super::error::{BackupError, BackupResult};
use super::manifest::{AssetSlot, BackupKind, ImageIndex, Manifest, Shop};
use super::objects::ObjectStore;
use super::records::RecordStore;
use crate::utils::{
    format_estimated_size, ESTIMATED_BYTES_PER_LOGO, ESTIMATED_BYTES_PER_MAP,
    ESTIMATED_BYTES_PER_SHOP,
};

/// What a full backup produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub shops: usize,
    pub logos: usize,
    pub maps: usize,
    /// Image references that yielded no bytes
    pub skipped: usize,
    pub bytes_written: u64,
}

/// Storage-only backup estimate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_shops: usize,
    pub logo_count: usize,
    pub map_count: usize,
    pub estimated_bytes: u64,
    pub estimated_size: String,
}

/// One image to pull into the archive, classified once when planned
struct FetchJob {
    slot: AssetSlot,
    shop_id: String,
    kind: AssetKind,
    reference: String,
}

impl FetchJob {
    fn asset_ref(&self) -> AssetRef<'_> {
        self.kind.bind(&self.reference)
    }
}

pub struct BackupCoordinator {
    records: Arc<dyn RecordStore>,
    fetcher: AssetFetcher,
    concurrency: usize,
}

impl BackupCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        static_dir: impl Into<std::path::PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            records,
            fetcher: AssetFetcher::new(objects, static_dir),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn load_shops(&self) -> BackupResult<Vec<Shop>> {
        self.records.list_all().await.map_err(BackupError::RecordStore)
    }

    /// Full backup of the current store into `sink`
    pub async fn full_backup<W>(&self, sink: W) -> BackupResult<BackupSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let shops = self.load_shops().await?;
        self.write_full_backup(shops, sink).await
    }

    /// Full backup of an already loaded shop list. Split out so callers can
    /// fail cleanly on store errors before any output has been produced.
    pub async fn write_full_backup<W>(&self, shops: Vec<Shop>, sink: W) -> BackupResult<BackupSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let jobs = fetch_jobs(&shops);
        info!(shops = shops.len(), images = jobs.len(), "Starting full backup");

        let mut builder = ArchiveBuilder::start(sink).await?;
        let mut summary = BackupSummary {
            shops: shops.len(),
            ..Default::default()
        };

        let mut fetches = stream::iter(jobs)
            .map(|job| {
                let fetcher = self.fetcher.clone();
                async move {
                    let asset = fetcher.fetch(job.asset_ref()).await;
                    (job, asset)
                }
            })
            .buffer_unordered(self.concurrency);

        // Single writer: fetches overlap, archive writes never do
        while let Some((job, asset)) = fetches.next().await {
            match asset {
                Some(asset) => {
                    builder.append_asset(job.slot, &job.shop_id, &asset).await?;
                }
                None => summary.skipped += 1,
            }
        }

        let (built, _sink) = builder.finish(shops).await?;
        summary.logos = built.manifest.images.logos.len();
        summary.maps = built.manifest.images.maps.len();
        summary.bytes_written = built.bytes_written;

        info!(
            shops = summary.shops,
            logos = summary.logos,
            maps = summary.maps,
            skipped = summary.skipped,
            bytes = summary.bytes_written,
            "Full backup written"
        );
        Ok(summary)
    }

    /// Manifest only, no images
    pub async fn data_only_backup(&self) -> BackupResult<Vec<u8>> {
        let shops = self.load_shops().await?;
        info!(shops = shops.len(), "Writing data-only backup");

        Manifest::new(shops, ImageIndex::default(), BackupKind::DataOnly).to_pretty_json()
    }

    /// Fast estimate from the store alone; nothing is fetched
    pub async fn stats(&self) -> BackupResult<BackupStats> {
        let shops = self.load_shops().await?;

        let count_slot = |slot: AssetSlot| {
            shops
                .iter()
                .filter(|shop| {
                    shop.image(slot)
                        .and_then(AssetRef::classify)
                        .map(|r| r.is_fetchable())
                        .unwrap_or(false)
                })
                .count()
        };
        let logo_count = count_slot(AssetSlot::Logo);
        let map_count = count_slot(AssetSlot::Map);

        let estimated_bytes = shops.len() as u64 * ESTIMATED_BYTES_PER_SHOP
            + logo_count as u64 * ESTIMATED_BYTES_PER_LOGO
            + map_count as u64 * ESTIMATED_BYTES_PER_MAP;

        Ok(BackupStats {
            total_shops: shops.len(),
            logo_count,
            map_count,
            estimated_bytes,
            estimated_size: format_estimated_size(estimated_bytes),
        })
    }
}

/// Every image worth fetching: shop has an id and a non-symbolic reference
fn fetch_jobs(shops: &[Shop]) -> Vec<FetchJob> {
    let mut jobs = Vec::new();

    for shop in shops {
        for slot in AssetSlot::ALL {
            let Some(reference) = shop.image(slot).and_then(AssetRef::classify) else {
                continue;
            };
            if !reference.is_fetchable() {
                continue;
            }

            let Some(shop_id) = shop.id.as_deref() else {
                warn!(shop = %shop.label(), %slot, "Shop has no id, its image is not archived");
                continue;
            };

            jobs.push(FetchJob {
                slot,
                shop_id: shop_id.to_string(),
                kind: reference.kind(),
                reference: reference.as_str().to_string(),
            });
        }
    }

    jobs
}
