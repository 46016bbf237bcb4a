/// Shop records and the `backup-data.json` manifest
///
/// The manifest is the only thing a restore trusts: image paths are looked
/// up through `images`, never rediscovered from a directory listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::error::{BackupError, BackupResult};
use crate::utils::{sanitize_file_stem, FORMAT_VERSION, LOGOS_DIR, MAPS_DIR, SUPPORTED_FORMAT_MAJOR};

/// One directory entry. Only the id and the two image slots are
/// interpreted; every other field passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,

    #[serde(rename = "mapImage", default, skip_serializing_if = "Option::is_none")]
    pub map_image: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Shop {
    pub fn image(&self, slot: AssetSlot) -> Option<&str> {
        match slot {
            AssetSlot::Logo => self.logo.as_deref(),
            AssetSlot::Map => self.map_image.as_deref(),
        }
    }

    pub fn set_image(&mut self, slot: AssetSlot, reference: String) {
        match slot {
            AssetSlot::Logo => self.logo = Some(reference),
            AssetSlot::Map => self.map_image = Some(reference),
        }
    }

    /// Display name for log lines and error messages
    pub fn label(&self) -> String {
        match (self.fields.get("name").and_then(Value::as_str), self.id.as_deref()) {
            (Some(name), _) => name.to_string(),
            (None, Some(id)) => id.to_string(),
            (None, None) => "<unnamed shop>".to_string(),
        }
    }
}

/// The two image slots a shop can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetSlot {
    Logo,
    Map,
}

impl AssetSlot {
    pub const ALL: [AssetSlot; 2] = [AssetSlot::Logo, AssetSlot::Map];

    /// Archive directory holding this slot's images
    pub fn archive_dir(self) -> &'static str {
        match self {
            AssetSlot::Logo => LOGOS_DIR,
            AssetSlot::Map => MAPS_DIR,
        }
    }

    /// Archive-relative path for a shop's image in this slot
    pub fn archive_path(self, shop_id: &str, extension: &str) -> String {
        format!("{}/{}.{}", self.archive_dir(), sanitize_file_stem(shop_id), extension)
    }
}

impl fmt::Display for AssetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSlot::Logo => write!(f, "logo"),
            AssetSlot::Map => write!(f, "map"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "data-only")]
    DataOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(rename = "totalShops")]
    pub total_shops: usize,
    #[serde(rename = "backupType")]
    pub backup_type: BackupKind,
}

/// shop id -> archive-relative image path, per slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageIndex {
    #[serde(default)]
    pub logos: BTreeMap<String, String>,
    #[serde(default)]
    pub maps: BTreeMap<String, String>,
}

impl ImageIndex {
    pub fn slot(&self, slot: AssetSlot) -> &BTreeMap<String, String> {
        match slot {
            AssetSlot::Logo => &self.logos,
            AssetSlot::Map => &self.maps,
        }
    }

    pub fn insert(&mut self, slot: AssetSlot, shop_id: String, path: String) {
        match slot {
            AssetSlot::Logo => self.logos.insert(shop_id, path),
            AssetSlot::Map => self.maps.insert(shop_id, path),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.logos.is_empty() && self.maps.is_empty()
    }

    /// Every indexed (slot, shop id, path) triple
    pub fn entries(&self) -> impl Iterator<Item = (AssetSlot, &String, &String)> {
        self.logos
            .iter()
            .map(|(id, path)| (AssetSlot::Logo, id, path))
            .chain(self.maps.iter().map(|(id, path)| (AssetSlot::Map, id, path)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub metadata: ManifestMetadata,
    pub shops: Vec<Shop>,
    #[serde(default)]
    pub images: ImageIndex,
}

impl Manifest {
    pub fn new(shops: Vec<Shop>, images: ImageIndex, backup_type: BackupKind) -> Self {
        Self {
            metadata: ManifestMetadata {
                timestamp: Utc::now(),
                version: FORMAT_VERSION.to_string(),
                total_shops: shops.len(),
                backup_type,
            },
            shops,
            images,
        }
    }

    pub fn to_pretty_json(&self) -> BackupResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse manifest bytes; any structural problem is a corrupt archive
    pub fn from_json(bytes: &[u8]) -> BackupResult<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::CorruptArchive(format!("invalid manifest: {}", e)))?;

        if !manifest.is_supported_version() {
            tracing::warn!(
                version = %manifest.metadata.version,
                "Manifest format version is newer than this build; restoring anyway"
            );
        }

        Ok(manifest)
    }

    pub fn is_supported_version(&self) -> bool {
        self.metadata
            .version
            .split('.')
            .next()
            .map(|major| major == SUPPORTED_FORMAT_MAJOR)
            .unwrap_or(false)
    }

    /// Read and parse the manifest from an extracted archive
    pub async fn load_from_dir(dir: &Path) -> BackupResult<Self> {
        let path = dir.join(crate::utils::MANIFEST_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::CorruptArchive(format!(
                    "no {} found in archive",
                    crate::utils::MANIFEST_FILE
                )));
            }
            Err(e) => {
                return Err(BackupError::CorruptArchive(format!(
                    "unreadable {}: {}",
                    crate::utils::MANIFEST_FILE,
                    e
                )));
            }
        };

        Self::from_json(&bytes)
    }
}
