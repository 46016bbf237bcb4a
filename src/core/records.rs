/// Record store collaborator
///
/// The engine only needs to list every shop and to insert one. Identity is
/// owned by the store: `insert` assigns a fresh id and returns the stored shop.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::error::StoreError;
use super::manifest::Shop;
use crate::utils::generate_hex_string;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every shop currently stored
    async fn list_all(&self) -> Result<Vec<Shop>, StoreError>;

    /// Store a shop under a new identity, returning the stored version
    async fn insert(&self, shop: Shop) -> Result<Shop, StoreError>;
}

/// Shops kept as a JSON array in a single file
pub struct JsonFileRecordStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileRecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Shop>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            // A store that was never written to is empty
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, shops: &[Shop]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension(format!("tmp-{}", generate_hex_string(8)));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(shops)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn list_all(&self) -> Result<Vec<Shop>, StoreError> {
        self.read_all().await
    }

    async fn insert(&self, mut shop: Shop) -> Result<Shop, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut shops = self.read_all().await?;

        let mut id = generate_hex_string(16);
        while shops.iter().any(|s| s.id.as_deref() == Some(id.as_str())) {
            id = generate_hex_string(16);
        }
        shop.id = Some(id);

        shops.push(shop.clone());
        self.write_all(&shops).await?;

        Ok(shop)
    }
}
