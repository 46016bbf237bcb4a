/// In-memory collaborators for tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::error::StoreError;
use super::manifest::Shop;
use super::objects::{ObjectStore, StoredObject, UploadTarget};
use super::records::RecordStore;

#[derive(Default)]
pub struct MemoryRecordStore {
    shops: Mutex<Vec<Shop>>,
    next_id: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn with_shops(shops: Vec<Shop>) -> Self {
        Self {
            shops: Mutex::new(shops),
            next_id: AtomicUsize::new(0),
        }
    }

    pub async fn shops(&self) -> Vec<Shop> {
        self.shops.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_all(&self) -> Result<Vec<Shop>, StoreError> {
        Ok(self.shops.lock().await.clone())
    }

    async fn insert(&self, mut shop: Shop) -> Result<Shop, StoreError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        shop.id = Some(format!("restored-{}", n));
        self.shops.lock().await.push(shop.clone());
        Ok(shop)
    }
}

/// Object store keeping objects in a map. Objects can be seeded with a
/// content type; uploads whose source file name matches a configured
/// suffix fail.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    failing_suffixes: HashSet<String>,
    issued: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn failing_uploads_of(mut self, suffix: &str) -> Self {
        self.failing_suffixes.insert(suffix.to_string());
        self
    }

    pub async fn seed(&self, reference: &str, bytes: &'static [u8], content_type: Option<&str>) {
        self.objects.lock().await.insert(
            reference.to_string(),
            StoredObject {
                bytes: Bytes::from_static(bytes),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    pub async fn get(&self, reference: &str) -> Option<Bytes> {
        self.objects.lock().await.get(reference).map(|o| o.bytes.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.objects.lock().await.get(reference).cloned())
    }

    async fn request_upload_target(&self) -> Result<UploadTarget, StoreError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(UploadTarget {
            upload_url: format!("memory://upload/{}", n),
            object_ref: format!("/objects/uploads/restored-{}", n),
        })
    }

    async fn upload(
        &self,
        target: &UploadTarget,
        source: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            return Err(StoreError::Status {
                status: 500,
                url: target.upload_url.clone(),
            });
        }

        let bytes = tokio::fs::read(source).await?;
        self.objects.lock().await.insert(
            target.object_ref.clone(),
            StoredObject {
                bytes: Bytes::from(bytes),
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }
}

/// Serve `build(base_url)` on an ephemeral loopback port and return the base URL
#[cfg(feature = "server")]
pub async fn serve_loopback<F>(build: F) -> String
where
    F: FnOnce(&str) -> axum::Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    base
}
