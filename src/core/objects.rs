/// Object store collaborator
///
/// Consumed as a capability: ask for an upload target, receive a writable
/// destination together with the stable reference the object will be
/// served under. References are never derived from the upload URL.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::StoreError;
use crate::utils::{generate_hex_string, STORED_REF_PREFIX};

/// Bytes read back from the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Destination handed out by the store for a single upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    /// Where the bytes go (signed URL, or a path for local stores)
    pub upload_url: String,
    /// Reference the object is readable under once uploaded
    pub object_ref: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object by its stable reference. `Ok(None)` when it does not exist.
    async fn fetch(&self, reference: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Reserve a fresh destination for one upload
    async fn request_upload_target(&self) -> Result<UploadTarget, StoreError>;

    /// Stream a local file to a previously issued target
    async fn upload(
        &self,
        target: &UploadTarget,
        source: &Path,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Response of the upload-target endpoint
#[derive(Debug, Deserialize)]
struct UploadTargetResponse {
    #[serde(rename = "uploadURL", alias = "uploadUrl")]
    upload_url: String,
    #[serde(rename = "objectPath", alias = "objectRef")]
    object_path: String,
}

/// Object store reached over HTTP (signed-URL style)
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(format!("shopdir-backup/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, reference: &str) -> String {
        format!("{}{}", self.base_url, reference)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Option<StoredObject>, StoreError> {
        let url = self.url_for(reference);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        Ok(Some(StoredObject { bytes, content_type }))
    }

    async fn request_upload_target(&self) -> Result<UploadTarget, StoreError> {
        let url = format!("{}/api/objects/upload", self.base_url);
        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body: UploadTargetResponse = response.json().await?;
        if !body.object_path.starts_with(STORED_REF_PREFIX) {
            return Err(StoreError::Rejected(format!(
                "upload target reference {} is outside {}",
                body.object_path, STORED_REF_PREFIX
            )));
        }

        Ok(UploadTarget {
            upload_url: body.upload_url,
            object_ref: body.object_path,
        })
    }

    async fn upload(
        &self,
        target: &UploadTarget,
        source: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();

        let response = self
            .client
            .put(&target.upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::from(file))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url: target.upload_url.clone(),
            });
        }

        Ok(())
    }
}

/// Object store backed by a local directory.
/// `/objects/uploads/<id>` lives at `<root>/uploads/<id>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Filesystem path for a reference, refusing anything that escapes the root
    fn path_for(&self, reference: &str) -> Option<PathBuf> {
        let relative = reference.strip_prefix(STORED_REF_PREFIX)?;
        let relative = Path::new(relative);

        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));

        safe.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Option<StoredObject>, StoreError> {
        let Some(path) = self.path_for(reference) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(StoredObject {
                bytes: Bytes::from(bytes),
                content_type: mime_guess::from_path(&path).first().map(|m| m.to_string()),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn request_upload_target(&self) -> Result<UploadTarget, StoreError> {
        let object_ref = format!("{}uploads/{}", STORED_REF_PREFIX, generate_hex_string(32));
        let path = self
            .path_for(&object_ref)
            .ok_or_else(|| StoreError::Rejected(format!("invalid reference {}", object_ref)))?;

        Ok(UploadTarget {
            upload_url: path.to_string_lossy().to_string(),
            object_ref,
        })
    }

    async fn upload(
        &self,
        target: &UploadTarget,
        source: &Path,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        let destination = PathBuf::from(&target.upload_url);
        if !destination.starts_with(&self.root) {
            return Err(StoreError::Rejected(format!(
                "upload target {} is outside the store",
                target.upload_url
            )));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &destination).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_upload_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"));

        let source = dir.path().join("logo.png");
        std::fs::write(&source, b"\x89PNG fake").unwrap();

        let target = store.request_upload_target().await.unwrap();
        assert!(target.object_ref.starts_with("/objects/uploads/"));

        store.upload(&target, &source, "image/png").await.unwrap();

        let fetched = store.fetch(&target.object_ref).await.unwrap().unwrap();
        assert_eq!(&fetched.bytes[..], b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_local_store_targets_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let a = store.request_upload_target().await.unwrap();
        let b = store.request_upload_target().await.unwrap();
        assert_ne!(a.object_ref, b.object_ref);
    }

    #[tokio::test]
    async fn test_local_store_missing_and_escaping_refs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"));
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();

        assert!(store.fetch("/objects/uploads/missing").await.unwrap().is_none());
        assert!(store.fetch("/objects/../secret.txt").await.unwrap().is_none());
        assert!(store.fetch("/elsewhere/file").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_store_rejects_foreign_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"));
        let source = dir.path().join("a.png");
        std::fs::write(&source, b"x").unwrap();

        let target = UploadTarget {
            upload_url: "/etc/evil".to_string(),
            object_ref: "/objects/uploads/evil".to_string(),
        };
        let err = store.upload(&target, &source, "image/png").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    /// `HttpObjectStore` against a fake storage service on loopback
    #[cfg(feature = "server")]
    mod http_store {
        use super::*;
        use crate::core::testing::serve_loopback;
        use axum::extract::State;
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::routing::{get, post, put};
        use axum::{Json, Router};
        use std::sync::Arc;
        use tokio::sync::Mutex;

        /// (content type, body) of every PUT the fake storage accepted
        type Received = Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>;

        #[derive(Clone)]
        struct FakeStorage {
            base: String,
            object_path: String,
            received: Received,
        }

        async fn issue_target(State(storage): State<FakeStorage>) -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "uploadURL": format!("{}/signed/put-1?sig=abc", storage.base),
                "objectPath": storage.object_path,
            }))
        }

        async fn accept_put(State(storage): State<FakeStorage>, headers: HeaderMap, body: Bytes) -> StatusCode {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            storage.received.lock().await.push((content_type, body.to_vec()));
            StatusCode::OK
        }

        async fn start(object_path: &str) -> (HttpObjectStore, Received) {
            let received = Received::default();
            let captured = received.clone();
            let object_path = object_path.to_string();

            let base = serve_loopback(move |base| {
                Router::new()
                    .route(
                        "/objects/uploads/logo",
                        get(|| async { ([(header::CONTENT_TYPE, "image/webp")], "RIFF-bytes") }),
                    )
                    .route(
                        "/objects/uploads/broken",
                        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
                    )
                    .route("/api/objects/upload", post(issue_target))
                    .route("/signed/put-1", put(accept_put))
                    .route("/signed/denied", put(|| async { StatusCode::FORBIDDEN }))
                    .with_state(FakeStorage {
                        base: base.to_string(),
                        object_path,
                        received: captured,
                    })
            })
            .await;

            // Trailing slash is trimmed from the base
            (HttpObjectStore::new(format!("{}/", base)).unwrap(), received)
        }

        #[tokio::test]
        async fn test_fetch_carries_content_type() {
            let (store, _) = start("/objects/uploads/new").await;

            let object = store.fetch("/objects/uploads/logo").await.unwrap().unwrap();
            assert_eq!(&object.bytes[..], b"RIFF-bytes");
            assert_eq!(object.content_type.as_deref(), Some("image/webp"));
        }

        #[tokio::test]
        async fn test_fetch_missing_is_none_and_errors_are_errors() {
            let (store, _) = start("/objects/uploads/new").await;

            assert!(store.fetch("/objects/uploads/nothing-here").await.unwrap().is_none());

            let err = store.fetch("/objects/uploads/broken").await.unwrap_err();
            match err {
                StoreError::Status { status, url } => {
                    assert_eq!(status, 500);
                    assert!(url.ends_with("/objects/uploads/broken"));
                }
                other => panic!("expected status error, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_upload_target_inside_objects_is_accepted() {
            let (store, _) = start("/objects/uploads/new-1").await;

            let target = store.request_upload_target().await.unwrap();
            assert_eq!(target.object_ref, "/objects/uploads/new-1");
            assert!(target.upload_url.contains("/signed/put-1?sig=abc"));
        }

        #[tokio::test]
        async fn test_upload_target_outside_objects_is_rejected() {
            let (store, _) = start("/public/uploads/new-1").await;

            let err = store.request_upload_target().await.unwrap_err();
            assert!(matches!(err, StoreError::Rejected(_)), "{:?}", err);
        }

        #[tokio::test]
        async fn test_upload_streams_file_with_content_type() {
            let (store, received) = start("/objects/uploads/new-1").await;
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("logo.gif");
            std::fs::write(&source, b"GIF89a-payload").unwrap();

            let target = store.request_upload_target().await.unwrap();
            store.upload(&target, &source, "image/gif").await.unwrap();

            let received = received.lock().await;
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0.as_deref(), Some("image/gif"));
            assert_eq!(received[0].1, b"GIF89a-payload");
        }

        #[tokio::test]
        async fn test_upload_rejected_by_storage_is_error() {
            let (store, received) = start("/objects/uploads/new-1").await;
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("logo.png");
            std::fs::write(&source, b"png").unwrap();

            let issued = store.request_upload_target().await.unwrap();
            let target = UploadTarget {
                upload_url: issued.upload_url.replace("/signed/put-1?sig=abc", "/signed/denied"),
                object_ref: issued.object_ref,
            };

            let err = store.upload(&target, &source, "image/png").await.unwrap_err();
            assert!(matches!(err, StoreError::Status { status: 403, .. }), "{:?}", err);
            assert!(received.lock().await.is_empty());
        }
    }

    #[test]
    fn test_upload_target_response_aliases() {
        let parsed: UploadTargetResponse = serde_json::from_str(
            r#"{"uploadURL": "https://storage.example/put?sig=1", "objectPath": "/objects/uploads/9"}"#,
        )
        .unwrap();
        assert_eq!(parsed.object_path, "/objects/uploads/9");

        let parsed: UploadTargetResponse = serde_json::from_str(
            r#"{"uploadUrl": "https://storage.example/put", "objectRef": "/objects/uploads/10"}"#,
        )
        .unwrap();
        assert_eq!(parsed.upload_url, "https://storage.example/put");
    }
}
