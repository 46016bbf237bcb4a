/// Asset references and the fetcher that resolves them
///
/// A reference is classified exactly once into one of the `AssetRef`
/// variants. Fetching never fails: anything that goes wrong becomes
/// `None` ("this shop contributes no image") with a log line.

use bytes::Bytes;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::objects::ObjectStore;
use crate::utils::{
    extension_for_content_type, ASSET_FETCH_TIMEOUT_SECS, DEFAULT_IMAGE_EXTENSION,
    IMAGE_EXTENSIONS, STORED_REF_PREFIX,
};

/// Where an image reference points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRef<'a> {
    /// Private object store path, e.g. `/objects/uploads/abc`
    Stored(&'a str),
    /// Absolute URL fetched over the network
    External(&'a str),
    /// Path under the static assets directory, e.g. `/logos/bakery.png`
    Local(&'a str),
    /// Anything else (icon identifiers and the like); never fetched
    Symbolic(&'a str),
}

impl<'a> AssetRef<'a> {
    /// Classify a reference. Empty references are not assets at all.
    pub fn classify(reference: &'a str) -> Option<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return None;
        }

        let classified = if trimmed.starts_with(STORED_REF_PREFIX) {
            AssetRef::Stored(trimmed)
        } else if has_url_scheme(trimmed) {
            AssetRef::External(trimmed)
        } else if trimmed.starts_with('/') {
            AssetRef::Local(trimmed)
        } else {
            AssetRef::Symbolic(trimmed)
        };

        Some(classified)
    }

    /// True for references that name real bytes somewhere
    pub fn is_fetchable(&self) -> bool {
        !matches!(self, AssetRef::Symbolic(_))
    }

    pub fn as_str(&self) -> &'a str {
        match *self {
            AssetRef::Stored(s) | AssetRef::External(s) | AssetRef::Local(s) | AssetRef::Symbolic(s) => s,
        }
    }

    pub fn kind(&self) -> AssetKind {
        match self {
            AssetRef::Stored(_) => AssetKind::Stored,
            AssetRef::External(_) => AssetKind::External,
            AssetRef::Local(_) => AssetKind::Local,
            AssetRef::Symbolic(_) => AssetKind::Symbolic,
        }
    }
}

/// The variant of an `AssetRef`, for holding on to a classification
/// without borrowing the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stored,
    External,
    Local,
    Symbolic,
}

impl AssetKind {
    /// Reattach a reference that was classified as this kind
    pub fn bind(self, reference: &str) -> AssetRef<'_> {
        match self {
            AssetKind::Stored => AssetRef::Stored(reference),
            AssetKind::External => AssetRef::External(reference),
            AssetKind::Local => AssetRef::Local(reference),
            AssetKind::Symbolic => AssetRef::Symbolic(reference),
        }
    }
}

/// `scheme://...` with an RFC 3986 style scheme
fn has_url_scheme(reference: &str) -> bool {
    match reference.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && scheme
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic())
                    .unwrap_or(false)
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Known image extension at the end of a reference, ignoring query/fragment
pub fn sniff_extension(reference: &str) -> Option<&'static str> {
    let path = reference
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(reference);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();

    IMAGE_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .map(|known| if *known == "jpeg" { "jpg" } else { *known })
}

/// An image pulled from one of the asset sources
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Bytes,
    pub extension: String,
}

/// Resolves references into bytes
#[derive(Clone)]
pub struct AssetFetcher {
    objects: Arc<dyn ObjectStore>,
    client: Client,
    static_dir: PathBuf,
}

impl AssetFetcher {
    pub fn new(objects: Arc<dyn ObjectStore>, static_dir: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .user_agent(format!("shopdir-backup/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(ASSET_FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            objects,
            client,
            static_dir: static_dir.into(),
        }
    }

    /// Fetch the bytes behind a classified reference
    pub async fn fetch(&self, reference: AssetRef<'_>) -> Option<FetchedAsset> {
        match reference {
            AssetRef::Symbolic(_) => None,
            AssetRef::Stored(r) => self.fetch_stored(r).await,
            AssetRef::External(r) => self.fetch_external(r).await,
            AssetRef::Local(r) => self.fetch_local(r).await,
        }
    }

    /// Convenience: classify then fetch
    pub async fn fetch_str(&self, reference: &str) -> Option<FetchedAsset> {
        self.fetch(AssetRef::classify(reference)?).await
    }

    async fn fetch_stored(&self, reference: &str) -> Option<FetchedAsset> {
        match self.objects.fetch(reference).await {
            Ok(Some(object)) => Some(FetchedAsset {
                extension: infer_extension(object.content_type.as_deref(), reference),
                bytes: object.bytes,
            }),
            Ok(None) => {
                warn!(reference, "Stored image not found, skipping");
                None
            }
            Err(e) => {
                warn!(reference, error = %e, "Failed to fetch stored image, skipping");
                None
            }
        }
    }

    async fn fetch_external(&self, url: &str) -> Option<FetchedAsset> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch external image, skipping");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "External image fetch failed, skipping");
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.bytes().await {
            Ok(bytes) => Some(FetchedAsset {
                extension: infer_extension(content_type.as_deref(), url),
                bytes,
            }),
            Err(e) => {
                warn!(url, error = %e, "Failed to read external image body, skipping");
                None
            }
        }
    }

    async fn fetch_local(&self, reference: &str) -> Option<FetchedAsset> {
        let Some(path) = self.local_path(reference) else {
            warn!(reference, "Local image path escapes the static directory, skipping");
            return None;
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), "Read local image");
                Some(FetchedAsset {
                    bytes: Bytes::from(bytes),
                    extension: local_extension(reference),
                })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Local image not readable, skipping");
                None
            }
        }
    }

    fn local_path(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        safe.then(|| self.static_dir.join(relative))
    }
}

/// Content type first, then the reference itself, then the default
pub fn infer_extension(content_type: Option<&str>, reference: &str) -> String {
    content_type
        .and_then(extension_for_content_type)
        .or_else(|| sniff_extension(reference))
        .unwrap_or(DEFAULT_IMAGE_EXTENSION)
        .to_string()
}

/// Local files keep their own suffix, whatever it is
fn local_extension(reference: &str) -> String {
    let file_name = reference.rsplit('/').next().unwrap_or(reference);
    match file_name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_IMAGE_EXTENSION.to_string(),
    }
}
