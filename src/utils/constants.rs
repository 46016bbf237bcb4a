/// Archive layout and backup engine constants
///
/// Every name here is part of the archive format: changing one breaks
/// restores of archives produced by earlier releases.

/// Manifest file at the archive root
pub const MANIFEST_FILE: &str = "backup-data.json";

/// Human-readable instructions shipped alongside the manifest
pub const README_FILE: &str = "README.md";

/// Root directory of all archived images
pub const IMAGES_DIR: &str = "images";

/// Directory holding shop logos (primary image slot)
pub const LOGOS_DIR: &str = "images/logos";

/// Directory holding shop maps (secondary image slot)
pub const MAPS_DIR: &str = "images/maps";

/// Manifest format version written by this build
pub const FORMAT_VERSION: &str = "1.0";

/// Major format version this build knows how to restore
pub const SUPPORTED_FORMAT_MAJOR: &str = "1";

/// Prefix identifying references into the private object store
pub const STORED_REF_PREFIX: &str = "/objects/";

/// Extension used when neither content type nor reference reveal one
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// gzip level used for archives (maximum ratio)
pub const ARCHIVE_COMPRESSION_LEVEL: u32 = 9;

/// Upload ceiling for restore archives (100 MiB)
pub const MAX_RESTORE_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Content types accepted for restore uploads
pub const ACCEPTED_ARCHIVE_CONTENT_TYPES: &[&str] = &[
    "application/gzip",
    "application/x-gzip",
    "application/x-tar+gzip",
    "application/x-compressed-tar",
];

/// Content type used when serving archives
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Default number of asset fetches/uploads in flight per invocation
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 8;

/// Timeout for a single asset fetch over the network
pub const ASSET_FETCH_TIMEOUT_SECS: u64 = 30;

// Size estimation weights used by backup stats
pub const ESTIMATED_BYTES_PER_SHOP: u64 = 2 * 1024;
pub const ESTIMATED_BYTES_PER_LOGO: u64 = 50 * 1024;
pub const ESTIMATED_BYTES_PER_MAP: u64 = 200 * 1024;

/// Known image extensions, used when sniffing a reference string
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp"];

/// Map an image content type to the extension used inside archives
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    // Strip parameters such as "; charset=binary"
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}
