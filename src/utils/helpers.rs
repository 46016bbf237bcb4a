/// Helper utilities shared by the backup engine, the CLI and the server

use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;

/// Format bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Rough size rendering used by backup stats: KB below one MiB, MB above
pub fn format_estimated_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    let bytes = bytes as f64;

    if bytes < MIB {
        format!("{:.1} KB", bytes / 1024.0)
    } else {
        format!("{:.1} MB", bytes / MIB)
    }
}

/// Timestamp safe to embed in a file name (no colons)
pub fn filename_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Generate random hex string
pub fn generate_hex_string(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| format!("{:x}", rng.gen::<u8>() % 16))
        .collect()
}

/// Reduce a shop id to characters that are safe as a file stem
pub fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}

/// Remove a file or directory tree; a path that is already gone is not an error
pub fn remove_path_quietly(path: &Path) -> io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Check if directory is writable
pub fn is_dir_writable<P: AsRef<Path>>(path: P) -> bool {
    let test_file = path.as_ref().join(".write_test");
    if std::fs::write(&test_file, "test").is_ok() {
        let _ = std::fs::remove_file(&test_file);
        true
    } else {
        false
    }
}
