/// Invocation-private scratch space and guaranteed cleanup
///
/// Every restore gets its own directory, named by timestamp plus a random
/// discriminator. `CleanupGuard` removes everything it tracks when dropped,
/// so early returns and panics clean up too.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::{generate_hex_string, remove_path_quietly};

/// Create a fresh, uniquely named directory under `root`
pub fn create_scratch_dir(root: &Path, prefix: &str) -> io::Result<PathBuf> {
    std::fs::create_dir_all(root)?;

    loop {
        let name = format!(
            "{}-{}-{}",
            prefix,
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            generate_hex_string(8)
        );
        let path = root.join(name);

        // create_dir (not _all) fails on collision instead of sharing a dir
        match std::fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Removes tracked paths on drop. Removal is idempotent.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove everything now; later calls (and the drop) are no-ops
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            match remove_path_quietly(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to clean up"),
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}
