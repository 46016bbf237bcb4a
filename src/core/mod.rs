pub mod error;
pub mod manifest;
pub mod records;
pub mod objects;
pub mod assets;
pub mod archive;
pub mod archive_reader;
pub mod scratch;
pub mod publisher;
pub mod backup;
pub mod restore;
pub mod engine;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{BackupCoordinator, BackupStats, BackupSummary};
pub use engine::BackupEngine;
pub use error::{BackupError, StoreError};
pub use manifest::{AssetSlot, BackupKind, Manifest, Shop};
pub use restore::{RestoreCoordinator, RestoreOutcome, RestoreReport};
