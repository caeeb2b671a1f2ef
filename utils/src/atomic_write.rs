//! Atomic file write helper.
//!
//! Writes go to a temp file in the destination directory which is then renamed
//! over the target, so readers never observe a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

/// Atomically replace (or create) `path` with `bytes`.
///
/// Missing parent directories are created. An existing file keeps its
/// permissions on Unix.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let existing_permissions = fs::metadata(path).ok().map(|meta| meta.permissions());

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = existing_permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = bytes.len(), "atomic write complete");
    Ok(())
}
