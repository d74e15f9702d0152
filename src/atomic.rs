use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{RegistrationError, Result};

/// Mode of published outputs; temp files start out owner-only.
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// Writes `contents` to a temp file next to `path` and renames it into place,
/// so readers never observe a truncated file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path)).map_err(|e| RegistrationError::io(path, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .and_then(|_| set_output_permissions(tmp.path()))
        .map_err(|e| RegistrationError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| RegistrationError::io(path, e.error))?;

    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
pub(crate) fn set_output_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(OUTPUT_MODE))
}

#[cfg(not(unix))]
pub(crate) fn set_output_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
