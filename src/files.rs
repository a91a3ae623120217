//! Capability-scoped file access helpers shared by the state store and the
//! SSH access installer.

use std::io::{self, Write};

use camino::Utf8Path;
#[cfg(unix)]
use cap_std::fs::OpenOptionsExt;
use cap_std::{ambient_authority, fs::OpenOptions, fs_utf8::Dir};

/// Splits `path` into an opened parent directory and the file name inside it.
pub(crate) fn open_parent(path: &Utf8Path) -> io::Result<(Dir, &str)> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path is missing a file name: {path}"),
        )
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Replaces the contents of `path`, creating it with `mode` already applied.
///
/// An existing file keeps its inode, so it is narrowed to `mode` after being
/// truncated and before any new content is written.
pub(crate) fn write_with_mode(path: &Utf8Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let (dir, file_name) = open_parent(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    let mut file = dir.open_with(file_name, &options)?;
    set_mode(path, mode)?;
    file.write_all(contents)?;
    file.flush()
}

/// Restricts `path` to the given Unix permission bits.
#[cfg(unix)]
pub(crate) fn set_mode(path: &Utf8Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Utf8Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
