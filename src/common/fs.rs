use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

/// Replaces `path` with `data`. An existing file keeps its permissions; a new
/// one gets the process umask default.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path)?;
    let tmp = staged(parent, path, data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(parent)
}

/// Like [`write_atomic`] but fails with `AlreadyExists` instead of replacing
/// an existing file.
pub fn write_atomic_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path)?;
    let tmp = staged(parent, path, data)?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    sync_dir(parent)
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }
    Ok(parent)
}

fn staged(parent: &Path, target: &Path, data: &[u8]) -> io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // open(2) applies the umask to this
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(parent)?;

    match fs::metadata(target) {
        Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    tmp.as_file_mut().write_all(data)?;
    tmp.as_file_mut().sync_all()?;
    Ok(tmp)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}
