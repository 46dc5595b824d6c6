use std::io;
use std::path::{Path, PathBuf};

/// Files under `dir`, sorted. Non-recursive listing only looks at direct children.
pub fn list_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut walker = walkdir::WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

pub fn read_all_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Copy one file, creating parent directories and overwriting the
/// destination. Modification times are carried over.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    clear_readonly(dst)?;
    let bytes = std::fs::copy(src, dst)?;
    let metadata = std::fs::metadata(src)?;
    filetime::set_file_mtime(dst, filetime::FileTime::from_last_modification_time(&metadata))?;
    Ok(bytes)
}

/// Recursively copy the contents of `src` into `dst`, merging with whatever
/// is already there. `on_file` sees every copied file.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    mut on_file: impl FnMut(&Path, &Path, u64),
) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut bytes = 0;
    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let rel_path = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target_path = dst.join(rel_path);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target_path)?;
        } else {
            let copied = copy_file(entry.path(), &target_path)?;
            on_file(entry.path(), &target_path, copied);
            bytes += copied;
        }
    }
    Ok(bytes)
}

/// Check if two paths are on the same filesystem.
#[cfg(unix)]
fn same_filesystem(src: &Path, dst: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let src_meta = std::fs::metadata(src)?;
    let dst_parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let dst_parent_meta = std::fs::metadata(dst_parent)?;
    Ok(src_meta.dev() == dst_parent_meta.dev())
}

#[cfg(windows)]
fn same_filesystem(_src: &Path, _dst: &Path) -> io::Result<bool> {
    // volume_serial_number is unstable (feature `windows_by_handle`).
    // Fallback to copy+delete which is safe but slower.
    Ok(false)
}

#[cfg(not(any(unix, windows)))]
fn same_filesystem(_src: &Path, _dst: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Move a file or directory, replacing an existing destination file.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if same_filesystem(src, dst)? && std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    // Cross-device or rename refused: copy then delete.
    let metadata = std::fs::metadata(src)?;
    if metadata.is_dir() {
        copy_tree(src, dst, |_, _, _| {})?;
        delete_tree(src, false)
    } else {
        copy_file(src, dst)?;
        delete_file(src)
    }
}

/// Move the children of `src` into `dst`. Directories that already exist at
/// the destination are merged into, never replaced; `src` itself stays.
pub fn move_contents(
    src: &Path,
    dst: &Path,
    on_entry: &mut dyn FnMut(&Path, &Path),
) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut entries: Vec<_> = std::fs::read_dir(src)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() && to.is_dir() {
            move_contents(&from, &to, on_entry)?;
            std::fs::remove_dir(&from)?;
        } else {
            if to.is_dir() {
                delete_tree(&to, false)?;
            }
            move_path(&from, &to)?;
            on_entry(&from, &to);
        }
    }
    Ok(())
}

pub fn delete_file(path: &Path) -> io::Result<()> {
    clear_readonly(path)?;
    std::fs::remove_file(path)
}

/// Delete `path` and everything below it, or only its children.
/// Truncating a directory that does not exist is a no-op.
pub fn delete_tree(path: &Path, children_only: bool) -> io::Result<()> {
    if !children_only {
        clear_readonly_tree(path)?;
        return std::fs::remove_dir_all(path);
    }
    if !path.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            delete_tree(&entry.path(), false)?;
        } else {
            delete_file(&entry.path())?;
        }
    }
    Ok(())
}

#[cfg(windows)]
fn clear_readonly(path: &Path) -> io::Result<()> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.permissions().readonly() => {
            let mut permissions = metadata.permissions();
            permissions.set_readonly(false);
            std::fs::set_permissions(path, permissions)
        }
        _ => Ok(()),
    }
}

// Unlinking on unix depends on the directory, not the file.
#[cfg(not(windows))]
fn clear_readonly(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn clear_readonly_tree(path: &Path) -> io::Result<()> {
    if cfg!(windows) {
        for entry in walkdir::WalkDir::new(path) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() {
                clear_readonly(entry.path())?;
            }
        }
    }
    Ok(())
}
