use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::{copy_up_file, create_directory, create_symlink, read_symlink_target, read_xattrs, FileType};
use crate::locks::PathLocks;
use crate::types::BranchTable;

/// promote an entity resolved on an RO branch to the topmost eligible RW
/// branch, materializing any missing ancestor directories along the way
///
/// returns the target branch index and the (unchanged) relpath. callers
/// must hold the per-path lock for `relpath` for the duration of the call;
/// this function does not lock internally so a caller already holding the
/// lock for a recursive directory promotion doesn't deadlock on itself.
pub fn promote(branches: &BranchTable, source_branch: usize, relpath: &Path) -> Result<usize> {
    let target = branches
        .rw_at_or_above(source_branch)
        .ok_or_else(|| Error::ReadOnlyBranch(relpath.to_path_buf()))?;
    let target_index = target.index;

    let source = branches.get(source_branch).expect("valid source branch");
    let source_full = source.full_path(relpath);
    let dest_full = target.full_path(relpath);

    if paths_match(&dest_full, &source_full) {
        return Ok(target_index);
    }

    materialize_parents(source, target, relpath)?;

    let source_meta = std::fs::symlink_metadata(&source_full)
        .map_err(|e| Error::Io {
            path: source_full.clone(),
            source: e,
        })?;
    let file_type = FileType::from_metadata(&source_meta);

    match copy_entity(&source_full, &dest_full, file_type) {
        Ok(()) => Ok(target_index),
        Err(Error::Io { source: io_err, .. }) if io_err.kind() == std::io::ErrorKind::AlreadyExists => {
            // a concurrent promotion already populated the destination
            Ok(target_index)
        }
        Err(e) => Err(e),
    }
}

/// recursively promote a directory tree rooted at `relpath` from an RO
/// branch to the topmost eligible RW branch
///
/// used for directory rename, which requires every RO-resident descendant
/// to exist on the destination branch before the rename itself can be
/// performed there. explicit work queue rather than recursion, so a deep
/// tree doesn't grow the call stack.
pub fn promote_tree(branches: &BranchTable, source_branch: usize, relpath: &Path) -> Result<usize> {
    let target_index = promote(branches, source_branch, relpath)?;
    let source = branches.get(source_branch).expect("valid source branch");
    let source_root = source.full_path(relpath);

    if !source_root.is_dir() {
        return Ok(target_index);
    }

    let mut queue = vec![relpath.to_path_buf()];
    while let Some(dir_relpath) = queue.pop() {
        let source_dir = source.full_path(&dir_relpath);
        for entry in walkdir::WalkDir::new(&source_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
        {
            let entry = entry.map_err(|e| Error::Io {
                path: source_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            let child_relpath = dir_relpath.join(entry.file_name());
            promote(branches, source_branch, &child_relpath)?;
            if entry.file_type().is_dir() {
                queue.push(child_relpath);
            }
        }
    }

    Ok(target_index)
}

/// convenience wrapper that takes the per-path lock before promoting
pub fn promote_locked(
    branches: &BranchTable,
    locks: &PathLocks,
    union_path: &Path,
    source_branch: usize,
    relpath: &Path,
) -> Result<usize> {
    let _guard = locks.lock(union_path);
    promote(branches, source_branch, relpath)
}

fn paths_match(a: &Path, b: &Path) -> bool {
    a == b
}

fn copy_entity(source: &Path, dest: &Path, file_type: FileType) -> Result<()> {
    match file_type {
        FileType::Regular => copy_up_file(source, dest),
        FileType::Symlink => {
            let target = read_symlink_target(source)?;
            let meta = std::fs::symlink_metadata(source).map_err(|e| Error::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
            use std::os::unix::fs::MetadataExt;
            let xattrs = read_xattrs(source).unwrap_or_default();
            create_symlink(dest, &target, meta.uid(), meta.gid(), &xattrs)
        }
        FileType::Directory => {
            let meta = std::fs::metadata(source).map_err(|e| Error::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            let xattrs = read_xattrs(source).unwrap_or_default();
            create_directory(dest, meta.uid(), meta.gid(), meta.permissions().mode(), &xattrs)
        }
        FileType::Fifo => {
            let meta = std::fs::metadata(source).map_err(|e| Error::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            let xattrs = read_xattrs(source).unwrap_or_default();
            crate::fs::create_fifo(dest, meta.uid(), meta.gid(), meta.permissions().mode(), &xattrs)
        }
        FileType::BlockDevice | FileType::CharDevice => {
            let meta = std::fs::metadata(source).map_err(|e| Error::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            let xattrs = read_xattrs(source).unwrap_or_default();
            let (major, minor) = crate::fs::device_numbers(&meta);
            if file_type == FileType::BlockDevice {
                crate::fs::create_block_device(
                    dest,
                    major,
                    minor,
                    meta.uid(),
                    meta.gid(),
                    meta.permissions().mode(),
                    &xattrs,
                )
            } else {
                crate::fs::create_char_device(
                    dest,
                    major,
                    minor,
                    meta.uid(),
                    meta.gid(),
                    meta.permissions().mode(),
                    &xattrs,
                )
            }
        }
        FileType::Socket => Err(Error::InvalidArgument(format!(
            "cannot promote socket entity at {:?}",
            source
        ))),
    }
}

/// create every ancestor directory of `relpath` on `target` that is
/// missing there, copying mode/owner/timestamps from `source`'s matching
/// ancestor; directories that already exist on `target` are left untouched
fn materialize_parents(
    source: &crate::types::Branch,
    target: &crate::types::Branch,
    relpath: &Path,
) -> Result<()> {
    let Some(parent) = relpath.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    let mut prefix = PathBuf::new();
    for component in parent.components() {
        prefix.push(component);
        let target_dir = target.full_path(&prefix);
        if target_dir.exists() {
            continue;
        }
        let source_dir = source.full_path(&prefix);
        let meta = std::fs::metadata(&source_dir).map_err(|e| Error::Io {
            path: source_dir.clone(),
            source: e,
        })?;
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        create_directory(
            &target_dir,
            meta.uid(),
            meta.gid(),
            meta.permissions().mode(),
            &[],
        )?;
    }
    Ok(())
}
