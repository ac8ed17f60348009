use std::ffi::OsStr;
use std::path::Path;

use crate::cow;
use crate::error::{Error, Result};
use crate::fs::create_directory;
use crate::locks::PathLocks;
use crate::resolver::resolve;
use crate::types::{BranchTable, Intent, Resolution};
use crate::whiteout;

/// PATH_MAX as used by the host; any resulting absolute path longer than
/// this fails with ENAMETOOLONG before anything is touched on disk
const PATH_MAX: usize = 4096;

/// rename `src` to `dst` within the union, honoring branch policy
///
/// `preserve_branch` keeps the entity on its current RW branch, moving the
/// destination's parent to that branch rather than failing with EXDEV.
pub fn rename(
    branches: &BranchTable,
    locks: &PathLocks,
    src: &Path,
    dst: &Path,
    preserve_branch: bool,
) -> Result<()> {
    if dst.as_os_str().len() > PATH_MAX {
        return Err(Error::NameTooLong(dst.to_string_lossy().into_owned()));
    }

    let _src_guard = locks.lock(src);
    let _dst_guard = locks.lock(dst);

    let src_resolution = resolve(branches, src, Intent::Delete);
    let src_branch = match src_resolution {
        Resolution::Found { branch, .. } => branch,
        _ => return Err(Error::NotFound(src.to_path_buf())),
    };

    let dst_parent = dst.parent().unwrap_or_else(|| Path::new(""));
    let dst_name = dst
        .file_name()
        .ok_or_else(|| Error::InvalidArgument("rename destination has no file name".into()))?;
    whiteout::reject_reserved_name(dst_name)?;

    let dst_parent_resolution = resolve(branches, dst_parent, Intent::Write);
    let dst_parent_branch = match dst_parent_resolution {
        Resolution::Found { branch, .. } => Some(branch),
        _ => None,
    };

    // case 1 & 3: src already sits on a RW branch
    if branches.get(src_branch).is_some_and(|b| b.is_rw()) {
        let target_branch = choose_rename_target_branch(
            src_branch,
            dst_parent_branch,
            preserve_branch,
            src,
            dst,
        )?;

        materialize_dst_parent_on(branches, target_branch, dst_parent)?;
        perform_rename_on_branch(branches, target_branch, src, dst)?;
        mask_old_dst_if_shadowed(branches, target_branch, dst)?;
        return Ok(());
    }

    // case 2: src is RO-resident, promote then rename on the RW copy
    let relpath = match &src_resolution {
        Resolution::Found { relpath, .. } => relpath.clone(),
        _ => unreachable!(),
    };
    let promoted_branch = cow::promote_tree(branches, src_branch, &relpath)?;

    let target_branch = choose_rename_target_branch(
        promoted_branch,
        dst_parent_branch,
        preserve_branch,
        src,
        dst,
    )?;

    materialize_dst_parent_on(branches, target_branch, dst_parent)?;
    perform_rename_on_branch(branches, target_branch, src, dst)?;
    mask_old_dst_if_shadowed(branches, target_branch, dst)?;

    // hide the RO original under its old name
    let parent_relpath = relpath.parent().unwrap_or(Path::new(""));
    let name = relpath.file_name().expect("resolved entity has a name");
    let branch = branches.get(src_branch).expect("valid branch");
    whiteout::mark_whiteout(&branch.full_path(parent_relpath), name)?;

    Ok(())
}

/// pick which RW branch the rename's destination must land on
fn choose_rename_target_branch(
    src_rw_branch: usize,
    dst_parent_branch: Option<usize>,
    preserve_branch: bool,
    src: &Path,
    dst: &Path,
) -> Result<usize> {
    match dst_parent_branch {
        // dst's parent already lives on the same RW branch as src: trivial case
        Some(p) if p == src_rw_branch => Ok(src_rw_branch),
        _ if preserve_branch => Ok(src_rw_branch),
        Some(_) => Err(Error::CrossDevice(src.to_path_buf(), dst.to_path_buf())),
        None => {
            // destination doesn't exist anywhere yet; default policy still
            // requires it to land on src's own RW branch
            Ok(src_rw_branch)
        }
    }
}

fn materialize_dst_parent_on(branches: &BranchTable, branch_index: usize, dst_parent: &Path) -> Result<()> {
    let branch = branches.get(branch_index).expect("valid branch");
    let full = branch.full_path(dst_parent);
    if full.exists() {
        return Ok(());
    }
    // find a branch that already has this directory to copy mode/owner from
    for other in branches.iter() {
        let candidate = other.full_path(dst_parent);
        if let Ok(meta) = std::fs::metadata(&candidate) {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            return create_directory(&full, meta.uid(), meta.gid(), meta.permissions().mode(), &[]);
        }
    }
    std::fs::create_dir_all(&full).map_err(|e| Error::Io {
        path: full,
        source: e,
    })
}

fn perform_rename_on_branch(branches: &BranchTable, branch_index: usize, src: &Path, dst: &Path) -> Result<()> {
    let branch = branches.get(branch_index).expect("valid branch");
    let src_full = branch.full_path(strip_root(src));
    let dst_full = branch.full_path(strip_root(dst));
    std::fs::rename(&src_full, &dst_full).map_err(|e| Error::Io {
        path: dst_full,
        source: e,
    })
}

fn mask_old_dst_if_shadowed(branches: &BranchTable, target_branch: usize, dst: &Path) -> Result<()> {
    // if dst previously resolved to a lower-priority branch as well, add a
    // whiteout for the old dst name on the same branch so it stays hidden
    let lower_has_dst = branches
        .iter()
        .filter(|b| b.index > target_branch)
        .any(|b| b.full_path(strip_root(dst)).symlink_metadata().is_ok());
    if !lower_has_dst {
        return Ok(());
    }
    let branch = branches.get(target_branch).expect("valid branch");
    let parent = dst.parent().unwrap_or(Path::new(""));
    let name: &OsStr = dst.file_name().expect("dst has a name");
    whiteout::mark_whiteout(&branch.full_path(strip_root(parent)), name)
}

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Branch, BranchMode};
    use tempfile::tempdir;

    fn table_two_rw(rw1: &Path, rw2: &Path) -> BranchTable {
        BranchTable::new(vec![
            Branch::new(0, rw1.to_path_buf(), BranchMode::ReadWrite),
            Branch::new(1, rw2.to_path_buf(), BranchMode::ReadWrite),
        ])
        .unwrap()
    }

    #[test]
    fn test_exdev_under_default_policy() {
        let rw1 = tempdir().unwrap();
        let rw2 = tempdir().unwrap();
        std::fs::create_dir(rw1.path().join("common_dir")).unwrap();
        std::fs::create_dir(rw2.path().join("common_dir")).unwrap();
        std::fs::create_dir(rw2.path().join("rw2_dir")).unwrap();
        std::fs::write(rw2.path().join("rw2_dir/rw2_file"), "x").unwrap();

        let table = table_two_rw(rw1.path(), rw2.path());
        let locks = PathLocks::new();

        let err = rename(
            &table,
            &locks,
            Path::new("rw2_dir/rw2_file"),
            Path::new("common_dir/rw2_file"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CrossDevice(..)));
    }

    #[test]
    fn test_preserve_branch_rename_succeeds() {
        let rw1 = tempdir().unwrap();
        let rw2 = tempdir().unwrap();
        std::fs::create_dir(rw1.path().join("common_dir")).unwrap();
        std::fs::create_dir(rw2.path().join("common_dir")).unwrap();
        std::fs::create_dir(rw2.path().join("rw2_dir")).unwrap();
        std::fs::write(rw2.path().join("rw2_dir/rw2_file"), "x").unwrap();

        let table = table_two_rw(rw1.path(), rw2.path());
        let locks = PathLocks::new();

        rename(
            &table,
            &locks,
            Path::new("rw2_dir/rw2_file"),
            Path::new("common_dir/rw2_file"),
            true,
        )
        .unwrap();

        assert!(rw2.path().join("common_dir/rw2_file").exists());
        assert!(!rw2.path().join("rw2_dir/rw2_file").exists());
        // rw1 untouched
        assert!(std::fs::read_dir(rw1.path().join("common_dir"))
            .unwrap()
            .next()
            .is_none());
    }

    #[test]
    fn test_name_too_long() {
        let rw1 = tempdir().unwrap();
        let rw2 = tempdir().unwrap();
        let table = table_two_rw(rw1.path(), rw2.path());
        let locks = PathLocks::new();

        let huge = "x".repeat(5000);
        let err = rename(&table, &locks, Path::new("a"), Path::new(&huge), false).unwrap_err();
        assert!(matches!(err, Error::NameTooLong(_)));
    }
}
