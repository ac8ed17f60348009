use std::path::{Path, PathBuf};

use log::debug;

use crate::config::MountOptions;
use crate::cow;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{self, FileMetadata};
use crate::locks::PathLocks;
use crate::readdir::{merge_readdir, MergedEntry};
use crate::rename as rename_engine;
use crate::resolver::resolve;
use crate::stats::Stats;
use crate::types::{BranchTable, Intent, Resolution};
use crate::whiteout;

/// whether an open/write-capable operation intends to mutate the entity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteCapable,
}

/// aggregated space/inode accounting across the branch table
///
/// free/available space is summed over RW branches only (an RO branch can
/// never receive a write, so it contributes nothing writable); total
/// capacity and inode counts are summed over every branch, matching how a
/// caller would reasonably estimate "how big is this union, total".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnionStatfs {
    pub block_size: u64,
    pub blocks_total: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files_total: u64,
    pub files_free: u64,
}

/// the dispatcher ties the branch table, its options, and the shared
/// runtime state (locks, stats) together so each operation can be
/// implemented as a short function over this context
pub struct Dispatcher {
    branches: BranchTable,
    options: MountOptions,
    locks: PathLocks,
    stats: Stats,
}

impl Dispatcher {
    pub fn new(branches: BranchTable, options: MountOptions) -> Self {
        Self {
            branches,
            options,
            locks: PathLocks::new(),
            stats: Stats::new(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn branches(&self) -> &BranchTable {
        &self.branches
    }

    /// log a dispatched operation when debug output is enabled
    ///
    /// lines are always shaped `unionfs_<op> <path>` per the observability
    /// contract; whether they're visible is controlled by the `debug_file`
    /// option rather than by this crate's own log-level filtering.
    fn trace(&self, op: &str, path: &Path) {
        if self.options.debug_file.is_some() {
            debug!("unionfs_{op} {}", path.display());
        }
    }

    /// lookup/getattr: resolve with READ, return attributes
    pub fn getattr(&self, union_path: &Path) -> Result<FileMetadata> {
        self.trace("getattr", union_path);
        self.stats.lookups();
        let resolution = resolve(&self.branches, union_path, Intent::Read);
        let (branch, relpath) = self.require_found(union_path, resolution)?;
        let full = self.branches.get(branch).unwrap().full_path(&relpath);
        FileMetadata::from_path(&full)
    }

    /// access: like getattr but returns only success/failure
    pub fn access(&self, union_path: &Path) -> Result<()> {
        self.trace("access", union_path);
        let resolution = resolve(&self.branches, union_path, Intent::Read);
        self.require_found(union_path, resolution).map(|_| ())
    }

    /// open for read or write; write-capable opens on an RO-resident file
    /// promote when cow is enabled, otherwise fail
    pub fn open(&self, union_path: &Path, mode: OpenMode) -> Result<PathBuf> {
        self.trace("open", union_path);
        self.stats.reads();
        let resolution = resolve(&self.branches, union_path, Intent::Read);
        let (branch, relpath) = self.require_found(union_path, resolution)?;

        if mode == OpenMode::ReadOnly {
            return Ok(self.branches.get(branch).unwrap().full_path(&relpath));
        }

        self.ensure_writable(union_path, branch, &relpath)
    }

    /// write/truncate: always operate on a RW copy, promoting if needed
    pub fn prepare_write(&self, union_path: &Path) -> Result<PathBuf> {
        self.trace("write", union_path);
        self.stats.writes();
        let resolution = resolve(&self.branches, union_path, Intent::Write);
        let (branch, relpath) = self.require_found(union_path, resolution)?;
        self.ensure_writable(union_path, branch, &relpath)
    }

    fn ensure_writable(&self, union_path: &Path, branch: usize, relpath: &Path) -> Result<PathBuf> {
        let b = self.branches.get(branch).unwrap();
        if b.is_rw() {
            return Ok(b.full_path(relpath));
        }
        if !self.options.cow {
            return Err(Error::ReadOnlyBranch(union_path.to_path_buf()));
        }
        let target = cow::promote_locked(&self.branches, &self.locks, union_path, branch, relpath)?;
        self.stats.promotions();
        Ok(self.branches.get(target).unwrap().full_path(relpath))
    }

    /// create a new regular file; errno EACCES when no RW branch exists
    pub fn create(&self, union_path: &Path) -> Result<PathBuf> {
        self.trace("create", union_path);
        self.stats.creates();
        self.create_on_topmost_rw(union_path)
    }

    /// symlink/mkfifo/mknod share the same target-selection rule as create
    pub fn create_special(&self, union_path: &Path) -> Result<PathBuf> {
        self.trace("create_special", union_path);
        self.create_on_topmost_rw(union_path)
    }

    fn create_on_topmost_rw(&self, union_path: &Path) -> Result<PathBuf> {
        let parent = union_path.parent().unwrap_or_else(|| Path::new(""));
        let name = union_path
            .file_name()
            .ok_or_else(|| Error::InvalidArgument("path has no file name".into()))?;
        whiteout::reject_reserved_name(name)?;

        let target_index = choose_create_branch(&self.branches, self.options.cow)
            .ok_or_else(|| Error::NoBranchAvailable(union_path.to_path_buf()))?;

        let target = self.branches.get(target_index).unwrap();
        materialize_parent_on(&self.branches, target_index, parent)?;
        Ok(target.full_path(union_path_without_root(union_path)))
    }

    /// unlink: direct removal on RW, or whiteout creation when the entity
    /// resolves to an RO branch
    pub fn unlink(&self, union_path: &Path) -> Result<()> {
        self.trace("unlink", union_path);
        self.stats.unlinks();
        let _guard = self.locks.lock(union_path);

        let resolution = resolve(&self.branches, union_path, Intent::Delete);
        let (branch, relpath) = self.require_found(union_path, resolution)?;
        let parent = relpath.parent().unwrap_or(Path::new("")).to_path_buf();
        let name = relpath.file_name().expect("resolved entity has a name").to_owned();

        let b = self.branches.get(branch).unwrap();
        if b.is_rw() {
            std::fs::remove_file(b.full_path(&relpath)).with_path(b.full_path(&relpath))?;
            // if the same name still exists on a lower branch, hide it
            if lower_branches_have(&self.branches, branch, &relpath) {
                whiteout::mark_whiteout(&b.full_path(&parent), &name)?;
                self.stats.whiteouts_created();
            }
            return Ok(());
        }

        // resolved on an RO branch
        if !self.options.cow {
            return Err(Error::ReadOnlyBranch(union_path.to_path_buf()));
        }
        let whiteout_branch = self
            .branches
            .rw_at_or_above(branch)
            .ok_or_else(|| Error::PermissionDenied(union_path.to_path_buf()))?;
        whiteout::mark_whiteout(&whiteout_branch.full_path(&parent), &name)?;
        self.stats.whiteouts_created();
        Ok(())
    }

    /// mkdir: create on topmost RW branch, materializing the parent
    pub fn mkdir(&self, union_path: &Path) -> Result<PathBuf> {
        self.trace("mkdir", union_path);
        self.stats.mkdirs();
        self.create_on_topmost_rw(union_path)
    }

    /// rmdir: only legal when the union view of the directory is empty;
    /// removes the directory on every RW branch, whiteouts every RO branch
    pub fn rmdir(&self, union_path: &Path) -> Result<()> {
        self.trace("rmdir", union_path);
        self.stats.rmdirs();
        let _guard = self.locks.lock(union_path);

        let entries = merge_readdir(&self.branches, union_path)?;
        if !entries.is_empty() {
            return Err(Error::NotEmpty(union_path.to_path_buf()));
        }

        let resolution = resolve(&self.branches, union_path, Intent::Delete);
        if matches!(resolution, Resolution::NotFound | Resolution::Whitedout) {
            return Err(Error::NotFound(union_path.to_path_buf()));
        }

        let name = union_path
            .file_name()
            .ok_or_else(|| Error::InvalidArgument("path has no file name".into()))?;
        let parent = union_path.parent().unwrap_or_else(|| Path::new(""));

        let mut any_existed = false;
        for branch in self.branches.iter() {
            let full = branch.full_path(union_path_without_root(union_path));
            if full.is_dir() {
                any_existed = true;
                if branch.is_rw() {
                    std::fs::remove_dir(&full).with_path(&full)?;
                } else {
                    let rw = self
                        .branches
                        .rw_at_or_above(branch.index)
                        .ok_or_else(|| Error::PermissionDenied(union_path.to_path_buf()))?;
                    whiteout::mark_whiteout(&rw.full_path(union_path_without_root(parent)), name)?;
                    self.stats.whiteouts_created();
                }
            }
        }

        if !any_existed {
            return Err(Error::NotFound(union_path.to_path_buf()));
        }
        Ok(())
    }

    /// rename: delegates to the dedicated rename engine
    pub fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        self.trace("rename", src);
        self.stats.renames();
        rename_engine::rename(&self.branches, &self.locks, src, dst, self.options.preserve_branch)
    }

    /// readdir: the merged listing, with the synthetic `stats` entry
    /// injected at the root when the `stats` option is enabled
    pub fn readdir(&self, union_path: &Path) -> Result<Vec<MergedEntry>> {
        self.trace("readdir", union_path);
        self.stats.readdirs();
        let mut entries = merge_readdir(&self.branches, union_path)?;
        if self.options.stats && union_path.as_os_str().is_empty() {
            entries.push(MergedEntry {
                name: crate::stats::STATS_FILE_NAME.into(),
                branch: 0,
            });
        }
        Ok(entries)
    }

    /// read the synthetic stats file body
    pub fn read_stats_file(&self) -> Option<String> {
        if self.options.stats {
            Some(self.stats.render())
        } else {
            None
        }
    }

    /// fsync: forwarded to the already-open file at `full_path`
    pub fn fsync(&self, full_path: &Path) -> Result<()> {
        self.trace("fsync", full_path);
        fs::fsync_file(full_path)
    }

    /// statfs: aggregate free/available space across RW branches only,
    /// total capacity across every branch.
    ///
    /// each branch can live on a filesystem with its own block size, so
    /// every count is converted to bytes before summing and only
    /// converted back to the reported block size (the topmost branch's)
    /// once, at the end; summing raw block counts across branches with
    /// different block sizes would silently misreport totals.
    pub fn statfs(&self) -> Result<UnionStatfs> {
        self.trace("statfs", Path::new(""));
        let mut block_size = 1u64;
        let mut total_bytes = 0u64;
        let mut free_bytes = 0u64;
        let mut available_bytes = 0u64;
        let mut files_total = 0u64;
        let mut files_free = 0u64;

        for (i, branch) in self.branches.iter().enumerate() {
            let vfs = nix::sys::statvfs::statvfs(&branch.root).map_err(|errno| Error::Io {
                path: branch.root.clone(),
                source: std::io::Error::from_raw_os_error(errno as i32),
            })?;
            let bsize = (vfs.fragment_size() as u64).max(1);
            if i == 0 {
                block_size = bsize;
            }
            total_bytes += vfs.blocks() as u64 * bsize;
            if branch.is_rw() {
                free_bytes += vfs.blocks_free() as u64 * bsize;
                available_bytes += vfs.blocks_available() as u64 * bsize;
                files_free += vfs.files_free() as u64;
            }
            files_total += vfs.files() as u64;
        }

        Ok(UnionStatfs {
            block_size,
            blocks_total: total_bytes / block_size,
            blocks_free: free_bytes / block_size,
            blocks_available: available_bytes / block_size,
            files_total,
            files_free,
        })
    }

    fn require_found(&self, union_path: &Path, resolution: Resolution) -> Result<(usize, PathBuf)> {
        match resolution {
            Resolution::Found { branch, relpath } => Ok((branch, relpath)),
            Resolution::Whitedout | Resolution::NotFound => {
                Err(Error::NotFound(union_path.to_path_buf()))
            }
        }
    }
}

/// choose which branch a brand-new name should be created on
///
/// without cow, creation is restricted to branch 0 (fails if it's RO, even
/// when a lower-indexed RW branch exists further down); with cow, the
/// first RW branch anywhere is eligible.
pub fn choose_create_branch(branches: &BranchTable, cow_enabled: bool) -> Option<usize> {
    if cow_enabled {
        branches.topmost_rw().map(|b| b.index)
    } else {
        branches.get(0).filter(|b| b.is_rw()).map(|b| b.index)
    }
}

fn lower_branches_have(branches: &BranchTable, branch: usize, relpath: &Path) -> bool {
    branches
        .iter()
        .filter(|b| b.index > branch)
        .any(|b| b.full_path(relpath).symlink_metadata().is_ok())
}

fn materialize_parent_on(branches: &BranchTable, target_index: usize, parent: &Path) -> Result<()> {
    let target = branches.get(target_index).unwrap();
    let full = target.full_path(union_path_without_root(parent));
    if full.as_os_str().is_empty() || full.exists() {
        return Ok(());
    }
    for other in branches.iter() {
        let candidate = other.full_path(union_path_without_root(parent));
        if let Ok(meta) = std::fs::metadata(&candidate) {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            return fs::create_directory(&full, meta.uid(), meta.gid(), meta.permissions().mode(), &[]);
        }
    }
    std::fs::create_dir_all(&full).map_err(|e| Error::Io {
        path: full,
        source: e,
    })
}

fn union_path_without_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Branch, BranchMode};
    use tempfile::tempdir;

    fn dispatcher(rw: &Path, ro: &Path, cow: bool) -> Dispatcher {
        let branches = BranchTable::new(vec![
            Branch::new(0, rw.to_path_buf(), BranchMode::ReadWrite),
            Branch::new(1, ro.to_path_buf(), BranchMode::ReadOnly),
        ])
        .unwrap();
        Dispatcher::new(branches, MountOptions { cow, ..Default::default() })
    }

    #[test]
    fn test_cow_on_first_write() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        std::fs::write(ro.path().join("ro1_file"), "ro1").unwrap();

        let d = dispatcher(rw.path(), ro.path(), true);
        let write_path = d.prepare_write(Path::new("ro1_file")).unwrap();
        std::fs::write(&write_path, "something").unwrap();

        assert_eq!(std::fs::read(rw.path().join("ro1_file")).unwrap(), b"something");
        assert_eq!(std::fs::read(ro.path().join("ro1_file")).unwrap(), b"ro1");
    }

    #[test]
    fn test_write_ro_over_ro_fails_eacces() {
        let ro1 = tempdir().unwrap();
        let ro2 = tempdir().unwrap();
        std::fs::write(ro1.path().join("f"), "x").unwrap();

        let branches = BranchTable::new(vec![
            Branch::new(0, ro1.path().to_path_buf(), BranchMode::ReadOnly),
            Branch::new(1, ro2.path().to_path_buf(), BranchMode::ReadOnly),
        ])
        .unwrap();
        let d = Dispatcher::new(branches, MountOptions { cow: true, ..Default::default() });

        let err = d.prepare_write(Path::new("f")).unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
    }

    #[test]
    fn test_whiteout_on_delete() {
        let rw1 = tempdir().unwrap();
        let ro1 = tempdir().unwrap();
        std::fs::write(ro1.path().join("ro1_file"), "ro1").unwrap();

        let d = dispatcher(rw1.path(), ro1.path(), true);
        d.unlink(Path::new("ro1_file")).unwrap();

        assert!(ro1.path().join("ro1_file").exists());
        assert!(rw1.path().join(".unionfs_HIDDEN~ro1_file").exists());

        let entries = d.readdir(Path::new("")).unwrap();
        assert!(entries.iter().all(|e| e.name != "ro1_file"));
    }

    #[test]
    fn test_unlink_ro_without_cow_is_rofs() {
        let rw1 = tempdir().unwrap();
        let ro1 = tempdir().unwrap();
        std::fs::write(ro1.path().join("ro1_file"), "ro1").unwrap();

        let d = dispatcher(rw1.path(), ro1.path(), false);
        let err = d.unlink(Path::new("ro1_file")).unwrap_err();
        assert_eq!(err.errno(), libc::EROFS);
    }

    #[test]
    fn test_stats_present_iff_option_enabled() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        let branches = BranchTable::new(vec![
            Branch::new(0, rw.path().to_path_buf(), BranchMode::ReadWrite),
            Branch::new(1, ro.path().to_path_buf(), BranchMode::ReadOnly),
        ])
        .unwrap();

        let with_stats = Dispatcher::new(branches.clone(), MountOptions { stats: true, ..Default::default() });
        let entries = with_stats.readdir(Path::new("")).unwrap();
        assert!(entries.iter().any(|e| e.name == "stats"));

        let without_stats = Dispatcher::new(branches, MountOptions::default());
        let entries = without_stats.readdir(Path::new("")).unwrap();
        assert!(entries.iter().all(|e| e.name != "stats"));
    }

    #[test]
    fn test_create_without_cow_restricted_to_branch_zero() {
        let ro0 = tempdir().unwrap();
        let rw1 = tempdir().unwrap();
        let branches = BranchTable::new(vec![
            Branch::new(0, ro0.path().to_path_buf(), BranchMode::ReadOnly),
            Branch::new(1, rw1.path().to_path_buf(), BranchMode::ReadWrite),
        ])
        .unwrap();
        let d = Dispatcher::new(branches, MountOptions::default());

        let err = d.create(Path::new("newfile")).unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
    }

    #[test]
    fn test_create_with_cow_scans_for_any_rw_branch() {
        let ro0 = tempdir().unwrap();
        let rw1 = tempdir().unwrap();
        let branches = BranchTable::new(vec![
            Branch::new(0, ro0.path().to_path_buf(), BranchMode::ReadOnly),
            Branch::new(1, rw1.path().to_path_buf(), BranchMode::ReadWrite),
        ])
        .unwrap();
        let d = Dispatcher::new(branches, MountOptions { cow: true, ..Default::default() });

        let target = d.create(Path::new("newfile")).unwrap();
        assert_eq!(target, rw1.path().join("newfile"));
    }

    #[test]
    fn test_rmdir_rejects_non_empty() {
        let rw = tempdir().unwrap();
        std::fs::create_dir(rw.path().join("dir")).unwrap();
        std::fs::write(rw.path().join("dir/f"), "x").unwrap();

        let branches = BranchTable::new(vec![Branch::new(0, rw.path().to_path_buf(), BranchMode::ReadWrite)]).unwrap();
        let d = Dispatcher::new(branches, MountOptions::default());

        let err = d.rmdir(Path::new("dir")).unwrap_err();
        assert!(matches!(err, Error::NotEmpty(_)));
    }

    #[test]
    fn test_create_special_rejects_whiteout_name() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        let d = dispatcher(rw.path(), ro.path(), false);

        let err = d
            .create_special(Path::new(".unionfs_HIDDEN~x"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_create_special_symlink_target_path() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        let d = dispatcher(rw.path(), ro.path(), false);

        let full = d.create_special(Path::new("link")).unwrap();
        assert_eq!(full, rw.path().join("link"));

        std::os::unix::fs::symlink("/target", &full).unwrap();
        assert!(full.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_statfs_excludes_ro_branches_from_free_space() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        let d = dispatcher(rw.path(), ro.path(), false);

        let statfs = d.statfs().unwrap();
        // both branches live on the same filesystem in this test, so total
        // block count must be at least double a single branch's count
        let single = nix::sys::statvfs::statvfs(rw.path()).unwrap();
        assert!(statfs.blocks_total >= single.blocks() as u64);
        assert!(statfs.blocks_free > 0);
    }
}
