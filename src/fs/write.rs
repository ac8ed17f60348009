use std::ffi::CString;
use std::fs::{self, File, Permissions};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use nix::libc;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// materialize a directory on a branch, used both for promoting an
/// RO-resident directory and for creating the ancestor chain a new entry
/// needs on its target branch
pub fn create_directory(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    fs::create_dir_all(path).with_path(path)?;
    apply_metadata(path, uid, gid, mode, xattrs)
}

/// materialize a symlink on a branch, preserving the target string and
/// (where they differ from the caller's own identity) its owner
pub fn create_symlink(path: &Path, target: &str, uid: u32, gid: u32, xattrs: &[Xattr]) -> Result<()> {
    remove_existing_entry(path)?;
    symlink(target, path).with_path(path)?;

    if uid != current_uid() || gid != current_gid() {
        lchown_path(path, uid, gid)?;
    }

    // a symlink's own permission bits can't be changed, but its xattrs can
    // still be set without following it into the target
    for xattr in xattrs {
        if let Err(e) = set_xattr_no_follow(path, &xattr.name, &xattr.value) {
            log::warn!("failed to set xattr {} on symlink {:?}: {}", xattr.name, path, e);
        }
    }

    Ok(())
}

/// materialize a block device node on a branch
pub fn create_block_device(
    path: &Path,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    create_device_node(path, SFlag::S_IFBLK, major, minor, uid, gid, mode, xattrs)
}

/// materialize a character device node on a branch
pub fn create_char_device(
    path: &Path,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    create_device_node(path, SFlag::S_IFCHR, major, minor, uid, gid, mode, xattrs)
}

/// materialize a named pipe on a branch
pub fn create_fifo(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    remove_existing_entry(path)?;
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, e),
    })?;
    apply_metadata(path, uid, gid, mode, xattrs)
}

fn create_device_node(
    path: &Path,
    sflag: SFlag,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    remove_existing_entry(path)?;
    let dev = makedev(major as u64, minor as u64);

    mknod(path, sflag, Mode::from_bits_truncate(mode), dev).map_err(|e| {
        if e == nix::errno::Errno::EPERM {
            Error::PermissionDenied(path.to_path_buf())
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, e),
            }
        }
    })?;

    apply_metadata(path, uid, gid, mode, xattrs)
}

/// reapply a promoted entry's preserved owner, mode, and extended
/// attributes to an already-created path on the destination branch
///
/// xattrs are set before ownership/mode so a mode change that drops write
/// permission can't block the xattr writes that should have preceded it.
pub fn apply_metadata(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    for xattr in xattrs {
        xattr::set(path, &xattr.name, &xattr.value).map_err(|e| Error::Xattr {
            path: path.to_path_buf(),
            message: format!("failed to set {}: {}", xattr.name, e),
        })?;
    }

    if uid != current_uid() || gid != current_gid() {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, e),
        })?;
    }

    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).with_path(path)
}

/// remove whatever currently occupies `path` (file, directory entry, or a
/// broken symlink `exists()` wouldn't report) before a fresh entry of a
/// possibly different type is created in its place
fn remove_existing_entry(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).with_path(path)?;
    }
    Ok(())
}

fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::getgid().as_raw()
}

/// chown a symlink itself rather than the path it points at
fn lchown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid path"),
    })?;
    let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if ret != 0 {
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// set an extended attribute on a symlink itself via `lsetxattr`, since the
/// `xattr` crate's own `set` follows the link into its target
fn set_xattr_no_follow(path: &Path, name: &str, value: &[u8]) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid path"))?;
    let c_name = CString::new(name)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid xattr name"))?;
    let ret = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// sync a promoted file's contents to disk
pub fn fsync_file(path: &Path) -> Result<()> {
    let file = File::open(path).with_path(path)?;
    file.sync_all().with_path(path)
}

/// sync a directory entry (e.g. after a rename) to disk
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    fn current_ids() -> (u32, u32) {
        (current_uid(), current_gid())
    }

    #[test]
    fn test_create_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir");
        let (uid, gid) = current_ids();

        create_directory(&path, uid, gid, 0o755, &[]).unwrap();

        assert!(path.is_dir());
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o755);
    }

    #[test]
    fn test_create_symlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link");
        let (uid, gid) = current_ids();

        create_symlink(&path, "/target/path", uid, gid, &[]).unwrap();

        assert!(path.symlink_metadata().unwrap().file_type().is_symlink());
        let target = fs::read_link(&path).unwrap();
        assert_eq!(target.to_string_lossy(), "/target/path");
    }

    #[test]
    fn test_create_symlink_replaces_existing_broken_link() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link");
        symlink("/stale/target", &path).unwrap();
        let (uid, gid) = current_ids();

        create_symlink(&path, "/fresh/target", uid, gid, &[]).unwrap();

        let target = fs::read_link(&path).unwrap();
        assert_eq!(target.to_string_lossy(), "/fresh/target");
    }

    #[test]
    fn test_create_fifo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fifo");
        let (uid, gid) = current_ids();

        create_fifo(&path, uid, gid, 0o644, &[]).unwrap();

        use std::os::unix::fs::FileTypeExt;
        let meta = fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn test_apply_metadata_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        let (uid, gid) = current_ids();
        fs::write(&path, "content").unwrap();

        apply_metadata(&path, uid, gid, 0o600, &[]).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o600);
    }
}
