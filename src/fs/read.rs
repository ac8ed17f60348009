use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use log::warn;
use nix::libc;

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// the kind of entry found at a branch-relative path, used by
/// [`crate::cow::copy_entity`] to pick which creation primitive promotes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_file() {
            FileType::Regular
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else {
            FileType::Regular
        }
    }
}

/// the attributes `getattr` reports for a resolved union path, and the
/// source metadata `cow::promote` reads off the branch an entity is
/// currently resident on before copying it up
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_type: FileType,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
    pub rdev: Option<(u32, u32)>,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
}

impl FileMetadata {
    /// read the metadata a resolved branch path should report; does not
    /// follow a trailing symlink, since the union presents the link itself
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Ok(Self::from_std_metadata(&meta))
    }

    pub fn from_std_metadata(meta: &Metadata) -> Self {
        let is_device = meta.file_type().is_block_device() || meta.file_type().is_char_device();
        Self {
            file_type: FileType::from_metadata(meta),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            size: meta.len(),
            rdev: is_device.then(|| device_numbers(meta)),
            ino: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
        }
    }
}

/// split a device entry's `st_rdev` into the major/minor pair `mknod`
/// expects; shared by [`FileMetadata`] and [`crate::cow::copy_entity`] so
/// the two don't each re-derive it from raw metadata independently
pub fn device_numbers(meta: &Metadata) -> (u32, u32) {
    let rdev = meta.rdev();
    (
        nix::sys::stat::major(rdev) as u32,
        nix::sys::stat::minor(rdev) as u32,
    )
}

/// read every extended attribute on a branch entry, in the order
/// `cow::promote` should reapply them on the destination copy
pub fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let mut xattrs = Vec::new();

    let names: Vec<String> = match xattr::list(path) {
        Ok(iter) => iter.map(|n| n.to_string_lossy().into_owned()).collect(),
        Err(e) => {
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(vec![]);
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            });
        }
    };

    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name, value)),
            Ok(None) => {
                // removed between list and get; nothing to carry over
            }
            Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {}
            Err(e) => warn!("failed to read xattr {} on {:?} during promotion: {}", name, path, e),
        }
    }

    xattrs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(xattrs)
}

/// read a symlink's target so it can be recreated on the promoted branch
pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_path(path)?;
    Ok(target.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn test_file_type_regular() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "content").unwrap();

        let meta = FileMetadata::from_path(&path).unwrap();
        assert_eq!(meta.file_type, FileType::Regular);
    }

    #[test]
    fn test_file_type_directory() {
        let dir = tempdir().unwrap();
        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();

        let meta = FileMetadata::from_path(&subdir).unwrap();
        assert_eq!(meta.file_type, FileType::Directory);
    }

    #[test]
    fn test_file_type_symlink_not_followed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, "content").unwrap();
        symlink(&target, &link).unwrap();

        let meta = FileMetadata::from_path(&link).unwrap();
        assert_eq!(meta.file_type, FileType::Symlink);
    }

    #[test]
    fn test_metadata_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "content").unwrap();

        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let meta = FileMetadata::from_path(&path).unwrap();
        assert_eq!(meta.mode & 0o777, 0o644);
    }

    #[test]
    fn test_read_symlink_target() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("link");
        symlink("/some/target/path", &link).unwrap();

        let target = read_symlink_target(&link).unwrap();
        assert_eq!(target, "/some/target/path");
    }

    #[test]
    fn test_nlink_reflects_hardlinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "content").unwrap();

        let meta = FileMetadata::from_path(&path).unwrap();
        assert_eq!(meta.nlink, 1);

        let link = dir.path().join("link");
        fs::hard_link(&path, &link).unwrap();

        let meta2 = FileMetadata::from_path(&path).unwrap();
        assert_eq!(meta2.nlink, 2);
    }
}
