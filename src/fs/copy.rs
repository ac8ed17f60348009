use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;

use crate::error::{IoResultExt, Result};
use crate::fs::read::read_xattrs;
use crate::fs::write::apply_metadata;

/// copy-up a regular file from `source` to `dest`, preserving mode, owner,
/// timestamps, and extended attributes on a best-effort basis
///
/// `dest` is created with O_CREAT|O_EXCL: if something raced in and
/// created it first, this returns `AlreadyExists` and the caller decides
/// whether that means the promotion already happened.
pub fn copy_up_file(source: &Path, dest: &Path) -> Result<()> {
    let src_meta = fs::metadata(source).with_path(source)?;
    let mode = src_meta.permissions().mode();

    let mut dest_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode & 0o7777)
        .open(dest)
        .with_path(dest)?;

    let mut src_file = fs::File::open(source).with_path(source)?;
    io::copy(&mut src_file, &mut dest_file).with_path(dest)?;
    dest_file.flush().with_path(dest)?;
    drop(dest_file);

    let xattrs = read_xattrs(source)?;
    apply_metadata(dest, src_meta.uid(), src_meta.gid(), mode, &xattrs)?;

    let atime = TimeSpec::new(src_meta.atime(), src_meta.atime_nsec());
    let mtime = TimeSpec::new(src_meta.mtime(), src_meta.mtime_nsec());
    utimensat(
        nix::fcntl::AT_FDCWD,
        dest,
        &atime,
        &mtime,
        UtimensatFlags::NoFollowSymlink,
    )
    .map_err(|e| {
        crate::error::Error::Io {
            path: dest.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    })?;

    Ok(())
}
