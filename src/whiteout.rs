use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};

/// marker prefix hiding a lower-branch entry of the same name
pub const WHITEOUT_PREFIX: &str = ".unionfs_HIDDEN~";

/// name of the whiteout marker that hides `name`
pub fn marker_name(name: &OsStr) -> OsString {
    let mut marker = OsString::from(WHITEOUT_PREFIX);
    marker.push(name);
    marker
}

/// true if `entry_name` is itself a whiteout marker
pub fn is_whiteout(entry_name: &OsStr) -> bool {
    entry_name.as_bytes().starts_with(WHITEOUT_PREFIX.as_bytes())
}

/// the masked name a whiteout marker hides, or `None` if not a marker
pub fn extract_masked_name(whiteout_name: &OsStr) -> Option<OsString> {
    let bytes = whiteout_name.as_bytes();
    let prefix = WHITEOUT_PREFIX.as_bytes();
    bytes
        .strip_prefix(prefix)
        .map(|rest| OsString::from(OsStr::from_bytes(rest)))
}

/// create a whiteout for `name` inside `parent_dir` on a RW branch
///
/// creation is exclusive: if the marker already exists, the deletion it
/// represents is idempotent-success and this is not an error.
pub fn mark_whiteout(parent_dir: &Path, name: &OsStr) -> Result<()> {
    let marker_path = parent_dir.join(marker_name(name));
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker_path)
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).with_path(marker_path),
    }
}

/// remove a whiteout for `name` inside `parent_dir`, if present
pub fn clear_whiteout(parent_dir: &Path, name: &OsStr) -> Result<()> {
    let marker_path = parent_dir.join(marker_name(name));
    match std::fs::remove_file(&marker_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_path(marker_path),
    }
}

/// true if a whiteout for `name` exists inside `parent_dir`
pub fn has_whiteout(parent_dir: &Path, name: &OsStr) -> bool {
    parent_dir.join(marker_name(name)).exists()
}

/// validate that `name` is not itself attempting to address a whiteout
/// marker directly; union callers must never expose these as real entries
pub fn reject_reserved_name(name: &OsStr) -> Result<()> {
    if is_whiteout(name) {
        return Err(Error::InvalidArgument(format!(
            "{:?} is a reserved whiteout marker name",
            name
        )));
    }
    Ok(())
}
