use std::collections::HashSet;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::types::BranchTable;
use crate::whiteout;

/// a single entry in a merged directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedEntry {
    pub name: OsString,
    /// lowest-indexed branch supplying this entry's content
    pub branch: usize,
}

/// build the union listing of `relpath`, scanning every branch that
/// contains the directory in ascending index order
///
/// maintains `emitted` (names already yielded) and `masked` (names hidden
/// by a whiteout seen in an earlier branch); a readdir running concurrently
/// with an in-flight promotion may see transient duplicates across
/// branches, which `emitted` absorbs, or a momentarily missing entry,
/// which is simply not surfaced this call.
pub fn merge_readdir(branches: &BranchTable, relpath: &Path) -> Result<Vec<MergedEntry>> {
    let mut emitted: HashSet<OsString> = HashSet::new();
    let mut masked: HashSet<OsString> = HashSet::new();
    let mut result = Vec::new();

    for branch in branches.iter() {
        let dir_path = branch.full_path(relpath);
        let read_dir = match std::fs::read_dir(&dir_path) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_path(dir_path),
        };

        for entry in read_dir {
            let entry = entry.with_path(&dir_path)?;
            let name = entry.file_name();

            if whiteout::is_whiteout(&name) {
                if let Some(masked_name) = whiteout::extract_masked_name(&name) {
                    masked.insert(masked_name);
                }
                continue;
            }

            if emitted.contains(&name) || masked.contains(&name) {
                continue;
            }

            emitted.insert(name.clone());
            result.push(MergedEntry {
                name,
                branch: branch.index,
            });
        }
    }

    Ok(result)
}
