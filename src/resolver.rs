use std::path::{Path, PathBuf};

use crate::types::{BranchTable, Intent, Resolution};
use crate::whiteout;

/// resolve a union-relative path against the branch table
///
/// walks path components left to right; at each directory component,
/// branches are consulted in ascending index order so a whiteout or a
/// matching entry in a higher-priority branch short-circuits lower ones.
/// the final component resolves to the lowest-indexed branch that has a
/// non-whited-out entry for it.
pub fn resolve(branches: &BranchTable, union_path: &Path, _intent: Intent) -> Resolution {
    let components: Vec<_> = union_path
        .components()
        .filter(|c| !matches!(c, std::path::Component::RootDir | std::path::Component::CurDir))
        .collect();

    if components.is_empty() {
        // the mount root always "exists" at branch 0
        return Resolution::Found {
            branch: 0,
            relpath: PathBuf::new(),
        };
    }

    let mut current_relpath = PathBuf::new();
    let mut shadowed_below: Option<usize> = None;

    for (i, component) in components.iter().enumerate() {
        let is_last = i == components.len() - 1;
        let name = component.as_os_str();
        let mut found_at: Option<usize> = None;
        let mut whiteout_seen = false;

        for branch in branches.iter() {
            if let Some(shadow_branch) = shadowed_below {
                if branch.index < shadow_branch {
                    continue;
                }
            }

            let parent_full = branch.full_path(&current_relpath);
            if whiteout::has_whiteout(&parent_full, name) {
                whiteout_seen = true;
                // a whiteout at this branch hides the name on this branch
                // and every branch below it (higher index)
                shadowed_below = Some(branch.index.max(shadowed_below.unwrap_or(0)));
                continue;
            }

            let candidate = parent_full.join(name);
            match candidate.symlink_metadata() {
                Ok(meta) => {
                    if is_last {
                        found_at = Some(branch.index);
                        let _ = meta;
                        break;
                    } else if meta.is_dir() {
                        // merged directory: keep scanning lower branches for
                        // presence, but don't need content from any one branch
                        found_at = Some(branch.index);
                        break;
                    } else {
                        // a non-directory shadows the same name below it
                        found_at = Some(branch.index);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(_) => continue,
            }
        }

        match found_at {
            Some(branch_index) => {
                current_relpath.push(name);
                if is_last {
                    return Resolution::Found {
                        branch: branch_index,
                        relpath: current_relpath,
                    };
                }
            }
            None => {
                return if whiteout_seen {
                    Resolution::Whitedout
                } else {
                    Resolution::NotFound
                };
            }
        }
    }

    Resolution::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Branch, BranchMode};
    use tempfile::tempdir;

    fn make_branches(dirs: &[(&std::path::Path, BranchMode)]) -> BranchTable {
        let branches = dirs
            .iter()
            .enumerate()
            .map(|(i, (dir, mode))| Branch::new(i, dir.to_path_buf(), *mode))
            .collect();
        BranchTable::new(branches).unwrap()
    }

    #[test]
    fn test_resolve_simple_file() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        std::fs::write(ro.path().join("ro1_file"), "ro1").unwrap();

        let table = make_branches(&[(rw.path(), BranchMode::ReadWrite), (ro.path(), BranchMode::ReadOnly)]);
        let res = resolve(&table, Path::new("ro1_file"), Intent::Read);
        assert_eq!(
            res,
            Resolution::Found {
                branch: 1,
                relpath: PathBuf::from("ro1_file")
            }
        );
    }

    #[test]
    fn test_resolve_overlay_order_prefers_topmost() {
        let ro1 = tempdir().unwrap();
        let ro2 = tempdir().unwrap();
        std::fs::write(ro1.path().join("common_file"), "ro1").unwrap();
        std::fs::write(ro2.path().join("common_file"), "ro2").unwrap();

        let table = make_branches(&[(ro1.path(), BranchMode::ReadOnly), (ro2.path(), BranchMode::ReadOnly)]);
        let res = resolve(&table, Path::new("common_file"), Intent::Read);
        assert_eq!(res.branch_index(), Some(0));
    }

    #[test]
    fn test_resolve_not_found() {
        let rw = tempdir().unwrap();
        let table = make_branches(&[(rw.path(), BranchMode::ReadWrite)]);
        let res = resolve(&table, Path::new("missing"), Intent::Read);
        assert_eq!(res, Resolution::NotFound);
    }

    #[test]
    fn test_resolve_whitedout() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        std::fs::write(ro.path().join("ro1_file"), "ro1").unwrap();
        whiteout::mark_whiteout(rw.path(), std::ffi::OsStr::new("ro1_file")).unwrap();

        let table = make_branches(&[(rw.path(), BranchMode::ReadWrite), (ro.path(), BranchMode::ReadOnly)]);
        let res = resolve(&table, Path::new("ro1_file"), Intent::Read);
        assert_eq!(res, Resolution::Whitedout);
    }

    #[test]
    fn test_resolve_nested_path() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        std::fs::create_dir(ro.path().join("dir")).unwrap();
        std::fs::write(ro.path().join("dir/f"), "x").unwrap();

        let table = make_branches(&[(rw.path(), BranchMode::ReadWrite), (ro.path(), BranchMode::ReadOnly)]);
        let res = resolve(&table, Path::new("dir/f"), Intent::Read);
        assert_eq!(
            res,
            Resolution::Found {
                branch: 1,
                relpath: PathBuf::from("dir/f")
            }
        );
    }
}
