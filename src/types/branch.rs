use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// read-only or read-write mode of a branch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchMode {
    ReadOnly,
    ReadWrite,
}

impl BranchMode {
    pub fn is_rw(self) -> bool {
        matches!(self, BranchMode::ReadWrite)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RO" => Ok(BranchMode::ReadOnly),
            "RW" => Ok(BranchMode::ReadWrite),
            other => Err(Error::InvalidBranchSpec(format!(
                "unknown branch mode '{}', expected RO or RW",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BranchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchMode::ReadOnly => write!(f, "RO"),
            BranchMode::ReadWrite => write!(f, "RW"),
        }
    }
}

/// a single backing directory composed into the union
#[derive(Clone, Debug)]
pub struct Branch {
    /// position in the overlay order; 0 is topmost (highest visibility priority)
    pub index: usize,
    pub root: PathBuf,
    pub mode: BranchMode,
}

impl Branch {
    pub fn new(index: usize, root: impl Into<PathBuf>, mode: BranchMode) -> Self {
        Self {
            index,
            root: root.into(),
            mode,
        }
    }

    pub fn is_rw(&self) -> bool {
        self.mode.is_rw()
    }

    /// resolve a branch-relative path (given as a union-relative path with
    /// no leading separator) against this branch's root
    pub fn full_path(&self, relpath: &Path) -> PathBuf {
        if relpath.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(relpath)
        }
    }
}

/// the ordered, immutable-after-mount list of branches backing the union
#[derive(Clone, Debug)]
pub struct BranchTable {
    branches: Vec<Branch>,
}

impl BranchTable {
    pub fn new(branches: Vec<Branch>) -> Result<Self> {
        if branches.is_empty() {
            return Err(Error::InvalidBranchSpec(
                "at least one branch is required".to_string(),
            ));
        }
        for (i, b) in branches.iter().enumerate() {
            if b.index != i {
                return Err(Error::InvalidBranchSpec(
                    "branch indices must be contiguous starting at 0".to_string(),
                ));
            }
        }
        Ok(Self { branches })
    }

    /// parse a `dir1=MODE:dir2=MODE:...` branch spec, topmost-first
    pub fn parse(spec: &str) -> Result<Self> {
        let mut branches = Vec::new();
        for (i, part) in spec.split(':').enumerate() {
            if part.is_empty() {
                return Err(Error::InvalidBranchSpec(
                    "empty branch entry in spec".to_string(),
                ));
            }
            let (dir, mode) = part.rsplit_once('=').ok_or_else(|| {
                Error::InvalidBranchSpec(format!("branch entry '{}' missing '=MODE'", part))
            })?;
            if dir.is_empty() {
                return Err(Error::InvalidBranchSpec(format!(
                    "branch entry '{}' has an empty directory",
                    part
                )));
            }
            let mode = BranchMode::parse(mode)?;
            branches.push(Branch::new(i, dir, mode));
        }
        BranchTable::new(branches)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// branches in ascending index order (topmost first)
    pub fn iter(&self) -> impl Iterator<Item = &Branch> {
        self.branches.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Branch> {
        self.branches.get(index)
    }

    /// the topmost (lowest-index) writable branch, regardless of any other branch
    pub fn topmost_rw(&self) -> Option<&Branch> {
        self.branches.iter().find(|b| b.is_rw())
    }

    /// the writable branch with the smallest index that is <= `max_index`
    pub fn rw_at_or_above(&self, max_index: usize) -> Option<&Branch> {
        self.branches
            .iter()
            .take(max_index + 1)
            .find(|b| b.is_rw())
    }

    pub fn total_rw(&self) -> usize {
        self.branches.iter().filter(|b| b.is_rw()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_branch_spec() {
        let table = BranchTable::parse("/rw1=RW:/ro1=RO:/ro2=ro").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0).unwrap().root, PathBuf::from("/rw1"));
        assert!(table.get(0).unwrap().is_rw());
        assert!(!table.get(1).unwrap().is_rw());
        assert!(!table.get(2).unwrap().is_rw());
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        assert!(BranchTable::parse("/a=XX").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_spec() {
        assert!(BranchTable::parse("").is_err());
        assert!(BranchTable::parse("/a=RW:").is_err());
    }

    #[test]
    fn test_topmost_rw() {
        let table = BranchTable::parse("/ro1=RO:/rw1=RW:/rw2=RW").unwrap();
        assert_eq!(table.topmost_rw().unwrap().index, 1);
    }

    #[test]
    fn test_rw_at_or_above() {
        let table = BranchTable::parse("/rw1=RW:/ro1=RO:/ro2=RO").unwrap();
        // ro2 is index 2; eligible rw branch with index <= 2 is rw1 (index 0)
        assert_eq!(table.rw_at_or_above(2).unwrap().index, 0);

        let table2 = BranchTable::parse("/ro1=RO:/rw1=RW").unwrap();
        // ro1 is index 0; no rw branch with index <= 0
        assert!(table2.rw_at_or_above(0).is_none());
        assert_eq!(table2.rw_at_or_above(1).unwrap().index, 1);
    }
}
