use std::path::PathBuf;

/// the kind of access an operation is attempting, used by the resolver to
/// decide whether promotion or branch selection applies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
    Create,
    Delete,
}

/// the outcome of resolving a union path against the branch table
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// entity exists at `branch`, not shadowed by any whiteout above it
    Found { branch: usize, relpath: PathBuf },
    /// a whiteout above the lowest match hides the entity; treated as not-found
    Whitedout,
    /// no branch contains the name and no whiteout applies
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found { .. })
    }

    pub fn branch_index(&self) -> Option<usize> {
        match self {
            Resolution::Found { branch, .. } => Some(*branch),
            _ => None,
        }
    }
}
