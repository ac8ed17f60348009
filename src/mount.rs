use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// a mounted union filesystem: the branch table, its options, and the
/// dispatcher operating over them
///
/// constructed once from a parsed [`Config`] and then treated as an
/// immutable handle — all mutable state (locks, stats counters) lives
/// behind the dispatcher's own interior mutability.
pub struct UnionFs {
    mountpoint: PathBuf,
    dispatcher: Dispatcher,
}

impl UnionFs {
    /// build a mount from an already-parsed config and a mountpoint path
    pub fn new(config: &Config, mountpoint: &Path) -> Result<Self> {
        let branches = config.branches()?;
        let dispatcher = Dispatcher::new(branches, config.options.clone());
        Ok(Self {
            mountpoint: mountpoint.to_path_buf(),
            dispatcher,
        })
    }

    /// parse a `branch_spec` directly, without a config file
    pub fn from_branch_spec(
        branch_spec: &str,
        options: crate::config::MountOptions,
        mountpoint: &Path,
    ) -> Result<Self> {
        let config = Config::new(branch_spec, options);
        Self::new(&config, mountpoint)
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use tempfile::tempdir;

    #[test]
    fn test_unionfs_from_branch_spec() {
        let rw = tempdir().unwrap();
        let ro = tempdir().unwrap();
        let spec = format!("{}=RW:{}=RO", rw.path().display(), ro.path().display());

        let mnt = tempdir().unwrap();
        let fs = UnionFs::from_branch_spec(&spec, MountOptions::default(), mnt.path()).unwrap();
        assert_eq!(fs.dispatcher().branches().len(), 2);
    }
}
