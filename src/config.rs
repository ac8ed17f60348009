use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::types::BranchTable;

/// runtime mount options, set from the command line and kept immutable for
/// the lifetime of the mount
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MountOptions {
    /// enable copy-on-write promotion and whiteout-based deletion
    #[serde(default)]
    pub cow: bool,
    /// expose the synthetic `stats` file at the mount root
    #[serde(default)]
    pub stats: bool,
    /// access checks consult file mode bits regardless of requesting uid/gid
    #[serde(default)]
    pub relaxed_permissions: bool,
    /// keep renamed entities on their existing RW branch instead of EXDEV
    #[serde(default)]
    pub preserve_branch: bool,
    /// path to write a line-oriented debug log of dispatched operations
    #[serde(default)]
    pub debug_file: Option<PathBuf>,
    /// mark the mount so it is released when the owning process exits
    #[serde(default)]
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cow: false,
            stats: false,
            relaxed_permissions: false,
            preserve_branch: false,
            debug_file: None,
            auto_unmount: false,
        }
    }
}

/// persisted mount configuration: the branch table plus its options
///
/// this is what `unionfs-shell` parses from its `branch_spec` argument and
/// what a saved `config.toml` round-trips, so a mount can be reproduced
/// without retyping the branch spec.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// colon-separated `dir1=MODE:dir2=MODE:...`, topmost-first
    pub branch_spec: String,
    #[serde(default)]
    pub options: MountOptions,
}

impl Config {
    pub fn new(branch_spec: impl Into<String>, options: MountOptions) -> Self {
        Self {
            branch_spec: branch_spec.into(),
            options,
        }
    }

    /// parse and validate the branch table embedded in this config
    pub fn branches(&self) -> Result<BranchTable> {
        BranchTable::parse(&self.branch_spec)
    }

    /// load config from a toml file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to a toml file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}
