//! unionfs-core - path-resolution and mutation engine for a userspace
//! union/overlay filesystem
//!
//! presents a single merged directory view composed of an ordered list of
//! branches, each read-only or read-write, and routes each operation to
//! the branch that should service it: reads and lookups resolve through
//! overlay order; writes to a read-only-resident entity are promoted
//! (copy-on-write) to a writable branch when `cow` is enabled; deletions
//! of entries that still exist on a lower branch are recorded with
//! whiteout marker files rather than actually removing the lower entry.
//!
//! # Example
//!
//! ```no_run
//! use unionfs_core::config::MountOptions;
//! use unionfs_core::mount::UnionFs;
//! use std::path::Path;
//!
//! let fs = UnionFs::from_branch_spec(
//!     "/data/rw=RW:/data/ro=RO",
//!     MountOptions { cow: true, stats: true, ..Default::default() },
//!     Path::new("/mnt/union"),
//! ).unwrap();
//!
//! let attrs = fs.dispatcher().getattr(Path::new("some_file")).unwrap();
//! ```

pub mod config;
pub mod cow;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod locks;
pub mod mount;
pub mod readdir;
pub mod rename;
pub mod resolver;
pub mod stats;
pub mod types;
pub mod whiteout;

pub use config::{Config, MountOptions};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use mount::UnionFs;
pub use types::{Branch, BranchMode, BranchTable, Intent, Resolution, Xattr};
