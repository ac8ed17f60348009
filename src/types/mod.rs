mod branch;
mod metadata;
mod resolution;

pub use branch::{Branch, BranchMode, BranchTable};
pub use metadata::Xattr;
pub use resolution::{Intent, Resolution};
