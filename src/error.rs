use std::path::PathBuf;

/// error type for union filesystem operations
///
/// every variant maps to a POSIX errno via [`Error::errno`] so the
/// dispatcher can hand a single numeric code back to its caller without
/// re-deriving it at each call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("read-only branch: cannot modify {0}")]
    ReadOnlyBranch(PathBuf),

    #[error("cross-device link: {0} -> {1}")]
    CrossDevice(PathBuf, PathBuf),

    #[error("file name too long: {0}")]
    NameTooLong(String),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("is a directory: {0}")]
    IsADirectory(PathBuf),

    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),

    #[error("file exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no branch available to satisfy the operation on {0}")]
    NoBranchAvailable(PathBuf),

    #[error("invalid branch spec: {0}")]
    InvalidBranchSpec(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },
}

impl Error {
    /// the POSIX errno this error should surface as to a filesystem caller
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::PermissionDenied(_) => libc::EACCES,
            Error::ReadOnlyBranch(_) => libc::EROFS,
            Error::CrossDevice(..) => libc::EXDEV,
            Error::NameTooLong(_) => libc::ENAMETOOLONG,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::IsADirectory(_) => libc::EISDIR,
            Error::NotEmpty(_) => libc::ENOTEMPTY,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::NoBranchAvailable(_) => libc::EACCES,
            Error::InvalidBranchSpec(_) => libc::EINVAL,
            Error::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::Config(_) | Error::ConfigSerialize(_) => libc::EINVAL,
            Error::Xattr { .. } => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
