pub mod copy;
pub mod read;
pub mod write;

pub use copy::copy_up_file;
pub use read::{device_numbers, read_symlink_target, read_xattrs, FileMetadata, FileType};
pub use write::{
    apply_metadata, create_block_device, create_char_device, create_directory, create_fifo,
    create_symlink, fsync_dir, fsync_file,
};
