use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid table file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error(
        "unable to access the file at the given path. Make sure the right permissions are available"
    )]
    Io(#[from] io::Error),

    #[error("the keyspace requires {0} bits but only 64 are available")]
    Space(u8),

    #[error("bucket lengths do not match the record count. Is the region sorted?")]
    BucketInvariant,
}
