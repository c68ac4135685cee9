//! Crate-wide error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::ImageId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("watch: {0}")]
    Watch(#[from] notify::Error),

    #[error("unknown image id {0:?}")]
    UnknownImage(ImageId),
}

impl Error {
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::Image {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
