use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("image directory not found or not a directory: {0}")]
    InvalidDirectory(PathBuf),

    #[error("no valid PNG or JPEG images in {0}")]
    NoImages(PathBuf),

    #[error("brief file not found: {0}")]
    BriefNotFound(PathBuf),

    #[error("could not read brief {path}: {source}")]
    BriefUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{name}: {message}")]
    Image { name: String, message: String },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Concrete next step for user-facing output.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::InvalidDirectory(_) => "Check the --images path.",
            Self::NoImages(_) => "Add .png, .jpg or .jpeg files to the directory and run again.",
            Self::BriefNotFound(_) | Self::BriefUnreadable { .. } => {
                "Check the --brief path points to a readable text file."
            }
            Self::Image { .. } => "Check that the file is a readable PNG or JPEG image.",
            Self::Write { .. } | Self::Io(_) => {
                "Check that the output directory is writable and has free space."
            }
        }
    }
}
