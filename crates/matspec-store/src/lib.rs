//! Filesystem edge: image directory loading, brief reading, document output.

mod brief;
mod error;
mod images;
mod output;

pub use brief::read_brief;
pub use error::StoreError;
pub use images::{LoadReport, SkippedImage, encode_image, is_supported_image, load_images};
pub use output::write_document;
