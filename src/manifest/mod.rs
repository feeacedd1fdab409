pub mod axml;
mod editor;

pub use editor::{ManifestEditor, ANDROID_NAMESPACE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("binary xml format error at offset {0:#x}")]
    Format(usize),
    #[error("manifest has no application element")]
    MissingApplication,
}
