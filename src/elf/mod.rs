mod writer;

pub use writer::SoEditor;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoPatchError {
    #[error("failed to parse shared object: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("shared object has no dynamic section")]
    NoDynamicSection,
    #[error("dynamic string table missing or out of bounds")]
    BadStringTable,
    #[error("failed to serialize patched image: {0}")]
    Serialize(#[from] scroll::Error),
}
