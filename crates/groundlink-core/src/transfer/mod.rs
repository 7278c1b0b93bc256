//! Preset and flash transfer
//!
//! Moving configuration ("preset") data and logged flight data between the
//! flight computer, memory and files: upload/download/verify of presets, and
//! streaming the flash contents out of the device.

mod flash;
mod preset;

pub use flash::{FlashExtractor, FlashImage};
pub use preset::{Preset, PresetTransfer, PresetValue, PRESET_FILE_VERSION};

use thiserror::Error;

use crate::protocol::{CodecError, SessionError};

/// Errors persisting presets or flash data to files.
///
/// Kept separate from protocol failures: a disk fault never retroactively
/// invalidates a successful device transfer.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed preset file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors moving preset or flash data to and from the device.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("preset schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("device rejected field '{field}' (status {code:#04x})")]
    RejectedField { field: String, code: u8 },

    #[error("upload stopped at field '{field}': {committed} of {total} fields committed")]
    PartialUpload {
        committed: usize,
        total: usize,
        field: String,
    },

    #[error("download incomplete, missing fields: {}", missing.join(", "))]
    IncompleteDownload { missing: Vec<String> },

    #[error("corrupt flash data at record {index}")]
    CorruptFlashData { index: usize },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}
