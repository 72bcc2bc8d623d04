//! Error types for the EPUB voice-data preparation pass

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("EPUB archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("EPUB entry not found: {0}")]
    MissingEntry(String),

    #[error("Invalid EPUB package: {0}")]
    Package(String),

    #[error("Invalid SMIL document {document}: {message}")]
    Smil { document: String, message: String },

    #[error("Invalid clock value: {0:?}")]
    Clock(String),

    #[error("Fragment #{fragment} not found in {document}")]
    Fragment { document: String, fragment: String },

    #[error("Invalid content document {document}: {message}")]
    Content { document: String, message: String },

    #[error("Audio decoding error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Resampling error: {0}")]
    Resample(String),

    #[error("Clip {begin:.3}s-{end:.3}s exceeds {audio} ({duration:.3}s)")]
    ClipOutOfRange {
        audio: String,
        begin: f64,
        end: f64,
        duration: f64,
    },

    #[error("Audio sources {first} and {second} both map to segment name {stem:?}")]
    NameCollision {
        stem: String,
        first: String,
        second: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PrepareError>;

impl PrepareError {
    pub(crate) fn smil(document: &str, message: impl Into<String>) -> Self {
        PrepareError::Smil {
            document: document.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepareError::IoAt {
            path: path.into(),
            source,
        }
    }
}

impl From<regex::Error> for PrepareError {
    fn from(e: regex::Error) -> Self {
        PrepareError::Config(e.to_string())
    }
}
