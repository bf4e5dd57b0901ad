//! Error types for outline extraction.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for outline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading an input file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The PDF could not be parsed.
    #[error("Unreadable document: {0}")]
    DocumentUnreadable(String),

    /// The PDF is encrypted and its content cannot be read.
    #[error("Document is encrypted")]
    Encrypted,

    /// The page tree is empty.
    #[error("Document has no pages")]
    NoPages,

    /// The configuration source exists but does not parse.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(#[from] serde_yaml::Error),

    /// Writing an outline to its destination failed.
    #[error("Failed to write {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for every failure that means the PDF itself could not be read.
    pub fn is_document_unreadable(&self) -> bool {
        matches!(
            self,
            Error::DocumentUnreadable(_) | Error::Encrypted | Error::NoPages
        )
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        match err {
            lopdf::Error::IO(e) => Error::Io(e),
            _ => Error::DocumentUnreadable(err.to_string()),
        }
    }
}

impl From<pdf_extract::OutputError> for Error {
    fn from(err: pdf_extract::OutputError) -> Self {
        Error::DocumentUnreadable(err.to_string())
    }
}
