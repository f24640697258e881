use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The decryption key must be exactly 8 bytes long, got {0} bytes.")]
    InvalidKeyLength(usize),

    #[error("Config Error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("HTTP {status} returned by {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("OCR binary is not available: {0}")]
    OcrUnavailable(String),

    #[error("OCR failed on {}: {stderr}", .image.display())]
    OcrFailed { image: PathBuf, stderr: String },

    #[error("No page images found in {}", .0.display())]
    NoPages(PathBuf),

    #[error("Directory not found: {}", .0.display())]
    MissingDir(PathBuf),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// A 404 from the portal means the requested resource (usually a report page) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 404, .. })
    }
}

impl From<figment::Error> for Error {
    fn from(value: figment::Error) -> Self {
        Error::Config(Box::new(value))
    }
}
