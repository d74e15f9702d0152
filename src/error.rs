use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistrationError>;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid input: {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("unsupported image format '{extension}': {}", .path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed KML in {}: {message}", .path.display())]
    Kml { path: PathBuf, message: String },

    #[error("failed to read archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl RegistrationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
