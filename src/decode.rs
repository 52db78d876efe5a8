//! Image decoding behind a seam so the engine's fault handling is testable.

use std::io::ErrorKind;
use std::path::Path;

use image::RgbaImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file is not a recognized image format.
    #[error("unrecognized image format")]
    UnsupportedFormat,

    /// The format was recognized but the data does not decode.
    #[error("corrupt image data")]
    Corrupt,

    /// The file vanished between enumeration and decode.
    #[error("file no longer exists")]
    Missing,

    /// Anything else; the engine propagates these instead of skipping.
    #[error(transparent)]
    Io(std::io::Error),
}

impl DecodeError {
    /// Failures the engine recovers from by dropping the list entry and
    /// moving on to the next candidate.
    pub fn drops_entry(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat | Self::Corrupt | Self::Missing
        )
    }
}

pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RgbaImage, DecodeError>;
}

/// Production decoder over the `image` crate. Sniffs the format from content
/// with the extension as fallback, then decodes to RGBA8.
pub struct StreamDecoder;

impl ImageDecoder for StreamDecoder {
    fn decode(&self, path: &Path) -> Result<RgbaImage, DecodeError> {
        let reader = image::ImageReader::open(path)
            .map_err(classify_io)?
            .with_guessed_format()
            .map_err(classify_io)?;
        let decoded = reader.decode().map_err(classify_image)?;
        Ok(decoded.to_rgba8())
    }
}

fn classify_io(err: std::io::Error) -> DecodeError {
    if err.kind() == ErrorKind::NotFound {
        DecodeError::Missing
    } else {
        DecodeError::Io(err)
    }
}

fn classify_image(err: image::ImageError) -> DecodeError {
    match err {
        image::ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
        image::ImageError::Decoding(_) => DecodeError::Corrupt,
        image::ImageError::IoError(io) => classify_io(io),
        other => DecodeError::Io(std::io::Error::other(other)),
    }
}
