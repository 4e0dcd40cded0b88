//! Still-image encoding for detection frames
//!
//! Frames are JPEG-compressed with the `image` crate and carried over the
//! signaling channel as base64 data URLs.

pub mod encoder;
pub use encoder::{decode_data_url, to_data_url, EncoderConfig, JpegEncoder};

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Pixel buffer does not match the frame dimensions
    InvalidFrame(String),
    /// JPEG compression failed
    Jpeg(String),
    /// Data URL payload is not valid base64
    Base64(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            EncodeError::Jpeg(msg) => write!(f, "JPEG error: {}", msg),
            EncodeError::Base64(msg) => write!(f, "Base64 error: {}", msg),
        }
    }
}

impl Error for EncodeError {}
