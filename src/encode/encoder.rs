//! JPEG encoding using the image crate

use super::EncodeError;
use crate::capture::Frame;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ColorType;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// JPEG Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

/// Encodes RGB frames into JPEG stills
#[derive(Debug, Clone)]
pub struct JpegEncoder {
    config: EncoderConfig,
}

impl JpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        let quality = config.quality.clamp(1, 100);
        Self {
            config: EncoderConfig { quality },
        }
    }

    pub fn quality(&self) -> u8 {
        self.config.quality
    }

    /// Encode a frame as JPEG bytes
    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        if !frame.is_well_formed() {
            return Err(EncodeError::InvalidFrame(frame.to_string()));
        }

        let mut out = Vec::with_capacity(frame.data.len() / 8);
        {
            let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, self.config.quality);
            encoder
                .encode(&frame.data, frame.width, frame.height, ColorType::Rgb8)
                .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
        }

        Ok(out)
    }

    /// Encode a frame as a `data:image/jpeg;base64,` URL
    pub fn encode_data_url(&self, frame: &Frame) -> Result<String, EncodeError> {
        let jpeg = self.encode_frame(frame)?;
        Ok(to_data_url(&jpeg))
    }
}

/// Wrap JPEG bytes in a data URL
pub fn to_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(DATA_URL_PREFIX);
    base64::engine::general_purpose::STANDARD.encode_string(jpeg, &mut url);
    url
}

/// Decode a data URL (or bare base64) into the raw image bytes
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, EncodeError> {
    let payload = match url.split_once(',') {
        Some((_, payload)) => payload,
        None => url,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| EncodeError::Base64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame {
            width,
            height,
            data: vec![128u8; (width * height * 3) as usize],
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn encodes_jpeg_with_soi_marker() {
        let encoder = JpegEncoder::new(EncoderConfig::default());
        let jpeg = encoder.encode_frame(&gray_frame(64, 48)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn data_url_has_jpeg_prefix_and_decodes() {
        let encoder = JpegEncoder::new(EncoderConfig { quality: 80 });
        let url = encoder.encode_data_url(&gray_frame(16, 16)).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let bytes = decode_data_url(&url).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 16);
    }

    #[test]
    fn rejects_truncated_frame() {
        let encoder = JpegEncoder::new(EncoderConfig::default());
        let mut frame = gray_frame(8, 8);
        frame.data.truncate(10);
        assert!(matches!(encoder.encode_frame(&frame), Err(EncodeError::InvalidFrame(_))));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(JpegEncoder::new(EncoderConfig { quality: 0 }).quality(), 1);
        assert_eq!(JpegEncoder::new(EncoderConfig { quality: 250 }).quality(), 100);
    }

    #[test]
    fn bare_base64_is_accepted() {
        assert_eq!(decode_data_url("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_data_url("data:image/jpeg;base64,@@@").is_err());
    }
}
