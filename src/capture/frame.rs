//! Captured video frame

use std::fmt;

/// Represents a captured still frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Raw pixel data (RGB format)
    pub data: Vec<u8>,

    /// Capture timestamp
    pub timestamp: std::time::Instant,

    /// Frame sequence number
    pub sequence: u64,
}

impl Frame {
    /// True when the buffer holds exactly `width * height` RGB pixels
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 3
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame({}x{}, {} bytes, seq={})",
            self.width,
            self.height,
            self.data.len(),
            self.sequence
        )
    }
}
