//! Binary preview frames sent by the backend while a sampler runs.
//!
//! Layout: big-endian `u32` image kind, 4 reserved bytes, then the raw image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::FrameError;
use crate::messages::PreviewImage;

pub const PREVIEW_HEADER_LEN: usize = 8;

/// Image encoding announced in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewFormat {
    Jpeg,
    Png,
}

impl PreviewFormat {
    /// 1 is JPEG, 2 is PNG; anything else is treated as JPEG.
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::Png,
            _ => Self::Jpeg,
        }
    }

    pub fn mimetype(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Borrowed view of one preview frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewFrame<'a> {
    pub format: PreviewFormat,
    pub payload: &'a [u8],
}

impl<'a> PreviewFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.len() < PREVIEW_HEADER_LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }
        let code = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Self {
            format: PreviewFormat::from_code(code),
            payload: &bytes[PREVIEW_HEADER_LEN..],
        })
    }

    pub fn to_image(&self) -> PreviewImage {
        PreviewImage {
            image: STANDARD.encode(self.payload),
            mimetype: self.format.mimetype().to_string(),
        }
    }
}

/// Decode a binary backend frame into the preview relayed to the browser.
pub fn decode_preview(bytes: &[u8]) -> Result<PreviewImage, FrameError> {
    PreviewFrame::parse(bytes).map(|frame| frame.to_image())
}
