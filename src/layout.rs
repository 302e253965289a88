use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use json::JsonValue;

use crate::opcclient::{Frame, FrameError, SET_PIXEL_COLORS};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed layout: {0}")]
    Malformed(String),

    #[error("layout too large: {0}")]
    TooLarge(#[from] FrameError),
}

/// Information about one LED pixel.
#[derive(Debug, Clone)]
pub struct PixelInfo {
    /// Index in the frame buffer.
    pub index: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    layout: JsonValue,
}

impl PixelInfo {
    pub fn new(index: usize, layout: JsonValue) -> PixelInfo {
        // Indexing a non-object or non-array yields null, so every missing or
        // mistyped piece falls through to 0.
        let point = &layout["point"];
        let x = point[0].as_f32().unwrap_or(0.0);
        let y = point[1].as_f32().unwrap_or(0.0);
        let z = point[2].as_f32().unwrap_or(0.0);

        PixelInfo {
            index,
            x,
            y,
            z,
            layout,
        }
    }

    /// Parsed JSON for this pixel's layout entry.
    pub fn layout(&self) -> &JsonValue {
        &self.layout
    }

    pub fn point(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Only pixels with an object entry get colors from the effect.
    pub fn is_mapped(&self) -> bool {
        self.layout.is_object()
    }
}

/// A loaded layout: the pixels it describes plus the frame they render into.
#[derive(Debug, Clone)]
pub struct Layout {
    pixels: Vec<PixelInfo>,
    frame: Frame,
}

impl Layout {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Layout, LoadError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(source) => {
                return Err(LoadError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => return Err(LoadError::Malformed(err.to_string())),
        };

        Layout::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Layout, LoadError> {
        let document = match json::parse(text) {
            Ok(document) => document,
            Err(err) => return Err(LoadError::Malformed(err.to_string())),
        };

        let entries = match document {
            JsonValue::Array(entries) => entries,
            _ => {
                return Err(LoadError::Malformed(
                    "top-level value is not an array".to_string(),
                ))
            }
        };

        let frame = Frame::builder()
            .channel(0)
            .command(SET_PIXEL_COLORS)
            .payload_len(entries.len() * 3)
            .build()?;

        let pixels = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| PixelInfo::new(index, entry))
            .collect();

        Ok(Layout { pixels, frame })
    }

    pub fn pixels(&self) -> &[PixelInfo] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    /// Pixels alongside the writable payload, one RGB triple per pixel.
    pub(crate) fn pixels_and_payload(&mut self) -> (&[PixelInfo], &mut [u8]) {
        (&self.pixels, self.frame.payload_mut())
    }
}
