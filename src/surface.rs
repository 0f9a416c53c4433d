//! Raster surfaces handed to the OCR core by the page rasterizer

use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use crate::error::{OcrError, Result};

/// A rendered page as an RGBA pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSurface {
    /// Raw RGBA pixel data, row-major
    pub data: Vec<u8>,
    /// Surface width in pixels
    pub width: u32,
    /// Surface height in pixels
    pub height: u32,
}

impl RasterSurface {
    /// Wrap an RGBA buffer, checking that its length matches the dimensions
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(OcrError::InvalidSurface(format!(
                "{}x{} surface needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self { data, width, height })
    }

    /// A surface filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { data, width, height }
    }

    /// Load a surface from an image file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(path.as_ref())?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: DynamicImage) -> Self {
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            data: rgba.into_raw(),
            width,
            height,
        }
    }

    /// Get surface dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Borrow the pixels as an `image` buffer
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            OcrError::InvalidSurface(format!(
                "buffer of {} bytes does not fit {}x{}",
                self.data.len(),
                self.width,
                self.height
            ))
        })
    }

    /// Encode as PNG for engines that read image files
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let image = self.to_rgba_image()?;
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}
