//! Surface conditioning before recognition
//!
//! Oversized page renders are slow to recognize and no more accurate, so
//! anything larger than the configured bound is downscaled. The downscaled copy
//! is converted to grayscale and contrast-boosted on the way, which helps with
//! scanned text.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::borrow::Cow;
use tracing::debug;

use crate::config::PreprocessSettings;
use crate::error::{OcrError, Result};
use crate::surface::RasterSurface;

/// Conditions raster surfaces for the recognition engine
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    settings: PreprocessSettings,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(PreprocessSettings::default())
    }
}

impl ImagePreprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Return the surface unchanged when it fits the bound, otherwise a
    /// normalized, uniformly downscaled copy.
    pub fn prepare<'a>(&self, surface: &'a RasterSurface) -> Result<Cow<'a, RasterSurface>> {
        if surface.is_empty() {
            return Err(OcrError::InvalidSurface(format!(
                "cannot recognize a {}x{} surface",
                surface.width, surface.height
            )));
        }

        let max = self.settings.max_dimension;
        if surface.width <= max && surface.height <= max {
            return Ok(Cow::Borrowed(surface));
        }

        let (width, height) = downscaled_size(surface.width, surface.height, max);
        debug!(
            "Downscaling {}x{} surface to {}x{}",
            surface.width, surface.height, width, height
        );

        let source = surface.to_rgba_image()?;
        let resized = imageops::resize(&source, width, height, FilterType::Triangle);
        let data = self.normalize(&resized);

        Ok(Cow::Owned(RasterSurface { data, width, height }))
    }

    /// Grayscale and contrast passes over the color channels; alpha is carried
    /// over from `image` untouched.
    fn normalize(&self, image: &RgbaImage) -> Vec<u8> {
        let mut color: RgbImage = if self.settings.grayscale {
            DynamicImage::ImageLuma8(imageops::grayscale(image)).to_rgb8()
        } else {
            DynamicImage::ImageRgba8(image.clone()).to_rgb8()
        };
        if (self.settings.contrast - 1.0).abs() > 0.01 {
            color = imageops::contrast(&color, contrast_percent(self.settings.contrast));
        }

        color
            .pixels()
            .zip(image.pixels())
            .flat_map(|(rgb, rgba)| [rgb[0], rgb[1], rgb[2], rgba[3]])
            .collect()
    }
}

/// `imageops::contrast` takes a percentage whose scale is squared
fn contrast_percent(factor: f32) -> f32 {
    (factor.sqrt() - 1.0) * 100.0
}

/// Target size for a uniform downscale so that neither side exceeds `max`.
pub fn downscaled_size(width: u32, height: u32, max: u32) -> (u32, u32) {
    let ratio = (max as f64 / width as f64).min(max as f64 / height as f64);
    // the epsilon keeps the limiting side from flooring to max - 1
    let scale = |side: u32| (((side as f64 * ratio) + 1e-9).floor() as u32).clamp(1, max);
    (scale(width), scale(height))
}
