//! Filter stage: CPU-bound pixel effects.
//!
//! Effects take ownership of an RGBA image and return the transformed image.
//! They keep width, height and alpha, and split work over rows with rayon,
//! which runs inside whatever pool the caller is on (the scope's CPU pool).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::FilterError;
use crate::types::ImageBuffer;

/// A pixel transform.
pub trait Effect: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Transform `image`. `None` means the effect could not produce output.
    fn apply(&self, image: RgbaImage) -> Option<RgbaImage>;
}

/// Built-in effects selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Pixelate,
    Grayscale,
    Sepia,
    Invert,
}

impl EffectKind {
    /// Instantiate the effect with parameters from `config`.
    pub fn build(self, config: &FilterConfig) -> Box<dyn Effect> {
        match self {
            EffectKind::Pixelate => Box::new(Pixelate {
                block_size: config.block_size,
            }),
            EffectKind::Grayscale => Box::new(Grayscale),
            EffectKind::Sepia => Box::new(Sepia {
                intensity: config.intensity,
            }),
            EffectKind::Invert => Box::new(Invert),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::Pixelate => "pixelate",
            EffectKind::Grayscale => "grayscale",
            EffectKind::Sepia => "sepia",
            EffectKind::Invert => "invert",
        };
        f.write_str(name)
    }
}

/// Replace each `block_size` square with its average color.
#[derive(Debug, Clone)]
pub struct Pixelate {
    pub block_size: u32,
}

impl Effect for Pixelate {
    fn name(&self) -> &'static str {
        "pixelate"
    }

    fn apply(&self, mut image: RgbaImage) -> Option<RgbaImage> {
        let width = image.width() as usize;
        if width == 0 || image.height() == 0 {
            return None;
        }
        let block = self.block_size.max(1) as usize;
        let row_bytes = width * 4;

        let buf: &mut [u8] = &mut image;
        buf.par_chunks_mut(row_bytes * block).for_each(|band| {
            let rows = band.len() / row_bytes;
            for x0 in (0..width).step_by(block) {
                let x1 = (x0 + block).min(width);
                let mut sum = [0u64; 3];
                for y in 0..rows {
                    for x in x0..x1 {
                        let i = y * row_bytes + x * 4;
                        for (c, total) in sum.iter_mut().enumerate() {
                            *total += band[i + c] as u64;
                        }
                    }
                }
                let count = (rows * (x1 - x0)) as u64;
                let avg = sum.map(|total| (total / count) as u8);
                for y in 0..rows {
                    for x in x0..x1 {
                        let i = y * row_bytes + x * 4;
                        band[i..i + 3].copy_from_slice(&avg);
                    }
                }
            }
        });

        Some(image)
    }
}

/// Rec. 601 luma.
#[derive(Debug, Clone)]
pub struct Grayscale;

impl Effect for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn apply(&self, mut image: RgbaImage) -> Option<RgbaImage> {
        let buf: &mut [u8] = &mut image;
        buf.par_chunks_mut(4).for_each(|px| {
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            let luma = luma.round().min(255.0) as u8;
            px[0] = luma;
            px[1] = luma;
            px[2] = luma;
        });
        Some(image)
    }
}

/// Sepia tone blended with the original by `intensity`.
#[derive(Debug, Clone)]
pub struct Sepia {
    pub intensity: f32,
}

impl Effect for Sepia {
    fn name(&self) -> &'static str {
        "sepia"
    }

    fn apply(&self, mut image: RgbaImage) -> Option<RgbaImage> {
        let t = self.intensity.clamp(0.0, 1.0);
        let buf: &mut [u8] = &mut image;
        buf.par_chunks_mut(4).for_each(|px| {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            let toned = [
                0.393 * r + 0.769 * g + 0.189 * b,
                0.349 * r + 0.686 * g + 0.168 * b,
                0.272 * r + 0.534 * g + 0.131 * b,
            ];
            for (channel, sepia) in px.iter_mut().zip(toned) {
                let blended = *channel as f32 * (1.0 - t) + sepia.min(255.0) * t;
                *channel = blended.round().clamp(0.0, 255.0) as u8;
            }
        });
        Some(image)
    }
}

/// Color negative.
#[derive(Debug, Clone)]
pub struct Invert;

impl Effect for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn apply(&self, mut image: RgbaImage) -> Option<RgbaImage> {
        let buf: &mut [u8] = &mut image;
        buf.par_chunks_mut(4).for_each(|px| {
            px[0] = 255 - px[0];
            px[1] = 255 - px[1];
            px[2] = 255 - px[2];
        });
        Some(image)
    }
}

/// Applies one effect to decoded images.
///
/// Holds no per-image state, so one stage can serve many concurrent runs.
pub struct FilterStage {
    effect: Box<dyn Effect>,
    applied: AtomicU64,
}

impl FilterStage {
    /// Create a filter stage for the configured effect.
    pub fn new(config: &FilterConfig) -> Self {
        Self::with_effect(config.effect.build(config))
    }

    /// Create a filter stage around a custom effect.
    pub fn with_effect(effect: Box<dyn Effect>) -> Self {
        Self {
            effect,
            applied: AtomicU64::new(0),
        }
    }

    pub fn effect_name(&self) -> &'static str {
        self.effect.name()
    }

    /// Number of times `apply` has been invoked.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Run the effect over `image`.
    pub fn apply(&self, image: ImageBuffer) -> Result<ImageBuffer, FilterError> {
        self.applied.fetch_add(1, Ordering::Relaxed);

        let (width, height) = image.dimensions();
        let len = image.as_rgba().as_raw().len();
        if width == 0 || height == 0 || len != width as usize * height as usize * 4 {
            return Err(FilterError::Malformed { width, height, len });
        }

        let start = Instant::now();
        let output = image
            .map_pixels(|pixels| self.effect.apply(pixels))
            .filter(|out| out.dimensions() == (width, height))
            .ok_or_else(|| FilterError::EffectFailed {
                effect: self.effect.name().to_string(),
            })?;
        tracing::trace!(
            "  {} {}x{}: {:?}",
            self.effect.name(),
            width,
            height,
            start.elapsed()
        );

        Ok(output)
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("effect", &self.effect.name())
            .field("applied", &self.applied_count())
            .finish()
    }
}
