//! Core data types flowing through the pipeline.

use image::{ImageFormat, RgbaImage};

/// Input descriptor for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    url: String,
}

impl PipelineRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Decoded RGBA8 image, immutable once produced.
///
/// Stages hand buffers to each other by value; nothing exposes the pixels
/// mutably, so a buffer is never shared between concurrent writers.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pixels: RgbaImage,
    format: Option<ImageFormat>,
    source_hash: Option<String>,
}

impl ImageBuffer {
    /// Wrap an already decoded image.
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            format: None,
            source_hash: None,
        }
    }

    /// Attach the detected source format.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Attach the BLAKE3 hash of the bytes the image was decoded from.
    pub fn with_source_hash(mut self, hash: String) -> Self {
        self.source_hash = Some(hash);
        self
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Format the source bytes were detected as, if known.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    /// Hex BLAKE3 hash of the fetched bytes, if known.
    pub fn source_hash(&self) -> Option<&str> {
        self.source_hash.as_deref()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Take ownership of the pixels, e.g. to feed them to an effect.
    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    /// Transform the pixels, keeping this buffer's provenance.
    pub(crate) fn map_pixels<F>(self, f: F) -> Option<Self>
    where
        F: FnOnce(RgbaImage) -> Option<RgbaImage>,
    {
        let Self {
            pixels,
            format,
            source_hash,
        } = self;
        f(pixels).map(|pixels| Self {
            pixels,
            format,
            source_hash,
        })
    }
}

/// Convert an ImageFormat to a string representation.
pub fn format_to_string(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        ImageFormat::Gif => "gif".to_string(),
        ImageFormat::Tiff => "tiff".to_string(),
        ImageFormat::Bmp => "bmp".to_string(),
        ImageFormat::Ico => "ico".to_string(),
        ImageFormat::Pnm => "pnm".to_string(),
        ImageFormat::Avif => "avif".to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_to_string() {
        assert_eq!(format_to_string(ImageFormat::Jpeg), "jpeg");
        assert_eq!(format_to_string(ImageFormat::Png), "png");
        assert_eq!(format_to_string(ImageFormat::WebP), "webp");
    }

    #[test]
    fn test_map_pixels_keeps_provenance() {
        let original = ImageBuffer::new(RgbaImage::new(4, 2))
            .with_format(ImageFormat::Png)
            .with_source_hash("abc".to_string());
        let derived = original.map_pixels(Some).unwrap();

        assert_eq!(derived.format(), Some(ImageFormat::Png));
        assert_eq!(derived.source_hash(), Some("abc"));
        assert_eq!(derived.dimensions(), (4, 2));
    }
}
