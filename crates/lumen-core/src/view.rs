//! The display surface a presenter drives.

use std::sync::Mutex;

use crate::types::ImageBuffer;

/// What the hosting UI layer implements to receive results.
pub trait ImageView: Send + Sync {
    /// Render a finished image. Clears any error indicator.
    fn show_image(&self, image: ImageBuffer);

    /// Activate the error indicator with a user-facing message.
    fn show_error(&self, message: &str);
}

/// Point-in-time copy of what a [`ScreenState`] displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenSnapshot {
    /// Dimensions of the displayed image, if any
    pub image_dimensions: Option<(u32, u32)>,
    /// Message of the active error indicator, if any
    pub error: Option<String>,
    pub images_shown: usize,
    pub errors_shown: usize,
}

impl ScreenSnapshot {
    pub fn error_active(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Default)]
struct Screen {
    image: Option<ImageBuffer>,
    error: Option<String>,
    images_shown: usize,
    errors_shown: usize,
}

/// In-memory view that records what it was asked to display.
#[derive(Default)]
pub struct ScreenState {
    screen: Mutex<Screen>,
}

impl ScreenState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        let screen = self.lock();
        ScreenSnapshot {
            image_dimensions: screen.image.as_ref().map(ImageBuffer::dimensions),
            error: screen.error.clone(),
            images_shown: screen.images_shown,
            errors_shown: screen.errors_shown,
        }
    }

    /// Remove and return the displayed image.
    pub fn take_image(&self) -> Option<ImageBuffer> {
        self.lock().image.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ImageView for ScreenState {
    fn show_image(&self, image: ImageBuffer) {
        let mut screen = self.lock();
        screen.image = Some(image);
        screen.error = None;
        screen.images_shown += 1;
    }

    fn show_error(&self, message: &str) {
        let mut screen = self.lock();
        screen.error = Some(message.to_string());
        screen.errors_shown += 1;
    }
}
