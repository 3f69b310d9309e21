//! Turns run failures into the user-visible error state.
//!
//! The user always sees the same localized sentence; the technical detail
//! only goes to the log.

use std::sync::Arc;

use crate::config::ReporterConfig;
use crate::error::FailureRecord;
use crate::view::ImageView;

/// Localized "could not load" message for a language tag such as `pt-BR`.
///
/// Unknown languages fall back to English.
pub fn localized_message(locale: &str) -> &'static str {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match language.as_str() {
        "es" => "No se pudo cargar la imagen.",
        "fr" => "Impossible de charger l'image.",
        "de" => "Das Bild konnte nicht geladen werden.",
        "pt" => "Não foi possível carregar a imagem.",
        _ => "Could not load the image.",
    }
}

/// Reports failures to a view and to the log.
pub struct ErrorReporter {
    message: String,
    view: Arc<dyn ImageView>,
}

impl ErrorReporter {
    pub fn new(config: &ReporterConfig, view: Arc<dyn ImageView>) -> Self {
        let message = config
            .message
            .clone()
            .unwrap_or_else(|| localized_message(&config.locale).to_string());
        Self { message, view }
    }

    /// The message shown for every failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Log `failure` and activate the view's error indicator.
    pub fn report(&self, failure: &FailureRecord) {
        tracing::error!(cause = %failure.cause, "Pipeline run failed: {}", failure.message);
        self.view.show_error(&self.message);
    }
}
