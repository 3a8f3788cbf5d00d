use thiserror::Error;

/// Errors originating from the core module.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid configuration value or structure.
    #[error("Configuration invalide : {0}")]
    Config(String),

    /// An analysis window that does not fit the audio buffer size.
    #[error("Fenêtre invalide pour {analyzer} : {window} échantillons (buffer = {buffer})")]
    InvalidWindow {
        /// Analyzer owning the window.
        analyzer: &'static str,
        /// Requested window length in samples.
        window: usize,
        /// Audio buffer size in frames.
        buffer: usize,
    },

    /// Two features resolved to the same OSC address.
    #[error("Adresse de feature dupliquée : {address}")]
    DuplicateFeature {
        /// The colliding address.
        address: String,
    },
}
