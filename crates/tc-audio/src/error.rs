use thiserror::Error;

/// Errors originating from the audio module.
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio input device found.
    #[error("Aucun périphérique audio d'entrée trouvé")]
    NoInputDevice,

    /// Named input device not found.
    #[error("Périphérique audio introuvable : {0}")]
    DeviceNotFound(String),

    /// Unsupported audio format.
    #[error("Format audio non supporté : {0}")]
    UnsupportedFormat(String),

    /// Audio stream error.
    #[error("Erreur de stream audio : {0}")]
    StreamError(String),

    /// Audio decode error.
    #[error("Erreur de décodage : {0}")]
    DecodeError(String),

    /// Analyzer window inconsistent with the buffer size.
    #[error("Fenêtre {analyzer} invalide : {window} échantillons pour un buffer de {buffer}")]
    InvalidWindow {
        /// Analyzer name.
        analyzer: &'static str,
        /// Window length in samples.
        window: usize,
        /// Buffer size in frames.
        buffer: usize,
    },

    /// Catalog or configuration rejected while building the bank.
    #[error(transparent)]
    Core(#[from] tc_core::CoreError),
}

/// Check that `window` is a whole number of buffers.
///
/// # Errors
/// Returns [`AudioError::InvalidWindow`] otherwise.
pub fn check_window(analyzer: &'static str, window: usize, buffer: usize) -> Result<(), AudioError> {
    if buffer == 0 || window < buffer || window % buffer != 0 {
        return Err(AudioError::InvalidWindow {
            analyzer,
            window,
            buffer,
        });
    }
    Ok(())
}
