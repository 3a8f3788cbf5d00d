use tc_core::frame::AudioFrame;

use crate::error::AudioError;

/// Per-block callback installed by the pipeline.
///
/// Owned by the source once started; it runs on the source's real-time
/// thread and is dropped when the source stops.
pub type BlockHandler = Box<dyn FnMut(&AudioFrame<'_>) + Send + 'static>;

/// Push-style audio input: calls the handler once per fixed-size block.
///
/// Implementations are not required to be `Send` (device streams are often
/// pinned to the thread that created them).
pub trait AudioBufferSource {
    /// Start delivering blocks to `handler`.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened or started.
    fn start(&mut self, handler: BlockHandler) -> Result<(), AudioError>;

    /// Stop delivering. Once this returns the handler has been dropped and is
    /// never called again.
    fn stop(&mut self);

    /// `true` once a finite source has delivered its last block.
    fn is_finished(&self) -> bool {
        false
    }

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}
