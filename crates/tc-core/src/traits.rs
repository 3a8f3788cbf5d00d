use crate::config::Tuning;
use crate::feature::{FeatureSpec, FeatureWriter};
use crate::frame::AudioFrame;

/// Discrete event raised by an analyzer while it consumes a frame.
///
/// Delivered synchronously, inside the `consume` call that detected it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnalyzerEvent {
    /// A new note or attack started.
    Onset {
        /// Tick of the frame that triggered the event.
        tick: u64,
        /// Stream time of that frame, in seconds.
        secs: f64,
    },
    /// A beat was placed.
    Beat {
        /// Tick of the frame that triggered the event.
        tick: u64,
        /// Stream time of that frame, in seconds.
        secs: f64,
        /// Tempo estimate at that beat.
        bpm: f32,
    },
}

/// Stateful feature extractor driven once per audio block.
///
/// Each analyzer owns its history and is the only one to mutate it. The bank
/// calls `consume` with the same frame for every analyzer, then the snapshot
/// builder calls `latest` in registration order.
///
/// # Example
/// ```
/// use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};
/// use tc_core::feature::{FeatureSpec, FeatureWriter};
/// use tc_core::frame::AudioFrame;
///
/// struct Peak { peak: f32 }
/// impl FeatureAnalyzer for Peak {
///     fn name(&self) -> &'static str { "peak" }
///     fn features(&self) -> Vec<FeatureSpec> { vec![FeatureSpec::scalar("peak")] }
///     fn consume(&mut self, frame: &AudioFrame<'_>, _emit: &mut dyn FnMut(AnalyzerEvent)) {
///         self.peak = frame.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
///     }
///     fn latest(&self, out: &mut FeatureWriter<'_>) { out.scalar("peak", self.peak); }
/// }
/// ```
pub trait FeatureAnalyzer: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Outputs, in the order `latest` writes them. Must not change after setup.
    fn features(&self) -> Vec<FeatureSpec>;

    /// Feed one block. Analyzers with wider windows may only update every few calls.
    ///
    /// CONTRAT : pas d'I/O, pas d'erreur par tick.
    fn consume(&mut self, frame: &AudioFrame<'_>, emit: &mut dyn FnMut(AnalyzerEvent));

    /// Write the current outputs. Read-only.
    fn latest(&self, out: &mut FeatureWriter<'_>);

    /// Apply hot-reloaded tuning. Default: nothing to tune.
    fn retune(&mut self, _tuning: &Tuning) {}
}
