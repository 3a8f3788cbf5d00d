// Audio input, analysis, and feature snapshots for tonecast.

pub mod bank;
pub mod beat;
pub mod capture;
pub mod decode;
pub mod error;
pub mod fft;
pub mod filterbank;
pub mod history;
pub mod hpcp;
pub mod mel;
pub mod onset;
pub mod peaks;
pub mod pitch;
pub mod reblock;
pub mod replay;
pub mod smoothing;
pub mod snapshot;
pub mod source;
pub mod spectral;
pub mod yin;

pub use bank::AnalyzerBank;
pub use error::AudioError;
pub use snapshot::SnapshotBuilder;
pub use source::{AudioBufferSource, BlockHandler};
