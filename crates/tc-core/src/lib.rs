/// Shared types, traits, and configuration for tonecast.
///
/// This crate holds everything the audio, OSC and app crates agree on:
/// the audio frame view, the feature catalog and snapshot, the analyzer
/// capability trait, and the TOML configuration.

pub mod config;
pub mod error;
pub mod feature;
pub mod frame;
pub mod scale;
pub mod traits;

pub use config::AppConfig;
pub use error::CoreError;
pub use feature::{FeatureCatalog, FeatureDecl, FeatureKind, FeatureSnapshot, FeatureSpec, FeatureValue};
pub use frame::AudioFrame;
pub use traits::{AnalyzerEvent, FeatureAnalyzer};
