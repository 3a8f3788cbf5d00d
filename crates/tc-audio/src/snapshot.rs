use std::sync::Arc;

use tc_core::config::AppConfig;
use tc_core::feature::{FeatureSnapshot, FeatureValue, FeatureWriter};

use crate::bank::AnalyzerBank;

/// Pulls the current outputs of a bank into one [`FeatureSnapshot`].
///
/// Read-only on the analyzers. Each analyzer's slice of the snapshot is kept
/// to the size it declared, so the result always lines up with the catalog.
///
/// # Example
/// ```
/// use tc_audio::bank::AnalyzerBank;
/// use tc_audio::snapshot::SnapshotBuilder;
/// use tc_core::config::AppConfig;
/// let config = AppConfig::default();
/// let bank = AnalyzerBank::from_config(&config).unwrap();
/// let snap = SnapshotBuilder::from_config(&config).build(&bank);
/// assert_eq!(snap.len(), bank.catalog().len());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SnapshotBuilder {
    db_floor: f32,
}

impl SnapshotBuilder {
    /// Builder clamping dB conversions at `db_floor` (linear).
    #[must_use]
    pub fn new(db_floor: f32) -> Self {
        Self {
            db_floor: if db_floor.is_finite() && db_floor > 0.0 {
                db_floor
            } else {
                f32::MIN_POSITIVE
            },
        }
    }

    /// Builder using `analysis.energy_floor`.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.analysis.energy_floor)
    }

    /// Snapshot of the bank's latest outputs, stamped with its last tick.
    #[must_use]
    pub fn build(&self, bank: &AnalyzerBank) -> FeatureSnapshot {
        let catalog = Arc::clone(bank.catalog());
        let mut values = Vec::with_capacity(catalog.len());
        for (analyzer, count) in bank.parts() {
            let end = values.len() + count;
            analyzer.latest(&mut FeatureWriter::new(&catalog, &mut values, self.db_floor));
            values.truncate(end);
            while values.len() < end {
                let kind = catalog.get(values.len()).map(|d| d.kind);
                values.push(kind.map_or(FeatureValue::Scalar(0.0), FeatureValue::zeroed));
            }
        }
        FeatureSnapshot::new(bank.last_tick().unwrap_or(0), catalog, values)
    }
}
