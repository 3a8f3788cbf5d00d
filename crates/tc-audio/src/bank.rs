use std::sync::Arc;

use tc_core::config::{AppConfig, Tuning};
use tc_core::feature::FeatureCatalog;
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::beat::BeatTracker;
use crate::error::AudioError;
use crate::filterbank::FilterBank;
use crate::onset::OnsetTracker;
use crate::pitch::PitchTracker;
use crate::spectral::SpectralAnalyzer;

/// Event observer, called synchronously from inside [`AnalyzerBank::consume`].
pub type Observer = Box<dyn FnMut(&AnalyzerEvent) + Send>;

/// Ordered set of analyzers driven by the same frame every tick.
///
/// Registration order is catalog order, which is wire order. The catalog is
/// frozen once the session runs; registering later simply starts a new one.
///
/// # Example
/// ```
/// use tc_audio::bank::AnalyzerBank;
/// use tc_core::config::AppConfig;
/// let bank = AnalyzerBank::from_config(&AppConfig::default()).unwrap();
/// assert_eq!(bank.len(), 5);
/// assert_eq!(bank.catalog().get(0).unwrap().address, "/essentia/rms");
/// ```
pub struct AnalyzerBank {
    analyzers: Vec<Box<dyn FeatureAnalyzer>>,
    /// Number of catalog entries owned by each analyzer.
    counts: Vec<usize>,
    catalog: Arc<FeatureCatalog>,
    observers: Vec<Observer>,
    last_tick: Option<u64>,
}

impl AnalyzerBank {
    /// Empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self {
            analyzers: Vec::new(),
            counts: Vec::new(),
            catalog: Arc::new(FeatureCatalog::default()),
            observers: Vec::new(),
            last_tick: None,
        }
    }

    /// Standard bank: spectral, filter bank, onset, pitch, beat.
    ///
    /// # Errors
    /// Any invalid structural setting or window is fatal here.
    pub fn from_config(config: &AppConfig) -> Result<Self, AudioError> {
        config.validate()?;
        let spectral = config.osc.spectral_domain.as_str();
        let trackers = config.osc.tracker_domain.as_str();

        let mut bank = Self::new();
        bank.register(spectral, Box::new(SpectralAnalyzer::new(config)?))?;
        bank.register(spectral, Box::new(FilterBank::new(config)))?;
        bank.register(trackers, Box::new(OnsetTracker::new(config)?))?;
        bank.register(trackers, Box::new(PitchTracker::new(config)?))?;
        bank.register(trackers, Box::new(BeatTracker::new(config)?))?;

        log::info!(
            "Banque d'analyse : {} analyseurs, {} features",
            bank.len(),
            bank.catalog.len()
        );
        Ok(bank)
    }

    /// Append an analyzer whose features live under `domain`.
    ///
    /// # Errors
    /// Returns an error, and leaves the bank unchanged, if one of its
    /// addresses is already taken.
    pub fn register(&mut self, domain: &str, analyzer: Box<dyn FeatureAnalyzer>) -> Result<(), AudioError> {
        let specs = analyzer.features();
        let mut catalog = FeatureCatalog::clone(&self.catalog);
        for spec in &specs {
            catalog.push(domain, *spec)?;
        }
        log::debug!("{} : {} features sous /{domain}", analyzer.name(), specs.len());
        self.catalog = Arc::new(catalog);
        self.counts.push(specs.len());
        self.analyzers.push(analyzer);
        Ok(())
    }

    /// Add an event observer. Observers run in subscription order.
    pub fn subscribe(&mut self, observer: impl FnMut(&AnalyzerEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Drive every analyzer once with `frame`, in registration order.
    ///
    /// Events raised by an analyzer reach the observers before the next
    /// analyzer runs.
    pub fn consume(&mut self, frame: &AudioFrame<'_>) {
        let observers = &mut self.observers;
        let mut emit = |event: AnalyzerEvent| {
            for observer in observers.iter_mut() {
                observer(&event);
            }
        };
        for analyzer in &mut self.analyzers {
            analyzer.consume(frame, &mut emit);
        }
        self.last_tick = Some(frame.tick());
    }

    /// Forward hot-reloaded tuning to every analyzer.
    pub fn retune(&mut self, tuning: &Tuning) {
        for analyzer in &mut self.analyzers {
            analyzer.retune(tuning);
        }
    }

    /// Catalog shared by every snapshot.
    #[must_use]
    pub fn catalog(&self) -> &Arc<FeatureCatalog> {
        &self.catalog
    }

    /// Tick of the last consumed frame.
    #[must_use]
    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Number of analyzers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// `true` with no analyzer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Analyzer names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.analyzers.iter().map(|a| a.name())
    }

    /// (analyzer, number of catalog entries) in registration order.
    pub(crate) fn parts(&self) -> impl Iterator<Item = (&dyn FeatureAnalyzer, usize)> {
        self.analyzers
            .iter()
            .map(|a| &**a)
            .zip(self.counts.iter().copied())
    }
}

impl Default for AnalyzerBank {
    fn default() -> Self {
        Self::new()
    }
}
