use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use arc_swap::ArcSwap;
use tc_audio::bank::AnalyzerBank;
use tc_audio::snapshot::SnapshotBuilder;
use tc_audio::source::AudioBufferSource;
use tc_core::config::{AppConfig, SendMode, Tuning};
use tc_osc::encoder::PacketEncoder;
use tc_osc::sink::{NetworkSink, SinkCounters, SinkStats};

use crate::engine::{Engine, EngineCounters, EngineStats, Output, SnapshotQueue, spawn_sender};
use crate::report::spawn_reporter;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Nothing allocated yet.
    Uninitialized,
    /// The source is delivering blocks to the engine.
    Running,
    /// Terminal.
    Stopped,
}

/// Owns the source and the helper threads of one session.
///
/// `start` builds bank, encoder and sink, then hands the engine to the source;
/// any failure there aborts with nothing left running. `stop` stops the
/// source first: the engine lives in the source's handler, so analyzer state
/// is only released once no callback can reach it.
pub struct Orchestrator {
    state: State,
    config: AppConfig,
    tuning: Arc<ArcSwap<Tuning>>,
    source: Option<Box<dyn AudioBufferSource>>,
    threads: Vec<JoinHandle<()>>,
    engine_stats: Arc<EngineStats>,
    sink_stats: Option<Arc<SinkStats>>,
}

impl Orchestrator {
    /// Session for `config`. Nothing is opened until [`Orchestrator::start`].
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        Self {
            state: State::Uninitialized,
            config,
            tuning,
            source: None,
            threads: Vec::new(),
            engine_stats: Arc::new(EngineStats::default()),
            sink_stats: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Live tuning, shared with the config watcher.
    #[must_use]
    pub fn tuning(&self) -> &Arc<ArcSwap<Tuning>> {
        &self.tuning
    }

    /// `true` once a finite source has played out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_finished())
    }

    /// Engine and sink counters.
    #[must_use]
    pub fn counters(&self) -> (EngineCounters, SinkCounters) {
        (
            self.engine_stats.snapshot(),
            self.sink_stats.as_ref().map(|s| s.snapshot()).unwrap_or_default(),
        )
    }

    /// Build the pipeline and start `source`.
    ///
    /// # Errors
    /// Invalid configuration, analyzer setup, unresolvable destination,
    /// oversized feature, or a source that fails to start. All fatal.
    pub fn start(&mut self, mut source: Box<dyn AudioBufferSource>) -> Result<()> {
        if self.state != State::Uninitialized {
            bail!("Session déjà démarrée ({:?})", self.state);
        }
        let config = &self.config;
        config.validate().context("Configuration invalide")?;

        let bank = AnalyzerBank::from_config(config).context("Initialisation des analyseurs")?;
        let encoder = PacketEncoder::from_config(&config.osc)?;
        encoder.check_catalog(bank.catalog())?;
        let sink = NetworkSink::connect(&config.osc.host, config.osc.port)?;
        let sink_stats = sink.stats();

        let mut threads = Vec::new();
        let output = match config.osc.send_mode {
            SendMode::Inline => Output::Inline { encoder, sink },
            SendMode::Queued => {
                let (queue, rx) = SnapshotQueue::new(config.osc.queue_depth);
                threads.push(spawn_sender(rx, encoder, sink, Arc::clone(&self.engine_stats))?);
                Output::Queued(queue)
            }
        };

        let mut engine = Engine::new(
            bank,
            SnapshotBuilder::from_config(config),
            output,
            Arc::clone(&self.tuning),
            Arc::clone(&self.engine_stats),
        );
        if config.report.enabled {
            let (tx, rx) = flume::bounded(1);
            threads.push(spawn_reporter(rx, Arc::clone(&self.engine_stats), Arc::clone(&sink_stats))?);
            engine = engine.with_reports(tx, Duration::from_millis(config.report.interval_ms));
        }

        log::info!(
            "Démarrage : {} -> {}:{} ({:?}, {} octets max)",
            source.describe(),
            config.osc.host,
            config.osc.port,
            config.osc.send_mode,
            config.osc.max_packet_bytes
        );
        if let Err(e) = source.start(engine.into_handler()) {
            // The handler (and its channel ends) is already dropped
            join_all(threads);
            return Err(e).context("Démarrage de la source audio");
        }

        self.source = Some(source);
        self.threads = threads;
        self.sink_stats = Some(sink_stats);
        self.state = State::Running;
        Ok(())
    }

    /// Stop the stream, then release analyzers and helper threads. Idempotent.
    pub fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        join_all(std::mem::take(&mut self.threads));
        if self.state == State::Running {
            let (e, s) = self.counters();
            log::info!(
                "Arrêt : {} ticks, {} paquets, {} échecs d'envoi, {} ticks abandonnés",
                e.ticks,
                s.packets,
                s.failures,
                e.dropped_ticks + e.queue_overflows
            );
        }
        self.state = State::Stopped;
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_all(threads: Vec<JoinHandle<()>>) {
    for handle in threads {
        if handle.join().is_err() {
            log::error!("Thread auxiliaire terminé en panique");
        }
    }
}
