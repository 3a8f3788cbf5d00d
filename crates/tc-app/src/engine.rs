use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use tc_audio::bank::AnalyzerBank;
use tc_audio::snapshot::SnapshotBuilder;
use tc_audio::source::BlockHandler;
use tc_core::config::Tuning;
use tc_core::feature::FeatureSnapshot;
use tc_core::frame::AudioFrame;
use tc_core::traits::AnalyzerEvent;
use tc_osc::encoder::{EncodedPacket, PacketEncoder};
use tc_osc::sink::NetworkSink;

use crate::report::Report;

/// Tick counters, written by the audio thread, read by the reporter.
#[derive(Debug, Default)]
pub struct EngineStats {
    ticks: AtomicU64,
    dropped_ticks: AtomicU64,
    queue_overflows: AtomicU64,
    onsets: AtomicU64,
    beats: AtomicU64,
    retunes: AtomicU64,
}

/// Plain copy of [`EngineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Ticks processed.
    pub ticks: u64,
    /// Ticks not sent (non-finite value, unencodable snapshot or full queue).
    pub dropped_ticks: u64,
    /// Snapshots discarded by the drop-oldest queue.
    pub queue_overflows: u64,
    /// Onset events seen.
    pub onsets: u64,
    /// Beat events seen.
    pub beats: u64,
    /// Hot-reloaded tunings applied.
    pub retunes: u64,
}

impl EngineStats {
    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> EngineCounters {
        EngineCounters {
            ticks: self.ticks.load(Ordering::Relaxed),
            dropped_ticks: self.dropped_ticks.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            onsets: self.onsets.load(Ordering::Relaxed),
            beats: self.beats.load(Ordering::Relaxed),
            retunes: self.retunes.load(Ordering::Relaxed),
        }
    }
}

/// Bounded drop-oldest snapshot queue between the audio thread and the sender.
pub struct SnapshotQueue {
    tx: flume::Sender<FeatureSnapshot>,
    // Producer-side handle used to evict the oldest entry when full
    oldest: flume::Receiver<FeatureSnapshot>,
}

impl SnapshotQueue {
    /// Queue of `depth` snapshots, plus the consumer end.
    #[must_use]
    pub fn new(depth: usize) -> (Self, flume::Receiver<FeatureSnapshot>) {
        let (tx, rx) = flume::bounded(depth.max(1));
        (
            Self {
                tx,
                oldest: rx.clone(),
            },
            rx,
        )
    }

    /// Enqueue without blocking, evicting the oldest snapshot when full.
    pub fn push(&self, snapshot: FeatureSnapshot) -> Pushed {
        match self.tx.try_send(snapshot) {
            Ok(()) => Pushed::Queued,
            Err(flume::TrySendError::Full(snapshot)) => {
                // Le consommateur a pu vider la file entre-temps
                let evicted = self.oldest.try_recv().is_ok();
                match self.tx.try_send(snapshot) {
                    Ok(()) if evicted => Pushed::Evicted,
                    Ok(()) => Pushed::Queued,
                    Err(_) => Pushed::Dropped { evicted },
                }
            }
            Err(flume::TrySendError::Disconnected(_)) => Pushed::Dropped { evicted: false },
        }
    }
}

/// What [`SnapshotQueue::push`] did with a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pushed {
    /// Queued, nothing lost.
    Queued,
    /// Queued after evicting the oldest snapshot.
    Evicted,
    /// Not queued.
    Dropped {
        /// An older snapshot was lost as well.
        evicted: bool,
    },
}

/// Where a built snapshot goes.
pub enum Output {
    /// Encode and send on the audio thread.
    Inline {
        /// Packet encoder.
        encoder: PacketEncoder,
        /// UDP sink.
        sink: NetworkSink,
    },
    /// Hand over to the sender thread.
    Queued(SnapshotQueue),
}

/// Encode and send one snapshot; counts the tick as dropped on encode error.
fn ship(
    encoder: &PacketEncoder,
    sink: &NetworkSink,
    snapshot: &FeatureSnapshot,
    packets: &mut Vec<EncodedPacket>,
    stats: &EngineStats,
    warned: &AtomicBool,
) {
    match encoder.encode_into(snapshot, packets) {
        Ok(()) => {
            sink.send_all(packets);
        }
        Err(e) => {
            stats.dropped_ticks.fetch_add(1, Ordering::Relaxed);
            if !warned.swap(true, Ordering::Relaxed) {
                log::warn!("Tick {} non envoyé : {e}", snapshot.tick());
            }
        }
    }
}

/// Spawn the sender thread of `Queued` mode. Ends once the queue's producer is dropped.
///
/// # Errors
/// Returns an error if the thread cannot be spawned.
pub fn spawn_sender(
    rx: flume::Receiver<FeatureSnapshot>,
    encoder: PacketEncoder,
    sink: NetworkSink,
    stats: Arc<EngineStats>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tc-osc-send".into())
        .spawn(move || {
            let warned = AtomicBool::new(false);
            let mut packets = Vec::new();
            while let Ok(snapshot) = rx.recv() {
                ship(&encoder, &sink, &snapshot, &mut packets, &stats, &warned);
            }
            log::debug!("Thread d'envoi OSC terminé");
        })
        .context("Impossible de lancer le thread d'envoi OSC")
}

/// Everything one tick needs: consume -> snapshot -> encode -> send.
///
/// Owned by the source's block handler; dropping it (when the source stops)
/// closes the sender and reporter channels.
pub struct Engine {
    bank: AnalyzerBank,
    builder: SnapshotBuilder,
    output: Output,
    tuning: Arc<ArcSwap<Tuning>>,
    applied: Arc<Tuning>,
    stats: Arc<EngineStats>,
    packets: Vec<EncodedPacket>,
    warned: AtomicBool,
    report: Option<(flume::Sender<Report>, Duration)>,
    next_report: Instant,
}

impl Engine {
    /// Assemble an engine around a configured bank.
    ///
    /// Event observers counting onsets and beats are installed on the bank.
    #[must_use]
    pub fn new(
        mut bank: AnalyzerBank,
        builder: SnapshotBuilder,
        output: Output,
        tuning: Arc<ArcSwap<Tuning>>,
        stats: Arc<EngineStats>,
    ) -> Self {
        let counters = Arc::clone(&stats);
        bank.subscribe(move |event| {
            let counter = match event {
                AnalyzerEvent::Onset { .. } => &counters.onsets,
                AnalyzerEvent::Beat { .. } => &counters.beats,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let applied = tuning.load_full();
        bank.retune(&applied);
        Self {
            bank,
            builder,
            output,
            tuning,
            applied,
            stats,
            packets: Vec::new(),
            warned: AtomicBool::new(false),
            report: None,
            next_report: Instant::now(),
        }
    }

    /// Send a [`Report`] to `tx` at most once per `interval`.
    #[must_use]
    pub fn with_reports(mut self, tx: flume::Sender<Report>, interval: Duration) -> Self {
        self.report = Some((tx, interval));
        self
    }

    /// Run one tick. Never blocks, never fails.
    pub fn tick(&mut self, frame: &AudioFrame<'_>) {
        let latest = self.tuning.load();
        if !Arc::ptr_eq(&*latest, &self.applied) {
            self.applied = Arc::clone(&*latest);
            self.bank.retune(&self.applied);
            self.stats.retunes.fetch_add(1, Ordering::Relaxed);
        }
        drop(latest);

        self.bank.consume(frame);
        let snapshot = self.builder.build(&self.bank);

        if let Some((tx, interval)) = &self.report {
            let now = Instant::now();
            if now >= self.next_report {
                self.next_report = now + *interval;
                let _ = tx.try_send(Report::from_snapshot(&snapshot, frame.start_secs()));
            }
        }

        match &self.output {
            Output::Inline { encoder, sink } => {
                ship(encoder, sink, &snapshot, &mut self.packets, &self.stats, &self.warned);
            }
            Output::Queued(queue) => {
                let evicted = match queue.push(snapshot) {
                    Pushed::Queued => false,
                    Pushed::Evicted => true,
                    Pushed::Dropped { evicted } => {
                        self.stats.dropped_ticks.fetch_add(1, Ordering::Relaxed);
                        evicted
                    }
                };
                if evicted {
                    self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// The analyzer bank.
    #[must_use]
    pub fn bank(&self) -> &AnalyzerBank {
        &self.bank
    }

    /// Move the engine into a source block handler.
    #[must_use]
    pub fn into_handler(mut self) -> BlockHandler {
        Box::new(move |frame| self.tick(frame))
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::TAU;
    use std::net::UdpSocket;

    use tc_core::config::{AppConfig, NonFinitePolicy};
    use tc_osc::message::decode_packet;

    use super::*;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    fn engine(config: &AppConfig, output: Output, tuning: &Arc<ArcSwap<Tuning>>) -> (Engine, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::default());
        let bank = AnalyzerBank::from_config(config).unwrap();
        let engine = Engine::new(
            bank,
            SnapshotBuilder::from_config(config),
            output,
            Arc::clone(tuning),
            Arc::clone(&stats),
        );
        (engine, stats)
    }

    fn sine_block(config: &AppConfig, tick: u64) -> Vec<f32> {
        let frames = config.audio.buffer_size;
        let sr = config.audio.sample_rate as f32;
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = (tick as usize * frames + i) as f32 / sr;
            let s = 0.5 * (TAU * 440.0 * t).sin();
            out.extend_from_slice(&[s, s]);
        }
        out
    }

    #[test]
    fn inline_tick_sends_the_whole_catalog() {
        let config = AppConfig::default();
        let rx = receiver();
        let sink = NetworkSink::connect("127.0.0.1", rx.local_addr().unwrap().port()).unwrap();
        let encoder = PacketEncoder::from_config(&config.osc).unwrap();
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        let (mut engine, stats) = engine(&config, Output::Inline { encoder, sink }, &tuning);
        let expected: Vec<String> = engine.bank().catalog().iter().map(|d| d.address.clone()).collect();

        let samples = sine_block(&config, 0);
        engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, 0));

        let mut buf = [0u8; 65_536];
        let mut addresses = Vec::new();
        while addresses.len() < expected.len() {
            let (n, _) = rx.recv_from(&mut buf).unwrap();
            assert!(n <= config.osc.max_packet_bytes);
            addresses.extend(decode_packet(&buf[..n]).unwrap().into_iter().map(|m| m.address));
        }
        assert_eq!(addresses, expected);
        assert_eq!(stats.snapshot().ticks, 1);
        assert_eq!(stats.snapshot().dropped_ticks, 0);
    }

    #[test]
    fn retune_is_picked_up_between_ticks() {
        let mut config = AppConfig::default();
        config.osc.send_mode = tc_core::config::SendMode::Queued;
        let (queue, _rx) = SnapshotQueue::new(64);
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        let (mut engine, stats) = engine(&config, Output::Queued(queue), &tuning);

        let samples = sine_block(&config, 0);
        engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, 0));
        assert_eq!(stats.snapshot().retunes, 0);

        tuning.store(Arc::new(Tuning {
            smoothing: 0.5,
            ..config.tuning()
        }));
        engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, 1));
        engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, 2));
        assert_eq!(stats.snapshot().retunes, 1);
        assert_eq!(stats.snapshot().ticks, 3);
    }

    #[test]
    fn queue_drops_the_oldest() {
        let config = AppConfig::default();
        let (queue, rx) = SnapshotQueue::new(2);
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        let (mut engine, stats) = engine(&config, Output::Queued(queue), &tuning);

        for tick in 0..5 {
            let samples = sine_block(&config, tick);
            engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, tick));
        }
        let kept: Vec<u64> = rx.try_iter().map(|s| s.tick()).collect();
        assert_eq!(kept, vec![3, 4]);
        assert_eq!(stats.snapshot().queue_overflows, 3);
        assert_eq!(stats.snapshot().dropped_ticks, 0);
    }

    fn empty_snapshot(tick: u64) -> FeatureSnapshot {
        FeatureSnapshot::new(tick, Arc::new(tc_core::feature::FeatureCatalog::default()), Vec::new())
    }

    #[test]
    fn push_reports_each_outcome() {
        let (queue, rx) = SnapshotQueue::new(1);
        assert_eq!(queue.push(empty_snapshot(0)), Pushed::Queued);
        assert_eq!(queue.push(empty_snapshot(1)), Pushed::Evicted);
        assert_eq!(rx.try_recv().unwrap().tick(), 1);
        // Drained: no eviction to count
        assert_eq!(queue.push(empty_snapshot(2)), Pushed::Queued);
    }

    #[test]
    fn evictions_match_what_was_lost_under_contention() {
        const TOTAL: u64 = 20_000;
        let (queue, rx) = SnapshotQueue::new(1);
        let consumer = std::thread::spawn(move || rx.iter().count() as u64);

        let (mut evicted, mut dropped) = (0u64, 0u64);
        for tick in 0..TOTAL {
            match queue.push(empty_snapshot(tick)) {
                Pushed::Queued => {}
                Pushed::Evicted => evicted += 1,
                Pushed::Dropped { evicted: lost } => {
                    dropped += 1;
                    evicted += u64::from(lost);
                }
            }
        }
        drop(queue);
        let received = consumer.join().unwrap();
        assert_eq!(received + evicted + dropped, TOTAL);
    }

    #[test]
    fn sender_thread_ships_queued_snapshots() {
        let config = AppConfig::default();
        let rx_udp = receiver();
        let sink = NetworkSink::connect("127.0.0.1", rx_udp.local_addr().unwrap().port()).unwrap();
        let sink_stats = sink.stats();
        let encoder = PacketEncoder::from_config(&config.osc).unwrap();
        let (queue, rx) = SnapshotQueue::new(8);
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        let (mut engine, stats) = engine(&config, Output::Queued(queue), &tuning);
        let sender = spawn_sender(rx, encoder, sink, Arc::clone(&stats)).unwrap();

        let samples = sine_block(&config, 0);
        engine.tick(&AudioFrame::new(&samples, 2, config.audio.sample_rate, 0));
        drop(engine);
        sender.join().unwrap();

        assert!(sink_stats.snapshot().packets >= 2);
        let mut buf = [0u8; 65_536];
        let (n, _) = rx_udp.recv_from(&mut buf).unwrap();
        assert_eq!(decode_packet(&buf[..n]).unwrap()[0].address, "/essentia/rms");
    }

    #[test]
    fn non_finite_tick_is_dropped_and_counted() {
        let stats = EngineStats::default();
        let warned = AtomicBool::new(false);
        let rx = receiver();
        let sink = NetworkSink::connect("127.0.0.1", rx.local_addr().unwrap().port()).unwrap();
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();

        let mut catalog = tc_core::feature::FeatureCatalog::default();
        catalog
            .push("essentia", tc_core::feature::FeatureSpec::scalar("rms"))
            .unwrap();
        let snap = FeatureSnapshot::new(
            7,
            Arc::new(catalog),
            vec![tc_core::feature::FeatureValue::Scalar(f32::NAN)],
        );
        let mut packets = Vec::new();
        ship(&encoder, &sink, &snap, &mut packets, &stats, &warned);
        ship(&encoder, &sink, &snap, &mut packets, &stats, &warned);
        assert_eq!(stats.snapshot().dropped_ticks, 2);
        assert_eq!(sink.stats().snapshot().packets, 0);
    }

    #[test]
    fn events_are_counted() {
        let config = AppConfig::default();
        let (queue, _rx) = SnapshotQueue::new(256);
        let tuning = Arc::new(ArcSwap::from_pointee(config.tuning()));
        let (mut engine, stats) = engine(&config, Output::Queued(queue), &tuning);

        let silence = vec![0.0; config.audio.buffer_size * 2];
        for tick in 0..10 {
            engine.tick(&AudioFrame::new(&silence, 2, config.audio.sample_rate, tick));
        }
        let burst = sine_block(&config, 10);
        for tick in 10..20 {
            engine.tick(&AudioFrame::new(&burst, 2, config.audio.sample_rate, tick));
        }
        assert!(stats.snapshot().onsets >= 1);
    }
}
