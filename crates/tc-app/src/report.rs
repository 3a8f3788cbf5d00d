use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tc_core::feature::FeatureSnapshot;
use tc_osc::sink::SinkStats;

use crate::engine::EngineStats;

/// Summary of one tick for the console, built at most once per interval.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Report {
    /// Tick number.
    pub tick: u64,
    /// Stream time in seconds.
    pub secs: f64,
    /// Spectral RMS.
    pub rms: f32,
    /// Spectral centroid (Hz).
    pub centroid: f32,
    /// Spectral pitch (Hz).
    pub pitch_freq: f32,
    /// Monophonic tracker pitch (MIDI).
    pub midi_pitch: f32,
    /// Tempo estimate.
    pub bpm: f32,
    /// Thresholded onset novelty.
    pub novelty: f32,
}

impl Report {
    /// Pick the reported values out of a snapshot. Missing features read as 0.
    #[must_use]
    pub fn from_snapshot(snapshot: &FeatureSnapshot, secs: f64) -> Self {
        let scalar = |name: &str| snapshot.get(name).and_then(|v| v.as_scalar()).unwrap_or(0.0);
        Self {
            tick: snapshot.tick(),
            secs,
            rms: scalar("rms"),
            centroid: scalar("centroid"),
            pitch_freq: scalar("pitchFreq"),
            midi_pitch: scalar("monophonicMidiPitch"),
            bpm: scalar("bpm"),
            novelty: scalar("onsetNovelty"),
        }
    }

    /// One log line.
    #[must_use]
    pub fn line(&self) -> String {
        format!(
            "t={:.1}s tick {} | rms {:.3} | centroid {:.0} Hz | pitch {:.1} Hz | midi {:.1} | bpm {:.1} | novelty {:.2}",
            self.secs,
            self.tick,
            self.rms,
            self.centroid,
            self.pitch_freq,
            self.midi_pitch,
            self.bpm,
            self.novelty
        )
    }
}

/// Spawn the reporter. Logs every report received, plus the send counters;
/// ends when the engine (the only sender) is dropped.
///
/// # Errors
/// Returns an error if the thread cannot be spawned.
pub fn spawn_reporter(
    rx: flume::Receiver<Report>,
    engine: Arc<EngineStats>,
    sink: Arc<SinkStats>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tc-report".into())
        .spawn(move || {
            while let Ok(report) = rx.recv() {
                let e = engine.snapshot();
                let s = sink.snapshot();
                log::info!("{}", report.line());
                log::info!(
                    "paquets {} ({} Ko, {} échecs) | ticks {} abandonnés {} | onsets {} beats {}",
                    s.packets,
                    s.bytes / 1024,
                    s.failures,
                    e.ticks,
                    e.dropped_ticks + e.queue_overflows,
                    e.onsets,
                    e.beats
                );
            }
        })
        .context("Impossible de lancer le thread de rapport")
}
