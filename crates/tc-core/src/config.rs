use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::scale::NormRange;

/// Plus grand payload UDP/IPv4 possible.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Configuration complète de tonecast.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut saine ; seules
/// les valeurs de `Tuning` sont rechargées à chaud.
///
/// # Example
/// ```
/// use tc_core::config::AppConfig;
/// let config = AppConfig::default();
/// assert_eq!(config.audio.buffer_size, 512);
/// assert_eq!(config.osc.port, 1331);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default, Serialize)]
pub struct AppConfig {
    /// Stream parameters, fixed at setup.
    pub audio: AudioConfig,
    /// Analyzer windows and tunables.
    pub analysis: AnalysisConfig,
    /// Display ranges for the `*Norm` features.
    pub normalization: NormalizationConfig,
    /// Destination and packing policy.
    pub osc: OscConfig,
    /// Informational reporting path.
    pub report: ReportConfig,
}

/// Audio stream parameters.
#[derive(Clone, Debug, Serialize)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per block (one tick).
    pub buffer_size: usize,
    /// Input channel count.
    pub channels: u16,
    /// Input device name. `None` = default input device.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 512,
            channels: 2,
            device: None,
        }
    }
}

/// Analyzer parameters. Windows left at `None` derive from the buffer size.
#[allow(clippy::struct_field_names)]
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisConfig {
    /// Channel read by the spectral analyzer (0 = left).
    pub channel: usize,
    /// Exponential smoothing of spectral outputs [0.0, 0.99]. 0 = raw.
    pub smoothing: f32,
    /// History used by the spectral pitch estimate. Default 4 × buffer.
    pub pitch_window: Option<usize>,
    /// Onset tracker window. Default 2 × buffer.
    pub onset_window: Option<usize>,
    /// Onset peak-picking threshold [0.0, 5.0].
    pub onset_threshold: f32,
    /// Monophonic pitch tracker window. Default 8 × buffer.
    pub tracker_pitch_window: Option<usize>,
    /// Beat tracker window. Default 2 × buffer.
    pub beat_window: Option<usize>,
    /// Lowest filter-bank note (MIDI).
    pub midi_min: u8,
    /// Highest filter-bank note (MIDI), inclusive.
    pub midi_max: u8,
    /// Filter-bank band width in semitones [0.05, 2.0].
    pub filterbank_bandwidth: f32,
    /// Filter-bank energy smoothing [0.0, 0.999].
    pub filterbank_smoothing: f32,
    /// Floor applied before the dB conversion of filter-bank energies.
    pub energy_floor: f32,
    /// Below this level (dBFS) trackers treat the block as silence.
    pub silence_db: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            smoothing: 0.0,
            pitch_window: None,
            onset_window: None,
            onset_threshold: 0.3,
            tracker_pitch_window: None,
            beat_window: None,
            midi_min: 21,
            midi_max: 108,
            filterbank_bandwidth: 1.0,
            filterbank_smoothing: 0.9,
            energy_floor: 1e-6,
            silence_db: -70.0,
        }
    }
}

/// Display ranges of the eight normalized scalars.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Pitch frequency in Hz.
    pub pitch_freq: NormRange,
    /// High-frequency content.
    pub hfc: NormRange,
    /// Spectral complexity (peak count).
    pub spec_comp: NormRange,
    /// Spectral centroid in Hz.
    pub centroid: NormRange,
    /// Roll-off frequency in Hz.
    pub roll_off: NormRange,
    /// Odd-to-even harmonic energy ratio.
    pub odd_to_even: NormRange,
    /// Strong peak ratio.
    pub strong_peak: NormRange,
    /// Strong decay.
    pub strong_decay: NormRange,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            pitch_freq: NormRange::new(0.0, 4186.0),
            hfc: NormRange::new(0.0, 100.0),
            spec_comp: NormRange::new(0.0, 20.0),
            centroid: NormRange::new(0.0, 11_025.0),
            roll_off: NormRange::new(0.0, 22_050.0),
            odd_to_even: NormRange::new(0.0, 10.0),
            strong_peak: NormRange::new(0.0, 1.0),
            strong_decay: NormRange::new(0.0, 200.0),
        }
    }
}

impl NormalizationConfig {
    /// Every range with its field name.
    #[must_use]
    pub fn ranges(&self) -> [(&'static str, &NormRange); 8] {
        [
            ("pitch_freq", &self.pitch_freq),
            ("hfc", &self.hfc),
            ("spec_comp", &self.spec_comp),
            ("centroid", &self.centroid),
            ("roll_off", &self.roll_off),
            ("odd_to_even", &self.odd_to_even),
            ("strong_peak", &self.strong_peak),
            ("strong_decay", &self.strong_decay),
        ]
    }
}

/// What the encoder does with NaN / infinite values.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum NonFinitePolicy {
    /// Drop the whole tick: no packet rather than a corrupt one.
    #[default]
    Drop,
    /// NaN becomes 0, ±inf becomes ±f32::MAX.
    Sanitize,
    /// Send the raw bits.
    Pass,
}

/// Where encode + send run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum SendMode {
    /// On the audio callback thread, right after the snapshot.
    #[default]
    Inline,
    /// On a worker thread behind a bounded drop-oldest queue.
    Queued,
}

/// OSC destination and packing.
#[derive(Clone, Debug, Serialize)]
pub struct OscConfig {
    /// Destination host, resolved once at setup.
    pub host: String,
    /// Destination UDP port.
    pub port: u16,
    /// Byte budget of one bundle.
    pub max_packet_bytes: usize,
    /// Address domain of spectral and filter-bank features.
    pub spectral_domain: String,
    /// Address domain of onset / pitch / beat tracker features.
    pub tracker_domain: String,
    /// NaN / inf handling.
    pub non_finite: NonFinitePolicy,
    /// Inline or queued sending.
    pub send_mode: SendMode,
    /// Snapshot queue depth in `Queued` mode.
    pub queue_depth: usize,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1331,
            max_packet_bytes: 1472,
            spectral_domain: "essentia".to_string(),
            tracker_domain: "aubio".to_string(),
            non_finite: NonFinitePolicy::Drop,
            send_mode: SendMode::Inline,
            queue_depth: 4,
        }
    }
}

/// Reporting path (logs only, never on the audio thread).
#[derive(Clone, Debug, Serialize)]
pub struct ReportConfig {
    /// Reporter thread on/off.
    pub enabled: bool,
    /// Minimum delay between two reports, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

/// Sous-ensemble rechargeable à chaud, appliqué entre deux ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuning {
    /// Spectral output smoothing.
    pub smoothing: f32,
    /// Onset threshold.
    pub onset_threshold: f32,
    /// Filter-bank energy smoothing.
    pub filterbank_smoothing: f32,
    /// Normalization ranges.
    pub normalization: NormalizationConfig,
}

impl Default for Tuning {
    fn default() -> Self {
        AppConfig::default().tuning()
    }
}

impl AppConfig {
    /// Current tuning values.
    #[must_use]
    pub fn tuning(&self) -> Tuning {
        Tuning {
            smoothing: self.analysis.smoothing,
            onset_threshold: self.analysis.onset_threshold,
            filterbank_smoothing: self.analysis.filterbank_smoothing,
            normalization: self.normalization.clone(),
        }
    }

    /// Spectral pitch history in samples.
    #[must_use]
    pub fn pitch_window(&self) -> usize {
        self.analysis
            .pitch_window
            .unwrap_or(self.audio.buffer_size * 4)
    }

    /// Onset tracker window in samples.
    #[must_use]
    pub fn onset_window(&self) -> usize {
        self.analysis
            .onset_window
            .unwrap_or(self.audio.buffer_size * 2)
    }

    /// Monophonic pitch tracker window in samples.
    #[must_use]
    pub fn tracker_pitch_window(&self) -> usize {
        self.analysis
            .tracker_pitch_window
            .unwrap_or(self.audio.buffer_size * 8)
    }

    /// Beat tracker window in samples.
    #[must_use]
    pub fn beat_window(&self) -> usize {
        self.analysis
            .beat_window
            .unwrap_or(self.audio.buffer_size * 2)
    }

    /// Clamp all tunable fields to their valid ranges.
    /// Called after TOML deserialization and CLI overrides.
    /// NaN is left as is for [`validate`](Self::validate) to reject.
    pub fn clamp_all(&mut self) {
        let a = &mut self.analysis;
        clamp_logged("analysis.smoothing", &mut a.smoothing, 0.0, 0.99);
        clamp_logged("analysis.onset_threshold", &mut a.onset_threshold, 0.0, 5.0);
        clamp_logged("analysis.filterbank_bandwidth", &mut a.filterbank_bandwidth, 0.05, 2.0);
        clamp_logged("analysis.filterbank_smoothing", &mut a.filterbank_smoothing, 0.0, 0.999);
        clamp_logged("analysis.silence_db", &mut a.silence_db, -120.0, 0.0);
        clamp_logged("osc.queue_depth", &mut self.osc.queue_depth, 1, 256);
        clamp_logged("report.interval_ms", &mut self.report.interval_ms, 50, 60_000);
    }

    /// Check the structural values. Any error here is fatal at setup.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), CoreError> {
        let audio = &self.audio;
        if !(8_000..=192_000).contains(&audio.sample_rate) {
            return Err(CoreError::Config(format!(
                "sample_rate {} hors de [8000, 192000]",
                audio.sample_rate
            )));
        }
        if !(64..=8192).contains(&audio.buffer_size) || audio.buffer_size % 2 != 0 {
            return Err(CoreError::Config(format!(
                "buffer_size {} doit être pair et dans [64, 8192]",
                audio.buffer_size
            )));
        }
        if audio.channels == 0 || audio.channels > 32 {
            return Err(CoreError::Config(format!(
                "channels {} hors de [1, 32]",
                audio.channels
            )));
        }
        if self.analysis.channel >= usize::from(audio.channels) {
            return Err(CoreError::Config(format!(
                "analysis.channel {} absent (channels = {})",
                self.analysis.channel, audio.channels
            )));
        }

        for (analyzer, window) in [
            ("spectral", self.pitch_window()),
            ("onset", self.onset_window()),
            ("pitch", self.tracker_pitch_window()),
            ("beat", self.beat_window()),
        ] {
            check_window(analyzer, window, audio.buffer_size)?;
        }

        let a = &self.analysis;
        if a.midi_min >= a.midi_max || a.midi_max > 127 {
            return Err(CoreError::Config(format!(
                "plage MIDI invalide : {}..={}",
                a.midi_min, a.midi_max
            )));
        }
        let top_hz = 440.0 * 2f32.powf((f32::from(a.midi_max) - 69.0) / 12.0);
        if top_hz >= audio.sample_rate as f32 / 2.0 {
            return Err(CoreError::Config(format!(
                "note MIDI {} ({top_hz:.0} Hz) au-dessus de Nyquist",
                a.midi_max
            )));
        }
        for (field, value) in [
            ("smoothing", a.smoothing),
            ("onset_threshold", a.onset_threshold),
            ("filterbank_bandwidth", a.filterbank_bandwidth),
            ("filterbank_smoothing", a.filterbank_smoothing),
            ("silence_db", a.silence_db),
        ] {
            if !value.is_finite() {
                return Err(CoreError::Config(format!("analysis.{field} = {value} n'est pas fini")));
            }
        }
        for (field, range) in self.normalization.ranges() {
            if !(range.min.is_finite() && range.max.is_finite()) {
                return Err(CoreError::Config(format!(
                    "normalization.{field} = [{}, {}] n'est pas fini",
                    range.min, range.max
                )));
            }
        }
        if !(a.energy_floor.is_finite() && a.energy_floor > 0.0) {
            return Err(CoreError::Config(format!(
                "energy_floor {} doit être > 0",
                a.energy_floor
            )));
        }

        let osc = &self.osc;
        if osc.host.trim().is_empty() || osc.port == 0 {
            return Err(CoreError::Config(format!(
                "destination OSC invalide : {}:{}",
                osc.host, osc.port
            )));
        }
        if !(64..=MAX_DATAGRAM_BYTES).contains(&osc.max_packet_bytes) {
            return Err(CoreError::Config(format!(
                "max_packet_bytes {} hors de [64, {MAX_DATAGRAM_BYTES}]",
                osc.max_packet_bytes
            )));
        }
        for domain in [&osc.spectral_domain, &osc.tracker_domain] {
            let bad = domain.is_empty()
                || domain
                    .chars()
                    .any(|c| matches!(c, '/' | ' ' | '#' | '*' | ',' | '?' | '[' | ']' | '{' | '}'));
            if bad {
                return Err(CoreError::Config(format!("domaine OSC invalide : {domain:?}")));
            }
        }
        Ok(())
    }
}

/// Bring `value` back into `[min, max]`, with a warning when it moves.
fn clamp_logged<T: PartialOrd + Copy + std::fmt::Display>(field: &str, value: &mut T, min: T, max: T) {
    let clamped = if *value < min {
        min
    } else if *value > max {
        max
    } else {
        return;
    };
    log::warn!("{field} = {} hors de [{min}, {max}], ramené à {clamped}", *value);
    *value = clamped;
}

fn check_window(analyzer: &'static str, window: usize, buffer: usize) -> Result<(), CoreError> {
    if window < buffer || window % buffer != 0 || window / buffer > 64 {
        return Err(CoreError::InvalidWindow {
            analyzer,
            window,
            buffer,
        });
    }
    Ok(())
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize)]
struct ConfigFile {
    audio: Option<AudioSection>,
    analysis: Option<AnalysisSection>,
    normalization: Option<NormalizationConfig>,
    osc: Option<OscSection>,
    report: Option<ReportSection>,
}

/// Audio section, all fields optional for partial override.
#[derive(Deserialize)]
struct AudioSection {
    sample_rate: Option<u32>,
    buffer_size: Option<usize>,
    channels: Option<u16>,
    device: Option<String>,
}

/// Analysis section, all fields optional.
#[derive(Deserialize)]
struct AnalysisSection {
    channel: Option<usize>,
    smoothing: Option<f32>,
    pitch_window: Option<usize>,
    onset_window: Option<usize>,
    onset_threshold: Option<f32>,
    tracker_pitch_window: Option<usize>,
    beat_window: Option<usize>,
    midi_min: Option<u8>,
    midi_max: Option<u8>,
    filterbank_bandwidth: Option<f32>,
    filterbank_smoothing: Option<f32>,
    energy_floor: Option<f32>,
    silence_db: Option<f32>,
}

/// OSC section, all fields optional.
#[derive(Deserialize)]
struct OscSection {
    host: Option<String>,
    port: Option<u16>,
    max_packet_bytes: Option<usize>,
    spectral_domain: Option<String>,
    tracker_domain: Option<String>,
    non_finite: Option<NonFinitePolicy>,
    send_mode: Option<SendMode>,
    queue_depth: Option<usize>,
}

/// Report section, all fields optional.
#[derive(Deserialize)]
struct ReportSection {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

/// Copy every `Some` field of a section over the matching config field.
macro_rules! merge {
    ($target:expr, $section:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $section.$field {
                $target.$field = v;
            }
        )+
    };
}

/// Parse a TOML document and merge it over the defaults.
///
/// # Errors
/// Returns an error if the document is not valid TOML for this schema.
///
/// # Example
/// ```
/// use tc_core::config::parse_config;
/// let config = parse_config("[osc]\nport = 9000\n").unwrap();
/// assert_eq!(config.osc.port, 9000);
/// assert_eq!(config.audio.buffer_size, 512);
/// ```
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;
    let mut config = AppConfig::default();

    if let Some(s) = file.audio {
        merge!(config.audio, s, sample_rate, buffer_size, channels);
        if s.device.is_some() {
            config.audio.device = s.device;
        }
    }
    if let Some(s) = file.analysis {
        merge!(
            config.analysis,
            s,
            channel,
            smoothing,
            onset_threshold,
            midi_min,
            midi_max,
            filterbank_bandwidth,
            filterbank_smoothing,
            energy_floor,
            silence_db,
        );
        let a = &mut config.analysis;
        a.pitch_window = s.pitch_window.or(a.pitch_window);
        a.onset_window = s.onset_window.or(a.onset_window);
        a.tracker_pitch_window = s.tracker_pitch_window.or(a.tracker_pitch_window);
        a.beat_window = s.beat_window.or(a.beat_window);
    }
    if let Some(n) = file.normalization {
        config.normalization = n;
    }
    if let Some(s) = file.osc {
        merge!(
            config.osc,
            s,
            host,
            port,
            max_packet_bytes,
            spectral_domain,
            tracker_domain,
            non_finite,
            send_mode,
            queue_depth,
        );
    }
    if let Some(s) = file.report {
        merge!(config.report, s, enabled, interval_ms);
    }

    config.clamp_all();
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use tc_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Config invalide dans {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
[analysis]
smoothing = 0.5
pitch_window = 4096

[normalization]
hfc = { min = 0.0, max = 500.0 }

[osc]
host = "10.0.0.2"
non_finite = "Sanitize"
send_mode = "Queued"
"#,
        )
        .unwrap();
        assert_eq!(config.analysis.smoothing, 0.5);
        assert_eq!(config.pitch_window(), 4096);
        assert_eq!(config.onset_window(), 1024);
        assert_eq!(config.normalization.hfc.max, 500.0);
        assert_eq!(config.normalization.centroid, NormalizationConfig::default().centroid);
        assert_eq!(config.osc.host, "10.0.0.2");
        assert_eq!(config.osc.port, 1331);
        assert_eq!(config.osc.non_finite, NonFinitePolicy::Sanitize);
        assert_eq!(config.osc.send_mode, SendMode::Queued);
    }

    #[test]
    fn tunables_are_clamped() {
        let config = parse_config(
            "[analysis]\nsmoothing = 3.0\nonset_threshold = -1.0\n[osc]\nqueue_depth = 0\n[report]\ninterval_ms = 1\n",
        )
        .unwrap();
        assert_eq!(config.analysis.smoothing, 0.99);
        assert_eq!(config.analysis.onset_threshold, 0.0);
        assert_eq!(config.osc.queue_depth, 1);
        assert_eq!(config.report.interval_ms, 50);
        assert_eq!(config.analysis.filterbank_smoothing, AnalysisConfig::default().filterbank_smoothing);
    }

    #[test]
    fn non_finite_tunables_are_rejected() {
        for content in [
            "[analysis]\nsmoothing = nan\n",
            "[analysis]\nonset_threshold = inf\n",
            "[analysis]\nfilterbank_smoothing = -nan\n",
            "[analysis]\nsilence_db = -inf\n",
            "[normalization]\nhfc = { min = 0.0, max = nan }\n",
        ] {
            let config = parse_config(content).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, CoreError::Config(_)), "{content}: {err}");
        }
        // NaN survives the clamp untouched
        let config = parse_config("[analysis]\nsmoothing = nan\n").unwrap();
        assert!(config.analysis.smoothing.is_nan());
    }

    #[test]
    fn windows_follow_buffer_size() {
        let mut config = AppConfig::default();
        config.audio.buffer_size = 256;
        assert_eq!(config.onset_window(), 512);
        assert_eq!(config.tracker_pitch_window(), 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inconsistent_window_is_rejected() {
        let mut config = AppConfig::default();
        config.analysis.onset_window = Some(700);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidWindow { analyzer: "onset", window: 700, buffer: 512 })
        ));
        config.analysis.onset_window = Some(256);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_structure_is_rejected() {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 1000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.buffer_size = 511;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.channel = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.sample_rate = 8000;
        // note 108 ≈ 4186 Hz > 4000 Hz
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.osc.tracker_domain = "au/bio".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.osc.max_packet_bytes = 70_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nbuffer_size = 1024\n[report]\nenabled = false").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.audio.buffer_size, 1024);
        assert!(!config.report.enabled);
        assert!(load_config(Path::new("/nonexistent/tonecast.toml")).is_err());
    }

    #[test]
    fn broken_toml_is_an_error() {
        assert!(parse_config("[osc\nport = ").is_err());
        assert!(parse_config("[osc]\nport = \"x\"").is_err());
    }

    #[test]
    fn shipped_default_file_matches_defaults() {
        let shipped = parse_config(include_str!("../../../config/default.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(shipped.tuning(), defaults.tuning());
        assert_eq!(shipped.audio.buffer_size, defaults.audio.buffer_size);
        assert_eq!(shipped.osc.port, defaults.osc.port);
        assert_eq!(shipped.osc.max_packet_bytes, defaults.osc.max_packet_bytes);
        assert_eq!(shipped.pitch_window(), defaults.pitch_window());
        assert!(shipped.validate().is_ok());
    }
}
