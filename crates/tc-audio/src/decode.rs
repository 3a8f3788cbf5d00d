use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// A fully decoded audio file.
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    /// Channel count.
    pub channels: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels) as f64 / f64::from(self.sample_rate)
    }
}

/// Premier track audio d'un conteneur, prêt à décoder.
struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
}

fn open_track(path: &Path) -> Result<OpenTrack, AudioError> {
    let file = File::open(path)
        .map_err(|e| AudioError::DecodeError(format!("{} : {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::DecodeError(format!("format non reconnu ({e})")))?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::DecodeError("aucune piste audio".into()))?;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| AudioError::UnsupportedFormat("piste sans fréquence d'échantillonnage".into()))?;
    let channels = params.channels.map_or(1, symphonia::core::audio::Channels::count);
    let decoder = symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
    let track_id = track.id;

    Ok(OpenTrack {
        format,
        decoder,
        track_id,
        channels,
        sample_rate,
    })
}

/// Appends one decoded packet, interleaved. The scratch buffer is reused and
/// only grows when a packet holds more frames than any before it.
fn append_interleaved(
    decoded: AudioBufferRef<'_>,
    scratch: &mut Option<(usize, SampleBuffer<f32>)>,
    out: &mut Vec<f32>,
) {
    let frames = decoded.capacity();
    if scratch.as_ref().is_none_or(|(max, _)| frames > *max) {
        *scratch = Some((frames, SampleBuffer::<f32>::new(frames as u64, *decoded.spec())));
    }
    if let Some((_, buf)) = scratch.as_mut() {
        buf.copy_interleaved_ref(decoded);
        out.extend_from_slice(buf.samples());
    }
}

/// Decode a whole audio file into interleaved f32, keeping its channel
/// layout and sample rate.
///
/// WAV, MP3, FLAC, OGG, AAC via symphonia. Corrupt packets are skipped;
/// the file ends at the first read error.
///
/// # Errors
/// Returns an error if the file cannot be opened or has no decodable audio track.
///
/// # Example
/// ```no_run
/// use tc_audio::decode::decode_file;
/// let audio = decode_file("track.wav").unwrap();
/// println!("{} s", audio.duration_secs());
/// ```
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedAudio, AudioError> {
    let path = path.as_ref();
    let mut track = open_track(path)?;

    let mut samples = Vec::new();
    let mut scratch = None;
    let mut skipped = 0usize;
    loop {
        let packet = match track.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                log::warn!("Lecture interrompue dans {} : {e}", path.display());
                break;
            }
        };
        if packet.track_id() != track.track_id {
            continue;
        }
        match track.decoder.decode(&packet) {
            Ok(decoded) => append_interleaved(decoded, &mut scratch, &mut samples),
            Err(SymphoniaError::DecodeError(_)) => skipped += 1,
            Err(e) => return Err(AudioError::DecodeError(e.to_string())),
        }
    }
    if skipped > 0 {
        log::warn!("{skipped} paquets corrompus ignorés dans {}", path.display());
    }

    let audio = DecodedAudio {
        samples,
        channels: track.channels,
        sample_rate: track.sample_rate,
    };
    log::info!(
        "Décodé {:.1} s @ {} Hz, {} canaux depuis {}",
        audio.duration_secs(),
        audio.sample_rate,
        audio.channels,
        path.display()
    );
    Ok(audio)
}
