use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::decode::{DecodedAudio, decode_file};
use crate::error::AudioError;
use crate::reblock::Reblocker;
use crate::source::{AudioBufferSource, BlockHandler};

/// Audio file played back as a block source.
///
/// The file is decoded up front; a worker thread then delivers it in
/// fixed-size blocks, paced at real time or as fast as possible. The last
/// partial block is zero-padded.
///
/// # Example
/// ```
/// use tc_audio::decode::DecodedAudio;
/// use tc_audio::replay::FileSource;
/// let audio = DecodedAudio { samples: vec![0.0; 2048], channels: 2, sample_rate: 44100 };
/// let source = FileSource::from_decoded(audio, 512, false, "silence");
/// assert_eq!(source.sample_rate(), 44100);
/// ```
pub struct FileSource {
    label: String,
    audio: Arc<DecodedAudio>,
    frames: usize,
    realtime: bool,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileSource {
    /// Decode `path` for playback in blocks of `frames`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be decoded.
    pub fn open(path: &Path, frames: usize, realtime: bool) -> Result<Self> {
        let audio = decode_file(path)?;
        Ok(Self::from_decoded(audio, frames, realtime, &path.display().to_string()))
    }

    /// Play already decoded samples.
    #[must_use]
    pub fn from_decoded(audio: DecodedAudio, frames: usize, realtime: bool, label: &str) -> Self {
        Self {
            label: label.to_string(),
            audio: Arc::new(audio),
            frames: frames.max(1),
            realtime,
            stop: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Sample rate of the file.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    /// Channel count of the file.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.audio.channels
    }
}

impl AudioBufferSource for FileSource {
    fn start(&mut self, mut handler: BlockHandler) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::StreamError("relecture déjà démarrée".into()));
        }
        let audio = Arc::clone(&self.audio);
        let stop = Arc::clone(&self.stop);
        let finished = Arc::clone(&self.finished);
        let frames = self.frames;
        let realtime = self.realtime;

        let worker = std::thread::Builder::new()
            .name("tc-replay".into())
            .spawn(move || {
                let mut reblocker = Reblocker::new(frames, audio.channels, audio.sample_rate);
                let block_secs = frames as f64 / f64::from(audio.sample_rate.max(1));
                let started = Instant::now();
                for chunk in audio.samples.chunks(reblocker.block_len()) {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if realtime {
                        // A device delivers block k once it is fully recorded
                        let due = started
                            + Duration::from_secs_f64((reblocker.ticks() + 1) as f64 * block_secs);
                        let now = Instant::now();
                        if due > now {
                            std::thread::sleep(due - now);
                        }
                    }
                    reblocker.push(chunk, &mut *handler);
                }
                if !stop.load(Ordering::Relaxed) {
                    reblocker.finish(&mut *handler);
                    finished.store(true, Ordering::Release);
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            log::error!("Thread de relecture terminé en panique");
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("fichier {}", self.label)
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop();
    }
}
