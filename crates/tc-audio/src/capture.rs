use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tc_core::config::AudioConfig;

use crate::error::AudioError;
use crate::reblock::Reblocker;
use crate::source::{AudioBufferSource, BlockHandler};

/// Live input device via cpal.
///
/// Opens the stream with exactly the configured channel count and sample
/// rate (f32 samples); asks the backend for the configured buffer size and
/// re-blocks whatever it actually delivers. The whole pipeline then runs
/// inside the cpal callback.
///
/// # Example
/// ```no_run
/// use tc_audio::capture::DeviceSource;
/// use tc_core::config::AudioConfig;
/// let source = DeviceSource::open(&AudioConfig::default()).unwrap();
/// ```
pub struct DeviceSource {
    device: cpal::Device,
    name: String,
    stream_config: cpal::StreamConfig,
    frames: usize,
    stream: Option<cpal::Stream>,
}

impl DeviceSource {
    /// Find the input device and check it supports the requested format.
    ///
    /// # Errors
    /// Returns an error if the device is missing or cannot capture
    /// `channels` f32 channels at `sample_rate`.
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| AudioError::StreamError(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == *wanted))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.clone()))?,
            None => host.default_input_device().ok_or(AudioError::NoInputDevice)?,
        };
        let name = device.name().unwrap_or_else(|_| "inconnu".to_string());

        let channels = config.channels;
        let sample_rate = config.sample_rate;
        let range = device
            .supported_input_configs()
            .map_err(|e| AudioError::StreamError(e.to_string()))?
            .find(|r| {
                r.channels() == channels
                    && r.sample_format() == cpal::SampleFormat::F32
                    && r.min_sample_rate().0 <= sample_rate
                    && sample_rate <= r.max_sample_rate().0
            })
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!(
                    "{name} : pas de capture f32 {channels} canaux @ {sample_rate} Hz"
                ))
            })?;

        let wanted_frames = u32::try_from(config.buffer_size).unwrap_or(u32::MAX);
        let buffer_size = match range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&wanted_frames) => {
                cpal::BufferSize::Fixed(wanted_frames)
            }
            _ => {
                log::info!("{name} : taille de buffer imposée par le backend, re-découpage en {wanted_frames}");
                cpal::BufferSize::Default
            }
        };

        log::info!("Entrée audio : {name}, {channels} canaux @ {sample_rate} Hz");
        Ok(Self {
            device,
            name,
            stream_config: cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size,
            },
            frames: config.buffer_size,
            stream: None,
        })
    }

    /// Device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AudioBufferSource for DeviceSource {
    fn start(&mut self, mut handler: BlockHandler) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Err(AudioError::StreamError("capture déjà démarrée".into()));
        }
        let mut reblocker = Reblocker::new(
            self.frames,
            usize::from(self.stream_config.channels),
            self.stream_config.sample_rate.0,
        );
        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    reblocker.push(data, &mut *handler);
                },
                |err| {
                    log::error!("Erreur du stream audio : {err}");
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if let Err(e) = stream.pause() {
            log::warn!("Arrêt du stream audio : {e}");
        }
        // Dropping the stream joins the callback and frees the handler
        drop(stream);
    }

    fn describe(&self) -> String {
        format!("périphérique {}", self.name)
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.stop();
    }
}
