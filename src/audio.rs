//! Reminder cue playback through cpal.
//!
//! The cue is a short synthesized bell unless a WAV file is configured. The
//! output device is opened for each cue so unplugging headphones between
//! reminders is harmless. Cues are mono; they are resampled and copied onto
//! every channel of whatever layout the device prefers.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};

use crate::reminders::channels::CuePlayer;

const BELL_SAMPLE_RATE: u32 = 44_100;
const BELL_SECONDS: f32 = 1.2;
const BELL_VOLUME: f32 = 0.3;
/// Fundamental and overtones of the bell, with their relative amplitudes.
const BELL_PARTIALS: [(f32, f32); 3] = [(880.0, 1.0), (1760.0, 0.4), (2640.0, 0.15)];

/// Extra time allowed past the cue length before playback is abandoned.
const PLAYBACK_SLACK: Duration = Duration::from_secs(2);

/// Mono samples ready for output.
#[derive(Debug, Clone)]
pub struct Cue {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Cue {
    pub fn bell() -> Self {
        let total = (BELL_SAMPLE_RATE as f32 * BELL_SECONDS) as usize;
        let rate = BELL_SAMPLE_RATE as f32;
        let samples = (0..total)
            .map(|i| {
                let t = i as f32 / rate;
                let envelope = (-4.0 * t).exp();
                let tone: f32 = BELL_PARTIALS
                    .iter()
                    .map(|(freq, amp)| amp * (2.0 * std::f32::consts::PI * freq * t).sin())
                    .sum();
                BELL_VOLUME * envelope * tone
            })
            .collect();
        Self {
            samples,
            sample_rate: BELL_SAMPLE_RATE,
        }
    }

    /// Load a WAV file, mixing down to mono.
    pub fn from_wav(path: &Path) -> Result<Self, String> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| format!("cannot open WAV {}: {}", path.display(), e))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()
                    .map_err(|e| format!("WAV read error: {}", e))?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| format!("WAV read error: {}", e))?,
        };

        let channels = usize::from(spec.channels.max(1));
        let samples = if channels > 1 {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            samples
        };

        if samples.is_empty() {
            return Err(format!("WAV {} has no samples", path.display()));
        }
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Configured WAV, or the bell when none is set or it cannot be read.
    pub fn resolve(sound_path: Option<&str>) -> Self {
        match sound_path {
            Some(path) => Self::from_wav(Path::new(path)).unwrap_or_else(|e| {
                log::warn!("Audio cue: {}, using built-in bell", e);
                Self::bell()
            }),
            None => Self::bell(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate.max(1)))
    }

    /// Interleaved samples for an output with `channels` channels at `sample_rate`.
    pub fn render(&self, channels: u16, sample_rate: u32) -> Vec<f32> {
        let channels = usize::from(channels.max(1));
        resample_linear(&self.samples, self.sample_rate, sample_rate)
            .into_iter()
            .flat_map(|s| std::iter::repeat(s).take(channels))
            .collect()
    }
}

fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_len = (input.len() as f64 * ratio).round() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let t = (pos - i0 as f64) as f32;
            input[i0] * (1.0 - t) + input[i1] * t
        })
        .collect()
}

struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Plays the current cue on the default output device.
pub struct CpalCuePlayer {
    cue: RwLock<Arc<Cue>>,
}

impl CpalCuePlayer {
    pub fn new(sound_path: Option<&str>) -> Self {
        Self {
            cue: RwLock::new(Arc::new(Cue::resolve(sound_path))),
        }
    }

    pub fn set_sound_path(&self, sound_path: Option<&str>) {
        *self.cue.write() = Arc::new(Cue::resolve(sound_path));
    }
}

impl CuePlayer for CpalCuePlayer {
    fn play(&self) -> Result<(), String> {
        let cue = Arc::clone(&self.cue.read());

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;

        let supported = device
            .default_output_config()
            .map_err(|e| format!("no default output config: {}", e))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "output device wants {:?} samples, only f32 is supported",
                supported.sample_format()
            ));
        }
        let stream_config: cpal::StreamConfig = supported.into();

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples: cue.render(stream_config.channels, stream_config.sample_rate),
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = buffer_clone.lock();
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    log::warn!("Audio cue: output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| format!("failed to build output stream: {}", e))?;

        stream
            .play()
            .map_err(|e| format!("failed to start output stream: {}", e))?;

        let deadline = Instant::now() + cue.duration() + PLAYBACK_SLACK;
        while !buffer.lock().finished {
            if Instant::now() >= deadline {
                return Err("playback did not finish in time".to_string());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        drop(stream);
        Ok(())
    }
}
