//! Signal generator for the built-in call recordings.
//!
//! Renders short 8 kHz, 16-bit mono PCM clips wrapped in a WAV header. At this
//! format one 320-byte frame is exactly 20 ms of audio, which is what the
//! pacer emits per interval.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Sample rate of generated clips.
pub const SAMPLE_RATE: u32 = 8_000;

/// Bits per generated sample.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Length of the canonical WAV header written before the samples.
pub const WAV_HEADER_LEN: usize = 44;

/// Types of signals that can be generated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalType {
    /// Pure sine wave
    Sine { frequency: f64 },
    /// Square wave
    Square { frequency: f64, duty_cycle: f64 },
    /// Two sines summed, like a dial tone
    DualTone { low: f64, high: f64 },
    /// White noise from a fixed seed
    WhiteNoise { seed: u64 },
    /// Silence (zeros)
    Silence,
}

/// Description of one generated clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    /// Asset name, e.g. `audio-1.wav`
    pub name: String,
    /// Waveform
    pub signal: SignalType,
    /// Length of the clip
    pub duration: Duration,
    /// Peak level in `0.0..=1.0` of full scale
    pub amplitude: f64,
}

impl ToneSpec {
    /// Create a clip description.
    pub fn new(name: impl Into<String>, signal: SignalType, duration: Duration) -> Self {
        Self {
            name: name.into(),
            signal,
            duration,
            amplitude: 0.5,
        }
    }

    /// Number of samples in the clip.
    pub fn sample_count(&self) -> usize {
        (self.duration.as_secs_f64() * f64::from(SAMPLE_RATE)).round() as usize
    }

    /// Render the samples.
    pub fn render_pcm(&self) -> Vec<i16> {
        let count = self.sample_count();
        let rate = f64::from(SAMPLE_RATE);
        let amplitude = self.amplitude.clamp(0.0, 1.0) * f64::from(i16::MAX);
        let mut noise = match self.signal {
            SignalType::WhiteNoise { seed } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };

        (0..count)
            .map(|n| {
                let t = n as f64 / rate;
                let value = match self.signal {
                    SignalType::Sine { frequency } => (2.0 * std::f64::consts::PI * frequency * t).sin(),
                    SignalType::Square {
                        frequency,
                        duty_cycle,
                    } => {
                        if (frequency * t).fract() < duty_cycle {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    SignalType::DualTone { low, high } => {
                        let tau = 2.0 * std::f64::consts::PI * t;
                        0.5 * ((tau * low).sin() + (tau * high).sin())
                    }
                    SignalType::WhiteNoise { .. } => noise
                        .as_mut()
                        .map_or(0.0, |rng| rng.gen_range(-1.0..=1.0)),
                    SignalType::Silence => 0.0,
                };
                (value * amplitude) as i16
            })
            .collect()
    }

    /// Render the clip as a complete WAV file.
    pub fn render_wav(&self) -> Vec<u8> {
        let samples: Vec<i16> = self.render_pcm().into_iter().map(i16::to_le).collect();
        let data: &[u8] = bytemuck::cast_slice(&samples);

        let mut wav = Vec::with_capacity(WAV_HEADER_LEN + data.len());
        wav.extend_from_slice(&wav_header(data.len() as u32));
        wav.extend_from_slice(data);
        wav
    }
}

/// Canonical 44-byte header for mono PCM at [`SAMPLE_RATE`].
pub fn wav_header(data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let channels: u16 = 1;
    let block_align = channels * BITS_PER_SAMPLE / 8;
    let byte_rate = SAMPLE_RATE * u32::from(block_align);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// The five built-in recordings.
pub fn builtin_tones() -> Vec<ToneSpec> {
    vec![
        ToneSpec::new(
            "audio-1.wav",
            SignalType::Sine { frequency: 440.0 },
            Duration::from_millis(4_010),
        ),
        ToneSpec::new(
            "audio-1-02.wav",
            SignalType::DualTone {
                low: 350.0,
                high: 440.0,
            },
            Duration::from_millis(3_000),
        ),
        ToneSpec::new(
            "audio-1-03.wav",
            SignalType::Square {
                frequency: 200.0,
                duty_cycle: 0.5,
            },
            Duration::from_millis(2_505),
        ),
        ToneSpec::new(
            "audio-3.wav",
            SignalType::WhiteNoise { seed: 3 },
            Duration::from_millis(5_000),
        ),
        ToneSpec::new(
            "audio-3-02.wav",
            SignalType::Silence,
            Duration::from_millis(1_987),
        ),
    ]
}
