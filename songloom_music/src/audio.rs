// Stereo audio buffers and the compositing operations used by the mixer.
//
// `AudioSegment` is interleaved stereo f32 at a fixed sample rate. Every
// compositing operation is pure (returns a new segment) and preserves the
// receiver's length:
// - overlay: additive mix of another segment at a time offset, truncated to
//   the receiver's length
// - with_level: linear gain plus constant-power pan
// - concat: end-to-end join, no cross-fade
//
// WAV I/O goes through `hound`. Writes are 32-bit float; reads accept float
// or integer PCM, mono or stereo, and upmix mono by duplication.

use crate::error::RenderError;
use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::path::Path;

pub const CHANNELS: u16 = 2;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub sample_rate: u32,
    /// Interleaved L/R samples.
    pub samples: Vec<f32>,
}

impl AudioSegment {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        debug_assert!(samples.len() % 2 == 0, "stereo buffers hold whole frames");
        AudioSegment {
            sample_rate,
            samples,
        }
    }

    /// Silence of the given length, rounded to the nearest frame.
    pub fn silent(duration_seconds: f64, sample_rate: u32) -> Self {
        let frames = seconds_to_frames(duration_seconds, sample_rate);
        AudioSegment::new(sample_rate, vec![0.0; frames * 2])
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    fn check_rate(&self, other: &AudioSegment) -> Result<(), RenderError> {
        if self.sample_rate != other.sample_rate {
            return Err(RenderError::Format(format!(
                "sample rate {} does not match {}",
                other.sample_rate, self.sample_rate
            )));
        }
        Ok(())
    }

    /// Mix `other` in starting at `offset_seconds`. The result keeps this
    /// segment's length; anything of `other` past the end is dropped.
    pub fn overlay(&self, other: &AudioSegment, offset_seconds: f64) -> Result<AudioSegment, RenderError> {
        self.check_rate(other)?;
        let mut out = self.samples.clone();
        let start = seconds_to_frames(offset_seconds.max(0.0), self.sample_rate) * 2;
        if start < out.len() {
            for (dst, src) in out[start..].iter_mut().zip(&other.samples) {
                *dst += *src;
            }
        }
        Ok(AudioSegment::new(self.sample_rate, out))
    }

    /// Apply linear `volume` and constant-power `pan` in [-1, 1].
    ///
    /// pan = 0 leaves both channels at `volume`; pan = -1 sends the right
    /// channel to silence and lifts the left by 3 dB.
    pub fn with_level(&self, volume: f64, pan: f64) -> AudioSegment {
        let gain = volume as f32;
        let angle = (pan.clamp(-1.0, 1.0) as f32 + 1.0) * FRAC_PI_4; // 0 to PI/2
        let left_gain = angle.cos() * SQRT_2 * gain;
        let right_gain = angle.sin() * SQRT_2 * gain;
        let samples = self
            .samples
            .chunks_exact(2)
            .flat_map(|f| [f[0] * left_gain, f[1] * right_gain])
            .collect();
        AudioSegment::new(self.sample_rate, samples)
    }

    /// Join segments end to end. All must share `sample_rate`.
    pub fn concat(sample_rate: u32, segments: &[AudioSegment]) -> Result<AudioSegment, RenderError> {
        let total: usize = segments.iter().map(|s| s.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for segment in segments {
            if segment.sample_rate != sample_rate {
                return Err(RenderError::Format(format!(
                    "cannot join {} Hz audio into a {} Hz track",
                    segment.sample_rate, sample_rate
                )));
            }
            samples.extend_from_slice(&segment.samples);
        }
        Ok(AudioSegment::new(sample_rate, samples))
    }

    /// Pad with silence or truncate to exactly `frames`.
    pub fn fit_to_frames(mut self, frames: usize) -> AudioSegment {
        self.samples.resize(frames * 2, 0.0);
        self
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), RenderError> {
        let spec = hound::WavSpec {
            channels: CHANNELS,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn read_wav(path: &Path) -> Result<AudioSegment, RenderError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = match spec.channels {
            1 => samples.into_iter().flat_map(|x| [x, x]).collect(),
            2 => samples,
            n => {
                return Err(RenderError::Format(format!(
                    "{}: {n} channels, expected mono or stereo",
                    path.display()
                )));
            }
        };
        Ok(AudioSegment::new(spec.sample_rate, samples))
    }
}

pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).round().max(0.0) as usize
}
