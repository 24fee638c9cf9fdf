// Built-in effect processing.
//
// `ChainProcessor` applies an `EffectChain` in order to a stereo segment.
// Each `Effect` becomes a stateful `Processor` that works in place on
// [left, right] frames, so every stage preserves length, channel count and
// sample rate. Delay and reverb tails that would run past the end of the
// buffer are cut off.
//
// These are small, readable DSP models (one-pole envelopes, a 4-pole ladder,
// all-pass phaser stages, a comb/all-pass reverb), not emulations of any
// particular plugin.

use crate::audio::AudioSegment;
use crate::effects::{Chorus, Compressor, Delay, Effect, EffectChain, Gain, LadderFilter, Phaser, Reverb};
use crate::error::RenderError;
use crate::render::EffectProcessor;
use std::f32::consts::{PI, TAU};

type Frame = [f32; 2];

trait Processor: Send {
    fn process(&mut self, buf: &mut [Frame]);
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn build(effect: &Effect, sample_rate: f32) -> Box<dyn Processor> {
    match *effect {
        Effect::Compressor(p) => Box::new(CompressorState::new(p, sample_rate)),
        Effect::Gain(p) => Box::new(GainState::new(p)),
        Effect::Chorus(p) => Box::new(ChorusState::new(p, sample_rate)),
        Effect::LadderFilter(p) => Box::new(LadderState::new(p, sample_rate)),
        Effect::Phaser(p) => Box::new(PhaserState::new(p, sample_rate)),
        Effect::Delay(p) => Box::new(DelayState::new(p, sample_rate)),
        Effect::Reverb(p) => Box::new(ReverbState::new(p, sample_rate)),
    }
}

/// Applies effect chains with the in-process DSP in this module.
#[derive(Debug, Clone, Default)]
pub struct ChainProcessor;

impl EffectProcessor for ChainProcessor {
    fn process(&self, audio: &AudioSegment, chain: &EffectChain) -> Result<AudioSegment, RenderError> {
        if chain.is_identity() {
            return Ok(audio.clone());
        }
        if audio.sample_rate == 0 {
            return Err(RenderError::Format("sample rate must be positive".into()));
        }
        let mut frames: Vec<Frame> = audio.samples.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        for effect in &chain.effects {
            build(effect, audio.sample_rate as f32).process(&mut frames);
        }
        let samples = frames.into_iter().flatten().collect();
        Ok(AudioSegment::new(audio.sample_rate, samples))
    }
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

struct GainState {
    factor: f32,
}

impl GainState {
    fn new(p: Gain) -> Self {
        GainState {
            factor: db_to_linear(p.gain_db as f32),
        }
    }
}

impl Processor for GainState {
    fn process(&mut self, buf: &mut [Frame]) {
        for f in buf.iter_mut() {
            f[0] *= self.factor;
            f[1] *= self.factor;
        }
    }
}

// ---------------------------------------------------------------------------
// Compressor: peak envelope follower, hard knee
// ---------------------------------------------------------------------------

struct CompressorState {
    threshold_db: f32,
    ratio: f32,
    attack_coef: f32,
    release_coef: f32,
    envelope: f32,
}

fn time_coefficient(ms: f64, sample_rate: f32) -> f32 {
    let samples = (ms as f32 / 1000.0 * sample_rate).max(1.0);
    (-1.0 / samples).exp()
}

impl CompressorState {
    fn new(p: Compressor, sample_rate: f32) -> Self {
        CompressorState {
            threshold_db: p.threshold_db as f32,
            ratio: (p.ratio as f32).max(1.0),
            attack_coef: time_coefficient(p.attack_ms, sample_rate),
            release_coef: time_coefficient(p.release_ms, sample_rate),
            envelope: 0.0,
        }
    }
}

impl Processor for CompressorState {
    fn process(&mut self, buf: &mut [Frame]) {
        for f in buf.iter_mut() {
            let level = f[0].abs().max(f[1].abs());
            let coef = if level > self.envelope {
                self.attack_coef
            } else {
                self.release_coef
            };
            self.envelope = coef * self.envelope + (1.0 - coef) * level;
            let env_db = 20.0 * self.envelope.max(1e-9).log10();
            let over = env_db - self.threshold_db;
            if over > 0.0 {
                let reduction = db_to_linear(-over * (1.0 - 1.0 / self.ratio));
                f[0] *= reduction;
                f[1] *= reduction;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Modulated delay line shared by chorus and delay
// ---------------------------------------------------------------------------

struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        DelayLine {
            buffer: vec![0.0; capacity.max(2)],
            write: 0,
        }
    }

    /// Read `delay` samples behind the write head, linearly interpolated.
    fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(0.0, (len - 1) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write + len - whole) % len];
        let b = self.buffer[(self.write + len - whole - 1) % len];
        a + (b - a) * frac
    }

    fn push(&mut self, sample: f32) {
        self.write = (self.write + 1) % self.buffer.len();
        self.buffer[self.write] = sample;
    }
}

struct ChorusState {
    params: Chorus,
    sample_rate: f32,
    lines: [DelayLine; 2],
    phase: f32,
}

impl ChorusState {
    fn new(params: Chorus, sample_rate: f32) -> Self {
        let max_ms = params.centre_delay_ms.abs() * (1.0 + params.depth.abs()) + 1.0;
        let capacity = (max_ms as f32 / 1000.0 * sample_rate) as usize + 2;
        ChorusState {
            params,
            sample_rate,
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
            phase: 0.0,
        }
    }
}

impl Processor for ChorusState {
    fn process(&mut self, buf: &mut [Frame]) {
        let centre = self.params.centre_delay_ms as f32 / 1000.0 * self.sample_rate;
        let depth = self.params.depth.clamp(0.0, 1.0) as f32;
        let feedback = self.params.feedback.clamp(-0.95, 0.95) as f32;
        let mix = self.params.mix.clamp(0.0, 1.0) as f32;
        let step = self.params.rate_hz as f32 / self.sample_rate;
        for f in buf.iter_mut() {
            for ch in 0..2 {
                // Right channel LFO runs a quarter cycle ahead for width.
                let lfo = (TAU * (self.phase + ch as f32 * 0.25)).sin();
                let delay = centre * (1.0 + depth * lfo);
                let wet = self.lines[ch].read(delay);
                self.lines[ch].push(f[ch] + wet * feedback);
                f[ch] = f[ch] * (1.0 - mix) + wet * mix;
            }
            self.phase = (self.phase + step).fract();
        }
    }
}

struct DelayState {
    delay_samples: f32,
    feedback: f32,
    mix: f32,
    lines: [DelayLine; 2],
}

impl DelayState {
    fn new(p: Delay, sample_rate: f32) -> Self {
        let delay_samples = (p.delay_seconds.max(0.0) as f32 * sample_rate).round();
        let capacity = delay_samples as usize + 2;
        DelayState {
            delay_samples,
            feedback: p.feedback.clamp(0.0, 0.95) as f32,
            mix: p.mix.clamp(0.0, 1.0) as f32,
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
        }
    }
}

impl Processor for DelayState {
    fn process(&mut self, buf: &mut [Frame]) {
        if self.delay_samples < 1.0 {
            return;
        }
        for f in buf.iter_mut() {
            for ch in 0..2 {
                // Read before push: the echo is exactly delay_samples old.
                let echo = self.lines[ch].read(self.delay_samples - 1.0);
                self.lines[ch].push(f[ch] + echo * self.feedback);
                f[ch] = f[ch] * (1.0 - self.mix) + echo * self.mix;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ladder filter: four one-pole low-pass stages with resonant feedback
// ---------------------------------------------------------------------------

struct LadderState {
    g: f32,
    resonance: f32,
    drive: f32,
    stages: [[f32; 4]; 2],
}

impl LadderState {
    fn new(p: LadderFilter, sample_rate: f32) -> Self {
        let cutoff = (p.cutoff_hz as f32).clamp(10.0, sample_rate * 0.45);
        LadderState {
            g: 1.0 - (-TAU * cutoff / sample_rate).exp(),
            resonance: p.resonance.clamp(0.0, 1.0) as f32 * 3.9,
            drive: (p.drive as f32).max(0.0),
            stages: [[0.0; 4]; 2],
        }
    }
}

impl Processor for LadderState {
    fn process(&mut self, buf: &mut [Frame]) {
        for f in buf.iter_mut() {
            for ch in 0..2 {
                let s = &mut self.stages[ch];
                let input = (f[ch] * self.drive - self.resonance * s[3]).tanh();
                s[0] += self.g * (input - s[0]);
                s[1] += self.g * (s[0] - s[1]);
                s[2] += self.g * (s[1] - s[2]);
                s[3] += self.g * (s[2] - s[3]);
                f[ch] = s[3];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Phaser: swept first-order all-pass stages
// ---------------------------------------------------------------------------

const PHASER_STAGES: usize = 4;

struct PhaserState {
    params: Phaser,
    sample_rate: f32,
    phase: f32,
    /// Per channel, per stage: (previous input, previous output).
    memory: [[(f32, f32); PHASER_STAGES]; 2],
    last: [f32; 2],
}

impl PhaserState {
    fn new(params: Phaser, sample_rate: f32) -> Self {
        PhaserState {
            params,
            sample_rate,
            phase: 0.0,
            memory: [[(0.0, 0.0); PHASER_STAGES]; 2],
            last: [0.0; 2],
        }
    }
}

impl Processor for PhaserState {
    fn process(&mut self, buf: &mut [Frame]) {
        let depth = self.params.depth.clamp(0.0, 1.0) as f32;
        let feedback = self.params.feedback.clamp(-0.95, 0.95) as f32;
        let mix = self.params.mix.clamp(0.0, 1.0) as f32;
        let centre = self.params.centre_frequency_hz as f32;
        let nyquist = self.sample_rate * 0.49;
        let step = self.params.rate_hz as f32 / self.sample_rate;
        for f in buf.iter_mut() {
            let lfo = (TAU * self.phase).sin();
            let freq = (centre * 2f32.powf(depth * lfo * 2.0)).clamp(20.0, nyquist);
            let t = (PI * freq / self.sample_rate).tan();
            let a = (t - 1.0) / (t + 1.0);
            for ch in 0..2 {
                let mut x = f[ch] + self.last[ch] * feedback;
                for stage in self.memory[ch].iter_mut() {
                    let (x1, y1) = *stage;
                    let y = a * x + x1 - a * y1;
                    *stage = (x, y);
                    x = y;
                }
                self.last[ch] = x;
                f[ch] = f[ch] * (1.0 - mix) + x * mix;
            }
            self.phase = (self.phase + step).fract();
        }
    }
}

// ---------------------------------------------------------------------------
// Reverb: parallel damped combs into series all-passes, per channel
// ---------------------------------------------------------------------------

const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f32 = 44_100.0;

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Comb {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            filter_store: 0.0,
        }
    }

    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damp) + self.filter_store * damp;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

struct AllPass {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPass {
    fn new(len: usize) -> Self {
        AllPass {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }
}

struct ReverbState {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<AllPass>; 2],
    feedback: f32,
    damp: f32,
    input_gain: f32,
    wet1: f32,
    wet2: f32,
    dry: f32,
}

impl ReverbState {
    fn new(p: Reverb, sample_rate: f32) -> Self {
        let scale = sample_rate / TUNING_RATE;
        let sized = |n: usize, spread: usize| (((n + spread) as f32) * scale) as usize;
        let frozen = p.freeze_mode >= 0.5;
        let wet = p.wet_level.clamp(0.0, 1.0) as f32 * 3.0;
        let width = p.width.clamp(0.0, 1.0) as f32;
        ReverbState {
            combs: [
                COMB_TUNING.iter().map(|&n| Comb::new(sized(n, 0))).collect(),
                COMB_TUNING.iter().map(|&n| Comb::new(sized(n, STEREO_SPREAD))).collect(),
            ],
            allpasses: [
                ALLPASS_TUNING.iter().map(|&n| AllPass::new(sized(n, 0))).collect(),
                ALLPASS_TUNING.iter().map(|&n| AllPass::new(sized(n, STEREO_SPREAD))).collect(),
            ],
            feedback: if frozen {
                1.0
            } else {
                0.7 + 0.28 * p.room_size.clamp(0.0, 1.0) as f32
            },
            damp: if frozen { 0.0 } else { p.damping.clamp(0.0, 1.0) as f32 * 0.4 },
            input_gain: if frozen { 0.0 } else { 0.015 },
            wet1: wet * (width / 2.0 + 0.5),
            wet2: wet * ((1.0 - width) / 2.0),
            dry: p.dry_level.clamp(0.0, 1.0) as f32 * 2.0,
        }
    }
}

impl Processor for ReverbState {
    fn process(&mut self, buf: &mut [Frame]) {
        for f in buf.iter_mut() {
            let input = (f[0] + f[1]) * self.input_gain;
            let mut outs = [0.0f32; 2];
            for (ch, out) in outs.iter_mut().enumerate() {
                let mut acc = 0.0;
                for comb in self.combs[ch].iter_mut() {
                    acc += comb.process(input, self.feedback, self.damp);
                }
                for ap in self.allpasses[ch].iter_mut() {
                    acc = ap.process(acc);
                }
                *out = acc;
            }
            let left = outs[0] * self.wet1 + outs[1] * self.wet2 + f[0] * self.dry;
            let right = outs[1] * self.wet1 + outs[0] * self.wet2 + f[1] * self.dry;
            *f = [left, right];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectKind, Gain};

    fn impulse(frames: usize, rate: u32) -> AudioSegment {
        let mut samples = vec![0.0; frames * 2];
        samples[0] = 1.0;
        samples[1] = 1.0;
        AudioSegment::new(rate, samples)
    }

    fn sine(frames: usize, rate: u32, hz: f32, amp: f32) -> AudioSegment {
        let samples = (0..frames)
            .flat_map(|i| {
                let s = amp * (TAU * hz * i as f32 / rate as f32).sin();
                [s, s]
            })
            .collect();
        AudioSegment::new(rate, samples)
    }

    fn rms(seg: &AudioSegment) -> f32 {
        let sum: f32 = seg.samples.iter().map(|s| s * s).sum();
        (sum / seg.samples.len() as f32).sqrt()
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let seg = sine(100, 8000, 440.0, 0.5);
        let out = ChainProcessor.process(&seg, &EffectChain::identity()).unwrap();
        assert_eq!(out, seg);
    }

    #[test]
    fn test_every_effect_preserves_shape() {
        let seg = sine(4000, 8000, 220.0, 0.5);
        for kind in EffectKind::ALL {
            let chain = EffectChain {
                effects: vec![kind.default_effect()],
            };
            let out = ChainProcessor.process(&seg, &chain).unwrap();
            assert_eq!(out.frames(), seg.frames(), "{kind} changed length");
            assert_eq!(out.sample_rate, seg.sample_rate);
            assert!(out.samples.iter().all(|s| s.is_finite()), "{kind} produced non-finite output");
        }
    }

    #[test]
    fn test_gain_scales_by_decibels() {
        let seg = sine(800, 8000, 100.0, 0.25);
        let chain = EffectChain {
            effects: vec![Effect::Gain(Gain { gain_db: 6.0 })],
        };
        let out = ChainProcessor.process(&seg, &chain).unwrap();
        let ratio = rms(&out) / rms(&seg);
        assert!((ratio - 1.995).abs() < 0.01, "ratio {ratio}");
    }

    #[test]
    fn test_delay_echo_position() {
        let seg = impulse(100, 100);
        let chain = EffectChain {
            effects: vec![Effect::Delay(Delay {
                delay_seconds: 0.1,
                feedback: 0.0,
                mix: 0.5,
            })],
        };
        let out = ChainProcessor.process(&seg, &chain).unwrap();
        // 0.1 s at 100 Hz = 10 frames later.
        assert!((out.samples[0] - 0.5).abs() < 1e-6);
        assert!((out.samples[20] - 0.5).abs() < 1e-6);
        assert_eq!(out.samples[18], 0.0);
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let seg = sine(8000, 8000, 100.0, 0.9);
        let chain = EffectChain {
            effects: vec![Effect::Compressor(Compressor {
                threshold_db: -20.0,
                ratio: 8.0,
                attack_ms: 1.0,
                release_ms: 50.0,
            })],
        };
        let out = ChainProcessor.process(&seg, &chain).unwrap();
        assert!(rms(&out) < rms(&seg) * 0.5);
    }

    #[test]
    fn test_ladder_attenuates_highs() {
        let low = sine(8000, 16000, 100.0, 0.3);
        let high = sine(8000, 16000, 5000.0, 0.3);
        let chain = EffectChain {
            effects: vec![Effect::LadderFilter(LadderFilter {
                cutoff_hz: 300.0,
                resonance: 0.0,
                drive: 1.0,
            })],
        };
        let low_out = ChainProcessor.process(&low, &chain).unwrap();
        let high_out = ChainProcessor.process(&high, &chain).unwrap();
        assert!(rms(&high_out) < rms(&low_out) * 0.1);
    }

    #[test]
    fn test_reverb_adds_tail() {
        let seg = impulse(8000, 8000);
        let chain = EffectChain {
            effects: vec![Effect::Reverb(Reverb::default())],
        };
        let out = ChainProcessor.process(&seg, &chain).unwrap();
        let tail: f32 = out.samples[2000..].iter().map(|s| s.abs()).sum();
        assert!(tail > 0.0);
    }
}
