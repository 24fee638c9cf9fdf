// Symbolic-to-audio rendering, effect processing and musicality scoring.
//
// The generator treats these as collaborators behind traits so the pipeline
// can run against the built-in implementations, external tools, or test
// doubles:
// - `Renderer`: Voice -> AudioSegment. The output is always exactly
//   `length_beats * 60 / tempo` seconds long.
// - `EffectProcessor`: applies an `EffectChain`, preserving length, channel
//   count and sample rate. The built-in implementation is dsp::ChainProcessor.
// - `MusicalityScorer`: rates a finished audio file.
//
// Built-ins:
// - `ToneRenderer` synthesizes simple oscillator voices in-process. The
//   instrument name selects the waveform; beat voices use synthesized drums.
// - `FluidSynthRenderer` writes the voice to a MIDI file and runs the
//   `fluidsynth` command with the layer's soundfont.
// - `CommandScorer` runs an external program on the audio path and reads the
//   last number it prints.
//
// Instruments are chosen per layer, either from a directory of `.sf2` files
// (sorted listing, uniform pick) or from a list of names.

use crate::audio::{seconds_to_frames, AudioSegment};
use crate::effects::EffectChain;
use crate::error::RenderError;
use crate::midi::write_voice_midi;
use crate::voice::{NoteEvent, Voice};
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A sound source for one layer: a name, plus a file for sample-based
/// renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Instrument {
    pub fn named(name: impl Into<String>) -> Self {
        Instrument {
            name: name.into(),
            path: None,
        }
    }

    pub fn from_file(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Instrument {
            name,
            path: Some(path),
        }
    }

    /// Path if file-backed, otherwise the name. Used in annotations.
    pub fn describe(&self) -> String {
        match &self.path {
            Some(p) => p.display().to_string(),
            None => self.name.clone(),
        }
    }
}

/// Where a layer's instrument is drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentSource {
    /// A directory of `.sf2` soundfonts.
    Directory(PathBuf),
    /// A fixed list of instrument names.
    Names(Vec<String>),
}

/// Pick one instrument from a source.
pub fn choose_instrument(source: &InstrumentSource, rng: &mut SongRng) -> Result<Instrument, RenderError> {
    match source {
        InstrumentSource::Directory(dir) => {
            let entries = std::fs::read_dir(dir).map_err(|_| RenderError::MissingAsset(dir.clone()))?;
            let mut fonts: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("sf2")))
                .collect();
            fonts.sort();
            let chosen = rng
                .choose(&fonts)
                .ok_or_else(|| RenderError::MissingAsset(dir.join("*.sf2")))?;
            Ok(Instrument::from_file(chosen.clone()))
        }
        InstrumentSource::Names(names) => rng
            .choose(names)
            .map(|n| Instrument::named(n.clone()))
            .ok_or_else(|| RenderError::UnknownInstrument("(empty instrument list)".into())),
    }
}

/// Everything a renderer needs for one layer of one part.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub voice: &'a Voice,
    pub tempo_bpm: u32,
    pub instrument: &'a Instrument,
    pub sample_rate: u32,
}

impl RenderRequest<'_> {
    pub fn length_seconds(&self) -> f64 {
        self.voice.length_seconds(self.tempo_bpm)
    }

    pub fn length_frames(&self) -> usize {
        seconds_to_frames(self.length_seconds(), self.sample_rate)
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<AudioSegment, RenderError>;
}

pub trait EffectProcessor: Send + Sync {
    fn process(&self, audio: &AudioSegment, chain: &EffectChain) -> Result<AudioSegment, RenderError>;
}

pub trait MusicalityScorer: Send + Sync {
    fn score(&self, audio_path: &Path) -> Result<f64, RenderError>;
}

// ---------------------------------------------------------------------------
// Built-in oscillator renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Saw,
    /// Sine plus octave and twelfth partials.
    Organ,
    /// Synthesized drum kit; pitch is a GM percussion code.
    Drums,
}

impl Waveform {
    /// Resolve an instrument name. Matching is by keyword so soundfont-style
    /// names like `warm_saw_lead` resolve too.
    pub fn for_instrument(name: &str) -> Option<Waveform> {
        let lower = name.to_ascii_lowercase();
        const KEYWORDS: [(&str, Waveform); 9] = [
            ("drum", Waveform::Drums),
            ("kit", Waveform::Drums),
            ("perc", Waveform::Drums),
            ("organ", Waveform::Organ),
            ("square", Waveform::Square),
            ("saw", Waveform::Saw),
            ("tri", Waveform::Triangle),
            ("sine", Waveform::Sine),
            ("bass", Waveform::Triangle),
        ];
        KEYWORDS
            .iter()
            .find(|(kw, _)| lower.contains(kw))
            .map(|&(_, w)| w)
    }

    fn sample(self, phase: f32) -> f32 {
        let p = phase.fract();
        match self {
            Waveform::Sine | Waveform::Drums => (TAU * p).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Saw => 2.0 * p - 1.0,
            Waveform::Organ => {
                0.6 * (TAU * p).sin() + 0.3 * (TAU * 2.0 * p).sin() + 0.1 * (TAU * 3.0 * p).sin()
            }
        }
    }
}

/// In-process oscillator synthesis. Stateless; safe to share across threads.
#[derive(Debug, Clone)]
pub struct ToneRenderer {
    /// Peak amplitude of a full-velocity note.
    pub note_amplitude: f32,
}

impl Default for ToneRenderer {
    fn default() -> Self {
        ToneRenderer {
            note_amplitude: 0.2,
        }
    }
}

const ATTACK_SECONDS: f32 = 0.005;
const RELEASE_SECONDS: f32 = 0.02;

fn midi_to_hz(pitch: u8) -> f32 {
    440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0)
}

impl ToneRenderer {
    fn render_note(&self, mono: &mut [f32], event: &NoteEvent, waveform: Waveform, tempo_bpm: u32, sample_rate: u32) {
        let seconds_per_beat = 60.0 / tempo_bpm as f64;
        let start = seconds_to_frames(event.onset * seconds_per_beat, sample_rate);
        let len = seconds_to_frames(event.duration * seconds_per_beat, sample_rate);
        let end = (start + len).min(mono.len());
        if start >= end {
            return;
        }
        let sr = sample_rate as f32;
        let amp = self.note_amplitude * event.velocity as f32 / 127.0;

        if waveform == Waveform::Drums {
            self.render_drum(&mut mono[start..end], event, amp, sr);
            return;
        }

        let freq = midi_to_hz(event.pitch);
        let attack = (ATTACK_SECONDS * sr).max(1.0);
        let release = (RELEASE_SECONDS * sr).max(1.0);
        let n = (end - start) as f32;
        for (i, out) in mono[start..end].iter_mut().enumerate() {
            let t = i as f32;
            let env = (t / attack).min(1.0).min((n - t) / release).max(0.0);
            *out += waveform.sample(freq * t / sr) * env * amp;
        }
    }

    fn render_drum(&self, out: &mut [f32], event: &NoteEvent, amp: f32, sr: f32) {
        // Noise is seeded from the hit itself so renders are reproducible.
        let mut noise = SongRng::new(((event.pitch as u64) << 32) ^ event.onset.to_bits());
        let (decay, tone_hz, sweep, noise_mix) = match event.pitch {
            35 | 36 => (0.15, 50.0, 70.0, 0.05),
            38 | 40 => (0.12, 180.0, 0.0, 0.7),
            42 | 44 => (0.04, 0.0, 0.0, 1.0),
            46 => (0.2, 0.0, 0.0, 1.0),
            41 | 43 | 45 | 47 | 48 | 50 => (0.2, midi_to_hz(event.pitch) * 0.5, 20.0, 0.2),
            _ => (0.1, 0.0, 0.0, 1.0),
        };
        let mut phase = 0.0f32;
        for (i, sample) in out.iter_mut().enumerate() {
            let t = i as f32 / sr;
            let env = (-t / decay).exp();
            if env < 1e-4 {
                break;
            }
            let hz = tone_hz + sweep * (-t / (decay * 0.3)).exp();
            phase += hz / sr;
            let tone = (TAU * phase).sin();
            let white = noise.next_f64() as f32 * 2.0 - 1.0;
            *sample += ((1.0 - noise_mix) * tone + noise_mix * white) * env * amp;
        }
    }
}

impl Renderer for ToneRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<AudioSegment, RenderError> {
        let waveform = if request.voice.layer.is_percussion() {
            Waveform::Drums
        } else {
            Waveform::for_instrument(&request.instrument.name)
                .ok_or_else(|| RenderError::UnknownInstrument(request.instrument.name.clone()))?
        };
        if request.tempo_bpm == 0 || request.sample_rate == 0 {
            return Err(RenderError::Format("tempo and sample rate must be positive".into()));
        }

        let mut mono = vec![0.0f32; request.length_frames()];
        for event in &request.voice.events {
            self.render_note(&mut mono, event, waveform, request.tempo_bpm, request.sample_rate);
        }
        let samples = mono.into_iter().flat_map(|s| [s, s]).collect();
        Ok(AudioSegment::new(request.sample_rate, samples))
    }
}

// ---------------------------------------------------------------------------
// External adapters
// ---------------------------------------------------------------------------

/// Renders through the `fluidsynth` command line synthesizer.
#[derive(Debug, Clone)]
pub struct FluidSynthRenderer {
    pub program: PathBuf,
    pub gain: f64,
}

impl Default for FluidSynthRenderer {
    fn default() -> Self {
        FluidSynthRenderer {
            program: PathBuf::from("fluidsynth"),
            gain: 0.5,
        }
    }
}

impl Renderer for FluidSynthRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<AudioSegment, RenderError> {
        let soundfont = request
            .instrument
            .path
            .as_ref()
            .ok_or_else(|| RenderError::UnknownInstrument(request.instrument.name.clone()))?;
        if !soundfont.is_file() {
            return Err(RenderError::MissingAsset(soundfont.clone()));
        }

        let scratch = tempfile::tempdir()?;
        let midi_path = scratch.path().join("layer.mid");
        let wav_path = scratch.path().join("layer.wav");
        write_voice_midi(request.voice, request.tempo_bpm, &midi_path)?;

        let output = Command::new(&self.program)
            .arg("-ni")
            .arg("-g")
            .arg(self.gain.to_string())
            .arg("-r")
            .arg(request.sample_rate.to_string())
            .arg("-F")
            .arg(&wav_path)
            .arg(soundfont)
            .arg(&midi_path)
            .output()
            .map_err(|e| RenderError::Command {
                command: self.program.display().to_string(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(RenderError::Command {
                command: self.program.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let audio = AudioSegment::read_wav(&wav_path)?;
        if audio.sample_rate != request.sample_rate {
            return Err(RenderError::Format(format!(
                "synthesizer produced {} Hz, requested {} Hz",
                audio.sample_rate, request.sample_rate
            )));
        }
        // The synthesizer renders release tails past the last note.
        Ok(audio.fit_to_frames(request.length_frames()))
    }
}

/// Runs `program [args..] <audio path>` and parses the last number on stdout.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandScorer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        CommandScorer {
            program: program.into(),
            args,
        }
    }
}

pub(crate) fn parse_trailing_score(stdout: &str) -> Option<f64> {
    stdout
        .split_whitespace()
        .rev()
        .find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-').parse().ok())
}

impl MusicalityScorer for CommandScorer {
    fn score(&self, audio_path: &Path) -> Result<f64, RenderError> {
        let command = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(audio_path)
            .output()
            .map_err(|e| RenderError::Command {
                command: command.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(RenderError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let score = parse_trailing_score(&stdout).ok_or_else(|| RenderError::Command {
            command: command.clone(),
            message: format!("no score in output: {}", stdout.trim()),
        })?;
        debug!(%command, score, "musicality score");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::Layer;

    fn request<'a>(voice: &'a Voice, instrument: &'a Instrument) -> RenderRequest<'a> {
        RenderRequest {
            voice,
            tempo_bpm: 120,
            instrument,
            sample_rate: 8000,
        }
    }

    #[test]
    fn test_tone_render_length_is_exact() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 100), (67, 3.0, 100)]);
        let inst = Instrument::named("sine");
        let audio = ToneRenderer::default().render(&request(&voice, &inst)).unwrap();
        // 4 beats at 120 BPM = 2 seconds.
        assert_eq!(audio.frames(), 16_000);
        assert!(audio.peak() > 0.0);
        assert!(audio.peak() <= 0.2 + 1e-6);
    }

    #[test]
    fn test_trailing_rest_renders_silence() {
        let voice = Voice::new(Layer::Beat, vec![NoteEvent::new(36, 0.0, 1.0, 100)], 8.0);
        let inst = Instrument::named("anything");
        let audio = ToneRenderer::default().render(&request(&voice, &inst)).unwrap();
        assert_eq!(audio.frames(), 32_000);
        assert_eq!(audio.samples[audio.samples.len() - 1], 0.0);
    }

    #[test]
    fn test_unknown_instrument_fails() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 100)]);
        let inst = Instrument::named("theremin");
        let err = ToneRenderer::default().render(&request(&voice, &inst)).unwrap_err();
        assert!(matches!(err, RenderError::UnknownInstrument(name) if name == "theremin"));
    }

    #[test]
    fn test_waveform_keywords() {
        assert_eq!(Waveform::for_instrument("Warm_Saw_Lead"), Some(Waveform::Saw));
        assert_eq!(Waveform::for_instrument("808 kit"), Some(Waveform::Drums));
        assert_eq!(Waveform::for_instrument("church organ"), Some(Waveform::Organ));
        assert_eq!(Waveform::for_instrument("kazoo"), None);
    }

    #[test]
    fn test_drum_render_is_reproducible() {
        let voice = Voice::new(Layer::Beat, vec![NoteEvent::new(38, 0.0, 1.0, 100)], 1.0);
        let inst = Instrument::named("kit");
        let a = ToneRenderer::default().render(&request(&voice, &inst)).unwrap();
        let b = ToneRenderer::default().render(&request(&voice, &inst)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_choose_instrument_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.sf2"), b"").unwrap();
        std::fs::write(dir.path().join("a.SF2"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let source = InstrumentSource::Directory(dir.path().to_path_buf());
        let mut rng = SongRng::new(4);
        for _ in 0..20 {
            let inst = choose_instrument(&source, &mut rng).unwrap();
            assert!(inst.name == "a" || inst.name == "b", "picked {}", inst.name);
            assert!(inst.path.is_some());
        }
    }

    #[test]
    fn test_choose_instrument_missing_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = SongRng::new(4);
        let empty = InstrumentSource::Directory(dir.path().to_path_buf());
        assert!(matches!(choose_instrument(&empty, &mut rng), Err(RenderError::MissingAsset(_))));
        let missing = InstrumentSource::Directory(dir.path().join("nope"));
        assert!(matches!(choose_instrument(&missing, &mut rng), Err(RenderError::MissingAsset(_))));
        assert!(choose_instrument(&InstrumentSource::Names(vec![]), &mut rng).is_err());
    }

    #[test]
    fn test_fluidsynth_requires_soundfont_file() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 100)]);
        let named = Instrument::named("piano");
        let renderer = FluidSynthRenderer::default();
        assert!(matches!(
            renderer.render(&request(&voice, &named)),
            Err(RenderError::UnknownInstrument(_))
        ));
        let missing = Instrument::from_file(PathBuf::from("/nonexistent/piano.sf2"));
        assert!(matches!(
            renderer.render(&request(&voice, &missing)),
            Err(RenderError::MissingAsset(_))
        ));
    }

    #[test]
    fn test_parse_trailing_score() {
        assert_eq!(parse_trailing_score("loading model\nscore: 0.73\n"), Some(0.73));
        assert_eq!(parse_trailing_score("7.5"), Some(7.5));
        assert_eq!(parse_trailing_score("no numbers here"), None);
    }
}
