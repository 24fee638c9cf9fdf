// Symbolic note data: the representation every layer is generated into.
//
// A song part is four voices, one per `Layer`. Each voice is a flat list of
// `NoteEvent`s measured in beats (quarter notes at the song tempo). Rendering,
// MIDI export and the randomness rating all read this representation; audio
// is derived from it, never the other way around.
//
// Shape conventions per layer:
// - Melody / Bassline: monophonic and gapless. Each onset equals the previous
//   onset plus duration, and durations sum to the part's beat budget.
// - Harmony: chord tones stacked at a common onset (one event per tone).
// - Beat: drum codes on a fixed step grid; rest steps are omitted, so onsets
//   are not necessarily contiguous.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four layers of a song part, in mix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Beat = 0,
    Melody = 1,
    Harmony = 2,
    Bassline = 3,
}

impl Layer {
    pub const ALL: [Layer; 4] = [Layer::Beat, Layer::Melody, Layer::Harmony, Layer::Bassline];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name used in configuration tables and file names.
    pub fn name(self) -> &'static str {
        match self {
            Layer::Beat => "beat",
            Layer::Melody => "melody",
            Layer::Harmony => "harmony",
            Layer::Bassline => "bassline",
        }
    }

    pub fn from_name(name: &str) -> Option<Layer> {
        Layer::ALL.into_iter().find(|l| l.name() == name)
    }

    /// Beat voices carry General MIDI percussion codes rather than pitches.
    pub fn is_percussion(self) -> bool {
        self == Layer::Beat
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI pitch, or a drum code for beat voices.
    pub pitch: u8,
    /// Start time in beats from the start of the part.
    pub onset: f64,
    /// Length in beats.
    pub duration: f64,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(pitch: u8, onset: f64, duration: f64, velocity: u8) -> Self {
        NoteEvent {
            pitch,
            onset,
            duration,
            velocity,
        }
    }

    pub fn end(&self) -> f64 {
        self.onset + self.duration
    }
}

/// A layer's events for one song part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub layer: Layer,
    pub events: Vec<NoteEvent>,
    /// Total length in beats, including any trailing rest steps.
    pub length_beats: f64,
}

impl Voice {
    pub fn new(layer: Layer, events: Vec<NoteEvent>, length_beats: f64) -> Self {
        Voice {
            layer,
            events,
            length_beats,
        }
    }

    /// Build a gapless monophonic voice from (pitch, duration, velocity)
    /// triples, assigning onsets cumulatively.
    pub fn sequential(layer: Layer, notes: &[(u8, f64, u8)]) -> Self {
        let mut onset = 0.0;
        let mut events = Vec::with_capacity(notes.len());
        for &(pitch, duration, velocity) in notes {
            events.push(NoteEvent::new(pitch, onset, duration, velocity));
            onset += duration;
        }
        Voice::new(layer, events, onset)
    }

    pub fn pitches(&self) -> Vec<u8> {
        self.events.iter().map(|e| e.pitch).collect()
    }

    pub fn durations(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.duration).collect()
    }

    pub fn total_duration(&self) -> f64 {
        self.events.iter().map(|e| e.duration).sum()
    }

    /// Length in seconds at the given tempo.
    pub fn length_seconds(&self, tempo_bpm: u32) -> f64 {
        self.length_beats * 60.0 / tempo_bpm as f64
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Check the monophonic invariant: onsets are contiguous from zero.
    pub fn is_gapless(&self) -> bool {
        let mut expected = 0.0;
        for event in &self.events {
            if (event.onset - expected).abs() > 1e-9 {
                return false;
            }
            expected = event.end();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_names_roundtrip() {
        for layer in Layer::ALL {
            assert_eq!(Layer::from_name(layer.name()), Some(layer));
        }
        assert_eq!(Layer::from_name("vocals"), None);
    }

    #[test]
    fn test_layer_order_is_mix_order() {
        let indices: Vec<usize> = Layer::ALL.iter().map(|l| l.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(Layer::Beat.is_percussion());
        assert!(!Layer::Melody.is_percussion());
    }

    #[test]
    fn test_sequential_assigns_onsets() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 80), (62, 2.0, 90), (64, 1.0, 70)]);
        let onsets: Vec<f64> = voice.events.iter().map(|e| e.onset).collect();
        assert_eq!(onsets, vec![0.0, 1.0, 3.0]);
        assert_eq!(voice.length_beats, 4.0);
        assert_eq!(voice.total_duration(), 4.0);
        assert!(voice.is_gapless());
    }

    #[test]
    fn test_gap_detected() {
        let voice = Voice::new(
            Layer::Melody,
            vec![NoteEvent::new(60, 0.0, 1.0, 80), NoteEvent::new(62, 2.0, 1.0, 80)],
            3.0,
        );
        assert!(!voice.is_gapless());
    }

    #[test]
    fn test_length_seconds() {
        let voice = Voice::new(Layer::Beat, vec![], 16.0);
        assert!((voice.length_seconds(120) - 8.0).abs() < 1e-12);
        assert!(voice.is_empty());
    }

    #[test]
    fn test_layer_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Layer::Bassline).unwrap(), "\"bassline\"");
    }
}
