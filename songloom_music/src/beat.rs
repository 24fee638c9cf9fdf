// Drum pattern selection.
//
// Beat patterns are short lists of General MIDI percussion codes (36 kick,
// 38 snare, 42 closed hi-hat, ...) with 0 marking a rest step. One pattern
// always spans exactly one measure: each step lasts
// beats_per_measure / pattern_len beats.
//
// A part's beat is its base pattern looped once per measure. With fills
// enabled, the final measure is replaced by a "roll" pattern registered
// under `<label>_roll`, giving each section a one-measure fill before the
// next one starts.

use crate::error::{GenerationError, Result};
use crate::structure::PartLabel;
use crate::voice::{Layer, NoteEvent, Voice};
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use tracing::debug;

pub const KICK: u8 = 36;
pub const SNARE: u8 = 38;
pub const CLOSED_HIHAT: u8 = 42;

pub const DEFAULT_BASE: [u8; 4] = [KICK, 0, SNARE, 0];
pub const DEFAULT_ROLL: [u8; 4] = [KICK, SNARE, SNARE, SNARE];

pub const BEAT_VELOCITY: u8 = 100;

const ROLL_SUFFIX: &str = "_roll";

/// Whether the last measure of each part is a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatFill {
    RollOnLastMeasure,
    None,
}

/// Pattern-table key: a part label, or that label's fill slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    label: PartLabel,
    roll: bool,
}

/// Part label -> drum patterns, plus `<label>_roll` fill patterns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeatPatternTable {
    patterns: BTreeMap<Slot, Vec<Vec<u8>>>,
}

impl BeatPatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern under a raw table name; `verse_roll` registers a
    /// fill for `verse`.
    pub fn add(&mut self, name: &str, pattern: Vec<u8>) -> Result<()> {
        if pattern.is_empty() {
            return Err(GenerationError::InvalidConfig(format!(
                "empty beat pattern for '{name}'"
            )));
        }
        let name = name.trim();
        let slot = match name.strip_suffix(ROLL_SUFFIX) {
            Some(base) => Slot {
                label: PartLabel::parse(base),
                roll: true,
            },
            None => Slot {
                label: PartLabel::parse(name),
                roll: false,
            },
        };
        self.patterns.entry(slot).or_default().push(pattern);
        Ok(())
    }

    fn candidates(&self, label: &PartLabel, roll: bool) -> &[Vec<u8>] {
        let slot = Slot {
            label: label.clone(),
            roll,
        };
        self.patterns.get(&slot).map_or(&[], |p| p.as_slice())
    }

    pub fn base_patterns(&self, label: &PartLabel) -> &[Vec<u8>] {
        self.candidates(label, false)
    }

    pub fn roll_patterns(&self, label: &PartLabel) -> &[Vec<u8>] {
        self.candidates(label, true)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// A part's assembled drum track.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatTrack {
    pub base: Vec<u8>,
    pub roll: Option<Vec<u8>>,
    /// Every step in order, rests included.
    pub steps: Vec<u8>,
    pub voice: Voice,
}

/// Pick patterns for `label` and loop them over `measures`.
pub fn generate_beat(
    table: &BeatPatternTable,
    label: &PartLabel,
    beats_per_measure: u32,
    measures: u32,
    fill: BeatFill,
    rng: &mut SongRng,
) -> Result<BeatTrack> {
    if measures == 0 {
        return Err(GenerationError::Degenerate(format!(
            "part '{label}' has zero measures"
        )));
    }

    let base = match rng.choose(table.base_patterns(label)) {
        Some(p) => p.clone(),
        None => {
            debug!(part = %label, "no beat patterns registered, using default");
            DEFAULT_BASE.to_vec()
        }
    };
    let roll = match fill {
        BeatFill::None => None,
        BeatFill::RollOnLastMeasure => Some(match rng.choose(table.roll_patterns(label)) {
            Some(p) => p.clone(),
            None => DEFAULT_ROLL.to_vec(),
        }),
    };

    let mut measure_patterns: Vec<&[u8]> = Vec::with_capacity(measures as usize);
    let looped = if roll.is_some() { measures - 1 } else { measures };
    for _ in 0..looped {
        measure_patterns.push(&base);
    }
    if let Some(r) = &roll {
        measure_patterns.push(r);
    }

    let mut steps = Vec::new();
    let mut events = Vec::new();
    for (measure, pattern) in measure_patterns.iter().enumerate() {
        let step_beats = beats_per_measure as f64 / pattern.len() as f64;
        let measure_start = measure as f64 * beats_per_measure as f64;
        for (i, &code) in pattern.iter().enumerate() {
            steps.push(code);
            if code != 0 {
                let onset = measure_start + i as f64 * step_beats;
                events.push(NoteEvent::new(code, onset, step_beats, BEAT_VELOCITY));
            }
        }
    }

    debug!(part = %label, base = ?base, roll = ?roll, "beat pattern");
    let length = (measures * beats_per_measure) as f64;
    Ok(BeatTrack {
        base,
        roll,
        steps,
        voice: Voice::new(Layer::Beat, events, length),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_roll() {
        let table = BeatPatternTable::new();
        let mut rng = SongRng::new(1);
        let track = generate_beat(
            &table,
            &PartLabel::Verse,
            4,
            3,
            BeatFill::RollOnLastMeasure,
            &mut rng,
        )
        .unwrap();
        assert_eq!(track.base, DEFAULT_BASE.to_vec());
        assert_eq!(track.roll, Some(DEFAULT_ROLL.to_vec()));
        assert_eq!(
            track.steps,
            vec![36, 0, 38, 0, 36, 0, 38, 0, 36, 38, 38, 38]
        );
        // Rests are dropped: 2 + 2 + 4 hits.
        assert_eq!(track.voice.events.len(), 8);
        assert_eq!(track.voice.length_beats, 12.0);
        assert_eq!(track.voice.events[7].onset, 11.0);
    }

    #[test]
    fn test_no_fill_loops_base() {
        let mut table = BeatPatternTable::new();
        table.add("chorus", vec![36, 42, 38, 42]).unwrap();
        table.add("chorus_roll", vec![38, 38, 38, 38]).unwrap();
        let mut rng = SongRng::new(1);
        let track =
            generate_beat(&table, &PartLabel::Chorus, 4, 2, BeatFill::None, &mut rng).unwrap();
        assert_eq!(track.roll, None);
        assert_eq!(track.steps, vec![36, 42, 38, 42, 36, 42, 38, 42]);
    }

    #[test]
    fn test_pattern_length_sets_step_size() {
        let mut table = BeatPatternTable::new();
        table.add("intro", vec![36, 42, 42, 38, 42, 42, 36, 42]).unwrap();
        let mut rng = SongRng::new(1);
        let track =
            generate_beat(&table, &PartLabel::Intro, 4, 1, BeatFill::None, &mut rng).unwrap();
        assert_eq!(track.voice.events[1].onset, 0.5);
        assert_eq!(track.voice.events[1].duration, 0.5);
        assert_eq!(track.voice.events.last().unwrap().end(), 4.0);
    }

    #[test]
    fn test_single_measure_is_all_roll() {
        let table = BeatPatternTable::new();
        let mut rng = SongRng::new(2);
        let track = generate_beat(
            &table,
            &PartLabel::Outro,
            4,
            1,
            BeatFill::RollOnLastMeasure,
            &mut rng,
        )
        .unwrap();
        assert_eq!(track.steps, DEFAULT_ROLL.to_vec());
    }

    #[test]
    fn test_roll_names_parsed() {
        let mut table = BeatPatternTable::new();
        table.add("bridge_roll", vec![38, 38]).unwrap();
        assert!(table.base_patterns(&PartLabel::Bridge).is_empty());
        assert_eq!(table.roll_patterns(&PartLabel::Bridge).len(), 1);
        assert!(table.add("bridge", vec![]).is_err());
    }

    #[test]
    fn test_padded_names_register_under_trimmed_label() {
        let mut table = BeatPatternTable::new();
        table.add("  solo ", vec![36, 42]).unwrap();
        table.add(" solo_roll  ", vec![38, 38]).unwrap();
        let solo = PartLabel::Custom("solo".into());
        assert_eq!(table.base_patterns(&solo), &[vec![36, 42]]);
        assert_eq!(table.roll_patterns(&solo), &[vec![38, 38]]);
    }

    #[test]
    fn test_zero_measures_rejected() {
        let table = BeatPatternTable::new();
        let mut rng = SongRng::new(2);
        let result = generate_beat(&table, &PartLabel::Outro, 4, 0, BeatFill::None, &mut rng);
        assert!(result.is_err());
    }
}
