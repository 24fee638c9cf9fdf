// Chord progression generation.
//
// Each part label has a set of registered roman-numeral patterns. One is
// picked uniformly, resolved against the song key, and looped: the pattern
// spans exactly one measure (each chord lasts beats_per_measure / len beats)
// and repeats for every measure of the part.
//
// The same progression feeds the harmony voice, the melody and bass pitch
// universes (markov.rs), and the chord-membership transition policy.

use crate::error::{GenerationError, Result};
use crate::structure::PartLabel;
use crate::theory::{ChordSymbol, Key, TimeSignature};
use crate::voice::{Layer, NoteEvent, Voice};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use tracing::debug;

/// Pattern used when a part has nothing registered.
pub const DEFAULT_PATTERN: [&str; 4] = ["I", "IV", "V", "vi"];

pub const HARMONY_VELOCITY: u8 = 100;

/// Part label -> candidate chord-symbol sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChordPatternTable {
    patterns: BTreeMap<PartLabel, Vec<Vec<String>>>,
}

impl ChordPatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one pattern. Empty patterns and unparseable symbols are
    /// rejected up front so generation never sees them.
    pub fn add(&mut self, label: PartLabel, pattern: Vec<String>) -> Result<()> {
        if pattern.is_empty() {
            return Err(GenerationError::InvalidConfig(format!(
                "empty chord pattern for part '{label}'"
            )));
        }
        for token in &pattern {
            ChordSymbol::parse(token)?;
        }
        self.patterns.entry(label).or_default().push(pattern);
        Ok(())
    }

    pub fn patterns_for(&self, label: &PartLabel) -> &[Vec<String>] {
        self.patterns.get(label).map_or(&[], |p| p.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &PartLabel> {
        self.patterns.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Pick a pattern for `label`, or the default when none is registered.
    pub fn choose(&self, label: &PartLabel, rng: &mut SongRng) -> Vec<String> {
        match rng.choose(self.patterns_for(label)) {
            Some(pattern) => pattern.clone(),
            None => {
                debug!(part = %label, "no chord patterns registered, using default");
                DEFAULT_PATTERN.iter().map(|s| s.to_string()).collect()
            }
        }
    }
}

/// A resolved chord.
#[derive(Debug, Clone, PartialEq)]
pub struct Chord {
    pub symbol: ChordSymbol,
    /// Ascending MIDI pitches, root first.
    pub pitches: Vec<u8>,
}

impl Chord {
    pub fn root(&self) -> u8 {
        self.pitches[0]
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.pitches.contains(&pitch)
    }
}

/// One part's looping chord pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordProgression {
    pub symbols: Vec<String>,
    pub chords: Vec<Chord>,
    pub beats_per_chord: f64,
    pub measures: u32,
    pub beats_per_measure: u32,
}

impl ChordProgression {
    /// Resolve a symbol sequence against a key.
    pub fn from_symbols(
        symbols: Vec<String>,
        key: &Key,
        time_signature: TimeSignature,
        measures: u32,
    ) -> Result<Self> {
        if symbols.is_empty() {
            return Err(GenerationError::Degenerate("chord pattern is empty".into()));
        }
        if measures == 0 {
            return Err(GenerationError::Degenerate(
                "chord progression needs at least one measure".into(),
            ));
        }
        let chords = symbols
            .iter()
            .map(|token| {
                let symbol = ChordSymbol::parse(token)?;
                let pitches = symbol.resolve(key);
                Ok(Chord { symbol, pitches })
            })
            .collect::<Result<Vec<_>>>()?;
        let beats_per_measure = time_signature.beats_per_measure();
        Ok(ChordProgression {
            beats_per_chord: beats_per_measure as f64 / symbols.len() as f64,
            symbols,
            chords,
            measures,
            beats_per_measure,
        })
    }

    /// Total length in beats.
    pub fn budget_beats(&self) -> u32 {
        self.measures * self.beats_per_measure
    }

    /// Index of the chord sounding at `onset` (beats from part start).
    pub fn chord_index_at(&self, onset: f64) -> usize {
        let within = onset.rem_euclid(self.beats_per_measure as f64);
        let idx = (within / self.beats_per_chord + 1e-9).floor() as usize;
        idx.min(self.chords.len() - 1)
    }

    pub fn chord_at(&self, onset: f64) -> &Chord {
        &self.chords[self.chord_index_at(onset)]
    }

    /// Block chords: every chord tone at the chord's onset, looped over
    /// every measure.
    pub fn harmony_voice(&self) -> Voice {
        let per_measure = self.chords.len();
        let total = self.measures as usize * per_measure;
        let mut events = Vec::new();
        for i in 0..total {
            let chord = &self.chords[i % per_measure];
            let onset = i as f64 * self.beats_per_chord;
            for &pitch in &chord.pitches {
                events.push(NoteEvent::new(pitch, onset, self.beats_per_chord, HARMONY_VELOCITY));
            }
        }
        Voice::new(Layer::Harmony, events, self.budget_beats() as f64)
    }
}

/// Pick and resolve a progression for one part.
pub fn generate_progression(
    table: &ChordPatternTable,
    label: &PartLabel,
    key: &Key,
    time_signature: TimeSignature,
    measures: u32,
    rng: &mut SongRng,
) -> Result<ChordProgression> {
    let symbols = table.choose(label, rng);
    debug!(part = %label, pattern = ?symbols, "chord pattern");
    ChordProgression::from_symbols(symbols, key, time_signature, measures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn c_major_progression(measures: u32) -> ChordProgression {
        ChordProgression::from_symbols(
            strings(&DEFAULT_PATTERN),
            &Key::major(0),
            TimeSignature::common(),
            measures,
        )
        .unwrap()
    }

    #[test]
    fn test_four_chords_one_beat_each() {
        let prog = c_major_progression(4);
        assert_eq!(prog.beats_per_chord, 1.0);
        assert_eq!(prog.budget_beats(), 16);
        let harmony = prog.harmony_voice();
        assert_eq!(harmony.length_beats, 16.0);
        // 16 chord slots, three tones each.
        assert_eq!(harmony.events.len(), 48);
        let last = harmony.events.last().unwrap();
        assert_eq!(last.end(), 16.0);
        assert_eq!(harmony.events[0].pitch, 60);
        assert_eq!(harmony.events[3].pitch, 65);
    }

    #[test]
    fn test_chord_index_follows_onset() {
        let prog = c_major_progression(2);
        assert_eq!(prog.chord_index_at(0.0), 0);
        assert_eq!(prog.chord_index_at(1.5), 1);
        assert_eq!(prog.chord_index_at(3.0), 3);
        assert_eq!(prog.chord_index_at(4.0), 0);
        assert_eq!(prog.chord_index_at(7.99), 3);
    }

    #[test]
    fn test_triple_meter_spreads_chords() {
        let prog = ChordProgression::from_symbols(
            strings(&["i", "iv"]),
            &Key::minor(9),
            TimeSignature::new(3, 4),
            2,
        )
        .unwrap();
        assert_eq!(prog.beats_per_chord, 1.5);
        assert_eq!(prog.chord_at(1.4).symbol.token(), "i");
        assert_eq!(prog.chord_at(1.5).symbol.token(), "iv");
    }

    #[test]
    fn test_table_falls_back_to_default() {
        let table = ChordPatternTable::new();
        let mut rng = SongRng::new(1);
        assert_eq!(table.choose(&PartLabel::Bridge, &mut rng), strings(&DEFAULT_PATTERN));
    }

    #[test]
    fn test_table_choice_is_registered_pattern() {
        let mut table = ChordPatternTable::new();
        table.add(PartLabel::Verse, strings(&["ii", "V", "I"])).unwrap();
        table.add(PartLabel::Verse, strings(&["vi", "IV"])).unwrap();
        let mut rng = SongRng::new(7);
        for _ in 0..50 {
            let pattern = table.choose(&PartLabel::Verse, &mut rng);
            assert!(table.patterns_for(&PartLabel::Verse).contains(&pattern));
        }
    }

    #[test]
    fn test_table_rejects_invalid_patterns() {
        let mut table = ChordPatternTable::new();
        assert!(table.add(PartLabel::Verse, vec![]).is_err());
        assert!(table.add(PartLabel::Verse, strings(&["I", "Q"])).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_zero_measures_rejected() {
        let result = ChordProgression::from_symbols(
            strings(&["I"]),
            &Key::major(0),
            TimeSignature::common(),
            0,
        );
        assert!(matches!(result, Err(GenerationError::Degenerate(_))));
    }
}
