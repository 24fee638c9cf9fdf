// First-order Markov model over a constrained pitch universe.
//
// Melody and bass lines are random walks over a small set of permitted
// pitches derived from the part's chord progression:
// - intro: tones of the first chord only
// - outro: tones of the last chord only
// - other parts: the union of every chord's tones
// Bass universes use chord roots instead of all chord tones.
//
// Two transition policies:
// - Uniform: every pitch moves to every pitch (itself included) with
//   probability 1/|U|.
// - ChordMembership: a move is only allowed onto pitches of the chord
//   sounding at the target step's onset. One matrix is built per chord and
//   the walk switches matrices as it crosses chord boundaries.
//
// Every row sums to 1. A row with no legal successor (no universe pitch in
// the active chord) is rerouted to uniform and counted, so the walk never
// stalls.
//
// Walk: initial pitch uniform over the universe; then repeatedly draw the
// next pitch from the current row, a duration from {1, 2} beats clamped to
// what remains, and a velocity in [70, 100]. Durations always sum to the
// budget exactly.
//
// Matrices are built once and never mutated. Consumed by compose.rs.

use crate::chords::{Chord, ChordProgression};
use crate::error::{GenerationError, Result};
use crate::structure::PartLabel;
use crate::voice::{Layer, NoteEvent, Voice};
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use tracing::warn;

/// Note lengths the walk chooses between, in beats.
pub const STEP_DURATIONS: [u32; 2] = [1, 2];
pub const MIN_VELOCITY: u8 = 70;
pub const MAX_VELOCITY: u8 = 100;
/// MIDI octave bass notes are moved into after generation.
pub const BASS_OCTAVE: u8 = 2;
/// Chance that a bass note differing from the melody is replaced by it.
pub const BASS_COUPLING_PROBABILITY: f64 = 0.5;

/// Successor pitch -> probability.
type TransitionRow = BTreeMap<u8, f64>;

/// The permitted pitches of a walk, sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchUniverse {
    pitches: Vec<u8>,
}

impl PitchUniverse {
    pub fn from_pitches(pitches: impl IntoIterator<Item = u8>) -> Self {
        let mut pitches: Vec<u8> = pitches.into_iter().collect();
        pitches.sort_unstable();
        pitches.dedup();
        PitchUniverse { pitches }
    }

    /// Chord tones selected by the part rule.
    pub fn for_melody(progression: &ChordProgression, label: &PartLabel) -> Self {
        let chords = chords_for_part(progression, label);
        PitchUniverse::from_pitches(chords.iter().flat_map(|c| c.pitches.iter().copied()))
    }

    /// Chord roots selected by the part rule.
    pub fn for_bass(progression: &ChordProgression, label: &PartLabel) -> Self {
        let chords = chords_for_part(progression, label);
        PitchUniverse::from_pitches(chords.iter().map(|c| c.root()))
    }

    pub fn pitches(&self) -> &[u8] {
        &self.pitches
    }

    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.pitches.binary_search(&pitch).is_ok()
    }
}

fn chords_for_part<'a>(progression: &'a ChordProgression, label: &PartLabel) -> &'a [Chord] {
    let chords = progression.chords.as_slice();
    match label {
        PartLabel::Intro => &chords[..chords.len().min(1)],
        PartLabel::Outro => &chords[chords.len().saturating_sub(1)..],
        _ => chords,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    Uniform,
    ChordMembership,
}

/// Row-stochastic transition table over a pitch universe.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    rows: BTreeMap<u8, TransitionRow>,
    rerouted_rows: usize,
}

impl TransitionMatrix {
    pub fn uniform(universe: &PitchUniverse) -> Result<Self> {
        Self::weighted(universe, |_| 1.0)
    }

    /// Equal weight onto pitches of `chord`, 0 elsewhere.
    pub fn chord_membership(universe: &PitchUniverse, chord: &Chord) -> Result<Self> {
        Self::weighted(universe, |pitch| if chord.contains(pitch) { 1.0 } else { 0.0 })
    }

    fn weighted(universe: &PitchUniverse, weight: impl Fn(u8) -> f64) -> Result<Self> {
        if universe.is_empty() {
            return Err(GenerationError::Degenerate("pitch universe is empty".into()));
        }
        let n = universe.len() as f64;
        let mut rows = BTreeMap::new();
        let mut rerouted_rows = 0;
        for &from in universe.pitches() {
            let raw: TransitionRow = universe
                .pitches()
                .iter()
                .map(|&to| (to, weight(to)))
                .collect();
            let total: f64 = raw.values().sum();
            let row = if total > 0.0 {
                raw.into_iter().map(|(to, w)| (to, w / total)).collect()
            } else {
                rerouted_rows += 1;
                universe.pitches().iter().map(|&to| (to, 1.0 / n)).collect()
            };
            rows.insert(from, row);
        }
        Ok(TransitionMatrix {
            rows,
            rerouted_rows,
        })
    }

    /// P(next = `to` | current = `from`); 0 for pitches outside the universe.
    pub fn probability(&self, from: u8, to: u8) -> f64 {
        self.rows
            .get(&from)
            .and_then(|row| row.get(&to))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn row(&self, from: u8) -> Option<&BTreeMap<u8, f64>> {
        self.rows.get(&from)
    }

    /// Rows that had no legal successor and fell back to uniform.
    pub fn rerouted_rows(&self) -> usize {
        self.rerouted_rows
    }

    pub fn states(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.keys().copied()
    }

    /// Draw a successor of `from`. Unknown states walk the first row.
    pub fn next_pitch(&self, from: u8, rng: &mut SongRng) -> u8 {
        let row = self
            .rows
            .get(&from)
            .or_else(|| self.rows.values().next());
        row.and_then(|r| sample_from_row(r, rng.next_f64()))
            .unwrap_or(from)
    }
}

/// Sample a key from a row using a random value in [0, 1).
fn sample_from_row(row: &TransitionRow, rng_val: f64) -> Option<u8> {
    if row.is_empty() {
        return None;
    }
    let total: f64 = row.values().sum();
    if total <= 0.0 {
        return None;
    }

    let target = rng_val * total;
    let mut cumulative = 0.0;
    for (&pitch, &weight) in row {
        cumulative += weight;
        if cumulative > target {
            return Some(pitch);
        }
    }
    // Rounding can leave target just past the final sum.
    row.keys().next_back().copied()
}

/// The matrices a walk consults, switched by onset for chord-aware policies.
#[derive(Debug, Clone)]
pub struct TransitionSchedule {
    matrices: Vec<TransitionMatrix>,
    beats_per_chord: f64,
    beats_per_measure: f64,
}

impl TransitionSchedule {
    /// One matrix for the whole walk.
    pub fn fixed(matrix: TransitionMatrix) -> Self {
        TransitionSchedule {
            matrices: vec![matrix],
            beats_per_chord: 1.0,
            beats_per_measure: 1.0,
        }
    }

    pub fn build(
        policy: TransitionPolicy,
        universe: &PitchUniverse,
        progression: &ChordProgression,
    ) -> Result<Self> {
        match policy {
            TransitionPolicy::Uniform => Ok(Self::fixed(TransitionMatrix::uniform(universe)?)),
            TransitionPolicy::ChordMembership => {
                let matrices = progression
                    .chords
                    .iter()
                    .map(|chord| TransitionMatrix::chord_membership(universe, chord))
                    .collect::<Result<Vec<_>>>()?;
                let rerouted: usize = matrices.iter().map(|m| m.rerouted_rows()).sum();
                if rerouted > 0 {
                    warn!(rerouted, "dead-end transition rows rerouted to uniform");
                }
                Ok(TransitionSchedule {
                    matrices,
                    beats_per_chord: progression.beats_per_chord,
                    beats_per_measure: progression.beats_per_measure as f64,
                })
            }
        }
    }

    /// The matrix for a step starting at `onset` beats.
    pub fn matrix_at(&self, onset: f64) -> &TransitionMatrix {
        let within = onset.rem_euclid(self.beats_per_measure);
        let idx = (within / self.beats_per_chord + 1e-9).floor() as usize;
        &self.matrices[idx.min(self.matrices.len() - 1)]
    }

    pub fn matrices(&self) -> &[TransitionMatrix] {
        &self.matrices
    }
}

/// Random walk filling exactly `budget_beats`.
pub fn generate_sequence(
    layer: Layer,
    universe: &PitchUniverse,
    budget_beats: u32,
    schedule: &TransitionSchedule,
    rng: &mut SongRng,
) -> Result<Voice> {
    if universe.is_empty() {
        return Err(GenerationError::Degenerate(format!(
            "{layer} pitch universe is empty"
        )));
    }
    if budget_beats == 0 {
        return Err(GenerationError::Degenerate(format!(
            "{layer} has a zero beat budget"
        )));
    }

    let mut current = *rng
        .choose(universe.pitches())
        .ok_or_else(|| GenerationError::Degenerate("pitch universe is empty".into()))?;
    let mut remaining = budget_beats;
    let mut onset = 0u32;
    let mut events = Vec::new();

    while remaining > 0 {
        current = schedule.matrix_at(onset as f64).next_pitch(current, rng);
        let mut duration = *rng.choose(&STEP_DURATIONS).unwrap_or(&1);
        if duration > remaining {
            duration = remaining;
        }
        let velocity = rng.range_u8_inclusive(MIN_VELOCITY, MAX_VELOCITY);
        events.push(NoteEvent::new(current, onset as f64, duration as f64, velocity));
        onset += duration;
        remaining -= duration;
    }

    Ok(Voice::new(layer, events, budget_beats as f64))
}

/// Pull bass notes toward the melody: at each shared index where pitches
/// differ, take the melody pitch with probability 0.5. Durations and onsets
/// are untouched. Returns how many notes were replaced.
pub fn couple_bass_to_melody(bass: &mut Voice, melody: &Voice, rng: &mut SongRng) -> usize {
    let mut replaced = 0;
    for (bass_note, melody_note) in bass.events.iter_mut().zip(&melody.events) {
        if bass_note.pitch != melody_note.pitch && rng.random_bool(BASS_COUPLING_PROBABILITY) {
            bass_note.pitch = melody_note.pitch;
            replaced += 1;
        }
    }
    replaced
}

/// Keep the pitch class, move to the given MIDI octave (C2 = 36).
pub fn transpose_to_register(pitch: u8, octave: u8) -> u8 {
    (octave + 1) * 12 + pitch % 12
}

pub fn transpose_voice(voice: &mut Voice, octave: u8) {
    for event in &mut voice.events {
        event.pitch = transpose_to_register(event.pitch, octave);
    }
}
