// Symbolic randomness rating for a generated part.
//
// Four ratios are computed from a part's melody and its chords:
// - repetition: consecutive melody notes with the same pitch
// - harmony: chords whose every tone pair is consonant
// - melody: consecutive melody intervals no wider than a major third
// - rhythm: melody notes with a "plain" duration (1/4, 1/2, 1 or 2 beats)
//
// Each ratio is normalized by the number of melody notes (chords for the
// harmony ratio). The combined rating is 1 minus a label-weighted sum of the
// ratios, so higher means less conventional. Ratios with an empty denominator
// count as 0.
//
// The rating is informational: it is recorded in the run annotation and
// never feeds back into generation.

use crate::chords::Chord;
use crate::structure::PartLabel;
use crate::theory::interval;
use crate::voice::Voice;
use serde::{Deserialize, Serialize};

const PLAIN_DURATIONS: [f64; 4] = [0.25, 0.5, 1.0, 2.0];

/// Weights for combining the four ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomnessWeights {
    pub repetition: f64,
    pub harmony: f64,
    pub melody: f64,
    pub rhythm: f64,
}

impl RandomnessWeights {
    /// Weights for a part label. Custom labels use the verse weights.
    pub fn for_label(label: &PartLabel) -> Self {
        let (repetition, harmony, melody, rhythm) = match label {
            PartLabel::Intro => (0.2, 0.4, 0.2, 0.2),
            PartLabel::Chorus => (0.4, 0.2, 0.2, 0.2),
            PartLabel::Bridge => (0.2, 0.3, 0.3, 0.2),
            PartLabel::Verse | PartLabel::Outro | PartLabel::Custom(_) => (0.3, 0.3, 0.2, 0.2),
        };
        RandomnessWeights {
            repetition,
            harmony,
            melody,
            rhythm,
        }
    }
}

/// The component ratios and their weighted combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomnessRating {
    pub repetition: f64,
    pub harmony: f64,
    pub melody: f64,
    pub rhythm: f64,
    pub randomness: f64,
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

/// A chord is consonant when every pair of its tones is.
pub fn is_consonant_chord(chord: &Chord) -> bool {
    let p = &chord.pitches;
    p.iter().enumerate().all(|(i, &a)| {
        p[i + 1..]
            .iter()
            .all(|&b| interval::is_consonant(b as i16 - a as i16))
    })
}

/// Rate one part from its melody and chord set.
pub fn rate_part_randomness(label: &PartLabel, melody: &Voice, chords: &[Chord]) -> RandomnessRating {
    let notes = &melody.events;
    let pairs = || notes.windows(2).map(|w| (&w[0], &w[1]));

    let repeated = pairs().filter(|(a, b)| a.pitch == b.pitch).count();
    let steps = pairs()
        .filter(|(a, b)| interval::is_step_or_third(b.pitch as i16 - a.pitch as i16))
        .count();
    let plain = notes
        .iter()
        .filter(|n| PLAIN_DURATIONS.iter().any(|d| (n.duration - d).abs() < 1e-9))
        .count();
    let consonant = chords.iter().filter(|c| is_consonant_chord(c)).count();

    let repetition = ratio(repeated, notes.len());
    let harmony = ratio(consonant, chords.len());
    let melody_ratio = ratio(steps, notes.len());
    let rhythm = ratio(plain, notes.len());

    let w = RandomnessWeights::for_label(label);
    let randomness = 1.0
        - (repetition * w.repetition + harmony * w.harmony + melody_ratio * w.melody + rhythm * w.rhythm);

    RandomnessRating {
        repetition,
        harmony,
        melody: melody_ratio,
        rhythm,
        randomness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::{ChordSymbol, Key};
    use crate::voice::Layer;

    fn chord(token: &str) -> Chord {
        let symbol = ChordSymbol::parse(token).unwrap();
        let pitches = symbol.resolve(&Key::major(0));
        Chord { symbol, pitches }
    }

    #[test]
    fn test_triads_are_consonant() {
        assert!(is_consonant_chord(&chord("I")));
        assert!(is_consonant_chord(&chord("vi")));
        // The minor seventh of V7 against the root is dissonant.
        assert!(!is_consonant_chord(&chord("V7")));
    }

    #[test]
    fn test_ratios_for_simple_melody() {
        // 60 60 62 70: one repeat, two steps-or-thirds (0, +2), one leap.
        let melody = Voice::sequential(
            Layer::Melody,
            &[(60, 1.0, 80), (60, 1.0, 80), (62, 2.0, 80), (70, 3.0, 80)],
        );
        let chords = vec![chord("I"), chord("V7")];
        let rating = rate_part_randomness(&PartLabel::Verse, &melody, &chords);
        assert_eq!(rating.repetition, 0.25);
        assert_eq!(rating.melody, 0.5);
        assert_eq!(rating.rhythm, 0.75);
        assert_eq!(rating.harmony, 0.5);
        let expected = 1.0 - (0.25 * 0.3 + 0.5 * 0.3 + 0.5 * 0.2 + 0.75 * 0.2);
        assert!((rating.randomness - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_inputs_rate_fully_random() {
        let melody = Voice::new(Layer::Melody, Vec::new(), 0.0);
        let rating = rate_part_randomness(&PartLabel::Intro, &melody, &[]);
        assert_eq!(rating.randomness, 1.0);
    }

    #[test]
    fn test_label_weights_sum_to_one() {
        for label in PartLabel::STANDARD {
            let w = RandomnessWeights::for_label(&label);
            assert!((w.repetition + w.harmony + w.melody + w.rhythm - 1.0).abs() < 1e-12);
        }
    }
}
