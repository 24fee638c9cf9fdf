// Tonal vocabulary: keys, time signatures and roman-numeral chord symbols.
//
// Songs are written in one of the 24 major/minor keys. A `Key` is a tonic
// pitch class plus a mode flag; the mode selects the scale used to place
// roman-numeral roots (major scale, or natural minor for minor keys).
//
// Chord symbols follow the usual roman-numeral conventions: the numeral
// picks the scale degree of the root, its case picks the triad quality
// (upper = major, lower = minor), and optional suffixes alter it:
//
//   bVII   flattened root           vii°  diminished triad
//   V7     dominant seventh         IVmaj7 major seventh
//   iiø7   half-diminished seventh  III+  augmented triad
//
// Resolution is pure: the same (symbol, key) always yields the same pitches.
// Roots are placed in MIDI octave 4 (60..=71) and chord tones stack upward.
//
// Used by chords.rs (progressions), markov.rs (pitch universes), and
// sampler.rs (key and time-signature tables).

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MIDI pitch of C in the octave chord roots are placed in.
pub const CHORD_ROOT_OCTAVE_BASE: u8 = 60;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Major or minor tonality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    /// Semitone offsets of scale degrees 1-7 from the tonic.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            KeyMode::Major => [0, 2, 4, 5, 7, 9, 11],
            KeyMode::Minor => [0, 2, 3, 5, 7, 8, 10],
        }
    }
}

/// A key: tonic pitch class (0 = C) plus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key {
    pub tonic: u8,
    pub mode: KeyMode,
}

impl Key {
    pub fn new(tonic: u8, mode: KeyMode) -> Self {
        Key {
            tonic: tonic % 12,
            mode,
        }
    }

    pub fn major(tonic: u8) -> Self {
        Key::new(tonic, KeyMode::Major)
    }

    pub fn minor(tonic: u8) -> Self {
        Key::new(tonic, KeyMode::Minor)
    }

    /// Pitch class of a 0-based scale degree (wraps past the 7th).
    pub fn degree_pitch_class(&self, degree: u8) -> u8 {
        (self.tonic + self.mode.intervals()[(degree % 7) as usize]) % 12
    }

    /// Check if a MIDI pitch belongs to this key's scale.
    pub fn contains(&self, pitch: u8) -> bool {
        let pc = (pitch % 12 + 12 - self.tonic) % 12;
        self.mode.intervals().contains(&pc)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.mode {
            KeyMode::Major => "",
            KeyMode::Minor => "m",
        };
        write!(f, "{}{}", SHARP_NAMES[self.tonic as usize], suffix)
    }
}

impl FromStr for Key {
    type Err = GenerationError;

    /// Parse names like `G`, `C#`, `Bb`, `Am`, `A#m`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GenerationError::InvalidConfig(format!("unrecognized key '{s}'"));
        let trimmed = s.trim();
        let (body, mode) = match trimmed.strip_suffix('m') {
            Some(body) => (body, KeyMode::Minor),
            None => (trimmed, KeyMode::Major),
        };
        let mut chars = body.chars();
        let letter = chars.next().ok_or_else(invalid)?;
        let natural = letter_pitch_class(letter).ok_or_else(invalid)?;
        let tonic = match chars.as_str() {
            "" => natural,
            "#" => (natural + 1) % 12,
            "b" => (natural + 11) % 12,
            _ => return Err(invalid()),
        };
        Ok(Key::new(tonic, mode))
    }
}

impl TryFrom<String> for Key {
    type Error = GenerationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_string()
    }
}

fn letter_pitch_class(letter: char) -> Option<u8> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// Meter, e.g. 4/4 or 6/8. Beats per measure is the numerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        TimeSignature {
            numerator,
            denominator,
        }
    }

    pub fn common() -> Self {
        TimeSignature::new(4, 4)
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.numerator
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || GenerationError::InvalidConfig(format!("unrecognized time signature '{s}'"));
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let numerator: u32 = num.trim().parse().map_err(|_| invalid())?;
        let denominator: u32 = den.trim().parse().map_err(|_| invalid())?;
        if numerator == 0 || denominator == 0 {
            return Err(GenerationError::Degenerate(format!(
                "time signature '{s}' has a zero term"
            )));
        }
        Ok(TimeSignature::new(numerator, denominator))
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = GenerationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(ts: TimeSignature) -> Self {
        ts.to_string()
    }
}

/// Triad quality, before any seventh is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quality {
    Major,
    Minor,
    Diminished,
    HalfDiminished,
    Augmented,
}

/// Which seventh (if any) is stacked on the triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seventh {
    None,
    Minor,
    Major,
}

/// A parsed roman-numeral chord token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordSymbol {
    token: String,
    /// 0-based scale degree of the root.
    degree: u8,
    /// Chromatic alteration of the root (-1 flat, +1 sharp).
    alteration: i8,
    quality: Quality,
    seventh: Seventh,
}

impl ChordSymbol {
    pub fn parse(token: &str) -> Result<Self, GenerationError> {
        let invalid = || GenerationError::InvalidConfig(format!("unrecognized chord symbol '{token}'"));
        let trimmed = token.trim();

        let (alteration, rest) = if let Some(r) = trimmed.strip_prefix('b') {
            (-1, r)
        } else if let Some(r) = trimmed.strip_prefix('#') {
            (1, r)
        } else {
            (0, trimmed)
        };

        let numeral_len = rest
            .chars()
            .take_while(|c| matches!(c, 'I' | 'V' | 'i' | 'v'))
            .count();
        if numeral_len == 0 {
            return Err(invalid());
        }
        let (numeral, suffix) = rest.split_at(numeral_len);
        let upper = numeral.chars().all(|c| c.is_ascii_uppercase());
        let lower = numeral.chars().all(|c| c.is_ascii_lowercase());
        if !upper && !lower {
            return Err(invalid());
        }
        let degree = match numeral.to_ascii_uppercase().as_str() {
            "I" => 0,
            "II" => 1,
            "III" => 2,
            "IV" => 3,
            "V" => 4,
            "VI" => 5,
            "VII" => 6,
            _ => return Err(invalid()),
        };

        let base = if upper { Quality::Major } else { Quality::Minor };
        let diminished = suffix.strip_prefix('°').or_else(|| suffix.strip_prefix('o'));
        let (quality, suffix) = if let Some(s) = diminished {
            (Quality::Diminished, s)
        } else if let Some(s) = suffix.strip_prefix('ø') {
            (Quality::HalfDiminished, s)
        } else if let Some(s) = suffix.strip_prefix('+') {
            (Quality::Augmented, s)
        } else {
            (base, suffix)
        };

        let seventh = match suffix {
            "" if quality == Quality::HalfDiminished => Seventh::Minor,
            "" => Seventh::None,
            "7" => Seventh::Minor,
            "maj7" | "M7" => Seventh::Major,
            _ => return Err(invalid()),
        };

        Ok(ChordSymbol {
            token: trimmed.to_string(),
            degree,
            alteration,
            quality,
            seventh,
        })
    }

    /// The original token, e.g. `"V7"`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Semitone offsets of each chord tone above the root.
    fn intervals(&self) -> Vec<u8> {
        let mut tones = match self.quality {
            Quality::Major => vec![0, 4, 7],
            Quality::Minor => vec![0, 3, 7],
            Quality::Diminished | Quality::HalfDiminished => vec![0, 3, 6],
            Quality::Augmented => vec![0, 4, 8],
        };
        match (self.quality, self.seventh) {
            (_, Seventh::None) => {}
            // Fully diminished seventh.
            (Quality::Diminished, _) => tones.push(9),
            (_, Seventh::Minor) => tones.push(10),
            (_, Seventh::Major) => tones.push(11),
        }
        tones
    }

    /// Resolve against a key into ascending MIDI pitches, root first.
    pub fn resolve(&self, key: &Key) -> Vec<u8> {
        let pc = (key.degree_pitch_class(self.degree) as i16 + self.alteration as i16)
            .rem_euclid(12) as u8;
        let root = CHORD_ROOT_OCTAVE_BASE + pc;
        self.intervals().into_iter().map(|iv| root + iv).collect()
    }
}

impl fmt::Display for ChordSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Convert a MIDI pitch to a compact note name (e.g., "C4", "F#3").
pub fn pitch_name(pitch: u8) -> String {
    let octave = (pitch / 12) as i16 - 1;
    format!("{}{}", SHARP_NAMES[(pitch % 12) as usize], octave)
}

/// Musical interval helpers.
pub mod interval {
    /// Check if an interval is consonant.
    /// Consonances: unison, m3, M3, P4, P5, m6, M6, octave.
    pub fn is_consonant(semitones: i16) -> bool {
        let ic = (semitones.unsigned_abs() as u8) % 12;
        matches!(ic, 0 | 3 | 4 | 5 | 7 | 8 | 9)
    }

    /// Steps and thirds (up to a major third), including repeated notes.
    pub fn is_step_or_third(semitones: i16) -> bool {
        semitones.unsigned_abs() <= 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(token: &str, key: &str) -> Vec<u8> {
        ChordSymbol::parse(token)
            .unwrap()
            .resolve(&key.parse().unwrap())
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!("C".parse::<Key>().unwrap(), Key::major(0));
        assert_eq!("C#".parse::<Key>().unwrap(), Key::major(1));
        assert_eq!("Bb".parse::<Key>().unwrap(), Key::major(10));
        assert_eq!("Am".parse::<Key>().unwrap(), Key::minor(9));
        assert_eq!("A#m".parse::<Key>().unwrap(), Key::minor(10));
        assert!("H".parse::<Key>().is_err());
        assert!("".parse::<Key>().is_err());
        assert!("Cx".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_display_roundtrip() {
        for name in ["G", "C", "D#", "G#m", "F#m", "Cm"] {
            let key: Key = name.parse().unwrap();
            assert_eq!(key.to_string(), name);
        }
    }

    #[test]
    fn test_time_signature() {
        let ts: TimeSignature = "6/8".parse().unwrap();
        assert_eq!(ts.beats_per_measure(), 6);
        assert_eq!(ts.to_string(), "6/8");
        assert!("4".parse::<TimeSignature>().is_err());
        assert!("0/4".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn test_major_key_triads() {
        assert_eq!(chord("I", "C"), vec![60, 64, 67]);
        assert_eq!(chord("IV", "C"), vec![65, 69, 72]);
        assert_eq!(chord("V", "C"), vec![67, 71, 74]);
        assert_eq!(chord("vi", "C"), vec![69, 72, 76]);
        assert_eq!(chord("ii", "D"), vec![64, 67, 71]);
    }

    #[test]
    fn test_minor_key_uses_natural_minor_roots() {
        assert_eq!(chord("i", "Am"), vec![69, 72, 76]);
        assert_eq!(chord("V", "Am"), vec![64, 68, 71]);
        assert_eq!(chord("VI", "Am"), vec![65, 69, 72]);
    }

    #[test]
    fn test_sevenths_and_alterations() {
        assert_eq!(chord("V7", "C"), vec![67, 71, 74, 77]);
        assert_eq!(chord("IVmaj7", "C"), vec![65, 69, 72, 76]);
        assert_eq!(chord("vii°", "C"), vec![71, 74, 77]);
        assert_eq!(chord("viio7", "C"), vec![71, 74, 77, 80]);
        assert_eq!(chord("iiø7", "C"), vec![62, 65, 68, 72]);
        assert_eq!(chord("bVII", "C"), vec![70, 74, 77]);
        assert_eq!(chord("III+", "C"), vec![64, 68, 72]);
    }

    #[test]
    fn test_resolution_is_pure() {
        let symbol = ChordSymbol::parse("vi").unwrap();
        let key: Key = "F#".parse().unwrap();
        let first = symbol.resolve(&key);
        for _ in 0..10 {
            assert_eq!(symbol.resolve(&key), first);
        }
    }

    #[test]
    fn test_rejects_bad_symbols() {
        for bad in ["", "X", "Iv", "V9", "IIII"] {
            assert!(ChordSymbol::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_pitch_name() {
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(66), "F#4");
        assert_eq!(pitch_name(36), "C2");
    }

    #[test]
    fn test_interval_helpers() {
        assert!(interval::is_consonant(7));
        assert!(interval::is_consonant(-3));
        assert!(!interval::is_consonant(1));
        assert!(!interval::is_consonant(6));
        assert!(interval::is_step_or_third(-4));
        assert!(!interval::is_step_or_third(5));
    }
}
