// Declarative tables and their loaders.
//
// Two formats are supported:
//
// Line tables (chord and beat patterns), one pattern per line:
//
//   # comment
//   verse:I,V,vi,IV
//   chorus:I,IV,V,IV
//   verse:36,42,38,42
//   verse_roll:38,38,38,38
//
// JSON tables:
// - effects (per layer): `{ "<kind>": { "probability", "value_range" } }`
// - inclusion: `{ "<label>": { "<layer>": p } }`, missing entries mean 1.0
// - levels: `{ "<label>": { "<layer>": { "volume": v, "panning": p } } }`
//   where each value is a number or a `[min, max]` range
// - keys / tempos / time signatures: `[[cumulative, value], ...]`
// - measures: `{ "<label>": [choices...] }`
// - arrangements: `[["intro", "verse", ...], ...]`
//
// `TableSet::load` reads whatever `TablePaths` names and falls back to the
// built-in tables for the rest. A named file that is missing or malformed
// fails the run before anything is generated.

use crate::beat::BeatPatternTable;
use crate::chords::ChordPatternTable;
use crate::config::TablePaths;
use crate::effects::{EffectTable, LayerEffectTables};
use crate::error::{GenerationError, Result};
use crate::sampler::{MeasureChoices, SamplerTables, TempoRange, WeightedBuckets};
use crate::structure::{ArrangementPlan, PartLabel};
use crate::theory::{Key, TimeSignature};
use crate::voice::Layer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

// ---------------------------------------------------------------------------
// Built-in tables
// ---------------------------------------------------------------------------

pub const BUILTIN_CHORD_PATTERNS: &str = "\
intro:I,V,vi,IV
intro:vi,IV,I,V
verse:I,V,vi,IV
verse:I,vi,IV,V
verse:vi,IV,I,V
chorus:I,IV,V,IV
chorus:IV,V,iii,vi
chorus:I,V,vi,IV
bridge:IV,V,iii,vi
bridge:ii,V,I,vi
outro:IV,V,I,I
outro:vi,IV,V,I
";

pub const BUILTIN_BEAT_PATTERNS: &str = "\
intro:36,0,42,0
intro:36,42,42,42
verse:36,42,38,42
verse:36,0,38,0
chorus:36,42,38,42,36,36,38,42
chorus:36,38,36,38
bridge:36,0,0,42,38,0,42,0
outro:36,0,38,0
intro_roll:36,38,38,38
verse_roll:38,38,38,38
verse_roll:36,38,38,38,38,38,38,38
chorus_roll:38,38,38,38,38,38,38,38
bridge_roll:36,38,36,38
outro_roll:36,0,0,0
";

// ---------------------------------------------------------------------------
// Line tables
// ---------------------------------------------------------------------------

/// Split a line table into (name, items) pairs, skipping blanks and comments.
fn parse_lines<'a>(text: &'a str, origin: &Path) -> Result<Vec<(&'a str, Vec<&'a str>)>> {
    let mut rows = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, items)) = line.split_once(':') else {
            return Err(GenerationError::ConfigParse {
                path: origin.to_path_buf(),
                message: format!("line {}: expected 'label:item,item,...'", number + 1),
            });
        };
        let items = items.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        rows.push((name.trim(), items));
    }
    Ok(rows)
}

pub fn parse_chord_patterns(text: &str, origin: &Path) -> Result<ChordPatternTable> {
    let mut table = ChordPatternTable::new();
    for (name, items) in parse_lines(text, origin)? {
        let pattern = items.into_iter().map(str::to_string).collect();
        table.add(PartLabel::parse(name), pattern)?;
    }
    Ok(table)
}

pub fn parse_beat_patterns(text: &str, origin: &Path) -> Result<BeatPatternTable> {
    let mut table = BeatPatternTable::new();
    for (name, items) in parse_lines(text, origin)? {
        let pattern = items
            .iter()
            .map(|item| {
                item.parse::<u8>().map_err(|_| GenerationError::ConfigParse {
                    path: origin.to_path_buf(),
                    message: format!("'{name}': '{item}' is not a drum code"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        table.add(name, pattern)?;
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Inclusion and levels
// ---------------------------------------------------------------------------

/// Probability that a layer is mixed into a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InclusionTable {
    pub probabilities: BTreeMap<PartLabel, BTreeMap<Layer, f64>>,
}

impl InclusionTable {
    pub fn probability(&self, label: &PartLabel, layer: Layer) -> f64 {
        self.probabilities
            .get(label)
            .and_then(|row| row.get(&layer))
            .copied()
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        for (label, row) in &self.probabilities {
            for (layer, p) in row {
                if !(0.0..=1.0).contains(p) {
                    return Err(GenerationError::InvalidConfig(format!(
                        "inclusion probability {p} for {label}/{layer} is outside [0, 1]"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A level value: fixed, or sampled uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelValue {
    Fixed(f64),
    Range([f64; 2]),
}

impl LevelValue {
    pub fn sample(self, rng: &mut SongRng) -> f64 {
        match self {
            LevelValue::Fixed(v) => v,
            LevelValue::Range([min, max]) => rng.uniform_f64(min, max),
        }
    }

    fn bounds(self) -> (f64, f64) {
        match self {
            LevelValue::Fixed(v) => (v, v),
            LevelValue::Range([min, max]) => (min, max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    #[serde(default = "unity")]
    pub volume: LevelValue,
    #[serde(default = "center")]
    pub panning: LevelValue,
}

fn unity() -> LevelValue {
    LevelValue::Fixed(1.0)
}

fn center() -> LevelValue {
    LevelValue::Fixed(0.0)
}

impl Default for LevelSpec {
    fn default() -> Self {
        LevelSpec {
            volume: unity(),
            panning: center(),
        }
    }
}

/// A concrete (volume, pan) pair for one part layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixLevel {
    /// Linear gain.
    pub volume: f64,
    /// -1 hard left, 0 center, 1 hard right.
    pub pan: f64,
}

impl MixLevel {
    pub const UNITY: MixLevel = MixLevel { volume: 1.0, pan: 0.0 };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelTable {
    pub levels: BTreeMap<PartLabel, BTreeMap<Layer, LevelSpec>>,
}

impl LevelTable {
    pub fn spec(&self, label: &PartLabel, layer: Layer) -> LevelSpec {
        self.levels
            .get(label)
            .and_then(|row| row.get(&layer))
            .copied()
            .unwrap_or_default()
    }

    /// Draw volume then pan.
    pub fn sample(&self, label: &PartLabel, layer: Layer, rng: &mut SongRng) -> MixLevel {
        let spec = self.spec(label, layer);
        let volume = spec.volume.sample(rng);
        let pan = spec.panning.sample(rng);
        MixLevel { volume, pan }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, row) in &self.levels {
            for (layer, spec) in row {
                let (vmin, vmax) = spec.volume.bounds();
                let (pmin, pmax) = spec.panning.bounds();
                if !(vmin.is_finite() && vmax.is_finite()) || vmin < 0.0 || vmin > vmax {
                    return Err(GenerationError::InvalidConfig(format!(
                        "volume for {label}/{layer} must be a non-negative number or range"
                    )));
                }
                if pmin < -1.0 || pmax > 1.0 || pmin > pmax {
                    return Err(GenerationError::InvalidConfig(format!(
                        "panning for {label}/{layer} must lie in [-1, 1]"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| GenerationError::ConfigurationMissing {
        path: path.to_path_buf(),
        source,
    })
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| GenerationError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Every table a run consults.
#[derive(Debug, Clone)]
pub struct TableSet {
    pub sampler: SamplerTables,
    pub chords: ChordPatternTable,
    pub beats: BeatPatternTable,
    pub effects: LayerEffectTables,
    pub inclusion: InclusionTable,
    pub levels: LevelTable,
}

impl TableSet {
    /// Built-in tables only. Effects are dry and every layer is always
    /// included at unity level.
    pub fn builtin() -> Result<Self> {
        Ok(TableSet {
            sampler: SamplerTables::default(),
            chords: parse_chord_patterns(BUILTIN_CHORD_PATTERNS, Path::new("<builtin>"))?,
            beats: parse_beat_patterns(BUILTIN_BEAT_PATTERNS, Path::new("<builtin>"))?,
            effects: LayerEffectTables::new(),
            inclusion: InclusionTable::default(),
            levels: LevelTable::default(),
        })
    }

    pub fn load(paths: &TablePaths) -> Result<Self> {
        let mut tables = TableSet::builtin()?;

        if let Some(path) = &paths.chord_patterns {
            tables.chords = parse_chord_patterns(&read_text(path)?, path)?;
        }
        if let Some(path) = &paths.beat_patterns {
            tables.beats = parse_beat_patterns(&read_text(path)?, path)?;
        }
        for (layer, path) in &paths.effects {
            let table = EffectTable::from_json_str(&read_text(path)?)?;
            tables.effects.insert(*layer, table);
        }
        if let Some(path) = &paths.inclusion {
            tables.inclusion = load_json(path)?;
            tables.inclusion.validate()?;
        }
        if let Some(path) = &paths.levels {
            tables.levels = load_json(path)?;
            tables.levels.validate()?;
        }
        if let Some(path) = &paths.keys {
            tables.sampler.keys = load_json::<WeightedBuckets<Key>>(path)?;
        }
        if let Some(path) = &paths.tempos {
            tables.sampler.tempos = load_json::<WeightedBuckets<TempoRange>>(path)?;
        }
        if let Some(path) = &paths.time_signatures {
            tables.sampler.time_signatures = load_json::<WeightedBuckets<TimeSignature>>(path)?;
        }
        if let Some(path) = &paths.measures {
            tables.sampler.measures = load_json::<MeasureChoices>(path)?;
        }
        if let Some(path) = &paths.arrangements {
            let catalog: Vec<ArrangementPlan> = load_json(path)?;
            if catalog.is_empty() || catalog.iter().any(|plan| plan.is_empty()) {
                return Err(GenerationError::InvalidConfig(format!(
                    "{}: arrangement catalog must hold non-empty arrangements",
                    path.display()
                )));
            }
            for plan in &catalog {
                plan.validate().map_err(|e| {
                    GenerationError::InvalidConfig(format!("{}: {e}", path.display()))
                })?;
            }
            tables.sampler.arrangements = catalog;
        }

        debug!(
            chord_labels = tables.chords.labels().count(),
            effect_layers = tables.effects.len(),
            arrangements = tables.sampler.arrangements.len(),
            "tables loaded"
        );
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn origin() -> &'static Path {
        Path::new("test.txt")
    }

    #[test]
    fn test_chord_lines() {
        let table = parse_chord_patterns(
            "# comment\n\nverse:I,V,vi,IV\nverse: vi , IV ,I,V\nchorus:I,IV\n",
            origin(),
        )
        .unwrap();
        let verse = table.patterns_for(&PartLabel::Verse);
        assert_eq!(verse.len(), 2);
        assert_eq!(verse[1], vec!["vi", "IV", "I", "V"]);
        assert_eq!(table.patterns_for(&PartLabel::Chorus).len(), 1);
        assert!(table.patterns_for(&PartLabel::Bridge).is_empty());
    }

    #[test]
    fn test_chord_line_errors() {
        assert!(matches!(
            parse_chord_patterns("verse I,V", origin()),
            Err(GenerationError::ConfigParse { .. })
        ));
        assert!(matches!(
            parse_chord_patterns("verse:", origin()),
            Err(GenerationError::InvalidConfig(_))
        ));
        assert!(parse_chord_patterns("verse:I,Q", origin()).is_err());
    }

    #[test]
    fn test_beat_lines_with_rolls() {
        let table = parse_beat_patterns("verse:36,0,38,0\nverse_roll:38,38,38,38\n", origin()).unwrap();
        assert_eq!(table.base_patterns(&PartLabel::Verse), &[vec![36, 0, 38, 0]]);
        assert_eq!(table.roll_patterns(&PartLabel::Verse), &[vec![38, 38, 38, 38]]);
        assert!(matches!(
            parse_beat_patterns("verse:36,kick", origin()),
            Err(GenerationError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_builtin_tables_parse() {
        let tables = TableSet::builtin().unwrap();
        for label in PartLabel::STANDARD {
            assert!(!tables.chords.patterns_for(&label).is_empty());
            assert!(!tables.beats.base_patterns(&label).is_empty());
            assert!(!tables.beats.roll_patterns(&label).is_empty());
        }
    }

    #[test]
    fn test_inclusion_defaults_to_one() {
        let table: InclusionTable =
            serde_json::from_str(r#"{"intro": {"beat": 0.0, "melody": 0.5}}"#).unwrap();
        assert_eq!(table.probability(&PartLabel::Intro, Layer::Beat), 0.0);
        assert_eq!(table.probability(&PartLabel::Intro, Layer::Melody), 0.5);
        assert_eq!(table.probability(&PartLabel::Intro, Layer::Harmony), 1.0);
        assert_eq!(table.probability(&PartLabel::Verse, Layer::Beat), 1.0);
        table.validate().unwrap();

        let bad: InclusionTable = serde_json::from_str(r#"{"intro": {"beat": 1.5}}"#).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_levels_fixed_and_ranged() {
        let table: LevelTable = serde_json::from_str(
            r#"{"verse": {
                "beat": {"volume": 0.8, "panning": -0.25},
                "melody": {"volume": [0.5, 0.7], "panning": [0.1, 0.1]}
            }}"#,
        )
        .unwrap();
        table.validate().unwrap();
        let mut rng = SongRng::new(5);
        let beat = table.sample(&PartLabel::Verse, Layer::Beat, &mut rng);
        assert_eq!(beat, MixLevel { volume: 0.8, pan: -0.25 });
        let melody = table.sample(&PartLabel::Verse, Layer::Melody, &mut rng);
        assert!((0.5..0.7).contains(&melody.volume));
        assert_eq!(melody.pan, 0.1);
        assert_eq!(table.sample(&PartLabel::Chorus, Layer::Harmony, &mut rng), MixLevel::UNITY);
    }

    #[test]
    fn test_levels_reject_bad_pan() {
        let table: LevelTable =
            serde_json::from_str(r#"{"verse": {"beat": {"volume": 1.0, "panning": 2.0}}}"#).unwrap();
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_load_overrides_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let chords = dir.path().join("chords.txt");
        std::fs::write(&chords, "verse:ii,V,I\n").unwrap();
        let fx = dir.path().join("melody_fx.json");
        std::fs::write(&fx, r#"{"gain": {"probability": 1.0, "value_range": {"gain_db": [1, 2]}}}"#).unwrap();
        let measures = dir.path().join("measures.json");
        std::fs::write(&measures, r#"{"verse": [4], "chorus": [2, 4]}"#).unwrap();

        let paths = TablePaths {
            chord_patterns: Some(chords),
            effects: BTreeMap::from([(Layer::Melody, fx)]),
            measures: Some(measures),
            ..Default::default()
        };
        let tables = TableSet::load(&paths).unwrap();
        assert_eq!(tables.chords.patterns_for(&PartLabel::Verse), &[vec!["ii", "V", "I"]]);
        assert_eq!(tables.effects[&Layer::Melody].specs.len(), 1);
        assert_eq!(tables.sampler.measures[&PartLabel::Verse], vec![4]);

        let missing = TablePaths {
            levels: Some(PathBuf::from("/nonexistent/levels.json")),
            ..Default::default()
        };
        assert!(matches!(
            TableSet::load(&missing),
            Err(GenerationError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inclusion.json");
        std::fs::write(&path, "{not json").unwrap();
        let paths = TablePaths {
            inclusion: Some(path),
            ..Default::default()
        };
        assert!(matches!(TableSet::load(&paths), Err(GenerationError::ConfigParse { .. })));
    }

    #[test]
    fn test_load_rejects_unusable_arrangement_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arrangements.json");
        std::fs::write(&path, r#"[["intro", "verse"], ["verse", "sub/part"]]"#).unwrap();
        let paths = TablePaths {
            arrangements: Some(path),
            ..Default::default()
        };
        assert!(matches!(TableSet::load(&paths), Err(GenerationError::InvalidConfig(_))));
    }
}
