// Run annotation: the JSON record written next to each song.
//
// Captures every sampled or derived value of a run so the song can be
// understood (and regenerated from its seed) later. Only `timing` depends on
// the wall clock; `without_timing` strips it so two runs with the same seed
// and configuration can be compared field by field.

use crate::compose::ComposedPart;
use crate::config::VariationConfig;
use crate::effects::EffectChain;
use crate::error::{GenerationError, Result};
use crate::mixer::MixPlan;
use crate::sampler::SongParameters;
use crate::scoring::RandomnessRating;
use crate::structure::{PartLabel, Transition};
use crate::voice::Layer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Symbolic choices made for one part label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSummary {
    pub measures: u32,
    pub chord_pattern: Vec<String>,
    pub beat_pattern: Vec<u8>,
    pub roll_pattern: Option<Vec<u8>>,
    pub melody_pitches: Vec<u8>,
    pub bassline_pitches: Vec<u8>,
    pub bass_replacements: usize,
    pub rating: RandomnessRating,
}

impl From<&ComposedPart> for PartSummary {
    fn from(part: &ComposedPart) -> Self {
        PartSummary {
            measures: part.measures,
            chord_pattern: part.progression.symbols.clone(),
            beat_pattern: part.beat.base.clone(),
            roll_pattern: part.beat.roll.clone(),
            melody_pitches: part.melody.pitches(),
            bassline_pitches: part.bassline.pitches(),
            bass_replacements: part.bass_replacements,
            rating: part.rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTiming {
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAnnotation {
    pub name: String,
    pub seed: u64,
    pub key: String,
    pub tempo: u32,
    pub time_signature: String,
    pub measures: BTreeMap<PartLabel, u32>,
    pub arrangement: Vec<PartLabel>,
    pub parts: BTreeMap<PartLabel, PartSummary>,
    pub transitions: Vec<Transition>,
    pub soundfonts: BTreeMap<Layer, String>,
    pub effect_chains: BTreeMap<String, BTreeMap<Layer, EffectChain>>,
    pub levels: BTreeMap<PartLabel, BTreeMap<Layer, f64>>,
    pub panning: BTreeMap<PartLabel, BTreeMap<Layer, f64>>,
    pub part_layers: BTreeMap<PartLabel, Vec<Layer>>,
    pub variation: VariationConfig,
    pub file_name: String,
    pub musicality_score: Option<f64>,
    pub timing: Option<RunTiming>,
}

impl RunAnnotation {
    /// Assemble an annotation from the run's decisions. Score and timing are
    /// filled in afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        seed: u64,
        params: &SongParameters,
        parts: &BTreeMap<PartLabel, ComposedPart>,
        plan: &MixPlan,
        transitions: Vec<Transition>,
        variation: VariationConfig,
        file_name: &str,
    ) -> Self {
        let levels = plan
            .levels
            .iter()
            .map(|(label, row)| (label.clone(), row.iter().map(|(l, m)| (*l, m.volume)).collect()))
            .collect();
        let panning = plan
            .levels
            .iter()
            .map(|(label, row)| (label.clone(), row.iter().map(|(l, m)| (*l, m.pan)).collect()))
            .collect();

        RunAnnotation {
            name: name.to_string(),
            seed,
            key: params.key.to_string(),
            tempo: params.tempo,
            time_signature: params.time_signature.to_string(),
            measures: params.measures.clone(),
            arrangement: params.arrangement.entries.clone(),
            parts: parts.iter().map(|(l, p)| (l.clone(), PartSummary::from(p))).collect(),
            transitions,
            soundfonts: plan.instruments.iter().map(|(l, i)| (*l, i.describe())).collect(),
            effect_chains: plan.effect_chains.clone(),
            levels,
            panning,
            part_layers: plan.part_layers(),
            variation,
            file_name: file_name.to_string(),
            musicality_score: None,
            timing: None,
        }
    }

    /// Copy with the wall-clock fields removed.
    pub fn without_timing(&self) -> Self {
        RunAnnotation {
            timing: None,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GenerationError::InvalidConfig(format!("annotation is not serializable: {e}")))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| GenerationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| GenerationError::ConfigurationMissing {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| GenerationError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{PatternTables, compose_parts};
    use crate::config::default_instruments;
    use crate::effects::{Effect, Gain};
    use crate::mixer::plan_mix;
    use crate::sampler::{ParameterOverrides, SamplerTables};
    use crate::tables::TableSet;
    use pretty_assertions::assert_eq;
    use songloom_prng::SongRng;

    fn annotate(seed: u64) -> RunAnnotation {
        let tables = TableSet::builtin().unwrap();
        let variation = VariationConfig::default();
        let mut rng = SongRng::new(seed);
        let params =
            SongParameters::sample(&SamplerTables::default(), &ParameterOverrides::default(), &mut rng).unwrap();
        let pattern_tables = PatternTables {
            chords: &tables.chords,
            beats: &tables.beats,
        };
        let parts = compose_parts(&params, pattern_tables, &variation, true, &mut rng).unwrap();
        let mut plan = plan_mix(&params.arrangement, &tables, &default_instruments(), &variation, &mut rng).unwrap();
        plan.effect_chains
            .entry(crate::mixer::RUN_SCOPE.to_string())
            .or_default()
            .insert(Layer::Melody, EffectChain { effects: vec![Effect::Gain(Gain { gain_db: 3.0 })] });
        RunAnnotation::new("song", seed, &params, &parts, &plan, Vec::new(), variation, "song.wav")
    }

    #[test]
    fn test_same_seed_same_annotation() {
        let mut a = annotate(17);
        let b = annotate(17);
        a.timing = Some(RunTiming {
            started_at: Utc::now(),
            elapsed_seconds: 1.5,
        });
        assert_eq!(a.without_timing(), b.without_timing());
        assert_ne!(annotate(18).without_timing(), b);
    }

    #[test]
    fn test_json_shape() {
        let annotation = annotate(3);
        let value: serde_json::Value = serde_json::from_str(&annotation.to_json().unwrap()).unwrap();
        assert_eq!(value["seed"], 3);
        assert!(value["key"].is_string());
        assert!(value["arrangement"].as_array().is_some_and(|a| !a.is_empty()));
        assert_eq!(
            value["effect_chains"]["all"]["melody"],
            serde_json::json!([{ "name": "Gain", "parameters": { "gain_db": 3.0 } }])
        );
        assert!(value["musicality_score"].is_null());
        for label in annotation.arrangement.iter() {
            assert!(value["parts"][label.as_str()]["chord_pattern"].is_array());
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        let annotation = annotate(5);
        annotation.write(&path).unwrap();
        let back = RunAnnotation::read(&path).unwrap();
        assert_eq!(back.name, annotation.name);
        assert_eq!(back.arrangement, annotation.arrangement);
        assert_eq!(back.measures, annotation.measures);
        assert_eq!(back.soundfonts, annotation.soundfonts);
        assert_eq!(back.part_layers, annotation.part_layers);
    }
}
