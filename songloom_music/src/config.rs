// Run configuration.
//
// A `GeneratorConfig` is everything a run needs besides its collaborators:
// where the declarative tables live, how each layer picks an instrument,
// which song parameters are pinned, and which behavior variant applies at
// each variation point. Every field has a default, so an empty TOML file (or
// no file at all) produces a working run with the built-in tables.
//
// Example:
//
//   seed = 42
//   output_dir = "songs"
//   renderer = "tone"
//
//   [tables]
//   chord_patterns = "chord_patterns.txt"
//   beat_patterns = "beat_patterns.txt"
//   inclusion = "inst_probabilities.json"
//   levels = "levels.json"
//
//   [tables.effects]
//   melody = "melody_fx.json"
//
//   [instruments]
//   melody = { directory = "sf/melody" }
//   beat = { names = ["kit"] }
//
//   [overrides]
//   key = "Am"
//   tempo = 96
//
//   [variation]
//   inclusion_scope = "per_occurrence"
//   beat_fill = "none"
//
// The CLI applies its flags on top of the loaded file (main.rs).

use crate::beat::BeatFill;
use crate::effects::EffectScope;
use crate::error::{GenerationError, Result};
use crate::markov::TransitionPolicy;
use crate::render::InstrumentSource;
use crate::sampler::ParameterOverrides;
use crate::structure::PartLabel;
use crate::voice::Layer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Whether layer inclusion is rolled once per part label or per occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionScope {
    PerLabel,
    PerOccurrence,
}

/// Behavior switches for each documented variation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationConfig {
    pub melody_policy: TransitionPolicy,
    pub bass_policy: TransitionPolicy,
    pub beat_fill: BeatFill,
    pub inclusion_scope: InclusionScope,
    pub effect_scope: EffectScope,
    pub apply_levels: bool,
    pub couple_bass: bool,
}

impl Default for VariationConfig {
    fn default() -> Self {
        VariationConfig {
            melody_policy: TransitionPolicy::ChordMembership,
            bass_policy: TransitionPolicy::Uniform,
            beat_fill: BeatFill::RollOnLastMeasure,
            inclusion_scope: InclusionScope::PerLabel,
            effect_scope: EffectScope::PerRun,
            apply_levels: true,
            couple_bass: true,
        }
    }
}

/// Paths to declarative tables. Unset entries use the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePaths {
    pub chord_patterns: Option<PathBuf>,
    pub beat_patterns: Option<PathBuf>,
    pub inclusion: Option<PathBuf>,
    pub levels: Option<PathBuf>,
    pub effects: BTreeMap<Layer, PathBuf>,
    pub keys: Option<PathBuf>,
    pub tempos: Option<PathBuf>,
    pub time_signatures: Option<PathBuf>,
    pub measures: Option<PathBuf>,
    pub arrangements: Option<PathBuf>,
}

impl TablePaths {
    /// Resolve relative paths against `base` (the config file's directory).
    fn resolve_against(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for path in [
            &mut self.chord_patterns,
            &mut self.beat_patterns,
            &mut self.inclusion,
            &mut self.levels,
            &mut self.keys,
            &mut self.tempos,
            &mut self.time_signatures,
            &mut self.measures,
            &mut self.arrangements,
        ]
        .into_iter()
        .flatten()
        {
            fix(path);
        }
        for path in self.effects.values_mut() {
            fix(path);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    /// Built-in oscillator synthesis.
    Tone,
    /// External `fluidsynth` with soundfont instruments.
    Fluidsynth,
}

/// External musicality scorer invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Master seed. `None` draws one from the clock at startup.
    pub seed: Option<u64>,
    /// Run name. `None` uses a `%Y%m%d%H%M%S` timestamp.
    pub name: Option<String>,
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub parallel: bool,
    pub export_midi: bool,
    pub renderer: RendererKind,
    pub fluidsynth_program: PathBuf,
    pub tables: TablePaths,
    pub instruments: BTreeMap<Layer, InstrumentSource>,
    pub overrides: ParameterOverrides,
    pub variation: VariationConfig,
    pub scorer: Option<ScorerConfig>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            seed: None,
            name: None,
            output_dir: PathBuf::from("songs"),
            sample_rate: crate::audio::DEFAULT_SAMPLE_RATE,
            parallel: true,
            export_midi: false,
            renderer: RendererKind::Tone,
            fluidsynth_program: PathBuf::from("fluidsynth"),
            tables: TablePaths::default(),
            instruments: default_instruments(),
            overrides: ParameterOverrides::default(),
            variation: VariationConfig::default(),
            scorer: None,
        }
    }
}

/// Instrument names the built-in tone renderer understands.
pub fn default_instruments() -> BTreeMap<Layer, InstrumentSource> {
    let names = |items: &[&str]| InstrumentSource::Names(items.iter().map(|s| s.to_string()).collect());
    BTreeMap::from([
        (Layer::Beat, names(&["kit"])),
        (Layer::Melody, names(&["sine", "triangle", "square"])),
        (Layer::Harmony, names(&["organ", "triangle"])),
        (Layer::Bassline, names(&["bass", "saw"])),
    ])
}

impl GeneratorConfig {
    /// Parse a TOML document. Relative table paths stay as written.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| GenerationError::ConfigParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a TOML file. Relative table and instrument paths are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            GenerationError::ConfigurationMissing {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut config = Self::from_toml_str(&text, path)?;
        if let Some(base) = path.parent() {
            config.tables.resolve_against(base);
            for source in config.instruments.values_mut() {
                if let InstrumentSource::Directory(dir) = source
                    && dir.is_relative()
                {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(GenerationError::InvalidConfig("sample_rate must be positive".into()));
        }
        if let Some(name) = &self.name
            && (name.is_empty() || name.contains(['/', '\\']))
        {
            return Err(GenerationError::InvalidConfig(format!(
                "run name '{name}' must be a plain file name"
            )));
        }
        if let Some(arrangement) = &self.overrides.arrangement {
            arrangement.iter().try_for_each(PartLabel::validate)?;
        }
        self.overrides.measures.keys().try_for_each(PartLabel::validate)?;
        for layer in Layer::ALL {
            if !self.instruments.contains_key(&layer) {
                return Err(GenerationError::InvalidConfig(format!(
                    "no instrument source for layer '{layer}'"
                )));
            }
        }
        Ok(())
    }
}
