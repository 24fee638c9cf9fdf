// Randomized per-layer effect chains.
//
// An effect table lists effect kinds in a fixed order, each with an
// activation probability and [min, max] ranges for some of its parameters.
// Randomizing a table walks it in order: one uniform draw decides whether
// the effect joins the chain (u < probability), then each declared parameter
// is drawn uniformly from its range, in parameter-name order. Parameters the
// table does not mention keep the kind's default.
//
// The resulting `EffectChain` is ordered (it is a cascade, not a set) and an
// empty chain is the identity. Chains serialize as
// `[{ "name": "Gain", "parameters": { "gain_db": 3.0 } }]` for annotations.
//
// Tables load from the JSON shape
//   { "<kind>": { "probability": p, "value_range": { "<param>": [min, max] } } }
// and are reordered canonically on load (compressor, gain, chorus,
// ladder_filter, phaser, delay, reverb). The DSP for every kind lives in
// dsp.rs.

use crate::error::{GenerationError, Result};
use crate::voice::Layer;
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Compressor,
    Gain,
    Chorus,
    LadderFilter,
    Phaser,
    Delay,
    Reverb,
}

impl EffectKind {
    /// Canonical chain order.
    pub const ALL: [EffectKind; 7] = [
        EffectKind::Compressor,
        EffectKind::Gain,
        EffectKind::Chorus,
        EffectKind::LadderFilter,
        EffectKind::Phaser,
        EffectKind::Delay,
        EffectKind::Reverb,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            EffectKind::Compressor => "compressor",
            EffectKind::Gain => "gain",
            EffectKind::Chorus => "chorus",
            EffectKind::LadderFilter => "ladder_filter",
            EffectKind::Phaser => "phaser",
            EffectKind::Delay => "delay",
            EffectKind::Reverb => "reverb",
        }
    }

    pub fn from_table_name(name: &str) -> Option<EffectKind> {
        EffectKind::ALL.into_iter().find(|k| k.table_name() == name)
    }

    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            EffectKind::Compressor => &["attack_ms", "ratio", "release_ms", "threshold_db"],
            EffectKind::Gain => &["gain_db"],
            EffectKind::Chorus => &["centre_delay_ms", "depth", "feedback", "mix", "rate_hz"],
            EffectKind::LadderFilter => &["cutoff_hz", "drive", "resonance"],
            EffectKind::Phaser => &["centre_frequency_hz", "depth", "feedback", "mix", "rate_hz"],
            EffectKind::Delay => &["delay_seconds", "feedback", "mix"],
            EffectKind::Reverb => &[
                "damping",
                "dry_level",
                "freeze_mode",
                "room_size",
                "wet_level",
                "width",
            ],
        }
    }

    /// The effect with every parameter at its default.
    pub fn default_effect(self) -> Effect {
        match self {
            EffectKind::Compressor => Effect::Compressor(Compressor::default()),
            EffectKind::Gain => Effect::Gain(Gain::default()),
            EffectKind::Chorus => Effect::Chorus(Chorus::default()),
            EffectKind::LadderFilter => Effect::LadderFilter(LadderFilter::default()),
            EffectKind::Phaser => Effect::Phaser(Phaser::default()),
            EffectKind::Delay => Effect::Delay(Delay::default()),
            EffectKind::Reverb => Effect::Reverb(Reverb::default()),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

// ---------------------------------------------------------------------------
// Effect parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor {
            threshold_db: 0.0,
            ratio: 1.0,
            attack_ms: 1.0,
            release_ms: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gain {
    pub gain_db: f64,
}

impl Default for Gain {
    fn default() -> Self {
        Gain { gain_db: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chorus {
    pub rate_hz: f64,
    pub depth: f64,
    pub centre_delay_ms: f64,
    pub feedback: f64,
    pub mix: f64,
}

impl Default for Chorus {
    fn default() -> Self {
        Chorus {
            rate_hz: 1.0,
            depth: 0.25,
            centre_delay_ms: 7.0,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

/// Resonant low-pass filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderFilter {
    pub cutoff_hz: f64,
    pub resonance: f64,
    pub drive: f64,
}

impl Default for LadderFilter {
    fn default() -> Self {
        LadderFilter {
            cutoff_hz: 200.0,
            resonance: 0.0,
            drive: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phaser {
    pub rate_hz: f64,
    pub depth: f64,
    pub centre_frequency_hz: f64,
    pub feedback: f64,
    pub mix: f64,
}

impl Default for Phaser {
    fn default() -> Self {
        Phaser {
            rate_hz: 1.0,
            depth: 0.5,
            centre_frequency_hz: 1300.0,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub delay_seconds: f64,
    pub feedback: f64,
    pub mix: f64,
}

impl Default for Delay {
    fn default() -> Self {
        Delay {
            delay_seconds: 0.5,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reverb {
    pub room_size: f64,
    pub damping: f64,
    pub wet_level: f64,
    pub dry_level: f64,
    pub width: f64,
    /// Values >= 0.5 hold the tail indefinitely.
    pub freeze_mode: f64,
}

impl Default for Reverb {
    fn default() -> Self {
        Reverb {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.33,
            dry_level: 0.4,
            width: 1.0,
            freeze_mode: 0.0,
        }
    }
}

/// One concretely parameterized effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "parameters")]
pub enum Effect {
    Compressor(Compressor),
    Gain(Gain),
    Chorus(Chorus),
    LadderFilter(LadderFilter),
    Phaser(Phaser),
    Delay(Delay),
    Reverb(Reverb),
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Compressor(_) => EffectKind::Compressor,
            Effect::Gain(_) => EffectKind::Gain,
            Effect::Chorus(_) => EffectKind::Chorus,
            Effect::LadderFilter(_) => EffectKind::LadderFilter,
            Effect::Phaser(_) => EffectKind::Phaser,
            Effect::Delay(_) => EffectKind::Delay,
            Effect::Reverb(_) => EffectKind::Reverb,
        }
    }

    /// Set a parameter by its table name. Returns false for names the kind
    /// does not have.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        let slot = match (self, name) {
            (Effect::Compressor(c), "threshold_db") => &mut c.threshold_db,
            (Effect::Compressor(c), "ratio") => &mut c.ratio,
            (Effect::Compressor(c), "attack_ms") => &mut c.attack_ms,
            (Effect::Compressor(c), "release_ms") => &mut c.release_ms,
            (Effect::Gain(g), "gain_db") => &mut g.gain_db,
            (Effect::Chorus(c), "rate_hz") => &mut c.rate_hz,
            (Effect::Chorus(c), "depth") => &mut c.depth,
            (Effect::Chorus(c), "centre_delay_ms") => &mut c.centre_delay_ms,
            (Effect::Chorus(c), "feedback") => &mut c.feedback,
            (Effect::Chorus(c), "mix") => &mut c.mix,
            (Effect::LadderFilter(l), "cutoff_hz") => &mut l.cutoff_hz,
            (Effect::LadderFilter(l), "resonance") => &mut l.resonance,
            (Effect::LadderFilter(l), "drive") => &mut l.drive,
            (Effect::Phaser(p), "rate_hz") => &mut p.rate_hz,
            (Effect::Phaser(p), "depth") => &mut p.depth,
            (Effect::Phaser(p), "centre_frequency_hz") => &mut p.centre_frequency_hz,
            (Effect::Phaser(p), "feedback") => &mut p.feedback,
            (Effect::Phaser(p), "mix") => &mut p.mix,
            (Effect::Delay(d), "delay_seconds") => &mut d.delay_seconds,
            (Effect::Delay(d), "feedback") => &mut d.feedback,
            (Effect::Delay(d), "mix") => &mut d.mix,
            (Effect::Reverb(r), "room_size") => &mut r.room_size,
            (Effect::Reverb(r), "damping") => &mut r.damping,
            (Effect::Reverb(r), "wet_level") => &mut r.wet_level,
            (Effect::Reverb(r), "dry_level") => &mut r.dry_level,
            (Effect::Reverb(r), "width") => &mut r.width,
            (Effect::Reverb(r), "freeze_mode") => &mut r.freeze_mode,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Short human-readable form for logs, e.g. `Gain(gain_db=3.00)`.
    pub fn label(&self) -> String {
        match self {
            Effect::Compressor(c) => format!(
                "Compressor(threshold_db={:.2}, ratio={:.2})",
                c.threshold_db, c.ratio
            ),
            Effect::Gain(g) => format!("Gain(gain_db={:.2})", g.gain_db),
            Effect::Chorus(c) => format!("Chorus(rate_hz={:.2}, mix={:.2})", c.rate_hz, c.mix),
            Effect::LadderFilter(l) => format!("LadderFilter(cutoff_hz={:.1})", l.cutoff_hz),
            Effect::Phaser(p) => format!("Phaser(rate_hz={:.2}, mix={:.2})", p.rate_hz, p.mix),
            Effect::Delay(d) => format!("Delay(delay_seconds={:.3})", d.delay_seconds),
            Effect::Reverb(r) => format!("Reverb(room_size={:.2})", r.room_size),
        }
    }
}

/// Ordered cascade of effects. Empty is the identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectChain {
    pub effects: Vec<Effect>,
}

impl EffectChain {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn kinds(&self) -> Vec<EffectKind> {
        self.effects.iter().map(|e| e.kind()).collect()
    }

    pub fn describe(&self) -> String {
        if self.effects.is_empty() {
            return "(dry)".to_string();
        }
        self.effects
            .iter()
            .map(|e| e.label())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One row of an effect table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub kind: EffectKind,
    pub probability: f64,
    pub ranges: BTreeMap<String, [f64; 2]>,
}

impl EffectSpec {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(GenerationError::InvalidConfig(format!(
                "{} probability {} is outside [0, 1]",
                self.kind, self.probability
            )));
        }
        for (name, [min, max]) in &self.ranges {
            if !self.kind.parameter_names().contains(&name.as_str()) {
                return Err(GenerationError::InvalidConfig(format!(
                    "{} has no parameter '{name}'",
                    self.kind
                )));
            }
            if !(min.is_finite() && max.is_finite()) || min > max {
                return Err(GenerationError::InvalidConfig(format!(
                    "{} parameter '{name}' has an invalid range [{min}, {max}]",
                    self.kind
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawEffectSpec {
    probability: f64,
    #[serde(default)]
    value_range: BTreeMap<String, [f64; 2]>,
}

/// Ordered effect specs for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectTable {
    pub specs: Vec<EffectSpec>,
}

impl EffectTable {
    /// Validate specs and put them in canonical kind order.
    pub fn new(mut specs: Vec<EffectSpec>) -> Result<Self> {
        for spec in &specs {
            spec.validate()?;
        }
        specs.sort_by_key(|s| s.kind);
        for pair in specs.windows(2) {
            if pair[0].kind == pair[1].kind {
                return Err(GenerationError::InvalidConfig(format!(
                    "effect '{}' listed twice",
                    pair[0].kind
                )));
            }
        }
        Ok(EffectTable { specs })
    }

    /// Parse the `{ "<kind>": { "probability", "value_range" } }` shape.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawEffectSpec> = serde_json::from_str(json)
            .map_err(|e| GenerationError::InvalidConfig(format!("effect table: {e}")))?;
        let specs = raw
            .into_iter()
            .map(|(name, spec)| {
                let kind = EffectKind::from_table_name(&name).ok_or_else(|| {
                    GenerationError::InvalidConfig(format!("unknown effect kind '{name}'"))
                })?;
                Ok(EffectSpec {
                    kind,
                    probability: spec.probability,
                    ranges: spec.value_range,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        EffectTable::new(specs)
    }
}

/// Effect table per layer. Layers without a table stay dry.
pub type LayerEffectTables = BTreeMap<Layer, EffectTable>;

/// Whether chains are drawn once per run or once per part label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectScope {
    PerRun,
    PerPart,
}

/// Draw a concrete chain from a table.
pub fn randomize_chain(table: &EffectTable, rng: &mut SongRng) -> EffectChain {
    let mut effects = Vec::new();
    for spec in &table.specs {
        if !rng.random_bool(spec.probability) {
            continue;
        }
        let mut effect = spec.kind.default_effect();
        for (name, [min, max]) in &spec.ranges {
            let value = rng.uniform_f64(*min, *max);
            effect.set_parameter(name, value);
        }
        effects.push(effect);
    }
    EffectChain { effects }
}
