// Mix composition: from composed parts to one stereo song.
//
// Mixing happens in two phases.
//
// `plan_mix` makes every remaining random decision, drawing from the master
// stream in a fixed order:
//   1. one instrument per layer (Layer::ALL order)
//   2. effect chains: one per layer for the run, or one per (label, layer)
//      in first-appearance label order
//   3. levels: one (volume, pan) per (label, layer) when levels are applied
//   4. inclusion: once per label and reused, or once per arrangement entry
//
// `mix` then renders without touching the stream. Each (label, layer) is
// rendered, processed and levelled once and cached; repeated occurrences of a
// label share symbolic material, chain and level, so they share audio too.
// Each section overlays its included layers on silence as long as the beat
// layer's render, and sections are joined end to end.
//
// Any collaborator failure aborts the mix with the stage, part and layer that
// failed.

use crate::audio::AudioSegment;
use crate::compose::ComposedPart;
use crate::config::{InclusionScope, VariationConfig};
use crate::effects::{EffectChain, EffectScope, randomize_chain};
use crate::error::{GenerationError, RenderError, Result};
use crate::render::{EffectProcessor, Instrument, InstrumentSource, RenderRequest, Renderer, choose_instrument};
use crate::structure::{ArrangementPlan, PartLabel, Timeline};
use crate::tables::{MixLevel, TableSet};
use crate::voice::Layer;
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Scope key of chains drawn once for the whole run.
pub const RUN_SCOPE: &str = "all";

/// Layers mixed into one arrangement entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPlan {
    pub label: PartLabel,
    pub layers: Vec<Layer>,
}

/// Every random mixing decision for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MixPlan {
    pub instruments: BTreeMap<Layer, Instrument>,
    /// Scope key (`all`, or a part label) -> layer -> chain.
    pub effect_chains: BTreeMap<String, BTreeMap<Layer, EffectChain>>,
    pub levels: BTreeMap<PartLabel, BTreeMap<Layer, MixLevel>>,
    pub sections: Vec<SectionPlan>,
}

impl MixPlan {
    pub fn chain(&self, label: &PartLabel, layer: Layer) -> Option<&EffectChain> {
        self.effect_chains
            .get(label.as_str())
            .or_else(|| self.effect_chains.get(RUN_SCOPE))
            .and_then(|chains| chains.get(&layer))
    }

    pub fn level(&self, label: &PartLabel, layer: Layer) -> MixLevel {
        self.levels
            .get(label)
            .and_then(|row| row.get(&layer))
            .copied()
            .unwrap_or(MixLevel::UNITY)
    }

    /// Layers mixed into each label across all of its occurrences.
    pub fn part_layers(&self) -> BTreeMap<PartLabel, Vec<Layer>> {
        let mut used: BTreeMap<PartLabel, BTreeSet<Layer>> = BTreeMap::new();
        for section in &self.sections {
            used.entry(section.label.clone())
                .or_default()
                .extend(section.layers.iter().copied());
        }
        used.into_iter()
            .map(|(label, layers)| (label, layers.into_iter().collect()))
            .collect()
    }
}

fn draw_chains(tables: &TableSet, rng: &mut SongRng) -> BTreeMap<Layer, EffectChain> {
    Layer::ALL
        .into_iter()
        .map(|layer| {
            let chain = match tables.effects.get(&layer) {
                Some(table) => randomize_chain(table, rng),
                None => EffectChain::identity(),
            };
            (layer, chain)
        })
        .collect()
}

fn draw_inclusion(tables: &TableSet, label: &PartLabel, rng: &mut SongRng) -> Vec<Layer> {
    Layer::ALL
        .into_iter()
        .filter(|&layer| rng.random_bool(tables.inclusion.probability(label, layer)))
        .collect()
}

/// Draw instruments, chains, levels and inclusion for an arrangement.
pub fn plan_mix(
    arrangement: &ArrangementPlan,
    tables: &TableSet,
    instruments: &BTreeMap<Layer, InstrumentSource>,
    variation: &VariationConfig,
    rng: &mut SongRng,
) -> Result<MixPlan> {
    let labels = arrangement.unique_labels();

    let mut chosen = BTreeMap::new();
    for layer in Layer::ALL {
        let source = instruments.get(&layer).ok_or_else(|| {
            GenerationError::InvalidConfig(format!("no instrument source for layer '{layer}'"))
        })?;
        let instrument = choose_instrument(source, rng).map_err(|source| GenerationError::Rendering {
            stage: "instrument",
            part: RUN_SCOPE.to_string(),
            layer: layer.to_string(),
            source,
        })?;
        debug!(%layer, instrument = %instrument.describe(), "instrument");
        chosen.insert(layer, instrument);
    }

    let mut effect_chains = BTreeMap::new();
    match variation.effect_scope {
        EffectScope::PerRun => {
            effect_chains.insert(RUN_SCOPE.to_string(), draw_chains(tables, rng));
        }
        EffectScope::PerPart => {
            for label in &labels {
                effect_chains.insert(label.to_string(), draw_chains(tables, rng));
            }
        }
    }

    let mut levels = BTreeMap::new();
    if variation.apply_levels {
        for label in &labels {
            let row: BTreeMap<Layer, MixLevel> = Layer::ALL
                .into_iter()
                .map(|layer| (layer, tables.levels.sample(label, layer, rng)))
                .collect();
            levels.insert(label.clone(), row);
        }
    }

    let sections = match variation.inclusion_scope {
        InclusionScope::PerLabel => {
            let mut decided = BTreeMap::new();
            for label in &labels {
                decided.insert(label.clone(), draw_inclusion(tables, label, rng));
            }
            arrangement
                .entries
                .iter()
                .map(|label| SectionPlan {
                    label: label.clone(),
                    layers: decided.get(label).cloned().unwrap_or_default(),
                })
                .collect()
        }
        InclusionScope::PerOccurrence => arrangement
            .entries
            .iter()
            .map(|label| SectionPlan {
                label: label.clone(),
                layers: draw_inclusion(tables, label, rng),
            })
            .collect(),
    };

    Ok(MixPlan {
        instruments: chosen,
        effect_chains,
        levels,
        sections,
    })
}

/// The finished song and where each section starts.
#[derive(Debug, Clone)]
pub struct MixOutput {
    pub song: AudioSegment,
    pub timeline: Timeline,
}

/// Renders and mixes with the injected collaborators.
pub struct Mixer<'a> {
    pub renderer: &'a dyn Renderer,
    pub processor: &'a dyn EffectProcessor,
    pub tempo_bpm: u32,
    pub sample_rate: u32,
}

impl Mixer<'_> {
    fn failed(stage: &'static str, label: &PartLabel, layer: Layer) -> impl FnOnce(RenderError) -> GenerationError {
        let part = label.to_string();
        move |source| GenerationError::Rendering {
            stage,
            part,
            layer: layer.to_string(),
            source,
        }
    }

    /// Render, process and level one layer of one part.
    fn layer_audio(&self, plan: &MixPlan, part: &ComposedPart, layer: Layer) -> Result<AudioSegment> {
        let label = &part.label;
        let request = RenderRequest {
            voice: part.voice(layer),
            tempo_bpm: self.tempo_bpm,
            instrument: &plan.instruments[&layer],
            sample_rate: self.sample_rate,
        };
        let rendered = self
            .renderer
            .render(&request)
            .map_err(Self::failed("render", label, layer))?;

        let processed = match plan.chain(label, layer) {
            Some(chain) if !chain.is_identity() => self
                .processor
                .process(&rendered, chain)
                .map_err(Self::failed("effects", label, layer))?,
            _ => rendered,
        };

        let level = plan.level(label, layer);
        if level == MixLevel::UNITY {
            Ok(processed)
        } else {
            Ok(processed.with_level(level.volume, level.pan))
        }
    }

    pub fn mix(&self, plan: &MixPlan, parts: &BTreeMap<PartLabel, ComposedPart>) -> Result<MixOutput> {
        let mut cache: BTreeMap<(PartLabel, Layer), AudioSegment> = BTreeMap::new();
        let mut sections = Vec::with_capacity(plan.sections.len());

        for (index, section) in plan.sections.iter().enumerate() {
            let label = &section.label;
            let part = parts.get(label).ok_or_else(|| {
                GenerationError::Degenerate(format!("part '{label}' was never composed"))
            })?;
            for layer in Layer::ALL {
                let key = (label.clone(), layer);
                if !cache.contains_key(&key) {
                    let audio = self.layer_audio(plan, part, layer)?;
                    cache.insert(key, audio);
                }
            }

            let beat = &cache[&(label.clone(), Layer::Beat)];
            let mut mixed = AudioSegment::silent(beat.duration_seconds(), self.sample_rate);
            for layer in &section.layers {
                let audio = &cache[&(label.clone(), *layer)];
                mixed = mixed
                    .overlay(audio, 0.0)
                    .map_err(Self::failed("mix", label, *layer))?;
            }
            info!(
                section = index,
                part = %label,
                layers = ?section.layers,
                seconds = mixed.duration_seconds(),
                "mixed section"
            );
            sections.push(mixed);
        }

        let timeline = Timeline::from_sections(
            plan.sections
                .iter()
                .zip(&sections)
                .map(|(s, audio)| (&s.label, audio.duration_seconds())),
        );
        let song = AudioSegment::concat(self.sample_rate, &sections).map_err(|source| {
            GenerationError::Rendering {
                stage: "mix",
                part: RUN_SCOPE.to_string(),
                layer: RUN_SCOPE.to_string(),
                source,
            }
        })?;
        Ok(MixOutput { song, timeline })
    }
}
