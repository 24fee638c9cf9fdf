// Per-part symbolic generation.
//
// For each unique part label the composer builds, in order:
// 1. a chord progression (chords.rs),
// 2. a melody walk over the chord tones (markov.rs, melody policy),
// 3. a bass walk over the chord roots (bass policy), optionally coupled to
//    the melody and moved down to the bass register,
// 4. the harmony voice from the progression,
// 5. the drum track (beat.rs).
//
// Labels are independent, so `compose_parts` generates them on the rayon
// pool. The master stream forks one child per label in canonical label order
// before any work is spawned; each part draws only from its own child, and
// results land in a BTreeMap. The output is therefore identical whether the
// work runs in parallel or sequentially.

use crate::beat::{BeatPatternTable, BeatTrack, generate_beat};
use crate::chords::{ChordPatternTable, ChordProgression, generate_progression};
use crate::config::VariationConfig;
use crate::error::{GenerationError, Result};
use crate::markov::{
    BASS_OCTAVE, PitchUniverse, TransitionSchedule, couple_bass_to_melody, generate_sequence,
    transpose_voice,
};
use crate::sampler::SongParameters;
use crate::scoring::{RandomnessRating, rate_part_randomness};
use crate::structure::PartLabel;
use crate::voice::{Layer, Voice};
use rayon::prelude::*;
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use tracing::debug;

/// Pattern tables consulted during symbolic generation.
#[derive(Debug, Clone, Copy)]
pub struct PatternTables<'a> {
    pub chords: &'a ChordPatternTable,
    pub beats: &'a BeatPatternTable,
}

/// All symbolic material for one part label.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPart {
    pub label: PartLabel,
    pub measures: u32,
    pub progression: ChordProgression,
    pub melody: Voice,
    pub bassline: Voice,
    pub harmony: Voice,
    pub beat: BeatTrack,
    /// Bass notes replaced by the melody pitch during coupling.
    pub bass_replacements: usize,
    pub rating: RandomnessRating,
}

impl ComposedPart {
    pub fn voice(&self, layer: Layer) -> &Voice {
        match layer {
            Layer::Beat => &self.beat.voice,
            Layer::Melody => &self.melody,
            Layer::Harmony => &self.harmony,
            Layer::Bassline => &self.bassline,
        }
    }
}

/// Generate one part from its own random stream.
pub fn compose_part(
    label: &PartLabel,
    measures: u32,
    params: &SongParameters,
    tables: PatternTables<'_>,
    variation: &VariationConfig,
    rng: &mut SongRng,
) -> Result<ComposedPart> {
    let progression = generate_progression(
        tables.chords,
        label,
        &params.key,
        params.time_signature,
        measures,
        rng,
    )?;
    let budget = progression.budget_beats();

    let melody_universe = PitchUniverse::for_melody(&progression, label);
    let melody_schedule = TransitionSchedule::build(variation.melody_policy, &melody_universe, &progression)?;
    let melody = generate_sequence(Layer::Melody, &melody_universe, budget, &melody_schedule, rng)?;

    let bass_universe = PitchUniverse::for_bass(&progression, label);
    let bass_schedule = TransitionSchedule::build(variation.bass_policy, &bass_universe, &progression)?;
    let mut bassline = generate_sequence(Layer::Bassline, &bass_universe, budget, &bass_schedule, rng)?;
    let bass_replacements = if variation.couple_bass {
        couple_bass_to_melody(&mut bassline, &melody, rng)
    } else {
        0
    };
    transpose_voice(&mut bassline, BASS_OCTAVE);

    let harmony = progression.harmony_voice();
    let beat = generate_beat(
        tables.beats,
        label,
        progression.beats_per_measure,
        measures,
        variation.beat_fill,
        rng,
    )?;

    let rating = rate_part_randomness(label, &melody, &progression.chords);
    debug!(
        part = %label,
        measures,
        melody_notes = melody.events.len(),
        bass_notes = bassline.events.len(),
        bass_replacements,
        randomness = rating.randomness,
        "composed part"
    );

    Ok(ComposedPart {
        label: label.clone(),
        measures,
        progression,
        melody,
        bassline,
        harmony,
        beat,
        bass_replacements,
        rating,
    })
}

/// Generate every unique label of the arrangement.
pub fn compose_parts(
    params: &SongParameters,
    tables: PatternTables<'_>,
    variation: &VariationConfig,
    parallel: bool,
    rng: &mut SongRng,
) -> Result<BTreeMap<PartLabel, ComposedPart>> {
    // Fork sequentially, in canonical order, before any parallel work.
    let mut jobs = Vec::with_capacity(params.measures.len());
    for (label, &measures) in &params.measures {
        jobs.push((label, measures, rng.fork()));
    }
    if jobs.is_empty() {
        return Err(GenerationError::Degenerate("arrangement has no parts".into()));
    }

    let run = |(label, measures, mut child): (&PartLabel, u32, SongRng)| {
        compose_part(label, measures, params, tables, variation, &mut child)
    };
    let parts: Vec<ComposedPart> = if parallel {
        jobs.into_par_iter().map(run).collect::<Result<_>>()?
    } else {
        jobs.into_iter().map(run).collect::<Result<_>>()?
    };

    Ok(parts.into_iter().map(|p| (p.label.clone(), p)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{ParameterOverrides, SamplerTables};
    use crate::structure::ArrangementPlan;
    use crate::theory::{Key, TimeSignature};

    fn params() -> SongParameters {
        SongParameters {
            key: Key::major(0),
            tempo: 120,
            time_signature: TimeSignature::common(),
            measures: BTreeMap::from([
                (PartLabel::Intro, 2),
                (PartLabel::Verse, 4),
                (PartLabel::Chorus, 3),
            ]),
            arrangement: ArrangementPlan::from_names(&["intro", "verse", "chorus", "verse"]),
        }
    }

    fn empty_tables() -> (ChordPatternTable, BeatPatternTable) {
        (ChordPatternTable::new(), BeatPatternTable::new())
    }

    #[test]
    fn test_part_layers_fill_budget() {
        let (chords, beats) = empty_tables();
        let tables = PatternTables { chords: &chords, beats: &beats };
        let mut rng = SongRng::new(7);
        let part = compose_part(
            &PartLabel::Verse,
            4,
            &params(),
            tables,
            &VariationConfig::default(),
            &mut rng,
        )
        .unwrap();

        // Scenario A: default pattern, one chord per beat, 16 beats.
        assert_eq!(part.progression.beats_per_chord, 1.0);
        assert_eq!(part.harmony.length_beats, 16.0);
        assert_eq!(part.melody.total_duration(), 16.0);
        assert_eq!(part.bassline.total_duration(), 16.0);
        assert!(part.melody.is_gapless());
        assert!(part.bassline.is_gapless());
        assert_eq!(part.beat.voice.length_beats, 16.0);
        for event in &part.bassline.events {
            assert!((36..48).contains(&event.pitch), "bass pitch {}", event.pitch);
        }
    }

    #[test]
    fn test_uncoupled_bass_stays_on_roots() {
        let (chords, beats) = empty_tables();
        let tables = PatternTables { chords: &chords, beats: &beats };
        let variation = VariationConfig {
            couple_bass: false,
            ..Default::default()
        };
        let mut rng = SongRng::new(3);
        let part = compose_part(&PartLabel::Chorus, 2, &params(), tables, &variation, &mut rng).unwrap();
        assert_eq!(part.bass_replacements, 0);
        // Roots of I IV V vi in C, moved to octave 2.
        let roots = [36, 41, 43, 45];
        assert!(part.bassline.events.iter().all(|e| roots.contains(&e.pitch)));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (chords, beats) = empty_tables();
        let tables = PatternTables { chords: &chords, beats: &beats };
        let variation = VariationConfig::default();
        let p = params();

        let mut a = SongRng::new(99);
        let mut b = SongRng::new(99);
        let parallel = compose_parts(&p, tables, &variation, true, &mut a).unwrap();
        let sequential = compose_parts(&p, tables, &variation, false, &mut b).unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 3);
        // The master stream advanced identically.
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_compose_from_sampled_parameters() {
        let (chords, beats) = empty_tables();
        let tables = PatternTables { chords: &chords, beats: &beats };
        let mut rng = SongRng::new(2024);
        let sampled =
            SongParameters::sample(&SamplerTables::default(), &ParameterOverrides::default(), &mut rng).unwrap();
        let parts = compose_parts(&sampled, tables, &VariationConfig::default(), true, &mut rng).unwrap();
        for label in sampled.arrangement.unique_labels() {
            let part = &parts[&label];
            let budget = (part.measures * sampled.time_signature.beats_per_measure()) as f64;
            assert_eq!(part.melody.total_duration(), budget);
        }
    }
}
