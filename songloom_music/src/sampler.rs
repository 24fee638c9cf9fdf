// Randomized song-level parameters: key, tempo, meter, measures, form.
//
// Every categorical draw goes through `WeightedBuckets`, an ordered table of
// (cumulative probability, value) pairs. A uniform draw selects the first
// bucket whose cumulative probability exceeds it. Tables authored with a
// last cumulative value below 1.0 would otherwise leave a gap; draws that
// land in it resolve to the last bucket.
//
// Default tables reflect streaming-popularity statistics for keys and
// tempos. Configuration may replace any table (tables.rs) or pin any field
// outright (config.rs), in which case that draw is skipped entirely.

use crate::error::{GenerationError, Result};
use crate::structure::{default_arrangements, ArrangementPlan, PartLabel};
use crate::theory::{Key, TimeSignature};
use serde::{Deserialize, Serialize};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use tracing::debug;

/// Ordered (cumulative probability, value) table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, T)>", into = "Vec<(f64, T)>")]
#[serde(bound(
    serialize = "T: Clone + Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct WeightedBuckets<T> {
    buckets: Vec<(f64, T)>,
}

impl<T> WeightedBuckets<T> {
    pub fn new(buckets: Vec<(f64, T)>) -> Result<Self> {
        if buckets.is_empty() {
            return Err(GenerationError::InvalidConfig(
                "weighted bucket table is empty".into(),
            ));
        }
        let mut previous = 0.0;
        for (cumulative, _) in &buckets {
            if !cumulative.is_finite() || *cumulative < previous {
                return Err(GenerationError::InvalidConfig(format!(
                    "cumulative probabilities must be non-decreasing, got {cumulative} after {previous}"
                )));
            }
            previous = *cumulative;
        }
        Ok(WeightedBuckets { buckets })
    }

    /// Select the bucket for a uniform value in [0, 1).
    pub fn select(&self, u: f64) -> &T {
        let hit = self.buckets.iter().find(|(cumulative, _)| u < *cumulative);
        match hit {
            Some((_, value)) => value,
            None => {
                // Last-bucket fallback for tables that stop short of 1.0.
                let (_, last) = &self.buckets[self.buckets.len() - 1];
                last
            }
        }
    }

    pub fn pick(&self, rng: &mut SongRng) -> &T {
        self.select(rng.next_f64())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.buckets.iter().map(|(_, v)| v)
    }
}

impl<T> TryFrom<Vec<(f64, T)>> for WeightedBuckets<T> {
    type Error = GenerationError;

    fn try_from(value: Vec<(f64, T)>) -> Result<Self> {
        WeightedBuckets::new(value)
    }
}

impl<T> From<WeightedBuckets<T>> for Vec<(f64, T)> {
    fn from(table: WeightedBuckets<T>) -> Self {
        table.buckets
    }
}

/// Inclusive BPM range inside a tempo bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoRange {
    pub min: u32,
    pub max: u32,
}

/// Per-label measure-count choices. Repeated entries act as weights.
pub type MeasureChoices = BTreeMap<PartLabel, Vec<u32>>;

/// All sampling tables consulted for one run.
#[derive(Debug, Clone)]
pub struct SamplerTables {
    pub keys: WeightedBuckets<Key>,
    pub tempos: WeightedBuckets<TempoRange>,
    pub time_signatures: WeightedBuckets<TimeSignature>,
    pub measures: MeasureChoices,
    pub arrangements: Vec<ArrangementPlan>,
}

impl Default for SamplerTables {
    fn default() -> Self {
        SamplerTables {
            keys: default_key_table(),
            tempos: default_tempo_table(),
            time_signatures: default_time_signature_table(),
            measures: default_measure_choices(),
            arrangements: default_arrangements(),
        }
    }
}

/// Fixed values that replace individual draws.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterOverrides {
    pub key: Option<Key>,
    pub tempo: Option<u32>,
    pub time_signature: Option<TimeSignature>,
    pub measures: BTreeMap<PartLabel, u32>,
    pub arrangement: Option<Vec<PartLabel>>,
}

/// The song-level decisions made before any part is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongParameters {
    pub key: Key,
    pub tempo: u32,
    pub time_signature: TimeSignature,
    pub measures: BTreeMap<PartLabel, u32>,
    pub arrangement: ArrangementPlan,
}

pub fn sample_key(table: &WeightedBuckets<Key>, rng: &mut SongRng) -> Key {
    *table.pick(rng)
}

pub fn sample_tempo(table: &WeightedBuckets<TempoRange>, rng: &mut SongRng) -> u32 {
    let range = table.pick(rng);
    let (low, high) = (range.min.min(range.max), range.min.max(range.max));
    rng.range_u32_inclusive(low, high)
}

pub fn sample_time_signature(
    table: &WeightedBuckets<TimeSignature>,
    rng: &mut SongRng,
) -> TimeSignature {
    *table.pick(rng)
}

/// One independent draw per label, in canonical label order.
pub fn sample_measures(
    choices: &MeasureChoices,
    labels: &[PartLabel],
    rng: &mut SongRng,
) -> Result<BTreeMap<PartLabel, u32>> {
    let mut ordered: Vec<&PartLabel> = labels.iter().collect();
    ordered.sort();
    ordered.dedup();

    let mut measures = BTreeMap::new();
    for label in ordered {
        let options = choices
            .get(label)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidConfig(format!("no measure choices for part '{label}'"))
            })?;
        let count = *rng.choose(options).unwrap_or(&options[0]);
        measures.insert(label.clone(), count);
    }
    Ok(measures)
}

pub fn sample_arrangement<'a>(
    catalog: &'a [ArrangementPlan],
    rng: &mut SongRng,
) -> Result<&'a ArrangementPlan> {
    rng.choose(catalog)
        .ok_or_else(|| GenerationError::InvalidConfig("arrangement catalog is empty".into()))
}

impl SongParameters {
    /// Draw every song-level parameter not pinned by `overrides`.
    ///
    /// Draw order is fixed: key, tempo, time signature, arrangement,
    /// measures. Pinned fields consume no randomness.
    pub fn sample(
        tables: &SamplerTables,
        overrides: &ParameterOverrides,
        rng: &mut SongRng,
    ) -> Result<Self> {
        let key = match overrides.key {
            Some(k) => k,
            None => sample_key(&tables.keys, rng),
        };
        let tempo = match overrides.tempo {
            Some(t) => t,
            None => sample_tempo(&tables.tempos, rng),
        };
        if tempo == 0 {
            return Err(GenerationError::Degenerate("tempo must be positive".into()));
        }
        let time_signature = match overrides.time_signature {
            Some(ts) => ts,
            None => sample_time_signature(&tables.time_signatures, rng),
        };
        let arrangement = match &overrides.arrangement {
            Some(entries) => ArrangementPlan::new(entries.clone()),
            None => sample_arrangement(&tables.arrangements, rng)?.clone(),
        };
        if arrangement.is_empty() {
            return Err(GenerationError::InvalidConfig("arrangement is empty".into()));
        }
        arrangement.validate()?;

        let unpinned: Vec<PartLabel> = arrangement
            .unique_labels()
            .into_iter()
            .filter(|l| !overrides.measures.contains_key(l))
            .collect();
        let mut measures = sample_measures(&tables.measures, &unpinned, rng)?;
        for label in arrangement.unique_labels() {
            if let Some(&fixed) = overrides.measures.get(&label) {
                measures.insert(label, fixed);
            }
        }
        if let Some((label, _)) = measures.iter().find(|(_, m)| **m == 0) {
            return Err(GenerationError::Degenerate(format!(
                "part '{label}' has zero measures"
            )));
        }

        debug!(%key, tempo, %time_signature, parts = measures.len(), "sampled song parameters");
        Ok(SongParameters {
            key,
            tempo,
            time_signature,
            measures,
            arrangement,
        })
    }
}

// ---------------------------------------------------------------------------
// Default tables
// ---------------------------------------------------------------------------

pub fn default_key_table() -> WeightedBuckets<Key> {
    use crate::theory::KeyMode::{Major, Minor};
    let rows: [(f64, u8, _); 24] = [
        (0.107, 7, Major),  // G
        (0.209, 0, Major),  // C
        (0.296, 2, Major),  // D
        (0.357, 9, Major),  // A
        (0.417, 1, Major),  // C#
        (0.47, 5, Major),   // F
        (0.518, 9, Minor),  // Am
        (0.561, 8, Major),  // G#
        (0.603, 4, Minor),  // Em
        (0.645, 11, Minor), // Bm
        (0.681, 4, Major),  // E
        (0.716, 10, Major), // A#
        (0.748, 10, Minor), // A#m
        (0.778, 5, Minor),  // Fm
        (0.805, 6, Major),  // F#
        (0.831, 11, Major), // B
        (0.857, 7, Minor),  // Gm
        (0.883, 2, Minor),  // Dm
        (0.908, 6, Minor),  // F#m
        (0.932, 3, Major),  // D#
        (0.956, 0, Minor),  // Cm
        (0.977, 1, Minor),  // C#m
        (0.989, 8, Minor),  // G#m
        (1.0, 3, Minor),    // D#m
    ];
    WeightedBuckets {
        buckets: rows
            .into_iter()
            .map(|(p, tonic, mode)| (p, Key::new(tonic, mode)))
            .collect(),
    }
}

pub fn default_tempo_table() -> WeightedBuckets<TempoRange> {
    let rows = [
        (0.0183, 60, 70),
        (0.0454, 70, 80),
        (0.1849, 80, 90),
        (0.3721, 90, 100),
        (0.4817, 100, 110),
        (0.5747, 110, 120),
        (0.7048, 120, 130),
        (0.7917, 130, 140),
        (0.8958, 140, 150),
        (0.9739, 150, 160),
        (1.0, 160, 170),
    ];
    WeightedBuckets {
        buckets: rows
            .into_iter()
            .map(|(p, min, max)| (p, TempoRange { min, max }))
            .collect(),
    }
}

pub fn default_time_signature_table() -> WeightedBuckets<TimeSignature> {
    WeightedBuckets {
        buckets: vec![
            (0.6, TimeSignature::new(4, 4)),
            (0.75, TimeSignature::new(3, 4)),
            (0.9, TimeSignature::new(2, 4)),
            (1.0, TimeSignature::new(6, 8)),
        ],
    }
}

pub fn default_measure_choices() -> MeasureChoices {
    BTreeMap::from([
        (PartLabel::Intro, vec![8, 16, 32]),
        (PartLabel::Verse, vec![16, 32, 32, 64]),
        (PartLabel::Chorus, vec![16, 32]),
        (PartLabel::Bridge, vec![8, 16, 16, 32]),
        (PartLabel::Outro, vec![8, 16, 32]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_first_exceeding_bucket() {
        let table = WeightedBuckets::new(vec![(0.5, 'a'), (0.8, 'b'), (1.0, 'c')]).unwrap();
        assert_eq!(*table.select(0.0), 'a');
        assert_eq!(*table.select(0.49), 'a');
        assert_eq!(*table.select(0.5), 'b');
        assert_eq!(*table.select(0.99), 'c');
    }

    #[test]
    fn test_short_table_falls_back_to_last_bucket() {
        let table = WeightedBuckets::new(vec![(0.3, 1u32), (0.6, 2)]).unwrap();
        assert_eq!(*table.select(0.7), 2);
        assert_eq!(*table.select(0.999_999), 2);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(WeightedBuckets::<u8>::new(vec![]).is_err());
        assert!(WeightedBuckets::new(vec![(0.6, 1), (0.4, 2)]).is_err());
        assert!(WeightedBuckets::new(vec![(f64::NAN, 1)]).is_err());
    }

    #[test]
    fn test_default_tables_cover_all_keys() {
        let keys: Vec<Key> = default_key_table().values().copied().collect();
        assert_eq!(keys.len(), 24);
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j], "duplicate key in default table");
            }
        }
        assert_eq!(default_key_table().select(0.0).to_string(), "G");
        assert_eq!(default_key_table().select(0.9999).to_string(), "D#m");
    }

    #[test]
    fn test_tempo_within_bucket_range() {
        let table = default_tempo_table();
        let mut rng = SongRng::new(11);
        for _ in 0..2000 {
            let tempo = sample_tempo(&table, &mut rng);
            assert!((60..=170).contains(&tempo), "tempo out of range: {tempo}");
        }
    }

    #[test]
    fn test_measures_drawn_per_label() {
        let choices = default_measure_choices();
        let labels = vec![PartLabel::Chorus, PartLabel::Intro, PartLabel::Chorus];
        let mut rng = SongRng::new(3);
        let measures = sample_measures(&choices, &labels, &mut rng).unwrap();
        assert_eq!(measures.len(), 2);
        assert!([8, 16, 32].contains(&measures[&PartLabel::Intro]));
        assert!([16, 32].contains(&measures[&PartLabel::Chorus]));
    }

    #[test]
    fn test_measures_missing_label_is_error() {
        let choices = default_measure_choices();
        let mut rng = SongRng::new(3);
        let labels = vec![PartLabel::Custom("solo".into())];
        assert!(sample_measures(&choices, &labels, &mut rng).is_err());
    }

    #[test]
    fn test_sample_is_deterministic() {
        let tables = SamplerTables::default();
        let overrides = ParameterOverrides::default();
        let a = SongParameters::sample(&tables, &overrides, &mut SongRng::new(99)).unwrap();
        let b = SongParameters::sample(&tables, &overrides, &mut SongRng::new(99)).unwrap();
        assert_eq!(a, b);
        for label in a.arrangement.unique_labels() {
            assert!(a.measures.contains_key(&label));
        }
    }

    #[test]
    fn test_overrides_pin_fields() {
        let tables = SamplerTables::default();
        let overrides = ParameterOverrides {
            key: Some("Am".parse().unwrap()),
            tempo: Some(128),
            time_signature: Some(TimeSignature::common()),
            measures: BTreeMap::from([(PartLabel::Verse, 4)]),
            arrangement: Some(vec![PartLabel::Verse, PartLabel::Chorus]),
        };
        let params = SongParameters::sample(&tables, &overrides, &mut SongRng::new(1)).unwrap();
        assert_eq!(params.key.to_string(), "Am");
        assert_eq!(params.tempo, 128);
        assert_eq!(params.measures[&PartLabel::Verse], 4);
        assert!(params.measures.contains_key(&PartLabel::Chorus));
        assert_eq!(params.arrangement.len(), 2);
    }

    #[test]
    fn test_zero_tempo_rejected() {
        let overrides = ParameterOverrides {
            tempo: Some(0),
            ..Default::default()
        };
        let result =
            SongParameters::sample(&SamplerTables::default(), &overrides, &mut SongRng::new(1));
        assert!(matches!(result, Err(GenerationError::Degenerate(_))));
    }

    #[test]
    fn test_catalog_arrangement_with_end_label_rejected() {
        let tables = SamplerTables {
            arrangements: vec![ArrangementPlan::from_names(&["verse", "end"])],
            ..Default::default()
        };
        let result =
            SongParameters::sample(&tables, &ParameterOverrides::default(), &mut SongRng::new(1));
        assert!(matches!(result, Err(GenerationError::InvalidConfig(_))));
    }

    #[test]
    fn test_buckets_json_shape() {
        let table: WeightedBuckets<String> =
            serde_json::from_str(r#"[[0.5, "4/4"], [1.0, "3/4"]]"#).unwrap();
        assert_eq!(table.select(0.7), "3/4");
        assert!(serde_json::from_str::<WeightedBuckets<String>>("[]").is_err());
    }
}
