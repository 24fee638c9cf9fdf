// Song form: part labels, arrangements and the section timeline.
//
// A song is a sequence of labeled parts (intro, verse, chorus, ...). Each
// unique label gets its own generated material and measure count; the
// arrangement lists the labels in playback order and may repeat them.
//
// The timeline records when each section starts in the finished audio. It is
// a pure function of the arrangement and the rendered section durations, so
// it can be checked without rendering anything.
//
// Labels order canonically (intro, verse, chorus, bridge, outro, then custom
// labels alphabetically). Every per-label random draw walks labels in this
// order so seeded runs stay reproducible.

use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structural section name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartLabel {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Outro,
    Custom(String),
}

impl PartLabel {
    pub const STANDARD: [PartLabel; 5] = [
        PartLabel::Intro,
        PartLabel::Verse,
        PartLabel::Chorus,
        PartLabel::Bridge,
        PartLabel::Outro,
    ];

    pub fn parse(name: &str) -> PartLabel {
        match name.trim() {
            "intro" => PartLabel::Intro,
            "verse" => PartLabel::Verse,
            "chorus" => PartLabel::Chorus,
            "bridge" => PartLabel::Bridge,
            "outro" => PartLabel::Outro,
            other => PartLabel::Custom(other.to_string()),
        }
    }

    /// Rejects empty labels, path separators and the `end` marker.
    pub fn validate(&self) -> Result<()> {
        let name = self.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name == END_MARKER {
            return Err(GenerationError::InvalidConfig(format!(
                "invalid part label '{name}'"
            )));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        match self {
            PartLabel::Intro => "intro",
            PartLabel::Verse => "verse",
            PartLabel::Chorus => "chorus",
            PartLabel::Bridge => "bridge",
            PartLabel::Outro => "outro",
            PartLabel::Custom(name) => name,
        }
    }
}

impl fmt::Display for PartLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PartLabel {
    fn from(value: String) -> Self {
        PartLabel::parse(&value)
    }
}

impl From<PartLabel> for String {
    fn from(label: PartLabel) -> Self {
        label.as_str().to_string()
    }
}

/// Playback order of part labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrangementPlan {
    pub entries: Vec<PartLabel>,
}

impl ArrangementPlan {
    pub fn new(entries: Vec<PartLabel>) -> Self {
        ArrangementPlan { entries }
    }

    pub fn from_names(names: &[&str]) -> Self {
        ArrangementPlan::new(names.iter().map(|n| PartLabel::parse(n)).collect())
    }

    /// Unique labels in order of first appearance.
    pub fn unique_labels(&self) -> Vec<PartLabel> {
        let mut seen = Vec::new();
        for label in &self.entries {
            if !seen.contains(label) {
                seen.push(label.clone());
            }
        }
        seen
    }

    /// Every label must pass [`PartLabel::validate`].
    pub fn validate(&self) -> Result<()> {
        self.entries.iter().try_for_each(PartLabel::validate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The 23 common pop-song forms used when no catalog is configured.
pub fn default_arrangements() -> Vec<ArrangementPlan> {
    const FORMS: [&[&str]; 23] = [
        &["intro", "verse", "chorus", "verse", "chorus", "bridge", "chorus", "outro"],
        &["verse", "chorus", "verse", "chorus", "bridge", "chorus"],
        &["chorus", "verse", "chorus", "bridge", "verse", "chorus"],
        &["intro", "verse", "chorus", "verse", "chorus", "outro"],
        &["verse", "chorus", "verse", "chorus", "bridge", "chorus", "outro"],
        &["intro", "verse", "chorus", "verse", "chorus", "bridge", "outro"],
        &["intro", "verse", "chorus", "bridge", "verse", "chorus"],
        &["intro", "verse", "chorus", "verse", "bridge", "chorus"],
        &["intro", "verse", "chorus", "bridge", "chorus"],
        &["intro", "verse", "chorus", "outro"],
        &["verse", "chorus", "outro"],
        &["chorus", "verse", "chorus", "outro"],
        &["intro", "verse", "chorus", "outro"],
        &["verse", "chorus", "outro"],
        &["chorus", "verse", "chorus", "outro"],
        &["intro", "verse", "chorus", "bridge", "chorus", "outro"],
        &["verse", "chorus", "bridge", "chorus", "outro"],
        &["chorus", "verse", "chorus", "bridge", "verse", "chorus", "outro"],
        &["intro", "verse", "chorus", "bridge", "verse", "chorus", "outro"],
        &["intro", "verse", "chorus", "bridge", "chorus", "outro"],
        &["intro", "verse", "chorus", "bridge", "chorus"],
        &["intro", "verse", "bridge", "chorus", "verse", "chorus", "outro"],
        &["intro", "verse", "chorus", "verse", "bridge", "chorus", "outro"],
    ];
    FORMS.iter().map(|f| ArrangementPlan::from_names(f)).collect()
}

/// Section start marker. The final entry of a timeline uses the label
/// `end` and records the total song duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub label: String,
    pub start_seconds: f64,
}

pub const END_MARKER: &str = "end";

/// Ordered section start times plus the trailing `end` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    pub transitions: Vec<Transition>,
}

impl Timeline {
    /// Build from (label, section duration) pairs in playback order.
    pub fn from_sections<'a>(sections: impl IntoIterator<Item = (&'a PartLabel, f64)>) -> Self {
        let mut transitions = Vec::new();
        let mut elapsed = 0.0;
        for (label, duration) in sections {
            transitions.push(Transition {
                label: label.to_string(),
                start_seconds: elapsed,
            });
            elapsed += duration;
        }
        transitions.push(Transition {
            label: END_MARKER.to_string(),
            start_seconds: elapsed,
        });
        Timeline { transitions }
    }

    /// Total duration, read from the `end` sentinel.
    pub fn total_seconds(&self) -> f64 {
        self.transitions.last().map_or(0.0, |t| t.start_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_and_display() {
        for label in PartLabel::STANDARD {
            assert_eq!(PartLabel::parse(label.as_str()), label);
        }
        let custom = PartLabel::parse("prechorus");
        assert_eq!(custom, PartLabel::Custom("prechorus".into()));
        assert_eq!(custom.to_string(), "prechorus");
    }

    #[test]
    fn test_canonical_order() {
        let mut labels = vec![
            PartLabel::Custom("b".into()),
            PartLabel::Outro,
            PartLabel::Custom("a".into()),
            PartLabel::Intro,
            PartLabel::Chorus,
        ];
        labels.sort();
        assert_eq!(
            labels,
            vec![
                PartLabel::Intro,
                PartLabel::Chorus,
                PartLabel::Outro,
                PartLabel::Custom("a".into()),
                PartLabel::Custom("b".into()),
            ]
        );
    }

    #[test]
    fn test_unique_labels_first_appearance() {
        let plan = ArrangementPlan::from_names(&["chorus", "verse", "chorus", "bridge", "verse"]);
        assert_eq!(
            plan.unique_labels(),
            vec![PartLabel::Chorus, PartLabel::Verse, PartLabel::Bridge]
        );
    }

    #[test]
    fn test_default_catalog() {
        let catalog = default_arrangements();
        assert_eq!(catalog.len(), 23);
        assert!(catalog.iter().all(|p| !p.is_empty()));
        assert!(catalog.iter().all(|p| p.entries.contains(&PartLabel::Chorus)));
    }

    #[test]
    fn test_timeline_from_sections() {
        let intro = PartLabel::Intro;
        let verse = PartLabel::Verse;
        let chorus = PartLabel::Chorus;
        let timeline = Timeline::from_sections([(&intro, 2.0), (&verse, 4.0), (&chorus, 3.0)]);
        let got: Vec<(&str, f64)> = timeline
            .transitions
            .iter()
            .map(|t| (t.label.as_str(), t.start_seconds))
            .collect();
        assert_eq!(
            got,
            vec![("intro", 0.0), ("verse", 2.0), ("chorus", 6.0), ("end", 9.0)]
        );
        assert_eq!(timeline.total_seconds(), 9.0);
    }

    #[test]
    fn test_empty_timeline_has_only_sentinel() {
        let timeline = Timeline::from_sections(std::iter::empty::<(&PartLabel, f64)>());
        assert_eq!(timeline.transitions.len(), 1);
        assert_eq!(timeline.total_seconds(), 0.0);
    }

    #[test]
    fn test_label_serde_as_string() {
        let json = serde_json::to_string(&PartLabel::Bridge).unwrap();
        assert_eq!(json, "\"bridge\"");
        let back: PartLabel = serde_json::from_str("\"tag\"").unwrap();
        assert_eq!(back, PartLabel::Custom("tag".into()));
    }

    #[test]
    fn test_label_validation() {
        for ok in ["verse", "prechorus", "ending", "outro 2"] {
            assert!(PartLabel::parse(ok).validate().is_ok(), "{ok} should be accepted");
        }
        for bad in ["end", " end ", "", "   ", "a/b", "../../escaped", "a\\b"] {
            assert!(
                matches!(PartLabel::parse(bad).validate(), Err(GenerationError::InvalidConfig(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_arrangement_validation() {
        assert!(ArrangementPlan::from_names(&["intro", "verse", "outro"]).validate().is_ok());
        assert!(ArrangementPlan::from_names(&["verse", "end"]).validate().is_err());
        assert!(default_arrangements().iter().all(|plan| plan.validate().is_ok()));
    }
}
