// End-to-end generation run.
//
// `run` goes through the stages in order:
//   1. load tables, seed the master stream
//   2. sample song parameters
//   3. compose every part label (parallel, forked streams)
//   4. plan the mix (instruments, effect chains, levels, inclusion)
//   5. render and mix
//   6. write audio, score it, write the annotation, optionally export MIDI
//
// Nothing touches the output directory before stage 6. Files written in
// stage 6 are tracked and removed again if any later step fails, so a failed
// run leaves no artifacts. The audio is written under a `.partial` name and
// only gets its final name once the annotation is on disk.

use crate::annotation::{RunAnnotation, RunTiming};
use crate::compose::{ComposedPart, PatternTables, compose_parts};
use crate::config::{GeneratorConfig, RendererKind};
use crate::dsp::ChainProcessor;
use crate::error::{GenerationError, Result};
use crate::midi::write_voice_midi;
use crate::mixer::{Mixer, plan_mix};
use crate::render::{CommandScorer, EffectProcessor, FluidSynthRenderer, MusicalityScorer, Renderer, ToneRenderer};
use crate::sampler::SongParameters;
use crate::structure::PartLabel;
use crate::tables::TableSet;
use crate::voice::Layer;
use chrono::{Local, Utc};
use songloom_prng::SongRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// The external collaborators a run renders, processes and scores with.
pub struct Collaborators {
    pub renderer: Box<dyn Renderer>,
    pub processor: Box<dyn EffectProcessor>,
    pub scorer: Option<Box<dyn MusicalityScorer>>,
}

impl Collaborators {
    /// The collaborators named by a configuration.
    pub fn from_config(config: &GeneratorConfig) -> Self {
        let renderer: Box<dyn Renderer> = match config.renderer {
            RendererKind::Tone => Box::new(ToneRenderer::default()),
            RendererKind::Fluidsynth => Box::new(FluidSynthRenderer {
                program: config.fluidsynth_program.clone(),
                ..Default::default()
            }),
        };
        let scorer = config.scorer.as_ref().map(|s| {
            Box::new(CommandScorer::new(s.program.clone(), s.args.clone())) as Box<dyn MusicalityScorer>
        });
        Collaborators {
            renderer,
            processor: Box::new(ChainProcessor),
            scorer,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub name: String,
    pub seed: u64,
    pub audio_path: PathBuf,
    pub annotation_path: PathBuf,
    pub midi_paths: Vec<PathBuf>,
    pub annotation: RunAnnotation,
}

/// Files written by a run that has not finished yet. Dropping the guard
/// without `commit` removes them, and the run directory if this run
/// created it.
struct PendingFiles {
    dir: PathBuf,
    created_dir: bool,
    files: Vec<PathBuf>,
    committed: bool,
}

impl PendingFiles {
    fn create(dir: &Path) -> Result<Self> {
        let created_dir = !dir.exists();
        std::fs::create_dir_all(dir).map_err(|source| GenerationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(PendingFiles {
            dir: dir.to_path_buf(),
            created_dir,
            files: Vec::new(),
            committed: false,
        })
    }

    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.files.push(path.clone());
        path
    }

    fn rename(&mut self, from: &Path, to: PathBuf) -> Result<PathBuf> {
        std::fs::rename(from, &to).map_err(|source| GenerationError::Io {
            path: to.clone(),
            source,
        })?;
        self.files.retain(|p| p != from);
        Ok(self.track(to))
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.files {
            let _ = std::fs::remove_file(path);
        }
        if self.created_dir {
            let _ = std::fs::remove_dir(&self.dir);
        }
    }
}

fn clock_seed() -> u64 {
    let now = Utc::now();
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    u64::try_from(nanos).unwrap_or_default()
}

fn export_midi(
    pending: &mut PendingFiles,
    dir: &Path,
    name: &str,
    tempo: u32,
    parts: &BTreeMap<PartLabel, ComposedPart>,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for (label, part) in parts {
        for layer in Layer::ALL {
            let path = pending.track(dir.join(format!("{name}-{label}-{layer}.mid")));
            write_voice_midi(part.voice(layer), tempo, &path).map_err(|source| GenerationError::Rendering {
                stage: "midi",
                part: label.to_string(),
                layer: layer.to_string(),
                source,
            })?;
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Generate, mix and persist one song.
pub fn run(config: &GeneratorConfig, collaborators: &Collaborators) -> Result<RunResult> {
    config.validate()?;
    let started_at = Utc::now();
    let clock = Instant::now();

    let seed = config.seed.unwrap_or_else(clock_seed);
    let name = match &config.name {
        Some(n) => n.clone(),
        None => started_at.with_timezone(&Local).format("%Y%m%d%H%M%S").to_string(),
    };
    info!(%name, seed, "starting run");

    let tables = TableSet::load(&config.tables)?;
    let mut rng = SongRng::new(seed);

    let params = SongParameters::sample(&tables.sampler, &config.overrides, &mut rng)?;
    info!(
        key = %params.key,
        tempo = params.tempo,
        time_signature = %params.time_signature,
        sections = params.arrangement.len(),
        "song parameters"
    );

    let pattern_tables = PatternTables {
        chords: &tables.chords,
        beats: &tables.beats,
    };
    let parts = compose_parts(&params, pattern_tables, &config.variation, config.parallel, &mut rng)?;
    info!(parts = parts.len(), "composed parts");

    let plan = plan_mix(
        &params.arrangement,
        &tables,
        &config.instruments,
        &config.variation,
        &mut rng,
    )?;
    let mixer = Mixer {
        renderer: collaborators.renderer.as_ref(),
        processor: collaborators.processor.as_ref(),
        tempo_bpm: params.tempo,
        sample_rate: config.sample_rate,
    };
    let output = mixer.mix(&plan, &parts)?;
    info!(seconds = output.song.duration_seconds(), "mixed song");

    // Persist.
    let dir = config.output_dir.join(&name);
    let mut pending = PendingFiles::create(&dir)?;
    let file_name = format!("{name}.wav");
    let partial = pending.track(dir.join(format!("{name}.partial.wav")));
    output
        .song
        .write_wav(&partial)
        .map_err(|source| GenerationError::Rendering {
            stage: "write",
            part: crate::mixer::RUN_SCOPE.to_string(),
            layer: crate::mixer::RUN_SCOPE.to_string(),
            source,
        })?;

    let musicality_score = match &collaborators.scorer {
        Some(scorer) => match scorer.score(&partial) {
            Ok(score) => Some(score),
            Err(e) => {
                warn!(error = %e, "musicality scoring failed");
                None
            }
        },
        None => None,
    };

    let midi_paths = if config.export_midi {
        export_midi(&mut pending, &dir, &name, params.tempo, &parts)?
    } else {
        Vec::new()
    };

    let mut annotation = RunAnnotation::new(
        &name,
        seed,
        &params,
        &parts,
        &plan,
        output.timeline.transitions.clone(),
        config.variation,
        &file_name,
    );
    annotation.musicality_score = musicality_score;
    annotation.timing = Some(RunTiming {
        started_at,
        elapsed_seconds: clock.elapsed().as_secs_f64(),
    });
    let annotation_path = pending.track(dir.join(format!("{name}.json")));
    annotation.write(&annotation_path)?;

    let audio_path = pending.rename(&partial, dir.join(&file_name))?;
    pending.commit();

    info!(audio = %audio_path.display(), annotation = %annotation_path.display(), "run complete");
    Ok(RunResult {
        name,
        seed,
        audio_path,
        annotation_path,
        midi_paths,
        annotation,
    })
}
