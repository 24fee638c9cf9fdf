// Songloom command line entry point.
//
// Generates one or more songs and writes each to
// `<output_dir>/<name>/<name>.wav` with a `<name>.json` annotation beside it.
// Settings come from an optional TOML config file; flags override it.
//
// Usage:
//   cargo run -p songloom_music --bin generate -- [--config songloom.toml]
//     [--seed N] [--count N] [--output-dir DIR] [--name NAME]
//     [--key Am] [--tempo BPM] [--time-signature 3/4]
//     [--arrangement intro,verse,chorus,outro] [--renderer tone|fluidsynth]
//     [--sample-rate HZ] [--export-midi] [--sequential]
//
// Log verbosity follows RUST_LOG (default `info`).

use anyhow::Context;
use clap::{Parser, ValueEnum};
use songloom_music::config::{GeneratorConfig, RendererKind};
use songloom_music::pipeline::{Collaborators, run};
use songloom_music::structure::PartLabel;
use songloom_music::theory::{Key, TimeSignature};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RendererArg {
    Tone,
    Fluidsynth,
}

/// Procedural song generator
#[derive(Parser, Debug)]
#[command(name = "generate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SONGLOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Master seed. Batches use seed, seed+1, ...
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of songs to generate
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    /// Directory that receives one folder per song
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Song name (default: timestamp)
    #[arg(long)]
    name: Option<String>,

    /// Fixed key, e.g. "G", "Bb", "Am"
    #[arg(long)]
    key: Option<Key>,

    /// Fixed tempo in BPM
    #[arg(long)]
    tempo: Option<u32>,

    /// Fixed time signature, e.g. "3/4"
    #[arg(long)]
    time_signature: Option<TimeSignature>,

    /// Fixed arrangement as comma-separated part labels
    #[arg(long, value_delimiter = ',')]
    arrangement: Option<Vec<String>>,

    #[arg(long, value_enum)]
    renderer: Option<RendererArg>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Also write one MIDI file per part and layer
    #[arg(long)]
    export_midi: bool,

    /// Compose parts on one thread
    #[arg(long)]
    sequential: bool,
}

impl Cli {
    fn apply(&self, config: &mut GeneratorConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(key) = self.key {
            config.overrides.key = Some(key);
        }
        if let Some(tempo) = self.tempo {
            config.overrides.tempo = Some(tempo);
        }
        if let Some(ts) = self.time_signature {
            config.overrides.time_signature = Some(ts);
        }
        if let Some(labels) = &self.arrangement {
            config.overrides.arrangement = Some(labels.iter().map(|l| PartLabel::parse(l)).collect());
        }
        if let Some(renderer) = self.renderer {
            config.renderer = match renderer {
                RendererArg::Tone => RendererKind::Tone,
                RendererArg::Fluidsynth => RendererKind::Fluidsynth,
            };
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if self.export_midi {
            config.export_midi = true;
        }
        if self.sequential {
            config.parallel = false;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    cli.apply(&mut config);
    if cli.count == 0 {
        anyhow::bail!("--count must be at least 1");
    }

    let collaborators = Collaborators::from_config(&config);
    let base_seed = cli.seed.or(config.seed);
    let base_name = cli.name.clone().or_else(|| config.name.clone());

    for index in 0..cli.count {
        let mut song = config.clone();
        song.seed = base_seed.map(|s| s.wrapping_add(index as u64));
        song.name = match (&base_name, cli.count) {
            (Some(name), 1) => Some(name.clone()),
            (Some(name), _) => Some(format!("{name}-{}", index + 1)),
            (None, 1) => None,
            (None, _) => Some(format!(
                "{}-{}",
                chrono::Local::now().format("%Y%m%d%H%M%S"),
                index + 1
            )),
        };

        let result = run(&song, &collaborators).with_context(|| format!("song {} of {}", index + 1, cli.count))?;
        info!(
            name = %result.name,
            seed = result.seed,
            audio = %result.audio_path.display(),
            "wrote song"
        );
        println!("{}", result.audio_path.display());
    }
    Ok(())
}
