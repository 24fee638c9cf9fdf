// Songloom: a procedural song generator.
//
// Builds multi-layer songs (chords, melody, bassline, drums) from a handful
// of randomized high-level parameters, renders each layer to audio, applies
// randomized effects, mixes the layers into sections and joins the sections
// into a finished track with a JSON annotation of every decision made.
//
// Architecture:
// - theory.rs: Keys, time signatures, roman-numeral chord resolution
// - voice.rs: Note events, voices and the four mix layers
// - structure.rs: Part labels, arrangement catalog, section timeline
// - sampler.rs: Weighted bucket tables and song-level parameter sampling
// - chords.rs: Per-part chord progressions and the harmony voice
// - markov.rs: Pitch universes, transition matrices, constrained walks
// - beat.rs: Drum pattern selection with end-of-part fills
// - scoring.rs: Symbolic randomness rating per part
// - compose.rs: Per-part generation, parallel across labels
// - effects.rs: Effect kinds, tables and randomized chains
// - dsp.rs: Built-in processor for effect chains
// - audio.rs: Stereo segments, overlay / level / concat, WAV I/O
// - midi.rs: SMF export of voices
// - render.rs: Renderer, effect processor and scorer traits + implementations
// - mixer.rs: Mix planning (instruments, chains, levels, inclusion) and mixing
// - annotation.rs: The per-run JSON record
// - tables.rs: Declarative table formats and loaders
// - config.rs: TOML run configuration and variation flags
// - pipeline.rs: `run`, the end-to-end entry point
// - error.rs: Error taxonomy
//
// Every random decision comes from a seeded `songloom_prng::SongRng`, so a
// run is reproducible from its seed and configuration.

pub mod annotation;
pub mod audio;
pub mod beat;
pub mod chords;
pub mod compose;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod markov;
pub mod midi;
pub mod mixer;
pub mod pipeline;
pub mod render;
pub mod sampler;
pub mod scoring;
pub mod structure;
pub mod tables;
pub mod theory;
pub mod voice;
