// Error taxonomy for song generation.
//
// `GenerationError` is what `pipeline::run` surfaces to callers. Collaborator
// failures (rendering, effects, scoring) are reported by the collaborators as
// `RenderError` and wrapped with the stage, part and layer that failed.
//
// Two failure classes never reach this type because they are recovered where
// they occur: a part with no registered chord/beat pattern falls back to the
// built-in default (chords.rs, beat.rs), and a Markov state with no legal
// successor is rerouted to a uniform row (markov.rs).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level failure of a generation run. A run that returns one of these
/// leaves no audio artifact and no annotation behind.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to read {path}: {source}")]
    ConfigurationMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("{stage} failed for part '{part}' layer '{layer}': {source}")]
    Rendering {
        stage: &'static str,
        part: String,
        layer: String,
        #[source]
        source: RenderError,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by an external collaborator (synthesis, effects,
/// compositing, scoring).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("instrument asset not found: {0}")]
    MissingAsset(PathBuf),

    #[error("external command '{command}' failed: {message}")]
    Command { command: String, message: String },

    #[error("audio format mismatch: {0}")]
    Format(String),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("midi encoding error: {0}")]
    Midi(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = GenerationError> = std::result::Result<T, E>;
