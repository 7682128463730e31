use crate::engine::Chord;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("a chord needs at least 2 keys, got {0}")]
    TooFewKeys(usize),
    #[error("output text cannot be empty")]
    EmptyOutput,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not serialize {path}: {message}")]
    Serialize { path: PathBuf, message: String },
    #[error("could not parse {path}: {message}")]
    Deserialize { path: PathBuf, message: String },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("chord already exists: {} -> {}", .0.input_keys, .0.output_text)]
    Conflict(Box<Chord>),
    #[error("failed to save chords: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<Chord> for CatalogError {
    fn from(existing: Chord) -> Self {
        CatalogError::Conflict(Box::new(existing))
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("could not read engine config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("engine config {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not write engine config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unexpected engine config layout: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("keyboard monitoring is not permitted for this process")]
    PermissionDenied,
    #[error("keyboard listener stopped unexpectedly")]
    ListenerLost,
    #[error("keyboard listener failed: {0}")]
    Listener(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no home directory to keep configuration in")]
    NoHome,
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
