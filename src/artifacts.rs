//! Artifact store
//!
//! Resolves each artifact from an ordered list of candidate paths (first
//! existing path wins) and parses it once at startup. A failed load is kept
//! as an unavailable [`Component`] instead of aborting the process.

use crate::forest::{IsolationForest, RandomForest, StandardScaler};
use crate::nn::SequenceModel;
use crate::tokenizer::{EventVocabulary, Tokenizer, VocabularyError};
use crate::{ArtifactError, ServeError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Tokenizer files at or below this size are placeholders, not tokenizers.
pub const MIN_TOKENIZER_BYTES: u64 = 10;

/// A loaded artifact, or the reason it is missing.
#[derive(Debug)]
pub struct Component<T> {
    name: &'static str,
    state: Result<T, String>,
}

impl<T> Component<T> {
    /// A ready component
    pub fn loaded(name: &'static str, value: T) -> Self {
        Self { name, state: Ok(value) }
    }

    /// A component that failed to load
    pub fn unavailable(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            state: Err(reason.into()),
        }
    }

    /// Record the outcome of a load attempt, logging failures.
    pub fn from_load(name: &'static str, result: Result<T, ArtifactError>) -> Self {
        match result {
            Ok(value) => Self::loaded(name, value),
            Err(e) => {
                tracing::warn!(component = name, error = %e, "Component unavailable");
                Self::unavailable(name, e.to_string())
            }
        }
    }

    /// The artifact, or a server error naming it
    pub fn get(&self) -> Result<&T, ServeError> {
        self.state.as_ref().map_err(|_| ServeError::Unavailable(self.name))
    }

    /// True when loaded
    pub fn is_loaded(&self) -> bool {
        self.state.is_ok()
    }

    /// Why loading failed
    pub fn reason(&self) -> Option<&str> {
        self.state.as_ref().err().map(String::as_str)
    }

    /// Component name used in error messages
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// First candidate that exists on disk
pub fn first_existing(candidates: &[PathBuf]) -> Option<&Path> {
    candidates.iter().map(PathBuf::as_path).find(|p| p.exists())
}

fn resolve<'a>(candidates: &'a [PathBuf], what: &'static str) -> Result<&'a Path, ArtifactError> {
    first_existing(candidates).ok_or_else(|| ArtifactError::NotFound {
        what,
        tried: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn read_to_string(path: &Path) -> Result<String, ArtifactError> {
    std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Read and deserialize a JSON artifact
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let raw = read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| ArtifactError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn invalid(path: &Path, reason: impl Into<String>) -> ArtifactError {
    ArtifactError::Invalid {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn vocabulary_error(path: &Path, source: VocabularyError) -> ArtifactError {
    ArtifactError::Vocabulary {
        path: path.display().to_string(),
        source,
    }
}

/// Load a recurrent sequence model
pub fn load_sequence_model(candidates: &[PathBuf]) -> Result<SequenceModel, ArtifactError> {
    let path = resolve(candidates, "sequence model")?;
    let file = read_json(path)?;
    let model = SequenceModel::from_file(file).map_err(|e| invalid(path, e))?;
    tracing::info!(path = %path.display(), vocab = model.vocab_size(), "Loaded sequence model");
    Ok(model)
}

/// Load the text tokenizer: a full Keras tokenizer JSON first, then a bare
/// word index as a fallback.
pub fn load_tokenizer(
    tokenizer_candidates: &[PathBuf],
    word_index_candidates: &[PathBuf],
) -> Result<Tokenizer, ArtifactError> {
    match load_full_tokenizer(tokenizer_candidates) {
        Ok(tokenizer) => return Ok(tokenizer),
        Err(e) => tracing::warn!(error = %e, "Full tokenizer unusable, trying word index"),
    }

    let path = resolve(word_index_candidates, "word index")?;
    check_size(path)?;
    let raw = read_to_string(path)?;
    let tokenizer = Tokenizer::from_word_index(&raw).map_err(|e| vocabulary_error(path, e))?;
    tracing::info!(path = %path.display(), words = tokenizer.len(), "Reconstructed tokenizer from word index");
    Ok(tokenizer)
}

fn load_full_tokenizer(candidates: &[PathBuf]) -> Result<Tokenizer, ArtifactError> {
    let path = resolve(candidates, "tokenizer")?;
    check_size(path)?;
    let raw = read_to_string(path)?;
    let tokenizer = Tokenizer::from_keras_json(&raw).map_err(|e| vocabulary_error(path, e))?;
    tracing::info!(path = %path.display(), words = tokenizer.len(), "Loaded tokenizer");
    Ok(tokenizer)
}

fn check_size(path: &Path) -> Result<(), ArtifactError> {
    let len = std::fs::metadata(path)
        .map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?
        .len();
    if len <= MIN_TOKENIZER_BYTES {
        return Err(invalid(path, format!("only {len} bytes")));
    }
    Ok(())
}

/// Tokenizer together with the sequence length it was saved with
#[derive(Debug)]
pub struct TokenizerBundle {
    /// The tokenizer
    pub tokenizer: Tokenizer,
    /// Saved padding length, when recorded
    pub maxlen: Option<usize>,
}

/// Load a tokenizer saved either bare or as `{"tokenizer": ..., "maxlen": N}`.
pub fn load_tokenizer_bundle(candidates: &[PathBuf]) -> Result<TokenizerBundle, ArtifactError> {
    let path = resolve(candidates, "tokenizer")?;
    let value: Value = read_json(path)?;

    let (tokenizer_value, maxlen) = match value {
        Value::Object(mut map) if map.contains_key("tokenizer") => {
            let maxlen = match map.remove("maxlen") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    serde_json::from_value::<usize>(v)
                        .map_err(|e| invalid(path, format!("maxlen: {e}")))?,
                ),
            };
            (map.remove("tokenizer").unwrap_or(Value::Null), maxlen)
        }
        other => (other, None),
    };

    let tokenizer = Tokenizer::from_keras_value(tokenizer_value).map_err(|e| vocabulary_error(path, e))?;
    tracing::info!(path = %path.display(), words = tokenizer.len(), maxlen = ?maxlen, "Loaded tokenizer bundle");
    Ok(TokenizerBundle { tokenizer, maxlen })
}

/// Load the behaviour label-encoder classes
pub fn load_event_vocabulary(candidates: &[PathBuf]) -> Result<EventVocabulary, ArtifactError> {
    let path = resolve(candidates, "event encoder")?;
    let raw = read_to_string(path)?;
    let vocab = EventVocabulary::from_json(&raw).map_err(|e| vocabulary_error(path, e))?;
    tracing::info!(path = %path.display(), classes = vocab.len(), "Loaded event encoder");
    Ok(vocab)
}

/// A tree ensemble with the scaler fitted on its training data
#[derive(Debug)]
pub struct ScaledModel<M> {
    /// Input standardization
    pub scaler: StandardScaler,
    /// The ensemble
    pub model: M,
}

/// Tree ensembles that know their input width
pub trait ForestModel: DeserializeOwned {
    /// Artifact description for messages
    const KIND: &'static str;
    /// Internal consistency check
    fn validate(&self) -> Result<(), String>;
    /// Input width
    fn n_features(&self) -> usize;
}

impl ForestModel for RandomForest {
    const KIND: &'static str = "random forest";
    fn validate(&self) -> Result<(), String> {
        RandomForest::validate(self)
    }
    fn n_features(&self) -> usize {
        RandomForest::n_features(self)
    }
}

impl ForestModel for IsolationForest {
    const KIND: &'static str = "isolation forest";
    fn validate(&self) -> Result<(), String> {
        IsolationForest::validate(self)
    }
    fn n_features(&self) -> usize {
        IsolationForest::n_features(self)
    }
}

#[derive(Deserialize)]
struct ScalerFile {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Load a forest and its scaler; both must exist and both must take
/// exactly `n_features` inputs.
pub fn load_scaled_forest<M: ForestModel>(
    model_candidates: &[PathBuf],
    scaler_candidates: &[PathBuf],
    n_features: usize,
) -> Result<ScaledModel<M>, ArtifactError> {
    let model_path = resolve(model_candidates, M::KIND)?;
    let scaler_path = resolve(scaler_candidates, "scaler")?;

    let model: M = read_json(model_path)?;
    model.validate().map_err(|e| invalid(model_path, e))?;
    if model.n_features() != n_features {
        return Err(invalid(
            model_path,
            format!("model takes {} features, expected {}", model.n_features(), n_features),
        ));
    }

    let file: ScalerFile = read_json(scaler_path)?;
    let scaler = StandardScaler::new(file.mean, file.scale).map_err(|e| invalid(scaler_path, e))?;
    if scaler.n_features() != n_features {
        return Err(invalid(
            scaler_path,
            format!("scaler takes {} features, expected {}", scaler.n_features(), n_features),
        ));
    }

    tracing::info!(model = %model_path.display(), scaler = %scaler_path.display(), kind = M::KIND, "Loaded forest");
    Ok(ScaledModel { scaler, model })
}
