//! ThreatLens - pretrained model serving
//!
//! Serves pretrained payload, behaviour and bot-traffic classifiers over HTTP,
//! next to a stateless feature extractor for raw requests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           HTTP ROUTES (axum)                            │
//! │   /bilstm    /behaviour    /bot    /xss    /feature    /health          │
//! └──────┬───────────┬───────────┬───────┬──────────┬───────────────────────┘
//!        │           │           │       │          │
//! ┌──────▼───────────▼───────────▼───────▼──────┐ ┌─▼────────────────────┐
//! │              REQUEST NORMALIZER              │ │  FEATURE EXTRACTOR   │
//! │  text cleanup | vocab lookup | pad/truncate  │ │  entropy | tokens    │
//! └──────────────────────┬───────────────────────┘ │  geoip | reputation  │
//!                        │                         └──────────────────────┘
//! ┌──────────────────────▼───────────────────────┐
//! │              INFERENCE ADAPTERS              │
//! │  (Bi)LSTM (nn) | RandomForest | IsoForest    │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │       ARTIFACT STORE (read-only, Arc)        │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod artifacts;
pub mod config;
pub mod features;
pub mod forest;
pub mod inference;
pub mod nn;
pub mod normalize;
pub mod routes;
pub mod tokenizer;

use thiserror::Error;

pub use artifacts::Component;
pub use config::ServiceConfig;
pub use features::FeatureExtractor;
pub use inference::{BehaviourClassifier, BotDetector, TextClassifier, XssDetector};
pub use routes::build_router;

/// Failure to load an on-disk artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// None of the candidate paths exist
    #[error("no {what} found (tried: {tried})")]
    NotFound {
        /// Artifact description
        what: &'static str,
        /// Candidate paths, comma separated
        tried: String,
    },
    /// File exists but could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Artifact path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// File is not valid JSON for the expected format
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Artifact path
        path: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// Vocabulary content is inconsistent
    #[error("invalid vocabulary in {path}: {source}")]
    Vocabulary {
        /// Artifact path
        path: String,
        /// Underlying error
        #[source]
        source: tokenizer::VocabularyError,
    },
    /// Parsed fine but the weights or dimensions do not fit together
    #[error("invalid artifact {path}: {reason}")]
    Invalid {
        /// Artifact path
        path: String,
        /// What is wrong
        reason: String,
    },
}

/// Failure while running a loaded model.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Token index has no embedding row
    #[error("token index {index} outside embedding table of {rows} rows")]
    IndexOutOfRange {
        /// Offending index
        index: usize,
        /// Embedding rows
        rows: usize,
    },
    /// Input does not have the dimension the model was trained with
    #[error("expected {expected} input features, got {actual}")]
    Shape {
        /// Trained dimension
        expected: usize,
        /// Received dimension
        actual: usize,
    },
    /// Output layer did not yield a single score
    #[error("model output has {0} values, expected 1")]
    Output(usize),
}

/// Failure of a prediction request once it reached an adapter.
#[derive(Debug, Error)]
pub enum ServeError {
    /// A required artifact is not loaded
    #[error("{0} not loaded")]
    Unavailable(&'static str),
    /// The model call itself failed
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Everything a request handler needs, built once at startup.
///
/// Immutable after construction and shared behind an `Arc`; handlers never
/// lock it.
pub struct InferenceContext {
    /// SQL-injection text classifier
    pub text: TextClassifier,
    /// Session behaviour classifier
    pub behaviour: BehaviourClassifier,
    /// Supervised and unsupervised bot detectors
    pub bot: BotDetector,
    /// Character-level XSS detector
    pub xss: XssDetector,
    /// Payload / IP feature extractor
    pub extractor: FeatureExtractor,
}

impl InferenceContext {
    /// Load every configured artifact.
    ///
    /// Never fails: a missing or broken artifact leaves its component
    /// unavailable and the other endpoints keep working.
    pub fn load(config: &ServiceConfig) -> Self {
        tracing::info!("Loading model artifacts");
        let context = Self {
            text: TextClassifier::load(&config.text),
            behaviour: BehaviourClassifier::load(&config.behaviour),
            bot: BotDetector::load(&config.bot),
            xss: XssDetector::load(&config.xss),
            extractor: FeatureExtractor::from_config(&config.features),
        };
        let status = context.status();
        tracing::info!(
            text = status.text,
            behaviour = status.behaviour,
            bot_rf = status.bot_rf,
            bot_iso = status.bot_iso,
            xss = status.xss,
            "Artifact loading finished"
        );
        context
    }

    /// Which components are ready to serve.
    pub fn status(&self) -> ComponentStatus {
        ComponentStatus {
            text: self.text.is_ready(),
            behaviour: self.behaviour.is_ready(),
            bot_rf: self.bot.rf_loaded(),
            bot_iso: self.bot.iso_loaded(),
            xss: self.xss.is_ready(),
        }
    }
}

/// Readiness flags per component
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct ComponentStatus {
    /// Text classifier model and tokenizer loaded
    pub text: bool,
    /// Behaviour model and encoder loaded
    pub behaviour: bool,
    /// RandomForest model and scaler loaded
    pub bot_rf: bool,
    /// IsolationForest model and scaler loaded
    pub bot_iso: bool,
    /// XSS model and tokenizer loaded
    pub xss: bool,
}
