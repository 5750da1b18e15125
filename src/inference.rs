//! Inference adapters
//!
//! One adapter per served model. Each holds its artifacts as [`Component`]s,
//! runs the normalized batch through the model and maps raw scores to the
//! label/confidence pair its endpoint returns.

use crate::artifacts::{self, Component, ScaledModel, TokenizerBundle};
use crate::config::{BehaviourConfig, BotConfig, TextConfig, XssConfig};
use crate::forest::{IsolationForest, RandomForest};
use crate::nn::SequenceModel;
use crate::normalize::{
    encode_session, encode_texts, pad_sequences, round_decimals, SessionInput, TrafficFlow,
    FLOW_FEATURE_COUNT,
};
use crate::tokenizer::{EventVocabulary, Tokenizer};
use crate::ServeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Default decision threshold for probability outputs
pub const DEFAULT_THRESHOLD: f64 = 0.5;

fn round6(p: f32) -> f64 {
    round_decimals(f64::from(p), 6)
}

// =============================================================================
// Text classifier
// =============================================================================

/// Verdict of the SQL-injection classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextLabel {
    /// Score above the threshold
    SqlInjection,
    /// Everything else
    Safe,
}

/// One classified text
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TextPrediction {
    /// The text as submitted
    pub input: String,
    /// Verdict
    pub label: TextLabel,
    /// Model probability, rounded to 6 decimals
    pub confidence: f64,
}

/// BiLSTM classifier for SQL-injection-like payloads
#[derive(Debug)]
pub struct TextClassifier {
    model: Component<SequenceModel>,
    tokenizer: Component<Tokenizer>,
    max_len: usize,
}

impl TextClassifier {
    /// Load model and tokenizer from the configured candidates
    pub fn load(config: &TextConfig) -> Self {
        Self::new(
            Component::from_load("BILSTM model", artifacts::load_sequence_model(&config.model_paths)),
            Component::from_load(
                "BILSTM tokenizer",
                artifacts::load_tokenizer(&config.tokenizer_paths, &config.word_index_paths),
            ),
            config.max_len,
        )
    }

    /// Assemble from already loaded components
    pub fn new(model: Component<SequenceModel>, tokenizer: Component<Tokenizer>, max_len: usize) -> Self {
        Self { model, tokenizer, max_len }
    }

    /// Both artifacts loaded
    pub fn is_ready(&self) -> bool {
        self.model.is_loaded() && self.tokenizer.is_loaded()
    }

    /// Fail with the first missing artifact, model before tokenizer
    pub fn ensure_ready(&self) -> Result<(), ServeError> {
        self.model.get()?;
        self.tokenizer.get()?;
        Ok(())
    }

    /// Sequence length fed to the model
    pub fn max_len(&self) -> usize {
        self.model
            .get()
            .ok()
            .and_then(SequenceModel::input_length)
            .unwrap_or(self.max_len)
    }

    /// Classify a batch, answering in input order
    pub fn predict(&self, texts: &[String]) -> Result<Vec<TextPrediction>, ServeError> {
        let model = self.model.get()?;
        let tokenizer = self.tokenizer.get()?;

        let sequences = encode_texts(texts, tokenizer);
        let batch = pad_sequences(&sequences, self.max_len());
        let scores = model.predict(&batch)?;

        Ok(texts
            .iter()
            .zip(scores)
            .map(|(text, p)| TextPrediction {
                input: text.clone(),
                label: if f64::from(p) > DEFAULT_THRESHOLD {
                    TextLabel::SqlInjection
                } else {
                    TextLabel::Safe
                },
                confidence: round6(p),
            })
            .collect())
    }
}

// =============================================================================
// Behaviour classifier
// =============================================================================

/// One scored session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionPrediction {
    /// Session identifier from the request
    pub sessn_id: String,
    /// Model probability
    pub probability: f64,
    /// `1` when probability >= 0.5
    pub label: u8,
}

/// LSTM over encoded session events
#[derive(Debug)]
pub struct BehaviourClassifier {
    model: Component<SequenceModel>,
    encoder: Component<EventVocabulary>,
    max_len: usize,
}

impl BehaviourClassifier {
    /// Load model and encoder from the configured candidates
    pub fn load(config: &BehaviourConfig) -> Self {
        Self::new(
            Component::from_load("Behaviour model", artifacts::load_sequence_model(&config.model_paths)),
            Component::from_load("Behaviour encoder", artifacts::load_event_vocabulary(&config.encoder_paths)),
            config.max_len,
        )
    }

    /// Assemble from already loaded components
    pub fn new(model: Component<SequenceModel>, encoder: Component<EventVocabulary>, max_len: usize) -> Self {
        Self { model, encoder, max_len }
    }

    /// Both artifacts loaded
    pub fn is_ready(&self) -> bool {
        self.model.is_loaded() && self.encoder.is_loaded()
    }

    /// Fail with the first missing artifact
    pub fn ensure_ready(&self) -> Result<(), ServeError> {
        self.model.get()?;
        self.encoder.get()?;
        Ok(())
    }

    /// Sequence length fed to the model
    pub fn max_len(&self) -> usize {
        self.model
            .get()
            .ok()
            .and_then(SequenceModel::input_length)
            .unwrap_or(self.max_len)
    }

    /// Score each session; sessions without events are scored on an
    /// all-padding sequence.
    pub fn predict(&self, sessions: &[SessionInput]) -> Result<Vec<SessionPrediction>, ServeError> {
        let model = self.model.get()?;
        let encoder = self.encoder.get()?;

        let max_len = self.max_len();
        let sequences: Vec<Vec<usize>> = sessions
            .iter()
            .map(|s| encode_session(&s.events, encoder))
            .collect();
        let scores = model.predict(&pad_sequences(&sequences, max_len))?;

        Ok(sessions
            .iter()
            .zip(scores)
            .map(|(session, p)| SessionPrediction {
                sessn_id: session.sessn_id.clone(),
                probability: f64::from(p),
                label: u8::from(f64::from(p) >= DEFAULT_THRESHOLD),
            })
            .collect())
    }
}

// =============================================================================
// Bot detector
// =============================================================================

/// Which bot detector to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BotModel {
    /// Supervised RandomForest
    Rf,
    /// Unsupervised IsolationForest
    Iso,
}

impl BotModel {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            BotModel::Rf => "rf",
            BotModel::Iso => "iso",
        }
    }
}

impl fmt::Display for BotModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `model_type` that is neither `rf` nor `iso`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model_type must be 'rf' or 'iso'")]
pub struct UnknownModelType(pub String);

impl FromStr for BotModel {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rf" => Ok(BotModel::Rf),
            "iso" => Ok(BotModel::Iso),
            other => Err(UnknownModelType(other.to_string())),
        }
    }
}

/// Traffic verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TrafficLabel {
    /// Benign flow
    Normal,
    /// Bot or attack flow
    #[serde(rename = "Bot/Attack")]
    BotAttack,
}

/// What the `confidence` number measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceKind {
    /// Class probability in [0, 1]
    Probability,
    /// Unbounded |decision function|; not comparable with probabilities
    AnomalyMagnitude,
}

/// One bot detection result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotPrediction {
    /// RandomForest: `0` normal, `1` bot. IsolationForest: `1` normal, `-1` anomaly.
    pub prediction: i64,
    /// Human readable verdict
    pub prediction_label: TrafficLabel,
    /// See `confidence_kind`
    pub confidence: f64,
    /// Meaning of `confidence`
    pub confidence_kind: ConfidenceKind,
    /// Model that produced the result
    pub model_type: BotModel,
}

/// RandomForest and IsolationForest detectors over flow statistics
#[derive(Debug)]
pub struct BotDetector {
    rf: Component<ScaledModel<RandomForest>>,
    iso: Component<ScaledModel<IsolationForest>>,
}

impl BotDetector {
    /// Load both variants; each needs its model and its scaler
    pub fn load(config: &BotConfig) -> Self {
        Self::new(
            Component::from_load(
                "RandomForest model",
                artifacts::load_scaled_forest(&config.rf_model_paths, &config.rf_scaler_paths, FLOW_FEATURE_COUNT),
            ),
            Component::from_load(
                "IsolationForest model",
                artifacts::load_scaled_forest(&config.iso_model_paths, &config.iso_scaler_paths, FLOW_FEATURE_COUNT),
            ),
        )
    }

    /// Assemble from already loaded components
    pub fn new(rf: Component<ScaledModel<RandomForest>>, iso: Component<ScaledModel<IsolationForest>>) -> Self {
        Self { rf, iso }
    }

    /// RandomForest and its scaler loaded
    pub fn rf_loaded(&self) -> bool {
        self.rf.is_loaded()
    }

    /// IsolationForest and its scaler loaded
    pub fn iso_loaded(&self) -> bool {
        self.iso.is_loaded()
    }

    /// Classify one flow
    pub fn predict(&self, model: BotModel, flow: &TrafficFlow) -> Result<BotPrediction, ServeError> {
        match model {
            BotModel::Rf => self.predict_rf(flow),
            BotModel::Iso => self.predict_iso(flow),
        }
    }

    /// Classify flows in order with one model
    pub fn predict_batch(&self, model: BotModel, flows: &[TrafficFlow]) -> Result<Vec<BotPrediction>, ServeError> {
        flows.iter().map(|flow| self.predict(model, flow)).collect()
    }

    fn predict_rf(&self, flow: &TrafficFlow) -> Result<BotPrediction, ServeError> {
        let rf = self.rf.get()?;
        let x = rf.scaler.transform(&flow.to_vector())?;
        let pred = rf.model.predict(&x)?;

        Ok(BotPrediction {
            prediction: pred.class,
            prediction_label: if pred.class == 1 {
                TrafficLabel::BotAttack
            } else {
                TrafficLabel::Normal
            },
            confidence: pred.confidence(),
            confidence_kind: ConfidenceKind::Probability,
            model_type: BotModel::Rf,
        })
    }

    fn predict_iso(&self, flow: &TrafficFlow) -> Result<BotPrediction, ServeError> {
        let iso = self.iso.get()?;
        let x = iso.scaler.transform(&flow.to_vector())?;
        let pred = iso.model.predict(&x)?;

        Ok(BotPrediction {
            prediction: pred.label,
            prediction_label: if pred.label == -1 {
                TrafficLabel::BotAttack
            } else {
                TrafficLabel::Normal
            },
            confidence: pred.decision.abs(),
            confidence_kind: ConfidenceKind::AnomalyMagnitude,
            model_type: BotModel::Iso,
        })
    }
}

// =============================================================================
// XSS detector
// =============================================================================

/// One scored payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct XssPrediction {
    /// The payload as submitted
    pub payload: String,
    /// Model probability
    pub prob_malicious: f64,
    /// `1` when `prob_malicious >= threshold`
    pub pred_label: u8,
    /// Threshold applied
    pub threshold: f64,
}

/// Character-level BiLSTM XSS detector
#[derive(Debug)]
pub struct XssDetector {
    model: Component<SequenceModel>,
    tokenizer: Component<TokenizerBundle>,
    max_len: usize,
}

impl XssDetector {
    /// Load model and tokenizer bundle from the configured candidates
    pub fn load(config: &XssConfig) -> Self {
        Self::new(
            Component::from_load("XSS model", artifacts::load_sequence_model(&config.model_paths)),
            Component::from_load("XSS tokenizer", artifacts::load_tokenizer_bundle(&config.tokenizer_paths)),
            config.max_len,
        )
    }

    /// Assemble from already loaded components
    pub fn new(model: Component<SequenceModel>, tokenizer: Component<TokenizerBundle>, max_len: usize) -> Self {
        Self { model, tokenizer, max_len }
    }

    /// Both artifacts loaded
    pub fn is_ready(&self) -> bool {
        self.model.is_loaded() && self.tokenizer.is_loaded()
    }

    /// Fail with the first missing artifact
    pub fn ensure_ready(&self) -> Result<(), ServeError> {
        self.model.get()?;
        self.tokenizer.get()?;
        Ok(())
    }

    /// Padding length saved with the tokenizer, if any
    pub fn saved_max_len(&self) -> Option<usize> {
        self.tokenizer.get().ok().and_then(|b| b.maxlen)
    }

    /// Sequence length fed to the model: saved length, then the model's
    /// recorded input length, then the configured default.
    pub fn max_len(&self) -> usize {
        self.saved_max_len()
            .or_else(|| self.model.get().ok().and_then(SequenceModel::input_length))
            .unwrap_or(self.max_len)
    }

    /// Score payloads against `threshold`, answering in input order
    pub fn predict(&self, payloads: &[String], threshold: f64) -> Result<Vec<XssPrediction>, ServeError> {
        let model = self.model.get()?;
        let bundle = self.tokenizer.get()?;

        let sequences = bundle.tokenizer.texts_to_sequences(payloads);
        let scores = model.predict(&pad_sequences(&sequences, self.max_len()))?;

        Ok(payloads
            .iter()
            .zip(scores)
            .map(|(payload, p)| {
                let prob = f64::from(p);
                XssPrediction {
                    payload: payload.clone(),
                    prob_malicious: prob,
                    pred_label: u8::from(prob >= threshold),
                    threshold,
                }
            })
            .collect())
    }
}
