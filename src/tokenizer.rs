//! Vocabularies
//!
//! Token to index mappings persisted at training time: the Keras-style
//! [`Tokenizer`] used by the text and XSS models, and the
//! [`EventVocabulary`] (label-encoder classes) used by the behaviour model.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Characters Keras strips from text before splitting words.
pub const DEFAULT_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

/// Inconsistent vocabulary content
#[derive(Debug, Error)]
pub enum VocabularyError {
    /// Tokenizer JSON does not have the expected shape
    #[error("malformed tokenizer: {0}")]
    Json(#[from] serde_json::Error),
    /// Index 0 is reserved for padding
    #[error("word {word:?} has index {index}, indices start at 1")]
    NonPositive {
        /// Offending word
        word: String,
        /// Its index
        index: i64,
    },
    /// Two words share an index
    #[error("index {index} assigned to both {first:?} and {second:?}")]
    DuplicateIndex {
        /// Shared index
        index: usize,
        /// First word
        first: String,
        /// Second word
        second: String,
    },
    /// Encoder lists a class twice
    #[error("class {0:?} listed more than once")]
    DuplicateClass(String),
    /// Nothing to look up against
    #[error("vocabulary is empty")]
    Empty,
}

/// Text to integer-sequence converter with Keras `Tokenizer` semantics.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    word_index: HashMap<String, usize>,
    num_words: Option<usize>,
    filters: String,
    lower: bool,
    split: String,
    char_level: bool,
    oov_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenizerFile {
    config: TokenizerConfig,
}

#[derive(Deserialize)]
struct TokenizerConfig {
    #[serde(default)]
    num_words: Option<usize>,
    #[serde(default = "default_filters")]
    filters: Option<String>,
    #[serde(default = "default_true")]
    lower: bool,
    #[serde(default = "default_split")]
    split: String,
    #[serde(default)]
    char_level: bool,
    #[serde(default)]
    oov_token: Option<String>,
    word_index: Value,
}

fn default_filters() -> Option<String> {
    Some(DEFAULT_FILTERS.to_string())
}

fn default_true() -> bool {
    true
}

fn default_split() -> String {
    " ".to_string()
}

impl Tokenizer {
    /// Parse the output of Keras `Tokenizer.to_json()`.
    ///
    /// Keras stores `word_index` as a JSON string nested inside the JSON
    /// document; a plain object is accepted too.
    pub fn from_keras_json(raw: &str) -> Result<Self, VocabularyError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_keras_value(value)
    }

    /// Same as [`Tokenizer::from_keras_json`] for an already parsed value,
    /// which may itself be the JSON string Keras produced.
    pub fn from_keras_value(value: Value) -> Result<Self, VocabularyError> {
        let value = unwrap_json_string(value)?;
        let file: TokenizerFile = serde_json::from_value(value)?;
        let cfg = file.config;
        let word_index = parse_word_index(cfg.word_index)?;

        Ok(Self {
            word_index,
            num_words: cfg.num_words,
            filters: cfg.filters.unwrap_or_default(),
            lower: cfg.lower,
            split: cfg.split,
            char_level: cfg.char_level,
            oov_token: cfg.oov_token,
        })
    }

    /// Rebuild a default tokenizer around a bare `word_index.json`.
    ///
    /// Indices are taken verbatim; a mapping that cannot have come from a
    /// fitted tokenizer (index 0, shared indices) is rejected instead of
    /// being renumbered.
    pub fn from_word_index(raw: &str) -> Result<Self, VocabularyError> {
        let value: Value = serde_json::from_str(raw)?;
        let word_index = parse_word_index(value)?;
        if word_index.is_empty() {
            return Err(VocabularyError::Empty);
        }
        Ok(Self::with_word_index(word_index))
    }

    /// Default settings (`Tokenizer()`) around the given mapping.
    pub fn with_word_index(word_index: HashMap<String, usize>) -> Self {
        Self {
            word_index,
            num_words: None,
            filters: DEFAULT_FILTERS.to_string(),
            lower: true,
            split: " ".to_string(),
            char_level: false,
            oov_token: None,
        }
    }

    /// Builder-style switch to character level tokens
    pub fn char_level(mut self, oov_token: Option<&str>) -> Self {
        self.char_level = true;
        self.oov_token = oov_token.map(str::to_string);
        self
    }

    /// Number of known tokens
    pub fn len(&self) -> usize {
        self.word_index.len()
    }

    /// True when no token is known
    pub fn is_empty(&self) -> bool {
        self.word_index.is_empty()
    }

    /// Index of a token, if known
    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.word_index.get(token).copied()
    }

    /// Index reserved for out-of-vocabulary tokens, when the tokenizer was
    /// fitted with an `oov_token`.
    pub fn oov_index(&self) -> Option<usize> {
        self.oov_token
            .as_deref()
            .and_then(|t| self.word_index.get(t).copied())
    }

    /// Convert each text into its index sequence.
    pub fn texts_to_sequences(&self, texts: &[String]) -> Vec<Vec<usize>> {
        texts.iter().map(|t| self.text_to_sequence(t)).collect()
    }

    /// Convert one text into its index sequence.
    ///
    /// Tokens at or beyond `num_words` and unseen tokens map to the OOV
    /// index when there is one and are dropped otherwise.
    pub fn text_to_sequence(&self, text: &str) -> Vec<usize> {
        let oov = self.oov_index();
        self.split_tokens(text)
            .iter()
            .filter_map(|token| match self.word_index.get(token.as_str()) {
                Some(&i) => match self.num_words {
                    Some(limit) if i >= limit => oov,
                    _ => Some(i),
                },
                None => oov,
            })
            .collect()
    }

    fn split_tokens(&self, text: &str) -> Vec<String> {
        let text = if self.lower {
            text.to_lowercase()
        } else {
            text.to_string()
        };

        if self.char_level {
            return text.chars().map(String::from).collect();
        }

        let split = if self.split.is_empty() { " " } else { self.split.as_str() };
        let mut translated = String::with_capacity(text.len());
        for c in text.chars() {
            if self.filters.contains(c) {
                translated.push_str(split);
            } else {
                translated.push(c);
            }
        }

        translated
            .split(split)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn unwrap_json_string(value: Value) -> Result<Value, VocabularyError> {
    match value {
        Value::String(inner) => Ok(serde_json::from_str(&inner)?),
        other => Ok(other),
    }
}

fn parse_word_index(value: Value) -> Result<HashMap<String, usize>, VocabularyError> {
    let raw: HashMap<String, i64> = serde_json::from_value(unwrap_json_string(value)?)?;

    let mut owners: HashMap<usize, String> = HashMap::with_capacity(raw.len());
    let mut word_index = HashMap::with_capacity(raw.len());
    for (word, index) in raw {
        if index < 1 {
            return Err(VocabularyError::NonPositive { word, index });
        }
        let index = index as usize;
        if let Some(first) = owners.get(&index) {
            return Err(VocabularyError::DuplicateIndex {
                index,
                first: first.clone(),
                second: word,
            });
        }
        owners.insert(index, word.clone());
        word_index.insert(word, index);
    }
    Ok(word_index)
}

/// Label-encoder classes for composite session-event tokens.
///
/// A class's index is its position in the persisted class list; anything
/// unseen maps to one past the last class.
#[derive(Debug, Clone)]
pub struct EventVocabulary {
    index: HashMap<String, usize>,
    unknown: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncoderFile {
    Wrapped { classes: Vec<String> },
    Bare(Vec<String>),
}

impl EventVocabulary {
    /// Build from the encoder's ordered classes
    pub fn from_classes(classes: Vec<String>) -> Result<Self, VocabularyError> {
        if classes.is_empty() {
            return Err(VocabularyError::Empty);
        }
        let unknown = classes.len();
        let mut index = HashMap::with_capacity(classes.len());
        for (i, class) in classes.into_iter().enumerate() {
            if index.contains_key(&class) {
                return Err(VocabularyError::DuplicateClass(class));
            }
            index.insert(class, i);
        }
        Ok(Self { index, unknown })
    }

    /// Parse `["a", "b"]` or `{"classes": ["a", "b"]}`
    pub fn from_json(raw: &str) -> Result<Self, VocabularyError> {
        let classes = match serde_json::from_str::<EncoderFile>(raw)? {
            EncoderFile::Wrapped { classes } | EncoderFile::Bare(classes) => classes,
        };
        Self::from_classes(classes)
    }

    /// Index of a token, or the unknown bucket
    pub fn lookup(&self, token: &str) -> usize {
        self.index.get(token).copied().unwrap_or(self.unknown)
    }

    /// The unknown bucket index
    pub fn unknown_index(&self) -> usize {
        self.unknown
    }

    /// Number of known classes
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Always false for a constructed vocabulary
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
