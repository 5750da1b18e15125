//! Service Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "THREATLENS_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "threatlens.json";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub bind_addr: String,
    /// SQL-injection text classifier
    pub text: TextConfig,
    /// Session behaviour classifier
    pub behaviour: BehaviourConfig,
    /// Bot detectors
    pub bot: BotConfig,
    /// XSS detector
    pub xss: XssConfig,
    /// Feature extractor lookups
    pub features: FeatureConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            text: TextConfig::default(),
            behaviour: BehaviourConfig::default(),
            bot: BotConfig::default(),
            xss: XssConfig::default(),
            features: FeatureConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to file
    pub fn save(&self, path: &str) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Load the file named by the environment (or the default path), falling
    /// back to defaults, then apply environment overrides.
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Could not load {}: {}, using defaults", path, e);
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production). Path overrides are tried before the configured paths.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(path) = var("XSS_MODEL_PATH") {
            self.xss.model_paths.insert(0, path.into());
        }
        if let Some(path) = var("XSS_TOKENIZER_PATH") {
            self.xss.tokenizer_paths.insert(0, path.into());
        }
        if let Some(path) = var("GEOIP_DB_PATH") {
            self.features.geoip_db_path = path.into();
        }
        if let Some(key) = var("ABUSEIPDB_API_KEY") {
            self.features.abuseipdb_api_key = Some(key);
        }
    }
}

/// Text classifier artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Model candidates
    pub model_paths: Vec<PathBuf>,
    /// Full tokenizer candidates
    pub tokenizer_paths: Vec<PathBuf>,
    /// Bare word index candidates, used when no full tokenizer loads
    pub word_index_paths: Vec<PathBuf>,
    /// Padding length when the model does not record one
    pub max_len: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            model_paths: vec!["models/bilstm/bilstm_payload_detector.json".into()],
            tokenizer_paths: vec!["models/bilstm/tokenizer.json".into()],
            word_index_paths: vec!["models/bilstm/word_index.json".into()],
            max_len: 100,
        }
    }
}

/// Behaviour classifier artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviourConfig {
    /// Model candidates
    pub model_paths: Vec<PathBuf>,
    /// Event encoder candidates
    pub encoder_paths: Vec<PathBuf>,
    /// Padding length when the model does not record one
    pub max_len: usize,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            model_paths: vec!["models/behaviour/behavior_lstm_model.json".into()],
            encoder_paths: vec!["models/behaviour/action_encoder.json".into()],
            max_len: 20,
        }
    }
}

/// Bot detector artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// RandomForest model candidates
    pub rf_model_paths: Vec<PathBuf>,
    /// RandomForest scaler candidates
    pub rf_scaler_paths: Vec<PathBuf>,
    /// IsolationForest model candidates
    pub iso_model_paths: Vec<PathBuf>,
    /// IsolationForest scaler candidates
    pub iso_scaler_paths: Vec<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rf_model_paths: vec!["models/bot/rf_bot_model.json".into()],
            rf_scaler_paths: vec!["models/bot/rf_bot_scaler.json".into()],
            iso_model_paths: vec!["models/bot/isolation_forest_bot_model.json".into()],
            iso_scaler_paths: vec!["models/bot/isolation_forest_bot_scaler.json".into()],
        }
    }
}

/// XSS detector artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XssConfig {
    /// Model candidates
    pub model_paths: Vec<PathBuf>,
    /// Tokenizer (or tokenizer bundle) candidates
    pub tokenizer_paths: Vec<PathBuf>,
    /// Padding length when neither the tokenizer bundle nor the model
    /// records one
    pub max_len: usize,
}

impl Default for XssConfig {
    fn default() -> Self {
        Self {
            model_paths: vec![
                "models/xss/xss_bilstm_model.json".into(),
                "models/xss/models/xss_bilstm_model.json".into(),
            ],
            tokenizer_paths: vec![
                "models/xss/xss_tokenizer.json".into(),
                "models/xss/models/xss_tokenizer.json".into(),
            ],
            max_len: 200,
        }
    }
}

/// Feature extractor lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// MaxMind GeoLite2 City database
    pub geoip_db_path: PathBuf,
    /// AbuseIPDB key; without one every lookup scores neutral
    pub abuseipdb_api_key: Option<String>,
    /// AbuseIPDB check endpoint
    pub abuseipdb_url: String,
    /// Report window passed to AbuseIPDB
    pub max_age_in_days: u32,
    /// Reputation request timeout
    pub reputation_timeout_secs: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            geoip_db_path: "GeoLite2-City.mmdb".into(),
            abuseipdb_api_key: None,
            abuseipdb_url: "https://api.abuseipdb.com/api/v2/check".into(),
            max_age_in_days: 90,
            reputation_timeout_secs: 5,
        }
    }
}
