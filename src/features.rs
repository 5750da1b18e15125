//! Payload and client-IP feature extraction
//!
//! Independent of the model-serving components. Every sub-result degrades to
//! a documented default instead of failing the request.

use crate::config::FeatureConfig;
use crate::normalize::round_decimals;
use async_trait::async_trait;
use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use utoipa::ToSchema;

/// Score returned when no AbuseIPDB key is configured
pub const NEUTRAL_REPUTATION: i64 = 10;

fn token_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9]+|[^\sA-Za-z0-9]").ok())
        .as_ref()
}

/// Shannon entropy in bits over character frequencies, rounded to 3 decimals.
pub fn entropy(payload: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in payload.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let n = total as f64;
    let h: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum();
    // a single repeated symbol gives -0.0
    round_decimals(h, 3).abs()
}

/// Alphanumeric runs and single punctuation characters, lowercased.
pub fn tokenize(payload: &str) -> Vec<String> {
    match token_regex() {
        Some(re) => re
            .find_iter(payload)
            .map(|m| m.as_str().to_lowercase())
            .collect(),
        None => Vec::new(),
    }
}

/// MD5 hex digest of the payload bytes
pub fn payload_hash(payload: &str) -> String {
    hex::encode(Md5::digest(payload.as_bytes()))
}

// =============================================================================
// GeoIP
// =============================================================================

/// Location of an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoRecord {
    /// Address looked up
    pub ip: String,
    /// Country name (English)
    pub country: Option<String>,
    /// City name (English)
    pub city: Option<String>,
    /// Latitude
    pub latitude: Option<f64>,
    /// Longitude
    pub longitude: Option<f64>,
    /// Why the lookup failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeoRecord {
    /// Record returned on any lookup failure
    pub fn unknown(ip: &str, error: impl Into<String>) -> Self {
        Self {
            ip: ip.to_string(),
            country: Some("Unknown".into()),
            city: Some("Unknown".into()),
            latitude: None,
            longitude: None,
            error: Some(error.into()),
        }
    }
}

/// IP to location resolver
pub trait GeoLookup: Send + Sync {
    /// Resolve; never fails, see [`GeoRecord::unknown`]
    fn lookup(&self, ip: &str) -> GeoRecord;
}

/// MaxMind GeoLite2 City database, opened once
pub struct MaxMindGeoIp {
    reader: Result<maxminddb::Reader<Vec<u8>>, String>,
}

impl MaxMindGeoIp {
    /// Open the database; a missing or corrupt file is remembered and
    /// reported on every lookup.
    pub fn open(path: &Path) -> Self {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|e| e.to_string());
        match &reader {
            Ok(_) => tracing::info!("Opened GeoIP database {}", path.display()),
            Err(e) => tracing::warn!("GeoIP database {} unavailable: {}", path.display(), e),
        }
        Self { reader }
    }
}

impl GeoLookup for MaxMindGeoIp {
    fn lookup(&self, ip: &str) -> GeoRecord {
        let reader = match &self.reader {
            Ok(reader) => reader,
            Err(e) => return GeoRecord::unknown(ip, format!("GeoIP database unavailable: {e}")),
        };
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(e) => return GeoRecord::unknown(ip, format!("invalid ip {ip:?}: {e}")),
        };

        match reader.lookup::<maxminddb::geoip2::City>(addr) {
            Ok(city) => GeoRecord {
                ip: ip.to_string(),
                country: english_name(city.country.as_ref().and_then(|c| c.names.as_ref())),
                city: english_name(city.city.as_ref().and_then(|c| c.names.as_ref())),
                latitude: city.location.as_ref().and_then(|l| l.latitude),
                longitude: city.location.as_ref().and_then(|l| l.longitude),
                error: None,
            },
            Err(e) => {
                tracing::debug!("GeoIP lookup for {} failed: {}", ip, e);
                GeoRecord::unknown(ip, e.to_string())
            }
        }
    }
}

fn english_name(names: Option<&BTreeMap<&str, &str>>) -> Option<String> {
    names.and_then(|n| n.get("en")).map(|s| s.to_string())
}

// =============================================================================
// Reputation
// =============================================================================

/// IP reputation source
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    /// Abuse score; never fails
    async fn score(&self, ip: &str) -> i64;
}

/// AbuseIPDB `check` client
pub struct AbuseIpDbClient {
    api_key: Option<String>,
    url: String,
    max_age_in_days: u32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbReport {
    #[serde(default)]
    data: Option<AbuseIpDbData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpDbData {
    #[serde(default)]
    abuse_confidence_score: i64,
}

impl AbuseIpDbClient {
    /// Client against the configured endpoint; no key means offline mode
    pub fn new(config: &FeatureConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.reputation_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            api_key: config.abuseipdb_api_key.clone().filter(|k| !k.is_empty()),
            url: config.abuseipdb_url.clone(),
            max_age_in_days: config.max_age_in_days,
            client,
        }
    }

    async fn check_ip(&self, api_key: &str, ip: &str) -> Result<i64, reqwest::Error> {
        let report: AbuseIpDbReport = self
            .client
            .get(&self.url)
            .header("Key", api_key)
            .header("Accept", "application/json")
            .query(&[("ipAddress", ip.to_string()), ("maxAgeInDays", self.max_age_in_days.to_string())])
            .send()
            .await?
            .json()
            .await?;
        Ok(report.data.map(|d| d.abuse_confidence_score).unwrap_or(0))
    }
}

fn is_local(ip: &str) -> bool {
    ip.is_empty() || ip.parse::<IpAddr>().map(|a| a.is_loopback()).unwrap_or(false)
}

#[async_trait]
impl ReputationLookup for AbuseIpDbClient {
    async fn score(&self, ip: &str) -> i64 {
        if is_local(ip) {
            return 0;
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return NEUTRAL_REPUTATION;
        };
        match self.check_ip(api_key, ip).await {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!("AbuseIPDB lookup for {} failed: {}", ip, e);
                0
            }
        }
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Extraction input; missing or non-string fields read as empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExtractRequest {
    /// Raw payload
    pub payload: String,
    /// Client address
    pub ip: String,
    /// User agent
    pub ua: String,
}

impl ExtractRequest {
    /// Read a request body leniently: invalid JSON yields all-empty fields.
    pub fn from_body(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Feature request body is not JSON: {}", e);
                return Self::default();
            }
        };
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            payload: field("payload"),
            ip: field("ip"),
            ua: field("ua"),
        }
    }
}

/// Extracted features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureReport {
    /// MD5 of the payload
    pub payload_hash: String,
    /// Payload tokens
    pub tokens: Vec<String>,
    /// Payload entropy in bits
    pub entropy: f64,
    /// Client location
    pub geo: GeoRecord,
    /// Client abuse score
    pub reputation_score: i64,
    /// User agent, echoed
    pub user_agent: String,
}

/// Computes a [`FeatureReport`] with pluggable lookups
#[derive(Clone)]
pub struct FeatureExtractor {
    geo: Arc<dyn GeoLookup>,
    reputation: Arc<dyn ReputationLookup>,
}

impl FeatureExtractor {
    /// MaxMind and AbuseIPDB lookups from configuration
    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::with_lookups(
            Arc::new(MaxMindGeoIp::open(&config.geoip_db_path)),
            Arc::new(AbuseIpDbClient::new(config)),
        )
    }

    /// Explicit lookups
    pub fn with_lookups(geo: Arc<dyn GeoLookup>, reputation: Arc<dyn ReputationLookup>) -> Self {
        Self { geo, reputation }
    }

    /// Compute every feature; never fails
    pub async fn extract(&self, req: &ExtractRequest) -> FeatureReport {
        let geo = self.geo.lookup(&req.ip);
        let reputation_score = self.reputation.score(&req.ip).await;

        FeatureReport {
            payload_hash: payload_hash(&req.payload),
            tokens: tokenize(&req.payload),
            entropy: entropy(&req.payload),
            geo,
            reputation_score,
            user_agent: req.ua.clone(),
        }
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor").finish_non_exhaustive()
    }
}
