//! Request normalization
//!
//! Turns request bodies into the fixed-shape numeric input each model was
//! trained on. Everything here is pure; vocabularies are only read.

use crate::tokenizer::{EventVocabulary, Tokenizer};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Number of flow statistics the bot detectors were trained on
pub const FLOW_FEATURE_COUNT: usize = 8;

/// Training column order of the flow statistics
pub const FLOW_FEATURE_NAMES: [&str; FLOW_FEATURE_COUNT] = [
    "flow_duration",
    "flow_byts_s",
    "flow_pkts_s",
    "pkt_len_mean",
    "pkt_len_std",
    "fwd_pkts_s",
    "bwd_pkts_s",
    "flow_iat_mean",
];

/// Lowercase, collapse whitespace runs to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A single text or a batch of texts
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(untagged)]
pub enum TextInput {
    /// One text
    One(String),
    /// Several texts, answered in order
    Many(Vec<String>),
}

impl TextInput {
    /// Resolve into an ordered batch; `None` when the batch is empty.
    pub fn into_batch(self) -> Option<Vec<String>> {
        let batch = match self {
            TextInput::One(text) => vec![text],
            TextInput::Many(texts) => texts,
        };
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// One user action inside a session
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SessionEvent {
    /// Event name, e.g. Click, View
    #[serde(rename = "Event")]
    pub event: String,
    /// Page name, e.g. Home, Product
    pub page_name: String,
    /// Browser, e.g. Chrome, Safari
    pub browser_type: String,
}

impl SessionEvent {
    /// Composite token the encoder was fitted on: `Event_page_browser`.
    pub fn token(&self) -> String {
        format!("{}_{}_{}", self.event, self.page_name, self.browser_type)
    }
}

/// An identified session of ordered events
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SessionInput {
    /// Caller's session identifier, echoed back
    pub sessn_id: String,
    /// Events in the order they happened
    #[serde(default)]
    pub events: Vec<SessionEvent>,
}

/// Encode a session's events; an empty session yields an empty sequence.
pub fn encode_session(events: &[SessionEvent], vocab: &EventVocabulary) -> Vec<usize> {
    events.iter().map(|e| vocab.lookup(&e.token())).collect()
}

/// Normalize texts and map them through the tokenizer.
pub fn encode_texts(texts: &[String], tokenizer: &Tokenizer) -> Vec<Vec<usize>> {
    texts
        .iter()
        .map(|t| tokenizer.text_to_sequence(&normalize_text(t)))
        .collect()
}

/// Right-pad with zeros / right-truncate one sequence to `max_len`.
pub fn pad_sequence(seq: &[usize], max_len: usize) -> Vec<usize> {
    let mut padded: Vec<usize> = seq.iter().copied().take(max_len).collect();
    padded.resize(max_len, 0);
    padded
}

/// Round to `digits` decimals of the exact stored value (`2.675` -> `2.67`).
pub fn round_decimals(x: f64, digits: usize) -> f64 {
    format!("{:.*}", digits, x).parse().unwrap_or(x)
}

/// Pad a batch into a `(batch, max_len)` matrix, keeping the first
/// `max_len` tokens of longer sequences.
pub fn pad_sequences(seqs: &[Vec<usize>], max_len: usize) -> Array2<usize> {
    let mut out = Array2::zeros((seqs.len(), max_len));
    for (mut row, seq) in out.outer_iter_mut().zip(seqs) {
        for (slot, &token) in row.iter_mut().zip(seq.iter()) {
            *slot = token;
        }
    }
    out
}

/// Network flow statistics, one bot-detection sample
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct TrafficFlow {
    /// Flow Duration
    pub flow_duration: f64,
    /// Flow Byts/s
    pub flow_byts_s: f64,
    /// Flow Pkts/s
    pub flow_pkts_s: f64,
    /// Pkt Len Mean
    pub pkt_len_mean: f64,
    /// Pkt Len Std
    pub pkt_len_std: f64,
    /// Fwd Pkts/s
    pub fwd_pkts_s: f64,
    /// Bwd Pkts/s
    pub bwd_pkts_s: f64,
    /// Flow IAT Mean
    pub flow_iat_mean: f64,
}

impl TrafficFlow {
    /// Feature vector in [`FLOW_FEATURE_NAMES`] order
    pub fn to_vector(&self) -> [f64; FLOW_FEATURE_COUNT] {
        [
            self.flow_duration,
            self.flow_byts_s,
            self.flow_pkts_s,
            self.pkt_len_mean,
            self.pkt_len_std,
            self.fwd_pkts_s,
            self.bwd_pkts_s,
            self.flow_iat_mean,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_decimals() {
        assert_eq!(round_decimals(2.675, 2), 2.67);
        assert_eq!(round_decimals(0.918_295_834, 3), 0.918);
        assert_eq!(round_decimals(0.880_797_077_977_882_3, 6), 0.880797);
        assert_eq!(round_decimals(1.0, 3), 1.0);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  SELECT   *\tFROM\n users "), "select * from users");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_normalize_text_idempotent() {
        for s in ["  A  b\t\tC ", "already clean", "", "\n\nX\r\nY  "] {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn test_truncation_keeps_first_tokens() {
        let seq: Vec<usize> = (1..=10).collect();
        assert_eq!(pad_sequence(&seq, 4), vec![1, 2, 3, 4]);

        let batch = pad_sequences(&[seq], 4);
        assert_eq!(batch.row(0).to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_padding_on_the_right() {
        assert_eq!(pad_sequence(&[5, 6], 5), vec![5, 6, 0, 0, 0]);

        let batch = pad_sequences(&[vec![5, 6], vec![], vec![1, 2, 3, 4, 5, 6]], 5);
        assert_eq!(batch.dim(), (3, 5));
        assert_eq!(batch.row(0).to_vec(), vec![5, 6, 0, 0, 0]);
        assert_eq!(batch.row(1).to_vec(), vec![0, 0, 0, 0, 0]);
        assert_eq!(batch.row(2).to_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_text_input_batch() {
        let one: TextInput = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(one.into_batch(), Some(vec!["hello".to_string()]));

        let many: TextInput = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(many.into_batch().map(|b| b.len()), Some(2));

        let empty: TextInput = serde_json::from_str("[]").unwrap();
        assert_eq!(empty.into_batch(), None);
    }

    #[test]
    fn test_event_token_and_empty_session() {
        let vocab = EventVocabulary::from_classes(vec!["Click_Home_Chrome".into()]).unwrap();
        let events = vec![
            SessionEvent {
                event: "Click".into(),
                page_name: "Home".into(),
                browser_type: "Chrome".into(),
            },
            SessionEvent {
                event: "Home".into(),
                page_name: "Click".into(),
                browser_type: "Chrome".into(),
            },
        ];
        assert_eq!(events[0].token(), "Click_Home_Chrome");
        assert_eq!(encode_session(&events, &vocab), vec![0, 1]);

        let empty = encode_session(&[], &vocab);
        assert!(empty.is_empty());
        assert_eq!(pad_sequence(&empty, 20), vec![0; 20]);
    }

    #[test]
    fn test_flow_vector_order() {
        let flow = TrafficFlow {
            flow_duration: 1.0,
            flow_byts_s: 2.0,
            flow_pkts_s: 3.0,
            pkt_len_mean: 4.0,
            pkt_len_std: 5.0,
            fwd_pkts_s: 6.0,
            bwd_pkts_s: 7.0,
            flow_iat_mean: 8.0,
        };
        assert_eq!(flow.to_vector(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }
}
