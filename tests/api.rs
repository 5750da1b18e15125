//! End-to-end tests over the HTTP router with artifacts written to a temp dir.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use threatlens::config::{BehaviourConfig, BotConfig, FeatureConfig, TextConfig, XssConfig};
use threatlens::{build_router, InferenceContext, ServiceConfig};

fn zero_lstm() -> Value {
    json!({
        "kernel": [[0.0, 0.0, 0.0, 0.0]],
        "recurrent_kernel": [[0.0, 0.0, 0.0, 0.0]],
        "bias": [0.0, 0.0, 0.0, 0.0]
    })
}

/// Embedding -> BiLSTM -> Dropout -> Dense; the LSTM weights are zero so the
/// output is always sigmoid(bias).
fn constant_model(vocab: usize, bias: f32) -> Value {
    json!({
        "layers": [
            {"type": "embedding", "weights": vec![vec![0.1_f32]; vocab]},
            {"type": "bidirectional", "forward": zero_lstm(), "backward": zero_lstm()},
            {"type": "dropout", "rate": 0.3},
            {"type": "dense", "kernel": [[0.0], [0.0]], "bias": [bias], "activation": "sigmoid"}
        ]
    })
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

fn flow_split(right: Value, left: Value) -> Value {
    json!([
        {"feature": 0, "threshold": 1000.0, "left": 1, "right": 2},
        left,
        right
    ])
}

fn full_config(dir: &Path) -> ServiceConfig {
    let word_index = json!({"<OOV>": 1, "select": 2, "from": 3, "users": 4, "where": 5}).to_string();
    let tokenizer = json!({
        "class_name": "Tokenizer",
        "config": {"num_words": null, "lower": true, "split": " ", "char_level": false,
                   "oov_token": "<OOV>", "word_index": word_index}
    });

    let xss_bundle = json!({
        "tokenizer": {"config": {"char_level": true, "oov_token": "[UNK]",
                                 "word_index": {"[UNK]": 1, "<": 2, ">": 3, "s": 4}}},
        "maxlen": 50
    });

    let scaler = json!({"mean": vec![0.0; 8], "scale": vec![1.0; 8]});
    let rf = json!({
        "classes": [0, 1],
        "n_features": 8,
        "trees": [{"nodes": flow_split(json!({"value": [1.0, 3.0]}), json!({"value": [9.0, 1.0]}))}]
    });
    let iso = json!({
        "n_features": 8,
        "max_samples": 256,
        "offset": -0.5,
        "trees": [{"nodes": flow_split(json!({"n_samples": 1}), json!({"n_samples": 255}))}]
    });

    ServiceConfig {
        bind_addr: "127.0.0.1:0".into(),
        text: TextConfig {
            model_paths: vec![dir.join("missing.json"), write(dir, "text_model.json", &constant_model(6, 2.0))],
            tokenizer_paths: vec![write(dir, "tokenizer.json", &tokenizer)],
            word_index_paths: vec![dir.join("word_index.json")],
            max_len: 100,
        },
        behaviour: BehaviourConfig {
            model_paths: vec![write(dir, "behaviour_model.json", &constant_model(3, -1.0))],
            encoder_paths: vec![write(dir, "encoder.json", &json!(["Click_Home_Chrome", "View_Product_Safari"]))],
            max_len: 20,
        },
        bot: BotConfig {
            rf_model_paths: vec![write(dir, "rf.json", &rf)],
            rf_scaler_paths: vec![write(dir, "rf_scaler.json", &scaler)],
            iso_model_paths: vec![write(dir, "iso.json", &iso)],
            iso_scaler_paths: vec![write(dir, "iso_scaler.json", &scaler)],
        },
        xss: XssConfig {
            model_paths: vec![write(dir, "xss_model.json", &constant_model(5, 0.0))],
            tokenizer_paths: vec![write(dir, "xss_tokenizer.json", &xss_bundle)],
            max_len: 200,
        },
        features: FeatureConfig {
            geoip_db_path: dir.join("GeoLite2-City.mmdb"),
            ..FeatureConfig::default()
        },
    }
}

fn empty_config(dir: &Path) -> ServiceConfig {
    let none = || vec![dir.join("none.json")];
    ServiceConfig {
        text: TextConfig {
            model_paths: none(),
            tokenizer_paths: none(),
            word_index_paths: none(),
            max_len: 100,
        },
        behaviour: BehaviourConfig {
            model_paths: none(),
            encoder_paths: none(),
            max_len: 20,
        },
        bot: BotConfig {
            rf_model_paths: none(),
            rf_scaler_paths: none(),
            iso_model_paths: none(),
            iso_scaler_paths: none(),
        },
        xss: XssConfig {
            model_paths: none(),
            tokenizer_paths: none(),
            max_len: 200,
        },
        features: FeatureConfig {
            geoip_db_path: dir.join("none.mmdb"),
            ..FeatureConfig::default()
        },
        ..ServiceConfig::default()
    }
}

fn server(config: &ServiceConfig) -> TestServer {
    let context = Arc::new(InferenceContext::load(config));
    TestServer::new(build_router(context)).unwrap()
}

fn flow(duration: f64) -> Value {
    json!({
        "flow_duration": duration,
        "flow_byts_s": 512.3,
        "flow_pkts_s": 25.1,
        "pkt_len_mean": 64.2,
        "pkt_len_std": 18.5,
        "fwd_pkts_s": 15.0,
        "bwd_pkts_s": 10.1,
        "flow_iat_mean": 45.3
    })
}

#[tokio::test]
async fn test_health_reports_components() {
    let dir = tempfile::tempdir().unwrap();

    let full = server(&full_config(dir.path()));
    let body: Value = full.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["text"], true);
    assert_eq!(body["components"]["bot_iso"], true);

    let empty = server(&empty_config(dir.path()));
    let response = empty.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["xss"], false);

    let info: Value = empty.get("/").await.json();
    assert_eq!(info["name"], "ThreatLens");
}

#[tokio::test]
async fn test_text_predict() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    let response = server.post("/bilstm/predict").json(&json!({"text": "SELECT *  FROM users"})).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["input"], "SELECT *  FROM users");
    assert_eq!(results[0]["label"], "sql_injection");
    let confidence = results[0]["confidence"].as_f64().unwrap();
    assert!((confidence - sigmoid(2.0)).abs() < 1e-5);

    let body: Value = server
        .post("/bilstm/predict")
        .json(&json!({"text": ["a", "b", ""]}))
        .await
        .json();
    let inputs: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["input"].as_str().unwrap())
        .collect();
    assert_eq!(inputs, vec!["a", "b", ""]);

    let response = server.post("/bilstm/predict").json(&json!({"text": []})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["detail"].as_str().unwrap().contains("non-empty"));
}

#[tokio::test]
async fn test_text_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));

    // availability is checked before the input
    let response = server.post("/bilstm/predict").json(&json!({"text": []})).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["detail"], "BILSTM model not loaded");
}

#[tokio::test]
async fn test_behaviour_predict() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    let response = server
        .post("/behaviour/predict")
        .json(&json!({"sessions": [
            {"sessn_id": "empty", "events": []},
            {"sessn_id": "known", "events": [
                {"Event": "Click", "page_name": "Home", "browser_type": "Chrome"},
                {"Event": "Scroll", "page_name": "Cart", "browser_type": "Edge"}
            ]}
        ]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions[0]["sessn_id"], "empty");
    assert_eq!(predictions[1]["sessn_id"], "known");
    assert_eq!(predictions[0]["label"], 0);
    let p = predictions[1]["probability"].as_f64().unwrap();
    assert!((p - sigmoid(-1.0)).abs() < 1e-5);

    let response = server.post("/behaviour/predict").json(&json!({"sessions": []})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"], "No sessions provided");
}

#[tokio::test]
async fn test_behaviour_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));
    let response = server
        .post("/behaviour/predict")
        .json(&json!({"sessions": [{"sessn_id": "s", "events": []}]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["detail"], "Behaviour model not loaded");
}

#[tokio::test]
async fn test_bot_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    let body: Value = server.post("/bot/predict/supervised").json(&flow(1234.5)).await.json();
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["prediction_label"], "Bot/Attack");
    assert_eq!(body["model_type"], "rf");
    assert_eq!(body["confidence_kind"], "probability");
    assert!((body["confidence"].as_f64().unwrap() - 0.75).abs() < 1e-9);

    let body: Value = server.post("/bot/predict/unsupervised").json(&flow(10.0)).await.json();
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["prediction_label"], "Normal");
    assert_eq!(body["model_type"], "iso");
    assert_eq!(body["confidence_kind"], "anomaly_magnitude");

    let body: Value = server
        .post("/bot/predict/batch")
        .json(&json!({"flows": [flow(10.0), flow(5000.0)]}))
        .await
        .json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["predictions"][0]["prediction_label"], "Normal");
    assert_eq!(body["predictions"][1]["prediction_label"], "Bot/Attack");

    let body: Value = server
        .post("/bot/predict/batch")
        .json(&json!({"flows": [flow(5000.0)], "model_type": "iso"}))
        .await
        .json();
    assert_eq!(body["predictions"][0]["prediction"], -1);

    let health: Value = server.get("/bot/health").await.json();
    assert_eq!(health, json!({"status": "ok", "rf_loaded": true, "iso_loaded": true}));
}

#[tokio::test]
async fn test_bot_unknown_model_type() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    for body in [
        json!({"flows": [flow(1.0)], "model_type": "svm"}),
        json!({"flows": [], "model_type": "RF"}),
    ] {
        let response = server.post("/bot/predict/batch").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["detail"], "model_type must be 'rf' or 'iso'");
    }
}

#[tokio::test]
async fn test_bot_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));

    let response = server.post("/bot/predict/supervised").json(&flow(1.0)).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["detail"], "RandomForest model not loaded");

    let response = server
        .post("/bot/predict/batch")
        .json(&json!({"flows": [flow(1.0)], "model_type": "iso"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["detail"], "IsolationForest model not loaded");

    let health: Value = server.get("/bot/health").await.json();
    assert_eq!(health["rf_loaded"], false);
}

#[tokio::test]
async fn test_xss_predict() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    let body: Value = server
        .post("/xss/predict")
        .json(&json!({"payload": "<script>alert(1)</script>"}))
        .await
        .json();
    assert_eq!(body["payload"], "<script>alert(1)</script>");
    assert_eq!(body["threshold"], 0.5);
    // sigmoid(0) sits exactly on the default threshold
    assert_eq!(body["pred_label"], 1);

    let body: Value = server
        .post("/xss/predict")
        .add_query_param("threshold", 0.75)
        .json(&json!({"payload": "hello"}))
        .await
        .json();
    assert_eq!(body["pred_label"], 0);
    assert_eq!(body["threshold"], 0.75);

    let body: Value = server
        .post("/xss/predict/batch")
        .add_query_param("threshold", 0.25)
        .json(&json!({"payloads": ["<b>", "plain"]}))
        .await
        .json();
    assert_eq!(body["threshold"], 0.25);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["results"][1]["payload"], "plain");

    let health: Value = server.get("/xss/health").await.json();
    assert_eq!(health, json!({"status": "ok", "maxlen": 50}));

    let info: Value = server.get("/xss").await.json();
    assert_eq!(info["endpoints"]["predict"], "/xss/predict");
}

#[tokio::test]
async fn test_xss_validation() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&full_config(dir.path()));

    let response = server
        .post("/xss/predict")
        .add_query_param("threshold", 1.5)
        .json(&json!({"payload": "x"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server.post("/xss/predict/batch").json(&json!({"payloads": []})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"], "payloads must be a non-empty list");
}

#[tokio::test]
async fn test_xss_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));

    let response = server.post("/xss/predict").json(&json!({"payload": "x"})).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["detail"], "XSS model not loaded");

    let health: Value = server.get("/xss/health").await.json();
    assert_eq!(health, json!({"status": "missing-artifacts", "maxlen": null}));
}

#[tokio::test]
async fn test_extract_features() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));

    let response = server
        .post("/feature/extract_features")
        .json(&json!({"payload": "SELECT * FROM users WHERE 1=1", "ip": "8.8.8.8", "ua": "curl/8.0"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["tokens"], json!(["select", "*", "from", "users", "where", "1", "=", "1"]));
    assert_eq!(body["payload_hash"].as_str().unwrap().len(), 32);
    assert_eq!(body["geo"]["country"], "Unknown");
    assert_eq!(body["geo"]["city"], "Unknown");
    assert!(body["geo"]["latitude"].is_null());
    // no AbuseIPDB key configured
    assert_eq!(body["reputation_score"], 10);
    assert_eq!(body["user_agent"], "curl/8.0");
}

#[tokio::test]
async fn test_extract_features_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));

    let response = server.post("/feature/extract_features").text("definitely not json").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["payload_hash"], "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(body["tokens"], json!([]));
    assert_eq!(body["entropy"], 0.0);
    assert_eq!(body["reputation_score"], 0);
    assert_eq!(body["geo"]["ip"], "");
    assert_eq!(body["user_agent"], "");
}

#[tokio::test]
async fn test_openapi_document() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&empty_config(dir.path()));
    let doc: Value = server.get("/openapi.json").await.json();
    assert!(doc["paths"]["/bot/predict/batch"].is_object());
    assert!(doc["paths"]["/feature/extract_features"].is_object());
}
