//! Dispatch-layer and wire-protocol tests: every request is one JSON
//! envelope in, one JSON document out, errors included.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use recall::embedding::{Embedder, HashEmbedder};
use recall::server::{handle_request, MemoryServer};
use recall::MemoryStore;

const DIM: usize = 128;

fn fixture() -> (TempDir, MemoryStore, HashEmbedder) {
    let dir = tempdir().unwrap();
    let store = MemoryStore::open(&dir.path().join("memories.redb"), DIM, true).unwrap();
    (dir, store, HashEmbedder::new(DIM))
}

fn call(store: &MemoryStore, embedder: &HashEmbedder, endpoint: &str, params: Value) -> Value {
    let raw = json!({ "endpoint": endpoint, "params": params }).to_string();
    handle_request(store, embedder, &raw)
}

fn is_success(response: &Value) -> bool {
    response.get("success").and_then(Value::as_bool) == Some(true)
}

#[test]
fn add_then_search_roundtrip() {
    let (_dir, store, embedder) = fixture();

    let added = call(
        &store,
        &embedder,
        "/add",
        json!({ "content": "User prefers 2-space indentation", "category": "preference" }),
    );
    assert!(is_success(&added), "add failed: {added}");
    let id = added.get("id").and_then(Value::as_str).unwrap().to_string();
    assert!(id.starts_with("mem_"));

    let found = call(
        &store,
        &embedder,
        "/search",
        json!({ "query": "User prefers 2-space indentation", "top_k": 1 }),
    );
    assert!(is_success(&found));
    let results = found.get("results").and_then(Value::as_array).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get("id").and_then(Value::as_str).unwrap(), id);
    assert_eq!(
        results[0].get("content").and_then(Value::as_str).unwrap(),
        "User prefers 2-space indentation"
    );
    assert!(results[0].get("score").and_then(Value::as_f64).unwrap() < 0.1);
}

#[test]
fn add_defaults_category_to_general() {
    let (_dir, store, embedder) = fixture();

    let added = call(&store, &embedder, "/add", json!({ "content": "no category given" }));
    assert!(is_success(&added));

    let found = call(
        &store,
        &embedder,
        "/search",
        json!({ "query": "no category given", "top_k": 1 }),
    );
    let results = found.get("results").and_then(Value::as_array).unwrap();
    assert_eq!(
        results[0].get("category").and_then(Value::as_str).unwrap(),
        "general"
    );
}

#[test]
fn search_defaults_top_k_to_five() {
    let (_dir, store, embedder) = fixture();

    for i in 0..8 {
        let added = call(
            &store,
            &embedder,
            "/add",
            json!({ "content": format!("memory number {i}"), "id": format!("m{i}") }),
        );
        assert!(is_success(&added));
    }

    let found = call(&store, &embedder, "/search", json!({ "query": "memory number 0" }));
    assert!(is_success(&found));
    assert_eq!(
        found.get("results").and_then(Value::as_array).unwrap().len(),
        5
    );
}

#[test]
fn required_params_are_enforced() {
    let (_dir, store, embedder) = fixture();

    for (endpoint, params) in [
        ("/add", json!({})),
        ("/add", json!({ "content": "" })),
        ("/search", json!({})),
        ("/update", json!({ "id": "x" })),
        ("/update", json!({ "content": "x" })),
        ("/remove", json!({})),
        ("/update_preference", json!({ "value": "dark" })),
        ("/get_preference", json!({})),
    ] {
        let response = call(&store, &embedder, endpoint, params);
        assert!(!is_success(&response), "{endpoint} accepted bad params");
        assert!(response.get("error").and_then(Value::as_str).is_some());
    }
}

#[test]
fn non_positive_top_k_is_rejected() {
    let (_dir, store, embedder) = fixture();
    for top_k in [0, -3] {
        let response = call(
            &store,
            &embedder,
            "/search",
            json!({ "query": "anything", "top_k": top_k }),
        );
        assert!(!is_success(&response));
    }
}

#[test]
fn duplicate_add_reports_failure() {
    let (_dir, store, embedder) = fixture();

    let first = call(
        &store,
        &embedder,
        "/add",
        json!({ "content": "first", "id": "dup" }),
    );
    assert!(is_success(&first));

    let second = call(
        &store,
        &embedder,
        "/add",
        json!({ "content": "second", "id": "dup" }),
    );
    assert!(!is_success(&second));
    assert_eq!(store.size().unwrap(), 1);
}

#[test]
fn update_and_remove_flow() {
    let (_dir, store, embedder) = fixture();

    call(&store, &embedder, "/add", json!({ "content": "original", "id": "u" }));

    let updated = call(
        &store,
        &embedder,
        "/update",
        json!({ "id": "u", "content": "rewritten" }),
    );
    assert!(is_success(&updated));

    let found = call(&store, &embedder, "/search", json!({ "query": "rewritten", "top_k": 1 }));
    let results = found.get("results").and_then(Value::as_array).unwrap();
    assert_eq!(results[0].get("content").and_then(Value::as_str).unwrap(), "rewritten");

    let removed = call(&store, &embedder, "/remove", json!({ "id": "u" }));
    assert!(is_success(&removed));
    assert_eq!(store.size().unwrap(), 0);

    let again = call(&store, &embedder, "/remove", json!({ "id": "u" }));
    assert!(!is_success(&again));
}

#[test]
fn preference_endpoints_roundtrip() {
    let (_dir, store, embedder) = fixture();

    let set = call(
        &store,
        &embedder,
        "/update_preference",
        json!({ "key": "theme", "value": "dark" }),
    );
    assert!(is_success(&set));

    let got = call(&store, &embedder, "/get_preference", json!({ "key": "theme" }));
    assert!(is_success(&got));
    assert_eq!(got.get("value").and_then(Value::as_str).unwrap(), "dark");

    // Omitted value defaults to the empty string
    let cleared = call(&store, &embedder, "/update_preference", json!({ "key": "theme" }));
    assert!(is_success(&cleared));
    let got = call(&store, &embedder, "/get_preference", json!({ "key": "theme" }));
    assert_eq!(got.get("value").and_then(Value::as_str).unwrap(), "");

    // Missing keys read the same as empty ones
    let missing = call(&store, &embedder, "/get_preference", json!({ "key": "nope" }));
    assert!(is_success(&missing));
    assert_eq!(missing.get("value").and_then(Value::as_str).unwrap(), "");
}

#[test]
fn unknown_endpoint_and_bad_json_are_reported() {
    let (_dir, store, embedder) = fixture();

    let unknown = call(&store, &embedder, "/nope", json!({}));
    assert!(!is_success(&unknown));

    let garbage = handle_request(&store, &embedder, "this is not json");
    assert!(!is_success(&garbage));
    assert!(garbage
        .get("error")
        .and_then(Value::as_str)
        .unwrap()
        .contains("JSON parse error"));
}

async fn roundtrip(addr: &str, request: Value) -> Value {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(request.to_string().as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    serde_json::from_slice(&response).unwrap()
}

#[tokio::test]
async fn socket_roundtrip_with_graceful_shutdown() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::open(&dir.path().join("memories.redb"), DIM, true).unwrap(),
    );
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));

    let server = MemoryServer::bind("127.0.0.1:0", store.clone(), embedder)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serving = tokio::spawn(server.serve(shutdown_rx));

    let added = roundtrip(
        &addr,
        json!({ "endpoint": "/add", "params": { "content": "over the wire" } }),
    )
    .await;
    assert!(is_success(&added), "add over socket failed: {added}");

    let found = roundtrip(
        &addr,
        json!({ "endpoint": "/search", "params": { "query": "over the wire", "top_k": 1 } }),
    )
    .await;
    assert!(is_success(&found));
    let results = found.get("results").and_then(Value::as_array).unwrap();
    assert_eq!(
        results[0].get("content").and_then(Value::as_str).unwrap(),
        "over the wire"
    );

    shutdown_tx.send(true).unwrap();
    serving.await.unwrap();

    assert_eq!(store.size().unwrap(), 1);
}
