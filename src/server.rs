use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::embedding::Embedder;
use crate::model::{now_millis, MemoryRecord};
use crate::MemoryStore;

// 64 KiB request cap. A request is one JSON document, terminated by
// client half-close or by filling the buffer.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Single-shot JSON request/response server over TCP.
///
/// Each connection carries exactly one request. The embedding producer
/// lives here, not in the engine: `/add`, `/search`, and `/update` turn
/// text into a vector before the engine ever sees it.
pub struct MemoryServer {
    listener: TcpListener,
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryServer {
    pub async fn bind(
        addr: &str,
        store: Arc<MemoryStore>,
        embedder: Arc<dyn Embedder>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, store, embedder })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then stop accepting and drain the
    /// in-flight connections before returning.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, _)) => {
                        let store = self.store.clone();
                        let embedder = self.embedder.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_client(socket, store, embedder).await {
                                // Expected disconnections keep out of the logs
                                if e.kind() != io::ErrorKind::UnexpectedEof {
                                    warn!(error = %e, "client connection failed");
                                }
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }

        drop(self.listener);
        if !connections.is_empty() {
            info!(in_flight = connections.len(), "draining connections");
        }
        while connections.join_next().await.is_some() {}
    }
}

async fn handle_client(
    mut stream: TcpStream,
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
) -> io::Result<()> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let mut filled = 0;

    while filled < buffer.len() {
        let n = stream.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let request = String::from_utf8_lossy(&buffer[..filled]).into_owned();

    // Every engine call may block for time proportional to store size
    // (update/remove rebuild the index), so keep it off the reactor.
    let response = tokio::task::spawn_blocking(move || {
        handle_request(&store, embedder.as_ref(), &request)
    })
    .await
    .unwrap_or_else(|e| error_response(&format!("internal error: {e}")));

    stream.write_all(response.to_string().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Decode one request envelope and dispatch it. Always produces a
/// response document; every failure maps to `{success: false, error}`.
pub fn handle_request(store: &MemoryStore, embedder: &dyn Embedder, raw: &str) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return error_response(&format!("JSON parse error: {e}")),
    };

    let endpoint = request.get("endpoint").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    match endpoint {
        "/add" => handle_add(store, embedder, &params),
        "/search" => handle_search(store, embedder, &params),
        "/update" => handle_update(store, embedder, &params),
        "/remove" => handle_remove(store, &params),
        "/update_preference" => handle_update_preference(store, &params),
        "/get_preference" => handle_get_preference(store, &params),
        other => error_response(&format!("Unknown endpoint: {other}")),
    }
}

fn string_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or("")
}

fn error_response(message: &str) -> Value {
    json!({ "success": false, "error": message })
}

fn handle_add(store: &MemoryStore, embedder: &dyn Embedder, params: &Value) -> Value {
    let content = string_param(params, "content");
    if content.is_empty() {
        return error_response("content is required");
    }
    let category = params
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("general");
    let id = string_param(params, "id");

    let record = MemoryRecord::new(
        id.to_string(),
        content.to_string(),
        category.to_string(),
        now_millis(),
        embedder.embed(content),
    );

    match store.add(record) {
        Ok(id) => json!({ "success": true, "id": id }),
        Err(e) => error_response(&e.to_string()),
    }
}

fn handle_search(store: &MemoryStore, embedder: &dyn Embedder, params: &Value) -> Value {
    let query = string_param(params, "query");
    if query.is_empty() {
        return error_response("query is required");
    }
    let top_k = params.get("top_k").and_then(Value::as_i64).unwrap_or(5);
    if top_k <= 0 {
        return error_response("top_k must be positive");
    }

    match store.search(&embedder.embed(query), top_k as usize) {
        Ok(results) => json!({ "success": true, "results": results }),
        Err(e) => error_response(&e.to_string()),
    }
}

fn handle_update(store: &MemoryStore, embedder: &dyn Embedder, params: &Value) -> Value {
    let id = string_param(params, "id");
    let content = string_param(params, "content");
    if id.is_empty() || content.is_empty() {
        return error_response("id and content are required");
    }

    match store.update(id, content, embedder.embed(content)) {
        Ok(()) => json!({ "success": true }),
        Err(e) => error_response(&e.to_string()),
    }
}

fn handle_remove(store: &MemoryStore, params: &Value) -> Value {
    let id = string_param(params, "id");
    if id.is_empty() {
        return error_response("id is required");
    }

    match store.remove(id) {
        Ok(()) => json!({ "success": true }),
        Err(e) => error_response(&e.to_string()),
    }
}

fn handle_update_preference(store: &MemoryStore, params: &Value) -> Value {
    let key = string_param(params, "key");
    if key.is_empty() {
        return error_response("key is required");
    }
    let value = string_param(params, "value");

    match store.put_preference(key, value) {
        Ok(()) => json!({ "success": true }),
        Err(e) => error_response(&e.to_string()),
    }
}

fn handle_get_preference(store: &MemoryStore, params: &Value) -> Value {
    let key = string_param(params, "key");
    if key.is_empty() {
        return error_response("key is required");
    }

    match store.get_preference(key) {
        Ok(value) => json!({ "success": true, "value": value }),
        Err(e) => error_response(&e.to_string()),
    }
}
