//! Auxiliary TCP request sink.
//!
//! Accepts line-delimited JSON requests of the shape `{"type": "..."}` on a
//! configured port and returns canned responses. Its purpose duplicates the
//! tool surface and is undefined beyond the `ping`/`suggest`/`execute`
//! contract; this module preserves exactly that contract and nothing more.
//! Binding happens synchronously in [`bind`] so a configured port that can't
//! be acquired is fatal at startup, before the accept loop in [`serve`] ever
//! runs in the background.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Bind the configured port. Callers should treat failure as fatal at
/// startup rather than retrying or silently skipping the sink.
pub async fn bind(port: u16) -> Result<TcpListener, String> {
    TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| format!("failed to bind auxiliary port {port}: {e}"))
}

/// Serve requests on an already-bound `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> Result<(), String> {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    tracing::info!(port, "auxiliary request sink listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "auxiliary connection accepted");
                        tokio::spawn(handle_connection(stream));
                    }
                    Err(e) => tracing::warn!(error = %e, "auxiliary accept failed"),
                }
            }
            () = shutdown.cancelled() => {
                tracing::info!("auxiliary request sink shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "auxiliary connection read error");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatch(&line);
        let mut out = response.to_string();
        out.push('\n');
        if write_half.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn dispatch(line: &str) -> Value {
    let parsed: Result<Value, _> = serde_json::from_str(line);
    let request = match parsed {
        Ok(v) => v,
        Err(_) => return json!({"ok": false, "error": "invalid JSON request"}),
    };

    match request.get("type").and_then(Value::as_str) {
        Some("ping") => json!({"ok": true}),
        Some("suggest") | Some("execute") => json!({"ok": false, "error": "not implemented over this channel"}),
        Some(other) => json!({"ok": false, "error": format!("unknown request type '{other}'")}),
        None => json!({"ok": false, "error": "request missing 'type' field"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_returns_ok_true() {
        assert_eq!(dispatch(r#"{"type":"ping"}"#), json!({"ok": true}));
    }

    #[test]
    fn suggest_and_execute_are_not_implemented() {
        let suggest = dispatch(r#"{"type":"suggest"}"#);
        let execute = dispatch(r#"{"type":"execute"}"#);
        assert_eq!(suggest["ok"], json!(false));
        assert_eq!(execute["ok"], json!(false));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let response = dispatch("not json");
        assert_eq!(response["ok"], json!(false));
    }

    #[tokio::test]
    async fn bind_rejects_a_port_already_in_use() {
        let held = bind(0).await.unwrap();
        let port = held.local_addr().unwrap().port();
        let result = bind(port).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bind_and_ping_round_trip() {
        use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};

        let shutdown = CancellationToken::new();
        let listener = bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shutdown_clone = shutdown.clone();
        let server = tokio::spawn(serve(listener, shutdown_clone));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{\"type\":\"ping\"}\n").await.unwrap();
        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        assert_eq!(response.trim(), r#"{"ok":true}"#);

        shutdown.cancel();
        let _ = server.await;
    }
}
