//! Long-poll JSON stream decoder.
//!
//! Runs as a dedicated task for the lifetime of a session: opens
//! `StreamMessages`, decodes `ClusterMessage` objects one at a time,
//! forwards `IRCToClient` payloads to the engine, applies `Ping` membership
//! updates to the registry, and transparently reconnects on decode error,
//! idle timeout, or engine-requested cancellation — carrying `last_seen`
//! across every reconnect so the cluster replays only what was missed.

use crate::protocol::{ClusterMessage, MessageKind};
use crate::registry::ServerRegistry;
use crate::router::Router;
use crate::session_client;
use futures_util::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Marks the endpoint a now-abandoned stream was connected to as failed, so
/// the next reconnect's candidate pick rotates away from it instead of
/// immediately handing back the same (just-promoted-to-master) endpoint.
async fn mark_endpoint_failed(registry: &ServerRegistry, endpoint: &Option<String>) {
    if let Some(endpoint) = endpoint {
        registry.mark_failed(endpoint).await;
    }
}

/// Spawns the stream reader task. Returns immediately; inbound payloads
/// arrive on `inbound_tx` until the channel is closed (which happens once
/// `cancel` is observed and the in-flight response is torn down).
pub fn spawn(
    router: Arc<Router>,
    registry: Arc<ServerRegistry>,
    session_id: String,
    inbound_tx: mpsc::Sender<String>,
    mut cancel: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen: u64 = 0;

        loop {
            if *cancel.borrow() {
                break;
            }

            let resp = tokio::select! {
                biased;
                _ = cancel.changed() => { if *cancel.borrow() { break; } continue; }
                resp = session_client::stream_messages(&router, &session_id, last_seen) => resp,
            };

            let resp = match resp {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "stream open failed, retrying");
                    continue;
                }
            };

            let endpoint = resp.url().host_str().map(|host| match resp.url().port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            });
            if let Some(endpoint) = &endpoint {
                registry.mark_success(endpoint).await;
            }

            let byte_stream = resp
                .bytes_stream()
                .map_err(std::io::Error::other);
            let async_read = tokio_util::io::StreamReader::new(byte_stream);
            let mut decoder = JsonObjectReader::new(async_read);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            drop(decoder);
                            inbound_tx.closed().await; // no-op if already closed
                            return;
                        }
                        continue;
                    }
                    msg = tokio::time::timeout(IDLE_TIMEOUT, decoder.next_object()) => msg,
                };

                let decoded = match next {
                    Err(_elapsed) => {
                        debug!(session_id = %session_id, "stream idle timeout, reconnecting");
                        mark_endpoint_failed(&registry, &endpoint).await;
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "stream decode error, reconnecting");
                        mark_endpoint_failed(&registry, &endpoint).await;
                        break;
                    }
                    Ok(Ok(None)) => {
                        debug!(session_id = %session_id, "stream closed by cluster, reconnecting");
                        mark_endpoint_failed(&registry, &endpoint).await;
                        break;
                    }
                    Ok(Ok(Some(raw))) => raw,
                };

                let message: ClusterMessage = match serde_json::from_str(&decoded) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "malformed stream object, reconnecting");
                        mark_endpoint_failed(&registry, &endpoint).await;
                        break;
                    }
                };

                last_seen = message.id;
                match message.kind {
                    MessageKind::Ping => {
                        if let Some(servers) = message.servers {
                            registry
                                .update_membership(servers, message.current_master)
                                .await;
                        }
                    }
                    MessageKind::IrcToClient => {
                        if let Some(data) = message.data
                            && inbound_tx.send(data).await.is_err()
                        {
                            info!(session_id = %session_id, "engine gone, stopping stream reader");
                            return;
                        }
                    }
                    MessageKind::Unknown => {
                        debug!(session_id = %session_id, id = message.id, "ignoring unknown message type");
                    }
                }
            }
        }
    })
}

/// Incrementally decodes back-to-back JSON objects from an `AsyncRead`
/// without requiring a delimiter between them, mirroring how the cluster
/// streams its message feed.
struct JsonObjectReader<R> {
    inner: tokio::io::BufReader<R>,
    buf: Vec<u8>,
}

impl<R: tokio::io::AsyncRead + Unpin> JsonObjectReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: tokio::io::BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Returns the next decoded object as its raw JSON text, or `None` on
    /// clean EOF with no partial object pending.
    async fn next_object(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some((obj, consumed)) = try_extract_object(&self.buf) {
                self.buf.drain(..consumed);
                return Ok(Some(obj));
            }

            let mut chunk = [0u8; 4096];
            let n = tokio::io::AsyncReadExt::read(&mut self.inner, &mut chunk).await?;
            if n == 0 {
                return if self.buf.iter().all(u8::is_ascii_whitespace) {
                    Ok(None)
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "truncated JSON object at end of stream",
                    ))
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Scans `buf` for one complete, balanced top-level JSON object starting at
/// the first non-whitespace byte. Returns the object text and the number of
/// bytes to drain (including any leading whitespace).
fn try_extract_object(buf: &[u8]) -> Option<(String, usize)> {
    let start = buf.iter().position(|b| !b.is_ascii_whitespace())?;
    if buf[start] != b'{' {
        return None;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = i + 1;
                    let text = String::from_utf8_lossy(&buf[start..end]).into_owned();
                    return Some((text, end));
                }
            }
            _ => {}
        }
    }
    None
}
