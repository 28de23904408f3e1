//! Session-scoped cluster operations: thin wrappers over the [`Router`] for
//! the four HTTP endpoints in the cluster's session API.

use crate::protocol::{CreateSessionResponse, DeleteSessionRequest};
use crate::router::{Router, RouterError};
use reqwest::{Method, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("router: {0}")]
    Router(#[from] RouterError),
    #[error("malformed session-creation response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reading response body: {0}")]
    Body(#[from] reqwest::Error),
}

/// A freshly-created cluster session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub prefix: String,
}

/// `POST /robustirc/v1/session` with an empty body.
pub async fn create_session(router: &Router) -> Result<NewSession, SessionError> {
    let resp = router
        .send(Method::POST, "/robustirc/v1/session", vec![])
        .await?;
    let bytes = resp.bytes().await?;
    let parsed: CreateSessionResponse = serde_json::from_slice(&bytes)?;
    Ok(NewSession {
        session_id: parsed.session_id,
        prefix: parsed.prefix,
    })
}

/// `DELETE /robustirc/v1/{sessionid}` with the quit message. The response
/// body is discarded; failures are logged by the caller, not propagated.
pub async fn delete_session(
    router: &Router,
    session_id: &str,
    quit_message: &str,
) -> Result<(), SessionError> {
    let path = format!("/robustirc/v1/{session_id}");
    let body = serde_json::to_vec(&DeleteSessionRequest {
        quit_message: quit_message.to_owned(),
    })
    .expect("DeleteSessionRequest always serializes");
    let resp = router.send(Method::DELETE, &path, body).await?;
    let _ = resp.bytes().await;
    Ok(())
}

/// `POST /robustirc/v1/{sessionid}/message` with the raw IRC line bytes.
/// The response body is closed immediately without being read.
pub async fn post_message(
    router: &Router,
    session_id: &str,
    line: Vec<u8>,
) -> Result<(), SessionError> {
    let path = format!("/robustirc/v1/{session_id}/message");
    let resp = router.send(Method::POST, &path, line).await?;
    let _ = resp.bytes().await;
    Ok(())
}

/// `GET /robustirc/v1/{sessionid}/messages?lastseen={id}`. Returns the open
/// response for the caller to decode a JSON object stream from.
pub async fn stream_messages(
    router: &Router,
    session_id: &str,
    last_seen: u64,
) -> Result<Response, SessionError> {
    let path = format!("/robustirc/v1/{session_id}/messages?lastseen={last_seen}");
    let resp = router.send(Method::GET, &path, vec![]).await?;
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServerRegistry;
    use axum::Router as AxumRouter;
    use axum::routing::post;
    use std::sync::Arc;

    async fn spawn(router: AxumRouter) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn create_session_parses_sessionid_and_prefix() {
        let app = AxumRouter::new().route(
            "/robustirc/v1/session",
            post(|| async { r#"{"Sessionid":"s1","Prefix":"nick!u@h"}"# }),
        );
        let addr = spawn(app).await;
        let registry = Arc::new(ServerRegistry::new(vec![addr]));
        let router = Router::new(registry);
        let session = create_session(&router).await.unwrap();
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.prefix, "nick!u@h");
    }
}
