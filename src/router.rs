//! Cluster-aware request router.
//!
//! Sends one logical request against the cluster, trying candidates from the
//! [`ServerRegistry`] in order, following 307 redirects, and retrying
//! transport/non-200 failures with the registry's back-off forever — there is
//! no attempt cap. The only way out for a pathological cluster is the
//! caller's future being dropped (e.g. the IRC connection closing).

use crate::registry::ServerRegistry;
use reqwest::{Method, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("307 redirect with missing or unparseable Location header")]
    BadRedirect,
}

/// Thin wrapper over a `reqwest::Client` plus the shared registry.
pub struct Router {
    http: reqwest::Client,
    registry: Arc<ServerRegistry>,
}

impl Router {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { http, registry }
    }

    /// Send a logical request for `path` against the cluster, returning the
    /// first 200 response received. `body` is sent with
    /// `Content-Type: application/json` on every attempt.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Response, RouterError> {
        let mut candidates = self.registry.candidates().await;
        let mut path = path.to_owned();

        loop {
            let endpoint = loop {
                match self.registry.next_eligible(&candidates).await {
                    Ok(endpoint) => break endpoint,
                    Err(wait) => {
                        tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                    }
                }
            };

            let url = format!("http://{endpoint}{path}");
            let response = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match response {
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "transport error, retrying");
                    self.registry.mark_failed(&endpoint).await;
                }
                Ok(resp) if resp.status() == StatusCode::TEMPORARY_REDIRECT => {
                    let location = resp
                        .headers()
                        .get(reqwest::header::LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    drop(resp);
                    let Some(location) = location else {
                        return Err(RouterError::BadRedirect);
                    };
                    let Ok(redirect_url) = reqwest::Url::parse(&location) else {
                        return Err(RouterError::BadRedirect);
                    };
                    let Some(host) = redirect_url.host_str() else {
                        return Err(RouterError::BadRedirect);
                    };
                    let redirect_endpoint = match redirect_url.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host.to_owned(),
                    };
                    path = format!(
                        "{}{}",
                        redirect_url.path(),
                        redirect_url
                            .query()
                            .map(|q| format!("?{q}"))
                            .unwrap_or_default()
                    );
                    self.registry.mark_failed(&endpoint).await;
                    if !candidates.contains(&redirect_endpoint) {
                        candidates.insert(0, redirect_endpoint.clone());
                    } else {
                        candidates.retain(|c| c != &redirect_endpoint);
                        candidates.insert(0, redirect_endpoint.clone());
                    }
                }
                Ok(resp) if resp.status().is_success() => {
                    self.registry.mark_success(&endpoint).await;
                    return Ok(resp);
                }
                Ok(resp) => {
                    warn!(endpoint = %endpoint, status = %resp.status(), "non-200, retrying");
                    // Drain and close the body before continuing.
                    let _ = resp.bytes().await;
                    self.registry.mark_failed(&endpoint).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router as AxumRouter, routing::{get, post}};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    async fn spawn_server(router: AxumRouter) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn send_succeeds_against_first_eligible_endpoint() {
        let app = AxumRouter::new().route("/ok", get(|| async { "hi" }));
        let addr = spawn_server(app).await;

        let registry = StdArc::new(ServerRegistry::new(vec![addr.clone()]));
        let router = Router::new(registry.clone());
        let resp = router.send(Method::GET, "/ok", vec![]).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn send_retries_on_non_200_then_succeeds() {
        let counter = StdArc::new(AtomicUsize::new(0));
        let c2 = counter.clone();
        let app = AxumRouter::new().route(
            "/flaky",
            get(move || {
                let c = c2.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        (StatusCode::INTERNAL_SERVER_ERROR, "nope")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }
            }),
        );
        let addr = spawn_server(app).await;
        let registry = StdArc::new(ServerRegistry::new(vec![addr]));
        let router = Router::new(registry);
        let resp = router.send(Method::GET, "/flaky", vec![]).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn send_follows_redirect_to_new_endpoint() {
        let app_b = AxumRouter::new().route("/robustirc/v1/session", post(|| async { "{}" }));
        let addr_b = spawn_server(app_b).await;

        let location = format!("http://{addr_b}/robustirc/v1/session");
        let app_a = AxumRouter::new().route(
            "/robustirc/v1/session",
            post(move || {
                let location = location.clone();
                async move {
                    (
                        StatusCode::TEMPORARY_REDIRECT,
                        [(reqwest::header::LOCATION.as_str(), location)],
                        "",
                    )
                }
            }),
        );
        let addr_a = spawn_server(app_a).await;

        let registry = StdArc::new(ServerRegistry::new(vec![addr_a.clone(), addr_b.clone()]));
        let router = Router::new(registry.clone());
        let resp = router
            .send(Method::POST, "/robustirc/v1/session", vec![])
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let candidates = registry.candidates().await;
        assert_eq!(candidates.first(), Some(&addr_b));
    }

    #[tokio::test]
    async fn send_fails_fast_on_redirect_without_location() {
        let app = AxumRouter::new().route(
            "/x",
            get(|| async { StatusCode::TEMPORARY_REDIRECT }),
        );
        let addr = spawn_server(app).await;
        let registry = StdArc::new(ServerRegistry::new(vec![addr]));
        let router = Router::new(registry);
        let err = router.send(Method::GET, "/x", vec![]).await.unwrap_err();
        assert!(matches!(err, RouterError::BadRedirect));
    }
}
