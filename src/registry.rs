//! Process-wide cluster endpoint registry.
//!
//! Tracks the known server list, a "current master" hint, and a per-endpoint
//! randomized-exponential back-off clock. All operations are synchronous and
//! infallible; callers hold the lock only for the duration of the operation
//! (no I/O happens under it).

use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const BASE_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BackoffState {
    failures: u32,
    eligible_at: Instant,
}

impl BackoffState {
    fn fresh() -> Self {
        Self {
            failures: 0,
            eligible_at: Instant::now(),
        }
    }
}

/// Computes the randomized exponential back-off for a given failure count.
///
/// `base * 2^failures`, capped at `MAX_BACKOFF`, jittered by a uniform factor
/// in `[0.75, 1.25]`.
fn backoff_delay(failures: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1u32.checked_shl(failures).unwrap_or(u32::MAX));
    let capped = exp.min(MAX_BACKOFF);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    capped.mul_f64(jitter)
}

struct RegistryState {
    known: Vec<String>,
    master: Option<String>,
    backoff: HashMap<String, BackoffState>,
}

/// Process-wide, shared cluster endpoint registry.
///
/// Invariants (spec): the known list is never empty after construction; the
/// master, if set, is always an element of `known`.
pub struct ServerRegistry {
    state: RwLock<RegistryState>,
}

impl ServerRegistry {
    /// Build a registry from the initial `--servers` list. Panics if `servers`
    /// is empty — callers are expected to validate this at config time
    /// (`spec.md` treats an empty `servers` list as a fatal config error).
    pub fn new(servers: Vec<String>) -> Self {
        assert!(!servers.is_empty(), "server registry requires at least one endpoint");
        let mut known = Vec::new();
        for s in servers {
            if !known.contains(&s) {
                known.push(s);
            }
        }
        Self {
            state: RwLock::new(RegistryState {
                known,
                master: None,
                backoff: HashMap::new(),
            }),
        }
    }

    /// Current master (if any) followed by the known list, de-duplicated in
    /// first-occurrence order.
    pub async fn candidates(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut out = Vec::with_capacity(state.known.len() + 1);
        if let Some(master) = &state.master {
            out.push(master.clone());
        }
        for endpoint in &state.known {
            if !out.contains(endpoint) {
                out.push(endpoint.clone());
            }
        }
        out
    }

    /// First candidate whose back-off has expired, or `None` with the
    /// minimum remaining wait across all candidates.
    pub async fn next_eligible(&self, candidates: &[String]) -> Result<String, Duration> {
        let state = self.state.read().await;
        let now = Instant::now();
        let mut min_wait: Option<Duration> = None;
        for endpoint in candidates {
            match state.backoff.get(endpoint) {
                None => return Ok(endpoint.clone()),
                Some(b) if b.eligible_at <= now => return Ok(endpoint.clone()),
                Some(b) => {
                    let wait = b.eligible_at.saturating_duration_since(now);
                    min_wait = Some(min_wait.map_or(wait, |m: Duration| m.min(wait)));
                }
            }
        }
        Err(min_wait.unwrap_or(Duration::ZERO))
    }

    /// Record a failed attempt against `endpoint`: bump the failure count and
    /// push `eligible_at` out per the back-off formula.
    pub async fn mark_failed(&self, endpoint: &str) {
        let mut state = self.state.write().await;
        let entry = state
            .backoff
            .entry(endpoint.to_owned())
            .or_insert_with(BackoffState::fresh);
        entry.failures = entry.failures.saturating_add(1);
        entry.eligible_at = Instant::now() + backoff_delay(entry.failures);
    }

    /// Record a successful response from `endpoint`: reset its back-off and
    /// promote it to current master.
    pub async fn mark_success(&self, endpoint: &str) {
        let mut state = self.state.write().await;
        state.backoff.insert(endpoint.to_owned(), BackoffState::fresh());
        state.master = Some(endpoint.to_owned());
    }

    /// Replace the known list and master from a cluster membership update
    /// (the stream reader's `Ping` handling). Back-off state is preserved for
    /// endpoints still present and dropped for endpoints no longer listed.
    pub async fn update_membership(&self, list: Vec<String>, master: Option<String>) {
        let mut state = self.state.write().await;
        if list.is_empty() {
            // A membership update never empties the known list (spec invariant).
            return;
        }
        let keep: std::collections::HashSet<&String> = list.iter().collect();
        state.backoff.retain(|k, _| keep.contains(k));
        state.known = list;
        state.master = master;
    }
}
