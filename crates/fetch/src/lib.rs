//! Rate-limited HTTP fetcher.
//!
//! One [`Fetcher`] per external source. Every request is paced so that no two
//! calls to the same source happen closer together than the source's
//! configured delay; the free public APIs behind this gateway have no
//! server-side auth, so politeness is enforced client-side. Transport faults,
//! non-2xx statuses, and unparseable payloads all come back as [`FetchError`],
//! never as a panic or a raw reqwest error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "atlas-map-agent/0.1";

/// Errors produced at the fetcher boundary. Every variant names the source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{source_name}: request failed: {cause}")]
    Transport { source_name: String, cause: String },

    #[error("{source_name}: HTTP {status}")]
    Status {
        source_name: String,
        status: reqwest::StatusCode,
    },

    #[error("{source_name}: malformed response payload: {cause}")]
    Payload { source_name: String, cause: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Immutable per-source parameters. Built once at startup, shared read-only.
#[derive(Debug, Clone)]
pub struct ServerParams {
    /// Short identifier for the source, used in error messages and logs.
    pub name: String,
    /// Human description of what the source provides.
    pub description: String,
    /// Base URL requests are issued against.
    pub base_url: String,
    /// Minimum spacing between two requests to this source.
    pub rate_limit_delay: Duration,
}

impl ServerParams {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        base_url: impl Into<String>,
        rate_limit_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            base_url: base_url.into(),
            rate_limit_delay,
        }
    }
}

/// Rate-limited JSON fetcher for a single source.
///
/// The last-call instant is guarded by an async mutex held across the whole
/// attempt, so concurrent calls to the same source serialize and pace
/// themselves, while fetchers for different sources proceed independently.
pub struct Fetcher {
    params: ServerParams,
    client: reqwest::Client,
    last_call: Mutex<Option<Instant>>,
    attempts: AtomicU64,
}

impl Fetcher {
    pub fn new(params: ServerParams) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            params,
            client,
            last_call: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &ServerParams {
        &self.params
    }

    /// Number of request attempts made so far, successful or not. Lets tests
    /// assert that validation failures issue no network call.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// GET `base_url + path` with a query string, expecting a JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.params.base_url, path);
        let request = self.client.get(&url).query(query);
        self.request_json(request, &url).await
    }

    /// POST `base_url + path` as a form, expecting a JSON body.
    pub async fn post_form_json(&self, path: &str, form: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.params.base_url, path);
        let request = self.client.post(&url).form(form);
        self.request_json(request, &url).await
    }

    async fn request_json(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Value> {
        // Lock held across the attempt: same-source callers queue up here and
        // each pays the pacing delay relative to the previous attempt.
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.params.rate_limit_delay {
                let wait = self.params.rate_limit_delay - elapsed;
                debug!(source = %self.params.name, ?wait, "pacing before request");
                tokio::time::sleep(wait).await;
            }
        }

        // Recorded at issue time, before awaiting the response: a caller
        // dropped mid-flight has still issued a request, and the next call
        // must pace itself against it. Failures count for the same reason.
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *last_call = Some(Instant::now());
        debug!(source = %self.params.name, %url, "issuing request");
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.map_err(|e| FetchError::Transport {
            source_name: self.params.name.clone(),
            cause: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                source_name: self.params.name.clone(),
                status,
            });
        }

        response.json().await.map_err(|e| FetchError::Payload {
            source_name: self.params.name.clone(),
            cause: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_fetcher(name: &str, delay: Duration) -> Fetcher {
        // Nothing listens on port 9; connections fail fast without leaving
        // the machine, which is all the pacing tests need.
        Fetcher::new(ServerParams::new(
            name,
            "test source",
            "http://127.0.0.1:9",
            delay,
        ))
    }

    #[test]
    fn error_messages_name_the_source() {
        let err = FetchError::Status {
            source_name: "nominatim".to_string(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        assert_eq!(err.to_string(), "nominatim: HTTP 502 Bad Gateway");

        let err = FetchError::Transport {
            source_name: "osrm".to_string(),
            cause: "connection refused".to_string(),
        };
        assert!(err.to_string().starts_with("osrm: request failed"));
    }

    #[tokio::test]
    async fn failed_attempts_are_counted_and_paced() {
        let fetcher = unreachable_fetcher("test", Duration::from_millis(200));
        assert_eq!(fetcher.attempts(), 0);

        let started = Instant::now();
        assert!(fetcher.get_json("/a", &[]).await.is_err());
        assert!(fetcher.get_json("/b", &[]).await.is_err());
        let elapsed = started.elapsed();

        assert_eq!(fetcher.attempts(), 2);
        // Second attempt must wait out the configured delay even though the
        // first one failed.
        assert!(
            elapsed >= Duration::from_millis(200),
            "two same-source calls completed in {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn different_sources_do_not_wait_on_each_other() {
        let a = unreachable_fetcher("a", Duration::from_millis(200));
        let b = unreachable_fetcher("b", Duration::from_millis(200));

        let started = Instant::now();
        tokio::join!(
            async {
                let _ = a.get_json("/1", &[]).await;
                let _ = a.get_json("/2", &[]).await;
            },
            async {
                let _ = b.get_json("/1", &[]).await;
                let _ = b.get_json("/2", &[]).await;
            },
        );
        let elapsed = started.elapsed();

        assert_eq!(a.attempts(), 2);
        assert_eq!(b.attempts(), 2);
        // Each source pays one delay; running them in parallel must not
        // stack up to two.
        assert!(
            elapsed < Duration::from_millis(390),
            "independent sources serialized: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn cancelled_in_flight_call_still_paces_the_next() {
        // A listener that accepts connections but never responds, so the
        // first request stalls until its caller is aborted.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    open.push(socket);
                }
            }
        });

        let fetcher = std::sync::Arc::new(Fetcher::new(ServerParams::new(
            "stall",
            "test source",
            format!("http://{addr}"),
            Duration::from_millis(300),
        )));

        let in_flight = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.get_json("/slow", &[]).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetcher.attempts(), 1);
        in_flight.abort();
        let _ = in_flight.await;

        // The second call also stalls, so measure when its request is
        // issued (the attempt counter ticks) rather than when it finishes.
        let started = Instant::now();
        let follow_up = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.get_json("/next", &[]).await }
        });
        while fetcher.attempts() < 2 {
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "second request was never issued"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let issued_after = started.elapsed();
        follow_up.abort();

        // First request was issued ~100ms before the abort; the second must
        // still wait out the remainder of the 300ms window.
        assert!(
            issued_after >= Duration::from_millis(150),
            "pacing skipped after a cancelled attempt: {issued_after:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_same_source_calls_serialize() {
        let fetcher = std::sync::Arc::new(unreachable_fetcher("c", Duration::from_millis(150)));

        let started = Instant::now();
        let f1 = fetcher.clone();
        let f2 = fetcher.clone();
        tokio::join!(
            async move {
                let _ = f1.get_json("/1", &[]).await;
            },
            async move {
                let _ = f2.get_json("/2", &[]).await;
            },
        );
        let elapsed = started.elapsed();

        assert_eq!(fetcher.attempts(), 2);
        assert!(
            elapsed >= Duration::from_millis(150),
            "same-source concurrency was not paced: {elapsed:?}"
        );
    }
}
