//! Forwarding pipeline
//!
//! Wraps one upstream exchange with three stages:
//! - director: reads the client body, drops inbound credentials, picks a key
//!   and attaches it as the `key` query parameter
//! - transport: tracks the in-flight gauge and latency around the exchange
//! - classification: turns the result into an [`Outcome`] and records it
//!
//! Failed exchanges are never retried with another key.

use crate::services::key_pool::{ApiKey, KeyPool};
use crate::services::stats::{record_outcome, ErrorEvent, GlobalStats, Outcome};
use crate::utils::{with_timeout, TimeoutError};
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::{redirect::Policy, Client, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter carrying the API key upstream
pub const KEY_QUERY_PARAM: &str = "key";

/// Body sent to the client when the upstream could not be reached
pub const BAD_GATEWAY_BODY: &str = "Proxy encountered an error";

/// Largest client body buffered before forwarding (32MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// ============================================================================
// Error Types
// ============================================================================

/// Network-level failure while talking to the upstream
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // The URL carries the key, keep it out of messages
        Self::Http(err.without_url())
    }
}

impl From<TimeoutError<TransportError>> for TransportError {
    fn from(err: TimeoutError<TransportError>) -> Self {
        match err {
            TimeoutError::Timeout(after) => Self::Timeout(after),
            TimeoutError::Inner(inner) => inner,
        }
    }
}

/// Request refused before it reached the upstream
#[derive(Error, Debug)]
pub enum DirectorError {
    #[error("{method} requests cannot be forwarded")]
    UnsupportedMethod { method: Method },

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Inbound request as received from the client
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
}

impl From<Request> for ProxyRequest {
    fn from(request: Request) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        }
    }
}

/// Outbound request handed to an [`UpstreamTransport`]
#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream response with a streaming body
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// An outbound request together with the key the director attached to it
///
/// Both halves are private so the attached key always matches the `key`
/// parameter in the URL.
#[derive(Debug)]
pub struct DirectedRequest {
    request: UpstreamRequest,
    key: Option<Arc<ApiKey>>,
    path: String,
}

impl DirectedRequest {
    pub fn url(&self) -> &Url {
        &self.request.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// Original inbound path, used for error attribution
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attached_key(&self) -> Option<&Arc<ApiKey>> {
        self.key.as_ref()
    }

    /// The key parameter as it appears in the outbound URL
    pub fn attached_secret(&self) -> Option<String> {
        self.request
            .url
            .query_pairs()
            .find(|(name, _)| name == KEY_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    }

    /// Whether the attached key is the one carried by the URL
    pub fn attached_key_matches_url(&self) -> bool {
        self.attached_secret().as_deref() == self.key.as_deref().map(ApiKey::secret)
    }

    fn into_parts(self) -> (UpstreamRequest, Option<Arc<ApiKey>>, String) {
        (self.request, self.key, self.path)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Performs one HTTP exchange with the upstream
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// [`UpstreamTransport`] backed by a pooled `reqwest` client
///
/// Response bodies are streamed back as they arrive. Redirects are handed to
/// the client as-is.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        // The outbound URL carries the key: never follow a Location or
        // send it on as a Referer
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(Policy::none())
            .referer(false)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Director, transport wrapper and classifier around one upstream exchange
pub struct ForwardingPipeline {
    pool: Arc<KeyPool>,
    stats: Arc<GlobalStats>,
    transport: Arc<dyn UpstreamTransport>,
    upstream: Url,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ForwardingPipeline {
    pub fn new(
        pool: Arc<KeyPool>,
        stats: Arc<GlobalStats>,
        transport: Arc<dyn UpstreamTransport>,
        upstream: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            stats,
            transport,
            upstream,
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Limit on the client body buffered before forwarding
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<GlobalStats> {
        &self.stats
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Build the outbound request and attach the next key
    ///
    /// When every key is disabled the request still goes out, without a key,
    /// so the upstream rejection is classified and recorded like any other
    /// failure. The body is read before a key is chosen, so an unreadable or
    /// oversized body never advances the rotation.
    pub async fn direct(&self, request: ProxyRequest) -> Result<DirectedRequest, DirectorError> {
        let ProxyRequest {
            method,
            path,
            query,
            mut headers,
            body,
        } = request;

        if method == Method::CONNECT {
            return Err(DirectorError::UnsupportedMethod { method });
        }

        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(DirectorError::RequestBody)?;

        headers.remove(header::AUTHORIZATION);
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        let key = match self.pool.select() {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Forwarding without an API key");
                None
            }
        };

        let url = upstream_url(
            &self.upstream,
            &path,
            query.as_deref(),
            key.as_deref().map(ApiKey::secret),
        );

        Ok(DirectedRequest {
            request: UpstreamRequest {
                method,
                url,
                headers,
                body,
            },
            key,
            path,
        })
    }

    /// Perform the exchange, then classify and record it
    pub async fn round_trip(
        &self,
        directed: DirectedRequest,
    ) -> Result<UpstreamResponse, TransportError> {
        let (request, key, path) = directed.into_parts();
        let _in_flight = self.stats.begin_request();

        let started = Instant::now();
        let result = with_timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(TransportError::from);
        let latency = started.elapsed();

        let outcome = classify(&result, &path, key.as_deref());
        match &outcome {
            Outcome::Success => tracing::debug!(
                path = %path,
                latency_ms = latency.as_millis() as u64,
                "Upstream request succeeded"
            ),
            Outcome::Failure(event) => match &result {
                Err(err) => tracing::error!(
                    path = %path,
                    key = %event.key_id,
                    error = %err,
                    "Upstream transport error"
                ),
                Ok(response) => tracing::warn!(
                    path = %path,
                    key = %event.key_id,
                    status = response.status.as_u16(),
                    "Upstream returned an error status"
                ),
            },
        }
        record_outcome(&self.stats, key.as_deref(), outcome, latency);

        result
    }

    /// Forward one client request and produce the client response
    pub async fn forward(&self, request: ProxyRequest) -> Response {
        let path = request.path.clone();
        let directed = match self.direct(request).await {
            Ok(directed) => directed,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Request rejected by director");
                record_outcome(
                    &self.stats,
                    None,
                    Outcome::Failure(ErrorEvent::director(&path, err.to_string())),
                    Duration::ZERO,
                );
                return bad_gateway();
            }
        };

        match self.round_trip(directed).await {
            Ok(response) => response.into_response(),
            Err(_) => bad_gateway(),
        }
    }
}

/// Classify the result of one exchange
pub fn classify(
    result: &Result<UpstreamResponse, TransportError>,
    path: &str,
    key: Option<&ApiKey>,
) -> Outcome {
    let key_id = key.map(ApiKey::display_id);
    match result {
        Err(err) => Outcome::Failure(ErrorEvent::transport(path, key_id, err.to_string())),
        Ok(response) if response.status.is_success() => Outcome::Success,
        Ok(response) => Outcome::Failure(ErrorEvent::status(path, key_id, response.status)),
    }
}

/// Join the inbound path onto the upstream base and set the key parameter
///
/// Any `key` parameter sent by the client is dropped. The client's query
/// string is left byte-for-byte intact when nothing needs to change.
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>, secret: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query);

    let has_client_key = url.query_pairs().any(|(name, _)| name == KEY_QUERY_PARAM);
    if secret.is_none() && !has_client_key {
        return url;
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != KEY_QUERY_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if retained.is_empty() && secret.is_none() {
        url.set_query(None);
        return url;
    }

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(&retained);
        if let Some(secret) = secret {
            pairs.append_pair(KEY_QUERY_PARAM, secret);
        }
    }
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(HeaderName::from_static(name));
    }
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, BAD_GATEWAY_BODY).into_response()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stats::{ErrorKind, ErrorStage, NO_KEY_ID};
    use axum::{extract::RawQuery, http::HeaderValue, routing::get, Router};
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies with a fixed status and remembers what it was sent
    struct MockTransport {
        /// `None` fails the exchange
        reply: Option<StatusCode>,
        delay: Duration,
        seen: Mutex<Vec<(Method, Url, HeaderMap)>>,
    }

    impl MockTransport {
        fn status(status: StatusCode) -> Self {
            Self {
                reply: Some(status),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                reply: Some(StatusCode::OK),
                delay,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UpstreamTransport for MockTransport {
        async fn send(
            &self,
            request: UpstreamRequest,
        ) -> Result<UpstreamResponse, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.method, request.url, request.headers));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Some(status) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("x-upstream", HeaderValue::from_static("yes"));
                    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
                    Ok(UpstreamResponse {
                        status,
                        headers,
                        body: Body::from("upstream body"),
                    })
                }
                None => Err(TransportError::Timeout(Duration::from_secs(1))),
            }
        }
    }

    fn pipeline_with(transport: Arc<MockTransport>, secrets: &[&str]) -> ForwardingPipeline {
        ForwardingPipeline::new(
            Arc::new(KeyPool::new(secrets.iter().copied()).unwrap()),
            Arc::new(GlobalStats::default()),
            transport,
            Url::parse("https://generativelanguage.googleapis.com").unwrap(),
            Duration::from_millis(200),
        )
    }

    fn request(method: Method, path: &str, query: Option<&str>) -> ProxyRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8081"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ProxyRequest {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            body: Body::from("{}"),
        }
    }

    fn generate(path_query: Option<&str>) -> ProxyRequest {
        request(
            Method::POST,
            "/v1beta/models/gemini-pro:generateContent",
            path_query,
        )
    }

    #[test]
    fn test_upstream_url_join_and_key() {
        let base = Url::parse("https://example.com").unwrap();
        let url = upstream_url(&base, "/v1beta/models", Some("pageSize=5"), Some("secret-1"));
        assert_eq!(
            url.as_str(),
            "https://example.com/v1beta/models?pageSize=5&key=secret-1"
        );

        let prefixed = Url::parse("https://example.com/api/").unwrap();
        let url = upstream_url(&prefixed, "/v1/models", None, None);
        assert_eq!(url.as_str(), "https://example.com/api/v1/models");
    }

    #[test]
    fn test_upstream_url_replaces_client_key() {
        let base = Url::parse("https://example.com").unwrap();
        let url = upstream_url(&base, "/v1", Some("key=client&alt=sse"), Some("ours"));
        assert_eq!(url.as_str(), "https://example.com/v1?alt=sse&key=ours");

        let url = upstream_url(&base, "/v1", Some("key=client"), None);
        assert_eq!(url.as_str(), "https://example.com/v1");
    }

    #[test]
    fn test_upstream_url_keeps_raw_query_untouched() {
        let base = Url::parse("https://example.com").unwrap();
        let url = upstream_url(&base, "/v1", Some("q=a%20b"), None);
        assert_eq!(url.query(), Some("q=a%20b"));
    }

    #[test]
    fn test_upstream_url_stays_on_upstream_host() {
        let base = Url::parse("https://example.com").unwrap();
        let url = upstream_url(&base, "//evil.example/v1", None, Some("secret"));
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_director_injects_key_and_strips_authorization() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK));
        let pipeline = pipeline_with(transport, &["secret-AAAAA", "secret-BBBBB"]);

        let directed = pipeline.direct(generate(Some("alt=sse"))).await.unwrap();
        assert!(directed.headers().get(header::AUTHORIZATION).is_none());
        assert!(directed.headers().get(header::HOST).is_none());
        assert_eq!(
            directed.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(directed.attached_secret().as_deref(), Some("secret-AAAAA"));
        assert_eq!(
            directed.attached_key().unwrap().secret(),
            directed.attached_secret().unwrap()
        );
        assert!(directed.attached_key_matches_url());
        assert_eq!(directed.url().host_str(), Some("generativelanguage.googleapis.com"));

        let next = pipeline.direct(generate(None)).await.unwrap();
        assert_eq!(next.attached_secret().as_deref(), Some("secret-BBBBB"));
    }

    #[tokio::test]
    async fn test_director_fails_open_when_exhausted() {
        let transport = Arc::new(MockTransport::status(StatusCode::FORBIDDEN));
        let pipeline = pipeline_with(Arc::clone(&transport), &["secret-AAAAA"]);
        pipeline.pool().set_enabled("secret-AAAAA", false).unwrap();

        let response = pipeline.forward(generate(None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].1.query_pairs().any(|(k, _)| k == KEY_QUERY_PARAM));

        let snapshot = pipeline.stats().snapshot();
        assert_eq!(snapshot.total_attempts, 1);
        assert_eq!(snapshot.total_failures, 1);
        assert_eq!(snapshot.recent_errors[0].key_id, NO_KEY_ID);
        assert_eq!(pipeline.pool().snapshot()[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_success_passes_response_through() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK));
        let pipeline = pipeline_with(transport, &["secret-AAAAA"]);

        let response = pipeline.forward(generate(None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        assert!(response.headers().get(header::CONNECTION).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"upstream body");

        let key = &pipeline.pool().snapshot()[0];
        assert_eq!((key.attempts, key.successes, key.failures), (1, 1, 0));
        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_successes, 1);
        assert!(totals.recent_errors.is_empty());
        assert_eq!(totals.active_in_flight, 0);
    }

    #[tokio::test]
    async fn test_error_status_is_recorded_and_passed_through() {
        let transport = Arc::new(MockTransport::status(StatusCode::TOO_MANY_REQUESTS));
        let pipeline = pipeline_with(transport, &["secret-AAAAA"]);

        let response = pipeline.forward(generate(None)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_failures, 1);
        let event = &totals.recent_errors[0];
        assert_eq!(event.stage, ErrorStage::Response);
        assert_eq!(event.kind, ErrorKind::Status { code: 429 });
        assert_eq!(event.key_id, "...AAAAA");
        assert_eq!(event.model, "gemini-pro");
        assert_eq!(pipeline.pool().snapshot()[0].failures, 1);
    }

    #[tokio::test]
    async fn test_transport_error_returns_bad_gateway() {
        let transport = Arc::new(MockTransport::failing());
        let pipeline = pipeline_with(transport, &["secret-AAAAA"]);

        let response = pipeline.forward(generate(None)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_attempts, 1);
        assert_eq!(totals.recent_errors[0].stage, ErrorStage::Transport);
        assert_eq!(totals.recent_errors[0].kind, ErrorKind::Transport);
        assert_eq!(pipeline.pool().snapshot()[0].failures, 1);
        assert_eq!(totals.active_in_flight, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_classified_as_transport_error() {
        let transport = Arc::new(MockTransport::slow(Duration::from_secs(5)));
        let pipeline = pipeline_with(transport, &["secret-AAAAA"]);

        let response = pipeline.forward(generate(None)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_failures, 1);
        assert!(totals.recent_errors[0].message.contains("timed out"));
        assert_eq!(totals.active_in_flight, 0);
    }

    #[tokio::test]
    async fn test_connect_is_rejected_by_director() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK));
        let pipeline = pipeline_with(Arc::clone(&transport), &["secret-AAAAA"]);

        let response = pipeline.forward(request(Method::CONNECT, "/", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(transport.seen.lock().unwrap().is_empty());

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_attempts, 1);
        assert_eq!(totals.recent_errors[0].stage, ErrorStage::Director);
        assert_eq!(pipeline.pool().snapshot()[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_rotation_across_forwarded_requests() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK));
        let pipeline = pipeline_with(
            Arc::clone(&transport),
            &["secret-AAAAA", "secret-BBBBB", "secret-CCCCC"],
        );

        for _ in 0..6 {
            pipeline.forward(generate(None)).await;
        }

        let attempts: Vec<u64> = pipeline.pool().snapshot().iter().map(|k| k.attempts).collect();
        assert_eq!(attempts, vec![2, 2, 2]);
        assert_eq!(pipeline.stats().snapshot().total_attempts, 6);
    }

    #[tokio::test]
    async fn test_in_flight_visible_during_exchange() {
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(100)));
        let pipeline = Arc::new(pipeline_with(transport, &["secret-AAAAA"]));

        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.forward(generate(None)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pipeline.stats().in_flight(), 1);

        task.await.unwrap();
        assert_eq!(pipeline.stats().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_key_selection() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK));
        let pipeline = pipeline_with(Arc::clone(&transport), &["secret-AAAAA", "secret-BBBBB"])
            .with_max_body_bytes(8);

        let mut oversized = generate(None);
        oversized.body = Body::from("{\"contents\":[{\"parts\":[]}]}");
        let response = pipeline.forward(oversized).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(transport.seen.lock().unwrap().is_empty());

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_attempts, 1);
        assert_eq!(totals.active_in_flight, 0);
        let event = &totals.recent_errors[0];
        assert_eq!(event.stage, ErrorStage::Director);
        assert_eq!(event.key_id, NO_KEY_ID);
        assert!(event.message.contains("request body"));
        assert!(pipeline.pool().snapshot().iter().all(|k| k.attempts == 0));

        // The rotation did not move
        let directed = pipeline.direct(generate(None)).await.unwrap();
        assert_eq!(directed.attached_secret().as_deref(), Some("secret-AAAAA"));
    }

    // ------------------------------------------------------------------------
    // Against a local upstream over real sockets
    // ------------------------------------------------------------------------

    async fn spawn_upstream(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    /// Counts every request it receives, whatever the path
    async fn spawn_counting_upstream() -> (Url, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().fallback(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "landed"
            }
        });
        (spawn_upstream(router).await, hits)
    }

    async fn spawn_gemini_like(elsewhere: Url) -> Url {
        let away = elsewhere.join("/landing").unwrap().to_string();
        let router = Router::new()
            .route(
                "/v1/stream",
                get(|| async {
                    Body::from_stream(stream::iter([
                        Ok::<_, std::io::Error>("chunk-1,"),
                        Ok("chunk-2"),
                    ]))
                }),
            )
            .route(
                "/v1/echo",
                get(|RawQuery(query): RawQuery| async move { query.unwrap_or_default() }),
            )
            .route(
                "/v1/missing",
                get(|| async { (StatusCode::NOT_FOUND, "no such model") }),
            )
            .route(
                "/v1/redirect",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/v1/stream")]) }),
            )
            .route(
                "/v1/away",
                get(move || {
                    let away = away.clone();
                    async move { (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, away)]) }
                }),
            );
        spawn_upstream(router).await
    }

    fn live_pipeline(upstream: Url) -> ForwardingPipeline {
        ForwardingPipeline::new(
            Arc::new(KeyPool::new(["secret-AAAAA"]).unwrap()),
            Arc::new(GlobalStats::default()),
            Arc::new(ReqwestTransport::new(Duration::from_secs(2)).unwrap()),
            upstream,
            Duration::from_secs(5),
        )
    }

    fn fetch(path: &str) -> ProxyRequest {
        ProxyRequest {
            method: Method::GET,
            path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_live_streamed_success() {
        let (elsewhere, _) = spawn_counting_upstream().await;
        let pipeline = live_pipeline(spawn_gemini_like(elsewhere).await);

        let response = pipeline.forward(fetch("/v1/stream")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "chunk-1,chunk-2");

        let response = pipeline.forward(fetch("/v1/echo")).await;
        assert_eq!(body_text(response).await, "key=secret-AAAAA");

        let key = &pipeline.pool().snapshot()[0];
        assert_eq!((key.attempts, key.successes, key.failures), (2, 2, 0));
    }

    #[tokio::test]
    async fn test_live_client_error_passes_through() {
        let (elsewhere, _) = spawn_counting_upstream().await;
        let pipeline = live_pipeline(spawn_gemini_like(elsewhere).await);

        let response = pipeline.forward(fetch("/v1/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "no such model");

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_failures, 1);
        assert_eq!(totals.recent_errors[0].kind, ErrorKind::Status { code: 404 });
        assert_eq!(totals.recent_errors[0].key_id, "...AAAAA");
    }

    #[tokio::test]
    async fn test_live_redirect_is_not_followed() {
        let (elsewhere, _) = spawn_counting_upstream().await;
        let pipeline = live_pipeline(spawn_gemini_like(elsewhere).await);

        let response = pipeline.forward(fetch("/v1/redirect")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/v1/stream");

        let totals = pipeline.stats().snapshot();
        assert_eq!(totals.total_successes, 0);
        assert_eq!(totals.total_failures, 1);
        assert_eq!(totals.recent_errors[0].kind, ErrorKind::Status { code: 302 });
        assert_eq!(pipeline.pool().snapshot()[0].failures, 1);
    }

    #[tokio::test]
    async fn test_live_redirect_never_reaches_other_host() {
        let (elsewhere, hits) = spawn_counting_upstream().await;
        let pipeline = live_pipeline(spawn_gemini_like(elsewhere.clone()).await);

        let response = pipeline.forward(fetch("/v1/away")).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with(elsewhere.as_str()));
        assert!(!location.contains("secret-AAAAA"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_refused_connection_hides_key() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let pipeline = live_pipeline(Url::parse(&format!("http://{}", closed)).unwrap());

        let response = pipeline.forward(fetch("/v1/stream")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, BAD_GATEWAY_BODY);

        let totals = pipeline.stats().snapshot();
        let event = &totals.recent_errors[0];
        assert_eq!(event.stage, ErrorStage::Transport);
        assert_eq!(event.kind, ErrorKind::Transport);
        assert_eq!(event.key_id, "...AAAAA");
        assert!(!event.message.contains("secret-AAAAA"));
        assert_eq!(pipeline.pool().snapshot()[0].failures, 1);
    }
}
