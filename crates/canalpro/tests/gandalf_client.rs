use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, routing::post};
use serde_json::{Value, json};

use imobcrm_canalpro::{ApiAuth, CanalProError, GandalfClient, GandalfConfig, MarketplaceApi};
use imobcrm_core::RetryPolicy;

/// Scripted responses, returned in order; the last one repeats.
#[derive(Clone)]
struct Script {
    responses: Arc<Vec<(StatusCode, Value)>>,
    hits: Arc<AtomicUsize>,
    seen: Arc<std::sync::Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn graphql(State(script): State<Script>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let n = script.hits.fetch_add(1, Ordering::SeqCst);
    script.seen.lock().unwrap().push((headers, body));
    let idx = n.min(script.responses.len() - 1);
    let (status, body) = script.responses[idx].clone();
    (status, Json(body))
}

struct MockServer {
    url: String,
    script: Script,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    async fn spawn(responses: Vec<(StatusCode, Value)>) -> Self {
        let script = Script {
            responses: Arc::new(responses),
            hits: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let app = Router::new().route("/graphql", post(graphql)).with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}/graphql"),
            script,
            handle,
        }
    }

    fn hits(&self) -> usize {
        self.script.hits.load(Ordering::SeqCst)
    }

    fn client(&self, max_retries: u32) -> GandalfClient {
        GandalfClient::new(GandalfConfig {
            api_url: self.url.clone(),
            domain: "www.canalpro.com.br".into(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::fixed(max_retries, Duration::from_millis(5)),
        })
        .unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn token_response() -> Value {
    json!({"data": {"login": {"accessToken": "acc-1", "refreshToken": "ref-1", "expiresIn": 3600}}})
}

#[tokio::test]
async fn login_sends_graphql_body_and_headers() {
    let srv = MockServer::spawn(vec![(StatusCode::OK, token_response())]).await;
    let session = srv.client(0).login("me@agency.com", "pw", "device-42").await.unwrap();

    assert_eq!(session.access_token, "acc-1");
    assert_eq!(session.refresh_token.as_deref(), Some("ref-1"));
    assert!(session.expires_at > chrono::Utc::now() + chrono::Duration::minutes(59));

    let seen = srv.script.seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(headers["x-deviceid"], "device-42");
    assert_eq!(headers["x-domain"], "www.canalpro.com.br");
    assert!(headers.get("authorization").is_none());
    assert!(body["query"].as_str().unwrap().contains("login("));
    assert_eq!(body["variables"]["email"], "me@agency.com");
}

#[tokio::test]
async fn listing_calls_carry_bearer_token() {
    let srv = MockServer::spawn(vec![(
        StatusCode::OK,
        json!({"data": {"republishListing": {"id": "L-1", "updatedAt": "2026-01-02T03:04:05Z"}}}),
    )])
    .await;
    let at = srv
        .client(0)
        .republish_listing(&ApiAuth::new("acc-9", "dev"), "L-1")
        .await
        .unwrap();
    assert_eq!(at.to_rfc3339(), "2026-01-02T03:04:05+00:00");

    let seen = srv.script.seen.lock().unwrap();
    assert_eq!(seen[0].0["authorization"], "Bearer acc-9");
    assert_eq!(seen[0].1["variables"]["id"], "L-1");
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let srv = MockServer::spawn(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        (StatusCode::TOO_MANY_REQUESTS, json!({})),
        (StatusCode::OK, token_response()),
    ])
    .await;
    let session = srv.client(3).login("a@b.c", "pw", "dev").await.unwrap();
    assert_eq!(session.access_token, "acc-1");
    assert_eq!(srv.hits(), 3);
}

#[tokio::test]
async fn retries_stop_at_policy_limit() {
    let srv = MockServer::spawn(vec![(StatusCode::BAD_GATEWAY, json!({}))]).await;
    let err = srv.client(2).login("a@b.c", "pw", "dev").await.unwrap_err();
    assert!(matches!(err, CanalProError::Http { status: 502, .. }));
    assert_eq!(srv.hits(), 3);
}

#[tokio::test]
async fn unauthenticated_is_not_retried() {
    let srv = MockServer::spawn(vec![(
        StatusCode::OK,
        json!({"errors": [{"message": "jwt expired", "extensions": {"code": "UNAUTHENTICATED"}}]}),
    )])
    .await;
    let err = srv
        .client(5)
        .republish_listing(&ApiAuth::new("old", "dev"), "L-1")
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(srv.hits(), 1);

    let srv = MockServer::spawn(vec![(StatusCode::UNAUTHORIZED, json!({}))]).await;
    let err = srv.client(5).refresh_session("r", "dev").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(srv.hits(), 1);
}

#[tokio::test]
async fn graphql_validation_errors_surface_as_graphql() {
    let srv = MockServer::spawn(vec![(
        StatusCode::OK,
        json!({"errors": [{"message": "zipCode is invalid"}], "data": null}),
    )])
    .await;
    let err = srv.client(5).login("a@b.c", "pw", "dev").await.unwrap_err();
    assert_eq!(err, CanalProError::GraphQl("zipCode is invalid".into()));
    assert_eq!(srv.hits(), 1);
}

#[tokio::test]
async fn refresh_keeps_old_refresh_token_when_not_rotated() {
    let srv = MockServer::spawn(vec![(
        StatusCode::OK,
        json!({"data": {"refreshToken": {"accessToken": "acc-2", "expiresIn": 600}}}),
    )])
    .await;
    let session = srv.client(0).refresh_session("ref-keep", "dev").await.unwrap();
    assert_eq!(session.access_token, "acc-2");
    assert_eq!(session.refresh_token.as_deref(), Some("ref-keep"));
}
