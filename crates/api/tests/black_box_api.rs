use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use imobcrm_api::app::{build_app, services::AppServices};
use imobcrm_auth::{JwtClaims, Role};
use imobcrm_canalpro::{InMemoryMarketplace, MarketplaceApi};
use imobcrm_core::{TenantId, UserId};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";
const MARKET_EMAIL: &str = "corretor@imobiliaria.com.br";
const MARKET_PASSWORD: &str = "canalpro-pass";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    market: Arc<InMemoryMarketplace>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let market = Arc::new(InMemoryMarketplace::new().with_account(MARKET_EMAIL, MARKET_PASSWORD));
        let api: Arc<dyn MarketplaceApi> = market.clone();
        let services = Arc::new(AppServices::in_memory(JWT_SECRET, api));

        // Build app (same router as prod), but bind to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            market,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, method: reqwest::Method, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        let text = res.text().await.unwrap();
        let body = if text.is_empty() { Value::Null } else { serde_json::from_str(&text).unwrap_or(Value::String(text)) };
        (status, body)
    }

    async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.send(reqwest::Method::GET, path, Some(token), None).await
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, Some(token), Some(body)).await
    }

    async fn patch(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::PATCH, path, Some(token), Some(body)).await
    }

    /// Sign up a new agency and return `(token, tenant_id)`.
    async fn signup(&self, agency: &str, email: &str, plan: &str) -> (String, String) {
        let (status, body) = self
            .send(
                reqwest::Method::POST,
                "/auth/signup",
                None,
                Some(json!({
                    "agency_name": agency,
                    "display_name": "Dona Maria",
                    "email": email,
                    "password": "s3nha-forte",
                    "plan": plan,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["tenant_id"].as_str().unwrap().to_string(),
        )
    }

    async fn connect_marketplace(&self, token: &str) {
        let (status, body) = self
            .post(
                "/integrations/canalpro/connect",
                token,
                json!({ "email": MARKET_EMAIL, "password": MARKET_PASSWORD, "remember": true }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    /// Create an active property and return its id.
    async fn active_property(&self, token: &str) -> String {
        let (status, body) = self.post("/properties", token, property_draft()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = self
            .patch(&format!("/properties/{id}"), token, json!({ "status": "active" }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id
    }

    async fn job_eventually(&self, token: &str, job_id: &str) -> Value {
        for _ in 0..100 {
            let (status, body) = self.get(&format!("/refresh-jobs/{job_id}"), token).await;
            assert_eq!(status, StatusCode::OK, "{body}");
            let job_status = body["job"]["status"].as_str().unwrap();
            if job_status == "completed" || job_status == "failed" {
                return body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("refresh job did not finish within timeout");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn property_draft() -> Value {
    json!({
        "title": "Apartamento 3 quartos em Boa Viagem",
        "description": "Vista mar",
        "business_type": "sale",
        "property_type": "apartment",
        "address": {
            "street": "Av. Boa Viagem",
            "number": "3000",
            "neighborhood": "Boa Viagem",
            "city": "Recife",
            "state": "pe",
            "zip_code": "51020-000"
        },
        "sale_price": 95_000_000,
        "bedrooms": 3,
        "suites": 1,
        "usable_area": 110.0,
        "amenities": ["pool", "gym"]
    })
}

fn mint_jwt(tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        tenant_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_is_public_and_protected_endpoints_need_a_token() {
    let srv = TestServer::spawn().await;

    let (status, _) = srv.send(reqwest::Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv.send(reqwest::Method::GET, "/whoami", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn tokens_for_unknown_users_are_rejected() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::ADMIN]);

    let (status, _) = srv.get("/whoami", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_login_and_whoami() {
    let srv = TestServer::spawn().await;
    let (token, tenant_id) = srv.signup("Imobiliária Recife", "maria@recife.com.br", "basic").await;

    let (status, body) = srv.get("/whoami", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"], tenant_id);
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));

    let login = |password: &'static str| {
        srv.send(
            reqwest::Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "MARIA@recife.com.br ", "password": password })),
        )
    };
    let (status, _) = login("wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = login("s3nha-forte").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"], tenant_id);
    assert!(body["user"].get("password_hash").is_none());

    let (status, body) = srv
        .send(
            reqwest::Method::POST,
            "/auth/signup",
            None,
            Some(json!({
                "agency_name": "Outra",
                "display_name": "Outra Pessoa",
                "email": "maria@recife.com.br",
                "password": "s3nha-forte",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn publish_refresh_and_unpublish_a_listing() {
    let srv = TestServer::spawn().await;
    let (token, _) = srv.signup("Imobiliária Olinda", "ana@olinda.com.br", "basic").await;
    srv.connect_marketplace(&token).await;

    let (status, body) = srv.get("/integrations/canalpro/status", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
    assert_eq!(body["connection"]["automatic_renewal"], true);

    let id = srv.active_property(&token).await;

    let (status, body) = srv.post(&format!("/properties/{id}/publish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sync_status"], "synced");
    assert!(body["external_id"].is_string());
    assert_eq!(srv.market.calls("create_listing"), 1);

    let (status, job) = srv.post(&format!("/properties/{id}/refresh"), &token, json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{job}");
    let finished = srv.job_eventually(&token, job["id"].as_str().unwrap()).await;
    assert_eq!(finished["job"]["status"], "completed");
    assert_eq!(finished["job"]["succeeded"], 1);
    assert_eq!(finished["history"].as_array().unwrap().len(), 1);
    assert_eq!(srv.market.calls("republish_listing"), 1);

    let (status, body) = srv.post(&format!("/properties/{id}/unpublish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["external_id"].is_null());
    assert_eq!(srv.market.listing_count(), 0);
}

#[tokio::test]
async fn publishing_requires_an_active_listing_and_a_connection() {
    let srv = TestServer::spawn().await;
    let (token, _) = srv.signup("Imobiliária Caruaru", "joao@caruaru.com.br", "basic").await;

    let (_, body) = srv.post("/properties", &token, property_draft()).await;
    let draft_id = body["id"].as_str().unwrap().to_string();
    let (status, body) = srv.post(&format!("/properties/{draft_id}/publish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invariant_violation");

    let id = srv.active_property(&token).await;
    let (status, body) = srv.post(&format!("/properties/{id}/publish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "integration_not_connected");
}

#[tokio::test]
async fn tenants_cannot_see_each_others_data() {
    let srv = TestServer::spawn().await;
    let (token_a, _) = srv.signup("Agência A", "a@a.com.br", "basic").await;
    let (token_b, _) = srv.signup("Agência B", "b@b.com.br", "basic").await;

    let id = srv.active_property(&token_a).await;

    let (status, _) = srv.get(&format!("/properties/{id}"), &token_b).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = srv.patch(&format!("/properties/{id}"), &token_b, json!({ "title": "hijack" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = srv.get("/properties", &token_b).await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn schedules_run_and_record_history() {
    let srv = TestServer::spawn().await;
    let (token, _) = srv.signup("Imobiliária Paulista", "carla@paulista.com.br", "basic").await;
    srv.connect_marketplace(&token).await;
    let id = srv.active_property(&token).await;
    let (status, _) = srv.post(&format!("/properties/{id}/publish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, schedule) = srv
        .post(
            "/schedules",
            &token,
            json!({
                "name": "manhã",
                "time_slot": "09:00:00",
                "frequency": { "kind": "daily" },
                "target": { "kind": "properties", "property_ids": [id] },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{schedule}");
    assert!(schedule["next_run"].is_string());
    let sid = schedule["id"].as_str().unwrap().to_string();

    let (status, job) = srv.post(&format!("/schedules/{sid}/run"), &token, json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{job}");
    let finished = srv.job_eventually(&token, job["id"].as_str().unwrap()).await;
    assert_eq!(finished["job"]["status"], "completed");

    let (_, history) = srv.get(&format!("/schedules/{sid}/history"), &token).await;
    let rows = history["items"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "success");

    let (_, jobs) = srv.get(&format!("/refresh-jobs?schedule_id={sid}"), &token).await;
    assert_eq!(jobs["items"].as_array().unwrap().len(), 1);

    let (status, body) = srv.post(&format!("/schedules/{sid}/deactivate"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["next_run"].is_null());
    let (status, _) = srv.post(&format!("/schedules/{sid}/run"), &token, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn schedules_reject_foreign_properties_and_respect_the_plan() {
    let srv = TestServer::spawn().await;
    let (token_free, _) = srv.signup("Agência Free", "free@x.com.br", "free").await;
    let (token_basic, _) = srv.signup("Agência Basic", "basic@x.com.br", "basic").await;
    let foreign = srv.active_property(&token_free).await;

    let draft = |ids: Vec<String>| {
        json!({
            "name": "noite",
            "time_slot": "21:00:00",
            "frequency": { "kind": "every_hours", "hours": 6 },
            "target": { "kind": "properties", "property_ids": ids },
        })
    };

    let (status, body) = srv.post("/schedules", &token_basic, draft(vec![foreign.clone()])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv.post("/schedules", &token_free, draft(vec![foreign])).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "plan_limit_exceeded");
}

#[tokio::test]
async fn roles_are_enforced_and_suspension_revokes_access() {
    let srv = TestServer::spawn().await;
    let (admin, _) = srv.signup("Agência Roles", "admin@roles.com.br", "basic").await;

    let (status, user) = srv
        .post(
            "/admin/users",
            &admin,
            json!({
                "email": "viewer@roles.com.br",
                "display_name": "Visitante",
                "password": "visitante123",
                "roles": ["viewer"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{user}");
    let user_id = user["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .send(
            reqwest::Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "viewer@roles.com.br", "password": "visitante123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let viewer = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = srv.get("/properties", &viewer).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = srv.post("/properties", &viewer, property_draft()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = srv.post(&format!("/admin/users/{user_id}/suspend"), &admin, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = srv.get("/properties", &viewer).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn billing_changes_gate_marketplace_sync() {
    let srv = TestServer::spawn().await;
    let (token, _) = srv.signup("Agência Billing", "billing@x.com.br", "basic").await;
    srv.connect_marketplace(&token).await;
    let id = srv.active_property(&token).await;

    let (status, body) = srv.get("/billing/subscription", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription"]["status"], "trialing");
    assert_eq!(body["usage"]["properties"], 1);
    assert_eq!(body["entitled"], true);

    let (status, body) = srv.post("/billing/plan", &token, json!({ "plan": "pro" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription"]["plan"], "pro");

    let (status, body) = srv.post("/billing/cancel", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entitled"], false);

    let (status, body) = srv.post(&format!("/properties/{id}/publish"), &token, json!({})).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "plan_limit_exceeded");
}

#[tokio::test]
async fn partners_see_shared_listings() {
    let srv = TestServer::spawn().await;
    let (token_a, _) = srv.signup("Agência Norte", "norte@x.com.br", "basic").await;
    let (token_b, tenant_b) = srv.signup("Agência Sul", "sul@x.com.br", "basic").await;
    let property = srv.active_property(&token_a).await;

    let (status, partnership) = srv
        .post(
            "/partnerships",
            &token_a,
            json!({ "partner_tenant_id": tenant_b, "message": "vamos vender juntos" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{partnership}");
    let pid = partnership["id"].as_str().unwrap().to_string();

    let (status, _) = srv.post(&format!("/partnerships/{pid}/accept"), &token_a, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = srv.post(&format!("/partnerships/{pid}/accept"), &token_b, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (status, _) = srv
        .post(&format!("/partnerships/{pid}/share"), &token_a, json!({ "property_id": property }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, shared) = srv.get("/partnerships/shared-properties", &token_b).await;
    let items = shared["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["property"]["id"], property);

    let (_, own_view) = srv.get("/partnerships/shared-properties", &token_a).await;
    assert!(own_view["items"].as_array().unwrap().is_empty());

    let (status, _) = srv.post(&format!("/partnerships/{pid}/revoke"), &token_b, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, shared) = srv.get("/partnerships/shared-properties", &token_b).await;
    assert!(shared["items"].as_array().unwrap().is_empty());
}
