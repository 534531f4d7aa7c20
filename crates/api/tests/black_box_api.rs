use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use licensedesk_api::app::{build_app, AppServices};
use licensedesk_auth::{JwtClaims, PrincipalId, Role};
use licensedesk_core::{CompanyId, FixedClock, PlanId, ProductId};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    clock: Arc<FixedClock>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, with a clock the test drives.
        let clock = Arc::new(FixedClock::new(t0()));
        let services = AppServices::in_memory(clock.clone());
        let app = build_app(JWT_SECRET.to_string(), services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            clock,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn send(&self, method: reqwest::Method, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn delete(&self, token: &str, path: &str) -> StatusCode {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .status()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let text = res.text().await.unwrap();
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, body)
}

fn mint_jwt(roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn license_body(extra: Value) -> Value {
    let mut body = json!({
        "product_id": ProductId::new(),
        "plan_id": PlanId::new(),
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }
    body
}

fn invoice_body(number: &str, status: &str, license_ids: Vec<&str>) -> Value {
    json!({
        "invoice_number": number,
        "company_id": CompanyId::new(),
        "payment_method": "bank_transfer",
        "status": status,
        "line_items": [{
            "plan_id": PlanId::new(),
            "description": "Basic",
            "quantity": 1,
            "unit_price": 2999,
            "total": 2999
        }],
        "license_ids": license_ids,
    })
}

#[tokio::test]
async fn health_is_public_and_protected_routes_require_a_token() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    let (status, body) = read(res).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = srv.get("not-a-jwt", "/licenses").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reports_roles_and_resolved_permissions() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::VIEWER]);

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "viewer"));
    let perms = body["permissions"].as_array().unwrap();
    assert!(perms.iter().any(|p| p == "licenses.read"));
    assert!(!perms.iter().any(|p| p == "licenses.write"));
    assert_eq!(body["backend"], "in_memory");
}

#[tokio::test]
async fn viewer_cannot_write_and_unknown_role_cannot_read() {
    let srv = TestServer::spawn().await;

    let viewer = mint_jwt(vec![Role::VIEWER]);
    let (status, body) = srv
        .send(reqwest::Method::POST, &viewer, "/licenses", license_body(json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let stranger = mint_jwt(vec![Role::new("auditor")]);
    let (status, _) = srv.get(&stranger, "/licenses").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn lapsed_active_license_reads_as_expired() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::MANAGER]);

    let expires_at = (t0() + ChronoDuration::days(1)).to_rfc3339();
    let (status, created) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/licenses",
            license_body(json!({ "status": "Active", "expires_at": expires_at })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Active");
    let id = created["id"].as_str().unwrap().to_string();
    let key = created["key"].as_str().unwrap().to_string();

    srv.clock.advance(ChronoDuration::days(2));

    let (status, fetched) = srv.get(&token, &format!("/licenses/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "Expired");

    // The correction was persisted, not just reported.
    let (_, by_key) = srv.get(&token, &format!("/licenses/by-key/{key}")).await;
    assert_eq!(by_key["status"], "Expired");
    let (_, listed) = srv.get(&token, "/licenses?status=expired").await;
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);

    let (status, page) = srv
        .get(&token, &format!("/activity?subject_kind=license&subject_id={id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let changes: Vec<&Value> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["action"] == "license.status_changed")
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["detail"]["from"], "Active");
    assert_eq!(changes[0]["detail"]["to"], "Expired");
}

#[tokio::test]
async fn paying_an_invoice_activates_its_licenses() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::MANAGER]);

    let (_, l1) = srv
        .send(reqwest::Method::POST, &token, "/licenses", license_body(json!({})))
        .await;
    let (_, l2) = srv
        .send(reqwest::Method::POST, &token, "/licenses", license_body(json!({})))
        .await;
    let l1 = l1["id"].as_str().unwrap().to_string();
    let l2 = l2["id"].as_str().unwrap().to_string();

    let (status, invoice) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/invoices",
            invoice_body("INV-1001", "Unpaid", vec![&l1, &l2]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invoice["status"], "Unpaid");
    assert_eq!(invoice["total_amount"], 2999);
    assert_eq!(invoice["license_ids"].as_array().unwrap().len(), 2);
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    for id in [&l1, &l2] {
        let (_, license) = srv.get(&token, &format!("/licenses/{id}")).await;
        assert_eq!(license["status"], "Inactive");
        assert_eq!(license["invoice_id"], invoice_id.as_str());
    }

    let (status, updated) = srv
        .send(
            reqwest::Method::PATCH,
            &token,
            &format!("/invoices/{invoice_id}"),
            json!({ "status": "Paid" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "Paid");

    let (_, listed) = srv
        .get(&token, &format!("/licenses?invoice_id={invoice_id}"))
        .await;
    let items = listed["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|l| l["status"] == "Active"));
}

#[tokio::test]
async fn deleting_an_invoice_deactivates_and_detaches_licenses() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::ADMIN]);

    let (_, license) = srv
        .send(reqwest::Method::POST, &token, "/licenses", license_body(json!({})))
        .await;
    let license_id = license["id"].as_str().unwrap().to_string();

    let (_, invoice) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/invoices",
            invoice_body("INV-2001", "Paid", vec![&license_id]),
        )
        .await;
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (_, active) = srv.get(&token, &format!("/licenses/{license_id}")).await;
    assert_eq!(active["status"], "Active");

    let status = srv.delete(&token, &format!("/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = srv.get(&token, &format!("/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, license) = srv.get(&token, &format!("/licenses/{license_id}")).await;
    assert_eq!(license["status"], "Inactive");
    assert_eq!(license["invoice_id"], Value::Null);
}

#[tokio::test]
async fn rejects_bad_input_with_error_envelope() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::MANAGER]);

    let (status, body) = srv.get(&token, "/licenses/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");

    let (status, body) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/licenses",
            license_body(json!({ "status": "Revoked" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let mut bad_total = invoice_body("INV-3001", "Unpaid", vec![]);
    bad_total["line_items"][0]["total"] = json!(1);
    let (status, body) = srv
        .send(reqwest::Method::POST, &token, "/invoices", bad_total)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv
        .send(reqwest::Method::POST, &token, "/invoices", json!({ "invoice_number": 7 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn duplicate_invoice_number_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::MANAGER]);

    let (status, _) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/invoices",
            invoice_body("INV-4001", "Unpaid", vec![]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = srv
        .send(
            reqwest::Method::POST,
            &token,
            "/invoices",
            invoice_body("INV-4001", "Paid", vec![]),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn missing_license_is_not_found() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::VIEWER]);

    let (status, body) = srv
        .get(&token, &format!("/licenses/{}", uuid::Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
