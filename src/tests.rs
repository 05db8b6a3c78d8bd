//! Integration tests for the ordering backend.

use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{Config, LogFormat};
use crate::db::{init_database, Repository};
use crate::search::SearchIndex;
use crate::{create_router, AppState};

const API_KEY: &str = "test-api-key";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some(API_KEY.to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            default_company: None,
        };

        let state = AppState {
            repo: repo.clone(),
            search,
            config: Arc::new(config),
        };

        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            repo,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a company and return its admin's id.
    async fn create_company(&self, prefix: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/companies"))
            .json(&json!({
                "name": format!("{} Corp", prefix),
                "dnsPrefix": prefix,
                "primaryColor": "#123abc",
                "admin": { "name": "Ada Admin", "email": format!("admin@{}.example.com", prefix) }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"]["admin"]["id"].as_str().unwrap().to_string()
    }

    /// Send a request as `user` of the `company` tenant.
    async fn call(
        &self,
        method: Method,
        company: &str,
        user: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = self
            .client
            .request(method, self.url(path))
            .header("x-company", company)
            .header("x-user-id", user);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await.unwrap();
        let status = resp.status();
        let body: Value = resp.json().await.unwrap();
        (status, body)
    }
}

/// A company with an admin, ready for tenant-scoped calls.
struct Tenant {
    fixture: TestFixture,
    prefix: String,
    admin: String,
}

impl Tenant {
    async fn new() -> Self {
        let fixture = TestFixture::new().await;
        let admin = fixture.create_company("acme").await;
        Tenant {
            fixture,
            prefix: "acme".to_string(),
            admin,
        }
    }

    async fn get(&self, user: &str, path: &str) -> (StatusCode, Value) {
        self.fixture
            .call(Method::GET, &self.prefix, user, path, None)
            .await
    }

    async fn post(&self, user: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.fixture
            .call(Method::POST, &self.prefix, user, path, Some(body))
            .await
    }

    async fn put(&self, user: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.fixture
            .call(Method::PUT, &self.prefix, user, path, Some(body))
            .await
    }

    async fn create_store(&self, code: &str, extra: Value) -> String {
        let mut body = json!({ "name": format!("Store {}", code), "code": code });
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), extra) {
            target.extend(extra);
        }
        let (status, body) = self.post(&self.admin, "/api/stores", body).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_user(&self, email: &str, role: &str, store_ids: &[&str]) -> String {
        let (status, body) = self
            .post(
                &self.admin,
                "/api/users",
                json!({ "name": email, "email": email, "role": role, "storeIds": store_ids }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_product(&self, sku: &str, name: &str, price_cents: i64, stock: i64) -> String {
        let (status, body) = self
            .post(
                &self.admin,
                "/api/products",
                json!({ "sku": sku, "name": name, "priceCents": price_cents, "stock": stock }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn add_to_cart(&self, user: &str, store: &str, product: &str, delta: i64) -> (StatusCode, Value) {
        self.post(
            user,
            &format!("/api/carts/{}/items/{}/adjust", store, product),
            json!({ "delta": delta }),
        )
        .await
    }

    async fn place_order(&self, user: &str, store: &str) -> (StatusCode, Value) {
        self.post(user, "/api/orders", json!({ "storeId": store }))
            .await
    }

    async fn stock_of(&self, product: &str) -> i64 {
        let (_, body) = self
            .get(&self.admin, &format!("/api/products/{}", product))
            .await;
        body["data"]["stock"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_and_invalid_psk() {
    let fixture = TestFixture::new().await;
    let anonymous = Client::new();

    let resp = anonymous
        .get(fixture.url("/api/revision"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = anonymous
        .get(fixture.url("/api/revision"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = anonymous
        .get(fixture.url("/api/revision"))
        .header("authorization", format!("Bearer {}", API_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::with_psk(None).await;

    let resp = Client::new()
        .get(fixture.url("/api/revision"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_create_company_validation() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/companies"))
        .json(&json!({
            "name": "Bad",
            "dnsPrefix": "-bad-",
            "admin": { "name": "A", "email": "a@example.com" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    fixture.create_company("acme").await;

    let resp = fixture
        .client
        .post(fixture.url("/api/companies"))
        .json(&json!({
            "name": "Acme again",
            "dnsPrefix": "ACME",
            "admin": { "name": "B", "email": "b@example.com" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already taken"));
}

#[tokio::test]
async fn test_tenant_resolution() {
    let tenant = Tenant::new().await;

    let (status, body) = tenant.get(&tenant.admin, "/api/users/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "admin");

    let (status, body) = tenant.get("", "/api/users/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = tenant
        .fixture
        .call(Method::GET, "globex", &tenant.admin, "/api/users/me", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A user of one company is unknown in another
    let other_admin = tenant.fixture.create_company("globex").await;
    let (status, _) = tenant.get(&other_admin, "/api/users/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = tenant.get("", "/api/company").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dnsPrefix"], "acme");
    assert_eq!(body["data"]["primaryColor"], "#123abc");
}

#[tokio::test]
async fn test_inactive_user_is_forbidden() {
    let tenant = Tenant::new().await;
    let buyer = tenant.create_user("buyer@acme.example.com", "buyer", &[]).await;

    let (status, _) = tenant
        .post(
            &tenant.admin,
            &format!("/api/users/{}/activation", buyer),
            json!({ "active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = tenant.get(&buyer, "/api/users/me").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_user_management_rules() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;

    // Duplicate email, case-insensitive
    let (status, body) = tenant
        .post(
            &tenant.admin,
            "/api/users",
            json!({ "name": "Dup", "email": "BUYER@acme.example.com", "role": "buyer" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // Unknown store id
    let (status, _) = tenant
        .post(
            &tenant.admin,
            "/api/users",
            json!({ "name": "X", "email": "x@acme.example.com", "role": "buyer", "storeIds": ["nope"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Self-service name and consent change
    let (status, body) = tenant
        .put(
            &buyer,
            &format!("/api/users/{}", buyer),
            json!({ "name": "Bea Buyer", "privacyConsent": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Bea Buyer");
    assert_eq!(body["data"]["privacyConsent"], true);

    // Self-promotion is refused
    let (status, _) = tenant
        .put(&buyer, &format!("/api/users/{}", buyer), json!({ "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admins cannot demote themselves
    let (status, _) = tenant
        .put(
            &tenant.admin,
            &format!("/api/users/{}", tenant.admin),
            json!({ "role": "buyer" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Buyers cannot list users
    let (status, _) = tenant.get(&buyer, "/api/users").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = tenant
        .get(&tenant.admin, &format!("/api/users?storeId={}", store))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], buyer.as_str());
}

#[tokio::test]
async fn test_stale_version_is_rejected() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;

    let (status, body) = tenant
        .put(
            &tenant.admin,
            &format!("/api/stores/{}", store),
            json!({ "name": "Renamed", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 2);

    let (status, body) = tenant
        .put(
            &tenant.admin,
            &format!("/api/stores/{}", store),
            json!({ "name": "Again", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);
}

#[tokio::test]
async fn test_cart_adjust_rejection_returns_authoritative_cart() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;
    let product = tenant.create_product("GLV-1", "Gloves", 250, 2).await;

    let (status, body) = tenant.add_to_cart(&buyer, &store, &product, 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"][0]["quantity"], 2);
    assert_eq!(body["data"]["totalCents"], 500);

    // Beyond stock
    let (status, body) = tenant.add_to_cart(&buyer, &store, &product, 1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["error"]["details"]["available"], 2);
    assert_eq!(body["error"]["details"]["cart"]["items"][0]["quantity"], 2);

    // Below zero
    let (status, body) = tenant.add_to_cart(&buyer, &store, &product, -3).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_QUANTITY");
    assert_eq!(body["error"]["details"]["cart"]["items"][0]["quantity"], 2);

    // Stale version
    let (status, body) = tenant
        .post(
            &buyer,
            &format!("/api/carts/{}/items/{}/adjust", store, product),
            json!({ "delta": -1, "expectedVersion": 99 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["cart"]["items"][0]["quantity"], 2);

    // Nothing was written by the refused changes
    let (_, body) = tenant.get(&buyer, &format!("/api/carts/{}", store)).await;
    assert_eq!(body["data"]["items"][0]["quantity"], 2);

    // Setting zero removes the line
    let (status, body) = tenant
        .put(
            &buyer,
            &format!("/api/carts/{}/items/{}", store, product),
            json!({ "quantity": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 0);
    assert_eq!(body["data"]["totalCents"], 0);
}

#[tokio::test]
async fn test_cart_requires_store_access() {
    let tenant = Tenant::new().await;
    let own = tenant.create_store("N1", json!({})).await;
    let other = tenant.create_store("S1", json!({})).await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[own.as_str()])
        .await;
    let product = tenant.create_product("GLV-1", "Gloves", 250, 5).await;

    let (status, _) = tenant.add_to_cart(&buyer, &other, &product, 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = tenant.get(&buyer, "/api/stores").await;
    let stores = body["data"].as_array().unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0]["id"], own.as_str());
}

#[tokio::test]
async fn test_approval_flow_with_budget() {
    let tenant = Tenant::new().await;
    let store = tenant
        .create_store(
            "N1",
            json!({ "requiresApproval": true, "monthlyExpenseLimitCents": 5000 }),
        )
        .await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;
    let approver = tenant
        .create_user("approver@acme.example.com", "approver", &[store.as_str()])
        .await;
    let product = tenant.create_product("TWL-1", "Towels", 3000, 10).await;

    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (status, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "approval_pending");
    assert_eq!(body["data"]["number"], "ORD-000001");
    let first = body["data"]["id"].as_str().unwrap().to_string();

    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (_, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(body["data"]["number"], "ORD-000002");
    let second = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(tenant.stock_of(&product).await, 8);

    // Awaiting approval does not consume budget
    let (_, body) = tenant
        .get(&buyer, &format!("/api/stores/{}/budget", store))
        .await;
    assert_eq!(body["data"]["currentMonthAmountCents"], 0);

    // Buyers cannot decide
    let (status, _) = tenant
        .post(&buyer, &format!("/api/orders/{}/approve", first), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = tenant
        .post(&approver, &format!("/api/orders/{}/approve", first), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["order"]["status"], "approved");
    assert_eq!(body["data"]["order"]["decidedBy"], approver.as_str());
    assert_eq!(body["data"]["budget"]["currentMonthAmountCents"], 3000);
    assert_eq!(body["data"]["budget"]["remainingAmountCents"], 2000);

    // 3000 + 3000 > 5000
    let (status, body) = tenant
        .post(&approver, &format!("/api/orders/{}/approve", second), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BUDGET_EXCEEDED");
    assert_eq!(body["error"]["details"]["currentMonthAmountCents"], 3000);
    assert_eq!(body["error"]["details"]["monthlyExpenseLimitCents"], 5000);

    let (status, body) = tenant
        .post(
            &approver,
            &format!("/api/orders/{}/reject", second),
            json!({ "reason": "Over budget" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order"]["status"], "rejected");
    assert_eq!(body["data"]["order"]["rejectionReason"], "Over budget");
    assert_eq!(tenant.stock_of(&product).await, 9);

    // Decided orders cannot be decided again
    let (status, body) = tenant
        .post(&approver, &format!("/api/orders/{}/approve", first), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_order_limit_blocks_placement() {
    let tenant = Tenant::new().await;
    let store = tenant
        .create_store("N1", json!({ "monthlyOrderLimit": 1 }))
        .await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;
    let product = tenant.create_product("TWL-1", "Towels", 100, 10).await;

    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (status, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");

    tenant.add_to_cart(&buyer, &store, &product, 2).await;
    let (status, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "ORDER_LIMIT_REACHED");
    assert_eq!(body["error"]["details"]["monthlyOrderLimit"], 1);

    // The refused placement left cart and stock untouched
    let (_, body) = tenant.get(&buyer, &format!("/api/carts/{}", store)).await;
    assert_eq!(body["data"]["items"][0]["quantity"], 2);
    assert_eq!(tenant.stock_of(&product).await, 9);
}

#[tokio::test]
async fn test_empty_cart_cannot_be_ordered() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;

    let (status, body) = tenant.place_order(&tenant.admin, &store).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "EMPTY_CART");
}

#[tokio::test]
async fn test_budget_charges_orders_to_their_month() {
    let tenant = Tenant::new().await;
    let store = tenant
        .create_store(
            "N1",
            json!({ "requiresApproval": true, "monthlyExpenseLimitCents": 1000 }),
        )
        .await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;
    let product = tenant.create_product("TWL-1", "Towels", 800, 10).await;
    let repo = &tenant.fixture.repo;

    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (_, body) = tenant.place_order(&buyer, &store).await;
    let january = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _) = tenant
        .post(&tenant.admin, &format!("/api/orders/{}/approve", january), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    repo.backdate_order(
        &january,
        "2020-01-10T09:00:00+00:00",
        Some("2020-01-11T09:00:00+00:00"),
    )
    .await
    .unwrap();

    // Last month's spend does not count against this month
    let budget_path = format!("/api/stores/{}/budget", store);
    let (_, body) = tenant.get(&buyer, &budget_path).await;
    assert_eq!(body["data"]["currentMonthAmountCents"], 0);
    let (_, body) = tenant
        .get(&buyer, &format!("{}?month=2020-01", budget_path))
        .await;
    assert_eq!(body["data"]["currentMonthAmountCents"], 800);

    // Placed in January, approved now: charged to this month
    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (_, body) = tenant.place_order(&buyer, &store).await;
    let late = body["data"]["id"].as_str().unwrap().to_string();
    repo.backdate_order(&late, "2020-01-20T09:00:00+00:00", None)
        .await
        .unwrap();
    let (status, body) = tenant
        .post(&tenant.admin, &format!("/api/orders/{}/approve", late), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["budget"]["currentMonthAmountCents"], 800);

    let (_, body) = tenant
        .get(&buyer, &format!("{}?month=2020-01", budget_path))
        .await;
    assert_eq!(body["data"]["currentMonthAmountCents"], 800);
    assert_eq!(body["data"]["remainingAmountCents"], 200);

    // This month now holds 800 of 1000
    tenant.add_to_cart(&buyer, &store, &product, 1).await;
    let (_, body) = tenant.place_order(&buyer, &store).await;
    let third = body["data"]["id"].as_str().unwrap().to_string();
    let (status, body) = tenant
        .post(&tenant.admin, &format!("/api/orders/{}/approve", third), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BUDGET_EXCEEDED");
    assert_eq!(body["error"]["details"]["currentMonthAmountCents"], 800);
}

#[tokio::test]
async fn test_placement_rechecks_catalog() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let buyer = tenant
        .create_user("buyer@acme.example.com", "buyer", &[store.as_str()])
        .await;
    let gloves = tenant.create_product("GLV-1", "Gloves", 500, 5).await;
    let towels = tenant.create_product("TWL-1", "Towels", 300, 5).await;

    tenant.add_to_cart(&buyer, &store, &gloves, 3).await;
    tenant.add_to_cart(&buyer, &store, &towels, 2).await;

    let (status, _) = tenant
        .put(&tenant.admin, &format!("/api/products/{}", gloves), json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "PRODUCT_UNAVAILABLE");
    assert_eq!(body["error"]["details"]["productId"], gloves.as_str());

    tenant
        .put(&tenant.admin, &format!("/api/products/{}", gloves), json!({ "active": true }))
        .await;
    tenant
        .put(&tenant.admin, &format!("/api/products/{}", towels), json!({ "stock": 1 }))
        .await;

    let (status, body) = tenant.place_order(&buyer, &store).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["error"]["details"]["requested"], 2);
    assert_eq!(body["error"]["details"]["available"], 1);

    // Neither refusal reserved stock or touched the cart
    assert_eq!(tenant.stock_of(&gloves).await, 5);
    assert_eq!(tenant.stock_of(&towels).await, 1);
    let (_, body) = tenant.get(&buyer, &format!("/api/carts/{}", store)).await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["totalCents"], 2100);
    let (_, body) = tenant.get(&tenant.admin, "/api/orders").await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_concurrent_placements_respect_order_limit() {
    let tenant = Tenant::new().await;
    let store = tenant
        .create_store("N1", json!({ "monthlyOrderLimit": 1 }))
        .await;
    let product = tenant.create_product("TWL-1", "Towels", 100, 10).await;

    let mut buyers = Vec::new();
    for n in 0..3 {
        let buyer = tenant
            .create_user(&format!("buyer{}@acme.example.com", n), "buyer", &[store.as_str()])
            .await;
        tenant.add_to_cart(&buyer, &store, &product, 1).await;
        buyers.push(buyer);
    }

    let (a, b, c) = tokio::join!(
        tenant.place_order(&buyers[0], &store),
        tenant.place_order(&buyers[1], &store),
        tenant.place_order(&buyers[2], &store),
    );
    let results = [a, b, c];
    let placed = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::OK)
        .count();
    assert_eq!(placed, 1);
    for (status, body) in results.iter().filter(|(status, _)| *status != StatusCode::OK) {
        assert_eq!(*status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
        assert_eq!(body["error"]["code"], "ORDER_LIMIT_REACHED");
    }
    assert_eq!(tenant.stock_of(&product).await, 9);
}

#[tokio::test]
async fn test_order_date_filters() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let product = tenant.create_product("TWL-1", "Towels", 100, 10).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        tenant.add_to_cart(&tenant.admin, &store, &product, 1).await;
        let (_, body) = tenant.place_order(&tenant.admin, &store).await;
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }
    // Within the first second of March
    tenant
        .fixture
        .repo
        .backdate_order(&ids[0], "2024-03-01T00:00:00.250+00:00", None)
        .await
        .unwrap();

    let (status, body) = tenant
        .get(&tenant.admin, "/api/orders?from=2024-03-01T00:00:00Z&to=2024-03-02")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], ids[0].as_str());

    // 02:00 at +02:00 is midnight UTC
    let (_, body) = tenant
        .get(
            &tenant.admin,
            "/api/orders?from=2024-03-01T02:00:00%2B02:00&to=2024-03-02",
        )
        .await;
    assert_eq!(body["data"]["total"], 1);

    let (_, body) = tenant
        .get(&tenant.admin, "/api/orders?from=2024-03-02")
        .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], ids[1].as_str());

    let (status, body) = tenant.get(&tenant.admin, "/api/orders?from=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (_, body) = tenant
        .get(&tenant.admin, "/api/reports/orders?from=2024-03-01&to=2024-04-01")
        .await;
    assert_eq!(body["data"][0]["orders"], 1);
    let (status, _) = tenant
        .get(&tenant.admin, "/api/reports/orders?to=yesterday")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = tenant
        .get(&tenant.admin, "/api/export/orders.csv?from=abc")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let resp = tenant
        .fixture
        .client
        .get(tenant.fixture.url("/api/export/orders.csv?from=2024-03-01&to=2024-04-01"))
        .header("x-company", "acme")
        .header("x-user-id", &tenant.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    // Header plus the single March order line
    assert_eq!(text.lines().count(), 2);
}

#[tokio::test]
async fn test_fulfilment_transitions() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let product = tenant.create_product("TWL-1", "Towels", 100, 10).await;

    tenant.add_to_cart(&tenant.admin, &store, &product, 3).await;
    let (_, body) = tenant.place_order(&tenant.admin, &store).await;
    let order = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(tenant.stock_of(&product).await, 7);

    let status_path = format!("/api/orders/{}/status", order);

    let (status, body) = tenant
        .put(&tenant.admin, &status_path, json!({ "status": "confirmed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "confirmed");

    let (status, body) = tenant
        .put(&tenant.admin, &status_path, json!({ "status": "delivered" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = tenant
        .put(&tenant.admin, &status_path, json!({ "status": "sedis_rejected" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "sedis_rejected");
    assert_eq!(tenant.stock_of(&product).await, 10);
}

#[tokio::test]
async fn test_order_list_pagination_and_reports() {
    let tenant = Tenant::new().await;
    let store = tenant.create_store("N1", json!({})).await;
    let product = tenant.create_product("TWL-1", "Towels", 150, 10).await;

    for _ in 0..3 {
        tenant.add_to_cart(&tenant.admin, &store, &product, 1).await;
        let (status, _) = tenant.place_order(&tenant.admin, &store).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = tenant.get(&tenant.admin, "/api/orders?perPage=2").await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["totalPages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["items"][0]["number"], "ORD-000003");

    let (_, body) = tenant
        .get(&tenant.admin, "/api/orders?perPage=2&page=2")
        .await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let (_, body) = tenant
        .get(&tenant.admin, "/api/orders?status=approved")
        .await;
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = tenant.get(&tenant.admin, "/api/reports/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["orders"], 3);
    assert_eq!(body["data"][0]["totalCents"], 450);
    assert_eq!(body["data"][0]["byStatus"]["pending"]["orders"], 3);

    let (status, body) = tenant.get(&tenant.admin, "/api/reports/budgets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["currentMonthOrders"], 3);

    let (status, _) = tenant
        .get(&tenant.admin, "/api/reports/budgets?month=2024-13")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_product_search_is_tenant_scoped() {
    let tenant = Tenant::new().await;
    tenant.create_product("GLV-1", "Nitrile gloves", 250, 5).await;
    tenant.create_product("TWL-1", "Paper towels", 150, 5).await;

    let globex_admin = tenant.fixture.create_company("globex").await;
    let (status, _) = tenant
        .fixture
        .call(
            Method::POST,
            "globex",
            &globex_admin,
            "/api/products",
            Some(json!({ "sku": "GLV-9", "name": "Latex gloves", "priceCents": 100, "stock": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = tenant
        .get(&tenant.admin, "/api/products/search?q=gloves")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["results"][0]["product"]["sku"], "GLV-1");

    let (_, body) = tenant
        .get(&tenant.admin, "/api/products?perPage=1")
        .await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["totalPages"], 2);
}

#[tokio::test]
async fn test_product_csv_import_and_export() {
    let tenant = Tenant::new().await;
    tenant.create_product("A-1", "Stapler", 999, 1).await;

    let csv = "sku,name,description,category,price_cents,stock,active\n\
               A-1,Heavy stapler,,office,1299,4,true\n\
               A-2,Tape,Clear,office,250,10,\n\
               A-3,,,office,100,1,true\n";
    let resp = tenant
        .fixture
        .client
        .post(tenant.fixture.url("/api/import/products"))
        .header("x-company", "acme")
        .header("x-user-id", &tenant.admin)
        .header("content-type", "text/csv")
        .body(csv)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["created"], 1);
    assert_eq!(body["data"]["updated"], 1);
    assert_eq!(body["data"]["errors"][0]["row"], 3);

    // Imported products are searchable
    let (_, body) = tenant.get(&tenant.admin, "/api/products/search?q=tape").await;
    assert_eq!(body["data"]["results"][0]["product"]["sku"], "A-2");

    let resp = tenant
        .fixture
        .client
        .get(tenant.fixture.url("/api/export/products.csv"))
        .header("x-company", "acme")
        .header("x-user-id", &tenant.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/csv; charset=utf-8"
    );
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    let text = resp.text().await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "sku,name,description,category,price_cents,stock,active");
    assert_eq!(lines[1], "A-1,Heavy stapler,,office,1299,4,true");
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn test_user_csv_import() {
    let tenant = Tenant::new().await;
    tenant.create_store("NORTH", json!({})).await;
    let existing = tenant
        .create_user("bob@acme.example.com", "buyer", &[])
        .await;

    let csv = "name,email,role,store_codes,active\n\
               Ann,ann@acme.example.com,approver,north,true\n\
               Robert,BOB@acme.example.com,buyer,NORTH,false\n\
               Cy,cy@acme.example.com,buyer,WEST,true\n";
    let resp = tenant
        .fixture
        .client
        .post(tenant.fixture.url("/api/import/users"))
        .header("x-company", "acme")
        .header("x-user-id", &tenant.admin)
        .body(csv)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["created"], 1);
    assert_eq!(body["data"]["updated"], 1);
    assert_eq!(body["data"]["errors"][0]["row"], 3);

    let (_, body) = tenant
        .get(&tenant.admin, &format!("/api/users/{}", existing))
        .await;
    assert_eq!(body["data"]["name"], "Robert");
    assert_eq!(body["data"]["active"], false);
    assert_eq!(body["data"]["storeIds"].as_array().unwrap().len(), 1);

    let resp = tenant
        .fixture
        .client
        .get(tenant.fixture.url("/api/export/users.csv"))
        .header("x-company", "acme")
        .header("x-user-id", &tenant.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("Ann,ann@acme.example.com,approver,NORTH,true"));
}

#[tokio::test]
async fn test_revision_increments_on_write() {
    let tenant = Tenant::new().await;

    let (_, body) = tenant.get(&tenant.admin, "/api/revision").await;
    let before = body["data"]["revisionId"].as_i64().unwrap();
    assert_eq!(body["revisionId"].as_i64().unwrap(), before);

    let (_, body) = tenant
        .post(&tenant.admin, "/api/stores", json!({ "name": "North", "code": "N1" }))
        .await;
    assert_eq!(body["revisionId"].as_i64().unwrap(), before + 1);

    let (_, body) = tenant.get(&tenant.admin, "/api/revision").await;
    assert_eq!(body["data"]["revisionId"].as_i64().unwrap(), before + 1);
}
