use std::net::SocketAddr;

use fee_clearance::http::{self, AppState};
use fee_clearance::{
    AdminService, ClearanceStorage, MemoryLedger, MemoryStorage, NewUser, ReconciliationEngine,
    ReconciliationSettings, Registrar,
};
use serde_json::{json, Value};

struct TestServer {
    addr: SocketAddr,
    ledger: MemoryLedger,
    storage: MemoryStorage,
    client: reqwest::Client,
    server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let storage = MemoryStorage::new();
        let ledger = MemoryLedger::with_header();
        let registrar = Registrar::new(storage.clone());
        registrar
            .register(NewUser::new("alice@uni.edu", "alice", "h1"))
            .await
            .expect("register alice");

        let state = AppState::new(
            ReconciliationEngine::new(
                storage.clone(),
                ledger.clone(),
                ReconciliationSettings::new("sheet-1"),
            ),
            AdminService::new(storage.clone()),
            registrar,
        );
        let app = http::app(state);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind listener");
        let addr: SocketAddr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            addr,
            ledger,
            storage,
            client: reqwest::Client::new(),
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/api{}", self.addr, path)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("http post");
        let status = response.status().as_u16();
        (status, response.json().await.expect("decode json"))
    }

    async fn put(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("http put");
        let status = response.status().as_u16();
        (status, response.json().await.expect("decode json"))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self.client.get(self.url(path)).send().await.expect("http get");
        let status = response.status().as_u16();
        (status, response.json().await.expect("decode json"))
    }

    async fn stop(self) {
        self.server.abort();
        let _ = self.server.await;
    }
}

#[tokio::test]
async fn http_check_receipts_settles_and_then_reports_reuse() {
    let server = TestServer::start().await;
    server.ledger.push_row("R1", "365000", "alice");

    let (status, body) = server
        .post(
            "/profile/check-receipts",
            json!({"receiptIds": ["R1"], "userName": "alice"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["details"][0]["receiptId"], "R1");
    assert_eq!(body["details"][0]["status"], "matched");

    let (status, body) = server
        .post(
            "/profile/check-receipts",
            json!({"receiptIds": ["R1"], "userName": "alice"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["details"][0]["status"], "already_used");

    let (status, body) = server
        .post("/profile/get-profile", json!({"username": "alice"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["used_receipt"][0]["receipt_ids"][0], "R1");

    server.stop().await;
}

#[tokio::test]
async fn http_check_receipts_error_statuses() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/profile/check-receipts", json!({"userName": "alice"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = server
        .post(
            "/profile/check-receipts",
            json!({"receiptIds": ["R1"], "userName": "carol"}),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "profile_not_found");

    server.ledger.set_failure(Some("403 forbidden"));
    let (status, body) = server
        .post(
            "/profile/check-receipts",
            json!({"receiptIds": ["R1"], "userName": "alice"}),
        )
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["code"], "ledger_unavailable");

    server.ledger.set_failure(None);
    server.ledger.push_row("R1", "365000", "alice");
    server.storage.fail_commits(true);
    let (status, body) = server
        .post(
            "/profile/check-receipts",
            json!({"receiptIds": ["R1"], "userName": "alice"}),
        )
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["code"], "commit_failed");
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("contact an administrator"));

    server.stop().await;
}

#[tokio::test]
async fn http_admin_routes() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(
            "/accounts/register",
            json!({"email": "bob@uni.edu", "username": "bob", "password": "correct horse"}),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["data"]["username"], "bob");

    // Only a server-side hash is stored
    let bob = server.storage.get_user("bob").await.unwrap().unwrap();
    assert!(bob.password_hash.starts_with("$argon2id$"));
    assert!(!bob.password_hash.contains("correct horse"));

    let (status, body) = server
        .post(
            "/accounts/register",
            json!({"email": "eve@uni.edu", "username": "eve", "passwordHash": "$argon2id$forged"}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");

    let (status, _) = server
        .post(
            "/accounts/register",
            json!({"email": "bob@uni.edu", "username": "bobby", "password": "battery staple"}),
        )
        .await;
    assert_eq!(status, 409);

    let (status, body) = server
        .put(
            "/admin/fees",
            json!({"username": "bob", "school_fee_due": 100, "penalty_fee": 20, "excess_fee": 0}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (status, body) = server.post("/admin/grant", json!({"username": "bob"})).await;
    assert_eq!(status, 200);
    assert!(body["data"]["receipt_id"]
        .as_str()
        .unwrap_or_default()
        .starts_with("ADMIN-GRANT-"));

    let (status, body) = server
        .put(
            "/admin/identity",
            json!({
                "oldEmail": "bob@uni.edu",
                "oldUsername": "alice",
                "newEmail": "x@uni.edu",
                "newUsername": "x"
            }),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "user_not_found");

    let (status, body) = server.get("/admin/users?q=BOB").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert!(body["data"][0].get("password_hash").is_none());

    let (status, body) = server.get("/admin/clearances").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    server.stop().await;
}
