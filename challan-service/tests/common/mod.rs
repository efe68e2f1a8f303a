//! Common test utilities for challan-service integration tests.
#![allow(dead_code)]

use challan_core::config::Config as CommonConfig;
use challan_core::utils::hmac_sha256_hex;
use challan_service::config::{DatabaseConfig, RazorpayConfig, ReconcilerConfig, ServiceConfig};
use challan_service::services::{InMemoryStore, LedgerStore};
use challan_service::startup::Application;
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "rzp_test_secret";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        challan_core::observability::init_test_tracing("info,challan_service=debug,sqlx=warn");
    });
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub gateway: MockServer,
    pub store: Arc<dyn LedgerStore>,
    shutdown: CancellationToken,
}

fn test_config(gateway_uri: &str, database: Option<DatabaseConfig>) -> ServiceConfig {
    ServiceConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "challan-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database,
        razorpay: RazorpayConfig {
            key_id: KEY_ID.to_string(),
            key_secret: Secret::new(KEY_SECRET.to_string()),
            api_base_url: gateway_uri.to_string(),
            timeout_secs: 5,
        },
        // Tests drive reconciliation passes by hand.
        reconciler: ReconcilerConfig {
            enabled: false,
            interval_secs: 1,
            batch_size: 50,
            max_attempts: 10,
        },
        cors_allowed_origins: vec!["http://localhost:5173".to_string()],
    }
}

/// Spawn the service on an in-memory store preloaded with demo vehicles.
pub async fn spawn_app() -> (TestApp, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::with_demo_data());
    let app = spawn_with_store(store.clone()).await;
    (app, store)
}

/// Spawn the service against `TEST_DATABASE_URL`.
pub async fn spawn_postgres_app() -> TestApp {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run Postgres tests");
    init_tracing();

    let gateway = MockServer::start().await;
    let config = test_config(
        &gateway.uri(),
        Some(DatabaseConfig {
            url: Secret::new(database_url),
            max_connections: 2,
            min_connections: 1,
        }),
    );
    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    start(app, gateway).await
}

async fn spawn_with_store(store: Arc<dyn LedgerStore>) -> TestApp {
    init_tracing();

    let gateway = MockServer::start().await;
    let app = Application::build_with_store(test_config(&gateway.uri(), None), store)
        .await
        .expect("Failed to build application");
    start(app, gateway).await
}

async fn start(app: Application, gateway: MockServer) -> TestApp {
    let port = app.http_port();
    let store = app.store();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        app.run_until_stopped(token).await.ok();
    });

    let address = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("{}/health", address))
            .send()
            .await
            .is_ok()
        {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    TestApp {
        address,
        client,
        gateway,
        store,
        shutdown,
    }
}

impl TestApp {
    pub async fn get(&self, route: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, route))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_json(&self, route: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, route))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Razorpay answers `POST /orders` with `order_id`.
    pub async fn mock_order(&self, order_id: &str, amount: u64) {
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": order_id,
                "entity": "order",
                "amount": amount,
                "currency": "INR",
                "status": "created"
            })))
            .mount(&self.gateway)
            .await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn sign(order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(KEY_SECRET, &format!("{}|{}", order_id, payment_id))
        .expect("HMAC accepts any key length")
}

/// A correctly signed verify body for `payment_id`.
pub fn verify_body(payment_id: &str, challans: Value, email: &str) -> Value {
    let order_id = format!("order_{}", payment_id);
    json!({
        "razorpay_order_id": order_id,
        "razorpay_payment_id": payment_id,
        "razorpay_signature": sign(&order_id, payment_id),
        "vehicleNumber": "MH-12-AB-1234",
        "challans": challans,
        "subtotal": 1500,
        "convenienceFee": 0,
        "totalAmount": 1500,
        "userEmail": email
    })
}
