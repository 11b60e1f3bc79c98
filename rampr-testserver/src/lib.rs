use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HELLO: &str = "/hello";
pub const PATH_ECHO: &str = "/echo";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_LOGIN: &str = "/auth/login";
pub const PATH_PRODUCTS: &str = "/products";

pub const TEST_USERNAME: &str = "emilys";
pub const TEST_PASSWORD: &str = "emilyspass";
pub const TEST_TOKEN: &str = "test-token-4f1c";

/// Latency of [`PATH_SLOW`].
pub const SLOW_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    logins_ok: Arc<AtomicU64>,
    logins_rejected: Arc<AtomicU64>,
    products_list: Arc<AtomicU64>,
    products_unauthorized: Arc<AtomicU64>,
    product_detail: Arc<AtomicU64>,
    status_hits: Arc<AtomicU64>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl TestServerStats {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn logins_ok(&self) -> u64 {
        self.logins_ok.load(Ordering::Relaxed)
    }

    pub fn logins_rejected(&self) -> u64 {
        self.logins_rejected.load(Ordering::Relaxed)
    }

    /// Authorized hits on the product listing.
    pub fn products_list(&self) -> u64 {
        self.products_list.load(Ordering::Relaxed)
    }

    pub fn products_unauthorized(&self) -> u64 {
        self.products_unauthorized.load(Ordering::Relaxed)
    }

    pub fn product_detail(&self) -> u64 {
        self.product_detail.load(Ordering::Relaxed)
    }

    pub fn status_hits(&self) -> u64 {
        self.status_hits.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub hello: String,
    pub echo: String,
    pub slow: String,
    pub login: String,
    pub products: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            hello: format!("{base_url}{PATH_HELLO}"),
            echo: format!("{base_url}{PATH_ECHO}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            login: format!("{base_url}{PATH_LOGIN}"),
            products: format!("{base_url}{PATH_PRODUCTS}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }

    pub fn product(&self, id: u32) -> String {
        format!("{}/{id}", self.products)
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Clone, Serialize)]
struct Product {
    id: u32,
    title: &'static str,
    price: u32,
}

const CATALOG: [Product; 3] = [
    Product {
        id: 1,
        title: "Essence Mascara",
        price: 10,
    },
    Product {
        id: 2,
        title: "Eyeshadow Palette",
        price: 20,
    },
    Product {
        id: 3,
        title: "Powder Canister",
        price: 15,
    },
];

async fn handle_hello(State(stats): State<TestServerStats>) -> &'static str {
    bump(&stats.requests_total);
    "Hello World!"
}

async fn handle_slow(State(stats): State<TestServerStats>) -> &'static str {
    bump(&stats.requests_total);
    sleep(SLOW_DELAY).await;
    "slow"
}

async fn handle_echo(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    bump(&stats.requests_total);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<u16>) -> StatusCode {
    bump(&stats.requests_total);
    bump(&stats.status_hits);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_login(State(stats): State<TestServerStats>, body: Bytes) -> Response {
    bump(&stats.requests_total);

    let accepted = serde_json::from_slice::<LoginRequest>(&body)
        .is_ok_and(|req| req.username == TEST_USERNAME && req.password == TEST_PASSWORD);

    if accepted {
        bump(&stats.logins_ok);
        Json(json!({ "username": TEST_USERNAME, "token": TEST_TOKEN })).into_response()
    } else {
        bump(&stats.logins_rejected);
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response()
    }
}

fn is_authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        == Some(TEST_TOKEN)
}

async fn handle_products(State(stats): State<TestServerStats>, headers: HeaderMap) -> Response {
    bump(&stats.requests_total);

    if !is_authorized(&headers) {
        bump(&stats.products_unauthorized);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Access Token is invalid" })),
        )
            .into_response();
    }

    bump(&stats.products_list);
    Json(json!({ "products": CATALOG, "total": CATALOG.len() })).into_response()
}

async fn handle_product(State(stats): State<TestServerStats>, Path(id): Path<u32>) -> Response {
    bump(&stats.requests_total);
    bump(&stats.product_detail);

    match CATALOG.iter().find(|p| p.id == id) {
        Some(product) => Json(product.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("Product with id '{id}' not found") })),
        )
            .into_response(),
    }
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HELLO, get(handle_hello))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_ECHO, post(handle_echo))
        .route("/status/{code}", get(handle_status).post(handle_status))
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_PRODUCTS, get(handle_products))
        .route("/products/{id}", get(handle_product))
        .with_state(stats)
}

/// In-process server bound to an ephemeral localhost port.
pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
