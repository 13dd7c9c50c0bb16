//! Integration test common infrastructure.
//!
//! Starts a `GuardRuntime` over a temp directory and drives the full axum
//! router in-process, with the peer address inserted as the
//! `ConnectInfo<SocketAddr>` extension the server would attach.

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;
use visitguard::config::Config;
use visitguard::runtime::GuardRuntime;

/// Response reduced to what the tests assert on.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: String,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("response body is not JSON")
    }
}

/// A running guard fronting a tiny application.
#[allow(dead_code)]
pub struct TestService {
    pub runtime: GuardRuntime,
    pub router: Router,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestService {
    /// Config with a small limit, persisting into a fresh temp directory.
    pub fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.guard.limit = 3;
        config.guard.ban_minutes = 5;
        config.persistence.ban_list_path = dir.path().join("ban_ip.gz");
        config
    }

    pub fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Self::config(&dir);
        Self::start_with(dir, &config)
    }

    pub fn start_with(dir: TempDir, config: &Config) -> Self {
        let runtime = GuardRuntime::start(config).expect("runtime should start");
        let app = Router::new()
            .route("/", get(|| async { "hello" }))
            .route("/cached", get(|| async { StatusCode::NOT_MODIFIED }));
        let router = visitguard::http::router(runtime.app_state(), app, config.http.metrics);
        Self {
            runtime,
            router,
            dir,
        }
    }

    /// Send a GET from `peer`, with optional extra headers.
    pub async fn get_from(
        &self,
        peer: SocketAddr,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).expect("request");
        req.extensions_mut().insert(ConnectInfo(peer));
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        TestResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&self, peer: [u8; 4], uri: &str) -> TestResponse {
        self.get_from(SocketAddr::from((peer, 50000)), uri, &[]).await
    }

    pub async fn admin(&self, uri: &str) -> TestResponse {
        self.get([127, 0, 0, 1], uri).await
    }
}
