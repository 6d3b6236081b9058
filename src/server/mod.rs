//! Server module - HTTP and websocket surface
//!
//! Routes:
//! - `GET  /health`              version, languages and hub counters
//! - `POST /sessions`            create a session (bearer)
//! - `GET  /sessions/{id}`       fetch a session, or join it when the request
//!   is a websocket upgrade (`?token=`)
//! - `GET  /sessions/{id}/ws`    join a session over websocket
//! - `POST /execute`             run code in a sandbox (bearer)

mod handlers;
mod ws;

pub use handlers::AppError;
pub use ws::serve_socket;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::{Config, RealtimeConfig};
use crate::core::{Authenticator, InMemorySessionDirectory, SessionDirectory, StaticTokenAuthenticator};
use crate::error::{Error, Result};
use crate::realtime::{Hub, HubHandle};
use crate::sandbox::{create_engine, ExecutionEngine};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Session hub
    pub hub: HubHandle,
    /// Execution engine
    pub engine: Arc<ExecutionEngine>,
    /// Credential check
    pub auth: Arc<dyn Authenticator>,
    /// Session lookup
    pub sessions: Arc<dyn SessionDirectory>,
    /// Connection timers and limits
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// Build state from its parts
    pub fn new(
        hub: HubHandle,
        engine: Arc<ExecutionEngine>,
        auth: Arc<dyn Authenticator>,
        sessions: Arc<dyn SessionDirectory>,
        realtime: RealtimeConfig,
    ) -> Self {
        AppState {
            hub,
            engine,
            auth,
            sessions,
            realtime,
        }
    }

    /// Build state from configuration, starting the hub
    pub fn from_config(config: &Config) -> Result<(Self, JoinHandle<()>)> {
        let (hub, hub_task) = Hub::spawn(config.realtime.hub_command_capacity);
        let engine = Arc::new(create_engine(&config.sandbox)?);
        let state = AppState::new(
            hub,
            engine,
            Arc::new(StaticTokenAuthenticator::new(&config.auth)),
            Arc::new(InMemorySessionDirectory::new()),
            config.realtime.clone(),
        );
        Ok((state, hub_task))
    }
}

// ---- Router ----

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/ws", get(handlers::ws_upgrade))
        .route("/execute", post(handlers::execute))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

/// Serve on an already bound listener until ctrl-c
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Bind the configured address and serve
pub async fn run(config: Config) -> Result<()> {
    let (state, hub_task) = AppState::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address: {}", e)))?;
    let listener = TcpListener::bind(addr).await?;
    info!("Coderoom listening on http://{}", listener.local_addr()?);

    serve(listener, state).await?;

    hub_task.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, AuthMode};
    use crate::sandbox::{RunOutput, SandboxRuntime};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures::{SinkExt, StreamExt};
    use secrecy::SecretString;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::Message;
    use tower::ServiceExt;

    struct EchoRuntime;

    #[async_trait]
    impl SandboxRuntime for EchoRuntime {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(&self, source: &str, _deadline: Instant) -> Result<RunOutput> {
            Ok(RunOutput::completed(source.to_string(), String::new()))
        }
    }

    async fn state(auth: AuthConfig) -> AppState {
        let (hub, _task) = Hub::spawn(64);
        let engine = ExecutionEngine::new(Duration::from_secs(5), Duration::from_secs(10))
            .with_runtime("python", Arc::new(EchoRuntime));
        let sessions = InMemorySessionDirectory::new();
        sessions.insert("abc", "python").await;

        AppState::new(
            hub,
            Arc::new(engine),
            Arc::new(StaticTokenAuthenticator::new(&auth)),
            Arc::new(sessions),
            RealtimeConfig::default(),
        )
    }

    fn token_auth() -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Token,
            tokens: vec![SecretString::from("s3cret")],
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(state(AuthConfig::default()).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["languages"][0], "python");
        assert_eq!(json["hub"]["connections"], 0);
    }

    #[tokio::test]
    async fn test_execute_requires_token() {
        let app = build_router(state(token_auth()).await);
        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"code":"print(1)","language":"python"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let app = build_router(state(token_auth()).await);
        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::from(r#"{"sourceText":"print(1)","languageId":"py"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["output"], "print(1)");
        assert!(json["elapsedMs"].is_u64());
    }

    #[tokio::test]
    async fn test_execute_unsupported_language_in_body() {
        let app = build_router(state(AuthConfig::default()).await);
        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"code":"x","language":"cobol"}"#))
            .unwrap();

        let json = body_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "unsupported language: cobol");
    }

    #[tokio::test]
    async fn test_execute_checks_token_before_body() {
        let app = build_router(state(token_auth()).await);
        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::from(r#"{"language":"python"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().starts_with("JSON"));
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_source() {
        let app = build_router(state(AuthConfig::default()).await);
        let request = Request::post("/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"code":"  ","language":"python"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let app = build_router(state(AuthConfig::default()).await);
        let request = Request::post("/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"language":"go"}"#))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["sessionId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(Request::get(format!("/sessions/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["language"], "go");
        assert!(json["code"].as_str().unwrap().contains("package main"));

        let response = app
            .oneshot(Request::get("/sessions/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_checks_before_upgrade() {
        let app = build_router(state(token_auth()).await);

        let response = app
            .clone()
            .oneshot(Request::get("/sessions/abc/ws?token=wrong").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(Request::get("/sessions/nope/ws?token=s3cret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_url_upgrade_checks_token() {
        let app = build_router(state(token_auth()).await);
        let request = Request::get("/sessions/abc?token=wrong")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Without upgrade headers the same URL returns the record
        let response = app
            .oneshot(Request::get("/sessions/abc?token=wrong").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["sessionId"], "abc");
    }

    async fn next_text<S>(socket: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("no message within 5s")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_two_clients_round_trip() {
        let state = state(token_auth()).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));

        let url = format!("ws://{}/sessions/abc/ws?token=s3cret", addr);
        let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let greeting = next_text(&mut alice).await;
        assert_eq!(greeting["type"], "connected");
        assert_eq!(greeting["data"]["sessionId"], "abc");

        // The session URL itself also accepts the upgrade
        let session_url = format!("ws://{}/sessions/abc?token=s3cret", addr);
        let (mut bob, _) = tokio_tungstenite::connect_async(session_url.as_str()).await.unwrap();
        let greeting = next_text(&mut bob).await;
        assert_eq!(greeting["data"]["peers"].as_array().unwrap().len(), 1);

        let joined = next_text(&mut alice).await;
        assert_eq!(joined["type"], "peer-joined");
        assert_eq!(joined["data"]["id"], greeting["data"]["userId"]);

        let update = r#"{"type":"code-update","data":{"code":"print('hi')"}}"#;
        alice.send(Message::text(update)).await.unwrap();

        let received = next_text(&mut bob).await;
        assert_eq!(received["type"], "code-update");
        assert_eq!(received["data"]["code"], "print('hi')");

        bob.close(None).await.unwrap();
        let left = next_text(&mut alice).await;
        assert_eq!(left["type"], "peer-left");
    }
}
