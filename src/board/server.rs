use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::db::BoardDb;
use super::reorder::ReorderStrategy;
use crate::config::TaskboardConfig;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub strategy: ReorderStrategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&TaskboardConfig::default())
    }
}

impl From<&TaskboardConfig> for ServerConfig {
    fn from(config: &TaskboardConfig) -> Self {
        Self {
            bind_addr: config.server.bind_addr.clone(),
            db_path: config.database.path.clone(),
            dev_mode: config.server.dev_mode,
            strategy: config.reorder.strategy,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the database, creating its directory first.
pub fn open_database(path: &std::path::Path) -> Result<BoardDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(path).context("Failed to initialize board database")
}

/// A bound but not yet serving board server.
pub struct BoardServer {
    listener: TcpListener,
    app: Router,
}

impl BoardServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let db = open_database(&config.db_path)?;
        let state = Arc::new(AppState::new(db, config.strategy));
        let app = build_router(state, config.dev_mode);

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
        Ok(Self { listener, app })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Serve until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")
    }
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let server = BoardServer::bind(&config).await?;
    let local_addr = server.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %config.db_path.display(),
        strategy = %config.strategy,
        dev_mode = config.dev_mode,
        "Taskboard server listening"
    );
    println!("Taskboard running at http://{}", local_addr);

    server.serve(shutdown_signal()).await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = BoardDb::new_in_memory().unwrap();
        build_router(
            Arc::new(AppState::new(db, ReorderStrategy::Fractional)),
            dev_mode,
        )
    }

    #[tokio::test]
    async fn test_router_health() {
        let response = test_router(false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = test_router(false)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dev_mode_enables_cors() {
        let request = || {
            Request::builder()
                .uri("/health")
                .header("origin", "http://localhost:5173")
                .body(Body::empty())
                .unwrap()
        };
        let dev = test_router(true).oneshot(request()).await.unwrap();
        assert!(dev.headers().contains_key("access-control-allow-origin"));
        let prod = test_router(false).oneshot(request()).await.unwrap();
        assert!(!prod.headers().contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_server_config_from_file_config() {
        let mut file = TaskboardConfig::default();
        file.server.bind_addr = "0.0.0.0:9000".into();
        file.reorder.strategy = ReorderStrategy::Shift;
        let config = ServerConfig::from(&file);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.strategy, ReorderStrategy::Shift);
        assert_eq!(ServerConfig::default().bind_addr, "127.0.0.1:3141");
    }

    #[tokio::test]
    async fn test_bind_creates_database_and_serves() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            db_path: dir.path().join("nested").join("board.db"),
            dev_mode: false,
            strategy: ReorderStrategy::Fractional,
        };
        let server = BoardServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert!(config.db_path.exists());
        assert_ne!(addr.port(), 0);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async {
            let _ = stop_rx.await;
        }));

        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
