use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::aggregate::{DailyStat, aggregate};
use crate::session::CurrentSession;
use crate::store::SessionStore;
use crate::tracker::ActivityTracker;
use crate::util::now_ms;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Sources ──

/// Read-only view the HTTP endpoints are served from.
pub trait StatsSource: Send + Sync + 'static {
    fn daily_stats(&self) -> anyhow::Result<Vec<DailyStat>>;
    fn current_session(&self, now: i64) -> anyhow::Result<Option<CurrentSession>>;
}

impl StatsSource for Mutex<ActivityTracker> {
    fn daily_stats(&self) -> anyhow::Result<Vec<DailyStat>> {
        let tracker = self.lock().map_err(|_| anyhow!("tracker state poisoned"))?;
        Ok(tracker.daily_stats())
    }

    fn current_session(&self, now: i64) -> anyhow::Result<Option<CurrentSession>> {
        let tracker = self.lock().map_err(|_| anyhow!("tracker state poisoned"))?;
        Ok(tracker.current(now))
    }
}

/// Re-reads the persisted history on every request. Never has an open
/// session.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    sessions_path: PathBuf,
}

impl StoreSnapshot {
    pub fn new(sessions_path: impl Into<PathBuf>) -> Self {
        Self {
            sessions_path: sessions_path.into(),
        }
    }
}

impl StatsSource for StoreSnapshot {
    fn daily_stats(&self) -> anyhow::Result<Vec<DailyStat>> {
        let store = SessionStore::load(&self.sessions_path);
        Ok(aggregate(store.sessions()))
    }

    fn current_session(&self, _now: i64) -> anyhow::Result<Option<CurrentSession>> {
        Ok(None)
    }
}

// ── Error Handling ──

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind stats server on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ── Router ──

pub type SharedSource = Arc<dyn StatsSource>;

pub fn router(source: SharedSource) -> Router {
    Router::new()
        .route(
            "/stats",
            get(get_stats).options(preflight).fallback(fallback),
        )
        .route(
            "/current-session",
            get(get_current_session)
                .options(preflight)
                .fallback(fallback),
        )
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .with_state(source)
}

async fn get_stats(State(source): State<SharedSource>) -> Result<Json<Vec<DailyStat>>, AppError> {
    Ok(Json(source.daily_stats()?))
}

async fn get_current_session(
    State(source): State<SharedSource>,
) -> Result<Json<Option<CurrentSession>>, AppError> {
    Ok(Json(source.current_session(now_ms())?))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn fallback(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

// ── Lifecycle ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SocketAddr),
    AlreadyRunning(SocketAddr),
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Background HTTP server for the stats endpoints. Starting it again while
/// it is running is a no-op.
pub struct StatsServer {
    bind: String,
    port: u16,
    running: Option<RunningServer>,
}

impl StatsServer {
    pub fn new(bind: impl Into<String>, port: u16) -> Self {
        Self {
            bind: bind.into(),
            port,
            running: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .filter(|running| !running.task.is_finished())
            .map(|running| running.addr)
    }

    pub fn is_running(&self) -> bool {
        self.local_addr().is_some()
    }

    pub async fn start(&mut self, source: SharedSource) -> Result<StartOutcome, ServerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(StartOutcome::AlreadyRunning(addr));
        }

        let addr = format!("{}:{}", self.bind, self.port);
        let bind_err = |source: io::Error| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let app = router(source);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await;
            if let Err(err) = served {
                warn!(error = %err, "stats server stopped with error");
            }
        });

        info!(addr = %local, "stats server listening on http://{local}");
        self.running = Some(RunningServer {
            addr: local,
            shutdown,
            task,
        });
        Ok(StartOutcome::Started(local))
    }

    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        let mut task = running.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("stats server did not stop in time; aborting");
            task.abort();
        }
    }
}
