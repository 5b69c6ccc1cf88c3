use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::aggregate::{DailyStat, aggregate};
use crate::config::{self, TrackerConfig};
use crate::event::{EditorEvent, parse_line};
use crate::process_guard::{self, RunningState};
use crate::server::{StartOutcome, StatsServer, StoreSnapshot};
use crate::session::DocumentRef;
use crate::store::{SessionStore, read_sessions};
use crate::tracker::{ActivityTracker, SharedTracker};
use crate::ui::{self, DashboardData};
use crate::util::{format_hours, human_duration, now_ms, today_key};

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct TrackSettings {
    pub sessions_path: PathBuf,
    pub bind: String,
    pub port: u16,
    pub serve_on_start: bool,
    pub dashboard_days: usize,
}

impl TrackSettings {
    pub fn resolve(
        config: &TrackerConfig,
        serve: bool,
        port: Option<u16>,
        sessions: Option<&Path>,
    ) -> Self {
        Self {
            sessions_path: config.sessions_path(sessions),
            bind: config.server.bind.clone(),
            port: config.effective_port(port),
            serve_on_start: serve || config.server.auto_start,
            dashboard_days: config.dashboard.days,
        }
    }
}

/// Records sessions from editor events on stdin until EOF, Ctrl+C or
/// SIGTERM, then finalizes whatever session is still open.
pub fn run_tracker(settings: TrackSettings) -> Result<()> {
    let _guard = process_guard::acquire_writer_lock(&settings.sessions_path)?;
    let runtime = build_runtime()?;
    let result = runtime.block_on(track_events(settings));
    // stdin reads run on a blocking thread that may never return
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn track_events(settings: TrackSettings) -> Result<()> {
    let tracker = ActivityTracker::load(&settings.sessions_path).into_shared();
    let mut server = StatsServer::new(settings.bind.clone(), settings.port);
    info!(
        sessions = %settings.sessions_path.display(),
        "tracking editor events from stdin"
    );

    if settings.serve_on_start {
        start_server(&mut server, &tracker).await;
    }

    let input = BufReader::new(tokio::io::stdin());
    drive_tracker(
        input,
        shutdown_signal(),
        &tracker,
        &mut server,
        settings.dashboard_days,
    )
    .await;
    Ok(())
}

/// Dispatches events from `input` until it ends or `shutdown` resolves. The
/// open session is flushed and the server stopped on every exit path.
async fn drive_tracker<R>(
    input: R,
    shutdown: impl Future<Output = ()>,
    tracker: &SharedTracker,
    server: &mut StatsServer,
    dashboard_days: usize,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(event)) => {
                        handle_event(event, tracker, server, dashboard_days).await;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %format!("{err:#}"), "skipping editor event"),
                },
                Ok(None) => {
                    debug!("editor event stream closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "failed to read editor events");
                    break;
                }
            }
        }
    }

    lock(tracker).flush(now_ms());
    server.shutdown().await;
}

/// Resolves on Ctrl+C, or on SIGTERM where signals exist.
async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; stopping"),
            Err(err) => {
                warn!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("terminate signal received; stopping");
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

async fn handle_event(
    event: EditorEvent,
    tracker: &SharedTracker,
    server: &mut StatsServer,
    dashboard_days: usize,
) {
    let now = now_ms();
    match event {
        EditorEvent::Open { path, language } => {
            lock(tracker).document_opened(&DocumentRef::new(path, language), now);
        }
        EditorEvent::Close { path, language } => {
            lock(tracker).document_closed(&DocumentRef::new(path, language), now);
        }
        EditorEvent::StartServer => start_server(server, tracker).await,
        EditorEvent::ShowDashboard => {
            let (stats, current) = {
                let guard = lock(tracker);
                (guard.daily_stats(), guard.current(now))
            };
            let today = today_key();
            let data = DashboardData {
                today: &today,
                stats: &stats,
                current: current.as_ref(),
                days: dashboard_days,
            };
            if let Err(err) = ui::draw(&data) {
                warn!(error = %err, "failed to render dashboard");
            }
        }
    }
}

async fn start_server(server: &mut StatsServer, tracker: &SharedTracker) {
    match server.start(tracker.clone()).await {
        Ok(StartOutcome::Started(addr)) => {
            println!("Stats server listening on http://{addr}");
        }
        Ok(StartOutcome::AlreadyRunning(addr)) => {
            println!("Stats server already running on http://{addr}");
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            warn!(error = %format!("{err:#}"), "stats server unavailable");
            println!("Stats server failed to start: {err:#}");
        }
    }
}

fn lock(tracker: &SharedTracker) -> MutexGuard<'_, ActivityTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serves the persisted history read-only until Ctrl+C or SIGTERM.
pub fn run_server(config: &TrackerConfig, port: Option<u16>, sessions: Option<&Path>) -> Result<()> {
    let sessions_path = config.sessions_path(sessions);
    let mut server = StatsServer::new(config.server.bind.clone(), config.effective_port(port));
    let runtime = build_runtime()?;
    runtime.block_on(async {
        let source = Arc::new(StoreSnapshot::new(&sessions_path));
        let addr = match server.start(source).await.context("failed to start stats server")? {
            StartOutcome::Started(addr) | StartOutcome::AlreadyRunning(addr) => addr,
        };
        println!(
            "Serving stats for {} on http://{addr}. Press Ctrl+C to stop.",
            sessions_path.display()
        );
        shutdown_signal().await;
        server.shutdown().await;
        Ok(())
    })
}

pub fn print_stats(config: &TrackerConfig, json: bool, sessions: Option<&Path>) -> Result<()> {
    let store = SessionStore::load(config.sessions_path(sessions));
    let stats = aggregate(store.sessions());

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }
    for line in stats_table(&stats) {
        println!("{line}");
    }
    Ok(())
}

fn stats_table(stats: &[DailyStat]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<10}  {:>13}  {:>5}  languages",
        "date", "time", "files"
    )];
    for stat in stats {
        let languages = stat
            .languages_used
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "{:<10}  {:>13}  {:>5}  {}",
            stat.date,
            format_hours(stat.total_hours),
            stat.files_edited.len(),
            languages
        ));
    }
    lines
}

pub fn show_dashboard(
    config: &TrackerConfig,
    days: Option<usize>,
    sessions: Option<&Path>,
) -> Result<()> {
    let store = SessionStore::load(config.sessions_path(sessions));
    let stats = aggregate(store.sessions());
    let today = today_key();
    ui::draw(&DashboardData {
        today: &today,
        stats: &stats,
        current: None,
        days: days.unwrap_or(config.dashboard.days),
    })
}

pub fn print_status(config: &TrackerConfig, sessions: Option<&Path>) -> Result<()> {
    let sessions_path = config.sessions_path(sessions);
    let store = SessionStore::load(&sessions_path);
    let stats = aggregate(store.sessions());
    let port = config.effective_port(None);
    let (is_running, writer_pid) = match process_guard::inspect_writer(&sessions_path)? {
        RunningState::NotRunning => (false, None),
        RunningState::Running { pid } => (true, pid),
    };

    println!("lockin status");
    println!("config: {}", config::config_path().display());
    println!("sessions: {}", store.path().display());
    println!("recorded_sessions: {}", store.len());
    if let Some(last) = store.sessions().iter().map(|s| s.end_time).max() {
        let ago = Duration::from_millis(now_ms().saturating_sub(last).max(0) as u64);
        println!("last_session_ended: {} ago", human_duration(ago));
    }
    println!("tracked_days: {}", stats.len());
    println!("tracker_running: {is_running}");
    if let Some(pid) = writer_pid {
        println!("tracker_pid: {pid}");
    }
    match probe_stats_server(&config.server.bind, port) {
        Some(days) => println!("stats_server: http://{}:{port} ({days} day(s))", probe_host(&config.server.bind)),
        None => println!("stats_server: not reachable on port {port}"),
    }
    Ok(())
}

pub fn doctor(
    config: &TrackerConfig,
    config_error: Option<&str>,
    sessions: Option<&Path>,
) -> Result<u8> {
    let mut issues = 0u8;
    let sessions_path = config.sessions_path(sessions);
    let port = config.effective_port(None);

    println!("lockin doctor");
    println!("config_path: {}", config::config_path().display());
    println!("sessions_path: {}", sessions_path.display());

    match config_error {
        None => println!("[OK] Config loaded."),
        Some(err) => {
            issues += 1;
            println!("[WARN] Config unusable, running on defaults: {err}");
        }
    }

    match read_sessions(&sessions_path) {
        Ok(sessions) if sessions_path.exists() => {
            println!("[OK] Session history readable ({} session(s)).", sessions.len());
        }
        Ok(_) => println!("[INFO] No session history yet; it will be created on first save."),
        Err(err) => {
            issues += 1;
            println!("[WARN] Session history unusable: {:#}", anyhow::Error::from(err));
        }
    }

    match check_writable(&sessions_path) {
        Ok(()) => println!("[OK] Session directory writable."),
        Err(err) => {
            issues += 1;
            println!("[WARN] Session directory not writable: {err:#}");
        }
    }

    if let RunningState::Running { pid } = process_guard::inspect_writer(&sessions_path)? {
        match pid {
            Some(pid) => println!("[INFO] Tracker running (PID {pid})."),
            None => println!("[INFO] Tracker running."),
        }
    }

    if probe_stats_server(&config.server.bind, port).is_some() {
        println!("[OK] Stats server answering on port {port}.");
    } else if port_available(&config.server.bind, port) {
        println!("[OK] Port {port} available for the stats server.");
    } else {
        issues += 1;
        println!("[WARN] Port {port} is taken by another program.");
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn check_writable(sessions_path: &Path) -> Result<()> {
    let dir = match sessions_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create a file in {}", dir.display()))?;
    Ok(())
}

/// Returns the number of days the server reports, or `None` when nothing
/// usable answers.
fn probe_stats_server(bind: &str, port: u16) -> Option<usize> {
    let url = format!("http://{}:{port}/stats", probe_host(bind));
    let agent = ureq::AgentBuilder::new().timeout(PROBE_TIMEOUT).build();
    let body = agent.get(&url).call().ok()?.into_string().ok()?;
    let stats: Vec<DailyStat> = serde_json::from_str(&body).ok()?;
    Some(stats.len())
}

fn probe_host(bind: &str) -> &str {
    match bind {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    }
}

fn port_available(bind: &str, port: u16) -> bool {
    StdTcpListener::bind((bind, port)).is_ok()
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
