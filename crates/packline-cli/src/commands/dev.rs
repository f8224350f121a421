//! `packline dev` command implementation.
//!
//! Serves the published build from memory and pushes change notifications
//! over a WebSocket:
//!
//! ```text
//! GET /static/*              files of the published build
//! GET /__packline/events     notification channel
//! GET /__packline/client.js  live-reload client
//! GET /__packline/module/*id replacement code for one module
//! GET <anything else>        the HTML shell
//! ```
//!
//! File changes go through a coalescing watcher into the rebuild queue; the
//! driver rebuilds one batch at a time and publishes the result.

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{miette, IntoDiagnostic, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use packline_core::bundler::content_type;
use packline_core::dev::client::{CLIENT_JS, CLIENT_PATH, EVENTS_PATH};
use packline_core::dev::{DevDriver, DevSession, Notification, RebuildQueue};
use packline_core::{Mode, Pipeline, PipelineConfig, ProcessConfig};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Quiet period that closes a batch of file events.
const COALESCE_WINDOW_MS: u64 = 50;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub cwd: PathBuf,
    pub mode: Mode,
    /// Explicit pipeline description file.
    pub config: Option<PathBuf>,
    pub process: ProcessConfig,
}

/// Run the dev server until Ctrl+C.
pub async fn run(action: DevAction) -> Result<()> {
    let process = action.process.clone();
    let config = PipelineConfig::load(&action.cwd, action.mode, &process, action.config.as_deref())
        .into_diagnostic()?;
    let pipeline = Arc::new(Pipeline::new(&action.cwd, config).into_diagnostic()?);
    let root = pipeline.root().to_path_buf();
    let ignored = vec![
        root.join(&pipeline.config().output.path),
        root.join("node_modules"),
    ];

    let session = Arc::new(DevSession::new());
    let queue = Arc::new(RebuildQueue::new());
    let driver = Arc::new(DevDriver::new(pipeline, Arc::clone(&session), Arc::clone(&queue)));
    driver
        .start()
        .await
        .map_err(|e| miette!(code = e.code(), "initial build failed: {e}"))?;

    {
        let queue = Arc::clone(&queue);
        let root = root.clone();
        std::thread::spawn(move || {
            if let Err(e) = watch_files(&root, &ignored, &queue) {
                error!(error = %e, "file watcher stopped");
            }
        });
    }
    let rebuilds = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.run().await })
    };

    let host_ip = if process.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        process.host.clone()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", process.port)
        .parse()
        .into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;

    println!();
    println!("  Dev server running at {}", process.public_origin());
    println!("  Watching {}", root.display());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();
    info!(%addr, "listening");

    axum::serve(listener, router(Arc::clone(&session)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()?;

    queue.close();
    let _ = rebuilds.await;
    Ok(())
}

/// HTTP surface over a dev session.
pub fn router(session: Arc<DevSession>) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(events))
        .route(CLIENT_PATH, get(serve_client))
        .route("/__packline/module/*id", get(serve_module))
        .route("/static/*path", get(serve_static))
        .fallback(serve_shell)
        .layer(CorsLayer::permissive())
        .with_state(session)
}

// ============================================================================
// Route Handlers
// ============================================================================

type AppState = Arc<DevSession>;

fn not_published() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "no build published").into_response()
}

fn with_type(content_type: &'static str, body: impl Into<Body>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Files under `/static/` come from the published build only.
async fn serve_static(AxumPath(path): AxumPath<String>, State(session): State<AppState>) -> Response {
    let Some(build) = session.build() else {
        return not_published();
    };
    let file = format!("static/{path}");
    match build.file(&file) {
        Some(bytes) => with_type(content_type(&file), bytes.to_vec()),
        None => (StatusCode::NOT_FOUND, format!("{file} not found")).into_response(),
    }
}

/// Every other path gets the HTML shell, so client-side routes resolve.
async fn serve_shell(method: Method, State(session): State<AppState>) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(build) = session.build() else {
        return not_published();
    };
    match build.html_shell() {
        Some(html) => with_type("text/html; charset=utf-8", html.to_string()),
        None => (StatusCode::NOT_FOUND, "build has no HTML page").into_response(),
    }
}

async fn serve_client() -> Response {
    with_type("application/javascript; charset=utf-8", CLIENT_JS)
}

/// Compiled code of one module, for hot replacement.
async fn serve_module(AxumPath(id): AxumPath<String>, State(session): State<AppState>) -> Response {
    let Some(build) = session.build() else {
        return not_published();
    };
    match build.record(&id) {
        Some(record) => with_type("application/javascript; charset=utf-8", record.code.clone()),
        None => (StatusCode::NOT_FOUND, format!("unknown module {id}")).into_response(),
    }
}

// ============================================================================
// WebSocket notifications
// ============================================================================

async fn events(ws: WebSocketUpgrade, State(session): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, session))
}

async fn handle_socket(mut socket: WebSocket, session: Arc<DevSession>) {
    let mut rx = session.subscribe();
    let hello = Notification::Connected {
        build: session.current().map(|p| p.ticket),
    };
    if socket.send(Message::Text(hello.to_json())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(notification) => {
                    if socket.send(Message::Text(notification.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "client lagged behind notifications");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// ============================================================================
// File Watching
// ============================================================================

/// Whether a changed path should not trigger a rebuild. Hidden entries are
/// judged relative to the project root.
fn should_ignore(path: &Path, root: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Forward file events to `queue`, batching events that arrive within
/// [`COALESCE_WINDOW_MS`] of each other.
fn watch_files(root: &Path, ignored: &[PathBuf], queue: &RebuildQueue) -> notify::Result<()> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let window = Duration::from_millis(COALESCE_WINDOW_MS);
    let mut batch = BTreeSet::new();
    loop {
        let received = if batch.is_empty() {
            rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(window)
        };
        match received {
            Ok(Ok(event)) => {
                batch.extend(
                    event
                        .paths
                        .into_iter()
                        .filter(|p| !should_ignore(p, root, ignored)),
                );
            }
            Ok(Err(e)) => warn!(error = %e, "watch error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!(files = batch.len(), "change batch");
                queue.push(std::mem::take(&mut batch));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use packline_core::bundler::{ModuleValue, StepContext, StepError, StepRegistry, TransformStep};
    use packline_core::config::{RuleConfig, StepSpec};
    use packline_core::dev::ServerState;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Start a served session for a small project on an ephemeral port.
    async fn serve(root: &Path) -> (String, Arc<DevDriver>) {
        let config = PipelineConfig::for_mode(Mode::Development, &ProcessConfig::default());
        serve_pipeline(Pipeline::new(root, config).unwrap()).await
    }

    async fn serve_pipeline(pipeline: Pipeline) -> (String, Arc<DevDriver>) {
        let pipeline = Arc::new(pipeline);
        let session = Arc::new(DevSession::new());
        let driver = Arc::new(DevDriver::new(
            pipeline,
            Arc::clone(&session),
            Arc::new(RebuildQueue::new()),
        ));
        driver.start().await.unwrap();
        assert_eq!(session.state(), ServerState::Serving);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(session)).await.unwrap();
        });
        (format!("http://{addr}"), driver)
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "import './App.css';\nconsole.log('hi');\n");
        write(dir.path(), "src/App.css", ".app { color: red; }\n");
        dir
    }

    #[tokio::test]
    async fn test_catch_all_returns_html_shell() {
        let dir = project();
        let (base, _driver) = serve(dir.path()).await;
        let client = reqwest::Client::new();

        for path in ["/", "/users/42/settings", "/deep/nested/route?tab=1"] {
            let res = client.get(format!("{base}{path}")).send().await.unwrap();
            assert_eq!(res.status(), 200, "{path}");
            assert!(res.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/html"));
            let body = res.text().await.unwrap();
            assert!(body.contains("static/js/bundle.js"));
        }

        let res = client.post(format!("{base}/form")).send().await.unwrap();
        assert_eq!(res.status(), 405);
    }

    #[tokio::test]
    async fn test_static_files_come_from_published_build() {
        let dir = project();
        let (base, _driver) = serve(dir.path()).await;

        let res = reqwest::get(format!("{base}/static/js/bundle.js")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/javascript"));
        assert!(res.text().await.unwrap().contains("__packline"));

        let res = reqwest::get(format!("{base}/static/js/missing.js")).await.unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_module_and_client_endpoints() {
        let dir = project();
        let (base, _driver) = serve(dir.path()).await;

        let res = reqwest::get(format!("{base}/__packline/module/src/App.css")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.text().await.unwrap().contains("src/App.css"));

        let res = reqwest::get(format!("{base}/__packline/module/src/Nope.js")).await.unwrap();
        assert_eq!(res.status(), 404);

        let res = reqwest::get(format!("{base}{CLIENT_PATH}")).await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.text().await.unwrap().contains(EVENTS_PATH));
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_serving_previous_build() {
        let dir = project();
        let (base, driver) = serve(dir.path()).await;
        let before = reqwest::get(format!("{base}/static/js/bundle.js"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        write(dir.path(), "src/index.js", "import './Gone';\n");
        let notification = driver.rebuild(vec![PathBuf::from("src/index.js")]).await;
        assert!(matches!(notification, Some(Notification::Error { .. })));

        let after = reqwest::get(format!("{base}/static/js/bundle.js"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    /// Advisory step that blocks while `hold` is set.
    struct Gate {
        hold: Arc<AtomicBool>,
        entered: Arc<AtomicBool>,
    }

    impl TransformStep for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        fn run(
            &self,
            input: ModuleValue,
            _options: &serde_json::Value,
            _cx: &mut StepContext<'_>,
        ) -> Result<ModuleValue, StepError> {
            if self.hold.load(Ordering::SeqCst) {
                self.entered.store(true, Ordering::SeqCst);
                while self.hold.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Ok(input)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requests_during_rebuild_see_previous_build() {
        let dir = project();
        let hold = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicBool::new(false));

        let mut registry = StepRegistry::with_builtins();
        registry.register(Arc::new(Gate {
            hold: Arc::clone(&hold),
            entered: Arc::clone(&entered),
        }));
        let mut config = PipelineConfig::for_mode(Mode::Development, &ProcessConfig::default());
        config.rules.push(RuleConfig {
            test: Some(r"\.css$".into()),
            advisory: true,
            steps: vec![StepSpec::new("gate")],
            ..Default::default()
        });
        let pipeline = Pipeline::with_registry(dir.path(), config, registry).unwrap();
        let (base, driver) = serve_pipeline(pipeline).await;
        let bundle = format!("{base}/static/js/bundle.js");
        let before = reqwest::get(&bundle).await.unwrap().text().await.unwrap();

        hold.store(true, Ordering::SeqCst);
        write(dir.path(), "src/App.css", ".app { color: blue; }\n");
        let rebuild = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.rebuild(vec![PathBuf::from("src/App.css")]).await })
        };
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(driver.session().state(), ServerState::Rebuilding);

        let res = reqwest::get(&bundle).await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), before);
        let res = reqwest::get(format!("{base}/settings")).await.unwrap();
        assert_eq!(res.status(), 200);

        hold.store(false, Ordering::SeqCst);
        let notification = rebuild.await.unwrap();
        assert!(matches!(notification, Some(Notification::ModuleReplace { .. })));
        assert_eq!(driver.session().state(), ServerState::Serving);
        let after = reqwest::get(&bundle).await.unwrap().text().await.unwrap();
        assert_ne!(after, before);
        assert!(after.contains("#00f"));
    }

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/home/me/.work/app");
        let ignored = vec![root.join("dist"), root.join("node_modules")];
        let ignore = |p: &str| should_ignore(&root.join(p), root, &ignored);
        assert!(ignore("dist/index.html"));
        assert!(ignore("node_modules/react/index.js"));
        assert!(ignore(".git/HEAD"));
        assert!(ignore("src/.App.js.swp"));
        assert!(!ignore("src/App.js"));
    }
}
