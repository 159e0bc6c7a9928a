pub mod agent_core;
pub mod commands;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use agent_core::{AgentLoop, ConversationStore, ToolRouter};
use commands::ChatService;
use config::{AppConfig, LoggingConfig};
use inference::InferenceClient;
use mcp_client::{Connector, McpConnector};
use server::AppState;

/// Log file name inside `logging.dir`.
const LOG_FILE_NAME: &str = "cass-doctor.log";

/// Rotated log files kept next to the live one.
const LOG_KEEP: u32 = 3;

const DEFAULT_LOG_FILTER: &str = "cass_doctor=info,warn";

/// Initialize the tracing subscriber.
///
/// With `logging.dir` set, existing logs are rotated
/// (cass-doctor.log → .1 → .2 → .3) and a fresh file is opened behind a
/// line-flushing writer. Otherwise logs go to stderr.
///
/// Returns the log file path, if any.
pub fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let Some(dir) = logging.dir.as_deref() else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        return Ok(None);
    };

    let log_dir = Path::new(dir);
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, LOG_KEEP);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(Some(log_path))
}

/// Rotate log files: `cass-doctor.log` → `.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so a
/// crash never loses buffered log lines.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Build shared state from a resolved config.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let backend = InferenceClient::from_config(config.backend.clone())
        .context("failed to build backend client")?;
    let connector: Arc<dyn Connector> = Arc::new(McpConnector::new(config.provider.clone()));

    let model = backend.model().to_string();

    let agent = AgentLoop::new(Arc::new(backend), ToolRouter::new(), &config.agent);
    let chat = ChatService::new(
        Arc::new(ConversationStore::new()),
        agent,
        connector,
        &config.agent.base_prompt,
        config.backend.has_credentials(),
    );
    Ok(AppState::new(chat, &model))
}

/// Load config, start logging, and serve until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let dotenv = config::load_dotenv(Path::new(".")).context("failed to load .env")?;
    let config = AppConfig::resolve().context("failed to load configuration")?;
    let log_file = init_tracing(&config.logging)?;
    if let Some(path) = &dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
    let bind = config.bind_addr()?;

    let state = Arc::new(build_state(&config)?);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %bind,
        model = %config.backend.model,
        transport = %state.chat.connector().describe(),
        max_rounds = config.agent.max_rounds,
        log_file = ?log_file,
        pid = std::process::id(),
        "=== cass-doctor starting ==="
    );
    if !config.backend.has_credentials() {
        tracing::warn!("OPENAI_API_KEY is not set; chat requests will be rejected");
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("cass-doctor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
