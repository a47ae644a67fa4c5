use axum::http::{header, HeaderName, HeaderValue, Method};
use redliner::api;
use redliner::app_state::AppState;
use redliner::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where the environment came from; logged once tracing is up.
enum EnvFile {
    Loaded(PathBuf),
    Failed(PathBuf, dotenvy::Error),
    NotFound(PathBuf),
    NoCwd(std::io::Error),
}

/// Loads the nearest `.env` in the current directory or its ancestors.
fn load_env_file() -> EnvFile {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => return EnvFile::NoCwd(e),
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            return match dotenvy::from_path(&candidate) {
                Ok(_) => EnvFile::Loaded(candidate),
                Err(e) => EnvFile::Failed(candidate, e),
            };
        }

        if !current.pop() {
            return EnvFile::NotFound(cwd);
        }
    }
}

fn log_env_file(outcome: &EnvFile) {
    match outcome {
        EnvFile::Loaded(path) => {
            tracing::info!(path = %path.display(), "Loaded environment from .env");
        }
        EnvFile::Failed(path, e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load .env file");
        }
        EnvFile::NotFound(cwd) => {
            tracing::info!(
                cwd = %cwd.display(),
                "No .env file found in current directory or ancestors; using process environment only"
            );
        }
        EnvFile::NoCwd(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before the filter is built so RUST_LOG from `.env` applies. Searching
    // ancestors lets a run from `redliner/` pick up the repo-root `.env`.
    let env_file = load_env_file();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redliner=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    log_env_file(&env_file);

    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        default_model = %config.default_model_id,
        mock = config.mock,
        sessions_dir = %config.sessions_dir.display(),
        "redliner starting"
    );

    let allowed_origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-session-id"),
            HeaderName::from_static("x-auto-approve-tools"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    let port = config.port;
    let app_state = Arc::new(AppState::bootstrap(config).await);
    let api_state = api::ApiState { app_state };

    let app = api::router()
        .with_state(api_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Starting HTTP server");
    axum::serve(listener, app).await?;
    Ok(())
}
