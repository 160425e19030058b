use std::net::SocketAddr;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use transcription_suite::config::AppConfig;
use transcription_suite::db::DatabaseManager;
use transcription_suite::http::build_router;
use transcription_suite::state::AppState;
use transcription_suite::token_store::TokenStore;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("default log filter is always valid");
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    std::fs::create_dir_all(config.audio_dir())?;
    std::fs::create_dir_all(config.logs_dir())?;
    std::fs::create_dir_all(config.backups_dir())?;

    let db = DatabaseManager::new(config.database_path())?;
    let tokens = TokenStore::load(config.tokens_path()).await?;

    let tls_enabled = config.server.tls.enabled;
    let cert_file = config.server.tls.cert_file.clone();
    let key_file = config.server.tls.key_file.clone();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = AppState::new(config, db, tokens);
    let router = build_router(state);

    if tls_enabled {
        let (cert, key) = match (cert_file, key_file) {
            (Some(cert), Some(key)) => (cert, key),
            _ => anyhow::bail!("TLS_ENABLED is set but TLS_CERT_FILE/TLS_KEY_FILE are missing"),
        };

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .map_err(|err| anyhow::anyhow!("failed to load TLS certificate/key: {err}"))?;

        tracing::info!(%addr, "listening (tls)");
        axum_server::bind_rustls(addr, tls_config)
            .serve(router.into_make_service())
            .await?;
    } else {
        tracing::info!(%addr, "listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
    }

    Ok(())
}
