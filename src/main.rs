use std::sync::Arc;

use rusqlite::Connection;
use tracing::info;

mod api;
mod attachments;
mod config;
mod dispatch;
mod error;
mod fs;
mod import;
mod model;
mod overrides;
mod render;
mod resolve;
mod schedule;
mod smtp;
mod store;

use crate::api::AppState;
use crate::config::Config;

// ── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailmerge=info,tower_http=info".parse().unwrap()),
        )
        .init();

    let config = Config::load();
    info!(
        server = %format!("{}:{}", config.server_host, config.server_port),
        db = %config.db_path,
        local_files = config.capabilities.has_local_file_access,
        "starting mailmerge"
    );

    let conn = Connection::open(&config.db_path).expect("failed to open database");
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        .expect("failed to set pragmas");
    store::init_db(&conn).expect("failed to initialize database");

    if config.seed_relay.host.is_empty() {
        info!("no relay configured (use PUT /relay to set)");
    } else {
        info!(
            host = %config.seed_relay.host,
            port = config.seed_relay.port,
            user = %config.seed_relay.user,
            "relay settings loaded from environment"
        );
    }

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    let state = Arc::new(AppState::new(config, conn));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");

    info!("listening on {bind_addr}");
    axum::serve(listener, app).await.expect("server error");
}
