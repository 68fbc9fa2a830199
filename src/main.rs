use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqlproxy_fe::config::Config;
use sqlproxy_fe::http::HttpServer;
use sqlproxy_fe::metadata::CatalogManager;
use sqlproxy_fe::metrics::MetricsRegistry;
use sqlproxy_fe::mysql::{MysqlServer, StateMachine};
use sqlproxy_fe::query::UnsupportedPlanner;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlproxy_fe=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sqlproxy-fe");

    let config = Config::load()?;
    info!(
        mysql_port = config.mysql_port,
        http_port = config.http_port,
        users = config.users.len(),
        idle_timeout_secs = config.idle_timeout_secs,
        "Configuration loaded"
    );

    let catalog = Arc::new(
        CatalogManager::with_system_databases().with_version_comment(config.version_comment.clone()),
    );
    let metrics = Arc::new(MetricsRegistry::with_slow_query_threshold(
        config.slow_query_threshold(),
    ));

    // No execution engine is attached here; forwarded statements get ERR 1105.
    let machine = Arc::new(
        StateMachine::new(
            catalog,
            Arc::new(UnsupportedPlanner),
            metrics.clone(),
            Arc::new(config.clone()),
        )
        .with_server_version(config.server_version.clone()),
    );

    let mysql_server = MysqlServer::bind(&config.mysql_addr(), machine)
        .await?
        .with_idle_timeout(config.idle_timeout());
    let mysql_shutdown = mysql_server.shutdown_handle();
    let mut mysql_handle = tokio::spawn(async move {
        if let Err(e) = mysql_server.serve().await {
            error!("MySQL server error: {}", e);
        }
    });

    let (http_stop_tx, mut http_stop_rx) = watch::channel(false);
    let http_server = HttpServer::new(config.http_addr(), metrics);
    let mut http_handle = tokio::spawn(async move {
        let stop = async move {
            let _ = http_stop_rx.changed().await;
        };
        if let Err(e) = http_server.serve(stop).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("Connect with: mysql -h 127.0.0.1 -P {} -u root", config.mysql_port);

    tokio::select! {
        _ = &mut mysql_handle => {
            error!("MySQL server terminated");
        }
        _ = &mut http_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    mysql_shutdown.shutdown();
    let _ = http_stop_tx.send(true);
    if !mysql_handle.is_finished() {
        let _ = mysql_handle.await;
    }
    if !http_handle.is_finished() {
        let _ = http_handle.await;
    }

    info!("Shutting down sqlproxy-fe");
    Ok(())
}
