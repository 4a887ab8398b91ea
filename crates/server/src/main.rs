use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cooker;
mod db;
mod web;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Host to advertise to cookers. Empty binds all interfaces and
    /// self-discovers a LAN address for BLE provisioning.
    #[arg(long, env, default_value = "")]
    server_host: String,

    /// Port the cookers dial into
    #[arg(long, env, default_value_t = 8080)]
    anova_server_port: u16,

    /// Port of the REST API
    #[arg(long, env, default_value_t = 8000)]
    rest_server_port: u16,

    /// Basic-auth credentials for the admin endpoints (empty disables them
    /// outside the local network)
    #[arg(long, env, default_value = "")]
    admin_username: String,

    #[arg(long, env, default_value = "")]
    admin_password: String,

    /// Path of the DuckDB device database
    #[arg(long, env, default_value = "anova.db")]
    database_url: String,

    /// "dev" or "prod"
    #[arg(long, env, default_value = "prod")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.env);

    let manager = cooker::Manager::start(&args.server_host, args.anova_server_port)
        .await
        .context("starting cooker endpoint")?;
    {
        let (host, port) = manager.server_info();
        info!("Cooker endpoint started on {}:{}", host, port);
    }

    let store = db::Store::open(&args.database_url)
        .await
        .with_context(|| format!("opening device store at {}", args.database_url))?;
    store.watch_connections(&manager);

    let app = web::app(
        manager.clone(),
        store,
        web::AdminCredentials {
            username: args.admin_username,
            password: args.admin_password,
        },
    );

    let rest_addr = SocketAddr::from(([0, 0, 0, 0], args.rest_server_port));
    let listener = TcpListener::bind(rest_addr)
        .await
        .with_context(|| format!("binding rest listener on {rest_addr}"))?;
    info!("REST API started on http://{}", rest_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down");
    manager.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(env: &str) {
    let default_directives = if env.eq_ignore_ascii_case("dev") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
