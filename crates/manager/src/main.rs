//! Formloom plugin manager
//!
//! Registry, event router, action proxy and liveness poller for plugins.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formloom_plugin_sdk::contract::{INBOUND_EXCHANGE, INBOUND_ROUTING_KEY};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use formloom_manager::bus::{RedisConsumer, RedisPublisher, RedisQueue};
use formloom_manager::config::Config;
use formloom_manager::event_router::{EventRouter, RepublishWorker};
use formloom_manager::metrics::Metrics;
use formloom_manager::registry::PgRegistry;
use formloom_manager::state::{AppState, RuntimeSettings};
use formloom_manager::{cli, db, routes};

/// Consumer group the router reads the inbound stream through.
const ROUTER_GROUP: &str = "router";

#[derive(Parser, Debug)]
#[command(name = "plugin-manager", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server, event router and liveness pollers (default).
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Inspect or change plugin registrations.
    Plugins {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List registered plugins.
    List,
    /// Enable a plugin for a team.
    Enable {
        plugin_id: Uuid,
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        team: i64,
    },
    /// Disable a plugin for a team.
    Disable {
        plugin_id: Uuid,
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        team: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let pool = db::create_pool(&config).await?;
            db::run_migrations(&pool).await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Plugins { command } => {
            let pool = db::create_pool(&config).await?;
            let registry = PgRegistry::new(pool);
            match command {
                PluginCommand::List => cli::cmd_plugin_list(&registry).await,
                PluginCommand::Enable { plugin_id, team } => {
                    cli::cmd_set_enabled(&registry, plugin_id, team, true).await
                }
                PluginCommand::Disable { plugin_id, team } => {
                    cli::cmd_set_enabled(&registry, plugin_id, team, false).await
                }
            }
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(port = config.port, "Starting Formloom plugin manager");

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let redis = redis::Client::open(config.redis_url.as_str()).context("invalid REDIS_URL")?;
    let mut conn = redis
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to Redis")?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .context("Redis did not answer PING")?;
    info!("Database and Redis connections established");

    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(PgRegistry::new(pool));
    let publisher = Arc::new(RedisPublisher::new(redis.clone()));
    let queue = Arc::new(RedisQueue::new(redis.clone()));

    // Stopped in order on shutdown: consumer, retry worker, pollers, then HTTP.
    let consumer_token = CancellationToken::new();
    let worker_token = CancellationToken::new();
    let poller_token = CancellationToken::new();

    let state = AppState::new(
        registry.clone(),
        publisher.clone(),
        metrics.clone(),
        RuntimeSettings::from(&config),
        poller_token,
    );

    let consumer = RedisConsumer::connect(
        &redis,
        INBOUND_EXCHANGE,
        INBOUND_ROUTING_KEY,
        ROUTER_GROUP,
        &config.event_consumer_name,
    )
    .await
    .context("failed to attach to the inbound event stream")?;

    let router = EventRouter::new(registry.clone(), publisher.clone(), metrics.clone())
        .with_retry_queue(queue.clone());
    let router_handle = {
        let token = consumer_token.clone();
        tokio::spawn(async move { router.run(Box::new(consumer), token).await })
    };

    let worker = RepublishWorker::new(queue, publisher, metrics, config.republish_max_attempts);
    let worker_handle = {
        let token = worker_token.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    if let Err(e) = state.poller().watch_all().await {
        error!(error = %e, "failed to start liveness pollers for registered plugins");
    }

    let app = routes::build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;
    info!(%addr, "Server listening");

    let poller = state.poller().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down");

            consumer_token.cancel();
            if let Err(e) = router_handle.await {
                error!(error = %e, "event router task failed");
            }
            worker_token.cancel();
            if let Err(e) = worker_handle.await {
                error!(error = %e, "republish worker task failed");
            }
            poller.shutdown().await;
        })
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
