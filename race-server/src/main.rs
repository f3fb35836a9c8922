use std::sync::Arc;

use tokio::signal;
use tracing::info;

use race_persistence::connection::connect_and_migrate;
use race_persistence::{ResultRepository, RoundRepository};
use race_server::{
    auth::AuthService, channel::ChannelHub, config::Config, create_routes,
    round_manager::RoundManager,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting typing race server...");

    let config = Config::new();

    // Initialize database connection and run migrations
    let db = match connect_and_migrate().await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to connect to database and run migrations: {}", e);
            std::process::exit(1);
        }
    };

    let rounds = Arc::new(RoundRepository::new(db.clone()));
    let results = Arc::new(ResultRepository::new(db.clone()));
    let round_manager = Arc::new(RoundManager::new(
        RoundRepository::new(db),
        config.round_duration_seconds,
    ));
    let hub = Arc::new(ChannelHub::new());

    // First-boot bootstrap of the sentence pool; rounds cannot start while
    // the pool is empty.
    if let Err(e) = seed_sentences_if_empty(&rounds).await {
        tracing::error!("Failed to seed sentences: {}", e);
        std::process::exit(1);
    }

    // Check for dev mode
    let auth_service =
        if std::env::var("AUTH_DEV_MODE").unwrap_or_else(|_| "false".to_string()) == "true" {
            info!("Starting in development authentication mode - JWT validation disabled");
            Arc::new(AuthService::new_dev_mode())
        } else {
            match std::env::var("JWT_SECRET") {
                Ok(secret) => Arc::new(AuthService::new(&secret)),
                Err(_) => {
                    tracing::error!("JWT_SECRET must be set (or AUTH_DEV_MODE=true)");
                    std::process::exit(1);
                }
            }
        };

    let routes = create_routes(
        hub,
        round_manager,
        rounds,
        results,
        auth_service,
        config.clone(),
    );

    info!("Server starting on {}:{}", config.host, config.port);

    let addr = (
        config.host.parse::<std::net::IpAddr>().unwrap(),
        config.port,
    );

    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        // Wait for SIGINT (Ctrl+C) or SIGTERM
        #[cfg(unix)]
        {
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).unwrap();
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();

            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    });

    info!(
        "Server started successfully on {}. Press Ctrl+C to stop.",
        addr
    );
    server.await;
    info!("Server shutdown complete.");
}

/// Seed the sentence pool from `SENTENCES_FILE` (one sentence per line, an
/// optional tab-separated attribution after the text) when the pool is
/// empty. An empty pool without a seed file is only a warning here; ensure
/// calls will surface the configuration error per request.
async fn seed_sentences_if_empty(
    rounds: &RoundRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    if !rounds.sentence_pool().await?.is_empty() {
        return Ok(());
    }

    let path = match std::env::var("SENTENCES_FILE") {
        Ok(path) => path,
        Err(_) => {
            tracing::warn!(
                "Sentence pool is empty and SENTENCES_FILE is not set; rounds cannot start until sentences are seeded"
            );
            return Ok(());
        }
    };

    let contents = std::fs::read_to_string(&path)?;
    let mut seeded = 0usize;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (text, source) = match line.split_once('\t') {
            Some((text, source)) => (text, Some(source)),
            None => (line, None),
        };
        rounds.insert_sentence(text, source).await?;
        seeded += 1;
    }

    info!("Seeded {} sentences from {}", seeded, path);
    Ok(())
}
