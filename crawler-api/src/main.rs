use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use eyre::Result;
use sqlx::postgres::PgPoolOptions;

use crawler_common::health::HealthRegistry;
use crawler_core::{HtmlAnalyzer, LinkChecker, Pool, RobotsCache};

use config::Config;
use repository::PgUrlRepository;

mod auth;
mod config;
mod error;
mod handlers;
mod repository;

/// Shared state handed to every axum handler: the database pool, the crawl
/// pool, the repository, process configuration, and the health registry.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub pool: Arc<Pool>,
    pub repo: Arc<PgUrlRepository>,
    pub config: Config,
    pub health: HealthRegistry,
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %listener.local_addr()?, "crawler-api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::load().expect("failed to load configuration from env");

    let db = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let health = HealthRegistry::new("crawler-api");
    let db_health = health
        .register("database".to_owned(), time::Duration::seconds(30))
        .await;
    let pool_health = health
        .register("crawler_pool".to_owned(), time::Duration::seconds(30))
        .await;

    let repo: Arc<PgUrlRepository> = Arc::new(PgUrlRepository::new(db.clone()));
    let http_client = reqwest::Client::new();
    let robots = Arc::new(RobotsCache::new(http_client.clone()));
    let link_checker = Arc::new(LinkChecker::new(http_client.clone(), robots));
    let analyzer = Arc::new(HtmlAnalyzer::new(http_client, link_checker));

    let pool_config = config.pool_config();
    let pool = Arc::new(Pool::new(
        repo.clone(),
        analyzer,
        pool_config.max_concurrent_crawls,
        pool_config.crawl_timeout,
        pool_config.initial_workers,
    ));
    pool.start(pool_config.initial_workers).await;
    pool_health.report_healthy().await;
    db_health.report_healthy().await;

    tokio::spawn(health_heartbeat(db_health, pool_health, pool.clone(), db.clone()));

    let bind = config.bind();
    let state = AppState {
        db,
        pool,
        repo,
        config,
        health,
    };

    let app = handlers::router(state);

    if let Err(e) = listen(app, bind).await {
        tracing::error!("failed to start crawler-api http server, {}", e);
    }
}

/// Periodically re-confirms liveness of the database and crawl pool so the
/// registry's staleness window doesn't trip on a healthy process.
async fn health_heartbeat(
    db_health: crawler_common::health::HealthHandle,
    pool_health: crawler_common::health::HealthHandle,
    pool: Arc<Pool>,
    db: sqlx::PgPool,
) {
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        if sqlx::query("SELECT 1").execute(&db).await.is_ok() {
            db_health.report_healthy().await;
        }
        if pool.worker_count() > 0 {
            pool_health.report_healthy().await;
        }
    }
}
