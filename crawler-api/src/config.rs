use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND", default = "0.0.0.0:3000")]
    pub bind: String,

    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "JWT_SECRET")]
    pub jwt_secret: String,

    #[envconfig(from = "JWT_EXPIRY_SECONDS", default = "3600")]
    pub jwt_expiry_seconds: i64,

    #[envconfig(from = "NUMBER_OF_CRAWLERS", default = "4")]
    pub number_of_crawlers: usize,

    #[envconfig(from = "MAX_CONCURRENT_CRAWLS", default = "128")]
    pub max_concurrent_crawls: usize,

    #[envconfig(from = "CRAWL_TIMEOUT_SECONDS", default = "30")]
    pub crawl_timeout_seconds: u64,

    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "20")]
    pub max_pg_connections: u32,
}

impl Config {
    /// Loads configuration from the environment and rejects values
    /// `envconfig` itself can't catch, such as a `JWT_SECRET` that is set
    /// but empty.
    pub fn load() -> Result<Self, String> {
        let config = Self::init_from_env().map_err(|e| e.to_string())?;
        if config.jwt_secret.is_empty() {
            return Err("JWT_SECRET must be set to a non-empty value".to_owned());
        }
        Ok(config)
    }

    pub fn bind(&self) -> String {
        self.bind.clone()
    }

    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl_timeout_seconds)
    }

    pub fn pool_config(&self) -> crawler_core::PoolConfig {
        crawler_core::PoolConfig {
            initial_workers: self.number_of_crawlers,
            max_concurrent_crawls: self.max_concurrent_crawls,
            crawl_timeout: self.crawl_timeout(),
        }
    }
}
