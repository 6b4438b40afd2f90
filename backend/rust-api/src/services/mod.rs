use crate::config::Config;
use crate::models::Dialect;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySqlPool, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod classifier;
pub mod comparator;
pub mod executor;
pub mod grading;
pub mod hints;
pub mod ledger;
pub mod mastery;
pub mod provisioner;
pub mod session_service;

/// Connection pools for the engines that run untrusted SQL. These point
/// at a restricted account, never at the application database.
pub struct SandboxPools {
    pub postgres: PgPool,
    pub mysql: MySqlPool,
}

pub type EnvKey = (i64, Dialect);

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub sandbox: SandboxPools,
    /// Serializes provisioning per (problem, dialect) within this process.
    pub env_locks: Mutex<HashMap<EnvKey, Arc<Mutex<()>>>>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        // Lazy pools so a down sandbox engine does not block startup.
        let postgres = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(&config.sandbox_postgres_url)?;
        let mysql = MySqlPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(&config.sandbox_mysql_url)?;

        Ok(Self {
            config,
            mongo,
            redis,
            sandbox: SandboxPools { postgres, mysql },
            env_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Lock handle for one sandbox environment. Cloned Arc so the map
    /// lock is released before the environment lock is awaited.
    pub async fn env_lock(&self, key: EnvKey) -> Arc<Mutex<()>> {
        let mut map = self.env_locks.lock().await;
        map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
