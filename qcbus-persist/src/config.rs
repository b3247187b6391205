//! 数据库连接配置
//!
//! 可由构建器显式构造，也可从 `DB_` 前缀的环境变量读取：
//!
//! | 变量 | 含义 | 默认 |
//! |---|---|---|
//! | `DB_URL` | 连接串 | `sqlite::memory:` |
//! | `DB_MAX_CONNECTIONS` | 连接池上限 | 10 |
//! | `DB_MIN_CONNECTIONS` | 连接池下限 | 0 |
//! | `DB_ACQUIRE_TIMEOUT_SECS` | 获取连接超时（秒） | 30 |
//!
use crate::error::{PersistError, PersistResult};
use bon::Builder;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, Builder)]
pub struct DatabaseConfig {
    #[builder(into, default = DEFAULT_URL.to_string())]
    pub url: String,
    #[builder(default = 10)]
    pub max_connections: u32,
    #[builder(default = 0)]
    pub min_connections: u32,
    #[builder(default = Duration::from_secs(30))]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DatabaseConfig {
    /// 未设置的变量取默认值，无法解析的变量返回 `Precondition`
    pub fn from_env() -> PersistResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: std::env::var("DB_URL").unwrap_or(defaults.url),
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections)?,
            acquire_timeout: Duration::from_secs(env_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )?),
        })
    }

    #[cfg(feature = "sqlite")]
    pub async fn connect_sqlite(&self) -> PersistResult<sqlx::SqlitePool> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let options = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);
        debug!(url = %self.url, max = self.max_connections, "connecting sqlite pool");
        Ok(SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await?)
    }

    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(&self) -> PersistResult<sqlx::PgPool> {
        use sqlx::postgres::PgPoolOptions;

        debug!(url = %self.url, max = self.max_connections, "connecting postgres pool");
        Ok(PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await?)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> PersistResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| PersistError::precondition(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
