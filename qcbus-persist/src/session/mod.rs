//! 会话（Session）协议
//!
//! 驱动层需要提供的最小能力：事务控制（含嵌套/保存点）、隔离级别、
//! 原始 SQL 逃生口，以及执行一条语句并以记录形式返回结果。
//! 内置基于 sqlx 的 SQLite（默认）与 Postgres 实现。
//!
use crate::error::PersistResult;
use crate::statement::{Dialect, Statement};
use crate::value::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PgSession;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSession;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}

/// 一个逻辑数据库会话；同一时刻只允许一个任务使用
#[async_trait]
pub trait Session: Send {
    fn dialect(&self) -> Dialect;

    /// 会话是否仍可使用（未关闭）
    fn is_active(&self) -> bool;

    fn in_transaction(&self) -> bool;

    /// 开启顶层事务
    async fn begin(&mut self) -> PersistResult<()>;

    /// 在已开启的事务内开启嵌套事务（保存点）
    async fn begin_nested(&mut self) -> PersistResult<()>;

    /// 提交最内层事务（保存点则释放）
    async fn commit(&mut self) -> PersistResult<()>;

    /// 回滚最内层事务（保存点则回滚至该点）
    async fn rollback(&mut self) -> PersistResult<()>;

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> PersistResult<()> {
        self.execute_raw(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))
            .await
    }

    async fn execute_raw(&mut self, sql: &str) -> PersistResult<()>;

    async fn fetch_all(&mut self, stmt: &Statement) -> PersistResult<Vec<Record>>;

    /// 释放底层连接；未完成的事务随之回滚
    async fn close(&mut self) -> PersistResult<()>;
}

/// 保存点名称（按嵌套深度编号）
pub(crate) fn savepoint_name(depth: usize) -> String {
    format!("qcbus_sp_{depth}")
}
