//! SQLite 会话（sqlx）
//!
//! 顶层事务独占一条池连接（`Transaction<'static, Sqlite>`），嵌套事务以保存点实现。
//! 未提交即被丢弃的事务由 sqlx 在连接归还时回滚。
//!
//! SQLite 以文本存储 UUID 与时间戳（固定宽度 RFC 3339），保证比较与排序语义一致。
//! 布尔存为整数、JSON 存为文本，解码时按语句携带的列声明类型还原。
//!
use super::{IsolationLevel, Session, savepoint_name};
use crate::error::{PersistError, PersistResult};
use crate::statement::{Dialect, Statement};
use crate::value::{ColumnType, Record, TIMESTAMP_FORMAT, Value};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as Json;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{Column, Row, Transaction, TypeInfo, ValueRef};
use tracing::{debug, warn};

pub struct SqliteSession {
    pool: SqlitePool,
    conn: Option<PoolConnection<Sqlite>>,
    tx: Option<Transaction<'static, Sqlite>>,
    savepoints: usize,
    closed: bool,
}

impl SqliteSession {
    /// 连接在首次使用时才从池中获取
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            conn: None,
            tx: None,
            savepoints: 0,
            closed: false,
        }
    }

    async fn connection(&mut self) -> PersistResult<&mut SqliteConnection> {
        if self.closed {
            return Err(PersistError::SessionClosed);
        }
        if let Some(tx) = self.tx.as_mut() {
            return Ok(&mut **tx);
        }
        if self.conn.is_none() {
            self.conn = Some(self.pool.acquire().await?);
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(PersistError::SessionClosed),
        }
    }

    async fn run(&mut self, sql: &str) -> PersistResult<()> {
        let conn = self.connection().await?;
        sqlx::query(sql).execute(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn is_active(&self) -> bool {
        !self.closed
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn begin(&mut self) -> PersistResult<()> {
        if self.closed {
            return Err(PersistError::SessionClosed);
        }
        if self.tx.is_some() {
            return Err(PersistError::invalid_transaction("transaction already open"));
        }
        // 事务独占一条连接，先归还闲置连接
        self.conn.take();
        self.tx = Some(self.pool.begin().await?);
        self.savepoints = 0;
        Ok(())
    }

    async fn begin_nested(&mut self) -> PersistResult<()> {
        if self.tx.is_none() {
            return Err(PersistError::invalid_transaction(
                "nested transaction requires an open transaction",
            ));
        }
        let depth = self.savepoints + 1;
        self.run(&format!("SAVEPOINT {}", savepoint_name(depth)))
            .await?;
        self.savepoints = depth;
        Ok(())
    }

    async fn commit(&mut self) -> PersistResult<()> {
        if self.savepoints > 0 {
            let name = savepoint_name(self.savepoints);
            self.run(&format!("RELEASE SAVEPOINT {name}")).await?;
            self.savepoints -= 1;
            return Ok(());
        }
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(PersistError::invalid_transaction("no open transaction")),
        }
    }

    async fn rollback(&mut self) -> PersistResult<()> {
        if self.savepoints > 0 {
            let name = savepoint_name(self.savepoints);
            self.run(&format!("ROLLBACK TO SAVEPOINT {name}")).await?;
            self.run(&format!("RELEASE SAVEPOINT {name}")).await?;
            self.savepoints -= 1;
            return Ok(());
        }
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Err(PersistError::invalid_transaction("no open transaction")),
        }
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> PersistResult<()> {
        // SQLite 事务恒为可串行化
        debug!(%level, "sqlite ignores isolation level");
        Ok(())
    }

    async fn execute_raw(&mut self, sql: &str) -> PersistResult<()> {
        debug!(sql, "execute raw");
        self.run(sql).await
    }

    async fn fetch_all(&mut self, stmt: &Statement) -> PersistResult<Vec<Record>> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "execute statement");
        let conn = self.connection().await?;
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.params {
            query = bind(query, value);
        }
        let rows = query.fetch_all(conn).await?;
        rows.iter().map(|row| decode_row(row, stmt)).collect()
    }

    async fn close(&mut self) -> PersistResult<()> {
        self.closed = true;
        self.savepoints = 0;
        self.conn.take();
        if let Some(tx) = self.tx.take() {
            warn!("closing session with an open transaction, rolling back");
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn bind<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null | Value::TypedNull(_) => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Uuid(u) => query.bind(u.hyphenated().to_string()),
        Value::Timestamp(t) => query.bind(t.format(TIMESTAMP_FORMAT).to_string()),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

fn decode_row(row: &SqliteRow, stmt: &Statement) -> PersistResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        // 运行时存储类型（计算列没有声明类型）
        let storage = {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_owned())
            }
        };
        let Some(storage) = storage else {
            record.insert(column.name().to_owned(), Json::Null);
            continue;
        };
        let json = match (stmt.result_type(column.name()), storage.as_str()) {
            (Some(ColumnType::Bool), "INTEGER") => {
                Json::Bool(row.try_get_unchecked::<i64, _>(idx)? != 0)
            }
            (Some(ColumnType::Json), "TEXT") => {
                serde_json::from_str(&row.try_get_unchecked::<String, _>(idx)?)?
            }
            (Some(ColumnType::Float), "INTEGER") => {
                float(row.try_get_unchecked::<i64, _>(idx)? as f64)
            }
            (_, "INTEGER") => Json::from(row.try_get_unchecked::<i64, _>(idx)?),
            (_, "REAL") => float(row.try_get_unchecked::<f64, _>(idx)?),
            (_, "BOOLEAN") => Json::Bool(row.try_get_unchecked::<bool, _>(idx)?),
            (_, "BLOB") => Json::String(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
            _ => Json::String(row.try_get_unchecked::<String, _>(idx)?),
        };
        record.insert(column.name().to_owned(), json);
    }
    Ok(record)
}

fn float(f: f64) -> Json {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}
