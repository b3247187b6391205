//! Postgres 会话（sqlx）
//!
//! 与 SQLite 会话相同的连接/事务模型，绑定与解码使用 Postgres 原生类型。
//!
use super::{Session, savepoint_name};
use crate::error::{PersistError, PersistResult};
use crate::statement::{Dialect, Statement};
use crate::value::{ColumnType, Record, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as Json;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnection, PgPool, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Row, Transaction, TypeInfo, ValueRef};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct PgSession {
    pool: PgPool,
    conn: Option<PoolConnection<Postgres>>,
    tx: Option<Transaction<'static, Postgres>>,
    savepoints: usize,
    closed: bool,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            conn: None,
            tx: None,
            savepoints: 0,
            closed: false,
        }
    }

    async fn connection(&mut self) -> PersistResult<&mut PgConnection> {
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
impl Session for PgSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
        rows.iter().map(decode_row).collect()
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
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        // NULL 的参数类型须与目标列一致，否则 Postgres 拒绝 text → 列类型的隐式转换
        Value::TypedNull(ty) => match ty {
            ColumnType::Integer => query.bind(None::<i64>),
            ColumnType::Float => query.bind(None::<f64>),
            ColumnType::Text => query.bind(None::<String>),
            ColumnType::Bool => query.bind(None::<bool>),
            ColumnType::Uuid => query.bind(None::<Uuid>),
            ColumnType::Timestamp => query.bind(None::<DateTime<Utc>>),
            ColumnType::Json => query.bind(None::<Json>),
        },
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Uuid(u) => query.bind(*u),
        Value::Timestamp(t) => query.bind(*t),
        Value::Json(j) => query.bind(j.clone()),
    }
}

fn decode_row(row: &PgRow) -> PersistResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let ty = {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_owned())
            }
        };
        let json = match ty.as_deref() {
            None => Json::Null,
            Some("INT2") => Json::from(row.try_get_unchecked::<i16, _>(idx)?),
            Some("INT4") => Json::from(row.try_get_unchecked::<i32, _>(idx)?),
            Some("INT8") => Json::from(row.try_get_unchecked::<i64, _>(idx)?),
            Some("FLOAT4") => float(row.try_get_unchecked::<f32, _>(idx)?.into()),
            Some("FLOAT8") => float(row.try_get_unchecked::<f64, _>(idx)?),
            Some("BOOL") => Json::Bool(row.try_get_unchecked::<bool, _>(idx)?),
            Some("UUID") => Json::String(row.try_get_unchecked::<Uuid, _>(idx)?.to_string()),
            Some("TIMESTAMPTZ") => Json::String(
                row.try_get_unchecked::<DateTime<Utc>, _>(idx)?
                    .to_rfc3339(),
            ),
            Some("TIMESTAMP") => Json::String(
                row.try_get_unchecked::<NaiveDateTime, _>(idx)?
                    .and_utc()
                    .to_rfc3339(),
            ),
            Some("JSON") | Some("JSONB") => row.try_get_unchecked::<Json, _>(idx)?,
            Some(_) => Json::String(row.try_get_unchecked::<String, _>(idx)?),
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
