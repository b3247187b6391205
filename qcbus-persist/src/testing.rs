//! 单元测试用的会话替身：记录收到的每条语句，按顺序返回预置结果
use crate::error::{PersistError, PersistResult};
use crate::session::{IsolationLevel, Session};
use crate::statement::{Dialect, Statement};
use crate::value::Record;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub(crate) struct RecordingSession {
    log: Arc<Mutex<Vec<String>>>,
    responses: VecDeque<Vec<Record>>,
    depth: usize,
    closed: bool,
}

impl RecordingSession {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::default(),
            responses: VecDeque::new(),
            depth: 0,
            closed: false,
        }
    }

    pub(crate) fn respond(mut self, rows: Vec<serde_json::Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.responses.push_back(rows);
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl Session for RecordingSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn is_active(&self) -> bool {
        !self.closed
    }

    fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    async fn begin(&mut self) -> PersistResult<()> {
        if self.depth > 0 {
            return Err(PersistError::invalid_transaction("transaction already open"));
        }
        self.depth = 1;
        self.record("BEGIN");
        Ok(())
    }

    async fn begin_nested(&mut self) -> PersistResult<()> {
        if self.depth == 0 {
            return Err(PersistError::invalid_transaction("no open transaction"));
        }
        self.depth += 1;
        self.record("SAVEPOINT");
        Ok(())
    }

    async fn commit(&mut self) -> PersistResult<()> {
        match self.depth {
            0 => return Err(PersistError::invalid_transaction("no open transaction")),
            1 => self.record("COMMIT"),
            _ => self.record("RELEASE"),
        }
        self.depth -= 1;
        Ok(())
    }

    async fn rollback(&mut self) -> PersistResult<()> {
        match self.depth {
            0 => return Err(PersistError::invalid_transaction("no open transaction")),
            1 => self.record("ROLLBACK"),
            _ => self.record("ROLLBACK TO SAVEPOINT"),
        }
        self.depth -= 1;
        Ok(())
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> PersistResult<()> {
        self.record(format!("ISOLATION {level}"));
        Ok(())
    }

    async fn execute_raw(&mut self, sql: &str) -> PersistResult<()> {
        self.record(sql);
        Ok(())
    }

    async fn fetch_all(&mut self, stmt: &Statement) -> PersistResult<Vec<Record>> {
        self.record(stmt.sql.clone());
        Ok(self.responses.pop_front().unwrap_or_default())
    }

    async fn close(&mut self) -> PersistResult<()> {
        self.depth = 0;
        self.closed = true;
        self.record("CLOSE");
        Ok(())
    }
}
