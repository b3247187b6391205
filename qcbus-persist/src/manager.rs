//! 事务管理器
//!
//! 一个管理器独占一个逻辑会话，生命周期为一个工作单元：
//! `idle → open → (committed | rolled_back) → closed`。
//!
//! - 顶层事务每个管理器同一时刻只有一个，嵌套事务以保存点实现；
//! - 所有查询经由唯一入口 [`TransactionManager::send`] 执行；
//! - 管理器只能以 `&mut` 使用，不在任务之间共享。
//!
use crate::error::{PersistError, PersistResult};
use crate::query::Query;
use crate::session::{IsolationLevel, Session};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct TransactionManager {
    session: Box<dyn Session>,
}

impl TransactionManager {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }

    /// 原始会话（执行 DDL 等原始 SQL）
    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction()
    }

    pub async fn send<Q>(&mut self, query: &Q) -> PersistResult<Q::Output>
    where
        Q: Query + ?Sized,
    {
        query.execute(self.session.as_mut()).await
    }

    /// 开启事务
    ///
    /// - 没有事务且 `nested == false`：开启顶层事务，随后设置隔离级别；
    /// - 已有事务且 `nested == true`：开启保存点；
    /// - 其它组合（包括嵌套事务指定隔离级别）返回 `InvalidTransaction`。
    pub async fn with_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
        nested: bool,
    ) -> PersistResult<&mut Self> {
        if !self.session.is_active() {
            return Err(PersistError::SessionClosed);
        }
        if nested && isolation.is_some() {
            return Err(PersistError::invalid_transaction(
                "nested transaction cannot set an isolation level",
            ));
        }

        match (self.session.in_transaction(), nested) {
            (false, false) => {
                self.session.begin().await?;
                if let Some(level) = isolation {
                    self.session.set_isolation_level(level).await?;
                }
                debug!(?isolation, "transaction opened");
            }
            (true, true) => {
                self.session.begin_nested().await?;
                debug!("nested transaction opened");
            }
            (false, true) => {
                return Err(PersistError::invalid_transaction(
                    "nested transaction requires an open transaction",
                ));
            }
            (true, false) => {
                return Err(PersistError::invalid_transaction(
                    "transaction already open, use a nested transaction",
                ));
            }
        }
        Ok(self)
    }

    pub async fn commit(&mut self) -> PersistResult<()> {
        self.session.commit().await
    }

    pub async fn rollback(&mut self) -> PersistResult<()> {
        self.session.rollback().await
    }

    /// 结束工作单元：失败则回滚、否则提交所有未完成的事务层级，最后总是释放会话
    ///
    /// 提交失败会返回错误；回滚与关闭失败只记录日志。
    pub async fn finish(&mut self, failed: bool) -> PersistResult<()> {
        let mut outcome = Ok(());
        while self.session.in_transaction() {
            if failed {
                if let Err(err) = self.session.rollback().await {
                    error!(error = %err, "failed to roll back transaction");
                    break;
                }
            } else if let Err(err) = self.session.commit().await {
                outcome = Err(err);
                break;
            }
        }
        if let Err(err) = self.session.close().await {
            error!(error = %err, "failed to close session");
        }
        outcome
    }

    /// 释放会话；仍未结束的事务被回滚
    pub async fn close(&mut self) -> PersistResult<()> {
        self.session.close().await
    }

    /// 在顶层事务中执行 `f`：成功提交，失败回滚
    pub async fn transaction<T, E, F>(
        &mut self,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TransactionManager) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<PersistError> + Send,
    {
        self.with_transaction(isolation, false).await?;
        let result = f(self).await;
        self.settle(result).await
    }

    /// 在保存点中执行 `f`：失败只回滚到保存点，外层事务不受影响
    pub async fn nested<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TransactionManager) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<PersistError> + Send,
    {
        self.with_transaction(None, true).await?;
        let result = f(self).await;
        self.settle(result).await
    }

    async fn settle<T, E>(&mut self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<PersistError> + Send,
    {
        match result {
            Ok(value) => {
                self.session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.session.rollback().await {
                    error!(error = %rollback, "failed to roll back transaction");
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("dialect", &self.session.dialect())
            .field("active", &self.session.is_active())
            .field("in_transaction", &self.session.in_transaction())
            .finish()
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if self.session.in_transaction() {
            // 会话随之释放，驱动在连接归还时回滚
            warn!("transaction manager dropped with an open transaction, rolling back");
        }
    }
}

type SessionFactory = dyn Fn() -> Box<dyn Session> + Send + Sync;

/// 每个工作单元创建一个新的事务管理器
#[derive(Clone)]
pub struct ManagerFactory {
    make: Arc<SessionFactory>,
}

impl ManagerFactory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Box<dyn Session> + Send + Sync + 'static,
    {
        Self { make: Arc::new(f) }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        Self::new(move || Box::new(crate::session::SqliteSession::new(pool.clone())))
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::new(move || Box::new(crate::session::PgSession::new(pool.clone())))
    }

    pub fn manager(&self) -> TransactionManager {
        TransactionManager::new((self.make)())
    }
}

impl fmt::Debug for ManagerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use std::sync::Mutex;

    fn manager() -> (TransactionManager, Arc<Mutex<Vec<String>>>) {
        let session = RecordingSession::new();
        let log = session.log();
        (TransactionManager::new(Box::new(session)), log)
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn isolation_level_is_applied_after_begin() {
        let (mut m, log) = manager();
        m.with_transaction(Some(IsolationLevel::Serializable), false)
            .await
            .unwrap();
        assert_eq!(entries(&log), ["BEGIN", "ISOLATION SERIALIZABLE"]);
    }

    #[tokio::test]
    async fn invalid_combinations_are_rejected() {
        let (mut m, _log) = manager();
        let err = m
            .with_transaction(Some(IsolationLevel::ReadCommitted), true)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::InvalidTransaction { .. }));

        let err = m.with_transaction(None, true).await.unwrap_err();
        assert!(matches!(err, PersistError::InvalidTransaction { .. }));

        m.with_transaction(None, false).await.unwrap();
        let err = m.with_transaction(None, false).await.unwrap_err();
        assert!(matches!(err, PersistError::InvalidTransaction { .. }));
    }

    #[tokio::test]
    async fn finish_commits_every_level_then_closes() {
        let (mut m, log) = manager();
        m.with_transaction(None, false).await.unwrap();
        m.with_transaction(None, true).await.unwrap();
        m.finish(false).await.unwrap();
        assert_eq!(
            entries(&log),
            ["BEGIN", "SAVEPOINT", "RELEASE", "COMMIT", "CLOSE"]
        );

        let err = m.with_transaction(None, false).await.unwrap_err();
        assert!(matches!(err, PersistError::SessionClosed));
    }

    #[tokio::test]
    async fn finish_rolls_back_on_failure() {
        let (mut m, log) = manager();
        m.with_transaction(None, false).await.unwrap();
        m.finish(true).await.unwrap();
        assert_eq!(entries(&log), ["BEGIN", "ROLLBACK", "CLOSE"]);
    }

    #[tokio::test]
    async fn scoped_transaction_settles_by_result() {
        let (mut m, log) = manager();

        let ok: Result<i32, PersistError> = m
            .transaction(None, |tx| {
                Box::pin(async move {
                    let inner: Result<(), PersistError> = tx
                        .nested(|_| Box::pin(async { Err(PersistError::precondition("boom")) }))
                        .await;
                    assert!(inner.is_err());
                    Ok(1)
                })
            })
            .await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(
            entries(&log),
            ["BEGIN", "SAVEPOINT", "ROLLBACK TO SAVEPOINT", "COMMIT"]
        );
        assert!(!m.in_transaction());
    }
}
