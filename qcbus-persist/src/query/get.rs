use super::{Query, QueryBase, decode, fetch_loaded};
use crate::error::{PersistError, PersistResult};
use crate::loader::ROOT_ALIAS;
use crate::schema::Entity;
use crate::session::Session;
use crate::statement::{Filters, SqlWriter, quote};
use crate::value::Value;
use async_trait::async_trait;
use serde_json::Value as Json;

/// 按等值条件取第一条匹配记录
pub struct GetOne<E> {
    base: QueryBase<E>,
    filters: Filters,
    loads: Vec<String>,
    lock_for_update: bool,
}

impl<E: Entity> GetOne<E> {
    pub(super) fn new(base: QueryBase<E>, filters: Filters) -> Self {
        Self {
            base,
            filters,
            loads: Vec::new(),
            lock_for_update: false,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.add(column, value);
        self
    }

    /// 预加载关系：关系名或点分路径，未知名称被忽略
    pub fn load(mut self, name: impl Into<String>) -> Self {
        self.loads.push(name.into());
        self
    }

    pub fn loads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loads.extend(names.into_iter().map(Into::into));
        self
    }

    /// `SELECT ... FOR UPDATE`；不支持行锁的方言下忽略
    pub fn lock_for_update(mut self, lock: bool) -> Self {
        self.lock_for_update = lock;
        self
    }
}

#[async_trait]
impl<E: Entity> Query for GetOne<E> {
    type Output = Option<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Option<E>> {
        let schema = self.base.schema()?;
        let filters = self.filters.checked(schema)?;
        let plan = self.base.plan(&self.loads)?;

        let mut w = plan.select();
        w.where_eq(Some(ROOT_ALIAS), &filters).push(" LIMIT 1");
        if self.lock_for_update && session.dialect().supports_row_locks() {
            w.push(&format!(" FOR UPDATE OF {}", quote(ROOT_ALIAS)));
        }

        let rows = fetch_loaded(session, &plan, w.finish()).await?;
        rows.into_iter().next().map(decode).transpose()
    }
}

/// `SELECT EXISTS(...)`，至少需要一个非空条件
pub struct Exists<E> {
    base: QueryBase<E>,
    filters: Filters,
}

impl<E: Entity> Exists<E> {
    pub(super) fn new(base: QueryBase<E>, filters: Filters) -> Self {
        Self { base, filters }
    }
}

#[async_trait]
impl<E: Entity> Query for Exists<E> {
    type Output = bool;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<bool> {
        if self.filters.is_empty() {
            return Err(PersistError::precondition(
                "at least one identifier must be provided",
            ));
        }
        let schema = self.base.schema()?;
        let filters = self.filters.checked(schema)?;

        let mut w = SqlWriter::new(format!(
            "SELECT EXISTS(SELECT 1 FROM {} AS {}",
            quote(schema.table()),
            quote(ROOT_ALIAS)
        ));
        w.where_eq(Some(ROOT_ALIAS), &filters)
            .push(&format!(") AS {}", quote("present")));

        let rows = session.fetch_all(&w.finish()).await?;
        let present = match rows.first().and_then(|r| r.get("present")) {
            Some(Json::Bool(b)) => *b,
            Some(Json::Number(n)) => n.as_i64().unwrap_or_default() != 0,
            _ => false,
        };
        Ok(present)
    }
}
