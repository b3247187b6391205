//! 查询对象
//!
//! 每个查询对象描述对单个实体类型的一次操作，编译为带参数的语句并在给定会话上执行。
//! 实体描述由类型参数 `E::NAME` 在首次执行时从关系图解析并缓存在对象上，之后不再变化。
//!
//! 查询对象一般经由 [`QueryEngine`] 构造，再交给
//! [`TransactionManager::send`](crate::manager::TransactionManager::send) 执行。
//!
mod create;
mod get;
mod mutate;
mod paginate;

pub use create::{BatchCreate, Create};
pub use get::{Exists, GetOne};
pub use mutate::{Delete, Update};
pub use paginate::{GetManyByCursor, GetManyByOffset};

use crate::cursor::CursorKind;
use crate::error::PersistResult;
use crate::graph::RelationshipGraph;
use crate::loader::{LoadPlanner, SelectPlan};
use crate::schema::{Entity, EntitySchema};
use crate::session::Session;
use crate::statement::{Fields, Filters, Statement};
use crate::value::Record;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// 可在会话上执行的查询
#[async_trait]
pub trait Query: Send + Sync {
    type Output: Send;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Self::Output>;
}

/// 查询对象的公共部分
pub struct QueryBase<E> {
    planner: Arc<LoadPlanner>,
    schema: OnceLock<Arc<EntitySchema>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> QueryBase<E> {
    fn new(planner: Arc<LoadPlanner>) -> Self {
        Self {
            planner,
            schema: OnceLock::new(),
            _entity: PhantomData,
        }
    }

    /// 实体未注册时返回 `UnknownEntity`
    pub fn schema(&self) -> PersistResult<&EntitySchema> {
        if let Some(schema) = self.schema.get() {
            return Ok(schema.as_ref());
        }
        let schema = self.planner.graph().entity(E::NAME)?;
        Ok(self.schema.get_or_init(|| schema).as_ref())
    }

    fn plan(&self, loads: &[String]) -> PersistResult<Arc<SelectPlan>> {
        self.planner.plan(E::NAME, loads)
    }
}

/// 执行主语句并完成预加载
async fn fetch_loaded(
    session: &mut dyn Session,
    plan: &SelectPlan,
    stmt: Statement,
) -> PersistResult<Vec<Record>> {
    let rows = session.fetch_all(&stmt).await?;
    plan.load(session, rows).await
}

fn decode<E: Entity>(record: Record) -> PersistResult<E> {
    Ok(serde_json::from_value(Json::Object(record))?)
}

fn decode_all<E: Entity>(records: Vec<Record>) -> PersistResult<Vec<E>> {
    records.into_iter().map(decode).collect()
}

/// 查询对象工厂：持有关系图与计划缓存
#[derive(Clone, Debug)]
pub struct QueryEngine {
    planner: Arc<LoadPlanner>,
}

impl QueryEngine {
    pub fn new(graph: Arc<RelationshipGraph>) -> Self {
        Self {
            planner: Arc::new(LoadPlanner::new(graph)),
        }
    }

    pub fn graph(&self) -> &Arc<RelationshipGraph> {
        self.planner.graph()
    }

    pub fn planner(&self) -> &Arc<LoadPlanner> {
        &self.planner
    }

    fn base<E: Entity>(&self) -> QueryBase<E> {
        QueryBase::new(Arc::clone(&self.planner))
    }

    pub fn create<E: Entity>(&self, fields: Fields) -> Create<E> {
        Create::new(self.base(), fields)
    }

    pub fn batch_create<E: Entity>(&self, rows: Vec<Fields>) -> BatchCreate<E> {
        BatchCreate::new(self.base(), rows)
    }

    pub fn get_one<E: Entity>(&self, filters: Filters) -> GetOne<E> {
        GetOne::new(self.base(), filters)
    }

    pub fn get_many_by_offset<E: Entity>(&self, filters: Filters) -> GetManyByOffset<E> {
        GetManyByOffset::new(self.base(), filters)
    }

    pub fn get_many_by_cursor<E: Entity>(
        &self,
        limit: i64,
        kind: CursorKind,
        filters: Filters,
    ) -> GetManyByCursor<E> {
        GetManyByCursor::new(self.base(), limit, kind, filters)
    }

    pub fn update<E: Entity>(&self, fields: Fields, filters: Filters) -> Update<E> {
        Update::new(self.base(), fields, filters)
    }

    pub fn delete<E: Entity>(&self, filters: Filters) -> Delete<E> {
        Delete::new(self.base(), filters)
    }

    pub fn exists<E: Entity>(&self, filters: Filters) -> Exists<E> {
        Exists::new(self.base(), filters)
    }
}
