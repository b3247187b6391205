//! 通用数据访问引擎
//!
//! 把声明式的意图（创建 / 读取 / 更新 / 删除 / 分页）编译为参数化的关系型语句，
//! 适用于任意已描述的实体：
//!
//! - [`graph`]：启动时构建、之后只读的实体关系图；
//! - [`loader`]：按关系图规划预加载（JOIN 或按父键分区的子查询）并缓存计划；
//! - [`query`]：实体泛型的查询对象与 [`QueryEngine`] 工厂；
//! - [`manager`]：独占一个会话的事务管理器，所有查询经由 `send` 执行；
//! - [`session`]：驱动协议与基于 sqlx 的 SQLite / Postgres 实现。
//!
pub mod config;
pub mod cursor;
pub mod error;
pub mod graph;
pub mod loader;
pub mod manager;
pub mod pagination;
pub mod query;
pub mod schema;
pub mod session;
pub mod statement;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::DatabaseConfig;
pub use cursor::{Cursor, CursorKind, JsonCodec, TextCodec};
pub use error::{PersistError, PersistResult};
pub use graph::RelationshipGraph;
pub use loader::DEFAULT_RELATIONSHIP_LOAD_LIMIT;
pub use manager::{ManagerFactory, TransactionManager};
pub use pagination::{CursorPage, OffsetPage};
pub use query::{Query, QueryEngine};
pub use schema::{Cardinality, Column, Entity, EntitySchema, JoinCondition, Relationship};
pub use session::{IsolationLevel, Session};
pub use statement::{Dialect, Fields, Filters, OrderBy, Statement};
pub use value::{ColumnType, Record, Value};
