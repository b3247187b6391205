//! 实体描述（schema）
//!
//! 实体映射层之外的最小描述：表名、列、主键、列默认值与出边关系。
//! 描述由启动时构建并冻结进 [`RelationshipGraph`](crate::graph::RelationshipGraph)，
//! 查询对象只通过图来解析实体，从不依赖全局状态。
//!
use crate::value::{ColumnType, Value};
use chrono::Utc;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// 已映射的实体类型
///
/// - `NAME`：实体在关系图中的稳定名称（也是查询对象绑定 schema 的键）；
/// - 行数据经由会话以记录形式返回，再通过 serde 反序列化为实体。
pub trait Entity: DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// 列描述
#[derive(Clone, Debug)]
pub struct Column {
    name: String,
    ty: ColumnType,
    primary_key: bool,
    insert_default: Option<fn() -> Value>,
    update_default: Option<fn() -> Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            insert_default: None,
            update_default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// 插入时未显式提供该列则使用此默认值
    pub fn insert_default(mut self, f: fn() -> Value) -> Self {
        self.insert_default = Some(f);
        self
    }

    /// 更新时未显式提供该列则使用此默认值（如 `updated_at`）
    pub fn update_default(mut self, f: fn() -> Value) -> Self {
        self.update_default = Some(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ColumnType {
        self.ty
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn default_on_insert(&self) -> Option<Value> {
        self.insert_default.map(|f| f())
    }

    pub fn default_on_update(&self) -> Option<Value> {
        self.update_default.map(|f| f())
    }
}

/// 常用列默认值
pub mod defaults {
    use super::*;

    pub fn uuid_v7() -> Value {
        Value::Uuid(Uuid::now_v7())
    }

    pub fn now() -> Value {
        Value::Timestamp(Utc::now())
    }
}

/// 实体描述
#[derive(Clone, Debug)]
pub struct EntitySchema {
    name: String,
    table: String,
    columns: Vec<Column>,
    pk: usize,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            pk: 0,
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        if column.is_primary_key() {
            self.pk = self.columns.len();
        }
        self.columns.push(column);
        self
    }

    /// `created_at` / `updated_at` 两列，插入与更新时自动填充
    pub fn with_timestamps(self) -> Self {
        self.column(Column::new("created_at", ColumnType::Timestamp).insert_default(defaults::now))
            .column(
                Column::new("updated_at", ColumnType::Timestamp)
                    .insert_default(defaults::now)
                    .update_default(defaults::now),
            )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// 列名及其声明类型
    pub fn column_types(&self) -> impl Iterator<Item = (String, ColumnType)> + '_ {
        self.columns.iter().map(|c| (c.name.clone(), c.ty))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// 主键列；仅在经过关系图校验后保证存在
    pub fn primary_key(&self) -> &Column {
        &self.columns[self.pk]
    }

    pub(crate) fn has_primary_key(&self) -> bool {
        self.columns.iter().filter(|c| c.is_primary_key()).count() == 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// 集合型关系（一对多、多对多）
    pub fn is_collection(self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

/// 连接条件
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JoinCondition {
    /// `source.local = target.remote`
    Columns { local: String, remote: String },
    /// `source.local = secondary.secondary_local AND secondary.secondary_remote = target.remote`
    Secondary {
        table: String,
        local: String,
        secondary_local: String,
        secondary_remote: String,
        remote: String,
    },
}

/// 关系图的一条出边
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Relationship {
    name: String,
    target: String,
    cardinality: Cardinality,
    join: JoinCondition,
}

impl Relationship {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        join: JoinCondition,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            join,
        }
    }

    /// 外键在源实体一侧：`source.local_fk = target.remote`
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_fk: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self::new(name, target, Cardinality::ManyToOne, columns(local_fk, remote))
    }

    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self::new(name, target, Cardinality::OneToOne, columns(local, remote))
    }

    /// 外键在目标实体一侧：`source.local = target.remote_fk`
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local: impl Into<String>,
        remote_fk: impl Into<String>,
    ) -> Self {
        Self::new(name, target, Cardinality::OneToMany, columns(local, remote_fk))
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        secondary: JoinCondition,
    ) -> Self {
        Self::new(name, target, Cardinality::ManyToMany, secondary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn join(&self) -> &JoinCondition {
        &self.join
    }

    /// 源实体一侧参与连接的列
    pub fn local_column(&self) -> &str {
        match &self.join {
            JoinCondition::Columns { local, .. } | JoinCondition::Secondary { local, .. } => local,
        }
    }

    /// 目标实体一侧参与连接的列
    pub fn remote_column(&self) -> &str {
        match &self.join {
            JoinCondition::Columns { remote, .. } | JoinCondition::Secondary { remote, .. } => {
                remote
            }
        }
    }
}

fn columns(local: impl Into<String>, remote: impl Into<String>) -> JoinCondition {
    JoinCondition::Columns {
        local: local.into(),
        remote: remote.into(),
    }
}
