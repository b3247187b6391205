//! 语句构造
//!
//! 只覆盖查询引擎需要的最小能力：带编号占位符（`$n`）的 SQL 文本 + 绑定参数。
//! 标识符一律来自经过校验的实体描述并加引号，值一律以参数绑定。
//!
use crate::error::{PersistError, PersistResult};
use crate::schema::EntitySchema;
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 结果列名 → 声明类型
pub type ResultTypes = HashMap<String, ColumnType>;

/// 一条可执行语句
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// 结果列的声明类型；存储类型有损的后端（SQLite 的布尔与 JSON）按此还原
    pub result_types: ResultTypes,
}

impl Statement {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// 结果列与实体的列一一对应（`RETURNING *`）
    pub fn returning(mut self, schema: &EntitySchema) -> Self {
        self.result_types.extend(schema.column_types());
        self
    }

    pub fn result_type(&self, column: &str) -> Option<ColumnType> {
        self.result_types.get(column).copied()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// SQL 方言差异（两种后端都接受 `$n` 占位符）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn supports_row_locks(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// 仅有 OFFSET 时需要的“无上限” LIMIT
    pub fn unbounded_limit(self) -> &'static str {
        match self {
            Dialect::Postgres => "ALL",
            Dialect::Sqlite => "-1",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderBy {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    pub fn keyword(self) -> &'static str {
        match self {
            OrderBy::Asc => "ASC",
            OrderBy::Desc => "DESC",
        }
    }

    /// 游标分页的比较方向
    pub fn comparator(self) -> &'static str {
        match self {
            OrderBy::Asc => ">",
            OrderBy::Desc => "<",
        }
    }
}

pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote(alias), quote(column))
}

/// 累积 SQL 文本与参数，负责为每个绑定值分配占位符编号
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    result_types: ResultTypes,
    conditions: usize,
}

impl SqlWriter {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            sql: prefix.into(),
            ..Self::default()
        }
    }

    pub(crate) fn typed(&mut self, types: &ResultTypes) -> &mut Self {
        self.result_types
            .extend(types.iter().map(|(name, ty)| (name.clone(), *ty)));
        self
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub(crate) fn bind(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        let placeholder = format!("${}", self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// `(v1, v2, ...)`
    pub(crate) fn bind_list(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self.sql.push(')');
        self
    }

    /// 开始下一个条件：第一个输出 ` WHERE `，之后输出 ` AND `
    pub(crate) fn condition(&mut self) -> &mut Self {
        let keyword = if self.conditions == 0 { " WHERE " } else { " AND " };
        self.conditions += 1;
        self.push(keyword)
    }

    /// 追加 `WHERE a = $1 AND b = $2 ...`；过滤为空时不输出任何内容
    pub(crate) fn where_eq(&mut self, alias: Option<&str>, filters: &Filters) -> &mut Self {
        for (column, value) in filters.iter() {
            self.condition();
            let col = match alias {
                Some(a) => qualified(a, column),
                None => quote(column),
            };
            self.push(&col).push(" = ").bind(value.clone());
        }
        self
    }

    pub(crate) fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
            result_types: self.result_types,
        }
    }
}

/// 等值过滤条件（AND 连接）
///
/// 值为 NULL 的条件在加入时即被丢弃，而不是转换为 `IS NULL`。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filters(Vec<(String, Value)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add(column, value);
        self
    }

    pub fn add(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        if !value.is_null() {
            self.0.push((column.into(), value));
        }
    }

    pub fn extend(&mut self, other: Filters) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// 按实体描述校验列名并把值转换为列类型
    pub(crate) fn checked(&self, schema: &EntitySchema) -> PersistResult<Filters> {
        let mut out = Vec::with_capacity(self.0.len());
        for (column, value) in &self.0 {
            let col = require_column(schema, column)?;
            out.push((column.clone(), col.ty().coerce(value.clone())?));
        }
        Ok(Filters(out))
    }
}

/// 写入字段（插入/更新的数据），保留显式的 NULL
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|(c, _)| c == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// 校验列名、转换类型，并按 `on_insert` 补齐列默认值
    pub(crate) fn checked(&self, schema: &EntitySchema, on_insert: bool) -> PersistResult<Fields> {
        let mut out = Vec::with_capacity(self.0.len());
        for (column, value) in &self.0 {
            let col = require_column(schema, column)?;
            out.push((column.clone(), col.ty().coerce(value.clone())?));
        }
        for col in schema.columns() {
            if self.contains(col.name()) {
                continue;
            }
            let default = if on_insert {
                col.default_on_insert()
            } else {
                col.default_on_update()
            };
            if let Some(value) = default {
                out.push((col.name().to_owned(), value));
            }
        }
        Ok(Fields(out))
    }

    pub(crate) fn columns(&self) -> Vec<&str> {
        self.0.iter().map(|(c, _)| c.as_str()).collect()
    }

    pub(crate) fn value_of(&self, column: &str) -> Value {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().fold(Fields::new(), |f, (k, v)| f.set(k, v))
    }
}

pub(crate) fn require_column<'a>(
    schema: &'a EntitySchema,
    column: &str,
) -> PersistResult<&'a crate::schema::Column> {
    schema
        .get_column(column)
        .ok_or_else(|| PersistError::UnknownColumn {
            entity: schema.name().to_owned(),
            column: column.to_owned(),
        })
}
