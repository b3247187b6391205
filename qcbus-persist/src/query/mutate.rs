use super::{Query, QueryBase, decode_all};
use crate::error::{PersistError, PersistResult};
use crate::schema::Entity;
use crate::session::Session;
use crate::statement::{Fields, Filters, SqlWriter, quote};
use crate::value::Value;
use async_trait::async_trait;

/// 更新匹配的行并返回更新后的全部行
///
/// 至少需要一个字段与一个非空条件，在生成任何语句之前检查。
pub struct Update<E> {
    base: QueryBase<E>,
    fields: Fields,
    filters: Filters,
}

impl<E: Entity> Update<E> {
    pub(super) fn new(base: QueryBase<E>, fields: Fields, filters: Filters) -> Self {
        Self {
            base,
            fields,
            filters,
        }
    }

    /// 追加过滤条件（空值被丢弃）
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.add(column, value);
        self
    }
}

#[async_trait]
impl<E: Entity> Query for Update<E> {
    type Output = Vec<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Vec<E>> {
        if self.fields.is_empty() {
            return Err(PersistError::precondition(
                "at least one field to update must be set",
            ));
        }
        if self.filters.is_empty() {
            return Err(PersistError::precondition(
                "at least one filter must be set for update",
            ));
        }
        let schema = self.base.schema()?;
        let fields = self.fields.checked(schema, false)?;
        let filters = self.filters.checked(schema)?;

        let mut w = SqlWriter::new(format!("UPDATE {} SET ", quote(schema.table())));
        for (i, (column, value)) in fields.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(&quote(column)).push(" = ").bind(value.clone());
        }
        w.where_eq(None, &filters).push(" RETURNING *");

        decode_all(session.fetch_all(&w.finish().returning(schema)).await?)
    }
}

/// 删除匹配的行并返回被删除的行
pub struct Delete<E> {
    base: QueryBase<E>,
    filters: Filters,
}

impl<E: Entity> Delete<E> {
    pub(super) fn new(base: QueryBase<E>, filters: Filters) -> Self {
        Self { base, filters }
    }
}

#[async_trait]
impl<E: Entity> Query for Delete<E> {
    type Output = Vec<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Vec<E>> {
        // 全部条件为空时拒绝执行，避免清空整表
        if self.filters.is_empty() {
            return Err(PersistError::precondition(
                "at least one identifier must be provided",
            ));
        }
        let schema = self.base.schema()?;
        let filters = self.filters.checked(schema)?;

        let mut w = SqlWriter::new(format!("DELETE FROM {}", quote(schema.table())));
        w.where_eq(None, &filters).push(" RETURNING *");

        decode_all(session.fetch_all(&w.finish().returning(schema)).await?)
    }
}
