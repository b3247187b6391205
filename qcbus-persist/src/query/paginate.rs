use super::{Query, QueryBase, decode_all, fetch_loaded};
use crate::cursor::{CREATED_AT, Cursor, CursorKind, JsonCodec, TextCodec};
use crate::error::{PersistError, PersistResult};
use crate::loader::ROOT_ALIAS;
use crate::pagination::{CursorPage, OffsetPage};
use crate::schema::Entity;
use crate::session::Session;
use crate::statement::{Filters, OrderBy, SqlWriter, qualified, quote};
use crate::value::Value;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

/// 偏移分页，按主键排序
pub struct GetManyByOffset<E> {
    base: QueryBase<E>,
    filters: Filters,
    loads: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    order_by: OrderBy,
}

impl<E: Entity> GetManyByOffset<E> {
    pub(super) fn new(base: QueryBase<E>, filters: Filters) -> Self {
        Self {
            base,
            filters,
            loads: Vec::new(),
            limit: None,
            offset: None,
            order_by: OrderBy::Asc,
        }
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: Option<i64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn load(mut self, name: impl Into<String>) -> Self {
        self.loads.push(name.into());
        self
    }

    fn page(&self, items: Vec<E>, total: i64) -> OffsetPage<E> {
        OffsetPage {
            items,
            limit: self.limit,
            offset: self.offset,
            total,
        }
    }
}

#[async_trait]
impl<E: Entity> Query for GetManyByOffset<E> {
    type Output = OffsetPage<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<OffsetPage<E>> {
        let schema = self.base.schema()?;
        let filters = self.filters.checked(schema)?;

        let mut count = SqlWriter::new(format!(
            "SELECT COUNT(*) AS {} FROM {} AS {}",
            quote("total"),
            quote(schema.table()),
            quote(ROOT_ALIAS)
        ));
        count.where_eq(Some(ROOT_ALIAS), &filters);
        let total = session
            .fetch_all(&count.finish())
            .await?
            .first()
            .and_then(|r| r.get("total"))
            .and_then(Json::as_i64)
            .unwrap_or_default();

        if total <= 0 {
            return Ok(self.page(Vec::new(), total));
        }

        let plan = self.base.plan(&self.loads)?;
        let mut w = plan.select();
        w.where_eq(Some(ROOT_ALIAS), &filters).push(&format!(
            " ORDER BY {} {}",
            qualified(ROOT_ALIAS, schema.primary_key().name()),
            self.order_by.keyword()
        ));
        match (self.limit, self.offset) {
            (Some(limit), _) => {
                w.push(" LIMIT ").bind(Value::Int(limit));
            }
            (None, Some(_)) => {
                w.push(&format!(" LIMIT {}", session.dialect().unbounded_limit()));
            }
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            w.push(" OFFSET ").bind(Value::Int(offset));
        }

        let records = fetch_loaded(session, &plan, w.finish()).await?;
        Ok(self.page(decode_all(records)?, total))
    }
}

/// 游标分页
///
/// - `integer`：按主键排序与比较；
/// - `uuid`：按 `(created_at, 主键)` 行值排序与比较，实体必须有 `created_at` 列。
pub struct GetManyByCursor<E> {
    base: QueryBase<E>,
    filters: Filters,
    loads: Vec<String>,
    limit: i64,
    order_by: OrderBy,
    cursor: Option<String>,
    kind: CursorKind,
    codec: Arc<dyn TextCodec>,
}

impl<E: Entity> GetManyByCursor<E> {
    pub(super) fn new(base: QueryBase<E>, limit: i64, kind: CursorKind, filters: Filters) -> Self {
        Self {
            base,
            filters,
            loads: Vec::new(),
            limit,
            order_by: OrderBy::Asc,
            cursor: None,
            kind,
            codec: Arc::new(JsonCodec),
        }
    }

    /// 上一页返回的游标；`None` 或空串从头开始
    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn TextCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn load(mut self, name: impl Into<String>) -> Self {
        self.loads.push(name.into());
        self
    }
}

#[async_trait]
impl<E: Entity> Query for GetManyByCursor<E> {
    type Output = CursorPage<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<CursorPage<E>> {
        if self.limit < 1 {
            return Err(PersistError::precondition("cursor page limit must be positive"));
        }
        let schema = self.base.schema()?;
        let filters = self.filters.checked(schema)?;
        let pk = qualified(ROOT_ALIAS, schema.primary_key().name());

        let keys = match self.kind {
            CursorKind::Integer => vec![pk],
            CursorKind::Uuid => {
                if !schema.has_column(CREATED_AT) {
                    return Err(PersistError::precondition(
                        "uuid cursor pagination requires a `created_at` column",
                    ));
                }
                vec![qualified(ROOT_ALIAS, CREATED_AT), pk]
            }
        };

        let plan = self.base.plan(&self.loads)?;
        let mut w = plan.select();
        w.where_eq(Some(ROOT_ALIAS), &filters);

        if let Some(token) = self.cursor.as_deref().filter(|t| !t.is_empty()) {
            let cursor = Cursor::decode(token, self.kind, self.codec.as_ref())?;
            let mut params = cursor.params();
            w.condition();
            if keys.len() == 1 {
                w.push(&keys[0]).push(&format!(" {} ", self.order_by.comparator()));
                w.bind(params.remove(0));
            } else {
                w.push(&format!("({}) {} ", keys.join(", "), self.order_by.comparator()));
                w.bind_list(params);
            }
        }

        let order: Vec<String> = keys
            .iter()
            .map(|k| format!("{k} {}", self.order_by.keyword()))
            .collect();
        w.push(&format!(" ORDER BY {} LIMIT ", order.join(", ")))
            .bind(Value::Int(self.limit));

        let records = fetch_loaded(session, &plan, w.finish()).await?;
        let cursor = match records.last() {
            None => String::new(),
            Some(_) if (records.len() as i64) < self.limit && self.limit > 1 => String::new(),
            Some(last) => {
                Cursor::from_record(self.kind, schema, last)?.encode(self.codec.as_ref())?
            }
        };

        Ok(CursorPage {
            items: decode_all(records)?,
            results_per_page: self.limit,
            cursor,
        })
    }
}
