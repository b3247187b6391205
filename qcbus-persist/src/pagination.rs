//! 分页结果
use serde::{Deserialize, Serialize};

/// 偏移分页：`{items, limit, offset, total}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffsetPage<T> {
    pub items: Vec<T>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub total: i64,
}

impl<T> OffsetPage<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> OffsetPage<U> {
        OffsetPage {
            items: self.items.into_iter().map(f).collect(),
            limit: self.limit,
            offset: self.offset,
            total: self.total,
        }
    }
}

/// 游标分页：`{items, results_per_page, cursor}`，空游标表示没有下一页
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub results_per_page: i64,
    pub cursor: String,
}

impl<T> CursorPage<T> {
    pub fn has_next(&self) -> bool {
        !self.cursor.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> CursorPage<U> {
        CursorPage {
            items: self.items.into_iter().map(f).collect(),
            results_per_page: self.results_per_page,
            cursor: self.cursor,
        }
    }
}
