//! 绑定参数值与列类型
//!
//! 查询引擎从不拼接用户输入：所有过滤条件与写入字段都以 `Value` 形式
//! 作为绑定参数传给会话，并在进入语句前按列类型（`ColumnType`）做一次强制转换。
//!
use crate::error::{PersistError, PersistResult};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

/// 会话返回的一行记录（列名 → JSON 值），实体通过 serde 从中反序列化
pub type Record = serde_json::Map<String, Json>;

/// 文本型后端（如 SQLite）存储时间戳所用的格式，字典序与时间序一致
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    /// 已按列类型转换过的 NULL，驱动据此声明参数类型
    TypedNull(ColumnType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(Json),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::TypedNull(_))
    }

    /// 将记录中的 JSON 值还原为指定列类型的绑定值
    pub fn from_json(ty: ColumnType, json: &Json) -> PersistResult<Self> {
        let raw = match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        };
        ty.coerce(raw)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 列的逻辑类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
    Uuid,
    Timestamp,
    Json,
}

impl ColumnType {
    /// 将任意输入值转换为本列类型可接受的值；无法转换时报错而不是静默放行
    pub fn coerce(self, value: Value) -> PersistResult<Value> {
        let coerced = match (self, value) {
            (_, Value::Null | Value::TypedNull(_)) => Value::TypedNull(self),
            (ColumnType::Integer, Value::Int(i)) => Value::Int(i),
            (ColumnType::Integer, Value::Text(s)) => {
                Value::Int(s.parse().map_err(|_| mismatch(self, &s))?)
            }
            (ColumnType::Float, Value::Float(f)) => Value::Float(f),
            (ColumnType::Float, Value::Int(i)) => Value::Float(i as f64),
            (ColumnType::Text, Value::Text(s)) => Value::Text(s),
            (ColumnType::Text, Value::Uuid(u)) => Value::Text(u.to_string()),
            (ColumnType::Bool, Value::Bool(b)) => Value::Bool(b),
            (ColumnType::Bool, Value::Int(i)) => Value::Bool(i != 0),
            (ColumnType::Uuid, Value::Uuid(u)) => Value::Uuid(u),
            (ColumnType::Uuid, Value::Text(s)) => Value::Uuid(Uuid::parse_str(&s)?),
            (ColumnType::Timestamp, Value::Timestamp(t)) => Value::Timestamp(t),
            (ColumnType::Timestamp, Value::Text(s)) => {
                Value::Timestamp(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))
            }
            (ColumnType::Json, Value::Json(j)) => Value::Json(j),
            (ColumnType::Json, Value::Text(s)) => Value::Json(Json::String(s)),
            (_, other) => return Err(mismatch(self, &format!("{other:?}"))),
        };
        Ok(coerced)
    }
}

fn mismatch(ty: ColumnType, found: &str) -> PersistError {
    PersistError::precondition(format!("value {found} is not compatible with {ty:?} column"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_none_becomes_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: Value = Some("x").into();
        assert_eq!(v, Value::Text("x".into()));
    }

    #[test]
    fn coerce_text_into_uuid_and_timestamp() {
        let id = Uuid::now_v7();
        let v = ColumnType::Uuid.coerce(Value::Text(id.to_string())).unwrap();
        assert_eq!(v, Value::Uuid(id));

        let v = ColumnType::Timestamp
            .coerce(Value::Text("2024-05-01T10:00:00.000001Z".into()))
            .unwrap();
        let Value::Timestamp(t) = v else {
            panic!("expected timestamp");
        };
        assert_eq!(t.timestamp_subsec_micros(), 1);
    }

    #[test]
    fn coerce_rejects_incompatible_values() {
        let err = ColumnType::Integer.coerce(Value::Bool(true)).unwrap_err();
        assert!(matches!(err, PersistError::Precondition { .. }));
        assert!(ColumnType::Uuid.coerce(Value::Text("nope".into())).is_err());
    }

    #[test]
    fn coerced_null_keeps_column_type() {
        let v = ColumnType::Uuid.coerce(Value::Null).unwrap();
        assert_eq!(v, Value::TypedNull(ColumnType::Uuid));
        assert!(v.is_null());
        let v = ColumnType::Integer.coerce(v).unwrap();
        assert_eq!(v, Value::TypedNull(ColumnType::Integer));
    }

    #[test]
    fn from_json_uses_column_type() {
        let v = Value::from_json(ColumnType::Bool, &serde_json::json!(1)).unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = Value::from_json(ColumnType::Float, &serde_json::json!(3)).unwrap();
        assert_eq!(v, Value::Float(3.0));
    }
}
