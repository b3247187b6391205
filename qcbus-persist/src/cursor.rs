//! 游标编解码
//!
//! 游标对客户端不透明：键值先经文本编解码器（默认 JSON）序列化，再做 URL 安全的 base64。
//!
//! - `integer`：主键本身；
//! - `uuid`：`[created_at 秒数（浮点）, id 十六进制]`，解码时时间戳四舍五入到微秒。
//!
use crate::error::{PersistError, PersistResult};
use crate::schema::EntitySchema;
use crate::value::{ColumnType, Record, Value};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use uuid::Uuid;

/// uuid 游标依赖的时间列
pub const CREATED_AT: &str = "created_at";

/// 游标键值与文本之间的编解码器
pub trait TextCodec: Send + Sync {
    fn encode(&self, value: &Json) -> PersistResult<String>;
    fn decode(&self, text: &str) -> PersistResult<Json>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl TextCodec for JsonCodec {
    fn encode(&self, value: &Json) -> PersistResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, text: &str) -> PersistResult<Json> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    #[default]
    Integer,
    Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cursor {
    Integer(i64),
    Uuid { created_at: DateTime<Utc>, id: Uuid },
}

impl Cursor {
    pub fn kind(&self) -> CursorKind {
        match self {
            Cursor::Integer(_) => CursorKind::Integer,
            Cursor::Uuid { .. } => CursorKind::Uuid,
        }
    }

    pub fn encode(&self, codec: &dyn TextCodec) -> PersistResult<String> {
        let key = match self {
            Cursor::Integer(id) => json!(id),
            Cursor::Uuid { created_at, id } => {
                json!([timestamp_seconds(created_at), id.simple().to_string()])
            }
        };
        let text = codec.encode(&key)?;
        Ok(URL_SAFE.encode(text.as_bytes()))
    }

    pub fn decode(token: &str, kind: CursorKind, codec: &dyn TextCodec) -> PersistResult<Self> {
        let bytes = URL_SAFE.decode(token)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| PersistError::invalid_cursor("cursor is not valid utf-8"))?;
        let key = codec
            .decode(&text)
            .map_err(|e| PersistError::invalid_cursor(e.to_string()))?;

        match kind {
            CursorKind::Integer => key
                .as_i64()
                .map(Cursor::Integer)
                .ok_or_else(|| PersistError::invalid_cursor("expected an integer cursor")),
            CursorKind::Uuid => {
                let (Some(seconds), Some(hex)) = (
                    key.get(0).and_then(Json::as_f64),
                    key.get(1).and_then(Json::as_str),
                ) else {
                    return Err(PersistError::invalid_cursor(
                        "expected a [timestamp, id] cursor",
                    ));
                };
                let micros = (seconds * 1_000_000.0).round() as i64;
                let created_at = DateTime::from_timestamp_micros(micros)
                    .ok_or_else(|| PersistError::invalid_cursor("timestamp out of range"))?;
                let id = Uuid::parse_str(hex)
                    .map_err(|e| PersistError::invalid_cursor(e.to_string()))?;
                Ok(Cursor::Uuid { created_at, id })
            }
        }
    }

    /// 由一行记录生成该行的游标
    pub(crate) fn from_record(
        kind: CursorKind,
        schema: &EntitySchema,
        record: &Record,
    ) -> PersistResult<Self> {
        let pk = schema.primary_key();
        let field = |name: &str, ty: ColumnType| {
            let json = record.get(name).unwrap_or(&Json::Null);
            Value::from_json(ty, json)
        };

        match (kind, field(pk.name(), pk.ty())?) {
            (CursorKind::Integer, Value::Int(id)) => Ok(Cursor::Integer(id)),
            (CursorKind::Uuid, Value::Uuid(id)) => match field(CREATED_AT, ColumnType::Timestamp)? {
                Value::Timestamp(created_at) => Ok(Cursor::Uuid { created_at, id }),
                _ => Err(PersistError::precondition("row has no created_at value")),
            },
            (kind, other) => Err(PersistError::precondition(format!(
                "primary key {other:?} cannot be used as a {kind:?} cursor"
            ))),
        }
    }

    /// 绑定到分页条件的参数（按比较的列顺序）
    pub(crate) fn params(&self) -> Vec<Value> {
        match self {
            Cursor::Integer(id) => vec![Value::Int(*id)],
            Cursor::Uuid { created_at, id } => vec![Value::Timestamp(*created_at), Value::Uuid(*id)],
        }
    }
}

fn timestamp_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integer_round_trip() {
        let token = Cursor::Integer(42).encode(&JsonCodec).unwrap();
        assert_eq!(token, URL_SAFE.encode("42"));
        let back = Cursor::decode(&token, CursorKind::Integer, &JsonCodec).unwrap();
        assert_eq!(back, Cursor::Integer(42));
    }

    #[test]
    fn uuid_round_trip_keeps_microseconds() {
        let created_at = Utc
            .timestamp_opt(1_714_557_600, 123_456_000)
            .single()
            .unwrap();
        let cursor = Cursor::Uuid {
            created_at,
            id: Uuid::now_v7(),
        };
        let token = cursor.encode(&JsonCodec).unwrap();
        let back = Cursor::decode(&token, CursorKind::Uuid, &JsonCodec).unwrap();
        assert_eq!(back, cursor);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let token = Cursor::Integer(7).encode(&JsonCodec).unwrap();
        let err = Cursor::decode(&token, CursorKind::Uuid, &JsonCodec).unwrap_err();
        assert!(matches!(err, PersistError::InvalidCursor { .. }));

        let err = Cursor::decode("not base64!", CursorKind::Integer, &JsonCodec).unwrap_err();
        assert!(matches!(err, PersistError::InvalidCursor { .. }));
    }

    struct Reversed;

    impl TextCodec for Reversed {
        fn encode(&self, value: &Json) -> PersistResult<String> {
            Ok(value.to_string().chars().rev().collect())
        }

        fn decode(&self, text: &str) -> PersistResult<Json> {
            let text: String = text.chars().rev().collect();
            Ok(serde_json::from_str(&text)?)
        }
    }

    #[test]
    fn text_codec_is_pluggable() {
        let token = Cursor::Integer(120).encode(&Reversed).unwrap();
        assert_eq!(token, URL_SAFE.encode("021"));
        let back = Cursor::decode(&token, CursorKind::Integer, &Reversed).unwrap();
        assert_eq!(back, Cursor::Integer(120));
    }
}
