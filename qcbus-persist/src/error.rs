//! 持久化层统一错误定义
//!
//! 查询引擎、会话与事务管理器共用的最小错误集合，
//! 由上层服务按需翻译为应用层错误。
//!
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PersistError {
    // --- 驱动/数据库 ---
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("decode error: {reason}")]
    Decode { reason: String },

    // --- 查询构造 ---
    #[error("precondition failed: {reason}")]
    Precondition { reason: String },
    #[error("entity is not registered in relationship graph: {0}")]
    UnknownEntity(String),
    #[error("unknown column: entity={entity}, column={column}")]
    UnknownColumn { entity: String, column: String },
    #[error("invalid relationship: entity={entity}, relationship={relationship}, reason={reason}")]
    InvalidRelationship {
        entity: String,
        relationship: String,
        reason: String,
    },
    #[error("invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    // --- 事务/会话 ---
    #[error("invalid transaction state: {reason}")]
    InvalidTransaction { reason: String },
    #[error("session is closed")]
    SessionClosed,

    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    pub fn invalid_cursor(reason: impl Into<String>) -> Self {
        Self::InvalidCursor {
            reason: reason.into(),
        }
    }

    pub fn invalid_transaction(reason: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type PersistResult<T> = Result<T, PersistError>;

// 允许在会话实现中直接使用 `?` 将驱动错误转换为 PersistError

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PersistError::NotFound {
                reason: "row not found".to_string(),
            },
            other => PersistError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for PersistError {
    fn from(err: uuid::Error) -> Self {
        PersistError::decode(err.to_string())
    }
}

impl From<chrono::ParseError> for PersistError {
    fn from(err: chrono::ParseError) -> Self {
        PersistError::decode(err.to_string())
    }
}

impl From<base64::DecodeError> for PersistError {
    fn from(err: base64::DecodeError) -> Self {
        PersistError::invalid_cursor(err.to_string())
    }
}
