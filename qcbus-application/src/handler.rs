use crate::{context::AppContext, error::AppError, request::Request};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value as Json};

#[async_trait]
pub trait RequestHandler<R>: Send + Sync
where
    R: Request,
{
    async fn handle(&self, ctx: &AppContext, request: R, extra: Extra)
    -> Result<R::Response, AppError>;
}

/// 随请求传递的附加参数（如路径参数 `id`）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extra(Map<String, Json>);

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), AppError> {
        let value = serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))?;
        self.0.insert(key.into(), value);
        Ok(())
    }

    /// 取出并反序列化；缺失或类型不符视为请求错误
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, AppError> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| AppError::BadRequest(format!("missing parameter `{key}`")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| AppError::BadRequest(format!("invalid parameter `{key}`: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
