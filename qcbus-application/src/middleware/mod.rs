//! 处理器中间件（Middleware）
//!
//! 中间件以 `(next, ctx, call)` 形式包裹终端分发函数：
//! - 先声明者在最外层，`[A, B, C]` 的执行顺序为
//!   `A 前 → B 前 → C 前 → 处理器 → C 后 → B 后 → A 后`；
//! - 不调用 `next` 即短路，直接返回自己的结果；
//! - 请求与响应以类型擦除形式流经链路，`Call` 携带按请求类型生成的编解码器，
//!   便于缓存等中间件序列化响应。
//!
mod cache;

pub use cache::{CacheInvalidateMiddleware, CacheMiddleware, DEFAULT_CACHE_TIME};

use crate::bus::{BoxAny, HandlerFn};
use crate::{context::AppContext, dto::Dto, error::AppError, handler::Extra, request::Request};
use async_trait::async_trait;
use std::any::type_name;
use std::sync::Arc;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, next: Next<'_>, ctx: &AppContext, call: Call) -> Result<BoxAny, AppError>;
}

/// 链路中余下的部分：后续中间件与终端处理器
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a HandlerFn,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a HandlerFn) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    pub async fn run(self, ctx: &AppContext, call: Call) -> Result<BoxAny, AppError> {
        match self.middlewares.split_first() {
            Some((first, rest)) => first.handle(Next::new(rest, self.handler), ctx, call).await,
            None => (self.handler)(ctx, call).await,
        }
    }
}

/// 一次类型擦除后的调用
pub struct Call {
    name: &'static str,
    request: BoxAny,
    extra: Extra,
    codec: ResponseCodec,
}

impl Call {
    pub(crate) fn new<R: Request>(request: R, extra: Extra) -> Self {
        Self {
            name: R::NAME,
            request: Box::new(request),
            extra,
            codec: ResponseCodec::of::<R::Response>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    pub fn request<R: Request>(&self) -> Option<&R> {
        self.request.downcast_ref::<R>()
    }

    pub fn codec(&self) -> ResponseCodec {
        self.codec
    }

    pub(crate) fn into_parts(self) -> (BoxAny, Extra) {
        (self.request, self.extra)
    }
}

/// 按响应类型生成的 JSON 编解码器
#[derive(Clone, Copy)]
pub struct ResponseCodec {
    encode: fn(&BoxAny) -> Result<String, AppError>,
    decode: fn(&str) -> Result<BoxAny, AppError>,
}

impl ResponseCodec {
    fn of<T: Dto>() -> Self {
        Self {
            encode: encode::<T>,
            decode: decode::<T>,
        }
    }

    pub fn encode(&self, response: &BoxAny) -> Result<String, AppError> {
        (self.encode)(response)
    }

    pub fn decode(&self, text: &str) -> Result<BoxAny, AppError> {
        (self.decode)(text)
    }
}

fn encode<T: Dto>(response: &BoxAny) -> Result<String, AppError> {
    let value = response.downcast_ref::<T>().ok_or(AppError::TypeMismatch {
        expected: type_name::<T>(),
        found: "unknown response",
    })?;
    serde_json::to_string(value).map_err(|e| AppError::Internal(e.to_string()))
}

fn decode<T: Dto>(text: &str) -> Result<BoxAny, AppError> {
    let value: T = serde_json::from_str(text).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Box::new(value))
}
