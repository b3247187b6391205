use super::{Call, Middleware, Next};
use crate::bus::BoxAny;
use crate::{cache::Cache, context::AppContext, error::AppError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(10);

/// 响应缓存：命中直接返回解码后的响应，未命中执行链路并写回
pub struct CacheMiddleware {
    cache: Arc<dyn Cache>,
    cache_time: Duration,
}

impl CacheMiddleware {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            cache_time: DEFAULT_CACHE_TIME,
        }
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, next: Next<'_>, ctx: &AppContext, call: Call) -> Result<BoxAny, AppError> {
        let Some(origin) = ctx.origin.as_ref() else {
            return next.run(ctx, call).await;
        };

        let key = origin.cache_key(call.name());
        let codec = call.codec();

        match self.cache.get(&key).await {
            Ok(Some(text)) => match codec.decode(&text) {
                Ok(response) => {
                    debug!(key = %key, "cache hit");
                    return Ok(response);
                }
                Err(e) => error!(key = %key, error = %e, "failed to decode cached response"),
            },
            Ok(None) => {}
            Err(e) => error!(key = %key, error = %e, "cache lookup failed"),
        }

        let response = next.run(ctx, call).await?;
        let encoded = codec.encode(&response);
        match encoded {
            // 空结果不缓存
            Ok(text) if text == "null" => {}
            Ok(text) => {
                if let Err(e) = self.cache.set(&key, text, self.cache_time).await {
                    error!(key = %key, error = %e, "failed to store response in cache");
                }
            }
            Err(e) => error!(key = %key, error = %e, "failed to encode response for cache"),
        }
        Ok(response)
    }
}

/// 写操作前清除同一来源下的全部缓存
pub struct CacheInvalidateMiddleware {
    cache: Arc<dyn Cache>,
}

impl CacheInvalidateMiddleware {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Middleware for CacheInvalidateMiddleware {
    async fn handle(&self, next: Next<'_>, ctx: &AppContext, call: Call) -> Result<BoxAny, AppError> {
        if let Some(origin) = ctx.origin.as_ref() {
            let pattern = origin.invalidation_pattern();
            match self.cache.delete(&pattern).await {
                Ok(removed) => debug!(pattern = %pattern, removed, "cache invalidated"),
                Err(e) => error!(pattern = %pattern, error = %e, "cache invalidation failed"),
            }
        }
        next.run(ctx, call).await
    }
}
