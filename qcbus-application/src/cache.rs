//! 键值响应缓存
//!
//! 缓存以能力形式注入中间件，内存实现用于测试与本地开发。
//!
use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: String, expire: Duration) -> Result<(), AppError>;

    /// 删除匹配的键，返回删除数量；模式仅支持末尾 `*` 前缀匹配
    async fn delete(&self, pattern: &str) -> Result<usize, AppError>;
}

/// 基于 `DashMap` 的内存缓存，过期项在读取或写入时清理
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|e| (e.value().0.clone(), e.value().1 > now));

        match hit {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, expire: Duration) -> Result<(), AppError> {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        self.entries.insert(key.to_string(), (value, now + expire));
        Ok(())
    }

    async fn delete(&self, pattern: &str) -> Result<usize, AppError> {
        let Some(prefix) = pattern.strip_suffix('*') else {
            return Ok(usize::from(self.entries.remove(pattern).is_some()));
        };

        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let cache = InMemoryCache::new();
        cache
            .set("stale", "v".into(), Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set("kept", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        cache
            .set("fresh", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("kept").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn delete_supports_trailing_wildcard() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        for key in ["http://a/x", "http://a/y", "http://b/x"] {
            cache.set(key, "1".into(), ttl).await.unwrap();
        }

        assert_eq!(cache.delete("http://a*").await.unwrap(), 2);
        assert_eq!(cache.delete("http://b/x").await.unwrap(), 1);
        assert_eq!(cache.delete("http://b/x").await.unwrap(), 0);
        assert!(cache.is_empty());
    }
}
