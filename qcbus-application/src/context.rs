use bon::Builder;

/// 发起调用的外部请求来源（通常是 HTTP 请求）
///
/// 缓存中间件用它构造缓存键与失效前缀；非 HTTP 调用不携带来源。
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
pub struct RequestOrigin {
    #[builder(into)]
    pub base_url: String,
    #[builder(into, default)]
    pub path: String,
    /// 已规范化（按键排序）的查询串，不含 `?`
    #[builder(into, default)]
    pub query: String,
}

impl RequestOrigin {
    /// `{base_url}/{name}{path}?{query}`
    pub fn cache_key(&self, name: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.query.is_empty() {
            format!("{base}/{name}{}", self.path)
        } else {
            format!("{base}/{name}{}?{}", self.path, self.query)
        }
    }

    /// 同一来源下全部缓存键的匹配模式
    pub fn invalidation_pattern(&self) -> String {
        format!("{}*", self.base_url.trim_end_matches('/'))
    }
}

/// 应用层上下文（Application Context）
///
/// 承载一次总线调用的横切信息：
/// - `correlation_id`：链路追踪；
/// - `origin`：外部请求来源，为空表示进程内调用，缓存类中间件直接放行。
///
/// ```rust
/// use qcbus_application::context::{AppContext, RequestOrigin};
///
/// let ctx = AppContext::builder()
///     .correlation_id("cor-123")
///     .origin(
///         RequestOrigin::builder()
///             .base_url("http://localhost:8000")
///             .path("/api/v1/users")
///             .build(),
///     )
///     .build();
/// assert_eq!(
///     ctx.origin.unwrap().cache_key("get_one_user"),
///     "http://localhost:8000/get_one_user/api/v1/users"
/// );
/// ```
#[derive(Clone, Debug, Default, Builder)]
pub struct AppContext {
    #[builder(into)]
    pub correlation_id: Option<String>,
    pub origin: Option<RequestOrigin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_includes_query_when_present() {
        let origin = RequestOrigin::builder()
            .base_url("http://api/")
            .path("/users")
            .query("limit=10&offset=0")
            .build();
        assert_eq!(origin.cache_key("list"), "http://api/list/users?limit=10&offset=0");
        assert_eq!(origin.invalidation_pattern(), "http://api*");
    }
}
