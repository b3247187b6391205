use crate::dto::Dto;

/// 总线请求（命令或查询）
///
/// 以 Rust 类型标识，一个请求类型对应且仅对应一个处理器：
/// - 命令表达写意图，查询表达只读意图，两者共用同一套总线；
/// - 请求对象不可变，重复执行同一个待执行调用时按值克隆。
pub trait Request: Clone + Send + Sync + 'static {
    /// 请求的稳定名称（用于日志、错误与缓存键）
    const NAME: &'static str;

    /// 处理器返回的 DTO
    type Response: Dto;
}
