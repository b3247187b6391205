use serde::{Serialize, de::DeserializeOwned};

/// 数据传输对象（DTO）
///
/// - 作为总线调用的输出载体，面向接口/外部系统序列化友好；
/// - 可反序列化，缓存中间件据此还原命中的响应；
/// - 与实体解耦，避免将持久化模型直接暴露到接口层。
pub trait Dto: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Dto for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
