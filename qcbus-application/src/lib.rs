//! 应用层：请求总线、中间件管线与事件总线
//!
//! - [`Bus`]：按请求类型路由到唯一处理器，处理器外包一条中间件链；
//! - [`BusBuilder`]：启动期装配具名依赖并校验处理器声明；
//! - [`EventBus`]：发布即返回的事件扇出，处理器失败相互隔离；
//! - 持久化错误经 [`AppError::Persist`] 透传，或由 [`UniqueViolation`] 翻译。
//!
pub mod builder;
pub mod bus;
pub mod cache;
pub mod context;
pub mod dto;
pub mod error;
pub mod event;
pub mod handler;
pub mod middleware;
pub mod request;

pub use builder::{BusBuilder, Dependencies, Dependency, Injectable, Resolver};
pub use bus::{Bus, Dispatch};
pub use cache::{Cache, InMemoryCache};
pub use context::{AppContext, RequestOrigin};
pub use dto::Dto;
pub use error::{AppError, UniqueViolation};
pub use event::{Event, EventBus, EventHandler};
pub use handler::{Extra, RequestHandler};
pub use middleware::{CacheInvalidateMiddleware, CacheMiddleware, Call, Middleware, Next};
pub use request::Request;
