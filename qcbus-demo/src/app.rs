//! 应用装配
//!
//! 命令总线挂缓存失效中间件，查询总线挂响应缓存中间件，两者共用同一组具名依赖。
//!
use crate::commands::{
    CreateUser, CreateUserHandler, DeleteUser, DeleteUserHandler, EVENTS, SERVICES, UpdateUser,
    UpdateUserHandler,
};
use crate::entity::{SQLITE_DDL, User, graph};
use crate::events::{LogUserCreated, UserCreated};
use crate::queries::{GetManyOffsetUser, GetManyOffsetUserHandler, GetOneUser, GetOneUserHandler};
use crate::service::Services;
use qcbus_application::{
    AppError, Bus, Cache, CacheInvalidateMiddleware, CacheMiddleware, EventBus,
};
use qcbus_persist::{Entity, ManagerFactory, PersistResult, QueryEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct App {
    pub commands: Bus,
    pub queries: Bus,
    pub events: Arc<EventBus>,
}

impl App {
    pub fn build(
        managers: ManagerFactory,
        cache: Arc<dyn Cache>,
        cache_time: Duration,
    ) -> Result<Self, AppError> {
        let engine = QueryEngine::new(Arc::new(graph()?));
        let services = Services::new(managers, engine);

        let events = Arc::new(EventBus::new());
        events.register::<UserCreated>(vec![Arc::new(LogUserCreated)]);

        let commands = Bus::builder()
            .singleton(SERVICES, services.clone())
            .singleton(EVENTS, events.clone())
            .middleware(Arc::new(CacheInvalidateMiddleware::new(cache.clone())))
            .handler::<CreateUser, CreateUserHandler>()
            .handler::<UpdateUser, UpdateUserHandler>()
            .handler::<DeleteUser, DeleteUserHandler>()
            .build()?;

        let queries = Bus::builder()
            .singleton(SERVICES, services)
            .middleware(Arc::new(CacheMiddleware::new(cache).cache_time(cache_time)))
            .handler::<GetOneUser, GetOneUserHandler>()
            .handler::<GetManyOffsetUser, GetManyOffsetUserHandler>()
            .build()?;

        Ok(Self {
            commands,
            queries,
            events,
        })
    }
}

/// 建表（SQLite）
pub async fn migrate(managers: &ManagerFactory) -> PersistResult<()> {
    let mut manager = managers.manager();
    for ddl in SQLITE_DDL {
        manager.session().execute_raw(ddl).await?;
    }
    debug!(entity = User::NAME, "schema ready");
    manager.close().await
}
