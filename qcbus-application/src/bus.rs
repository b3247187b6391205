//! 请求总线（Bus）
//!
//! 以请求的 `TypeId` 路由到唯一处理器，并用中间件链包裹终端分发：
//! - 注册以后写为准，同一请求类型重复注册会覆盖旧处理器；
//! - `dispatch` 只构造待执行调用，不产生副作用；
//! - 每次 `execute` 都在执行时解析处理器工厂，得到一次全新的调用。
//!
use crate::middleware::{Call, Middleware, Next};
use crate::{
    context::AppContext,
    error::AppError,
    handler::{Extra, RequestHandler},
    request::Request,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::{Any, TypeId, type_name, type_name_of_val};
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{debug, warn};

pub type BoxAny = Box<dyn Any + Send>;

pub type HandlerFn =
    Arc<dyn for<'a> Fn(&'a AppContext, Call) -> BoxFuture<'a, Result<BoxAny, AppError>> + Send + Sync>;

pub struct Bus {
    handlers: DashMap<TypeId, (&'static str, HandlerFn)>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Bus {
    /// 创建总线；`middlewares` 中先声明者在最外层
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            handlers: DashMap::new(),
            middlewares,
        }
    }

    pub fn builder() -> crate::builder::BusBuilder {
        crate::builder::BusBuilder::new()
    }

    /// 注册共享处理器
    pub fn register<R, H>(&self, handler: Arc<H>) -> &Self
    where
        R: Request,
        H: RequestHandler<R> + 'static,
    {
        self.insert::<R>(erase::<R, H, _>(move || Ok(handler.clone())))
    }

    /// 注册处理器构造函数，每次执行调用时构造一个新处理器
    pub fn register_factory<R, H, F>(&self, factory: F) -> &Self
    where
        R: Request,
        H: RequestHandler<R> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert::<R>(erase::<R, H, _>(move || Ok(Arc::new(factory()))))
    }

    pub(crate) fn insert<R: Request>(&self, f: HandlerFn) -> &Self {
        if self.handlers.insert(TypeId::of::<R>(), (R::NAME, f)).is_some() {
            debug!(request = R::NAME, "handler replaced");
        }
        self
    }

    /// 构造经过中间件链的待执行调用
    pub fn dispatch<'a, R: Request>(&'a self, ctx: &'a AppContext, request: R) -> Dispatch<'a, R> {
        Dispatch {
            bus: self,
            ctx,
            request,
            extra: Extra::default(),
            wrapped: true,
        }
    }

    /// 构造绕过中间件链、直接调用处理器的待执行调用
    pub fn dispatch_unwrapped<'a, R: Request>(
        &'a self,
        ctx: &'a AppContext,
        request: R,
    ) -> Dispatch<'a, R> {
        Dispatch {
            wrapped: false,
            ..self.dispatch(ctx, request)
        }
    }

    /// 已注册的请求名称列表（只读视图）
    pub fn registered(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|e| e.value().0).collect()
    }

    async fn run<R: Request>(
        &self,
        ctx: &AppContext,
        request: R,
        extra: Extra,
        wrapped: bool,
    ) -> Result<R::Response, AppError> {
        let Some(handler) = self
            .handlers
            .get(&TypeId::of::<R>())
            .map(|e| e.value().1.clone())
        else {
            warn!(request = R::NAME, "no handler registered");
            return Err(AppError::UnregisteredHandler(R::NAME));
        };

        debug!(request = R::NAME, wrapped, correlation_id = ?ctx.correlation_id, "dispatching");
        let middlewares: &[Arc<dyn Middleware>] = if wrapped { &self.middlewares } else { &[] };
        let out = Next::new(middlewares, &handler)
            .run(ctx, Call::new(request, extra))
            .await?;

        match out.downcast::<R::Response>() {
            Ok(response) => Ok(*response),
            Err(e) => Err(AppError::TypeMismatch {
                expected: type_name::<R::Response>(),
                found: type_name_of_val(&e),
            }),
        }
    }
}

/// 固定闭包签名，使其对 `ctx` 的生命周期通用
pub(crate) fn handler_fn<F>(f: F) -> HandlerFn
where
    F: for<'a> Fn(&'a AppContext, Call) -> BoxFuture<'a, Result<BoxAny, AppError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// 把具体处理器擦除为 `HandlerFn`；`make` 在每次执行时调用
pub(crate) fn erase<R, H, F>(make: F) -> HandlerFn
where
    R: Request,
    H: RequestHandler<R> + 'static,
    F: Fn() -> Result<Arc<H>, AppError> + Send + Sync + 'static,
{
    handler_fn(move |ctx, call| {
        let handler = make();
        async move {
            let handler = handler?;
            let (request, extra) = call.into_parts();
            let request = request.downcast::<R>().map_err(|e| AppError::TypeMismatch {
                expected: type_name::<R>(),
                found: type_name_of_val(&e),
            })?;
            let response = handler.handle(ctx, *request, extra).await?;
            Ok::<_, AppError>(Box::new(response) as BoxAny)
        }
        .boxed()
    })
}

/// 待执行调用
///
/// 构造时不解析处理器；`execute` 可重复调用，每次都是一次独立执行。
/// 也可直接 `.await`，等价于执行一次。
#[must_use = "a dispatch does nothing until executed or awaited"]
pub struct Dispatch<'a, R: Request> {
    bus: &'a Bus,
    ctx: &'a AppContext,
    request: R,
    extra: Extra,
    wrapped: bool,
}

impl<'a, R: Request> Dispatch<'a, R> {
    pub fn extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }

    pub async fn execute(&self) -> Result<R::Response, AppError> {
        self.bus
            .run(self.ctx, self.request.clone(), self.extra.clone(), self.wrapped)
            .await
    }
}

impl<'a, R: Request> IntoFuture for Dispatch<'a, R> {
    type Output = Result<R::Response, AppError>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.execute().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    #[derive(Clone, Debug)]
    struct Ping;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Pong(pub usize);

    impl Request for Ping {
        const NAME: &'static str = "ping";
        type Response = Pong;
    }

    struct PingHandler {
        counter: Arc<AtomicUsize>,
        tag: usize,
    }

    #[async_trait]
    impl RequestHandler<Ping> for PingHandler {
        async fn handle(&self, _ctx: &AppContext, _r: Ping, _e: Extra) -> Result<Pong, AppError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Pong(self.tag * 1000 + n))
        }
    }

    fn handler(counter: &Arc<AtomicUsize>, tag: usize) -> Arc<PingHandler> {
        Arc::new(PingHandler {
            counter: counter.clone(),
            tag,
        })
    }

    #[tokio::test]
    async fn unregistered_request_fails() {
        let bus = Bus::default();
        let ctx = AppContext::default();
        let err = bus.dispatch(&ctx, Ping).await.unwrap_err();
        match err {
            AppError::UnregisteredHandler(name) => assert_eq!(name, "ping"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let bus = Bus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.register::<Ping, _>(handler(&counter, 1))
            .register::<Ping, _>(handler(&counter, 2));

        let ctx = AppContext::default();
        assert_eq!(bus.dispatch(&ctx, Ping).await.unwrap(), Pong(2001));
        assert_eq!(bus.registered(), vec!["ping"]);
    }

    #[tokio::test]
    async fn dispatch_is_lazy_and_every_execute_runs_again() {
        let bus = Bus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.register::<Ping, _>(handler(&counter, 0));

        let ctx = AppContext::default();
        let pending = bus.dispatch(&ctx, Ping);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(pending.execute().await.unwrap(), Pong(1));
        assert_eq!(pending.execute().await.unwrap(), Pong(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn factory_builds_a_fresh_handler_per_execution() {
        let bus = Bus::default();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let built = built.clone();
            let counter = counter.clone();
            bus.register_factory::<Ping, _, _>(move || {
                built.fetch_add(1, Ordering::SeqCst);
                PingHandler {
                    counter: counter.clone(),
                    tag: 0,
                }
            });
        }
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let ctx = AppContext::default();
        let pending = bus.dispatch(&ctx, Ping);
        pending.execute().await.unwrap();
        pending.execute().await.unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn type_mismatch_when_request_downcast_fails() {
        let bus = Bus::default();
        // 键是 Ping，但闭包按 u8 还原请求
        let f = handler_fn(|_ctx, call| {
            async move {
                let (request, _) = call.into_parts();
                request.downcast::<u8>().map_err(|e| AppError::TypeMismatch {
                    expected: "u8",
                    found: type_name_of_val(&e),
                })?;
                Ok::<_, AppError>(Box::new(Pong(0)) as BoxAny)
            }
            .boxed()
        });
        bus.insert::<Ping>(f);

        let ctx = AppContext::default();
        let err = bus.dispatch(&ctx, Ping).await.unwrap_err();
        assert!(matches!(err, AppError::TypeMismatch { expected: "u8", .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_is_safe() {
        let bus = Arc::new(Bus::default());
        let counter = Arc::new(AtomicUsize::new(0));
        bus.register::<Ping, _>(handler(&counter, 0));

        let mut set = JoinSet::new();
        for _ in 0..100 {
            let bus = bus.clone();
            set.spawn(async move {
                let ctx = AppContext::default();
                bus.dispatch(&ctx, Ping).await.unwrap()
            });
        }
        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap().0);
        }
        results.sort_unstable();
        assert_eq!(results.len(), 100);
        assert_eq!(results[0], 1);
        assert_eq!(results[99], 100);
    }
}
