//! 事件总线（EventBus）
//!
//! 进程内“发布即返回”的领域事件分发，与请求总线相互独立：
//! - `register::<E>` 追加精确类型处理器，`register_factory` 每次投递构造新处理器，
//!   `register_any` 追加通配处理器；
//! - `publish` 把事件扇出到精确类型处理器与全部通配处理器，每个处理器一个任务；
//! - 处理器失败（返回错误或 panic）只记录日志，不影响发布方与其他处理器；
//! - `wait_idle` 等待在途投递结束，用于测试与停机；并发调用依次排队。
//!
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait Event: AsAny + Debug + Send + Sync + 'static {
    /// 事件名称（日志与审计）
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// 事件处理器；`E = dyn Event` 时为通配处理器
#[async_trait]
pub trait EventHandler<E: ?Sized + Sync>: Send + Sync {
    /// 处理器名称（用于失败日志）
    fn handler_name(&self) -> &str;

    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

pub struct EventBus {
    // 值为 `Arc<dyn EventHandler<E>>`，按事件类型擦除
    typed: DashMap<TypeId, Vec<Arc<dyn Any + Send + Sync>>>,
    wildcard: RwLock<Vec<Arc<dyn EventHandler<dyn Event>>>>,
    tracker: TaskTracker,
    // 串行化 close/wait/reopen
    idle: Mutex<()>,
}

/// 每次投递调用工厂构造一个新处理器
struct FactoryHandler<H, F> {
    factory: F,
    _handler: PhantomData<fn() -> H>,
}

#[async_trait]
impl<E, H, F> EventHandler<E> for FactoryHandler<H, F>
where
    E: Event,
    H: EventHandler<E> + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    fn handler_name(&self) -> &str {
        std::any::type_name::<H>()
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        let handler = (self.factory)();
        handler.handle(event).await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            typed: DashMap::new(),
            wildcard: RwLock::new(Vec::new()),
            tracker: TaskTracker::new(),
            idle: Mutex::new(()),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Event>(&self, handlers: Vec<Arc<dyn EventHandler<E>>>) -> &Self {
        let mut entry = self.typed.entry(TypeId::of::<E>()).or_default();
        entry.extend(
            handlers
                .into_iter()
                .map(|h| Arc::new(h) as Arc<dyn Any + Send + Sync>),
        );
        self
    }

    /// 注册处理器构造函数，每次投递构造一个新处理器
    pub fn register_factory<E, H, F>(&self, factory: F) -> &Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let handler: Arc<dyn EventHandler<E>> = Arc::new(FactoryHandler {
            factory,
            _handler: PhantomData,
        });
        self.register::<E>(vec![handler])
    }

    pub fn register_any(&self, handlers: Vec<Arc<dyn EventHandler<dyn Event>>>) -> &Self {
        match self.wildcard.write() {
            Ok(mut wildcard) => wildcard.extend(handlers),
            Err(poisoned) => poisoned.into_inner().extend(handlers),
        }
        self
    }

    /// 发布事件并立即返回；需在 tokio 运行时内调用
    pub fn publish<E: Event>(&self, event: E) {
        let event = Arc::new(event);

        let typed: Vec<Arc<dyn EventHandler<E>>> = self
            .typed
            .get(&TypeId::of::<E>())
            .map(|hs| {
                hs.iter()
                    .filter_map(|h| h.downcast_ref::<Arc<dyn EventHandler<E>>>().cloned())
                    .collect()
            })
            .unwrap_or_default();
        let wildcard = match self.wildcard.read() {
            Ok(w) => w.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        debug!(
            event = event.name(),
            handlers = typed.len() + wildcard.len(),
            "publishing event"
        );

        for handler in typed {
            let event = event.clone();
            self.tracker.spawn(async move {
                let outcome = AssertUnwindSafe(handler.handle(&*event))
                    .catch_unwind()
                    .await;
                report(handler.handler_name(), event.name(), outcome);
            });
        }

        for handler in wildcard {
            let event = event.clone();
            self.tracker.spawn(async move {
                let outcome = AssertUnwindSafe(handler.handle(&*event))
                    .catch_unwind()
                    .await;
                report(handler.handler_name(), event.name(), outcome);
            });
        }
    }

    /// 等待全部在途投递完成
    pub async fn wait_idle(&self) {
        let _guard = self.idle.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn report(
    handler: &str,
    event: &str,
    outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(handler = handler, event = event, error = %e, "event handler failed"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(handler = handler, event = event, panic = %message, "event handler panicked");
        }
    }
}
