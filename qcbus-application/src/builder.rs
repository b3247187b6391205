//! 总线构建器（BusBuilder）
//!
//! 启动期装配并校验总线：
//! - 收集具名依赖（单例或无参构造函数）、中间件与处理器；
//! - 每个处理器通过 [`Injectable`] 声明构造所需的具名、带类型依赖；
//! - `build()` 逐一核对声明，缺失报 `MissingDependency`，类型不符报 `TypeMismatch`；
//! - 处理器在每次执行时由依赖重新构造，工厂依赖（如事务管理器）因此每次都是新的。
//!
use crate::bus::{Bus, erase};
use crate::{error::AppError, handler::RequestHandler, middleware::Middleware, request::Request};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Provider = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

#[derive(Clone)]
struct Binding {
    type_id: TypeId,
    type_name: &'static str,
    provide: Provider,
}

/// 具名依赖表
#[derive(Clone, Default)]
pub struct Dependencies {
    bindings: HashMap<String, Binding>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单例：每次解析得到它的一个克隆（通常是 `Arc` 或廉价句柄）
    pub fn singleton<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bind::<T>(name.into(), Arc::new(move || Box::new(value.clone()) as Box<dyn Any + Send>));
        self
    }

    /// 工厂：每次解析调用一次构造函数
    pub fn factory<T, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.bind::<T>(name.into(), Arc::new(move || Box::new(f()) as Box<dyn Any + Send>));
        self
    }

    fn bind<T: 'static>(&mut self, name: String, provide: Provider) {
        self.bindings.insert(
            name,
            Binding {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                provide,
            },
        );
    }

    /// 核对一项依赖声明
    fn check(&self, handler: &'static str, dep: &Dependency) -> Result<(), AppError> {
        let binding = self
            .bindings
            .get(dep.name)
            .ok_or_else(|| AppError::MissingDependency {
                handler,
                dependency: dep.name.to_string(),
            })?;
        if binding.type_id != dep.type_id {
            return Err(AppError::TypeMismatch {
                expected: dep.type_name,
                found: binding.type_name,
            });
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Dependencies").field("names", &names).finish()
    }
}

/// 一项依赖声明：名称 + 期望类型
#[derive(Clone, Copy, Debug)]
pub struct Dependency {
    name: &'static str,
    type_id: TypeId,
    type_name: &'static str,
}

impl Dependency {
    pub fn of<T: Any>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 处理器构造期的依赖解析器
pub struct Resolver<'a> {
    handler: &'static str,
    deps: &'a Dependencies,
}

impl Resolver<'_> {
    pub fn resolve<T: Any>(&self, name: &str) -> Result<T, AppError> {
        let binding = self
            .deps
            .bindings
            .get(name)
            .ok_or_else(|| AppError::MissingDependency {
                handler: self.handler,
                dependency: name.to_string(),
            })?;

        (binding.provide)()
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| AppError::TypeMismatch {
                expected: type_name::<T>(),
                found: binding.type_name,
            })
    }
}

/// 可由具名依赖构造的处理器
pub trait Injectable: Sized {
    fn dependencies() -> Vec<Dependency>;

    fn inject(resolver: &Resolver<'_>) -> Result<Self, AppError>;
}

struct PendingHandler {
    request: &'static str,
    handler: &'static str,
    requires: Vec<Dependency>,
    register: Box<dyn FnOnce(&Bus, Arc<Dependencies>) + Send>,
}

#[derive(Default)]
pub struct BusBuilder {
    dependencies: Dependencies,
    middlewares: Vec<Arc<dyn Middleware>>,
    handlers: Vec<PendingHandler>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn singleton<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.dependencies = self.dependencies.singleton(name, value);
        self
    }

    pub fn factory<T, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.dependencies = self.dependencies.factory(name, f);
        self
    }

    /// 追加中间件，先追加者在最外层
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn handler<R, H>(mut self) -> Self
    where
        R: Request,
        H: RequestHandler<R> + Injectable + 'static,
    {
        let handler = type_name::<H>();
        self.handlers.push(PendingHandler {
            request: R::NAME,
            handler,
            requires: H::dependencies(),
            register: Box::new(move |bus: &Bus, deps: Arc<Dependencies>| {
                bus.insert::<R>(erase::<R, H, _>(move || {
                    let resolver = Resolver {
                        handler,
                        deps: &deps,
                    };
                    H::inject(&resolver).map(Arc::new)
                }));
            }),
        });
        self
    }

    /// 校验全部依赖声明并生成总线
    pub fn build(self) -> Result<Bus, AppError> {
        for pending in &self.handlers {
            for dep in &pending.requires {
                self.dependencies.check(pending.handler, dep)?;
            }
        }

        let deps = Arc::new(self.dependencies);
        let bus = Bus::new(self.middlewares);
        for pending in self.handlers {
            tracing::debug!(
                request = pending.request,
                handler = pending.handler,
                "handler registered"
            );
            (pending.register)(&bus, deps.clone());
        }
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::AppContext, handler::Extra};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Greet;

    impl Request for Greet {
        const NAME: &'static str = "greet";
        type Response = String;
    }

    /// 每次解析都不同的会话编号
    #[derive(Debug)]
    struct SessionId(usize);

    struct GreetHandler {
        greeting: Arc<String>,
        session: SessionId,
    }

    impl Injectable for GreetHandler {
        fn dependencies() -> Vec<Dependency> {
            vec![
                Dependency::of::<Arc<String>>("greeting"),
                Dependency::of::<SessionId>("session"),
            ]
        }

        fn inject(resolver: &Resolver<'_>) -> Result<Self, AppError> {
            Ok(Self {
                greeting: resolver.resolve("greeting")?,
                session: resolver.resolve("session")?,
            })
        }
    }

    #[async_trait]
    impl RequestHandler<Greet> for GreetHandler {
        async fn handle(&self, _ctx: &AppContext, _r: Greet, _e: Extra) -> Result<String, AppError> {
            Ok(format!("{} #{}", self.greeting, self.session.0))
        }
    }

    fn counter_factory() -> impl Fn() -> SessionId + Send + Sync + 'static {
        let next = AtomicUsize::new(0);
        move || SessionId(next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test]
    async fn builds_and_injects_fresh_factory_values() {
        let bus = BusBuilder::new()
            .singleton("greeting", Arc::new("hello".to_string()))
            .factory("session", counter_factory())
            .handler::<Greet, GreetHandler>()
            .build()
            .unwrap();

        let ctx = AppContext::default();
        assert_eq!(bus.dispatch(&ctx, Greet).await.unwrap(), "hello #1");
        assert_eq!(bus.dispatch(&ctx, Greet).await.unwrap(), "hello #2");
    }

    #[test]
    fn missing_dependency_fails_fast() {
        let err = BusBuilder::new()
            .singleton("greeting", Arc::new("hello".to_string()))
            .handler::<Greet, GreetHandler>()
            .build()
            .err()
            .unwrap();
        match err {
            AppError::MissingDependency { handler, dependency } => {
                assert!(handler.contains("GreetHandler"));
                assert_eq!(dependency, "session");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn dependency_of_wrong_type_fails_fast() {
        let err = BusBuilder::new()
            .singleton("greeting", "hello".to_string())
            .factory("session", counter_factory())
            .handler::<Greet, GreetHandler>()
            .build()
            .err()
            .unwrap();
        match err {
            AppError::TypeMismatch { expected, found } => {
                assert!(expected.contains("Arc"));
                assert_eq!(found, type_name::<String>());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
