use async_trait::async_trait;
use qcbus_application::{
    AppContext, AppError, EventHandler, Extra, InMemoryCache, RequestOrigin,
};
use qcbus_demo::commands::{CreateUser, DeleteUser, UpdateUser};
use qcbus_demo::events::UserCreated;
use qcbus_demo::queries::{GetManyOffsetUser, GetOneUser};
use qcbus_demo::{App, migrate};
use qcbus_persist::{DatabaseConfig, ManagerFactory, OrderBy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

struct Harness {
    _dir: TempDir,
    app: App,
    cache: Arc<InMemoryCache>,
}

async fn setup() -> anyhow::Result<Harness> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("demo.db").display());
    let pool = DatabaseConfig::builder()
        .url(url)
        .max_connections(4)
        .build()
        .connect_sqlite()
        .await?;
    let managers = ManagerFactory::sqlite(pool);
    migrate(&managers).await?;

    let cache = Arc::new(InMemoryCache::new());
    let app = App::build(managers, cache.clone(), Duration::from_secs(60))?;
    Ok(Harness {
        _dir: dir,
        app,
        cache,
    })
}

fn http(path: &str) -> AppContext {
    AppContext::builder()
        .origin(
            RequestOrigin::builder()
                .base_url("http://localhost:8000")
                .path(path)
                .build(),
        )
        .build()
}

fn create(login: &str, password: &str) -> CreateUser {
    CreateUser {
        login: login.into(),
        password: password.into(),
    }
}

fn with_id(id: Uuid) -> Extra {
    Extra::new().with("id", id.to_string())
}

struct CountCreated(Arc<AtomicUsize>);

#[async_trait]
impl EventHandler<UserCreated> for CountCreated {
    fn handler_name(&self) -> &str {
        "count_created"
    }

    async fn handle(&self, _event: &UserCreated) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn user_lifecycle_through_the_buses() {
    let h = setup().await.unwrap();
    let created = Arc::new(AtomicUsize::new(0));
    h.app
        .events
        .register::<UserCreated>(vec![Arc::new(CountCreated(created.clone()))]);
    let ctx = AppContext::default();

    // 创建：响应不含密码
    let neo = h
        .app
        .commands
        .dispatch(&ctx, create("neo", "there-is-no-spoon"))
        .await
        .unwrap();
    assert_eq!(neo.login, "neo");
    let json = serde_json::to_value(&neo).unwrap();
    assert!(json.get("password").is_none());

    // 重复登录名（忽略大小写）
    let err = h
        .app
        .commands
        .dispatch(&ctx, create("NEO", "another-password"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(msg) if msg == "User already exists"));

    let trinity = h
        .app
        .commands
        .dispatch(&ctx, create("trinity", "follow-the-rabbit"))
        .await
        .unwrap();

    // 查询经缓存
    let path = format!("/api/v1/users/{}", neo.id);
    let fetched = h
        .app
        .queries
        .dispatch(&http(&path), GetOneUser { id: neo.id })
        .await
        .unwrap();
    assert_eq!(fetched, neo);
    assert_eq!(h.cache.len(), 1);

    // 更新：命令总线清空缓存
    let status = h
        .app
        .commands
        .dispatch(
            &http(&path),
            UpdateUser {
                login: Some("the-one".into()),
                ..UpdateUser::default()
            },
        )
        .extra(with_id(neo.id))
        .await
        .unwrap();
    assert!(status.status);
    assert!(h.cache.is_empty());

    let renamed = h
        .app
        .queries
        .dispatch(&http(&path), GetOneUser { id: neo.id })
        .await
        .unwrap();
    assert_eq!(renamed.login, "the-one");
    assert_eq!(renamed.created_at, neo.created_at);

    // 改名撞上已有登录名
    let err = h
        .app
        .commands
        .dispatch(
            &ctx,
            UpdateUser {
                login: Some("Trinity".into()),
                ..UpdateUser::default()
            },
        )
        .extra(with_id(neo.id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(msg) if msg == "login already in use"));

    let page = h
        .app
        .queries
        .dispatch(
            &ctx,
            GetManyOffsetUser {
                offset: 0,
                limit: 10,
                order_by: OrderBy::Asc,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    let logins: Vec<_> = page.items.iter().map(|u| u.login.as_str()).collect();
    assert_eq!(logins, ["the-one", "trinity"]);

    // 删除后不可再查
    h.app
        .commands
        .dispatch(&ctx, DeleteUser { id: trinity.id })
        .await
        .unwrap();
    let err = h
        .app
        .queries
        .dispatch(&ctx, GetOneUser { id: trinity.id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = h
        .app
        .commands
        .dispatch(&ctx, DeleteUser { id: trinity.id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    h.app.events.wait_idle().await;
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_touching_storage() {
    let h = setup().await.unwrap();
    let ctx = AppContext::default();

    let err = h
        .app
        .commands
        .dispatch(&ctx, create("morpheus", "short"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = h
        .app
        .commands
        .dispatch(&ctx, UpdateUser::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = h
        .app
        .commands
        .dispatch(&ctx, UpdateUser::default())
        .extra(with_id(Uuid::now_v7()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(msg) if msg == "Nothing to update"));

    let err = h
        .app
        .commands
        .dispatch(
            &ctx,
            UpdateUser {
                login: Some("ghost".into()),
                ..UpdateUser::default()
            },
        )
        .extra(with_id(Uuid::now_v7()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let page = h
        .app
        .queries
        .dispatch(
            &ctx,
            GetManyOffsetUser {
                offset: 0,
                limit: 5,
                order_by: OrderBy::Desc,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(page.items.is_empty());
}
