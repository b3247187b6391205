use qcbus_application::{AppContext, Extra, InMemoryCache, RequestOrigin};
use qcbus_demo::commands::{CreateUser, DeleteUser, UpdateUser};
use qcbus_demo::queries::{GetManyOffsetUser, GetOneUser};
use qcbus_demo::{App, migrate};
use qcbus_persist::{DatabaseConfig, ManagerFactory, OrderBy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = DatabaseConfig::from_env()?;
    if config.url.contains(":memory:") {
        // 内存库每条连接各自独立，只能共用一条长连接
        config.max_connections = 1;
        config.min_connections = 1;
    }
    let managers = ManagerFactory::sqlite(config.connect_sqlite().await?);
    migrate(&managers).await?;

    let app = App::build(managers, Arc::new(InMemoryCache::new()), Duration::from_secs(10))?;
    let ctx = AppContext::builder()
        .correlation_id("demo")
        .origin(
            RequestOrigin::builder()
                .base_url("http://localhost:8000")
                .path("/api/v1/users")
                .build(),
        )
        .build();

    let user = app
        .commands
        .dispatch(
            &ctx,
            CreateUser {
                login: "neo".into(),
                password: "there-is-no-spoon".into(),
            },
        )
        .await?;
    info!(user = %serde_json::to_string(&user)?, "created");

    let update = app
        .commands
        .dispatch(
            &ctx,
            UpdateUser {
                login: Some("the-one".into()),
                ..UpdateUser::default()
            },
        )
        .extra(Extra::new().with("id", user.id.to_string()));
    info!(status = update.await?.status, "updated");

    let fetched = app.queries.dispatch(&ctx, GetOneUser { id: user.id }).await?;
    info!(user = %serde_json::to_string(&fetched)?, "fetched");

    let page = app
        .queries
        .dispatch(
            &ctx,
            GetManyOffsetUser {
                offset: 0,
                limit: 10,
                order_by: OrderBy::Asc,
            },
        )
        .await?;
    info!(page = %serde_json::to_string(&page)?, "listed");

    app.commands.dispatch(&ctx, DeleteUser { id: user.id }).await?;
    app.events.wait_idle().await;
    info!("done");
    Ok(())
}
