use async_trait::async_trait;
use qcbus_application::{Event, EventHandler};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserCreated {
    pub id: Uuid,
    pub login: String,
}

impl Event for UserCreated {
    fn name(&self) -> &'static str {
        "user_created"
    }
}

/// 记录新用户
pub struct LogUserCreated;

#[async_trait]
impl EventHandler<UserCreated> for LogUserCreated {
    fn handler_name(&self) -> &str {
        "log_user_created"
    }

    async fn handle(&self, event: &UserCreated) -> anyhow::Result<()> {
        info!(id = %event.id, login = %event.login, "user created");
        Ok(())
    }
}
