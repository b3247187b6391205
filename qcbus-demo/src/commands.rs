use crate::dto::{Status, UserDto};
use crate::events::UserCreated;
use crate::service::{Services, UserPatch};
use async_trait::async_trait;
use qcbus_application::{
    AppContext, AppError, Dependency, EventBus, Extra, Injectable, Request, RequestHandler,
    Resolver,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 64;

pub(crate) const SERVICES: &str = "services";
pub(crate) const EVENTS: &str = "events";

fn check_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
        return Err(AppError::Validation(format!(
            "Password between `{MIN_PASSWORD_LENGTH}` and `{MAX_PASSWORD_LENGTH}` characters long"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub login: String,
    pub password: String,
}

impl Request for CreateUser {
    const NAME: &'static str = "create_user";
    type Response = UserDto;
}

pub struct CreateUserHandler {
    services: Services,
    events: Arc<EventBus>,
}

impl Injectable for CreateUserHandler {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::of::<Services>(SERVICES),
            Dependency::of::<Arc<EventBus>>(EVENTS),
        ]
    }

    fn inject(resolver: &Resolver<'_>) -> Result<Self, AppError> {
        Ok(Self {
            services: resolver.resolve(SERVICES)?,
            events: resolver.resolve(EVENTS)?,
        })
    }
}

#[async_trait]
impl RequestHandler<CreateUser> for CreateUserHandler {
    async fn handle(&self, _ctx: &AppContext, r: CreateUser, _e: Extra) -> Result<UserDto, AppError> {
        if r.login.trim().is_empty() {
            return Err(AppError::Validation("Login must not be empty".into()));
        }
        check_password(&r.password)?;

        let mut gateway = self.services.open();
        gateway.begin().await?;
        let result = gateway.user().create(&r.login, &r.password).await;
        let user = gateway.commit_or_rollback(result).await?;

        self.events.publish(UserCreated {
            id: user.id,
            login: user.login.clone(),
        });
        Ok(user.into())
    }
}

/// 部分更新；目标 `id` 通过附加参数传入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Request for UpdateUser {
    const NAME: &'static str = "update_user";
    type Response = Status;
}

pub struct UpdateUserHandler {
    services: Services,
}

impl Injectable for UpdateUserHandler {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Services>(SERVICES)]
    }

    fn inject(resolver: &Resolver<'_>) -> Result<Self, AppError> {
        Ok(Self {
            services: resolver.resolve(SERVICES)?,
        })
    }
}

#[async_trait]
impl RequestHandler<UpdateUser> for UpdateUserHandler {
    async fn handle(&self, _ctx: &AppContext, r: UpdateUser, extra: Extra) -> Result<Status, AppError> {
        let id: Uuid = extra.get("id")?;
        if let Some(password) = &r.password {
            check_password(password)?;
        }
        let patch = UserPatch {
            login: r.login,
            password: r.password,
        };

        let mut gateway = self.services.open();
        gateway.begin().await?;
        let result = gateway.user().update(id, &patch).await;
        gateway.commit_or_rollback(result).await?;
        Ok(Status { status: true })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUser {
    pub id: Uuid,
}

impl Request for DeleteUser {
    const NAME: &'static str = "delete_user";
    type Response = ();
}

pub struct DeleteUserHandler {
    services: Services,
}

impl Injectable for DeleteUserHandler {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Services>(SERVICES)]
    }

    fn inject(resolver: &Resolver<'_>) -> Result<Self, AppError> {
        Ok(Self {
            services: resolver.resolve(SERVICES)?,
        })
    }
}

#[async_trait]
impl RequestHandler<DeleteUser> for DeleteUserHandler {
    async fn handle(&self, _ctx: &AppContext, r: DeleteUser, _e: Extra) -> Result<(), AppError> {
        let mut gateway = self.services.open();
        gateway.begin().await?;
        let result = gateway.user().delete(r.id).await;
        gateway.commit_or_rollback(result).await?;
        Ok(())
    }
}
