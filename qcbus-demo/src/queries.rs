use crate::commands::SERVICES;
use crate::dto::UserDto;
use crate::service::Services;
use async_trait::async_trait;
use qcbus_application::{
    AppContext, AppError, Dependency, Extra, Injectable, Request, RequestHandler, Resolver,
};
use qcbus_persist::{OffsetPage, OrderBy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOneUser {
    pub id: Uuid,
}

impl Request for GetOneUser {
    const NAME: &'static str = "get_one_user";
    type Response = UserDto;
}

pub struct GetOneUserHandler {
    services: Services,
}

impl Injectable for GetOneUserHandler {
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
impl RequestHandler<GetOneUser> for GetOneUserHandler {
    async fn handle(&self, _ctx: &AppContext, r: GetOneUser, _e: Extra) -> Result<UserDto, AppError> {
        let mut gateway = self.services.open();
        let result = gateway.user().get_one(r.id).await;
        Ok(gateway.release(result).await?.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetManyOffsetUser {
    pub offset: i64,
    pub limit: i64,
    #[serde(default)]
    pub order_by: OrderBy,
}

impl Request for GetManyOffsetUser {
    const NAME: &'static str = "get_many_offset_user";
    type Response = OffsetPage<UserDto>;
}

pub struct GetManyOffsetUserHandler {
    services: Services,
}

impl Injectable for GetManyOffsetUserHandler {
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
impl RequestHandler<GetManyOffsetUser> for GetManyOffsetUserHandler {
    async fn handle(
        &self,
        _ctx: &AppContext,
        r: GetManyOffsetUser,
        _e: Extra,
    ) -> Result<OffsetPage<UserDto>, AppError> {
        if r.limit < 1 || r.offset < 0 {
            return Err(AppError::BadRequest("limit must be positive and offset non-negative".into()));
        }
        let mut gateway = self.services.open();
        let result = gateway
            .user()
            .get_many_by_offset(r.offset, r.limit, r.order_by)
            .await;
        Ok(gateway.release(result).await?.map(UserDto::from))
    }
}
