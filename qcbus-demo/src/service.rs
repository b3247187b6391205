//! 用户服务
//!
//! 服务不持有连接，只借用本次调用的事务管理器；事务边界由处理器决定。
//!
use crate::entity::User;
use qcbus_application::{AppError, UniqueViolation};
use qcbus_persist::{
    Fields, Filters, ManagerFactory, OffsetPage, OrderBy, QueryEngine, TransactionManager,
};
use uuid::Uuid;

/// 服务装配：连接工厂 + 查询引擎，每次调用打开一个新的入口
#[derive(Clone, Debug)]
pub struct Services {
    managers: ManagerFactory,
    engine: QueryEngine,
}

impl Services {
    pub fn new(managers: ManagerFactory, engine: QueryEngine) -> Self {
        Self { managers, engine }
    }

    pub fn open(&self) -> ServiceGateway {
        ServiceGateway {
            manager: self.managers.manager(),
            engine: self.engine.clone(),
        }
    }
}

/// 一次调用的服务入口，独占一个事务管理器
pub struct ServiceGateway {
    manager: TransactionManager,
    engine: QueryEngine,
}

impl ServiceGateway {
    pub fn user(&mut self) -> UserService<'_> {
        UserService {
            manager: &mut self.manager,
            engine: &self.engine,
        }
    }

    pub async fn begin(&mut self) -> Result<(), AppError> {
        self.manager.with_transaction(None, false).await?;
        Ok(())
    }

    /// 按结果提交或回滚，并释放会话
    pub async fn commit_or_rollback<T>(&mut self, result: Result<T, AppError>) -> Result<T, AppError> {
        self.manager.finish(result.is_err()).await?;
        result
    }

    /// 释放只读调用的会话
    pub async fn release<T>(&mut self, result: Result<T, AppError>) -> Result<T, AppError> {
        self.manager.close().await?;
        result
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub login: Option<String>,
    pub password: Option<String>,
}

impl UserPatch {
    fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(login) = &self.login {
            fields = fields.set("login", login);
        }
        if let Some(password) = &self.password {
            fields = fields.set("password", password);
        }
        fields
    }
}

pub struct UserService<'a> {
    manager: &'a mut TransactionManager,
    engine: &'a QueryEngine,
}

impl UserService<'_> {
    pub async fn get_one(&mut self, id: Uuid) -> Result<User, AppError> {
        self.manager
            .send(&self.engine.get_one::<User>(by_id(id)))
            .await?
            .ok_or_else(|| AppError::NotFound("No such user".into()))
    }

    pub async fn get_many_by_offset(
        &mut self,
        offset: i64,
        limit: i64,
        order_by: OrderBy,
    ) -> Result<OffsetPage<User>, AppError> {
        let query = self
            .engine
            .get_many_by_offset::<User>(Filters::new())
            .offset(Some(offset))
            .limit(Some(limit))
            .order_by(order_by);
        Ok(self.manager.send(&query).await?)
    }

    pub async fn create(&mut self, login: &str, password: &str) -> Result<User, AppError> {
        let fields = Fields::new().set("login", login).set("password", password);
        let query = self.engine.create::<User>(fields);

        UniqueViolation::new(AppError::Conflict)
            .on("login")
            .guard(async {
                self.manager
                    .send(&query)
                    .await?
                    .ok_or_else(|| AppError::Conflict("User already exists".into()))
            })
            .await
    }

    pub async fn update(&mut self, id: Uuid, patch: &UserPatch) -> Result<User, AppError> {
        let fields = patch.fields();
        if fields.is_empty() {
            return Err(AppError::BadRequest("Nothing to update".into()));
        }
        self.exists(id).await?;
        let query = self
            .engine
            .update::<User>(fields, Filters::new())
            .filter("id", id);

        UniqueViolation::new(AppError::Conflict)
            .on("login")
            .guard(async {
                self.manager
                    .send(&query)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::Conflict(format!("User were not updated: id={id}")))
            })
            .await
    }

    pub async fn delete(&mut self, id: Uuid) -> Result<bool, AppError> {
        self.exists(id).await?;
        let query = self.engine.delete::<User>(by_id(id));

        UniqueViolation::new(AppError::BadRequest)
            .message("User cannot be deleted: {reason}")
            .guard(async { Ok::<_, AppError>(!self.manager.send(&query).await?.is_empty()) })
            .await
    }

    pub async fn exists(&mut self, id: Uuid) -> Result<(), AppError> {
        if self.manager.send(&self.engine.exists::<User>(by_id(id))).await? {
            Ok(())
        } else {
            Err(AppError::NotFound("No such user".into()))
        }
    }
}

fn by_id(id: Uuid) -> Filters {
    Filters::new().eq("id", id)
}
