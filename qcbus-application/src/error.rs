use qcbus_persist::PersistError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("persist: {0}")]
    Persist(#[from] PersistError),

    #[error("handler not registered: {0}")]
    UnregisteredHandler(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("infra: {0}")]
    Infra(String),

    #[error("missing dependency: handler={handler}, dependency={dependency}")]
    MissingDependency {
        handler: &'static str,
        dependency: String,
    },

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

const REASON: &str = "{reason}";

/// 唯一约束冲突翻译
///
/// 把持久化层的错误按驱动消息中出现的唯一字段名翻译为应用层错误：
/// - 未声明唯一字段时，整条驱动消息作为 `{reason}`；
/// - 命中某个唯一字段时，该字段名作为 `{reason}`；
/// - 声明了唯一字段但都未命中时，返回 `Internal(驱动消息)`；
/// - 已是应用层语义的错误原样返回。
///
/// ```rust
/// use qcbus_application::error::{AppError, UniqueViolation};
/// use qcbus_persist::PersistError;
///
/// let violation = UniqueViolation::new(AppError::Conflict).on("login");
/// let err = violation.translate(AppError::Persist(PersistError::Database {
///     reason: "UNIQUE constraint failed: users.login".into(),
/// }));
/// assert!(matches!(err, AppError::Conflict(msg) if msg == "login already in use"));
/// ```
#[derive(Clone, Debug)]
pub struct UniqueViolation {
    uniques: Vec<&'static str>,
    raise: fn(String) -> AppError,
    base_message: String,
}

impl UniqueViolation {
    pub fn new(raise: fn(String) -> AppError) -> Self {
        Self {
            uniques: Vec::new(),
            raise,
            base_message: format!("{REASON} already in use"),
        }
    }

    /// 声明一个唯一字段名
    pub fn on(mut self, unique: &'static str) -> Self {
        if !self.uniques.contains(&unique) {
            self.uniques.push(unique);
        }
        self
    }

    /// 消息模板；不含 `{reason}` 时以 `模板: <reason>` 拼接
    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.base_message = template.into();
        self
    }

    pub fn translate(&self, err: AppError) -> AppError {
        let origin = match err {
            AppError::Persist(PersistError::Database { reason }) => reason,
            AppError::Persist(other) => other.to_string(),
            other => return other,
        };

        if self.uniques.is_empty() {
            return (self.raise)(self.render(&origin));
        }

        match self.uniques.iter().find(|u| origin.contains(**u)) {
            Some(unique) => (self.raise)(self.render(unique)),
            None => AppError::Internal(origin),
        }
    }

    /// 等待 `fut`，失败时翻译错误
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        fut.await.map_err(|e| self.translate(e))
    }

    fn render(&self, reason: &str) -> String {
        if self.base_message.contains(REASON) {
            self.base_message.replace(REASON, reason)
        } else {
            format!("{}: <{reason}>", self.base_message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(reason: &str) -> AppError {
        AppError::Persist(PersistError::Database {
            reason: reason.to_string(),
        })
    }

    #[test]
    fn matching_unique_uses_its_name() {
        let v = UniqueViolation::new(AppError::Conflict).on("login").on("email");
        match v.translate(db("duplicate key value violates unique constraint \"users_email_key\"")) {
            AppError::Conflict(msg) => assert_eq!(msg, "email already in use"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unmatched_unique_is_internal() {
        let v = UniqueViolation::new(AppError::Conflict).on("login");
        match v.translate(db("disk I/O error")) {
            AppError::Internal(msg) => assert_eq!(msg, "disk I/O error"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_uniques_wraps_whole_message() {
        let v = UniqueViolation::new(AppError::BadRequest).message("User cannot be deleted");
        match v.translate(db("FOREIGN KEY constraint failed")) {
            AppError::BadRequest(msg) => {
                assert_eq!(msg, "User cannot be deleted: <FOREIGN KEY constraint failed>")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn application_errors_pass_through() {
        let v = UniqueViolation::new(AppError::Conflict).on("login");
        let err = v.translate(AppError::NotFound("No such user".into()));
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn guard_translates_failures() {
        let v = UniqueViolation::new(AppError::Conflict).on("login");
        let out: Result<(), _> = v
            .guard(async { Err(db("UNIQUE constraint failed: users.login")) })
            .await;
        assert!(matches!(out, Err(AppError::Conflict(_))));
    }
}
