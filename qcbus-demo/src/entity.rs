use chrono::{DateTime, Utc};
use qcbus_persist::schema::defaults;
use qcbus_persist::{Column, ColumnType, Entity, EntitySchema, PersistResult, RelationshipGraph};
use serde::Deserialize;
use uuid::Uuid;

/// SQLite 建表语句，逐条执行
pub const SQLITE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        login TEXT NOT NULL,
        password TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_login_lower ON users (lower(login))",
];

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for User {
    const NAME: &'static str = "user";
}

pub fn user_schema() -> EntitySchema {
    EntitySchema::new(User::NAME, "users")
        .column(
            Column::new("id", ColumnType::Uuid)
                .primary_key()
                .insert_default(defaults::uuid_v7),
        )
        .column(Column::new("login", ColumnType::Text))
        .column(Column::new("password", ColumnType::Text))
        .with_timestamps()
}

pub fn graph() -> PersistResult<RelationshipGraph> {
    RelationshipGraph::builder().entity(user_schema()).build()
}
