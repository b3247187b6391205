#![allow(dead_code)]

use chrono::{DateTime, Utc};
use qcbus_persist::schema::defaults;
use qcbus_persist::{
    Column, ColumnType, DatabaseConfig, Entity, EntitySchema, JoinCondition, ManagerFactory,
    QueryEngine, Relationship, RelationshipGraph, TransactionManager,
};
use serde::Deserialize;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const DDL: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        login TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL UNIQUE, bio TEXT NOT NULL)",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER, title TEXT NOT NULL)",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER NOT NULL, body TEXT NOT NULL)",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    "CREATE TABLE post_tags (post_id INTEGER NOT NULL, tag_id INTEGER NOT NULL)",
    "CREATE TABLE events (id TEXT PRIMARY KEY, seq INTEGER NOT NULL, created_at TEXT NOT NULL)",
    "CREATE TABLE settings (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        active BOOLEAN NOT NULL,
        ratio NUMERIC,
        meta TEXT,
        note TEXT
    )",
];

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Entity for User {
    const NAME: &'static str = "user";
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub bio: String,
}

impl Entity for Profile {
    const NAME: &'static str = "profile";
}

#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub author: Option<Box<User>>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Entity for Post {
    const NAME: &'static str = "post";
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl Entity for Comment {
    const NAME: &'static str = "comment";
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Entity for Tag {
    const NAME: &'static str = "tag";
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Entity for Event {
    const NAME: &'static str = "event";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Setting {
    pub id: i64,
    pub owner_id: i64,
    pub active: bool,
    pub ratio: Option<f64>,
    pub meta: serde_json::Value,
    pub note: Option<String>,
}

impl Entity for Setting {
    const NAME: &'static str = "setting";
}

/// 同一张 users 表，带上 `settings` 集合
#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

impl Entity for Owner {
    const NAME: &'static str = "user";
}

fn int(name: &str) -> Column {
    Column::new(name, ColumnType::Integer)
}

fn text(name: &str) -> Column {
    Column::new(name, ColumnType::Text)
}

pub fn graph() -> anyhow::Result<RelationshipGraph> {
    let graph = RelationshipGraph::builder()
        .entity(
            EntitySchema::new("user", "users")
                .column(int("id").primary_key())
                .column(text("login"))
                .with_timestamps(),
        )
        .entity(
            EntitySchema::new("profile", "profiles")
                .column(int("id").primary_key())
                .column(int("user_id"))
                .column(text("bio")),
        )
        .entity(
            EntitySchema::new("post", "posts")
                .column(int("id").primary_key())
                .column(int("author_id"))
                .column(text("title")),
        )
        .entity(
            EntitySchema::new("comment", "comments")
                .column(int("id").primary_key())
                .column(int("post_id"))
                .column(text("body")),
        )
        .entity(
            EntitySchema::new("tag", "tags")
                .column(int("id").primary_key())
                .column(text("name")),
        )
        .entity(
            EntitySchema::new("event", "events")
                .column(
                    Column::new("id", ColumnType::Uuid)
                        .primary_key()
                        .insert_default(defaults::uuid_v7),
                )
                .column(int("seq"))
                .column(Column::new("created_at", ColumnType::Timestamp)),
        )
        .entity(
            EntitySchema::new("setting", "settings")
                .column(int("id").primary_key())
                .column(int("owner_id"))
                .column(Column::new("active", ColumnType::Bool))
                .column(Column::new("ratio", ColumnType::Float))
                .column(Column::new("meta", ColumnType::Json))
                .column(text("note")),
        )
        .relationship("user", Relationship::one_to_one("profile", "profile", "id", "user_id"))
        .relationship(
            "user",
            Relationship::one_to_many("settings", "setting", "id", "owner_id"),
        )
        .relationship("user", Relationship::one_to_many("posts", "post", "id", "author_id"))
        .relationship("post", Relationship::many_to_one("author", "user", "author_id", "id"))
        .relationship(
            "post",
            Relationship::one_to_many("comments", "comment", "id", "post_id"),
        )
        .relationship(
            "post",
            Relationship::many_to_many(
                "tags",
                "tag",
                JoinCondition::Secondary {
                    table: "post_tags".into(),
                    local: "id".into(),
                    secondary_local: "post_id".into(),
                    secondary_remote: "tag_id".into(),
                    remote: "id".into(),
                },
            ),
        )
        .build()?;
    Ok(graph)
}

pub struct TestDb {
    _dir: TempDir,
    pub engine: QueryEngine,
    pub factory: ManagerFactory,
}

impl TestDb {
    pub fn manager(&self) -> TransactionManager {
        self.factory.manager()
    }
}

/// 临时目录下的 SQLite 文件库（内存库每条连接各自独立，不适合连接池）
pub async fn setup() -> anyhow::Result<TestDb> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = DatabaseConfig::builder()
        .url(url)
        .max_connections(4)
        .build()
        .connect_sqlite()
        .await?;

    let factory = ManagerFactory::sqlite(pool);
    let mut manager = factory.manager();
    for ddl in DDL {
        manager.session().execute_raw(ddl).await?;
    }
    manager.close().await?;

    Ok(TestDb {
        _dir: dir,
        engine: QueryEngine::new(Arc::new(graph()?)),
        factory,
    })
}
