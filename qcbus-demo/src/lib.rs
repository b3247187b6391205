//! 用户服务示例：命令/查询经总线分发到处理器，处理器通过事务管理器调用查询引擎。
pub mod app;
pub mod commands;
pub mod dto;
pub mod entity;
pub mod events;
pub mod queries;
pub mod service;

pub use app::{App, migrate};
