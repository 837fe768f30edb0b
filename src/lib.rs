//! Bee Sync - AI 会话同步核心
//!
//! 在客户端维护远端长时间运行的 AI 助手会话的本地视图。
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）与默认常量
//! - **confirmation**: 工具确认仲裁（持久化 FIFO 队列，一次只展示一个）
//! - **core**: 错误类型、时钟抽象、会话拆除
//! - **history**: 历史对账（流式占位、助手条目合并、全量同步）
//! - **observability**: tracing 初始化
//! - **protocol**: 线上信封、载荷与分发器
//! - **session**: 会话构建器，把以上部件接成一个会话
//! - **supervisor**: 连接监管（状态机、重连、可见性、传输抽象）

pub mod config;
pub mod confirmation;
pub mod core;
pub mod history;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod supervisor;

pub use session::{SessionStreams, SyncSession, SyncSessionBuilder};
