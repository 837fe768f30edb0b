//! 同步核心错误类型
//!
//! 每类错误都在其发生的层处理：传输错误由重连恢复，解析错误丢弃单帧，
//! handler 错误由分发器隔离，持久化错误回退为空队列。只有重连耗尽与确认回复发送失败会暴露给调用方。

use thiserror::Error;

/// 传输层错误（打开失败 / 意外关闭 / 未连接 / 发送失败）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open connection: {0}")]
    OpenFailed(String),

    #[error("Connection closed unexpectedly: {0}")]
    ClosedUnexpectedly(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    Send(String),
}

/// 同步核心的错误分类
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 终态：需要用户刷新或显式重新 connect
    #[error("Connection lost after {attempts} reconnect attempts; refresh to retry")]
    ReconnectExhausted { attempts: u32 },

    #[error("Confirmation error: {0}")]
    Confirmation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn handler(handler: &str, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::ProtocolParse(e.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(e: config::ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}
