//! 同步客户端配置：从 config/sync.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_SYNC__*` 覆盖（双下划线表示嵌套，如 `BEE_SYNC__CONNECTION__URL=ws://...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::SyncError;
use crate::supervisor::ReconnectPolicy;

/// 两次重连之间的固定间隔（毫秒）
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
/// 连续重连次数上限，超过后发出一次「连接丢失」
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// 相邻两条 assistant 定稿条目合并的时间窗口（毫秒）
pub const DEFAULT_MERGE_WINDOW_MS: u64 = 5_000;

/// 配置根（对应 config/sync.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub connection: ConnectionSection,
    pub history: HistorySection,
    pub confirmation: ConfirmationSection,
}

/// [connection] 段：服务端地址与重连策略
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

/// [history] 段
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            merge_window_ms: default_merge_window_ms(),
        }
    }
}

fn default_merge_window_ms() -> u64 {
    DEFAULT_MERGE_WINDOW_MS
}

/// [confirmation] 段：确认队列落盘目录与会话标识
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfirmationSection {
    /// 未设置时用 ./.bee-sync
    pub state_dir: Option<PathBuf>,
    /// 会话（标签页）标识；未设置时每次启动生成新的，相当于打开新标签页
    pub session_id: Option<String>,
}

impl SyncConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.connection.reconnect_delay_ms),
            max_attempts: self.connection.max_reconnect_attempts,
        }
    }

    pub fn merge_window(&self) -> Duration {
        Duration::from_millis(self.history.merge_window_ms)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.confirmation
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".bee-sync"))
    }
}

/// 从 config 目录加载配置，环境变量 BEE_SYNC__* 可覆盖
///
/// 1. 按顺序查找 config/sync.toml、../config/sync.toml、sync.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_SYNC__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<SyncConfig, SyncError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/sync", "../config/sync", "sync"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_SYNC")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}
