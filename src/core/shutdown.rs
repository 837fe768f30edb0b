//! 会话拆除（teardown）
//!
//! 离开页面 / Ctrl+C / quit 命令都走同一个关闭信号：监管任务关闭 socket 并退出，
//! 挂起中的重连定时器随任务一起取消。确认队列在每次变更后已经落盘，不需要额外 flush。

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起（quit 命令 / 输入结束）
    UserInitiated,
    /// Ctrl+C / SIGTERM
    Signal,
    /// 页面导航离开 / 宿主销毁会话
    Navigation,
}

/// 关闭信号：可克隆，所有克隆共享同一个 token 与原因
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子任务据此退出
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；只有第一次调用的原因会被记录
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!("Session teardown: {:?}", reason);
        }
        self.token.cancel();
    }

    /// 第一次触发关闭时的原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与 SIGTERM 都转成 `ShutdownReason::Signal`
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Signal);
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}
