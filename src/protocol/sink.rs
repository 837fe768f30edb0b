//! 出站发送接口
//!
//! 对账器与确认仲裁器只依赖这个 trait，不直接持有 socket；
//! 监管器句柄是生产实现，`RecordingSink` 用于测试与离线场景。
//!
//! `send` 只保证信封已交给发送端；需要确认信封真正写进 socket 的调用方
//! （确认回复）使用 `deliver`，拿到一个可等待的 `Delivery`。

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::envelope::Outbound;
use crate::core::{SyncError, TransportError};

/// 出站信封发送端；未连接时返回 `TransportError::NotConnected`
pub trait OutboundSink: Send + Sync {
    fn send(&self, message: Outbound) -> Result<(), SyncError>;

    /// 发送并返回写入结果。默认实现同步发送，结果立即可知
    fn deliver(&self, message: Outbound) -> Result<Delivery, SyncError> {
        self.send(message).map(|()| Delivery::done())
    }
}

/// 一次出站写入的结果
#[derive(Debug)]
pub struct Delivery {
    ack: Option<oneshot::Receiver<Result<(), SyncError>>>,
}

impl Delivery {
    /// 已写入
    pub fn done() -> Self {
        Self { ack: None }
    }

    /// 写入结果由发送端稍后回报；发送端丢弃 sender 视为未连接
    pub fn pending(ack: oneshot::Receiver<Result<(), SyncError>>) -> Self {
        Self { ack: Some(ack) }
    }

    pub fn is_pending(&self) -> bool {
        self.ack.is_some()
    }

    pub async fn wait(self) -> Result<(), SyncError> {
        match self.ack {
            None => Ok(()),
            Some(ack) => ack
                .await
                .unwrap_or_else(|_| Err(TransportError::NotConnected.into())),
        }
    }
}

/// 记录所有出站信封的 sink，可切换为「离线」以模拟发送失败
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Outbound>>>,
    offline: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|e| e.into_inner()) = offline;
    }

    /// 已成功发送的信封快照
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutboundSink for RecordingSink {
    fn send(&self, message: Outbound) -> Result<(), SyncError> {
        if *self.offline.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(TransportError::NotConnected.into());
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_offline() {
        let sink = RecordingSink::new();
        sink.send(Outbound::InterruptRequest {}).unwrap();
        sink.set_offline(true);
        assert!(sink.send(Outbound::RequestHistorySync {}).is_err());
        assert!(sink.deliver(Outbound::RequestHistorySync {}).is_err());
        assert_eq!(sink.sent(), vec![Outbound::InterruptRequest {}]);
    }

    #[tokio::test]
    async fn test_dropped_ack_reads_as_not_connected() {
        let (tx, rx) = oneshot::channel();
        let delivery = Delivery::pending(rx);
        assert!(delivery.is_pending());
        drop(tx);
        assert!(matches!(
            delivery.wait().await,
            Err(SyncError::Transport(TransportError::NotConnected))
        ));

        assert!(Delivery::done().wait().await.is_ok());
    }
}
